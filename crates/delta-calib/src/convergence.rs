//! 收敛回路状态机
//!
//! 两个回路共用同一套「先收敛、再验证」策略：偏差落进容差后并不
//! 立即宣告成功，而是保持参数不变再测一轮；只有连续的验证轮也在
//! 容差内才算收敛。验证轮失败则退回调整阶段。
//!
//! 状态机是纯函数式的——只吃测得的高度、吐参数更新，不做任何
//! IO——物理编排在 [`crate::engine`]。

/// 一轮观测之后回路的去向
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopStep {
    /// 验证轮也在容差内：收敛完成
    Converged,
    /// 偏差首次落进容差：进入验证阶段，参数保持不变
    Verifying,
    /// 偏差超限：参数已按规则调整
    Adjusted {
        /// 本次调整是否打断了一个验证阶段
        failed_verification: bool,
    },
}

/// 端点偏移回路
///
/// 状态是三塔偏移修正向量。调整规则：以第三个探测塔为相对零点，
/// 每塔加上 `height[i] − height[ref]`。
#[derive(Debug, Clone)]
pub struct EndpointLoop {
    offsets: [f64; 3],
    tolerance: f64,
    verifying: bool,
    iteration: usize,
}

/// 相对修正的参考塔（第三个探测的塔）
const REFERENCE_TOWER: usize = 2;

impl EndpointLoop {
    pub fn new(seed: [f64; 3], tolerance: f64) -> Self {
        Self {
            offsets: seed,
            tolerance,
            verifying: false,
            iteration: 0,
        }
    }

    /// 当前偏移向量（下一轮要写入 `M666` 的值）
    pub fn offsets(&self) -> [f64; 3] {
        self.offsets
    }

    /// 已完成的观测轮数
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn is_verifying(&self) -> bool {
        self.verifying
    }

    /// 三塔高度偏差（收敛判据）
    pub fn deviation(heights: [f64; 3]) -> f64 {
        let max = heights.iter().copied().fold(f64::MIN, f64::max);
        let min = heights.iter().copied().fold(f64::MAX, f64::min);
        max - min
    }

    /// 吃进一轮三塔测量，推进状态机
    pub fn observe(&mut self, heights: [f64; 3]) -> LoopStep {
        self.iteration += 1;

        if Self::deviation(heights) <= self.tolerance {
            if self.verifying {
                return LoopStep::Converged;
            }
            self.verifying = true;
            return LoopStep::Verifying;
        }

        let failed_verification = self.verifying;
        self.verifying = false;

        let reference = heights[REFERENCE_TOWER];
        for (offset, height) in self.offsets.iter_mut().zip(heights) {
            *offset += height - reference;
        }
        LoopStep::Adjusted {
            failed_verification,
        }
    }
}

/// 半径回路
///
/// 状态是单个标量半径。调整规则：`r += (塔均值 − 中心) × gain`，
/// gain 是经验选定的步进倍率。
#[derive(Debug, Clone)]
pub struct RadiusLoop {
    radius: f64,
    gain: f64,
    tolerance: f64,
    verifying: bool,
    iteration: usize,
}

impl RadiusLoop {
    pub fn new(seed: f64, gain: f64, tolerance: f64) -> Self {
        Self {
            radius: seed,
            gain,
            tolerance,
            verifying: false,
            iteration: 0,
        }
    }

    /// 当前半径（下一轮要写入 `M665` 的值）
    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn is_verifying(&self) -> bool {
        self.verifying
    }

    /// 吃进一轮测量（塔均值 + 中心高度），推进状态机
    pub fn observe(&mut self, tower_mean: f64, center: f64) -> LoopStep {
        self.iteration += 1;

        if (tower_mean - center).abs() <= self.tolerance {
            if self.verifying {
                return LoopStep::Converged;
            }
            self.verifying = true;
            return LoopStep::Verifying;
        }

        let failed_verification = self.verifying;
        self.verifying = false;

        self.radius += (tower_mean - center) * self.gain;
        LoopStep::Adjusted {
            failed_verification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_zero_deviation_verifies_then_converges() {
        let seed = [-5.0, -5.0, -5.0];
        let mut endpoint = EndpointLoop::new(seed, 0.05);

        // 第 1 轮：偏差 0 → 进入验证，向量不变
        assert_eq!(endpoint.observe([1.0, 1.0, 1.0]), LoopStep::Verifying);
        assert!(endpoint.is_verifying());
        assert_eq!(endpoint.offsets(), seed);

        // 第 2 轮：验证通过 → 收敛，向量仍然不变
        assert_eq!(endpoint.observe([1.0, 1.0, 1.0]), LoopStep::Converged);
        assert_eq!(endpoint.offsets(), seed);
        assert_eq!(endpoint.iteration(), 2);
    }

    #[test]
    fn test_endpoint_adjustment_relative_to_reference() {
        let mut endpoint = EndpointLoop::new([-5.0, -5.0, -5.0], 0.05);
        let step = endpoint.observe([1.3, 0.9, 1.0]);
        assert_eq!(
            step,
            LoopStep::Adjusted {
                failed_verification: false
            }
        );
        // 每塔加上与参考塔（第三塔）的差
        let offsets = endpoint.offsets();
        assert!((offsets[0] - (-5.0 + 0.3)).abs() < 1e-12);
        assert!((offsets[1] - (-5.0 - 0.1)).abs() < 1e-12);
        assert!((offsets[2] - (-5.0)).abs() < 1e-12);
    }

    #[test]
    fn test_endpoint_failed_verification_resumes_adjustment() {
        let mut endpoint = EndpointLoop::new([0.0; 3], 0.05);
        assert_eq!(endpoint.observe([1.0, 1.0, 1.0]), LoopStep::Verifying);
        // 验证轮偏差超限 → 标记验证失败并继续调整
        assert_eq!(
            endpoint.observe([1.5, 1.0, 1.0]),
            LoopStep::Adjusted {
                failed_verification: true
            }
        );
        assert!(!endpoint.is_verifying());
    }

    #[test]
    fn test_endpoint_deviation_at_tolerance_counts_as_converged() {
        let mut endpoint = EndpointLoop::new([0.0; 3], 0.05);
        // 恰好等于容差（<=）也算在容差内
        assert_eq!(endpoint.observe([1.05, 1.0, 1.0]), LoopStep::Verifying);
    }

    #[test]
    fn test_radius_proportional_adjustment() {
        let mut radius = RadiusLoop::new(62.850, 1.5, 0.05);
        let step = radius.observe(10.0, 10.06);
        assert_eq!(
            step,
            LoopStep::Adjusted {
                failed_verification: false
            }
        );
        // r + (10.0 - 10.06) * 1.5 = r - 0.09
        assert!((radius.radius() - (62.850 - 0.09)).abs() < 1e-12);
    }

    #[test]
    fn test_radius_verify_then_converge_keeps_radius() {
        let mut radius = RadiusLoop::new(62.850, 1.5, 0.05);
        assert_eq!(radius.observe(10.0, 10.02), LoopStep::Verifying);
        assert_eq!(radius.radius(), 62.850);
        assert_eq!(radius.observe(10.0, 9.97), LoopStep::Converged);
        assert_eq!(radius.radius(), 62.850);
    }

    #[test]
    fn test_radius_failed_verification() {
        let mut radius = RadiusLoop::new(62.850, 1.5, 0.05);
        assert_eq!(radius.observe(10.0, 10.0), LoopStep::Verifying);
        assert_eq!(
            radius.observe(10.0, 10.2),
            LoopStep::Adjusted {
                failed_verification: true
            }
        );
    }
}
