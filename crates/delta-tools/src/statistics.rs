//! 统计工具
//!
//! 探测样本的分位数与 IQR 截尾均值（纯函数）。
//!
//! 机械探测天然带噪声（振动、床面毛刺、探针回弹），截掉四分位距
//! 之外的样本比假设固定噪声模型更稳健。

/// 线性插值分位数
///
/// 采用相邻秩线性插值（R-7，即 NumPy/pandas 的默认方法）：
/// `h = (n - 1) * q`，在 `sorted[floor(h)]` 与 `sorted[ceil(h)]`
/// 之间按小数部分插值。偶数长度样本集的取值由此唯一确定。
///
/// 空切片返回 0.0。
pub fn quantile(samples: &[f64], q: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    let h = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// 算术平均
///
/// 空切片返回 0.0。
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// IQR 截尾均值：代表性探测高度
///
/// 丢弃严格落在 `[Q1, Q3]` 之外的样本，取保留样本的均值并舍入到
/// 3 位小数。若截尾后为空（理论上不会发生，保底分支），回退到
/// 全体样本的原始均值。
pub fn iqr_trimmed_mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let q1 = quantile(samples, 0.25);
    let q3 = quantile(samples, 0.75);

    let retained: Vec<f64> = samples
        .iter()
        .copied()
        .filter(|z| *z >= q1 && *z <= q3)
        .collect();

    if retained.is_empty() {
        mean(samples)
    } else {
        round3(mean(&retained))
    }
}

/// 舍入到 3 位小数
fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_quantile_known_values() {
        let samples = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&samples, 0.25), 1.75);
        assert_eq!(quantile(&samples, 0.5), 2.5);
        assert_eq!(quantile(&samples, 0.75), 3.25);
        assert_eq!(quantile(&samples, 0.0), 1.0);
        assert_eq!(quantile(&samples, 1.0), 4.0);
    }

    #[test]
    fn test_quantile_unsorted_input() {
        let samples = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(quantile(&samples, 0.5), 2.5);
    }

    #[test]
    fn test_quantile_single_sample() {
        assert_eq!(quantile(&[7.5], 0.25), 7.5);
        assert_eq!(quantile(&[7.5], 0.75), 7.5);
    }

    #[test]
    fn test_mean_empty_is_zero() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(iqr_trimmed_mean(&[]), 0.0);
    }

    #[test]
    fn test_trimmed_mean_discards_outlier() {
        // 7 个紧凑样本 + 1 个飞点
        let samples = [2.001, 2.003, 2.002, 2.004, 2.002, 2.003, 2.002, 5.0];
        let trimmed = iqr_trimmed_mean(&samples);
        let raw = mean(&samples);
        assert!(trimmed < 2.01, "trimmed mean polluted: {}", trimmed);
        assert!((raw - trimmed).abs() > 0.1);
    }

    #[test]
    fn test_trimmed_mean_rounds_to_three_decimals() {
        let samples = [1.00011, 1.00011, 1.00011, 1.00011];
        assert_eq!(iqr_trimmed_mean(&samples), 1.0);
    }

    proptest! {
        /// 全同样本（3 位小数网格上）的代表高度恰等于该值
        #[test]
        fn prop_identical_samples_exact(value_milli in -100_000i64..100_000, n in 1usize..16) {
            let value = value_milli as f64 / 1000.0;
            let samples = vec![value; n];
            prop_assert_eq!(iqr_trimmed_mean(&samples), value);
        }

        /// 单个远端飞点：截尾均值明显偏离原始均值，且落在正常样本范围内
        #[test]
        fn prop_single_outlier_rejected(
            base_milli in 0i64..10_000,
            jitter in proptest::collection::vec(0i64..50, 3..12),
            outlier_pos in 0usize..3,
        ) {
            let base = base_milli as f64 / 1000.0;
            let mut samples: Vec<f64> = jitter.iter().map(|j| base + *j as f64 / 1000.0).collect();
            let outlier_pos = outlier_pos.min(samples.len());
            samples.insert(outlier_pos, base + 100.0);

            let lo = base;
            let hi = base + 0.05;
            let trimmed = iqr_trimmed_mean(&samples);
            let raw = mean(&samples);

            // 截尾结果落回正常样本范围（留 1 个舍入单位的余量）
            prop_assert!(trimmed >= lo - 0.001 && trimmed <= hi + 0.001,
                "trimmed {} outside [{}, {}]", trimmed, lo, hi);
            // 原始均值被飞点拖走
            prop_assert!((raw - trimmed).abs() > 0.5);
        }
    }
}
