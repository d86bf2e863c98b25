//! 标定配置
//!
//! 容差和迭代上限来自原工具链的实测取值；`radius_gain` 与两个种子
//! 是经验常量而非推导结果，所以全部做成可覆盖字段而不是内联字面量。

use crate::CalibError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 标定流程的全部可调参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibConfig {
    /// 每个探测点的采样次数
    pub samples: usize,
    /// 避让高度：移动到新探测点之前先抬升到这里
    pub safe_height: f64,
    /// 塔探测点所在的半径
    pub probe_radius: f64,
    /// 端点回路收敛容差（三塔高度 max − min）
    pub endpoint_tolerance: f64,
    /// 半径回路收敛容差（|塔均值 − 中心|）
    pub center_tolerance: f64,
    /// 端点回路的初始偏移向量
    pub endpoint_seed: [f64; 3],
    /// 半径回路的初始半径
    pub radius_seed: f64,
    /// 半径修正的比例增益（经验值，未经推导）
    pub radius_gain: f64,
    /// 端点回路迭代上限
    pub endpoint_iterations: usize,
    /// 半径回路迭代上限
    pub radius_iterations: usize,
    /// 限位回弹补偿的单步抬升量
    pub nudge_step: f64,
    /// 两次采样之间抬离接触点的高度
    pub sample_lift: f64,
}

impl Default for CalibConfig {
    fn default() -> Self {
        Self {
            samples: 7,
            safe_height: 20.0,
            probe_radius: 50.0,
            endpoint_tolerance: 0.05,
            center_tolerance: 0.05,
            endpoint_seed: [-5.0, -5.0, -5.0],
            radius_seed: 62.850,
            radius_gain: 1.5,
            endpoint_iterations: 10,
            radius_iterations: 10,
            nudge_step: 0.001,
            sample_lift: 1.0,
        }
    }
}

impl CalibConfig {
    /// 从 TOML 文本解析（缺省字段取 [`Default`] 值）
    pub fn from_toml_str(text: &str) -> Result<Self, CalibError> {
        Ok(toml::from_str(text)?)
    }

    /// 从 TOML 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CalibError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_field_tooling() {
        let config = CalibConfig::default();
        assert_eq!(config.samples, 7);
        assert_eq!(config.endpoint_tolerance, 0.05);
        assert_eq!(config.center_tolerance, 0.05);
        assert_eq!(config.endpoint_seed, [-5.0, -5.0, -5.0]);
        assert_eq!(config.radius_seed, 62.850);
        assert_eq!(config.radius_gain, 1.5);
        assert_eq!(config.endpoint_iterations, 10);
    }

    #[test]
    fn test_partial_toml_override() {
        let config = CalibConfig::from_toml_str(
            r#"
            samples = 5
            radius_gain = 1.2
            "#,
        )
        .unwrap();
        assert_eq!(config.samples, 5);
        assert_eq!(config.radius_gain, 1.2);
        // 未覆盖的字段落回默认
        assert_eq!(config.radius_seed, 62.850);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(matches!(
            CalibConfig::from_toml_str("samples = \"seven\""),
            Err(CalibError::Config(_))
        ));
    }
}
