//! # Delta Calibration
//!
//! 探测驱动的几何标定流程：
//!
//! - `probe`: 多样本单点探测（机械回弹补偿 + IQR 截尾）
//! - `convergence`: 两个收敛回路的纯状态机（先收敛、再验证）
//! - `engine`: 编排层（写参数 → 归位 → 探测 → 判定，直到收敛或
//!   迭代上限；EEPROM 固化由显式 commit 步骤把关）
//! - `config`: 容差、种子、增益等可覆盖常量（TOML）
//!
//! 所有物理测量都经由 `delta-session::Device`；本 crate 不直接碰
//! 传输层。

pub mod config;
pub mod convergence;
pub mod engine;
pub mod probe;

pub use config::CalibConfig;
pub use convergence::{EndpointLoop, LoopStep, RadiusLoop};
pub use engine::{CalibrationEngine, CalibrationOptions, LoopOutcome, RunSummary};
pub use probe::ProbeController;

use delta_session::SessionError;
use thiserror::Error;

/// 标定层错误类型
///
/// 会话/传输错误原样上抛并终止当前标定运行——带着可疑的测量值
/// 继续收敛比中止更危险（盲目重试探测可能把探针怼进床面）。
#[derive(Error, Debug)]
pub enum CalibError {
    /// 会话层错误（协议、超时、链路）
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// 配置文件读取失败
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// 配置文件解析失败
    #[error("Invalid config: {0}")]
    Config(#[from] toml::de::Error),
}
