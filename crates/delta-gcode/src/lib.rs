//! # Delta G-code Protocol
//!
//! MiniDelta 固件行协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `command`: 命令构建（白名单 opcode + 轴参数序列化）
//! - `reply`: 应答数据类型（探测高度、位置、限位开关、机器参数）
//! - `parser`: 按 opcode 分发的应答行解析器
//!
//! ## 协议形态
//!
//! 命令与应答都是换行结尾的 ASCII 文本行。每条命令的应答由零到多条
//! 信息行组成，以字面量 `ok` 行结束。协议引擎（`delta-session`）逐行
//! 喂给 [`ReplyParser`]，在观察到停止标记之前绝不返回 Reply。

pub mod command;
pub mod parser;
pub mod reply;

// 重新导出常用类型
pub use command::{Command, Move, Opcode};
pub use parser::{BED_PREFIX, COUNT_DELIMITER, ReplyParser, SETTINGS_ECHO_PREFIX, STOP_TOKEN};
pub use reply::{EndstopState, EndstopStatus, MachineSettings, Position, Reply};

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug)]
pub enum GcodeError {
    /// 不在白名单内的 G-code（构造期拒绝，不会发送到设备）
    #[error("Unsupported G-code: {0}")]
    UnsupportedOpcode(String),

    /// 命中已知前缀但数值解析失败的应答行
    #[error("Malformed {shape} line: {line:?}")]
    MalformedLine {
        /// 行形态（"Bed" / "position" / "endstop" / "settings"）
        shape: &'static str,
        line: String,
    },

    /// 收到 `ok` 但缺少该 opcode 必需的结构化载荷
    #[error("Reply for {opcode} terminated without expected payload")]
    IncompleteReply { opcode: Opcode },
}
