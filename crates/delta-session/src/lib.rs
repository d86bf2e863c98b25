//! # Delta Session
//!
//! 命令/应答协议会话：一次一条命令，阻塞到终止行或超时。
//!
//! ## 架构
//!
//! ```text
//! Device（类型化操作：home / rapid / probe / 查询 / 参数写入）
//!     ↓ send(Command)
//! Session（单许可锁 + 20s 截止时间）
//!     ↓ crossbeam 通道
//! IO 线程（pipeline::io_loop，独占传输，逐行累积应答）
//!     ↓ LineTransport
//! 串口 / 模拟器
//! ```
//!
//! ## 不变量
//!
//! - 同一会话同时只有一条在途命令（[`SessionError::Busy`] 由
//!   `try_lock` 单许可锁强制，而不是轮询布尔标志）
//! - 观察到停止标记 `ok` 之前绝不返回 Reply
//! - 超时让会话回到空闲态，迟到的行在空闲阶段被排掉，不会
//!   泄漏进下一条命令

pub mod device;
pub mod pipeline;
pub mod session;

pub use device::Device;
pub use pipeline::SessionConfig;
pub use session::{QuietGuard, Session};

use delta_gcode::{GcodeError, Opcode};
use delta_link::LinkError;
use thiserror::Error;

/// 会话层错误类型
#[derive(Error, Debug)]
pub enum SessionError {
    /// 协议错误（白名单拒绝 / 应答行损坏 / 载荷缺失）
    #[error("Protocol error: {0}")]
    Protocol(#[from] GcodeError),

    /// 行通道错误
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// 已有命令在途（调用方串行化缺陷，正确使用下不应出现）
    #[error("Command already in flight")]
    Busy,

    /// 截止时间内未观察到停止标记
    #[error("Command timed out waiting for ok")]
    Timeout,

    /// IO 线程已退出
    #[error("Session IO thread gone")]
    ChannelClosed,

    /// 应答变体与 opcode 家族不符（固件侧故障）
    #[error("Unexpected reply shape for {opcode}")]
    UnexpectedReply { opcode: Opcode },
}
