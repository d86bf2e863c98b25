//! # Delta Link Layer
//!
//! 行通道抽象：在字节传输之上收发换行结尾的 ASCII 文本行。
//!
//! 上层（`delta-session`）只依赖 [`LineTransport`] trait；具体后端有两个：
//!
//! - [`serial::SerialLineTransport`]: 真实串口（含 Monoprice USB 适配器的
//!   双重打开怪癖）
//! - `sim::SimulatedDelta`: 确定性固件模拟器（`mock` feature，测试专用）
//!
//! 传输由一个协议会话独占；trait 要求 `Send` 以便移交给后台 IO 线程。

use std::time::Duration;
use thiserror::Error;

pub mod serial;

#[cfg(feature = "mock")]
pub mod sim;

pub use serial::SerialLineTransport;

/// 出站行的结束符
pub const LINE_TERMINATOR: char = '\n';

/// 行通道统一错误类型
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("Read timeout")]
    Timeout,
    #[error("Line channel closed")]
    Closed,
}

/// 换行分隔的文本行通道
pub trait LineTransport: Send {
    /// 写出一行并追加 [`LINE_TERMINATOR`]
    fn send_line(&mut self, line: &str) -> Result<(), LinkError>;

    /// 读取下一行（不含行结束符），最多阻塞 `timeout`
    ///
    /// 窗口内没有完整行到达时返回 [`LinkError::Timeout`]。
    fn receive_line(&mut self, timeout: Duration) -> Result<String, LinkError>;

    /// 非阻塞探询：有完整行则取走，没有返回 `None`
    fn try_receive_line(&mut self) -> Result<Option<String>, LinkError> {
        match self.receive_line(Duration::ZERO) {
            Ok(line) => Ok(Some(line)),
            Err(LinkError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// 字节流 → 行的累积缓冲
///
/// 串口读取按块到达，这里负责切分；`\r` 在行尾一并剥掉。
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入新到的字节
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// 取出下一条完整行（若有）
    pub fn pop_line(&mut self) -> Option<String> {
        let nl = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=nl).collect();
        line.pop(); // '\n'
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}
