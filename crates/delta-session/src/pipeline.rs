//! IO 线程循环
//!
//! 后台线程独占 [`LineTransport`]：空闲时持续排空入站行（超时命令的
//! 迟到输出在这里被消费掉，不会归到后续命令名下）；收到请求后写出
//! 命令行，逐行喂给 [`ReplyParser`]，直到停止标记或截止时间。

use crate::SessionError;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use delta_gcode::{Opcode, Reply, ReplyParser};
use delta_link::{LineTransport, LinkError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// 会话配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// 单条命令的总预算：截止前未见 `ok` 即 [`SessionError::Timeout`]。
    /// 归位和探测都是真实机械运动，秒级耗时属正常。
    pub command_timeout: std::time::Duration,
    /// 等待应答时单次 receive 的轮询窗口
    pub poll_interval: std::time::Duration,
    /// 空闲排空之间的休眠
    pub idle_poll_interval: std::time::Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout: std::time::Duration::from_secs(20),
            poll_interval: std::time::Duration::from_millis(20),
            idle_poll_interval: std::time::Duration::from_millis(50),
        }
    }
}

/// 会话 API 发给 IO 线程的单条请求
pub(crate) struct CommandRequest {
    pub line: String,
    pub opcode: Opcode,
    /// 每请求一个容量 1 的应答通道
    pub reply_tx: Sender<Result<Reply, SessionError>>,
}

/// IO 线程主循环
///
/// 请求通道断开（会话被 Drop）即退出。
pub(crate) fn io_loop(
    mut transport: impl LineTransport,
    cmd_rx: Receiver<CommandRequest>,
    quiet: Arc<AtomicBool>,
    config: SessionConfig,
) {
    loop {
        match cmd_rx.try_recv() {
            Ok(request) => {
                let result = execute(&mut transport, &request, &quiet, &config);
                // 调用方可能已放弃等待，发送失败只能忽略
                let _ = request.reply_tx.send(result);
                continue;
            },
            Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {},
        }

        // 空闲排空：上一条超时命令的迟到行在这里被消费并丢弃
        match transport.try_receive_line() {
            Ok(Some(line)) => {
                debug!("discarding stale line: {}", line);
                continue;
            },
            Ok(None) => {},
            Err(e) => {
                warn!("transport error while idle: {}", e);
            },
        }

        spin_sleep::sleep(config.idle_poll_interval);
    }
    trace!("session IO loop exited");
}

/// 执行一条命令：写出、累积、在停止标记处定稿
fn execute(
    transport: &mut impl LineTransport,
    request: &CommandRequest,
    quiet: &AtomicBool,
    config: &SessionConfig,
) -> Result<Reply, SessionError> {
    let log_lines = !quiet.load(Ordering::Relaxed);
    if log_lines {
        debug!("running gcode: {}", request.line);
    }

    transport.send_line(&request.line)?;

    let mut parser = ReplyParser::new(request.opcode);
    let deadline = Instant::now() + config.command_timeout;

    loop {
        match transport.receive_line(config.poll_interval) {
            Ok(line) => {
                if log_lines {
                    debug!("> {}", line);
                }
                // 停止标记永远结束当前累积窗口
                if ReplyParser::is_stop_token(&line) {
                    return parser.finish().map_err(SessionError::from);
                }
                if !parser.feed_line(&line)? {
                    trace!("ignoring unrecognized line: {}", line);
                }
            },
            Err(LinkError::Timeout) => {},
            Err(e) => return Err(e.into()),
        }

        if Instant::now() >= deadline {
            warn!("gcode {} timed out after {:?}", request.line, config.command_timeout);
            return Err(SessionError::Timeout);
        }
    }
}
