//! 会话 API 模块
//!
//! 对外的 [`Session`] 结构体，封装底层 IO 线程和单命令在途约束。

use crate::pipeline::{CommandRequest, SessionConfig, io_loop};
use crate::SessionError;
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use delta_gcode::{Command, Reply};
use delta_link::LineTransport;
use parking_lot::Mutex;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::Duration;
use tracing::error;

/// 协议会话（对外 API）
///
/// 一次 `send` 一条命令，阻塞到应答或超时。传输在构造时移交给
/// 后台 IO 线程独占；Drop 时先关请求通道再 join 线程。
pub struct Session {
    /// 请求通道发送端
    ///
    /// 需要在 Drop 时提前关闭（在 join IO 线程之前），否则
    /// `io_loop` 收不到 `Disconnected`，join 会永远卡住。
    cmd_tx: ManuallyDrop<Sender<CommandRequest>>,
    /// 单许可命令锁：持有者即为在途命令
    permit: Mutex<()>,
    /// 抑制逐行日志（紧密探测循环用）
    quiet: Arc<AtomicBool>,
    config: SessionConfig,
    io_thread: Option<JoinHandle<()>>,
}

impl Session {
    /// 用默认配置创建会话并启动 IO 线程
    pub fn new(transport: impl LineTransport + 'static) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    /// 用自定义配置创建会话
    pub fn with_config(transport: impl LineTransport + 'static, config: SessionConfig) -> Self {
        let (cmd_tx, cmd_rx) = bounded(1);
        let quiet = Arc::new(AtomicBool::new(false));

        let quiet_clone = quiet.clone();
        let config_clone = config.clone();
        let io_thread = spawn(move || {
            io_loop(transport, cmd_rx, quiet_clone, config_clone);
        });

        Self {
            cmd_tx: ManuallyDrop::new(cmd_tx),
            permit: Mutex::new(()),
            quiet,
            config,
            io_thread: Some(io_thread),
        }
    }

    /// 发送一条命令，阻塞到完整应答
    ///
    /// # Errors
    /// - [`SessionError::Busy`]: 已有命令在途（在途命令不受影响）
    /// - [`SessionError::Timeout`]: 截止时间内未见停止标记；会话
    ///   回到空闲态，可以继续发送后续命令
    /// - [`SessionError::Protocol`]: 应答行损坏或载荷缺失
    /// - [`SessionError::ChannelClosed`]: IO 线程已退出
    pub fn send(&self, command: &Command) -> Result<Reply, SessionError> {
        // 单命令在途约束：拿不到许可直接报 Busy，不排队
        let _permit = self.permit.try_lock().ok_or(SessionError::Busy)?;

        let (reply_tx, reply_rx) = bounded(1);
        self.cmd_tx
            .send(CommandRequest {
                line: command.to_line(),
                opcode: command.opcode(),
                reply_tx,
            })
            .map_err(|_| SessionError::ChannelClosed)?;

        // 截止时间由 IO 线程执行；这里的余量只用于区分线程死亡
        let grace = self.config.command_timeout + Duration::from_secs(2);
        match reply_rx.recv_timeout(grace) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(SessionError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(SessionError::ChannelClosed),
        }
    }

    /// 进入静默段：guard 存活期间不打逐行日志
    pub fn quiet(&self) -> QuietGuard<'_> {
        self.quiet.store(true, Ordering::Relaxed);
        QuietGuard { session: self }
    }

    /// 当前是否处于静默段
    pub fn is_quiet(&self) -> bool {
        self.quiet.load(Ordering::Relaxed)
    }

    /// 会话配置
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // 关键：必须先真正 drop 掉 Sender，IO 线程才会观察到 Disconnected
        unsafe {
            ManuallyDrop::drop(&mut self.cmd_tx);
        }
        if let Some(handle) = self.io_thread.take()
            && handle.join().is_err()
        {
            error!("session IO thread panicked during shutdown");
        }
    }
}

/// 静默段 RAII guard：Drop 时恢复逐行日志
pub struct QuietGuard<'a> {
    session: &'a Session,
}

impl Drop for QuietGuard<'_> {
    fn drop(&mut self) {
        self.session.quiet.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delta_link::LinkError;
    use parking_lot::Mutex as PlMutex;
    use std::collections::VecDeque;
    use std::sync::Arc as StdArc;
    use std::time::Instant;

    /// 脚本化传输：每次 send_line 取出下一段应答行
    ///
    /// 与模拟器不同，这里可以让命令永远等不到 `ok`，用来验证
    /// 停止标记与超时语义。
    #[derive(Clone)]
    struct ScriptTransport {
        scripts: StdArc<PlMutex<VecDeque<Vec<String>>>>,
        lines: StdArc<PlMutex<VecDeque<String>>>,
        sent: StdArc<PlMutex<Vec<String>>>,
    }

    impl ScriptTransport {
        fn new(scripts: Vec<Vec<&str>>) -> Self {
            Self {
                scripts: StdArc::new(PlMutex::new(
                    scripts
                        .into_iter()
                        .map(|s| s.into_iter().map(String::from).collect())
                        .collect(),
                )),
                lines: StdArc::new(PlMutex::new(VecDeque::new())),
                sent: StdArc::new(PlMutex::new(Vec::new())),
            }
        }

        fn sent_lines(&self) -> Vec<String> {
            self.sent.lock().clone()
        }

        /// 模拟命令超时后才到达的迟到行
        fn inject_late(&self, lines: &[&str]) {
            self.lines.lock().extend(lines.iter().map(|s| s.to_string()));
        }
    }

    impl LineTransport for ScriptTransport {
        fn send_line(&mut self, line: &str) -> Result<(), LinkError> {
            self.sent.lock().push(line.to_string());
            if let Some(script) = self.scripts.lock().pop_front() {
                self.lines.lock().extend(script);
            }
            Ok(())
        }

        fn receive_line(&mut self, timeout: Duration) -> Result<String, LinkError> {
            let deadline = Instant::now() + timeout;
            loop {
                if let Some(line) = self.lines.lock().pop_front() {
                    return Ok(line);
                }
                if Instant::now() >= deadline {
                    return Err(LinkError::Timeout);
                }
                std::thread::sleep(Duration::from_micros(100));
            }
        }
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            command_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(5),
            idle_poll_interval: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_send_returns_ack_after_ok() {
        let transport = ScriptTransport::new(vec![vec!["echo:busy: processing", "ok"]]);
        let session = Session::with_config(transport.clone(), fast_config());
        let reply = session.send(&Command::home()).unwrap();
        assert_eq!(reply, Reply::Ack);
        assert_eq!(transport.sent_lines(), vec!["G28"]);
    }

    #[test]
    fn test_no_reply_before_stop_token() {
        // Bed 行已把载荷填满，但没有 ok：必须超时而不是提前返回
        let transport =
            ScriptTransport::new(vec![vec!["Bed X: 0.0 Y: 0.0 Z: 2.0"], vec!["ok"]]);
        let session = Session::with_config(transport, fast_config());

        let err = session.send(&Command::probe()).unwrap_err();
        assert!(matches!(err, SessionError::Timeout));

        // 超时之后会话回到空闲态，下一条命令正常工作
        let reply = session.send(&Command::home()).unwrap();
        assert_eq!(reply, Reply::Ack);
    }

    #[test]
    fn test_probe_reply_payload() {
        let transport = ScriptTransport::new(vec![vec![
            "echo:busy: processing",
            "Bed X: 0.00000 Y: 0.00000 Z: 2.00829",
            "X:0.00000 Y:0.00000 Z:25.60000 E:0.00000 Count x :7353 y :7353 z :7353",
            "ok",
        ]]);
        let session = Session::with_config(transport, fast_config());
        let reply = session.send(&Command::probe()).unwrap();
        assert_eq!(reply, Reply::ProbeResult { z: 2.00829 });
    }

    #[test]
    fn test_busy_rejects_second_send() {
        // 应答先扣住不发，让第一条命令保持在途
        let transport = ScriptTransport::new(vec![vec![]]);
        let session = StdArc::new(Session::with_config(
            transport.clone(),
            SessionConfig {
                command_timeout: Duration::from_secs(2),
                ..fast_config()
            },
        ));

        let worker = {
            let session = session.clone();
            std::thread::spawn(move || session.send(&Command::home()))
        };
        // 等命令真正写出，确认已在途
        while transport.sent_lines().is_empty() {
            std::thread::sleep(Duration::from_millis(1));
        }

        let err = session.send(&Command::position_query()).unwrap_err();
        assert!(matches!(err, SessionError::Busy));

        // 在途命令不受影响：补上 ok 之后正常完成
        transport.inject_late(&["ok"]);
        let reply = worker.join().unwrap().unwrap();
        assert_eq!(reply, Reply::Ack);
    }

    #[test]
    fn test_quiet_guard_restores_logging() {
        let transport = ScriptTransport::new(vec![]);
        let session = Session::with_config(transport, fast_config());
        assert!(!session.is_quiet());
        {
            let _guard = session.quiet();
            assert!(session.is_quiet());
        }
        assert!(!session.is_quiet());
    }

    #[test]
    fn test_stale_lines_do_not_leak_into_next_command() {
        // 第一条命令超时；它的迟到输出（含一个孤儿 ok）在空闲阶段
        // 被排掉，第二条命令拿到的是自己的应答而不是残留行
        let transport = ScriptTransport::new(vec![
            vec![],
            vec!["Bed X: 0.0 Y: 0.0 Z: 9.9", "ok"],
        ]);
        let session = Session::with_config(transport.clone(), fast_config());

        assert!(matches!(
            session.send(&Command::probe()).unwrap_err(),
            SessionError::Timeout
        ));

        // 超时之后才到达的孤儿输出
        transport.inject_late(&["Bed X: 0.0 Y: 0.0 Z: 1.1", "ok"]);
        std::thread::sleep(Duration::from_millis(50));

        let reply = session.send(&Command::probe()).unwrap();
        assert_eq!(reply, Reply::ProbeResult { z: 9.9 });
    }

    #[test]
    fn test_session_drop_joins_io_thread() {
        let transport = ScriptTransport::new(vec![]);
        let session = Session::with_config(transport, fast_config());
        drop(session);
    }
}
