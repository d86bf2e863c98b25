//! 类型化设备操作
//!
//! [`Device`] 把标定流程需要的那几个固件操作包成强类型方法，每个
//! 方法都是一次 [`Session::send`] 加一次应答变体提取。标定引擎和
//! （未来的）交互式偏移调整界面都只走这一层，不直接碰会话。

use crate::session::{QuietGuard, Session};
use crate::{SessionConfig, SessionError};
use delta_gcode::{Command, EndstopStatus, MachineSettings, Move, Position, Reply};
use delta_link::LineTransport;
use tracing::{debug, info};

/// 探针触发的限位开关名（`M119` 回显里的键）
pub const PROBE_ENDSTOP: &str = "z_min";

/// 一台已连接的 MiniDelta
pub struct Device {
    session: Session,
}

impl Device {
    /// 接管传输并握手
    ///
    /// 与原固件工具链一致：连接后立即做一次 `M503` 参数回显，
    /// 兼作链路自检——拿不到回显说明线缆/固件没就绪。
    pub fn connect(transport: impl LineTransport + 'static) -> Result<Self, SessionError> {
        Self::connect_with_config(transport, SessionConfig::default())
    }

    /// 自定义会话配置的连接
    pub fn connect_with_config(
        transport: impl LineTransport + 'static,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let device = Self {
            session: Session::with_config(transport, config),
        };
        let settings = device.settings()?;
        info!(
            "connected; M665={:?} M666={:?}",
            settings.delta_radius(),
            settings.tower_offsets()
        );
        Ok(device)
    }

    /// 底层会话（交互式调整界面等低层用法）
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// 进入静默段（探测循环抑制逐行日志）
    pub fn quiet(&self) -> QuietGuard<'_> {
        self.session.quiet()
    }

    /// 归位：先切绝对坐标再 `G28`
    pub fn home(&self) -> Result<(), SessionError> {
        self.ack(&Command::absolute_mode())?;
        self.ack(&Command::home())
    }

    /// 快速移动（只动给定的轴）
    pub fn rapid(&self, target: &Move) -> Result<(), SessionError> {
        self.ack(&Command::rapid(target))
    }

    /// 单点探测，返回接触高度
    pub fn probe_point(&self) -> Result<f64, SessionError> {
        match self.session.send(&Command::probe())? {
            Reply::ProbeResult { z } => Ok(z),
            _ => Err(self.unexpected(&Command::probe())),
        }
    }

    /// 当前位置
    pub fn position(&self) -> Result<Position, SessionError> {
        match self.session.send(&Command::position_query())? {
            Reply::Position(position) => Ok(position),
            _ => Err(self.unexpected(&Command::position_query())),
        }
    }

    /// 限位开关状态
    pub fn endstops(&self) -> Result<EndstopStatus, SessionError> {
        match self.session.send(&Command::endstop_query())? {
            Reply::EndstopStatus(status) => Ok(status),
            _ => Err(self.unexpected(&Command::endstop_query())),
        }
    }

    /// 机器参数回显
    pub fn settings(&self) -> Result<MachineSettings, SessionError> {
        match self.session.send(&Command::settings_dump())? {
            Reply::MachineSettings(settings) => Ok(settings),
            _ => Err(self.unexpected(&Command::settings_dump())),
        }
    }

    /// 写入 delta 半径（`M665 R`），只改内存不落 EEPROM
    pub fn set_radius(&self, radius: f64) -> Result<(), SessionError> {
        debug!("applying M665 R{:.3}", radius);
        self.ack(&Command::set_radius(radius))
    }

    /// 写入三塔限位偏移（`M666`），只改内存不落 EEPROM
    pub fn set_tower_offsets(&self, offsets: [f64; 3]) -> Result<(), SessionError> {
        debug!(
            "applying M666 X{:.3} Y{:.3} Z{:.3}",
            offsets[0], offsets[1], offsets[2]
        );
        self.ack(&Command::set_tower_offsets(offsets))
    }

    /// 把当前参数固化到 EEPROM（`M500`）
    ///
    /// 标定引擎只在显式 commit 步骤调用；dry-run 绝不走到这里。
    pub fn save_settings(&self) -> Result<(), SessionError> {
        info!("saving settings to EEPROM");
        self.ack(&Command::save_settings())
    }

    fn ack(&self, command: &Command) -> Result<(), SessionError> {
        match self.session.send(command)? {
            Reply::Ack => Ok(()),
            _ => Err(self.unexpected(command)),
        }
    }

    fn unexpected(&self, command: &Command) -> SessionError {
        SessionError::UnexpectedReply {
            opcode: command.opcode(),
        }
    }
}
