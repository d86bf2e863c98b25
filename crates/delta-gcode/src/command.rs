//! 命令构建模块
//!
//! 固件只认识一小撮 G-code。[`Opcode`] 是这份白名单的封闭枚举，
//! 任何其它代码在构造期就被拒绝，绝不会写到串口上。
//!
//! 参数格式遵循固件惯例：轴字母紧跟数值，中间无空格（`X12.500000`）。
//! 运动类命令用 6 位小数，几何参数写入（M665/M666）用 3 位小数。

use crate::GcodeError;
use std::fmt;
use std::str::FromStr;

/// 固件支持的命令白名单
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// `G28` 归位（三塔同时回到限位开关）
    Home,
    /// `G00` 快速移动
    Rapid,
    /// `G30` 单点探测
    Probe,
    /// `G90` 绝对坐标模式
    AbsoluteMode,
    /// `M114` 位置查询
    PositionQuery,
    /// `M119` 限位开关状态查询
    EndstopQuery,
    /// `M500` 保存参数到 EEPROM
    SaveSettings,
    /// `M503` 机器参数回显
    SettingsDump,
    /// `M665` 写入 delta 几何（半径）
    SetRadius,
    /// `M666` 写入三塔限位偏移
    SetTowerOffsets,
}

impl Opcode {
    /// 全部支持的 opcode（固定顺序，用于诊断输出）
    pub const ALL: [Opcode; 10] = [
        Opcode::Home,
        Opcode::Rapid,
        Opcode::Probe,
        Opcode::AbsoluteMode,
        Opcode::PositionQuery,
        Opcode::EndstopQuery,
        Opcode::SaveSettings,
        Opcode::SettingsDump,
        Opcode::SetRadius,
        Opcode::SetTowerOffsets,
    ];

    /// 线上形式的命令代码
    pub fn code(&self) -> &'static str {
        match self {
            Opcode::Home => "G28",
            Opcode::Rapid => "G00",
            Opcode::Probe => "G30",
            Opcode::AbsoluteMode => "G90",
            Opcode::PositionQuery => "M114",
            Opcode::EndstopQuery => "M119",
            Opcode::SaveSettings => "M500",
            Opcode::SettingsDump => "M503",
            Opcode::SetRadius => "M665",
            Opcode::SetTowerOffsets => "M666",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Opcode {
    type Err = GcodeError;

    /// 白名单检查：未知代码返回 [`GcodeError::UnsupportedOpcode`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| op.code() == s)
            .ok_or_else(|| GcodeError::UnsupportedOpcode(s.to_string()))
    }
}

/// 一条待发送的命令：opcode + 有序字符串参数
///
/// 构造后不可变。序列化形式为 `OPCODE arg1 arg2 ...`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    opcode: Opcode,
    args: Vec<String>,
}

impl Command {
    /// 创建无参数命令
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            args: Vec::new(),
        }
    }

    /// 从字符串代码构造（构造期白名单检查）
    pub fn parse(code: &str) -> Result<Self, GcodeError> {
        Ok(Self::new(code.parse()?))
    }

    /// 追加一个已格式化的参数
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// 追加一个轴参数：字母紧跟数值，无空格
    fn axis(self, letter: char, value: f64, decimals: usize) -> Self {
        self.with_arg(format!("{}{:.*}", letter, decimals, value))
    }

    /// `G28`
    pub fn home() -> Self {
        Self::new(Opcode::Home)
    }

    /// `G90`
    pub fn absolute_mode() -> Self {
        Self::new(Opcode::AbsoluteMode)
    }

    /// `G30`
    pub fn probe() -> Self {
        Self::new(Opcode::Probe)
    }

    /// `M114`
    pub fn position_query() -> Self {
        Self::new(Opcode::PositionQuery)
    }

    /// `M119`
    pub fn endstop_query() -> Self {
        Self::new(Opcode::EndstopQuery)
    }

    /// `M500`
    pub fn save_settings() -> Self {
        Self::new(Opcode::SaveSettings)
    }

    /// `M503`
    pub fn settings_dump() -> Self {
        Self::new(Opcode::SettingsDump)
    }

    /// `G00`，只带给定的轴
    pub fn rapid(target: &Move) -> Self {
        let mut cmd = Self::new(Opcode::Rapid);
        if let Some(x) = target.x {
            cmd = cmd.axis('X', x, 6);
        }
        if let Some(y) = target.y {
            cmd = cmd.axis('Y', y, 6);
        }
        if let Some(z) = target.z {
            cmd = cmd.axis('Z', z, 6);
        }
        if let Some(f) = target.feedrate {
            cmd = cmd.axis('F', f, 6);
        }
        cmd
    }

    /// `M665 R<r>`
    pub fn set_radius(radius: f64) -> Self {
        Self::new(Opcode::SetRadius).axis('R', radius, 3)
    }

    /// `M666 X<x> Y<y> Z<z>`
    pub fn set_tower_offsets(offsets: [f64; 3]) -> Self {
        Self::new(Opcode::SetTowerOffsets)
            .axis('X', offsets[0], 3)
            .axis('Y', offsets[1], 3)
            .axis('Z', offsets[2], 3)
    }

    /// 命令的 opcode
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// 参数列表
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// 序列化为一条文本行（不含行结束符）
    pub fn to_line(&self) -> String {
        let mut line = String::from(self.opcode.code());
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// 快速移动的目标坐标（未给定的轴保持不动）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Move {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub feedrate: Option<f64>,
}

impl Move {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn x(mut self, x: f64) -> Self {
        self.x = Some(x);
        self
    }

    pub fn y(mut self, y: f64) -> Self {
        self.y = Some(y);
        self
    }

    pub fn z(mut self, z: f64) -> Self {
        self.z = Some(z);
        self
    }

    pub fn feedrate(mut self, feedrate: f64) -> Self {
        self.feedrate = Some(feedrate);
        self
    }

    /// 只移动到水平坐标 (x, y)
    pub fn xy(x: f64, y: f64) -> Self {
        Self::new().x(x).y(y)
    }

    /// 只移动到高度 z
    pub fn height(z: f64) -> Self {
        Self::new().z(z)
    }
}
