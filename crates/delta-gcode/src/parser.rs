//! 应答行解析模块
//!
//! 固件对每条命令回零到多条信息行，最后一行是字面量 `ok`。
//! [`ReplyParser`] 按在途命令的 opcode 分发行解析规则，逐行累积
//! 结构化字段；没命中任何规则的行由调用方记日志后丢弃。
//!
//! 解析器自身不判断停止标记——那是会话层的职责（保证在观察到
//! `ok` 之前绝不产出 Reply）。这里只提供 [`ReplyParser::is_stop_token`]
//! 作为唯一的判定实现。

use crate::command::Opcode;
use crate::reply::{EndstopState, EndstopStatus, MachineSettings, Position, Reply};
use crate::GcodeError;
use std::collections::BTreeMap;

/// 每条应答的终止行
pub const STOP_TOKEN: &str = "ok";

/// `G30` 探测高度行前缀：`Bed X: 0.00000 Y: 0.00000 Z: 2.00829`
pub const BED_PREFIX: &str = "Bed";

/// `M503` 参数回显行前缀（注意两个空格）
pub const SETTINGS_ECHO_PREFIX: &str = "echo:  ";

/// `M114` 位置行里轴坐标与步进计数之间的分隔符
pub const COUNT_DELIMITER: &str = " Count ";

/// 在途命令的应答累积器
///
/// 每条命令新建一个实例，命令结束（返回或超时）后即丢弃，
/// 不存在跨命令的残留状态。
#[derive(Debug)]
pub struct ReplyParser {
    opcode: Opcode,
    probe_z: Option<f64>,
    position: Option<Position>,
    endstops: BTreeMap<String, EndstopState>,
    settings: BTreeMap<String, BTreeMap<char, f64>>,
}

impl ReplyParser {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            probe_z: None,
            position: None,
            endstops: BTreeMap::new(),
            settings: BTreeMap::new(),
        }
    }

    /// 该行是否为停止标记（行尾空白剔除后与 `ok` 完全相等）
    pub fn is_stop_token(line: &str) -> bool {
        line.trim() == STOP_TOKEN
    }

    /// 喂入一条信息行
    ///
    /// 返回 `Ok(true)` 表示按当前 opcode 的规则消费了该行，
    /// `Ok(false)` 表示规则未命中（调用方记日志后忽略）。
    /// 命中前缀但数值损坏时返回 [`GcodeError::MalformedLine`]。
    pub fn feed_line(&mut self, line: &str) -> Result<bool, GcodeError> {
        let line = line.trim_end_matches(['\r', '\n']);
        match self.opcode {
            Opcode::Probe => self.feed_bed_line(line),
            Opcode::PositionQuery => self.feed_position_line(line),
            Opcode::EndstopQuery => self.feed_endstop_line(line),
            Opcode::SettingsDump => self.feed_settings_line(line),
            // Ack 家族没有结构化载荷，所有信息行一律忽略
            _ => Ok(false),
        }
    }

    /// 完成累积，产出 Reply
    ///
    /// 只能在会话层观察到停止标记之后调用。对需要载荷的 opcode，
    /// 空累积是设备侧故障，报 [`GcodeError::IncompleteReply`]。
    pub fn finish(self) -> Result<Reply, GcodeError> {
        let opcode = self.opcode;
        match opcode {
            Opcode::Probe => self
                .probe_z
                .map(|z| Reply::ProbeResult { z })
                .ok_or(GcodeError::IncompleteReply { opcode }),
            Opcode::PositionQuery => self
                .position
                .map(Reply::Position)
                .ok_or(GcodeError::IncompleteReply { opcode }),
            Opcode::EndstopQuery => {
                if self.endstops.is_empty() {
                    return Err(GcodeError::IncompleteReply { opcode });
                }
                Ok(Reply::EndstopStatus(EndstopStatus {
                    stops: self.endstops,
                }))
            },
            Opcode::SettingsDump => {
                if self.settings.is_empty() {
                    return Err(GcodeError::IncompleteReply { opcode });
                }
                Ok(Reply::MachineSettings(MachineSettings {
                    groups: self.settings,
                }))
            },
            _ => Ok(Reply::Ack),
        }
    }

    /// `Bed X: 0.00000 Y: 0.00000 Z: 2.00829` → 最后一个冒号之后是接触高度
    fn feed_bed_line(&mut self, line: &str) -> Result<bool, GcodeError> {
        if !line.starts_with(BED_PREFIX) {
            return Ok(false);
        }
        let (_, tail) = line.rsplit_once(':').ok_or_else(|| malformed("Bed", line))?;
        let z: f64 = tail.trim().parse().map_err(|_| malformed("Bed", line))?;
        // 后到的 Bed 行覆盖先到的
        self.probe_z = Some(z);
        Ok(true)
    }

    /// `X:0.00000 Y:0.00000 Z:25.60000 E:0.00000 Count x :7353 ...`
    ///
    /// 轴坐标解析到 ` Count ` 为止，其后原样保留。
    fn feed_position_line(&mut self, line: &str) -> Result<bool, GcodeError> {
        if !starts_with_axis_pair(line) {
            return Ok(false);
        }
        let (head, counts) = match line.split_once(COUNT_DELIMITER) {
            Some((head, tail)) => (head, Some(tail.to_string())),
            None => (line, None),
        };
        let mut axes = BTreeMap::new();
        for pair in head.split_whitespace() {
            let (key, value) = pair.split_once(':').ok_or_else(|| malformed("position", line))?;
            let mut chars = key.chars();
            let letter = chars.next().ok_or_else(|| malformed("position", line))?;
            if chars.next().is_some() {
                return Err(malformed("position", line));
            }
            let value: f64 = value.parse().map_err(|_| malformed("position", line))?;
            axes.insert(letter, value);
        }
        self.position = Some(Position {
            axes,
            counts_raw: counts,
        });
        Ok(true)
    }

    /// `z_min: TRIGGERED` —— 恰好一个冒号的行
    fn feed_endstop_line(&mut self, line: &str) -> Result<bool, GcodeError> {
        if line.matches(':').count() != 1 {
            return Ok(false);
        }
        let (name, state) = line.split_once(':').ok_or_else(|| malformed("endstop", line))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(malformed("endstop", line));
        }
        self.endstops
            .insert(name.to_string(), EndstopState::parse(state.trim()));
        Ok(true)
    }

    /// `echo:  M665 L120.00 R62.85 ...` → 组名 + `字母数值` 记号
    fn feed_settings_line(&mut self, line: &str) -> Result<bool, GcodeError> {
        let Some(rest) = line.strip_prefix(SETTINGS_ECHO_PREFIX) else {
            return Ok(false);
        };
        // 只有组名没有参数的回显行合法（产生空组）
        let (group, values) = rest.split_once(' ').unwrap_or((rest, ""));
        let entry = self.settings.entry(group.to_string()).or_default();
        for token in values.split_whitespace() {
            let mut chars = token.chars();
            let letter = chars.next().ok_or_else(|| malformed("settings", line))?;
            let value: f64 = chars
                .as_str()
                .parse()
                .map_err(|_| malformed("settings", line))?;
            entry.insert(letter, value);
        }
        Ok(true)
    }
}

/// 行首是否为 `轴字母:` 形态（`X:...`）
fn starts_with_axis_pair(line: &str) -> bool {
    let mut chars = line.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(letter), Some(':')) if letter.is_ascii_uppercase()
    )
}

fn malformed(shape: &'static str, line: &str) -> GcodeError {
    GcodeError::MalformedLine {
        shape,
        line: line.to_string(),
    }
}
