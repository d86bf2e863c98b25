//! 应答数据类型
//!
//! 每个 opcode 家族对应一个强类型变体，替代原先松散的字典形状。
//! 变体由 [`crate::parser::ReplyParser`] 在收到停止标记后产出。

use std::collections::BTreeMap;

/// 一条命令的完整应答
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `G30`：探针触发时的接触高度
    ProbeResult { z: f64 },
    /// `M114`：当前位置
    Position(Position),
    /// `M119`：限位开关状态
    EndstopStatus(EndstopStatus),
    /// `M503`：机器参数回显
    MachineSettings(MachineSettings),
    /// 无结构化载荷的命令（G00/G28/G90/M500/M665/M666）
    Ack,
}

/// `M114` 的位置应答
///
/// 轴坐标解析到 ` Count ` 分隔符为止；其后的步进计数没有任何
/// 消费者，保留原始文本即可。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Position {
    /// 轴字母 → 坐标值
    pub axes: BTreeMap<char, f64>,
    /// ` Count ` 之后的原始步进计数段
    pub counts_raw: Option<String>,
}

impl Position {
    pub fn axis(&self, letter: char) -> Option<f64> {
        self.axes.get(&letter).copied()
    }

    /// Z 轴高度（标定流程里用得最多）
    pub fn z(&self) -> Option<f64> {
        self.axis('Z')
    }
}

/// 单个限位开关的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndstopState {
    Open,
    Triggered,
}

impl EndstopState {
    /// 固件回显 `TRIGGERED`（区分大小写），其余一律视为打开
    pub fn parse(raw: &str) -> Self {
        if raw == "TRIGGERED" {
            EndstopState::Triggered
        } else {
            EndstopState::Open
        }
    }
}

/// `M119` 的限位开关状态集合
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndstopStatus {
    /// 开关名（如 `z_min`、`x_stop`）→ 状态
    pub stops: BTreeMap<String, EndstopState>,
}

impl EndstopStatus {
    pub fn get(&self, name: &str) -> Option<EndstopState> {
        self.stops.get(name).copied()
    }

    pub fn is_triggered(&self, name: &str) -> bool {
        self.get(name) == Some(EndstopState::Triggered)
    }
}

/// `M503` 的机器参数回显
///
/// 组名（如 `M665`）→ 参数字母 → 数值。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MachineSettings {
    pub groups: BTreeMap<String, BTreeMap<char, f64>>,
}

impl MachineSettings {
    pub fn value(&self, group: &str, letter: char) -> Option<f64> {
        self.groups.get(group).and_then(|g| g.get(&letter)).copied()
    }

    /// 当前三塔限位偏移（`M666` 组）
    pub fn tower_offsets(&self) -> Option<[f64; 3]> {
        Some([
            self.value("M666", 'X')?,
            self.value("M666", 'Y')?,
            self.value("M666", 'Z')?,
        ])
    }

    /// 当前 delta 半径（`M665` 组的 `R`）
    pub fn delta_radius(&self) -> Option<f64> {
        self.value("M665", 'R')
    }
}
