//! MiniDelta 固件模拟器（测试专用）
//!
//! 消费与真机相同的命令行，按固件的行形态应答（`echo:busy:` 进度行、
//! `Bed` 探测行、`M114` 位置行、`M119` 限位行、`M503` 参数回显行），
//! 每行带固定传输延迟，让协议引擎和标定引擎可以脱离硬件完整跑通。
//!
//! 几何模型：床面接触高度由「固有塔偏差 + 已写入的 M666 偏移」与
//! 「固有平坦半径与已写入 M665 半径之差」共同决定，因此标定回路对
//! 模拟器做的修正会真实地收敛。
//!
//! 内部状态放在 `Arc<Mutex<..>>` 里、句柄可 Clone：把一个克隆交给
//! 会话的 IO 线程之后，测试侧仍能检查已写入的参数和 EEPROM 状态。

use crate::{LineTransport, LinkError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 三塔方位角（弧度），下标与 `M666 X/Y/Z` 参数、探测顺序一致
pub const TOWER_ANGLES: [f64; 3] = [
    PI / 2.0 + 2.0 * PI / 3.0, // X 塔（210°）
    PI / 2.0 + 4.0 * PI / 3.0, // Y 塔（330°）
    PI / 2.0,                  // Z 塔（90°）
];

/// 塔探测点所在的半径
const TOWER_RADIUS: f64 = 50.0;

/// 半径失配在中心高度上的投影系数
const RADIUS_SCALE: f64 = 0.5;

/// 归位后的有效高度
const HOME_HEIGHT: f64 = 120.0;

/// 模拟器配置
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// 各塔的固有限位偏差（标定要消除的量）
    pub tower_error: [f64; 3],
    /// 机器真实的平坦半径（M665 写入该值时中心与塔齐平）
    pub flat_radius: f64,
    /// 理想接触高度基准
    pub bed_height: f64,
    /// 每次 G30 之后，M119 连续回报 `z_min: TRIGGERED` 的次数
    pub endstop_bounce: u32,
    /// 每行应答的固定传输延迟
    pub line_delay: Duration,
    /// 依次叠加在探测高度上的脚本化噪声（耗尽后为 0）
    pub noise: Vec<f64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tower_error: [0.0; 3],
            flat_radius: 62.850,
            bed_height: 2.0,
            endstop_bounce: 0,
            line_delay: Duration::from_millis(1),
            noise: Vec::new(),
        }
    }
}

struct SimState {
    config: SimConfig,
    /// 已写入的 M666 偏移
    offsets: [f64; 3],
    /// 已写入的 M665 半径
    radius: f64,
    /// 当前逻辑位置
    x: f64,
    y: f64,
    z: f64,
    /// 剩余的限位回弹次数
    bounce_left: u32,
    /// 已执行的 G30 次数（兼作噪声序列下标）
    probe_count: usize,
    /// M500 是否被执行过
    eeprom_saved: bool,
    /// 不完整的入站命令字节
    inbox: String,
    /// 已排期的应答行
    outbox: VecDeque<(Instant, String)>,
}

impl SimState {
    /// 当前 (x, y) 处的探针接触高度
    fn contact_height(&self, x: f64, y: f64) -> f64 {
        let d = (x * x + y * y).sqrt();
        let t = (d / TOWER_RADIUS).min(1.0);
        let theta = y.atan2(x);

        // 方位角插值权重：塔点处恰为该塔，中心处三塔均分
        let mut cones = [0.0f64; 3];
        for (w, angle) in cones.iter_mut().zip(TOWER_ANGLES) {
            *w = (theta - angle).cos().max(0.0);
        }
        let total: f64 = cones.iter().sum();

        let mut height = self.config.bed_height;
        for (i, cone) in cones.iter().enumerate() {
            let directional = if total > 0.0 { cone / total } else { 1.0 / 3.0 };
            let weight = t * directional + (1.0 - t) / 3.0;
            height -= weight * (self.offsets[i] + self.config.tower_error[i]);
        }

        // 半径失配只在远离塔点的区域显现，中心处最大
        height + (self.radius - self.config.flat_radius) * RADIUS_SCALE * (1.0 - t)
    }

    fn respond(&mut self, lines: &[String]) {
        let mut at = Instant::now();
        for line in lines {
            at += self.config.line_delay;
            self.outbox.push_back((at, line.clone()));
        }
    }

    fn handle_command(&mut self, line: &str) {
        let line = line.trim();
        let mut parts = line.split_whitespace();
        let code = parts.next().unwrap_or("");
        let args: Vec<&str> = parts.collect();

        let busy = "echo:busy: processing".to_string();
        match code {
            "G00" => {
                for arg in &args {
                    let (axis, value) = arg.split_at(1);
                    if let Ok(value) = value.parse::<f64>() {
                        match axis {
                            "X" => self.x = value,
                            "Y" => self.y = value,
                            "Z" => self.z = value,
                            _ => {},
                        }
                    }
                }
                self.respond(&[busy, "ok".to_string()]);
            },
            "G28" => {
                self.x = 0.0;
                self.y = 0.0;
                self.z = HOME_HEIGHT;
                self.respond(&[busy.clone(), busy, "ok".to_string()]);
            },
            "G30" => {
                let noise = self
                    .config
                    .noise
                    .get(self.probe_count)
                    .copied()
                    .unwrap_or(0.0);
                let z = self.contact_height(self.x, self.y) + noise;
                self.probe_count += 1;
                self.bounce_left = self.config.endstop_bounce;
                self.z = z;
                self.respond(&[
                    busy.clone(),
                    busy.clone(),
                    busy.clone(),
                    busy,
                    format!("Bed X: {:.5} Y: {:.5} Z: {:.5}", self.x, self.y, z),
                    format!(
                        "X:{:.5} Y:{:.5} Z:{:.5} E:0.00000 Count x :7353 y :7353 z :7353",
                        self.x, self.y, self.z
                    ),
                    "ok".to_string(),
                ]);
            },
            "G90" => self.respond(&["ok".to_string()]),
            "M114" => {
                self.respond(&[
                    format!(
                        "X:{:.5} Y:{:.5} Z:{:.5} E:0.00000 Count x :7353 y :7353 z :7353",
                        self.x, self.y, self.z
                    ),
                    "ok".to_string(),
                ]);
            },
            "M119" => {
                let z_min = if self.bounce_left > 0 {
                    self.bounce_left -= 1;
                    "TRIGGERED"
                } else {
                    "open"
                };
                self.respond(&[
                    "x_stop: open".to_string(),
                    "y_stop: open".to_string(),
                    "z_stop: open".to_string(),
                    format!("z_min: {}", z_min),
                    "ok".to_string(),
                ]);
            },
            "M500" => {
                self.eeprom_saved = true;
                self.respond(&["ok".to_string()]);
            },
            "M503" => {
                self.respond(&[
                    format!("echo:  M665 L120.80 R{:.2} H{:.2}", self.radius, HOME_HEIGHT),
                    format!(
                        "echo:  M666 X{:.2} Y{:.2} Z{:.2}",
                        self.offsets[0], self.offsets[1], self.offsets[2]
                    ),
                    "ok".to_string(),
                ]);
            },
            "M665" => {
                for arg in &args {
                    if let Some(r) = arg.strip_prefix('R')
                        && let Ok(r) = r.parse::<f64>()
                    {
                        self.radius = r;
                    }
                }
                self.respond(&["ok".to_string()]);
            },
            "M666" => {
                for arg in &args {
                    let (axis, value) = arg.split_at(1);
                    if let Ok(value) = value.parse::<f64>() {
                        match axis {
                            "X" => self.offsets[0] = value,
                            "Y" => self.offsets[1] = value,
                            "Z" => self.offsets[2] = value,
                            _ => {},
                        }
                    }
                }
                self.respond(&["ok".to_string()]);
            },
            _ => {
                self.respond(&[
                    format!("echo:Unknown command: \"{}\"", line),
                    "ok".to_string(),
                ]);
            },
        }
    }
}

/// 模拟的 MiniDelta 设备
///
/// 克隆共享同一份内部状态：一个克隆作为传输交给会话，另一个留在
/// 测试里做断言。
#[derive(Clone)]
pub struct SimulatedDelta {
    inner: Arc<Mutex<SimState>>,
}

impl SimulatedDelta {
    pub fn new(config: SimConfig) -> Self {
        let radius = config.flat_radius;
        Self {
            inner: Arc::new(Mutex::new(SimState {
                config,
                offsets: [0.0; 3],
                radius,
                x: 0.0,
                y: 0.0,
                z: HOME_HEIGHT,
                bounce_left: 0,
                probe_count: 0,
                eeprom_saved: false,
                inbox: String::new(),
                outbox: VecDeque::new(),
            })),
        }
    }

    /// 理想机器：无塔偏差、半径正确
    pub fn flat() -> Self {
        Self::new(SimConfig::default())
    }

    /// 当前生效的 M666 偏移
    pub fn applied_offsets(&self) -> [f64; 3] {
        self.inner.lock().offsets
    }

    /// 当前生效的 M665 半径
    pub fn applied_radius(&self) -> f64 {
        self.inner.lock().radius
    }

    /// M500 是否被执行过
    pub fn eeprom_saved(&self) -> bool {
        self.inner.lock().eeprom_saved
    }

    /// 已执行的 G30 总数
    pub fn probe_count(&self) -> usize {
        self.inner.lock().probe_count
    }

    /// 直接读取某点的接触高度（测试断言用，不产生协议流量）
    pub fn height_at(&self, x: f64, y: f64) -> f64 {
        self.inner.lock().contact_height(x, y)
    }
}

impl LineTransport for SimulatedDelta {
    fn send_line(&mut self, line: &str) -> Result<(), LinkError> {
        let mut state = self.inner.lock();
        state.inbox.push_str(line);
        state.inbox.push('\n');
        while let Some(pos) = state.inbox.find('\n') {
            let command: String = state.inbox.drain(..=pos).collect();
            state.handle_command(&command);
        }
        Ok(())
    }

    fn receive_line(&mut self, timeout: Duration) -> Result<String, LinkError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.inner.lock();
                let ready = matches!(
                    state.outbox.front(),
                    Some((ready_at, _)) if Instant::now() >= *ready_at
                );
                if ready && let Some((_, line)) = state.outbox.pop_front() {
                    return Ok(line);
                }
            }
            if Instant::now() >= deadline {
                return Err(LinkError::Timeout);
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }
}
