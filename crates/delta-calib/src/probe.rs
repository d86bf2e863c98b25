//! 多样本探测控制器
//!
//! 单点探测的物理序列照搬现场验证过的流程：
//!
//! 1. 抬到避让高度，移动到目标 (x, y)
//! 2. `G30` 取接触高度；只要 `M119` 仍报告探针限位触发，就按
//!    0.001 一步抬升再查——补偿机械回弹/沉降
//! 3. 记录最终高度，抬离 1 个单位再采下一样本（避免反复刮擦）
//! 4. 采满 `samples` 个后回到避让高度
//!
//! 代表高度 = IQR 截尾均值（见 `delta-tools::statistics`）。

use crate::config::CalibConfig;
use crate::CalibError;
use delta_gcode::Move;
use delta_session::Device;
use delta_session::device::PROBE_ENDSTOP;
use delta_tools::iqr_trimmed_mean;
use smallvec::SmallVec;
use tracing::{debug, info};

/// 单点样本缓冲（默认 7 个样本，栈上放得下）
type SampleBuffer = SmallVec<[f64; 8]>;

/// 探测控制器
pub struct ProbeController<'a> {
    device: &'a Device,
    config: &'a CalibConfig,
}

impl<'a> ProbeController<'a> {
    pub fn new(device: &'a Device, config: &'a CalibConfig) -> Self {
        Self { device, config }
    }

    /// 在 (x, y) 处做多样本探测，返回代表高度
    ///
    /// 采不满 `samples` 个样本（任何一步会话出错）整个探测失败；
    /// 错误原样上抛，不做盲目重试。
    pub fn probe(&self, x: f64, y: f64) -> Result<f64, CalibError> {
        info!("Probing at X{:.3} Y{:.3}", x, y);

        // 紧密命令循环会刷爆日志，探测期间整段静默
        let _quiet = self.device.quiet();

        self.device.rapid(&Move::height(self.config.safe_height))?;

        let mut samples = SampleBuffer::new();
        for _ in 0..self.config.samples {
            self.device.rapid(&Move::xy(x, y))?;
            samples.push(self.settled_sample()?);
        }

        self.device.rapid(&Move::height(self.config.safe_height))?;

        let z = iqr_trimmed_mean(&samples);
        info!("Probe result: {:.2}", z);
        Ok(z)
    }

    /// 单个样本：探测 + 回弹补偿 + 抬离
    fn settled_sample(&self) -> Result<f64, CalibError> {
        let mut z = self.device.probe_point()?;

        // 接触之后探针可能还压着限位：小步抬升直到松开
        while self.device.endstops()?.is_triggered(PROBE_ENDSTOP) {
            z += self.config.nudge_step;
            self.device.rapid(&Move::height(z))?;
        }
        debug!("    Sample: Z{:.2}", z);

        self.device.rapid(&Move::height(z + self.config.sample_lift))?;
        Ok(z)
    }
}
