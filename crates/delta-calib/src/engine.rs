//! 标定引擎
//!
//! 编排两个独立的收敛回路（先端点、后半径）和验证模式。每轮迭代：
//! 写入当前参数 → 归位 → 探测 → 状态机判定。迭代上限耗尽是警告
//! 性结果而不是错误——要不要用尽力而为的参数是调用方的事。
//!
//! EEPROM 固化只发生在显式的 commit 步骤，dry-run 永远不会触发
//! `M500`。

use crate::config::CalibConfig;
use crate::convergence::{EndpointLoop, LoopStep, RadiusLoop};
use crate::probe::ProbeController;
use crate::CalibError;
use delta_gcode::Move;
use delta_session::Device;
use delta_tools::report::{BedMap, EndpointReport};
use delta_tools::statistics::mean;
use std::f64::consts::PI;
use std::time::Instant;
use tracing::{error, info, warn};

/// 三塔方位角（弧度），按探测顺序排列，与 `M666 X/Y/Z` 下标一致
pub const TOWER_ANGLES: [f64; 3] = [
    PI / 2.0 + 2.0 * PI / 3.0,
    PI / 2.0 + 4.0 * PI / 3.0,
    PI / 2.0,
];

/// 床面扫描的网格外沿半径
const BED_SCAN_LIMIT: f64 = 55.0;

/// 一次运行要做哪些事（CLI 旗标的镜像）
#[derive(Debug, Clone, Copy, Default)]
pub struct CalibrationOptions {
    /// 不把结果固化进 EEPROM
    pub dry_run: bool,
    /// 只做验证测量，不做任何调整
    pub verification_only: bool,
    /// 只做端点标定
    pub endpoint_only: bool,
    /// 只做半径标定
    pub radius_only: bool,
    /// 跳过端点标定
    pub skip_endpoint: bool,
    /// 跳过半径标定
    pub skip_radius: bool,
}

/// 单个回路的结束方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopOutcome {
    /// 验证通过
    Converged { iterations: usize },
    /// 迭代上限耗尽（警告性结果，参数仍是最后一轮的尽力值）
    CapReached {
        iterations: usize,
        deviation: f64,
    },
}

impl LoopOutcome {
    pub fn converged(&self) -> bool {
        matches!(self, LoopOutcome::Converged { .. })
    }
}

/// 一次运行的汇总
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub endpoint: Option<LoopOutcome>,
    pub offsets: Option<[f64; 3]>,
    pub radius_outcome: Option<LoopOutcome>,
    pub radius: Option<f64>,
    /// 验证模式的测量报告
    pub report: Option<EndpointReport>,
}

/// 标定引擎
pub struct CalibrationEngine<'a> {
    device: &'a Device,
    config: CalibConfig,
}

impl<'a> CalibrationEngine<'a> {
    pub fn new(device: &'a Device, config: CalibConfig) -> Self {
        Self { device, config }
    }

    pub fn config(&self) -> &CalibConfig {
        &self.config
    }

    /// 第 `index` 塔的探测坐标
    fn tower_xy(&self, index: usize) -> (f64, f64) {
        let theta = TOWER_ANGLES[index];
        (
            theta.cos() * self.config.probe_radius,
            theta.sin() * self.config.probe_radius,
        )
    }

    /// 按固定顺序探测三塔（可选中心），结束后回到中心上方
    pub fn probe_endstops(&self, probe_center: bool) -> Result<EndpointReport, CalibError> {
        let probe = ProbeController::new(self.device, &self.config);

        let mut towers = [0.0; 3];
        for (index, tower) in towers.iter_mut().enumerate() {
            let (x, y) = self.tower_xy(index);
            *tower = probe.probe(x, y)?;
        }

        let center = if probe_center {
            Some(probe.probe(0.0, 0.0)?)
        } else {
            None
        };

        self.device.rapid(&Move::height(self.config.safe_height))?;
        self.device.rapid(&Move::xy(0.0, 0.0))?;

        Ok(EndpointReport::new(towers, center))
    }

    /// 端点偏移回路
    pub fn calibrate_endpoints(&self) -> Result<(LoopOutcome, [f64; 3]), CalibError> {
        info!(
            "Beginning endpoint calibration (max {} iterations, {} samples per point)",
            self.config.endpoint_iterations, self.config.samples
        );
        self.device.home()?;

        let mut state = EndpointLoop::new(self.config.endpoint_seed, self.config.endpoint_tolerance);
        let mut last_deviation = f64::MAX;

        for iteration in 0..self.config.endpoint_iterations {
            let offsets = state.offsets();
            info!(
                "    #{} - Trying M666 X{:.3} Y{:.3} Z{:.3}",
                iteration, offsets[0], offsets[1], offsets[2]
            );
            self.device.set_tower_offsets(offsets)?;
            self.device.home()?;

            let report = self.probe_endstops(false)?;
            last_deviation = report.tower_deviation();
            info!(
                "        E1={:.2}    E2={:.2}    E3={:.2}    DEVIATION={:.2}",
                report.towers[0], report.towers[1], report.towers[2], last_deviation
            );

            match state.observe(report.towers) {
                LoopStep::Converged => {
                    info!("        VERIFICATION COMPLETE!");
                    return Ok((
                        LoopOutcome::Converged {
                            iterations: state.iteration(),
                        },
                        state.offsets(),
                    ));
                },
                LoopStep::Verifying => info!("        BEGINNING VERIFICATION RUN"),
                LoopStep::Adjusted {
                    failed_verification: true,
                } => info!("        VERIFICATION FAILED - CONTINUING CALIBRATION"),
                LoopStep::Adjusted { .. } => {},
            }
        }

        warn!(
            "endpoint calibration hit the iteration cap ({}), deviation still {:.2}",
            self.config.endpoint_iterations, last_deviation
        );
        Ok((
            LoopOutcome::CapReached {
                iterations: state.iteration(),
                deviation: last_deviation,
            },
            state.offsets(),
        ))
    }

    /// 半径回路
    pub fn calibrate_radius(&self) -> Result<(LoopOutcome, f64), CalibError> {
        info!(
            "Beginning radius calibration (max {} iterations, {} samples per point)",
            self.config.radius_iterations, self.config.samples
        );
        self.device.home()?;

        let mut state = RadiusLoop::new(
            self.config.radius_seed,
            self.config.radius_gain,
            self.config.center_tolerance,
        );
        let mut last_deviation = f64::MAX;

        for iteration in 0..self.config.radius_iterations {
            info!("    #{} - Trying M665 R{:.3}", iteration, state.radius());
            self.device.set_radius(state.radius())?;
            self.device.home()?;

            let report = self.probe_endstops(true)?;
            let tower_mean = mean(&report.towers);
            let center = report.center.unwrap_or(tower_mean);
            last_deviation = report.center_deviation();
            info!("        DEVIATION={:.2}", last_deviation);

            match state.observe(tower_mean, center) {
                LoopStep::Converged => {
                    info!("        VERIFICATION COMPLETE!");
                    return Ok((
                        LoopOutcome::Converged {
                            iterations: state.iteration(),
                        },
                        state.radius(),
                    ));
                },
                LoopStep::Verifying => info!("        BEGINNING VERIFICATION RUN"),
                LoopStep::Adjusted {
                    failed_verification: true,
                } => info!("        VERIFICATION FAILED - CONTINUING CALIBRATION"),
                LoopStep::Adjusted { .. } => {},
            }
        }

        warn!(
            "radius calibration hit the iteration cap ({}), deviation still {:.2}",
            self.config.radius_iterations, last_deviation
        );
        Ok((
            LoopOutcome::CapReached {
                iterations: state.iteration(),
                deviation: last_deviation,
            },
            state.radius(),
        ))
    }

    /// 验证模式：单轮测量（三塔 + 中心），不做任何调整
    pub fn verify(&self) -> Result<EndpointReport, CalibError> {
        let settings = self.device.settings()?;
        info!("M665: R={:?}", settings.delta_radius());
        info!("M666: {:?}", settings.tower_offsets());

        self.device.home()?;
        let report = self.probe_endstops(true)?;

        info!("TOWER 1:            {:.2}", report.towers[0]);
        info!("TOWER 2:            {:.2}", report.towers[1]);
        info!("TOWER 3:            {:.2}", report.towers[2]);
        if let Some(center) = report.center {
            info!("CENTER:             {:.2}", center);
        }
        info!("FLATNESS DEVIATION: {:.2}mm", report.flatness_deviation());

        self.device.home()?;
        Ok(report)
    }

    /// 床面高度扫描：`spacing` 间距的网格，限制在外沿半径之内
    pub fn scan_bed(&self, spacing: f64) -> Result<BedMap, CalibError> {
        self.device.home()?;
        let probe = ProbeController::new(self.device, &self.config);

        let mut map = BedMap::new();
        let mut y = -self.config.probe_radius;
        while y <= self.config.probe_radius {
            let mut x = -self.config.probe_radius;
            while x <= self.config.probe_radius {
                if (x * x + y * y).sqrt() < BED_SCAN_LIMIT {
                    let z = probe.probe(x, y)?;
                    map.push(x, y, z);
                }
                x += spacing;
            }
            y += spacing;
        }

        self.device.home()?;
        info!("bed scan complete: {} points", map.len());
        Ok(map)
    }

    /// 完整运行（旗标驱动），失败时记录错误与耗时并尽力归位
    pub fn run(&self, options: &CalibrationOptions) -> Result<RunSummary, CalibError> {
        let start = Instant::now();
        let result = self.run_inner(options);
        match &result {
            Ok(_) => info!("Took {} seconds", start.elapsed().as_secs()),
            Err(e) => {
                error!(
                    "calibration run failed after {} seconds: {}",
                    start.elapsed().as_secs(),
                    e
                );
                // 退出前把机器带回已知物理状态
                if let Err(home_err) = self.device.home() {
                    error!("re-home after failure also failed: {}", home_err);
                }
            },
        }
        result
    }

    fn run_inner(&self, options: &CalibrationOptions) -> Result<RunSummary, CalibError> {
        let mut summary = RunSummary::default();
        let mut dirty = false;

        if options.verification_only {
            summary.report = Some(self.verify()?);
            return Ok(summary);
        }

        if (!options.skip_endpoint || options.endpoint_only) && !options.radius_only {
            let (outcome, offsets) = self.calibrate_endpoints()?;
            summary.endpoint = Some(outcome);
            summary.offsets = Some(offsets);
            dirty = true;
            if options.endpoint_only {
                self.commit(options.dry_run, dirty)?;
                self.device.home()?;
                return Ok(summary);
            }
        }

        if !options.skip_radius || options.radius_only {
            let (outcome, radius) = self.calibrate_radius()?;
            summary.radius_outcome = Some(outcome);
            summary.radius = Some(radius);
            dirty = true;
            if options.radius_only {
                self.commit(options.dry_run, dirty)?;
                self.device.home()?;
                return Ok(summary);
            }
        }

        self.commit(options.dry_run, dirty)?;
        self.device.home()?;
        Ok(summary)
    }

    /// 显式固化步骤：只有非 dry-run 且确有改动才写 EEPROM
    fn commit(&self, dry_run: bool, dirty: bool) -> Result<(), CalibError> {
        if dry_run {
            info!("Dry run - not saving settings");
            return Ok(());
        }
        if dirty {
            info!("Saving Settings");
            self.device.save_settings()?;
        } else {
            info!("Not Saving Settings");
        }
        Ok(())
    }
}
