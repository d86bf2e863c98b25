//! # MiniDelta Calibrator CLI
//!
//! 自动标定 MiniDelta 的限位偏移（M666）和 delta 半径（M665）：
//!
//! ```bash
//! # 完整标定并固化到 EEPROM
//! delta-cal --port /dev/ttyACM0
//!
//! # 试运行（不写 EEPROM）
//! delta-cal --dry-run
//!
//! # 审计一台已标定的机器
//! delta-cal --verification-only --report triangle.txt
//!
//! # 标定后扫一张床面高度图（绘图工具消费的 CSV）
//! delta-cal --bed-map bed.csv
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use delta_calib::{CalibConfig, CalibrationEngine, CalibrationOptions};
use delta_link::SerialLineTransport;
use delta_session::Device;
use std::fs::File;
use std::path::PathBuf;
use tracing::info;

/// MiniDelta 几何标定器
#[derive(Parser, Debug)]
#[command(name = "delta-cal")]
#[command(about = "Automatic endstop/radius calibration for MiniDelta printers", long_about = None)]
#[command(version)]
struct Cli {
    /// 串口路径
    #[arg(long, default_value = "/dev/ttyACM0")]
    port: String,

    /// 波特率
    #[arg(long, default_value_t = 115200)]
    baud: u32,

    /// 日志级别（ERROR / WARN / INFO / DEBUG）
    #[arg(long, default_value = "INFO")]
    loglevel: String,

    /// 不把结果写入打印机 EEPROM
    #[arg(long)]
    dry_run: bool,

    /// 只做一轮验证测量，检查现有标定
    #[arg(long)]
    verification_only: bool,

    /// 只做端点标定
    #[arg(long)]
    endpoint_calibration_only: bool,

    /// 只做半径标定
    #[arg(long)]
    radius_calibration_only: bool,

    /// 跳过端点标定
    #[arg(long)]
    skip_endpoint_calibration: bool,

    /// 跳过半径标定
    #[arg(long)]
    skip_radius_calibration: bool,

    /// 端点标定的迭代上限
    #[arg(long)]
    endpoint_iterations: Option<usize>,

    /// 半径标定的迭代上限
    #[arg(long)]
    radius_iterations: Option<usize>,

    /// 每个探测点的采样次数
    #[arg(long)]
    samples: Option<usize>,

    /// TOML 配置文件（容差 / 种子 / 增益等覆盖）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 验证报告输出文件（ASCII 三角图）
    #[arg(long)]
    report: Option<PathBuf>,

    /// 运行结束后扫描床面并写出 X,Y,Z CSV
    #[arg(long)]
    bed_map: Option<PathBuf>,

    /// 床面扫描的网格间距
    #[arg(long, default_value_t = 10.0)]
    bed_map_spacing: f64,
}

impl Cli {
    /// 配置文件 + 命令行旗标合并（旗标优先）
    fn calib_config(&self) -> Result<CalibConfig> {
        let mut config = match &self.config {
            Some(path) => CalibConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => CalibConfig::default(),
        };
        if let Some(samples) = self.samples {
            config.samples = samples;
        }
        if let Some(iterations) = self.endpoint_iterations {
            config.endpoint_iterations = iterations;
        }
        if let Some(iterations) = self.radius_iterations {
            config.radius_iterations = iterations;
        }
        Ok(config)
    }

    fn options(&self) -> CalibrationOptions {
        CalibrationOptions {
            dry_run: self.dry_run,
            verification_only: self.verification_only,
            endpoint_only: self.endpoint_calibration_only,
            radius_only: self.radius_calibration_only,
            skip_endpoint: self.skip_endpoint_calibration,
            skip_radius: self.skip_radius_calibration,
        }
    }
}

fn init_logging(loglevel: &str) {
    let level = match loglevel.to_ascii_uppercase().as_str() {
        "ERROR" => "error",
        "WARN" => "warn",
        "DEBUG" => "debug",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(level.parse().expect("static directive")),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.loglevel);

    let config = cli.calib_config()?;

    let transport = SerialLineTransport::open(&cli.port, cli.baud)
        .with_context(|| format!("opening serial port {}", cli.port))?;
    let device = Device::connect(transport).context("device handshake failed")?;

    let engine = CalibrationEngine::new(&device, config);
    let summary = engine.run(&cli.options())?;

    if let Some(report) = &summary.report {
        println!("{}", report);
        if let Some(path) = &cli.report {
            std::fs::write(path, format!("{}\n", report))
                .with_context(|| format!("writing report {}", path.display()))?;
            info!("report written to {}", path.display());
        }
    }

    if let Some(path) = &cli.bed_map {
        let map = engine.scan_bed(cli.bed_map_spacing)?;
        let mut file = File::create(path)
            .with_context(|| format!("creating bed map {}", path.display()))?;
        map.write_csv(&mut file)?;
        info!("bed map written to {} ({} points)", path.display(), map.len());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["delta-cal"]);
        assert_eq!(cli.port, "/dev/ttyACM0");
        assert_eq!(cli.baud, 115200);
        assert!(!cli.dry_run);
        let config = cli.calib_config().unwrap();
        assert_eq!(config.samples, 7);
    }

    #[test]
    fn test_cli_flag_overrides_config_default() {
        let cli = Cli::parse_from(["delta-cal", "--samples", "3", "--endpoint-iterations", "4"]);
        let config = cli.calib_config().unwrap();
        assert_eq!(config.samples, 3);
        assert_eq!(config.endpoint_iterations, 4);
        assert_eq!(config.radius_iterations, 10);
    }

    #[test]
    fn test_cli_options_mapping() {
        let cli = Cli::parse_from(["delta-cal", "--dry-run", "--skip-radius-calibration"]);
        let options = cli.options();
        assert!(options.dry_run);
        assert!(options.skip_radius);
        assert!(!options.verification_only);
    }
}
