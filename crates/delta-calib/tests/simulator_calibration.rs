//! 端到端标定测试：完整协议栈 + 固件模拟器
//!
//! 模拟器的几何模型保证 M666/M665 写入会真实改变探测高度，
//! 所以这里验证的是回路的物理收敛，而不只是状态机算术。

use delta_calib::{CalibConfig, CalibrationEngine, CalibrationOptions, ProbeController};
use delta_link::sim::{SimConfig, SimulatedDelta};
use delta_session::{Device, SessionConfig};
use std::time::Duration;

fn fast_session() -> SessionConfig {
    SessionConfig {
        command_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(2),
        idle_poll_interval: Duration::from_millis(1),
    }
}

fn fast_sim(config: SimConfig) -> SimulatedDelta {
    SimulatedDelta::new(SimConfig {
        line_delay: Duration::from_micros(200),
        ..config
    })
}

fn fast_calib() -> CalibConfig {
    CalibConfig {
        samples: 3,
        ..CalibConfig::default()
    }
}

fn connect(sim: &SimulatedDelta) -> Device {
    Device::connect_with_config(sim.clone(), fast_session()).expect("simulator handshake")
}

#[test]
fn endpoint_loop_converges_on_skewed_towers() {
    let sim = fast_sim(SimConfig {
        tower_error: [0.3, -0.2, 0.1],
        ..SimConfig::default()
    });
    let device = connect(&sim);
    let engine = CalibrationEngine::new(&device, fast_calib());

    let (outcome, offsets) = engine.calibrate_endpoints().unwrap();
    assert!(outcome.converged(), "outcome: {:?}", outcome);

    // 收敛后的偏移已写入设备（线上格式是 3 位小数）
    for (applied, computed) in sim.applied_offsets().iter().zip(offsets) {
        assert!((applied - computed).abs() < 1e-3);
    }

    // 三塔物理高度确实被拉平到容差内
    let heights: Vec<f64> = (0..3)
        .map(|i| {
            let theta = delta_calib::engine::TOWER_ANGLES[i];
            sim.height_at(theta.cos() * 50.0, theta.sin() * 50.0)
        })
        .collect();
    let deviation = heights.iter().cloned().fold(f64::MIN, f64::max)
        - heights.iter().cloned().fold(f64::MAX, f64::min);
    assert!(deviation <= 0.05 + 1e-9, "deviation {} too large", deviation);
}

#[test]
fn radius_loop_converges_on_mismatched_radius() {
    let sim = fast_sim(SimConfig {
        flat_radius: 62.5,
        ..SimConfig::default()
    });
    let device = connect(&sim);
    let engine = CalibrationEngine::new(&device, fast_calib());

    let (outcome, radius) = engine.calibrate_radius().unwrap();
    assert!(outcome.converged(), "outcome: {:?}", outcome);
    assert!((sim.applied_radius() - radius).abs() < 1e-3);

    // 容差 0.05、投影系数 0.5 → 收敛半径离真实平坦半径不超过 0.1
    assert!(
        (radius - 62.5).abs() <= 0.1 + 1e-9,
        "converged radius {} too far from 62.5",
        radius
    );
}

#[test]
fn dry_run_never_touches_eeprom() {
    let sim = fast_sim(SimConfig::default());
    let device = connect(&sim);
    let engine = CalibrationEngine::new(&device, fast_calib());

    let options = CalibrationOptions {
        dry_run: true,
        ..CalibrationOptions::default()
    };
    let summary = engine.run(&options).unwrap();
    assert!(summary.endpoint.unwrap().converged());
    assert!(summary.radius_outcome.unwrap().converged());
    assert!(!sim.eeprom_saved(), "dry run must not persist settings");
}

#[test]
fn committed_run_saves_settings() {
    let sim = fast_sim(SimConfig::default());
    let device = connect(&sim);
    let engine = CalibrationEngine::new(&device, fast_calib());

    engine.run(&CalibrationOptions::default()).unwrap();
    assert!(sim.eeprom_saved());
}

#[test]
fn verification_only_leaves_machine_untouched() {
    let sim = fast_sim(SimConfig::default());
    let device = connect(&sim);
    let engine = CalibrationEngine::new(&device, fast_calib());

    let options = CalibrationOptions {
        verification_only: true,
        ..CalibrationOptions::default()
    };
    let summary = engine.run(&options).unwrap();

    let report = summary.report.expect("verification produces a report");
    assert!(report.center.is_some());
    assert!(report.flatness_deviation() <= 0.01);

    // 没有任何参数写入、没有固化
    assert_eq!(sim.applied_offsets(), [0.0; 3]);
    assert_eq!(sim.applied_radius(), 62.850);
    assert!(!sim.eeprom_saved());
}

#[test]
fn endstop_bounce_forces_incremental_nudges() {
    let sim = fast_sim(SimConfig {
        endstop_bounce: 2,
        ..SimConfig::default()
    });
    let device = connect(&sim);
    let config = fast_calib();
    let probe = ProbeController::new(&device, &config);

    device.home().unwrap();
    let z = probe.probe(0.0, 0.0).unwrap();

    // 每个样本在接受之前被迫抬升 2 × 0.001
    assert!(z > 2.0, "nudge did not happen: {}", z);
    assert!((z - 2.002).abs() < 1e-9, "unexpected settled height: {}", z);
}

#[test]
fn iteration_cap_is_reported_not_fatal() {
    let sim = fast_sim(SimConfig {
        tower_error: [1.0, -1.0, 0.5],
        ..SimConfig::default()
    });
    let device = connect(&sim);
    let engine = CalibrationEngine::new(
        &device,
        CalibConfig {
            samples: 3,
            endpoint_iterations: 1,
            ..CalibConfig::default()
        },
    );

    let (outcome, _offsets) = engine.calibrate_endpoints().unwrap();
    match outcome {
        delta_calib::LoopOutcome::CapReached {
            iterations,
            deviation,
        } => {
            assert_eq!(iterations, 1);
            assert!(deviation > 0.05);
        },
        other => panic!("expected CapReached, got {:?}", other),
    }
}

#[test]
fn bed_scan_covers_grid_inside_rim() {
    let sim = fast_sim(SimConfig::default());
    let device = connect(&sim);
    let engine = CalibrationEngine::new(
        &device,
        CalibConfig {
            samples: 1,
            ..CalibConfig::default()
        },
    );

    let map = engine.scan_bed(25.0).unwrap();
    // 25mm 网格、55mm 外沿 → 13 个点
    assert_eq!(map.len(), 13);
    assert!(map.points.iter().all(|p| (p.z - 2.0).abs() < 0.01));

    let csv = map.to_csv_string();
    assert!(csv.starts_with("X,Y,Z\n"));
    assert_eq!(csv.lines().count(), 14);
}
