//! Tests for the command-line interface
//!
//! These run the built binary, replaying recorded landmark fixtures so no
//! camera or detector models are needed.


use head_pose_broadcaster::{
    camera::CameraInfo,
    config::Config,
    provider::{Fixture, FixtureFace, FixtureFrame},
};
use nalgebra::Vector3;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;
use test_helpers::*;

fn run_binary(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_head-pose-broadcaster"))
        .args(args)
        .env("RUST_LOG", "error")
        .output()
        .expect("binary runs")
}

fn write_fixture(dir: &Path, frames: usize) -> String {
    let k = test_intrinsics();
    let truth = pose_from_angles(-15.0, 5.0, 0.0, Vector3::new(30.0, 0.0, 650.0));
    let landmarks = synthetic_raw_landmarks(&truth, &k).iter().map(|p| [p.x, p.y]).collect();
    let face = FixtureFace {
        bbox: None,
        score: 1.0,
        landmarks,
    };

    let fixture = Fixture {
        frames: (0..frames)
            .map(|i| FixtureFrame {
                width: 640,
                height: 480,
                stamp: i as f64 * 0.5,
                camera_info: Some(CameraInfo::from_intrinsics("camera", k.focal_length, k.cx, k.cy)),
                faces: vec![face.clone()],
            })
            .collect(),
    };

    let path = dir.join("fixture.yaml");
    fixture.to_file(&path).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn test_help_argument() {
    let output = run_binary(&["--help"]);
    assert!(output.status.success());

    let help = String::from_utf8_lossy(&output.stdout);
    for flag in ["--replay", "--mode", "--publish", "--focal-length", "--config"] {
        assert!(help.contains(flag), "help is missing {flag}");
    }
}

#[test]
fn test_print_config_is_loadable() {
    let output = run_binary(&["--print-config"]);
    assert!(output.status.success());

    let printed: Config = serde_yaml::from_slice(&output.stdout).unwrap();
    assert_eq!(printed, Config::default());
}

#[test]
fn test_replay_pose_report() {
    let dir = TempDir::new().unwrap();
    let fixture = write_fixture(dir.path(), 3);

    let output = run_binary(&["--replay", &fixture]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 3);
    for line in lines {
        let report: serde_yaml::Value = serde_yaml::from_str(line).unwrap();
        assert_angle_close(report["face_0"]["yaw"].as_f64().unwrap(), -15.0, 2.0, "yaw");
        assert_angle_close(report["face_0"]["pitch"].as_f64().unwrap(), 5.0, 2.0, "pitch");
        let z = report["face_0"]["z"].as_f64().unwrap();
        assert!((z - 650.0).abs() < 650.0 * 0.05, "z = {z}");
    }
}

#[test]
fn test_replay_landmark_report_with_frame_limit() {
    let dir = TempDir::new().unwrap();
    let fixture = write_fixture(dir.path(), 4);

    let output = run_binary(&["--replay", &fixture, "--mode", "landmarks", "--frames", "2"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 2);
    let report: serde_yaml::Value = serde_yaml::from_str(stdout.lines().next().unwrap()).unwrap();
    assert_eq!(report["face_0"].as_sequence().unwrap().len(), 69);
}

#[test]
fn test_invalid_mode_rejected() {
    let output = run_binary(&["--replay", "x.yaml", "--mode", "angles"]);
    assert!(!output.status.success());
}

#[test]
fn test_replay_conflicts_with_live_sources() {
    let output = run_binary(&["--replay", "x.yaml", "--camera", "0"]);
    assert!(!output.status.success());
}

#[test]
fn test_missing_fixture_fails() {
    let output = run_binary(&["--replay", "/nonexistent/fixture.yaml"]);
    assert!(!output.status.success());
}

#[test]
fn test_invalid_config_fails() {
    let dir = TempDir::new().unwrap();
    let fixture = write_fixture(dir.path(), 1);
    let config = dir.path().join("config.yaml");
    std::fs::write(&config, "publisher:\n  prefix: \"\"\n").unwrap();

    let output = run_binary(&["--config", config.to_str().unwrap(), "--replay", &fixture]);
    assert!(!output.status.success());
}
