//! Runs the bundled configuration and script end to end

use std::path::PathBuf;

use pretty_assertions::assert_eq;
use tracker_core::hal::file_id;
use tracker_core::{DeviceState, ErrorCode, Response};
use tracker_sim::{ScriptConfig, SimConfig, Simulator};

fn config_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config").join(name)
}

#[test]
fn test_sample_config_provisions_then_runs() {
    let config = SimConfig::load(config_path("tracker-sim.toml")).unwrap();
    let mut sim = Simulator::new(&config).unwrap();
    sim.run(config.run.ticks);

    let report = sim.report();
    assert_eq!(report.final_state, DeviceState::Operational);
    assert_eq!(report.visits.get(&DeviceState::Provisioning), Some(&1));

    let responses: Vec<_> = report.sent.iter().filter_map(|p| p.response.clone()).collect();
    assert_eq!(
        responses,
        vec![
            Response::generic(ErrorCode::NoError),
            Response::CfgWriteCnf {
                error_code: ErrorCode::NoError
            },
            Response::generic(ErrorCode::NoError),
        ]
    );

    // Startup, battery at 80 then at 70
    assert_eq!(
        sim.fs().file(file_id::LOG).unwrap(),
        vec![0x01, 0, 0, 0, 0, 0x02, 80, 0x02, 70]
    );
}

#[test]
fn test_script_file_replayed_at_boot() {
    let mut config = SimConfig::default();
    config.script = Some(ScriptConfig::from_file(config_path("host-status.txt")).unwrap());

    let mut sim = Simulator::new(&config).unwrap();
    sim.run(20);

    let report = sim.report();
    assert!(!report.files.contains_key(&file_id::CONF_COMMANDS));
    assert_eq!(report.final_state, DeviceState::ProvisioningNeeded);
    assert!(matches!(report.sent[0].response, Some(Response::Status(_))));
    assert!(matches!(
        report.sent[1].response,
        Some(Response::BatteryStatus { .. })
    ));
}

#[test]
fn test_yaml_config_written_to_tempdir() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("low.yaml");
    std::fs::write(
        &path,
        "battery:\n  level: 5\n  low_threshold: 10\nstorage:\n  log_file: true\ntags:\n  - id: 256\n    required: true\n    value: \"01\"\n  - id: 2561\nrun:\n  ticks: 4\n",
    )
    .unwrap();

    let config = SimConfig::load_any(&path).unwrap();
    let mut sim = Simulator::new(&config).unwrap();
    sim.run(config.run.ticks);

    assert_eq!(sim.report().final_state, DeviceState::BatteryLevelLow);
}
