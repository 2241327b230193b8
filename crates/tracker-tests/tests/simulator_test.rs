//! Scheduled runs through the simulator and its JSON report

use pretty_assertions::assert_eq;
use tracker_core::hal::config_store::tag;
use tracker_core::DeviceState;
use tracker_sim::config::TagConfig;
use tracker_sim::{ScheduledEvent, SimAction, SimConfig, Simulator};

fn event(at: u64, action: SimAction) -> ScheduledEvent {
    ScheduledEvent { at, action }
}

fn ready_config() -> SimConfig {
    let mut config = SimConfig::default();
    config.tags = vec![
        TagConfig {
            id: tag::LOGGING_ENABLE,
            size: 1,
            required: true,
            value: Some("01".into()),
        },
        TagConfig {
            id: tag::BATTERY_LOW_THRESHOLD,
            size: 1,
            required: false,
            value: None,
        },
    ];
    config.battery.low_threshold = Some(20);
    config.storage.log_file = true;
    config
}

#[test]
fn test_power_events_drive_modes() {
    let mut config = ready_config();
    config.events = vec![
        event(5, SimAction::Battery { level: Some(15) }),
        event(10, SimAction::Usb { plugged: true }),
        event(18, SimAction::Battery { level: Some(90) }),
        event(20, SimAction::Usb { plugged: false }),
    ];

    let mut sim = Simulator::new(&config).unwrap();
    sim.run(15);
    assert_eq!(sim.device().state(), DeviceState::BatteryCharging);

    sim.run(15);
    let report = sim.report();
    assert_eq!(report.final_state, DeviceState::Operational);
    assert_eq!(report.visits.get(&DeviceState::BatteryLevelLow), Some(&1));
    assert_eq!(report.visits.get(&DeviceState::BatteryCharging), Some(&1));
    assert_eq!(report.visits.get(&DeviceState::Operational), Some(&2));
}

#[test]
fn test_report_lists_host_traffic() {
    let mut config = ready_config();
    config.battery.usb_plugged = true;
    config.events = vec![
        event(3, SimAction::Connect),
        event(6, SimAction::Send {
            packet: "7E0E".into(),
        }),
        event(12, SimAction::Disconnect),
    ];

    let mut sim = Simulator::new(&config).unwrap();
    sim.run(20);

    let json = serde_json::to_value(sim.report()).unwrap();
    assert_eq!(json["final_state"], "battery_charging");
    assert_eq!(json["visits"]["provisioning"], 1);
    assert_eq!(json["sent"].as_array().map(Vec::len), Some(1));
    assert_eq!(json["sent"][0]["tick"], 6);
    assert!(json["sent"][0]["hex"].as_str().unwrap().starts_with("7e0f"));
}
