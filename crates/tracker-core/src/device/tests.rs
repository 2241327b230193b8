use pretty_assertions::assert_eq;

use super::*;
use crate::hal::config_store::tag;
use crate::hal::{Backend, ConfigStore, LedColour, LedPattern};
use crate::logging::record_id;
use crate::protocol::{test_flag, ErrorCode, Request, Response};
use crate::shared::TestState;
use crate::sim::{
    default_tags, encode_script, MemoryConfigStore, MemoryFsHandle, MockTransportHandle, SimBoard,
    SimPeripheralsHandle,
};

struct Rig {
    device: DeviceController,
    transport: MockTransportHandle,
    fs: MemoryFsHandle,
    peripherals: SimPeripheralsHandle,
    clock: crate::hal::ManualClock,
}

impl Rig {
    fn new(config: MemoryConfigStore) -> Self {
        let sim = SimBoard::new(config, 64 * 1024);
        Self {
            device: DeviceController::new(CoreSettings::default(), sim.board),
            transport: sim.transport,
            fs: sim.fs,
            peripherals: sim.peripherals,
            clock: sim.clock,
        }
    }

    /// Required tags set and a log file on storage
    fn ready(extra: &[(u16, u8)]) -> Self {
        let mut config = MemoryConfigStore::new(default_tags());
        config.set(tag::LOGGING_ENABLE, &[1]).unwrap();
        for (tag, value) in extra {
            config.set(*tag, &[*value]).unwrap();
        }
        let rig = Self::new(config);
        rig.fs.insert(file_id::LOG, Vec::new());
        rig
    }

    fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.device.tick();
        }
    }
}

#[test]
fn test_boot_without_configuration_needs_provisioning() {
    let mut rig = Rig::new(MemoryConfigStore::new(default_tags()));
    rig.run(2);

    assert_eq!(rig.device.state(), DeviceState::ProvisioningNeeded);
    assert!(matches!(
        rig.peripherals.led(),
        LedPattern::Blink {
            colour: LedColour::Red,
            ..
        }
    ));
}

#[test]
fn test_boot_ready_goes_operational_and_logs_startup() {
    let mut rig = Rig::ready(&[]);
    rig.peripherals.state().startup_cause = 0x11;
    rig.run(2);

    assert_eq!(rig.device.state(), DeviceState::Operational);
    assert!(rig.device.sensor_logging());
    assert_eq!(
        rig.fs.file(file_id::LOG).unwrap(),
        vec![record_id::STARTUP, 0x11, 0, 0, 0]
    );
}

#[test]
fn test_boot_failure_parks_in_error() {
    let mut rig = Rig::ready(&[]);
    rig.fs.set_fail_mount(true);
    rig.run(3);

    assert_eq!(rig.device.state(), DeviceState::Error);
    assert_eq!(
        rig.peripherals.led(),
        LedPattern::Blink {
            colour: LedColour::Red,
            period_ms: 100
        }
    );

    rig.peripherals.set_usb_plugged(true);
    rig.run(3);
    assert_eq!(rig.device.state(), DeviceState::Error);
}

#[test]
fn test_boot_removes_stale_application_image() {
    let mut rig = Rig::ready(&[]);
    rig.fs.insert(file_id::APP_FIRM_IMAGE, vec![1, 2, 3]);
    rig.run(1);

    assert!(!rig.fs.exists(file_id::APP_FIRM_IMAGE));
}

#[test]
fn test_external_power_starts_usb() {
    let mut rig = Rig::ready(&[]);
    rig.peripherals.set_usb_plugged(true);
    rig.run(2);

    assert_eq!(rig.device.state(), DeviceState::BatteryCharging);
    assert_eq!(rig.transport.backend(), Backend::Usb);
}

#[test]
fn test_usb_enumeration_timeout_stops_transport() {
    let mut rig = Rig::ready(&[]);
    rig.peripherals.set_usb_plugged(true);
    rig.run(2);

    rig.clock.advance(10_000);
    rig.run(1);

    assert_eq!(rig.device.state(), DeviceState::BatteryCharging);
    assert_eq!(rig.transport.backend(), Backend::None);
}

#[test]
fn test_unplug_while_charging_returns_operational() {
    let mut rig = Rig::ready(&[]);
    rig.peripherals.set_usb_plugged(true);
    rig.run(2);

    rig.peripherals.set_usb_plugged(false);
    rig.run(2);

    assert_eq!(rig.device.state(), DeviceState::Operational);
    assert_eq!(rig.transport.backend(), Backend::None);
}

#[test]
fn test_host_connect_enters_provisioning_and_serves_requests() {
    let mut rig = Rig::ready(&[]);
    rig.peripherals.set_usb_plugged(true);
    rig.run(2);

    rig.transport.connect(Backend::Usb);
    rig.run(2);
    assert_eq!(rig.device.state(), DeviceState::Provisioning);
    assert_eq!(rig.peripherals.led(), LedPattern::Solid(LedColour::Green));
    assert!(rig.peripherals.state().gps_awake);

    rig.transport.push_request(&Request::BatteryStatus);
    rig.run(4);
    let sent = rig.transport.take_sent();
    assert!(matches!(
        Response::decode(&sent[0]).unwrap(),
        Response::BatteryStatus { charging: true, .. }
    ));
}

#[test]
fn test_battery_low_outranks_charging() {
    let mut rig = Rig::ready(&[(tag::BATTERY_LOW_THRESHOLD, 20)]);
    rig.run(2);
    assert_eq!(rig.device.state(), DeviceState::Operational);

    rig.peripherals.set_usb_plugged(true);
    rig.peripherals.set_battery_level(Some(10));
    rig.run(1);
    assert_eq!(rig.device.state(), DeviceState::BatteryLevelLow);

    rig.run(2);
    assert_eq!(rig.device.state(), DeviceState::BatteryCharging);
}

#[test]
fn test_battery_read_failure_is_not_low() {
    let mut rig = Rig::ready(&[(tag::BATTERY_LOW_THRESHOLD, 20)]);
    rig.peripherals.set_battery_level(None);
    rig.run(4);

    assert_eq!(rig.device.state(), DeviceState::Operational);
}

#[test]
fn test_battery_decrease_is_logged() {
    let mut rig = Rig::ready(&[(tag::BATTERY_LOG_ENABLE, 1)]);
    rig.peripherals.set_battery_level(Some(80));
    rig.run(2);

    rig.peripherals.set_battery_level(Some(70));
    rig.run(1);
    rig.peripherals.set_battery_level(Some(75));
    rig.run(1);

    assert_eq!(
        rig.fs.file(file_id::LOG).unwrap(),
        vec![
            record_id::STARTUP,
            0,
            0,
            0,
            0,
            record_id::BATTERY,
            80,
            record_id::BATTERY,
            70
        ]
    );
}

#[test]
fn test_full_log_file_parks_device() {
    let mut rig = Rig::ready(&[(tag::BATTERY_LOG_ENABLE, 1)]);
    rig.fs.set_capacity(5);
    rig.run(3);

    assert_eq!(rig.device.state(), DeviceState::LogFileFull);
    assert_eq!(rig.fs.open_handles(), 0);
}

#[test]
fn test_command_script_replayed_then_removed() {
    let mut rig = Rig::new(MemoryConfigStore::new(default_tags()));
    rig.fs.insert(
        file_id::CONF_COMMANDS,
        encode_script(&[Request::CfgWrite { length: 3 }.encode(), vec![0x00, 0x01, 0x01]]),
    );

    rig.run(2);
    assert_eq!(rig.device.state(), DeviceState::Provisioning);

    rig.run(12);

    assert!(!rig.fs.exists(file_id::CONF_COMMANDS));
    assert_eq!(rig.device.board().config.get(tag::LOGGING_ENABLE).unwrap(), &[1]);
    // Logging enabled but no log file yet
    assert_eq!(rig.device.state(), DeviceState::ProvisioningNeeded);

    let responses: Vec<_> = rig
        .transport
        .take_sent()
        .iter()
        .filter_map(|p| Response::decode(p).ok())
        .collect();
    assert_eq!(
        responses,
        vec![
            Response::generic(ErrorCode::NoError),
            Response::CfgWriteCnf {
                error_code: ErrorCode::NoError
            }
        ]
    );
}

#[test]
fn test_reset_request_reboots_through_boot() {
    let mut rig = Rig::ready(&[]);
    rig.peripherals.set_usb_plugged(true);
    rig.run(2);
    rig.transport.connect(Backend::Usb);
    rig.run(2);

    rig.transport.push_request(&Request::Reset {
        reset_type: crate::protocol::reset_type::APP,
    });
    for _ in 0..4 {
        if rig.device.reboots() > 0 {
            break;
        }
        rig.run(1);
    }

    assert_eq!(rig.device.reboots(), 1);
    assert_eq!(rig.peripherals.state().resets, 1);
    assert_eq!(rig.device.state(), DeviceState::Boot);
    assert_eq!(
        Response::decode(&rig.transport.take_sent()[0]).unwrap(),
        Response::generic(ErrorCode::NoError)
    );

    rig.run(1);
    assert_eq!(rig.device.state(), DeviceState::BatteryCharging);
}

#[test]
fn test_gps_test_requested_during_provisioning_runs_in_operational() {
    let mut rig = Rig::ready(&[(tag::GPS_LOG_POSITION_ENABLE, 1)]);
    rig.peripherals.set_usb_plugged(true);
    rig.run(2);
    rig.transport.connect(Backend::Usb);
    rig.run(2);

    rig.transport.push_request(&Request::Test {
        device_flags: test_flag::GPS,
    });
    rig.run(4);
    assert_eq!(rig.device.shared().tests.gps, TestState::Request);

    rig.peripherals.set_usb_plugged(false);
    rig.transport.disconnect();
    rig.run(3);

    assert_eq!(rig.device.state(), DeviceState::Operational);
    assert_eq!(rig.device.shared().tests.gps, TestState::Active);
    assert!(rig.peripherals.state().gps_awake);
}

#[test]
fn test_visits_counted_per_entry() {
    let mut rig = Rig::ready(&[]);
    rig.run(3);

    assert_eq!(rig.device.visits().get(&DeviceState::Boot), Some(&1));
    assert_eq!(rig.device.visits().get(&DeviceState::Operational), Some(&1));
}
