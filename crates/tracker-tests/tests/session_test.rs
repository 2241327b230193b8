//! Malformed requests, inactivity timeouts and bridging through a full device

use pretty_assertions::assert_eq;
use tracker_core::hal::file_id;
use tracker_core::protocol::image_type;
use tracker_core::{DeviceState, ErrorCode, Request, Response, SessionState};
use tracker_tests::{payload, responses, Rig};

fn provisioning_rig() -> Rig {
    let mut rig = Rig::ready();
    assert!(rig.attach_host());
    rig
}

#[test]
fn test_wrong_size_request_gets_invalid_parameter() {
    let mut rig = provisioning_rig();

    let mut frame = Request::BatteryStatus.encode();
    frame.extend_from_slice(&[0, 0]);
    let sent = rig.push(&frame);

    assert_eq!(
        responses(&sent),
        vec![Response::generic(ErrorCode::InvalidParameter)]
    );
    assert_eq!(rig.device.session().state(), SessionState::Idle);
}

#[test]
fn test_unknown_command_and_bad_sync_are_dropped() {
    let mut rig = provisioning_rig();

    assert!(rig.push(&[0x7E, 0x7F]).is_empty());
    assert!(rig.push(&[0x00, 0x0E]).is_empty());

    let sent = rig.request(&Request::BatteryStatus);
    assert!(matches!(
        responses(&sent)[..],
        [Response::BatteryStatus {
            error_code: ErrorCode::NoError,
            charging: true,
            level: 100,
            ..
        }]
    ));
}

#[test]
fn test_inactivity_timeout_releases_buffers() {
    let mut rig = provisioning_rig();

    rig.request(&Request::CfgWrite { length: 9 });
    rig.push(&[0x00, 0x01, 0x01]);
    assert_eq!(rig.device.session().state(), SessionState::CfgWriteNext);

    rig.clock.advance(5001);
    rig.run(1);

    assert_eq!(rig.device.session().state(), SessionState::Idle);
    assert!(rig.device.session().pools_idle());
    assert_eq!(rig.state(), DeviceState::Provisioning);

    // The host can start over
    let sent = rig.request(&Request::CfgRead {
        tag: tracker_core::hal::config_store::tag::LOGGING_ENABLE,
    });
    assert_eq!(payload(&sent), vec![0x00, 0x01, 0x01]);
}

#[test]
fn test_inactivity_timeout_discards_partial_image() {
    let mut rig = provisioning_rig();

    rig.request(&Request::FwSendImage {
        image_type: image_type::ARTIC,
        length: 64,
        crc32: 0,
    });
    rig.push(&[0xAA; 16]);
    assert!(rig.fs.exists(file_id::ARTIC_FIRM_IMAGE));

    rig.clock.advance(5001);
    rig.run(1);

    assert_eq!(rig.device.session().state(), SessionState::Idle);
    assert!(!rig.fs.exists(file_id::ARTIC_FIRM_IMAGE));
    assert_eq!(rig.fs.open_handles(), 0);
}

#[test]
fn test_idle_session_never_times_out() {
    let mut rig = provisioning_rig();

    rig.clock.advance(60_000);
    rig.run(4);

    assert_eq!(rig.device.session().state(), SessionState::Idle);
    assert_eq!(responses(&rig.request(&Request::Status)).len(), 1);
}

#[test]
fn test_gps_bridge_round_trip() {
    let mut rig = provisioning_rig();

    let sent = rig.request(&Request::GpsWrite { length: 3 });
    assert_eq!(
        responses(&sent),
        vec![Response::generic(ErrorCode::BridgingDisabled)]
    );

    let sent = rig.request(&Request::GpsConfig { enable: true });
    assert_eq!(responses(&sent), vec![Response::generic(ErrorCode::NoError)]);

    rig.request(&Request::GpsWrite { length: 3 });
    rig.push(b"PMT");
    assert_eq!(rig.peripherals.state().gps_tx, b"PMT".to_vec());

    rig.peripherals.push_gps_rx(b"$GPGGA");
    let sent = rig.request(&Request::GpsRead { length: 64 });
    assert_eq!(
        Response::decode(&sent[0]).unwrap(),
        Response::GpsReadResp {
            error_code: ErrorCode::NoError,
            length: 6
        }
    );
    assert_eq!(payload(&sent), b"$GPGGA".to_vec());
}
