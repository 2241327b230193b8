//! Configuration write, read, save and restore over the protocol

use pretty_assertions::assert_eq;
use rstest::rstest;
use tracker_core::hal::config_store::tag;
use tracker_core::hal::ConfigStore;
use tracker_core::protocol::CFG_TAG_ALL;
use tracker_core::{ErrorCode, Request, Response};
use tracker_tests::{payload, responses, Rig};

/// LOGGING_ENABLE=1, BATTERY_LOG_ENABLE=1, BATTERY_LOW_THRESHOLD=25,
/// CELLULAR_ENABLE=0, in ascending tag order
const RECORDS: [u8; 12] = [
    0x00, 0x01, 0x01, //
    0x00, 0x0A, 0x01, //
    0x01, 0x0A, 0x19, //
    0x00, 0x0C, 0x00, //
];

fn provisioning_rig() -> Rig {
    let mut rig = Rig::unconfigured();
    assert!(rig.attach_host());
    rig
}

fn write_records(rig: &mut Rig, stream: &[u8], chunk: usize) -> Vec<Response> {
    let sent = rig.request(&Request::CfgWrite {
        length: stream.len() as u32,
    });
    assert_eq!(responses(&sent), vec![Response::generic(ErrorCode::NoError)]);

    stream
        .chunks(chunk)
        .flat_map(|part| responses(&rig.push(part)))
        .collect()
}

#[rstest]
#[case::byte_by_byte(1)]
#[case::pairs(2)]
#[case::straddling_records(5)]
#[case::whole_stream(RECORDS.len())]
fn test_cfg_write_independent_of_packet_split(#[case] chunk: usize) {
    let mut rig = provisioning_rig();

    let confirmations = write_records(&mut rig, &RECORDS, chunk);
    assert_eq!(
        confirmations,
        vec![Response::CfgWriteCnf {
            error_code: ErrorCode::NoError
        }]
    );

    let config = &rig.device.board().config;
    assert_eq!(config.get(tag::LOGGING_ENABLE).unwrap(), &[0x01]);
    assert_eq!(config.get(tag::BATTERY_LOG_ENABLE).unwrap(), &[0x01]);
    assert_eq!(config.get(tag::BATTERY_LOW_THRESHOLD).unwrap(), &[0x19]);
    assert_eq!(config.get(tag::CELLULAR_ENABLE).unwrap(), &[0x00]);
}

#[test]
fn test_cfg_read_all_returns_written_records() {
    let mut rig = provisioning_rig();
    write_records(&mut rig, &RECORDS, RECORDS.len());

    let sent = rig.request(&Request::CfgRead { tag: CFG_TAG_ALL });
    assert_eq!(
        Response::decode(&sent[0]).unwrap(),
        Response::CfgReadResp {
            error_code: ErrorCode::NoError,
            length: RECORDS.len() as u32
        }
    );
    assert_eq!(payload(&sent), RECORDS.to_vec());
}

#[test]
fn test_cfg_save_erase_restore() {
    let mut rig = provisioning_rig();
    write_records(&mut rig, &RECORDS[..3], 3);

    let sent = rig.request(&Request::CfgSave);
    assert_eq!(responses(&sent), vec![Response::generic(ErrorCode::NoError)]);

    rig.request(&Request::CfgErase { tag: CFG_TAG_ALL });
    let sent = rig.request(&Request::CfgRead {
        tag: tag::LOGGING_ENABLE,
    });
    assert_eq!(
        responses(&sent),
        vec![Response::CfgReadResp {
            error_code: ErrorCode::ConfigTagNotSet,
            length: 0
        }]
    );

    let sent = rig.request(&Request::CfgRestore);
    assert_eq!(responses(&sent), vec![Response::generic(ErrorCode::NoError)]);

    let sent = rig.request(&Request::CfgRead {
        tag: tag::LOGGING_ENABLE,
    });
    assert_eq!(payload(&sent), vec![0x00, 0x01, 0x01]);
}

#[test]
fn test_cfg_write_unknown_tag_rejected_then_recovers() {
    let mut rig = provisioning_rig();

    let confirmations = write_records(&mut rig, &[0x34, 0x12, 0x01], 3);
    assert_eq!(
        confirmations,
        vec![Response::CfgWriteCnf {
            error_code: ErrorCode::InvalidConfigTag
        }]
    );

    // The session is usable again straight away
    let confirmations = write_records(&mut rig, &RECORDS[..3], 3);
    assert_eq!(
        confirmations,
        vec![Response::CfgWriteCnf {
            error_code: ErrorCode::NoError
        }]
    );
}
