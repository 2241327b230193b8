//! Outbound response packets

use bytes::{Buf, BufMut};
use serde::Serialize;

use super::{check_size, command, split_header, DecodeError, ErrorCode, SYNC};

/// Device status snapshot carried by STATUS_RESP
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub error_code: ErrorCode,
    pub firmware_version: u32,
    pub ble_firmware_version: u32,
    pub configuration_format_version: u32,
    pub device_uid: u64,
    pub gps_detected: bool,
    pub cellular_detected: bool,
    pub sim_present: bool,
    pub sim_imsi: [u8; 16],
    pub satellite_detected: bool,
}

impl StatusReport {
    const SIZE: usize = 1 + 4 + 4 + 4 + 8 + 1 + 1 + 1 + 16 + 1;
}

/// A response packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Generic { error_code: ErrorCode },
    CfgReadResp { error_code: ErrorCode, length: u32 },
    CfgWriteCnf { error_code: ErrorCode },
    GpsReadResp { error_code: ErrorCode, length: u32 },
    Status(StatusReport),
    FwSendImageCompleteCnf { error_code: ErrorCode },
    BatteryStatus {
        error_code: ErrorCode,
        charging: bool,
        level: u8,
        millivolts: u16,
    },
    LogReadResp { error_code: ErrorCode, length: u32 },
    CellularReadResp { error_code: ErrorCode, length: u32 },
    FlashDownloadResp { error_code: ErrorCode, length: u32 },
}

impl Response {
    pub fn generic(error_code: ErrorCode) -> Self {
        Self::Generic { error_code }
    }

    pub fn command(&self) -> u8 {
        match self {
            Self::Generic { .. } => command::GENERIC_RESP,
            Self::CfgReadResp { .. } => command::CFG_READ_RESP,
            Self::CfgWriteCnf { .. } => command::CFG_WRITE_CNF,
            Self::GpsReadResp { .. } => command::GPS_READ_RESP,
            Self::Status(_) => command::STATUS_RESP,
            Self::FwSendImageCompleteCnf { .. } => command::FW_SEND_IMAGE_COMPLETE_CNF,
            Self::BatteryStatus { .. } => command::BATTERY_STATUS_RESP,
            Self::LogReadResp { .. } => command::LOG_READ_RESP,
            Self::CellularReadResp { .. } => command::CELLULAR_READ_RESP,
            Self::FlashDownloadResp { .. } => command::FLASH_DOWNLOAD_RESP,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Generic { error_code }
            | Self::CfgReadResp { error_code, .. }
            | Self::CfgWriteCnf { error_code }
            | Self::GpsReadResp { error_code, .. }
            | Self::FwSendImageCompleteCnf { error_code }
            | Self::BatteryStatus { error_code, .. }
            | Self::LogReadResp { error_code, .. }
            | Self::CellularReadResp { error_code, .. }
            | Self::FlashDownloadResp { error_code, .. } => *error_code,
            Self::Status(report) => report.error_code,
        }
    }

    /// Encode to a full frame
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(48);
        buf.put_u8(SYNC);
        buf.put_u8(self.command());

        match self {
            Self::Generic { error_code }
            | Self::CfgWriteCnf { error_code }
            | Self::FwSendImageCompleteCnf { error_code } => buf.put_u8((*error_code).into()),
            Self::CfgReadResp { error_code, length }
            | Self::GpsReadResp { error_code, length }
            | Self::LogReadResp { error_code, length }
            | Self::CellularReadResp { error_code, length }
            | Self::FlashDownloadResp { error_code, length } => {
                buf.put_u8((*error_code).into());
                buf.put_u32_le(*length);
            }
            Self::Status(report) => {
                buf.put_u8(report.error_code.into());
                buf.put_u32_le(report.firmware_version);
                buf.put_u32_le(report.ble_firmware_version);
                buf.put_u32_le(report.configuration_format_version);
                buf.put_u64_le(report.device_uid);
                buf.put_u8(u8::from(report.gps_detected));
                buf.put_u8(u8::from(report.cellular_detected));
                buf.put_u8(u8::from(report.sim_present));
                buf.put_slice(&report.sim_imsi);
                buf.put_u8(u8::from(report.satellite_detected));
            }
            Self::BatteryStatus {
                error_code,
                charging,
                level,
                millivolts,
            } => {
                buf.put_u8((*error_code).into());
                buf.put_u8(u8::from(*charging));
                buf.put_u8(*level);
                buf.put_u16_le(*millivolts);
            }
        }

        buf
    }

    /// Decode a full response frame
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let (cmd, mut payload) = split_header(frame)?;

        let response = match cmd {
            command::GENERIC_RESP
            | command::CFG_WRITE_CNF
            | command::FW_SEND_IMAGE_COMPLETE_CNF => {
                check_size(cmd, frame, 1)?;
                let error_code = ErrorCode::from(payload.get_u8());
                match cmd {
                    command::GENERIC_RESP => Self::Generic { error_code },
                    command::CFG_WRITE_CNF => Self::CfgWriteCnf { error_code },
                    _ => Self::FwSendImageCompleteCnf { error_code },
                }
            }
            command::CFG_READ_RESP
            | command::GPS_READ_RESP
            | command::LOG_READ_RESP
            | command::CELLULAR_READ_RESP
            | command::FLASH_DOWNLOAD_RESP => {
                check_size(cmd, frame, 5)?;
                let error_code = ErrorCode::from(payload.get_u8());
                let length = payload.get_u32_le();
                match cmd {
                    command::CFG_READ_RESP => Self::CfgReadResp { error_code, length },
                    command::GPS_READ_RESP => Self::GpsReadResp { error_code, length },
                    command::LOG_READ_RESP => Self::LogReadResp { error_code, length },
                    command::CELLULAR_READ_RESP => Self::CellularReadResp { error_code, length },
                    _ => Self::FlashDownloadResp { error_code, length },
                }
            }
            command::STATUS_RESP => {
                check_size(cmd, frame, StatusReport::SIZE)?;
                let error_code = ErrorCode::from(payload.get_u8());
                let firmware_version = payload.get_u32_le();
                let ble_firmware_version = payload.get_u32_le();
                let configuration_format_version = payload.get_u32_le();
                let device_uid = payload.get_u64_le();
                let gps_detected = payload.get_u8() != 0;
                let cellular_detected = payload.get_u8() != 0;
                let sim_present = payload.get_u8() != 0;
                let mut sim_imsi = [0u8; 16];
                payload.copy_to_slice(&mut sim_imsi);
                let satellite_detected = payload.get_u8() != 0;

                Self::Status(StatusReport {
                    error_code,
                    firmware_version,
                    ble_firmware_version,
                    configuration_format_version,
                    device_uid,
                    gps_detected,
                    cellular_detected,
                    sim_present,
                    sim_imsi,
                    satellite_detected,
                })
            }
            command::BATTERY_STATUS_RESP => {
                check_size(cmd, frame, 5)?;
                Self::BatteryStatus {
                    error_code: ErrorCode::from(payload.get_u8()),
                    charging: payload.get_u8() != 0,
                    level: payload.get_u8(),
                    millivolts: payload.get_u16_le(),
                }
            }
            other => return Err(DecodeError::UnknownCommand(other)),
        };

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_generic_envelope() {
        assert_eq!(
            Response::generic(ErrorCode::BridgingDisabled).encode(),
            vec![SYNC, command::GENERIC_RESP, 8]
        );
    }

    #[test]
    fn test_battery_status_layout() {
        let frame = Response::BatteryStatus {
            error_code: ErrorCode::NoError,
            charging: true,
            level: 87,
            millivolts: 3950,
        }
        .encode();

        assert_eq!(
            frame,
            vec![SYNC, command::BATTERY_STATUS_RESP, 0, 1, 87, 0x6E, 0x0F]
        );
    }

    #[test]
    fn test_status_report_decodes() {
        let report = StatusReport {
            firmware_version: 7,
            device_uid: 0x0102_0304_0506_0708,
            cellular_detected: true,
            sim_present: true,
            sim_imsi: *b"234150000000001\0",
            ..Default::default()
        };
        let frame = Response::Status(report.clone()).encode();

        assert_eq!(frame.len(), 2 + StatusReport::SIZE);
        assert_eq!(Response::decode(&frame).unwrap(), Response::Status(report));
    }

    #[test]
    fn test_decode_truncated_read_resp() {
        assert_eq!(
            Response::decode(&[SYNC, command::LOG_READ_RESP, 0, 1]),
            Err(DecodeError::WrongSize {
                command: command::LOG_READ_RESP,
                expected: 7,
                actual: 4
            })
        );
    }
}
