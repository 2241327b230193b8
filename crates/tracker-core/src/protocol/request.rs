//! Inbound command packets

use bytes::{Buf, BufMut};

use super::{check_size, command, split_header, DecodeError, SYNC};

/// A decoded command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CfgRead { tag: u16 },
    CfgWrite { length: u32 },
    CfgSave,
    CfgRestore,
    CfgErase { tag: u16 },
    CfgProtect,
    CfgUnprotect,
    GpsWrite { length: u32 },
    GpsRead { length: u32 },
    GpsConfig { enable: bool },
    Status,
    FwSendImage {
        image_type: u8,
        length: u32,
        crc32: u32,
    },
    FwApplyImage { image_type: u8 },
    Reset { reset_type: u8 },
    BatteryStatus,
    LogCreate { mode: u8, sync_enable: bool },
    LogErase,
    LogRead { start_offset: u32, length: u32 },
    CellularConfig { enable: bool },
    CellularWrite { length: u32 },
    CellularRead { length: u32 },
    Test { device_flags: u8 },
    FlashDownload,
}

impl Request {
    /// Decode a full frame, header included.
    ///
    /// The frame length must match the command's fixed size exactly.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let (cmd, mut payload) = split_header(frame)?;

        let payload_size = Self::payload_size(cmd).ok_or(DecodeError::UnknownCommand(cmd))?;
        check_size(cmd, frame, payload_size)?;

        let request = match cmd {
            command::CFG_READ_REQ => Self::CfgRead {
                tag: payload.get_u16_le(),
            },
            command::CFG_WRITE_REQ => Self::CfgWrite {
                length: payload.get_u32_le(),
            },
            command::CFG_SAVE_REQ => Self::CfgSave,
            command::CFG_RESTORE_REQ => Self::CfgRestore,
            command::CFG_ERASE_REQ => Self::CfgErase {
                tag: payload.get_u16_le(),
            },
            command::CFG_PROTECT_REQ => Self::CfgProtect,
            command::CFG_UNPROTECT_REQ => Self::CfgUnprotect,
            command::GPS_WRITE_REQ => Self::GpsWrite {
                length: payload.get_u32_le(),
            },
            command::GPS_READ_REQ => Self::GpsRead {
                length: payload.get_u32_le(),
            },
            command::GPS_CONFIG_REQ => Self::GpsConfig {
                enable: payload.get_u8() != 0,
            },
            command::STATUS_REQ => Self::Status,
            command::FW_SEND_IMAGE_REQ => Self::FwSendImage {
                image_type: payload.get_u8(),
                length: payload.get_u32_le(),
                crc32: payload.get_u32_le(),
            },
            command::FW_APPLY_IMAGE_REQ => Self::FwApplyImage {
                image_type: payload.get_u8(),
            },
            command::RESET_REQ => Self::Reset {
                reset_type: payload.get_u8(),
            },
            command::BATTERY_STATUS_REQ => Self::BatteryStatus,
            command::LOG_CREATE_REQ => Self::LogCreate {
                mode: payload.get_u8(),
                sync_enable: payload.get_u8() != 0,
            },
            command::LOG_ERASE_REQ => Self::LogErase,
            command::LOG_READ_REQ => Self::LogRead {
                start_offset: payload.get_u32_le(),
                length: payload.get_u32_le(),
            },
            command::CELLULAR_CONFIG_REQ => Self::CellularConfig {
                enable: payload.get_u8() != 0,
            },
            command::CELLULAR_WRITE_REQ => Self::CellularWrite {
                length: payload.get_u32_le(),
            },
            command::CELLULAR_READ_REQ => Self::CellularRead {
                length: payload.get_u32_le(),
            },
            command::TEST_REQ => Self::Test {
                device_flags: payload.get_u8(),
            },
            command::FLASH_DOWNLOAD_REQ => Self::FlashDownload,
            other => return Err(DecodeError::UnknownCommand(other)),
        };

        Ok(request)
    }

    /// Fixed payload size of a request command, `None` if not a request
    pub fn payload_size(cmd: u8) -> Option<usize> {
        let size = match cmd {
            command::CFG_READ_REQ | command::CFG_ERASE_REQ => 2,
            command::CFG_WRITE_REQ
            | command::GPS_WRITE_REQ
            | command::GPS_READ_REQ
            | command::CELLULAR_WRITE_REQ
            | command::CELLULAR_READ_REQ => 4,
            command::CFG_SAVE_REQ
            | command::CFG_RESTORE_REQ
            | command::CFG_PROTECT_REQ
            | command::CFG_UNPROTECT_REQ
            | command::STATUS_REQ
            | command::BATTERY_STATUS_REQ
            | command::LOG_ERASE_REQ
            | command::FLASH_DOWNLOAD_REQ => 0,
            command::GPS_CONFIG_REQ
            | command::CELLULAR_CONFIG_REQ
            | command::FW_APPLY_IMAGE_REQ
            | command::RESET_REQ
            | command::TEST_REQ => 1,
            command::LOG_CREATE_REQ => 2,
            command::FW_SEND_IMAGE_REQ => 9,
            command::LOG_READ_REQ => 8,
            _ => return None,
        };
        Some(size)
    }

    /// Command identifier
    pub fn command(&self) -> u8 {
        match self {
            Self::CfgRead { .. } => command::CFG_READ_REQ,
            Self::CfgWrite { .. } => command::CFG_WRITE_REQ,
            Self::CfgSave => command::CFG_SAVE_REQ,
            Self::CfgRestore => command::CFG_RESTORE_REQ,
            Self::CfgErase { .. } => command::CFG_ERASE_REQ,
            Self::CfgProtect => command::CFG_PROTECT_REQ,
            Self::CfgUnprotect => command::CFG_UNPROTECT_REQ,
            Self::GpsWrite { .. } => command::GPS_WRITE_REQ,
            Self::GpsRead { .. } => command::GPS_READ_REQ,
            Self::GpsConfig { .. } => command::GPS_CONFIG_REQ,
            Self::Status => command::STATUS_REQ,
            Self::FwSendImage { .. } => command::FW_SEND_IMAGE_REQ,
            Self::FwApplyImage { .. } => command::FW_APPLY_IMAGE_REQ,
            Self::Reset { .. } => command::RESET_REQ,
            Self::BatteryStatus => command::BATTERY_STATUS_REQ,
            Self::LogCreate { .. } => command::LOG_CREATE_REQ,
            Self::LogErase => command::LOG_ERASE_REQ,
            Self::LogRead { .. } => command::LOG_READ_REQ,
            Self::CellularConfig { .. } => command::CELLULAR_CONFIG_REQ,
            Self::CellularWrite { .. } => command::CELLULAR_WRITE_REQ,
            Self::CellularRead { .. } => command::CELLULAR_READ_REQ,
            Self::Test { .. } => command::TEST_REQ,
            Self::FlashDownload => command::FLASH_DOWNLOAD_REQ,
        }
    }

    /// Encode to a full frame, as a host would send it
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        buf.put_u8(SYNC);
        buf.put_u8(self.command());

        match self {
            Self::CfgRead { tag } | Self::CfgErase { tag } => buf.put_u16_le(*tag),
            Self::CfgWrite { length }
            | Self::GpsWrite { length }
            | Self::GpsRead { length }
            | Self::CellularWrite { length }
            | Self::CellularRead { length } => buf.put_u32_le(*length),
            Self::GpsConfig { enable } | Self::CellularConfig { enable } => {
                buf.put_u8(u8::from(*enable))
            }
            Self::FwSendImage {
                image_type,
                length,
                crc32,
            } => {
                buf.put_u8(*image_type);
                buf.put_u32_le(*length);
                buf.put_u32_le(*crc32);
            }
            Self::FwApplyImage { image_type } => buf.put_u8(*image_type),
            Self::Reset { reset_type } => buf.put_u8(*reset_type),
            Self::LogCreate { mode, sync_enable } => {
                buf.put_u8(*mode);
                buf.put_u8(u8::from(*sync_enable));
            }
            Self::LogRead {
                start_offset,
                length,
            } => {
                buf.put_u32_le(*start_offset);
                buf.put_u32_le(*length);
            }
            Self::Test { device_flags } => buf.put_u8(*device_flags),
            Self::CfgSave
            | Self::CfgRestore
            | Self::CfgProtect
            | Self::CfgUnprotect
            | Self::Status
            | Self::BatteryStatus
            | Self::LogErase
            | Self::FlashDownload => {}
        }

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_decode_fw_send_image() {
        let frame = [
            SYNC, 0x10, 0x01, 0x00, 0x01, 0x00, 0x00, 0x78, 0x56, 0x34, 0x12,
        ];

        assert_eq!(
            Request::decode(&frame).unwrap(),
            Request::FwSendImage {
                image_type: 1,
                length: 256,
                crc32: 0x1234_5678
            }
        );
    }

    #[test]
    fn test_encode_log_read_layout() {
        let frame = Request::LogRead {
            start_offset: 0x10,
            length: 0x0200,
        }
        .encode();

        assert_eq!(
            frame,
            vec![SYNC, 0x18, 0x10, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00]
        );
    }

    #[rstest]
    #[case(command::CFG_READ_REQ, 2)]
    #[case(command::CFG_WRITE_REQ, 4)]
    #[case(command::CFG_SAVE_REQ, 0)]
    #[case(command::FW_SEND_IMAGE_REQ, 9)]
    #[case(command::LOG_READ_REQ, 8)]
    #[case(command::TEST_REQ, 1)]
    fn test_wrong_size_rejected(#[case] cmd: u8, #[case] payload: usize) {
        let mut frame = vec![SYNC, cmd];
        frame.resize(2 + payload + 1, 0);

        assert_eq!(
            Request::decode(&frame),
            Err(DecodeError::WrongSize {
                command: cmd,
                expected: 2 + payload,
                actual: 3 + payload
            })
        );
    }

    #[test]
    fn test_response_identifier_is_not_a_request() {
        assert_eq!(
            Request::decode(&[SYNC, command::CFG_READ_RESP]),
            Err(DecodeError::UnknownCommand(command::CFG_READ_RESP))
        );
    }
}
