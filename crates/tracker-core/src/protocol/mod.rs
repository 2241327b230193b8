//! Configuration interface wire protocol
//!
//! Every packet starts with a sync byte and a command identifier, followed
//! by a fixed-layout payload. Multi-byte fields are little-endian and packed.
//!
//! ```text
//! +------+---------+---------------------------+
//! | 0x7E | command | payload (command specific) |
//! +------+---------+---------------------------+
//! ```

mod codes;
mod request;
mod response;

pub use codes::ErrorCode;
pub use request::Request;
pub use response::{Response, StatusReport};

use thiserror::Error;

/// Sync marker that opens every command and response
pub const SYNC: u8 = 0x7E;

/// Sync + command identifier
pub const HEADER_SIZE: usize = 2;

/// `tag` value selecting every configuration tag
pub const CFG_TAG_ALL: u16 = 0xFFFF;

/// Command identifiers
pub mod command {
    pub const GENERIC_RESP: u8 = 0x00;
    pub const CFG_READ_REQ: u8 = 0x01;
    pub const CFG_WRITE_REQ: u8 = 0x02;
    pub const CFG_SAVE_REQ: u8 = 0x03;
    pub const CFG_RESTORE_REQ: u8 = 0x04;
    pub const CFG_ERASE_REQ: u8 = 0x05;
    pub const CFG_PROTECT_REQ: u8 = 0x06;
    pub const CFG_UNPROTECT_REQ: u8 = 0x07;
    pub const CFG_WRITE_CNF: u8 = 0x08;
    pub const CFG_READ_RESP: u8 = 0x09;
    pub const GPS_WRITE_REQ: u8 = 0x0A;
    pub const GPS_READ_REQ: u8 = 0x0B;
    pub const GPS_READ_RESP: u8 = 0x0C;
    pub const GPS_CONFIG_REQ: u8 = 0x0D;
    pub const STATUS_REQ: u8 = 0x0E;
    pub const STATUS_RESP: u8 = 0x0F;
    pub const FW_SEND_IMAGE_REQ: u8 = 0x10;
    pub const FW_SEND_IMAGE_COMPLETE_CNF: u8 = 0x11;
    pub const FW_APPLY_IMAGE_REQ: u8 = 0x12;
    pub const RESET_REQ: u8 = 0x13;
    pub const BATTERY_STATUS_REQ: u8 = 0x14;
    pub const BATTERY_STATUS_RESP: u8 = 0x15;
    pub const LOG_CREATE_REQ: u8 = 0x16;
    pub const LOG_ERASE_REQ: u8 = 0x17;
    pub const LOG_READ_REQ: u8 = 0x18;
    pub const LOG_READ_RESP: u8 = 0x19;
    pub const CELLULAR_CONFIG_REQ: u8 = 0x1A;
    pub const CELLULAR_WRITE_REQ: u8 = 0x1B;
    pub const CELLULAR_READ_REQ: u8 = 0x1C;
    pub const CELLULAR_READ_RESP: u8 = 0x1D;
    pub const TEST_REQ: u8 = 0x1E;
    pub const FLASH_DOWNLOAD_REQ: u8 = 0x1F;
    pub const FLASH_DOWNLOAD_RESP: u8 = 0x20;
}

/// Firmware image types accepted by FW_SEND_IMAGE_REQ
pub mod image_type {
    /// Satellite modem firmware
    pub const ARTIC: u8 = 1;
}

/// RESET_REQ reset types
pub mod reset_type {
    pub const APP: u8 = 0;
    pub const FLASH_ERASE_ALL: u8 = 1;
    pub const DFU: u8 = 2;
}

/// LOG_CREATE_REQ modes
pub mod log_mode {
    pub const FILL: u8 = 0;
    pub const CIRCULAR: u8 = 1;
}

/// TEST_REQ device flags
pub mod test_flag {
    pub const GPS: u8 = 1 << 0;
    pub const CELLULAR: u8 = 1 << 1;
    pub const SATELLITE: u8 = 1 << 2;
}

/// Packet decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("Bad sync byte 0x{0:02X}")]
    BadSync(u8),

    #[error("Unknown command 0x{0:02X}")]
    UnknownCommand(u8),

    #[error("Command 0x{command:02X} has wrong size: expected {expected} bytes, got {actual}")]
    WrongSize {
        command: u8,
        expected: usize,
        actual: usize,
    },
}

/// Split a frame into (command, payload) after checking the sync marker
pub fn split_header(frame: &[u8]) -> Result<(u8, &[u8]), DecodeError> {
    if frame.len() < HEADER_SIZE {
        return Err(DecodeError::FrameTooShort {
            expected: HEADER_SIZE,
            actual: frame.len(),
        });
    }
    if frame[0] != SYNC {
        return Err(DecodeError::BadSync(frame[0]));
    }
    Ok((frame[1], &frame[HEADER_SIZE..]))
}

fn check_size(command: u8, frame: &[u8], payload_size: usize) -> Result<(), DecodeError> {
    let expected = HEADER_SIZE + payload_size;
    if frame.len() != expected {
        return Err(DecodeError::WrongSize {
            command,
            expected,
            actual: frame.len(),
        });
    }
    Ok(())
}
