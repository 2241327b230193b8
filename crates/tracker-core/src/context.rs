//! Message session states and their resumable transfer contexts
//!
//! The session state is derived from the active [`TransferContext`] variant,
//! so a continuation can never run against another transfer's counters.

use std::fmt;

use crc::{Crc, Digest, CRC_32_ISO_HDLC};
use serde::Serialize;

use crate::hal::TagCursor;
use crate::protocol::ErrorCode;

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Tag id plus the largest value the write scratch buffer can hold
pub const CFG_ID_SIZE: usize = 2;
pub const CFG_SCRATCH_SIZE: usize = CFG_ID_SIZE + 64;

/// Message session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    CfgReadNext,
    CfgWriteNext,
    CfgWriteError,
    GpsWriteNext,
    GpsReadNext,
    LogReadNext,
    FwSendImageNext,
    CellularWriteNext,
    CellularReadNext,
    FlashDownloadNext,
}

/// Running CRC32 over a streamed image
#[derive(Clone)]
pub struct Crc32Accumulator(Digest<'static, u32>);

impl Crc32Accumulator {
    pub fn new() -> Self {
        Self(CRC32.digest())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.0.finalize()
    }
}

impl Default for Crc32Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Crc32Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Crc32Accumulator")
    }
}

/// One-shot CRC32 (ISO-HDLC), as used for firmware images
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Reassembly buffer for one `tag id + value` record
#[derive(Debug, Clone)]
pub struct TagScratch {
    pub buffer: [u8; CFG_SCRATCH_SIZE],
    pub occupancy: usize,
}

impl Default for TagScratch {
    fn default() -> Self {
        Self {
            buffer: [0; CFG_SCRATCH_SIZE],
            occupancy: 0,
        }
    }
}

impl TagScratch {
    pub fn tag(&self) -> Option<u16> {
        (self.occupancy >= CFG_ID_SIZE)
            .then(|| u16::from_le_bytes([self.buffer[0], self.buffer[1]]))
    }

    pub fn clear(&mut self) {
        self.occupancy = 0;
    }
}

/// Resumption state of the transfer in flight
#[derive(Debug, Default)]
pub enum TransferContext {
    #[default]
    Idle,
    CfgRead {
        /// Bytes of tag data still to be sent, including the staged packet
        remaining: u32,
        cursor: TagCursor,
        /// Size of the data packet staged in the send pool
        staged: usize,
    },
    CfgWrite {
        remaining: u32,
        scratch: TagScratch,
    },
    CfgWriteError {
        error_code: ErrorCode,
    },
    GpsWrite {
        remaining: u32,
    },
    GpsRead {
        remaining: u32,
    },
    LogRead {
        remaining: u32,
    },
    FwSendImage {
        remaining: u32,
        crc: Crc32Accumulator,
        expected_crc: u32,
    },
    CellularWrite {
        remaining: u32,
    },
    CellularRead {
        remaining: u32,
    },
    FlashDownload {
        address: u32,
        remaining: u32,
    },
}

impl TransferContext {
    pub fn state(&self) -> SessionState {
        match self {
            Self::Idle => SessionState::Idle,
            Self::CfgRead { .. } => SessionState::CfgReadNext,
            Self::CfgWrite { .. } => SessionState::CfgWriteNext,
            Self::CfgWriteError { .. } => SessionState::CfgWriteError,
            Self::GpsWrite { .. } => SessionState::GpsWriteNext,
            Self::GpsRead { .. } => SessionState::GpsReadNext,
            Self::LogRead { .. } => SessionState::LogReadNext,
            Self::FwSendImage { .. } => SessionState::FwSendImageNext,
            Self::CellularWrite { .. } => SessionState::CellularWriteNext,
            Self::CellularRead { .. } => SessionState::CellularReadNext,
            Self::FlashDownload { .. } => SessionState::FlashDownloadNext,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_follows_variant() {
        assert_eq!(TransferContext::default().state(), SessionState::Idle);
        assert_eq!(
            TransferContext::FlashDownload {
                address: 0,
                remaining: 10
            }
            .state(),
            SessionState::FlashDownloadNext
        );
        assert_eq!(
            TransferContext::CfgWriteError {
                error_code: ErrorCode::DataOversize
            }
            .state(),
            SessionState::CfgWriteError
        );
    }

    #[test]
    fn test_incremental_crc_matches_one_shot() {
        let data = b"123456789";
        let mut acc = Crc32Accumulator::new();
        acc.update(&data[..4]);
        acc.update(&data[4..]);

        assert_eq!(acc.finalize(), 0xCBF4_3926);
        assert_eq!(crc32(data), 0xCBF4_3926);
    }

    #[test]
    fn test_scratch_tag_needs_two_bytes() {
        let mut scratch = TagScratch::default();
        scratch.buffer[0] = 0x03;
        scratch.occupancy = 1;
        assert_eq!(scratch.tag(), None);

        scratch.buffer[1] = 0x01;
        scratch.occupancy = 2;
        assert_eq!(scratch.tag(), Some(0x0103));
    }
}
