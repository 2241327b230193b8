//! Tagged configuration store interface

use thiserror::Error;

use super::fs::{FileSystem, FsError};

/// Configuration store errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigStoreError {
    #[error("Invalid configuration tag 0x{0:04X}")]
    InvalidTag(u16),

    #[error("Configuration tag 0x{0:04X} not set")]
    NotSet(u16),

    #[error("Tag 0x{tag:04X} expects {expected} bytes, got {actual}")]
    InvalidLength {
        tag: u16,
        expected: usize,
        actual: usize,
    },

    #[error("No valid configuration file")]
    NoValidConfigFile,

    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),
}

/// Tag identifiers the control core reads directly
pub mod tag {
    pub const GPS_LOG_POSITION_ENABLE: u16 = 0x0000;
    pub const GPS_DEBUG_LOGGING_ENABLE: u16 = 0x0010;
    pub const LOGGING_ENABLE: u16 = 0x0100;
    pub const LOGGING_GROUP_SENSOR_READINGS_ENABLE: u16 = 0x0103;
    pub const LOGGING_DATE_TIME_STAMP_ENABLE: u16 = 0x0104;
    pub const BATTERY_LOG_ENABLE: u16 = 0x0A00;
    pub const BATTERY_LOW_THRESHOLD: u16 = 0x0A01;
    pub const BLUETOOTH_LOG_ENABLE: u16 = 0x0B00;
    pub const CELLULAR_ENABLE: u16 = 0x0C00;
}

/// Position in the store's ascending tag order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagCursor(usize);

impl TagCursor {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn index(&self) -> usize {
        self.0
    }

    pub fn advance(&mut self) {
        self.0 += 1;
    }

    /// Step back so the last returned tag is produced again
    pub fn rewind(&mut self) {
        self.0 = self.0.saturating_sub(1);
    }
}

pub trait ConfigStore: Send {
    /// Next tag identifier in ascending order, advancing the cursor
    fn iterate(&self, cursor: &mut TagCursor) -> Option<u16>;

    fn get(&self, tag: u16) -> Result<&[u8], ConfigStoreError>;

    /// `value` must be exactly `size(tag)` bytes
    fn set(&mut self, tag: u16, value: &[u8]) -> Result<(), ConfigStoreError>;

    fn unset(&mut self, tag: u16) -> Result<(), ConfigStoreError>;

    fn is_required(&self, tag: u16) -> Result<bool, ConfigStoreError>;

    fn is_set(&self, tag: u16) -> Result<bool, ConfigStoreError>;

    /// Declared value size
    fn size(&self, tag: u16) -> Result<usize, ConfigStoreError>;

    fn save(&mut self, fs: &mut dyn FileSystem) -> Result<(), ConfigStoreError>;

    fn load(&mut self, fs: &mut dyn FileSystem) -> Result<(), ConfigStoreError>;
}

/// True when `tag` is set and its first byte is non-zero
pub fn flag_enabled(store: &dyn ConfigStore, tag: u16) -> bool {
    matches!(store.get(tag), Ok(value) if value.first().is_some_and(|b| *b != 0))
}

/// First byte of a set tag
pub fn value_u8(store: &dyn ConfigStore, tag: u16) -> Option<u8> {
    store.get(tag).ok().and_then(|value| value.first().copied())
}
