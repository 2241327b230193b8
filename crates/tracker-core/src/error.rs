//! Abort conditions raised inside a tick
//!
//! Handlers return these through `?`; each controller catches them once per
//! tick and applies the cleanup selected by [`SessionError::disposition`].

use thiserror::Error;

use crate::buffer::PoolError;
use crate::hal::{ConfigStoreError, FsError, PeripheralError, TransportError};

/// What the catch point does with a session error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Log and carry on; the work is retried or dropped naturally
    Ignore,
    /// Tell the peer with an error response, session state untouched
    Reported,
    /// Abort the transfer, clean up and return to idle
    SessionBreaking,
}

/// Message session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Request 0x{command:02X} wrong size: expected {expected}, got {actual}")]
    RequestWrongSize {
        command: u8,
        expected: usize,
        actual: usize,
    },

    #[error("Send buffer full")]
    TxBufferFull,

    #[error("Transmission already pending")]
    TxBusy,

    #[error("Receive buffer full")]
    RxBufferFull,

    #[error("Buffer pool: {0}")]
    Pool(#[from] PoolError),

    #[error("Packet larger than the remaining transfer")]
    PacketWrongSize,

    #[error("Configuration store: {0}")]
    BadConfig(ConfigStoreError),

    #[error("GPS bridge failed: {0}")]
    Gps(PeripheralError),

    #[error("Cellular bridge failed: {0}")]
    Cellular(PeripheralError),

    #[error("Filesystem: {0}")]
    Fs(#[from] FsError),

    #[error("Flash read failed: {0}")]
    Flash(PeripheralError),

    #[error("Transport: {0}")]
    Transport(#[from] TransportError),
}

impl SessionError {
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::TxBufferFull | Self::TxBusy | Self::RxBufferFull | Self::Pool(_) => {
                Disposition::Ignore
            }
            Self::RequestWrongSize { .. } => Disposition::Reported,
            Self::PacketWrongSize
            | Self::BadConfig(_)
            | Self::Gps(_)
            | Self::Cellular(_)
            | Self::Fs(_)
            | Self::Flash(_)
            | Self::Transport(_) => Disposition::SessionBreaking,
        }
    }
}

impl From<ConfigStoreError> for SessionError {
    fn from(err: ConfigStoreError) -> Self {
        match err {
            ConfigStoreError::Fs(fs) => Self::Fs(fs),
            other => Self::BadConfig(other),
        }
    }
}

/// Device-mode errors
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Any init failure during boot; the device parks in `Error`
    #[error("Boot failed: {0}")]
    Boot(String),

    #[error("Filesystem: {0}")]
    Fs(#[from] FsError),

    #[error("Configuration store: {0}")]
    Config(#[from] ConfigStoreError),

    #[error("Transport: {0}")]
    Transport(#[from] TransportError),

    #[error("Peripheral: {0}")]
    Peripheral(#[from] PeripheralError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_exhaustion_is_ignored() {
        assert_eq!(SessionError::TxBusy.disposition(), Disposition::Ignore);
        assert_eq!(
            SessionError::Pool(PoolError::Full).disposition(),
            Disposition::Ignore
        );
    }

    #[test]
    fn test_storage_failure_breaks_session() {
        assert_eq!(
            SessionError::from(FsError::Io("bad block".into())).disposition(),
            Disposition::SessionBreaking
        );
    }

    #[test]
    fn test_config_fs_error_unwraps_to_fs() {
        let err = SessionError::from(ConfigStoreError::Fs(FsError::Protected));
        assert!(matches!(err, SessionError::Fs(FsError::Protected)));
    }

    #[test]
    fn test_wrong_size_is_reported() {
        let err = SessionError::RequestWrongSize {
            command: 0x01,
            expected: 4,
            actual: 5,
        };
        assert_eq!(err.disposition(), Disposition::Reported);
        assert_eq!(
            err.to_string(),
            "Request 0x01 wrong size: expected 4, got 5"
        );
    }
}
