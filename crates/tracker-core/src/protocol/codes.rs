//! Response error codes

use std::fmt;

use serde::Serialize;

/// Error code carried in every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[repr(u8)]
pub enum ErrorCode {
    #[default]
    NoError = 0,
    FileNotFound = 1,
    FileAlreadyExists = 2,
    InvalidConfigTag = 3,
    GpsComms = 4,
    Timeout = 5,
    ConfigProtected = 6,
    ConfigTagNotSet = 7,
    BridgingDisabled = 8,
    DataOversize = 9,
    InvalidParameter = 10,
    InvalidFwImageType = 11,
    ImageCrcMismatch = 12,
    FileIncompatible = 13,
    CellularComms = 14,

    /// Unknown/reserved code
    Unknown(u8),
}

impl ErrorCode {
    pub fn is_ok(self) -> bool {
        self == Self::NoError
    }
}

impl From<u8> for ErrorCode {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::NoError,
            1 => Self::FileNotFound,
            2 => Self::FileAlreadyExists,
            3 => Self::InvalidConfigTag,
            4 => Self::GpsComms,
            5 => Self::Timeout,
            6 => Self::ConfigProtected,
            7 => Self::ConfigTagNotSet,
            8 => Self::BridgingDisabled,
            9 => Self::DataOversize,
            10 => Self::InvalidParameter,
            11 => Self::InvalidFwImageType,
            12 => Self::ImageCrcMismatch,
            13 => Self::FileIncompatible,
            14 => Self::CellularComms,
            other => Self::Unknown(other),
        }
    }
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::NoError => 0,
            ErrorCode::FileNotFound => 1,
            ErrorCode::FileAlreadyExists => 2,
            ErrorCode::InvalidConfigTag => 3,
            ErrorCode::GpsComms => 4,
            ErrorCode::Timeout => 5,
            ErrorCode::ConfigProtected => 6,
            ErrorCode::ConfigTagNotSet => 7,
            ErrorCode::BridgingDisabled => 8,
            ErrorCode::DataOversize => 9,
            ErrorCode::InvalidParameter => 10,
            ErrorCode::InvalidFwImageType => 11,
            ErrorCode::ImageCrcMismatch => 12,
            ErrorCode::FileIncompatible => 13,
            ErrorCode::CellularComms => 14,
            ErrorCode::Unknown(v) => v,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoError => write!(f, "NoError"),
            Self::FileNotFound => write!(f, "FileNotFound"),
            Self::FileAlreadyExists => write!(f, "FileAlreadyExists"),
            Self::InvalidConfigTag => write!(f, "InvalidConfigTag"),
            Self::GpsComms => write!(f, "GpsComms"),
            Self::Timeout => write!(f, "Timeout"),
            Self::ConfigProtected => write!(f, "ConfigProtected"),
            Self::ConfigTagNotSet => write!(f, "ConfigTagNotSet"),
            Self::BridgingDisabled => write!(f, "BridgingDisabled"),
            Self::DataOversize => write!(f, "DataOversize"),
            Self::InvalidParameter => write!(f, "InvalidParameter"),
            Self::InvalidFwImageType => write!(f, "InvalidFwImageType"),
            Self::ImageCrcMismatch => write!(f, "ImageCrcMismatch"),
            Self::FileIncompatible => write!(f, "FileIncompatible"),
            Self::CellularComms => write!(f, "CellularComms"),
            Self::Unknown(v) => write!(f, "Unknown(0x{:02X})", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_code_preserved() {
        let code = ErrorCode::from(0x42);
        assert_eq!(code, ErrorCode::Unknown(0x42));
        assert_eq!(u8::from(code), 0x42);
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorCode::ImageCrcMismatch.to_string(), "ImageCrcMismatch");
        assert!(ErrorCode::NoError.is_ok());
    }
}
