//! Tunables for the control core

use serde::{Deserialize, Serialize};

/// Core timing, sizing and version settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoreSettings {
    /// Maximum transport packet size in bytes
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,

    /// Inactivity timeout for non-idle message sessions
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// How long the USB backend may wait for enumeration while charging
    #[serde(default = "default_usb_enumeration_timeout_ms")]
    pub usb_enumeration_timeout_ms: u64,

    /// Depth of the sensor log queue
    #[serde(default = "default_log_queue_depth")]
    pub log_queue_depth: usize,

    /// Largest single sensor log record, date-time prefix excluded
    #[serde(default = "default_log_max_record")]
    pub log_max_record: usize,

    /// Period between forced log file flushes in operational mode
    #[serde(default = "default_log_flush_period_s")]
    pub log_flush_period_s: u64,

    /// How long a finished test result stays on the LED
    #[serde(default = "default_led_duration_ms")]
    pub led_duration_ms: u64,

    #[serde(default = "default_firmware_version")]
    pub firmware_version: u32,

    #[serde(default = "default_configuration_format_version")]
    pub configuration_format_version: u32,
}

fn default_packet_size() -> usize {
    512
}

fn default_session_timeout_ms() -> u64 {
    5000
}

fn default_usb_enumeration_timeout_ms() -> u64 {
    10_000
}

fn default_log_queue_depth() -> usize {
    32
}

fn default_log_max_record() -> usize {
    32
}

fn default_log_flush_period_s() -> u64 {
    3540
}

fn default_led_duration_ms() -> u64 {
    5000
}

fn default_firmware_version() -> u32 {
    1
}

fn default_configuration_format_version() -> u32 {
    1
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            packet_size: default_packet_size(),
            session_timeout_ms: default_session_timeout_ms(),
            usb_enumeration_timeout_ms: default_usb_enumeration_timeout_ms(),
            log_queue_depth: default_log_queue_depth(),
            log_max_record: default_log_max_record(),
            log_flush_period_s: default_log_flush_period_s(),
            led_duration_ms: default_led_duration_ms(),
            firmware_version: default_firmware_version(),
            configuration_format_version: default_configuration_format_version(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: CoreSettings = serde_json::from_str(r#"{"packet_size": 64}"#).unwrap();

        assert_eq!(settings.packet_size, 64);
        assert_eq!(settings.session_timeout_ms, 5000);
        assert_eq!(settings.log_queue_depth, 32);
    }
}
