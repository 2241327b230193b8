//! Board peripherals consumed by the control core
//!
//! Each concern is its own small trait; [`Peripherals`] bundles them so the
//! controller can hold one boxed board.

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeripheralError {
    #[error("Device not present")]
    NotPresent,

    #[error("Device comms error: {0}")]
    Comms(String),

    #[error("Flash error: {0}")]
    Flash(String),

    #[error("Init failed: {0}")]
    Init(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedColour {
    Red,
    Green,
    Blue,
    White,
    Yellow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedPattern {
    #[default]
    Off,
    Solid(LedColour),
    Blink { colour: LedColour, period_ms: u32 },
}

pub trait Power {
    fn usb_plugged(&self) -> bool;
    /// Charge in percent
    fn battery_level(&mut self) -> Result<u8, PeripheralError>;
    fn battery_millivolts(&mut self) -> Result<u16, PeripheralError>;
    /// Raw reset-cause bits latched at power-up
    fn startup_cause(&self) -> u32;
    fn reset(&mut self);
    /// Boot into the bootloader on the next reset
    fn request_dfu(&mut self);
    fn sleep(&mut self);
}

pub trait Gps {
    fn gps_detected(&self) -> bool;
    fn gps_wake(&mut self);
    fn gps_shutdown(&mut self);
    /// Drop any bytes buffered from the receiver
    fn gps_flush_rx(&mut self);
    fn gps_available(&self) -> usize;
    fn gps_receive_raw(&mut self, buf: &mut [u8]) -> Result<usize, PeripheralError>;
    fn gps_send_raw(&mut self, data: &[u8]) -> Result<(), PeripheralError>;
}

pub trait Cellular {
    fn cellular_detected(&self) -> bool;
    fn cellular_power_on(&mut self);
    fn cellular_power_off(&mut self);
    fn cellular_sync_comms(&mut self) -> Result<(), PeripheralError>;
    fn cellular_available(&self) -> usize;
    fn cellular_receive_raw(&mut self, buf: &mut [u8]) -> Result<usize, PeripheralError>;
    fn cellular_send_raw(&mut self, data: &[u8]) -> Result<(), PeripheralError>;
    /// IMSI of the inserted SIM, `None` if no SIM is present
    fn sim_imsi(&mut self) -> Result<Option<[u8; 16]>, PeripheralError>;
}

pub trait Flash {
    fn flash_size(&self) -> u32;
    fn flash_read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), PeripheralError>;
}

pub trait Indicator {
    fn set_led(&mut self, pattern: LedPattern);
    fn led(&self) -> LedPattern;
}

pub trait Rtc {
    fn date_time(&self) -> NaiveDateTime;
}

pub trait DeviceInfo {
    fn device_uid(&self) -> u64;
    fn ble_firmware_version(&self) -> u32;
}

pub trait Peripherals:
    Power + Gps + Cellular + Flash + Indicator + Rtc + DeviceInfo + Send
{
    /// Bring up every driver; any failure is boot-fatal
    fn init(&mut self) -> Result<(), PeripheralError>;
}
