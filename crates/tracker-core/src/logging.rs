//! Sensor log records and the queue that feeds the log file
//!
//! Records are a one-byte id followed by a packed little-endian payload.
//! When date-time stamping is enabled a `DATE_TIME` record is written in
//! front of each queued record.

use bytes::BufMut;
use chrono::{Datelike, NaiveDateTime, Timelike};
use tracing::{debug, error, trace};

use crate::buffer::BufferPool;
use crate::hal::config_store::{flag_enabled, tag};
use crate::hal::{ConfigStore, FileHandle, FileSystem, FsError};

/// Log record identifiers
pub mod record_id {
    pub const DATE_TIME: u8 = 0x00;
    pub const STARTUP: u8 = 0x01;
    pub const BATTERY: u8 = 0x02;
    pub const BLE_CONNECTED: u8 = 0x03;
    pub const BLE_DISCONNECTED: u8 = 0x04;
    pub const GPS_ON: u8 = 0x05;
    pub const GPS_OFF: u8 = 0x06;
}

pub const DATE_TIME_SIZE: usize = 8;

/// Broken-down RTC time as it appears in the log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

impl From<NaiveDateTime> for LogTime {
    fn from(dt: NaiveDateTime) -> Self {
        Self {
            year: dt.year().clamp(0, u16::MAX as i32) as u16,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hours: dt.hour() as u8,
            minutes: dt.minute() as u8,
            seconds: dt.second() as u8,
        }
    }
}

impl LogTime {
    /// Grouping check as the logger has always done it: any equal field
    /// counts as "same time".
    fn shares_any_field(&self, other: &LogTime) -> bool {
        self.year == other.year
            || self.month == other.month
            || self.day == other.day
            || self.hours == other.hours
            || self.minutes == other.minutes
            || self.seconds == other.seconds
    }
}

pub fn date_time_record(time: LogTime) -> [u8; DATE_TIME_SIZE] {
    let mut record = [0u8; DATE_TIME_SIZE];
    let mut buf = &mut record[..];
    buf.put_u8(record_id::DATE_TIME);
    buf.put_u16_le(time.year);
    buf.put_u8(time.month);
    buf.put_u8(time.day);
    buf.put_u8(time.hours);
    buf.put_u8(time.minutes);
    buf.put_u8(time.seconds);
    record
}

pub fn startup_record(cause: u32) -> [u8; 5] {
    let mut record = [0u8; 5];
    record[0] = record_id::STARTUP;
    record[1..].copy_from_slice(&cause.to_le_bytes());
    record
}

pub fn battery_record(charge: u8) -> [u8; 2] {
    [record_id::BATTERY, charge]
}

/// Queue of pending sensor log records
#[derive(Debug)]
pub struct LogQueue {
    pool: BufferPool,
    last_log_time: LogTime,
}

impl LogQueue {
    /// `depth` records of up to `max_record` bytes each, plus room for a
    /// date-time prefix
    pub fn new(depth: usize, max_record: usize) -> Self {
        Self {
            pool: BufferPool::ring(depth, max_record + DATE_TIME_SIZE),
            last_log_time: LogTime::default(),
        }
    }

    /// Queue a record, dropping it with a diagnostic when the queue is full.
    ///
    /// Returns whether the record was queued.
    pub fn push(&mut self, record: &[u8], config: &dyn ConfigStore, now: NaiveDateTime) -> bool {
        let Some(slot) = self.pool.acquire_write() else {
            error!(id = record.first().copied(), "Log buffer full, dropping record");
            return false;
        };

        let mut staged = Vec::with_capacity(DATE_TIME_SIZE + record.len());

        if flag_enabled(config, tag::LOGGING_DATE_TIME_STAMP_ENABLE) {
            let current = LogTime::from(now);
            let mut stamp = true;

            if flag_enabled(config, tag::LOGGING_GROUP_SENSOR_READINGS_ENABLE)
                && self.last_log_time.shares_any_field(&current)
            {
                self.last_log_time = current;
                stamp = false;
            }

            if stamp {
                staged.extend_from_slice(&date_time_record(current));
            }
        }
        staged.extend_from_slice(record);

        if staged.len() > slot.capacity() {
            self.pool.abandon(&slot);
            error!(len = staged.len(), "Log record too large, dropping");
            return false;
        }

        let committed = self
            .pool
            .slot_mut(&slot)
            .map(|buf| buf[..staged.len()].copy_from_slice(&staged))
            .and_then(|()| self.pool.commit(&slot, staged.len()));
        if let Err(e) = committed {
            error!(error = %e, "Failed to queue log record");
            return false;
        }

        trace!(bytes = staged.len(), "Log record queued");
        true
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn reset(&mut self) {
        self.pool.reset();
    }

    /// Write every queued record to `handle`, oldest first.
    ///
    /// A record is only released once written; on error the remaining
    /// records stay queued.
    pub fn drain_to(
        &mut self,
        fs: &mut dyn FileSystem,
        handle: FileHandle,
    ) -> Result<usize, FsError> {
        let mut written = 0;
        while let Some(record) = self.pool.acquire_read() {
            let len = record.len();
            fs.write(handle, record)?;
            if let Err(e) = self.pool.release_read(len) {
                debug!(error = %e, "Log record release failed");
                break;
            }
            written += len;
        }
        Ok(written)
    }
}
