//! Per-mode enter, step and exit handlers

use tracing::{error, info, warn};

use super::{DeviceController, DeviceState};
use crate::error::DeviceError;
use crate::hal::config_store::{flag_enabled, tag};
use crate::hal::fs::read_all;
use crate::hal::{
    file_id, Backend, BackendSelector, ConfigStoreError, FsError, FsMode, LedColour, LedPattern,
};
use crate::logging::battery_record;
use crate::shared::TestState;

const ERROR_BLINK_MS: u32 = 100;
const PROVISIONING_BLINK_MS: u32 = 500;
const CELLULAR_TEST_BLINK_MS: u32 = 250;

impl DeviceController {
    pub(super) fn on_enter(&mut self, state: DeviceState) {
        match state {
            DeviceState::Boot => {}
            DeviceState::Error => {
                self.board.peripherals.set_led(LedPattern::Blink {
                    colour: LedColour::Red,
                    period_ms: ERROR_BLINK_MS,
                });
            }
            DeviceState::BatteryCharging => self.charging_enter(),
            DeviceState::BatteryLevelLow => {
                self.terminate_transport();
                self.gps_off(true);
            }
            DeviceState::LogFileFull => {}
            DeviceState::ProvisioningNeeded => {
                self.board.peripherals.set_led(LedPattern::Blink {
                    colour: LedColour::Red,
                    period_ms: PROVISIONING_BLINK_MS,
                });
                self.gps_off(true);
            }
            DeviceState::Provisioning => {
                self.gps_on();
                self.board.peripherals.cellular_power_on();
            }
            DeviceState::Operational => self.operational_enter(),
        }
    }

    pub(super) fn on_tick(&mut self, state: DeviceState) {
        match state {
            DeviceState::Boot => {
                let next = match self.boot() {
                    Ok(next) => next,
                    Err(e) => {
                        error!(error = %e, "Boot failed");
                        DeviceState::Error
                    }
                };
                self.mode.request(next);
            }
            DeviceState::Error => {}
            DeviceState::BatteryCharging => self.charging_tick(),
            DeviceState::BatteryLevelLow => {
                if self.usb_plugged() {
                    self.mode.request(DeviceState::BatteryCharging);
                }
            }
            DeviceState::LogFileFull | DeviceState::ProvisioningNeeded => {
                self.session.poll(&mut self.board, &mut self.shared);
                if self.session.is_connected() {
                    self.mode.request(DeviceState::Provisioning);
                }
                if self.usb_plugged() {
                    self.mode.request(DeviceState::BatteryCharging);
                }
                if self.is_battery_low() {
                    self.mode.request(DeviceState::BatteryLevelLow);
                }
            }
            DeviceState::Provisioning => self.provisioning_tick(),
            DeviceState::Operational => self.operational_tick(),
        }
    }

    pub(super) fn on_exit(&mut self, state: DeviceState) {
        match state {
            DeviceState::Boot | DeviceState::ProvisioningNeeded => {
                self.board.peripherals.set_led(LedPattern::Off);
            }
            DeviceState::BatteryCharging => {
                self.usb_enum_started_ms = None;
            }
            DeviceState::Provisioning => self.provisioning_exit(),
            DeviceState::Operational => self.operational_exit(),
            DeviceState::Error | DeviceState::BatteryLevelLow | DeviceState::LogFileFull => {}
        }
    }

    // =========================================================================
    // Boot
    // =========================================================================

    fn boot(&mut self) -> Result<DeviceState, DeviceError> {
        self.reset_state();

        self.board.peripherals.init()?;
        self.board.fs.mount()?;

        self.shared.log_file_created = match self.board.fs.stat(file_id::LOG) {
            Ok(_) => true,
            Err(FsError::NotFound) => false,
            Err(e) => return Err(e.into()),
        };

        match self.board.config.load(self.board.fs.as_mut()) {
            Ok(()) => info!("Configuration loaded"),
            Err(ConfigStoreError::NoValidConfigFile) => warn!("No valid configuration file"),
            Err(e) => return Err(e.into()),
        }

        if self.shared.log_file_created {
            self.queue_startup_event();
            self.write_queued_records()?;
        }

        match self.board.fs.delete(file_id::APP_FIRM_IMAGE) {
            Ok(()) => info!("Stale application image removed"),
            Err(FsError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let next = if self.board.fs.stat(file_id::CONF_COMMANDS).is_ok() {
            let script = read_all(self.board.fs.as_mut(), file_id::CONF_COMMANDS)?;
            info!(bytes = script.len(), "Command script found");
            let events = self.session.event_sender();
            self.board
                .transport
                .init(BackendSelector::FsScript(script.into()), events)?;
            DeviceState::Provisioning
        } else if self.usb_plugged() {
            DeviceState::BatteryCharging
        } else if self.is_ready() {
            DeviceState::Operational
        } else {
            DeviceState::ProvisioningNeeded
        };
        Ok(next)
    }

    // =========================================================================
    // BatteryCharging
    // =========================================================================

    fn charging_enter(&mut self) {
        if self.board.transport.current_backend() == Backend::Usb {
            return;
        }

        self.terminate_transport();
        let events = self.session.event_sender();
        match self.board.transport.init(BackendSelector::Usb, events) {
            Ok(()) => self.usb_enum_started_ms = Some(self.board.now_ms()),
            Err(e) => error!(error = %e, "USB transport init failed"),
        }
    }

    fn charging_tick(&mut self) {
        self.session.poll(&mut self.board, &mut self.shared);
        if self.session.is_connected() {
            self.usb_enum_started_ms = None;
            self.mode.request(DeviceState::Provisioning);
        }

        if let Some(started) = self.usb_enum_started_ms {
            let elapsed = self.board.now_ms().saturating_sub(started);
            if elapsed >= self.settings.usb_enumeration_timeout_ms
                && self.board.transport.current_backend() == Backend::Usb
            {
                info!(elapsed, "USB not enumerated, transport off");
                self.usb_enum_started_ms = None;
                self.terminate_transport();
            }
        }

        if !self.usb_plugged() {
            let next = if self.is_ready() {
                DeviceState::Operational
            } else {
                DeviceState::ProvisioningNeeded
            };
            self.mode.request(next);

            if self.is_battery_low() {
                self.mode.request(DeviceState::BatteryLevelLow);
            }
            if self.board.transport.current_backend() == Backend::Usb {
                self.terminate_transport();
            }
        }
    }

    // =========================================================================
    // Provisioning
    // =========================================================================

    fn provisioning_tick(&mut self) {
        let colour = if self.is_ready() {
            LedColour::Green
        } else {
            LedColour::Red
        };
        self.board.peripherals.set_led(LedPattern::Solid(colour));

        self.session.poll(&mut self.board, &mut self.shared);

        if self.session.is_connected() {
            self.session.tick(&mut self.board, &mut self.shared);
            return;
        }

        let next = if self.is_ready() {
            DeviceState::Operational
        } else {
            DeviceState::ProvisioningNeeded
        };
        self.mode.request(next);
        if self.usb_plugged() {
            self.mode.request(DeviceState::BatteryCharging);
        }
        if self.is_battery_low() {
            self.mode.request(DeviceState::BatteryLevelLow);
        }
    }

    fn provisioning_exit(&mut self) {
        self.session.shutdown(&mut self.board, &mut self.shared);
        self.board.peripherals.set_led(LedPattern::Off);
        self.board.peripherals.cellular_power_off();
        self.close_file();

        if matches!(
            self.board.transport.current_backend(),
            Backend::Usb | Backend::FsScript
        ) {
            self.terminate_transport();
            // Deliver the disconnect so the script file is removed
            self.session.poll(&mut self.board, &mut self.shared);
        }
    }

    // =========================================================================
    // Operational
    // =========================================================================

    fn operational_enter(&mut self) {
        self.gps_off(false);

        if self.shared.log_file_created {
            match self.board.fs.open(file_id::LOG, FsMode::WriteOnly) {
                Ok(handle) => self.shared.file = Some(handle),
                Err(e) => error!(error = %e, "Storage error opening log file"),
            }
        }

        match self.write_startup_event() {
            Ok(()) => {}
            Err(FsError::FilesystemFull) => {
                warn!("Log file full");
                self.mode.request(DeviceState::LogFileFull);
            }
            Err(e) => error!(error = %e, "Storage error writing startup record"),
        }

        let now = self.board.now_ms();
        self.flush_deadline_ms = Some(now + self.settings.log_flush_period_s * 1000);
        self.battery_watermark = u8::MAX;
        self.sensor_logging = flag_enabled(self.board.config.as_ref(), tag::LOGGING_ENABLE);

        let from_host = matches!(
            self.mode.previous(),
            Some(DeviceState::Provisioning | DeviceState::BatteryCharging)
        );
        let config = self.board.config.as_ref();
        let tests = &mut self.shared.tests;

        if tests.gps == TestState::Request {
            tests.gps = if from_host && flag_enabled(config, tag::GPS_LOG_POSITION_ENABLE) {
                TestState::Waiting
            } else {
                TestState::Off
            };
        }
        if tests.cellular == TestState::Request {
            tests.cellular = if from_host && flag_enabled(config, tag::CELLULAR_ENABLE) {
                TestState::Waiting
            } else {
                TestState::Off
            };
        }
        tests.satellite = TestState::Off;
    }

    fn operational_tick(&mut self) {
        self.advance_tests();

        let mut battery_low = false;
        if let Ok(level) = self.board.peripherals.battery_level() {
            if level < self.battery_watermark {
                if flag_enabled(self.board.config.as_ref(), tag::BATTERY_LOG_ENABLE) {
                    self.push_log(&battery_record(level));
                }
                self.battery_watermark = level;
            }
            battery_low = self.is_battery_low();
        }

        if self.sensor_logging {
            if let Some(handle) = self.shared.file {
                match self.shared.log_queue.drain_to(self.board.fs.as_mut(), handle) {
                    Ok(_) => {}
                    Err(FsError::FilesystemFull) => {
                        warn!("Log file full");
                        self.mode.request(DeviceState::LogFileFull);
                    }
                    Err(e) => error!(error = %e, "Storage error writing log"),
                }
            }
        }

        let now = self.board.now_ms();
        if let Some(deadline) = self.flush_deadline_ms {
            if now >= deadline {
                if let Some(handle) = self.shared.file {
                    if let Err(e) = self.board.fs.flush(handle) {
                        error!(error = %e, "Storage error flushing log");
                    }
                }
                self.flush_deadline_ms = Some(now + self.settings.log_flush_period_s * 1000);
            }
        }

        self.session.poll(&mut self.board, &mut self.shared);
        if self.session.is_connected() {
            self.mode.request(DeviceState::Provisioning);
        }
        if self.usb_plugged() {
            self.mode.request(DeviceState::BatteryCharging);
        }
        if battery_low {
            self.mode.request(DeviceState::BatteryLevelLow);
        }
    }

    /// Field-test progress for the GPS and cellular modules
    fn advance_tests(&mut self) {
        if self.shared.tests.gps == TestState::Waiting {
            info!("GPS field test active");
            self.shared.tests.gps = TestState::Active;
            self.gps_on();
        }

        let now = self.board.now_ms();
        match self.shared.tests.cellular {
            TestState::Waiting => {
                self.board.peripherals.cellular_power_on();
                self.board.peripherals.set_led(LedPattern::Blink {
                    colour: LedColour::Yellow,
                    period_ms: CELLULAR_TEST_BLINK_MS,
                });
                self.shared.tests.cellular = TestState::Active;
            }
            TestState::Active => {
                let colour = match self.board.peripherals.cellular_sync_comms() {
                    Ok(()) => {
                        info!("Cellular field test passed");
                        LedColour::Green
                    }
                    Err(e) => {
                        warn!(error = %e, "Cellular field test failed");
                        LedColour::Red
                    }
                };
                self.board.peripherals.cellular_power_off();
                self.board.peripherals.set_led(LedPattern::Solid(colour));
                self.cellular_test_deadline_ms = Some(now + self.settings.led_duration_ms);
                self.shared.tests.cellular = TestState::Finishing;
            }
            TestState::Finishing => {
                if self.cellular_test_deadline_ms.map_or(true, |deadline| now >= deadline) {
                    self.board.peripherals.set_led(LedPattern::Off);
                    self.cellular_test_deadline_ms = None;
                    self.shared.tests.cellular = TestState::Off;
                }
            }
            TestState::Off | TestState::Request => {}
        }
    }

    fn operational_exit(&mut self) {
        self.close_file();
        self.gps_off(true);
        self.board.peripherals.set_led(LedPattern::Off);
        self.shared.tests.all_off();
        self.flush_deadline_ms = None;
        self.cellular_test_deadline_ms = None;
        self.sensor_logging = false;
    }
}
