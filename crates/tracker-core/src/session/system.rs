//! Status, battery, reset and field-test requests

use tracing::{info, warn};

use super::SessionController;
use crate::error::SessionError;
use crate::hal::Board;
use crate::protocol::{reset_type, test_flag, ErrorCode, Response, StatusReport};
use crate::shared::{RebootRequest, SharedState, TestState};

impl SessionController {
    pub(super) fn status(&mut self, board: &mut Board) -> Result<(), SessionError> {
        let peripherals = board.peripherals.as_mut();
        let cellular_detected = peripherals.cellular_detected();

        let mut report = StatusReport {
            error_code: ErrorCode::NoError,
            firmware_version: self.settings.firmware_version,
            ble_firmware_version: peripherals.ble_firmware_version(),
            configuration_format_version: self.settings.configuration_format_version,
            device_uid: peripherals.device_uid(),
            gps_detected: peripherals.gps_detected(),
            cellular_detected,
            satellite_detected: false,
            ..StatusReport::default()
        };

        if cellular_detected {
            match peripherals.sim_imsi() {
                Ok(Some(imsi)) => {
                    report.sim_present = true;
                    report.sim_imsi = imsi;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Could not read SIM IMSI"),
            }
        }

        self.respond(board, &Response::Status(report))
    }

    pub(super) fn reset(
        &mut self,
        kind: u8,
        board: &mut Board,
        shared: &mut SharedState,
    ) -> Result<(), SessionError> {
        let (error_code, reboot) = match kind {
            reset_type::APP => (ErrorCode::NoError, Some(RebootRequest::App)),
            reset_type::FLASH_ERASE_ALL => {
                if let Some(handle) = shared.file.take() {
                    board.fs.close(handle)?;
                }
                board.fs.format()?;
                shared.log_file_created = false;
                info!("Filesystem formatted");
                (ErrorCode::NoError, None)
            }
            reset_type::DFU => (ErrorCode::NoError, Some(RebootRequest::Dfu)),
            other => {
                warn!(reset_type = other, "Unknown reset type");
                (ErrorCode::InvalidParameter, None)
            }
        };

        self.respond(board, &Response::generic(error_code))?;
        if let Some(reboot) = reboot {
            info!(?reboot, "Reboot requested");
            shared.reboot = Some(reboot);
        }
        Ok(())
    }

    pub(super) fn battery_status(&mut self, board: &mut Board) -> Result<(), SessionError> {
        let peripherals = board.peripherals.as_mut();
        let charging = peripherals.usb_plugged();
        let level = peripherals.battery_level().unwrap_or_else(|e| {
            warn!(error = %e, "Battery level read failed");
            0xFF
        });
        let millivolts = peripherals.battery_millivolts().unwrap_or_else(|e| {
            warn!(error = %e, "Battery voltage read failed");
            0
        });

        self.respond(
            board,
            &Response::BatteryStatus {
                error_code: ErrorCode::NoError,
                charging,
                level,
                millivolts,
            },
        )
    }

    pub(super) fn test(
        &mut self,
        device_flags: u8,
        board: &mut Board,
        shared: &mut SharedState,
    ) -> Result<(), SessionError> {
        let tests = &mut shared.tests;
        for (flag, state) in [
            (test_flag::GPS, &mut tests.gps),
            (test_flag::CELLULAR, &mut tests.cellular),
            (test_flag::SATELLITE, &mut tests.satellite),
        ] {
            if device_flags & flag != 0 {
                *state = TestState::Request;
            } else if *state == TestState::Request {
                *state = TestState::Off;
            }
        }
        info!(tests = ?shared.tests, "Field tests updated");

        self.respond(board, &Response::generic(ErrorCode::NoError))
    }
}
