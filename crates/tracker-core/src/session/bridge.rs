//! Raw byte bridging between the host and the GPS or cellular module

use tracing::{debug, info, warn};

use super::SessionController;
use crate::context::TransferContext;
use crate::error::SessionError;
use crate::hal::{Board, PeripheralError};
use crate::protocol::{ErrorCode, Response};

impl SessionController {
    // =========================================================================
    // GPS
    // =========================================================================

    pub(super) fn gps_config(
        &mut self,
        enable: bool,
        board: &mut Board,
    ) -> Result<(), SessionError> {
        self.gps_bridging = enable;
        if enable {
            board.peripherals.gps_flush_rx();
        }
        info!(enable, "GPS bridging");
        self.respond(board, &Response::generic(ErrorCode::NoError))
    }

    pub(super) fn gps_write(&mut self, length: u32, board: &mut Board) -> Result<(), SessionError> {
        if !self.gps_bridging {
            return self.respond(board, &Response::generic(ErrorCode::BridgingDisabled));
        }

        self.respond(board, &Response::generic(ErrorCode::NoError))?;
        if length > 0 {
            self.enter(TransferContext::GpsWrite { remaining: length }, board);
            self.queue_receive_stream(board, length)?;
        }
        Ok(())
    }

    pub(super) fn gps_write_next(&mut self, board: &mut Board) -> Result<(), SessionError> {
        let TransferContext::GpsWrite { remaining } = self.context else {
            return Ok(());
        };

        let Some(packet) = self.take_received()? else {
            return self.queue_receive_stream(board, remaining);
        };

        if packet.len() as u32 > remaining {
            self.go_idle();
            return Err(SessionError::PacketWrongSize);
        }

        if let Err(e) = board.peripherals.gps_send_raw(&packet) {
            self.go_idle();
            return Err(SessionError::Gps(e));
        }

        let remaining = remaining - packet.len() as u32;
        if remaining == 0 {
            debug!("GPS write complete");
            self.go_idle();
            return Ok(());
        }

        self.context = TransferContext::GpsWrite { remaining };
        self.touch(board);
        self.queue_receive_stream(board, remaining)
    }

    pub(super) fn gps_read(&mut self, length: u32, board: &mut Board) -> Result<(), SessionError> {
        if !self.gps_bridging {
            return self.respond(
                board,
                &Response::GpsReadResp {
                    error_code: ErrorCode::BridgingDisabled,
                    length: 0,
                },
            );
        }

        let available = board.peripherals.gps_available() as u32;
        let length = available.min(length);
        self.respond(
            board,
            &Response::GpsReadResp {
                error_code: ErrorCode::NoError,
                length,
            },
        )?;

        if length > 0 {
            self.enter(TransferContext::GpsRead { remaining: length }, board);
        }
        Ok(())
    }

    pub(super) fn gps_read_next(&mut self, board: &mut Board) -> Result<(), SessionError> {
        let TransferContext::GpsRead { remaining } = self.context else {
            return Ok(());
        };

        let sent = self.send_filled(board, remaining as usize, |board, buf| {
            board.peripherals.gps_receive_raw(buf).map_err(SessionError::Gps)
        });
        let sent = match sent {
            Ok(sent) => sent as u32,
            Err(e @ SessionError::Gps(_)) => {
                self.go_idle();
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        if sent == 0 {
            return Ok(());
        }

        let remaining = remaining.saturating_sub(sent);
        if remaining == 0 {
            self.go_idle();
        } else {
            self.context = TransferContext::GpsRead { remaining };
        }
        self.touch(board);
        Ok(())
    }

    // =========================================================================
    // Cellular
    // =========================================================================

    /// Bridging off and modem down after a cellular failure
    fn cellular_failed(&mut self, board: &mut Board, err: PeripheralError) -> SessionError {
        warn!(error = %err, "Cellular bridge failed, powering modem off");
        self.cellular_bridging = false;
        board.peripherals.cellular_power_off();
        self.go_idle();
        SessionError::Cellular(err)
    }

    pub(super) fn cellular_config(
        &mut self,
        enable: bool,
        board: &mut Board,
    ) -> Result<(), SessionError> {
        let error_code = if enable {
            match board.peripherals.cellular_sync_comms() {
                Ok(()) => {
                    self.cellular_bridging = true;
                    ErrorCode::NoError
                }
                Err(e) => {
                    warn!(error = %e, "Cellular modem did not respond");
                    self.cellular_bridging = false;
                    ErrorCode::CellularComms
                }
            }
        } else {
            self.cellular_bridging = false;
            ErrorCode::NoError
        };

        info!(enable = self.cellular_bridging, "Cellular bridging");
        self.respond(board, &Response::generic(error_code))
    }

    pub(super) fn cellular_write(
        &mut self,
        length: u32,
        board: &mut Board,
    ) -> Result<(), SessionError> {
        if !self.cellular_bridging {
            return self.respond(board, &Response::generic(ErrorCode::BridgingDisabled));
        }

        self.respond(board, &Response::generic(ErrorCode::NoError))?;
        if length > 0 {
            self.enter(TransferContext::CellularWrite { remaining: length }, board);
            self.queue_receive_stream(board, length)?;
        }
        Ok(())
    }

    pub(super) fn cellular_write_next(&mut self, board: &mut Board) -> Result<(), SessionError> {
        let TransferContext::CellularWrite { remaining } = self.context else {
            return Ok(());
        };

        let Some(packet) = self.take_received()? else {
            return self.queue_receive_stream(board, remaining);
        };

        if packet.len() as u32 > remaining {
            self.cellular_bridging = false;
            board.peripherals.cellular_power_off();
            self.go_idle();
            return Err(SessionError::PacketWrongSize);
        }

        if let Err(e) = board.peripherals.cellular_send_raw(&packet) {
            return Err(self.cellular_failed(board, e));
        }

        let remaining = remaining - packet.len() as u32;
        if remaining == 0 {
            debug!("Cellular write complete");
            self.go_idle();
            return Ok(());
        }

        self.context = TransferContext::CellularWrite { remaining };
        self.touch(board);
        self.queue_receive_stream(board, remaining)
    }

    pub(super) fn cellular_read(
        &mut self,
        length: u32,
        board: &mut Board,
    ) -> Result<(), SessionError> {
        if !self.cellular_bridging {
            return self.respond(
                board,
                &Response::CellularReadResp {
                    error_code: ErrorCode::BridgingDisabled,
                    length: 0,
                },
            );
        }

        let available = board.peripherals.cellular_available() as u32;
        let length = available.min(length);
        self.respond(
            board,
            &Response::CellularReadResp {
                error_code: ErrorCode::NoError,
                length,
            },
        )?;

        if length > 0 {
            self.enter(TransferContext::CellularRead { remaining: length }, board);
        }
        Ok(())
    }

    pub(super) fn cellular_read_next(&mut self, board: &mut Board) -> Result<(), SessionError> {
        let TransferContext::CellularRead { remaining } = self.context else {
            return Ok(());
        };

        let sent = self.send_filled(board, remaining as usize, |board, buf| {
            board.peripherals.cellular_receive_raw(buf).map_err(SessionError::Cellular)
        });
        let sent = match sent {
            Ok(sent) => sent as u32,
            Err(SessionError::Cellular(e)) => return Err(self.cellular_failed(board, e)),
            Err(e) => return Err(e),
        };
        if sent == 0 {
            return Ok(());
        }

        let remaining = remaining.saturating_sub(sent);
        if remaining == 0 {
            self.go_idle();
        } else {
            self.context = TransferContext::CellularRead { remaining };
        }
        self.touch(board);
        Ok(())
    }
}
