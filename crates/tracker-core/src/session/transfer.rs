//! File and flash transfers: firmware images, the sensor log, raw flash

use tracing::{debug, info, warn};

use super::SessionController;
use crate::context::{Crc32Accumulator, TransferContext};
use crate::error::SessionError;
use crate::hal::{file_id, Board, FsError, FsMode};
use crate::protocol::{image_type, log_mode, ErrorCode, Response};
use crate::shared::SharedState;

impl SessionController {
    /// Close and delete a partially received image
    pub(super) fn discard_image(&mut self, board: &mut Board, shared: &mut SharedState) {
        if let Some(handle) = shared.file.take() {
            if let Err(e) = board.fs.close(handle) {
                debug!(error = %e, "Close of partial image failed");
            }
        }
        match board.fs.delete(file_id::ARTIC_FIRM_IMAGE) {
            Ok(()) => info!("Partial firmware image deleted"),
            Err(FsError::NotFound) => {}
            Err(e) => warn!(error = %e, "Failed to delete partial firmware image"),
        }
    }

    fn close_shared_file(board: &mut Board, shared: &mut SharedState) -> Result<(), FsError> {
        match shared.file.take() {
            Some(handle) => board.fs.close(handle),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Firmware images
    // =========================================================================

    pub(super) fn fw_send_image(
        &mut self,
        kind: u8,
        length: u32,
        crc32: u32,
        board: &mut Board,
        shared: &mut SharedState,
    ) -> Result<(), SessionError> {
        if kind != image_type::ARTIC {
            return self.respond(board, &Response::generic(ErrorCode::InvalidFwImageType));
        }

        match board.fs.delete(file_id::ARTIC_FIRM_IMAGE) {
            Ok(()) | Err(FsError::NotFound) => {}
            Err(FsError::Protected) => {
                return self.respond(board, &Response::generic(ErrorCode::ConfigProtected));
            }
            Err(e) => return Err(e.into()),
        }

        Self::close_shared_file(board, shared)?;
        shared.file = Some(board.fs.open(file_id::ARTIC_FIRM_IMAGE, FsMode::Create)?);

        self.respond(board, &Response::generic(ErrorCode::NoError))?;
        info!(length, crc32 = format!("0x{:08X}", crc32), "Receiving firmware image");

        self.enter(
            TransferContext::FwSendImage {
                remaining: length,
                crc: Crc32Accumulator::new(),
                expected_crc: crc32,
            },
            board,
        );
        if length > 0 {
            self.queue_receive_stream(board, length)?;
        }
        Ok(())
    }

    pub(super) fn fw_send_image_next(
        &mut self,
        board: &mut Board,
        shared: &mut SharedState,
    ) -> Result<(), SessionError> {
        let remaining = match &self.context {
            TransferContext::FwSendImage { remaining, .. } => *remaining,
            _ => return Ok(()),
        };

        if remaining > 0 {
            let Some(packet) = self.take_received()? else {
                return self.queue_receive_stream(board, remaining);
            };

            // Failures below leave the context in place so the abort path
            // deletes the partial image
            if packet.len() as u32 > remaining {
                return Err(SessionError::PacketWrongSize);
            }
            let handle = shared.file.ok_or(SessionError::Fs(FsError::InvalidHandle))?;
            board.fs.write(handle, &packet)?;

            let remaining = remaining - packet.len() as u32;
            if let TransferContext::FwSendImage {
                remaining: left,
                crc,
                ..
            } = &mut self.context
            {
                crc.update(&packet);
                *left = remaining;
            }

            self.touch(board);
            if remaining > 0 {
                return self.queue_receive_stream(board, remaining);
            }
        }

        let TransferContext::FwSendImage {
            crc, expected_crc, ..
        } = std::mem::take(&mut self.context)
        else {
            return Ok(());
        };

        if let Err(e) = Self::close_shared_file(board, shared) {
            self.discard_image(board, shared);
            return Err(e.into());
        }

        let actual = crc.finalize();
        let error_code = if actual == expected_crc {
            info!(crc32 = format!("0x{:08X}", actual), "Firmware image received");
            ErrorCode::NoError
        } else {
            warn!(
                expected = format!("0x{:08X}", expected_crc),
                actual = format!("0x{:08X}", actual),
                "Firmware image CRC mismatch"
            );
            self.discard_image(board, shared);
            ErrorCode::ImageCrcMismatch
        };

        self.respond(board, &Response::FwSendImageCompleteCnf { error_code })
    }

    pub(super) fn fw_apply_image(
        &mut self,
        kind: u8,
        board: &mut Board,
    ) -> Result<(), SessionError> {
        warn!(image_type = kind, "Applying firmware images is not supported");
        self.respond(board, &Response::generic(ErrorCode::InvalidFwImageType))
    }

    // =========================================================================
    // Sensor log file
    // =========================================================================

    pub(super) fn log_create(
        &mut self,
        mode: u8,
        sync_enable: bool,
        board: &mut Board,
        shared: &mut SharedState,
    ) -> Result<(), SessionError> {
        let fs_mode = match mode {
            log_mode::FILL => FsMode::Create,
            log_mode::CIRCULAR => FsMode::CreateCircular,
            other => {
                debug!(mode = other, "Unknown log mode");
                return self.respond(board, &Response::generic(ErrorCode::InvalidParameter));
            }
        };

        let error_code = match board.fs.open(file_id::LOG, fs_mode) {
            Ok(handle) => {
                board.fs.close(handle)?;
                shared.log_file_created = true;
                shared.log_queue.reset();
                info!(?fs_mode, sync_enable, "Log file created");
                ErrorCode::NoError
            }
            Err(FsError::AlreadyExists) => ErrorCode::FileAlreadyExists,
            Err(e) => return Err(e.into()),
        };
        self.respond(board, &Response::generic(error_code))
    }

    pub(super) fn log_erase(
        &mut self,
        board: &mut Board,
        shared: &mut SharedState,
    ) -> Result<(), SessionError> {
        let error_code = match board.fs.delete(file_id::LOG) {
            Ok(()) => {
                shared.log_file_created = false;
                info!("Log file erased");
                ErrorCode::NoError
            }
            Err(FsError::NotFound) => ErrorCode::FileNotFound,
            Err(FsError::Protected) => ErrorCode::ConfigProtected,
            Err(e) => return Err(e.into()),
        };
        self.respond(board, &Response::generic(error_code))
    }

    pub(super) fn log_read(
        &mut self,
        start_offset: u32,
        length: u32,
        board: &mut Board,
        shared: &mut SharedState,
    ) -> Result<(), SessionError> {
        let reject = |error_code| Response::LogReadResp { error_code, length: 0 };

        let stat = match board.fs.stat(file_id::LOG) {
            Ok(stat) => stat,
            Err(FsError::NotFound) => return self.respond(board, &reject(ErrorCode::FileNotFound)),
            Err(e) => return Err(e.into()),
        };

        let (offset, length) = if start_offset == 0 && length == 0 {
            (0, stat.size)
        } else {
            (start_offset, length)
        };
        if offset > stat.size {
            return self.respond(board, &reject(ErrorCode::InvalidParameter));
        }
        let length = length.min(stat.size - offset);

        if length > 0 {
            Self::close_shared_file(board, shared)?;
            let handle = board.fs.open(file_id::LOG, FsMode::ReadOnly)?;
            shared.file = Some(handle);
            board.fs.seek(handle, offset)?;
        }

        self.respond(
            board,
            &Response::LogReadResp {
                error_code: ErrorCode::NoError,
                length,
            },
        )?;
        debug!(offset, length, "Reading log file");

        if length > 0 {
            self.enter(TransferContext::LogRead { remaining: length }, board);
        }
        Ok(())
    }

    pub(super) fn log_read_next(
        &mut self,
        board: &mut Board,
        shared: &mut SharedState,
    ) -> Result<(), SessionError> {
        let TransferContext::LogRead { remaining } = self.context else {
            return Ok(());
        };
        let handle = shared.file.ok_or(SessionError::Fs(FsError::InvalidHandle))?;

        let sent = self.send_filled(board, remaining as usize, |board, buf| {
            match board.fs.read(handle, buf)? {
                0 => Err(SessionError::Fs(FsError::Io("unexpected end of log file".into()))),
                n => Ok(n),
            }
        })? as u32;

        let remaining = remaining.saturating_sub(sent);
        self.touch(board);
        if remaining > 0 {
            self.context = TransferContext::LogRead { remaining };
            return Ok(());
        }

        self.go_idle();
        Self::close_shared_file(board, shared)?;
        Ok(())
    }

    // =========================================================================
    // Raw flash
    // =========================================================================

    pub(super) fn flash_download(&mut self, board: &mut Board) -> Result<(), SessionError> {
        let length = board.peripherals.flash_size();
        self.respond(
            board,
            &Response::FlashDownloadResp {
                error_code: ErrorCode::NoError,
                length,
            },
        )?;

        if length > 0 {
            info!(length, "Flash download started");
            self.enter(
                TransferContext::FlashDownload {
                    address: 0,
                    remaining: length,
                },
                board,
            );
        }
        Ok(())
    }

    pub(super) fn flash_download_next(&mut self, board: &mut Board) -> Result<(), SessionError> {
        let TransferContext::FlashDownload { address, remaining } = self.context else {
            return Ok(());
        };

        let sent = self.send_filled(board, remaining as usize, |board, buf| {
            board
                .peripherals
                .flash_read(address, buf)
                .map_err(SessionError::Flash)?;
            Ok(buf.len())
        })? as u32;

        let remaining = remaining.saturating_sub(sent);
        self.touch(board);
        if remaining == 0 {
            debug!("Flash download complete");
            self.go_idle();
        } else {
            self.context = TransferContext::FlashDownload {
                address: address + sent,
                remaining,
            };
        }
        Ok(())
    }
}
