//! Configuration tag transfers and store maintenance
//!
//! Tag data travels as packed `id (u16 LE) + value` records. A read-all
//! response announces the total size first, then streams whole records in
//! packet-sized chunks; a record is never split across packets on the way
//! out. Writes may split records anywhere and are reassembled in a
//! [`TagScratch`].

use tracing::{debug, info, warn};

use super::SessionController;
use crate::context::{TagScratch, TransferContext, CFG_ID_SIZE, CFG_SCRATCH_SIZE};
use crate::error::SessionError;
use crate::hal::{file_id, Board, ConfigStore, ConfigStoreError, FsError, TagCursor};
use crate::protocol::{ErrorCode, Response, CFG_TAG_ALL};

/// Encoded record for `tag`, or `None` if it is unset or cannot fit a packet
fn record(config: &dyn ConfigStore, tag: u16, packet_size: usize) -> Option<Vec<u8>> {
    let value = config.get(tag).ok()?;
    if value.is_empty() || CFG_ID_SIZE + value.len() > packet_size {
        return None;
    }

    let mut record = Vec::with_capacity(CFG_ID_SIZE + value.len());
    record.extend_from_slice(&tag.to_le_bytes());
    record.extend_from_slice(value);
    Some(record)
}

/// Dry run over every tag: total bytes a read-all will stream
fn total_size(config: &dyn ConfigStore, packet_size: usize) -> u32 {
    let mut cursor = TagCursor::new();
    let mut total = 0u32;
    while let Some(tag) = config.iterate(&mut cursor) {
        if let Some(record) = record(config, tag, packet_size) {
            total += record.len() as u32;
        }
    }
    total
}

/// Fill one packet with whole records starting at `cursor`
fn populate(config: &dyn ConfigStore, cursor: &mut TagCursor, packet_size: usize) -> Vec<u8> {
    let mut packet = Vec::with_capacity(packet_size);
    while let Some(tag) = config.iterate(cursor) {
        let Some(record) = record(config, tag, packet_size) else {
            continue;
        };
        if packet.len() + record.len() > packet_size {
            cursor.rewind();
            break;
        }
        packet.extend_from_slice(&record);
    }
    packet
}

impl SessionController {
    pub(super) fn cfg_read(&mut self, tag: u16, board: &mut Board) -> Result<(), SessionError> {
        let packet_size = self.settings.packet_size;
        let config = board.config.as_ref();
        let mut cursor = TagCursor::new();

        let (error_code, data) = if tag == CFG_TAG_ALL {
            let total = total_size(config, packet_size);
            debug!(total, "Reading all configuration tags");
            (ErrorCode::NoError, (total, populate(config, &mut cursor, packet_size)))
        } else {
            match config.get(tag) {
                Ok(_) => {
                    let data = record(config, tag, packet_size).unwrap_or_default();
                    (ErrorCode::NoError, (data.len() as u32, data))
                }
                Err(ConfigStoreError::InvalidTag(_)) => {
                    (ErrorCode::InvalidConfigTag, (0, Vec::new()))
                }
                Err(ConfigStoreError::NotSet(_)) => (ErrorCode::ConfigTagNotSet, (0, Vec::new())),
                Err(e) => return Err(SessionError::BadConfig(e)),
            }
        };
        let (length, first) = data;

        self.stage(&Response::CfgReadResp { error_code, length }.encode())?;
        if length > 0 {
            self.stage(&first)?;
        }
        self.send_pending(board)?;

        if length > 0 {
            self.enter(
                TransferContext::CfgRead {
                    remaining: length,
                    cursor,
                    staged: first.len(),
                },
                board,
            );
        }
        Ok(())
    }

    pub(super) fn cfg_read_next(&mut self, board: &mut Board) -> Result<(), SessionError> {
        let TransferContext::CfgRead {
            remaining,
            mut cursor,
            staged,
        } = self.context
        else {
            return Ok(());
        };

        self.send_pending(board)?;
        self.touch(board);

        let remaining = remaining.saturating_sub(staged as u32);
        if remaining == 0 {
            self.go_idle();
            return Ok(());
        }

        let next = populate(board.config.as_ref(), &mut cursor, self.settings.packet_size);
        if next.is_empty() {
            warn!(remaining, "Configuration changed during read, ending transfer");
            self.go_idle();
            return Ok(());
        }

        self.context = TransferContext::CfgRead {
            remaining,
            cursor,
            staged: next.len(),
        };
        self.stage(&next)
    }

    pub(super) fn cfg_write(&mut self, length: u32, board: &mut Board) -> Result<(), SessionError> {
        if length == 0 {
            return Err(SessionError::PacketWrongSize);
        }

        self.respond(board, &Response::generic(ErrorCode::NoError))?;
        self.enter(
            TransferContext::CfgWrite {
                remaining: length,
                scratch: TagScratch::default(),
            },
            board,
        );
        self.queue_receive_stream(board, length)
    }

    pub(super) fn cfg_write_next(&mut self, board: &mut Board) -> Result<(), SessionError> {
        let remaining = match &self.context {
            TransferContext::CfgWrite { remaining, .. } => *remaining,
            _ => return Ok(()),
        };

        let Some(packet) = self.take_received()? else {
            return self.queue_receive_stream(board, remaining);
        };

        let TransferContext::CfgWrite {
            mut remaining,
            mut scratch,
        } = std::mem::take(&mut self.context)
        else {
            return Ok(());
        };

        if packet.len() as u32 > remaining {
            self.context = TransferContext::CfgWriteError {
                error_code: ErrorCode::DataOversize,
            };
            return Err(SessionError::PacketWrongSize);
        }

        let mut data = &packet[..];
        loop {
            let Some(tag) = scratch.tag() else {
                if data.is_empty() {
                    break;
                }
                let take = (CFG_ID_SIZE - scratch.occupancy).min(data.len());
                let at = scratch.occupancy;
                scratch.buffer[at..at + take].copy_from_slice(&data[..take]);
                scratch.occupancy += take;
                data = &data[take..];
                continue;
            };

            let size = match board.config.size(tag) {
                Ok(size) if CFG_ID_SIZE + size <= CFG_SCRATCH_SIZE => size,
                Ok(size) => {
                    self.context = TransferContext::CfgWriteError {
                        error_code: ErrorCode::InvalidConfigTag,
                    };
                    return Err(SessionError::BadConfig(ConfigStoreError::InvalidLength {
                        tag,
                        expected: CFG_SCRATCH_SIZE - CFG_ID_SIZE,
                        actual: size,
                    }));
                }
                Err(e) => {
                    self.context = TransferContext::CfgWriteError {
                        error_code: ErrorCode::InvalidConfigTag,
                    };
                    return Err(SessionError::BadConfig(e));
                }
            };

            let record_len = CFG_ID_SIZE + size;
            if scratch.occupancy == record_len {
                board
                    .config
                    .set(tag, &scratch.buffer[CFG_ID_SIZE..record_len])
                    .map_err(SessionError::BadConfig)?;
                debug!(tag = format!("0x{:04X}", tag), size, "Configuration tag written");
                remaining = remaining.saturating_sub(record_len as u32);
                scratch.clear();
                continue;
            }

            if data.is_empty() {
                break;
            }
            let take = (record_len - scratch.occupancy).min(data.len());
            let at = scratch.occupancy;
            scratch.buffer[at..at + take].copy_from_slice(&data[..take]);
            scratch.occupancy += take;
            data = &data[take..];
        }

        if remaining == 0 {
            info!("Configuration write complete");
            return self.respond(
                board,
                &Response::CfgWriteCnf {
                    error_code: ErrorCode::NoError,
                },
            );
        }

        self.context = TransferContext::CfgWrite { remaining, scratch };
        self.touch(board);
        self.queue_receive_stream(board, remaining)
    }

    pub(super) fn cfg_write_error(&mut self, board: &mut Board) -> Result<(), SessionError> {
        let TransferContext::CfgWriteError { error_code } = self.context else {
            return Ok(());
        };

        self.respond(board, &Response::CfgWriteCnf { error_code })?;
        self.go_idle();
        Ok(())
    }

    pub(super) fn cfg_save(&mut self, board: &mut Board) -> Result<(), SessionError> {
        board.config.save(board.fs.as_mut())?;
        info!("Configuration saved");
        self.respond(board, &Response::generic(ErrorCode::NoError))
    }

    pub(super) fn cfg_restore(&mut self, board: &mut Board) -> Result<(), SessionError> {
        let error_code = match board.config.load(board.fs.as_mut()) {
            Ok(()) => ErrorCode::NoError,
            Err(ConfigStoreError::NoValidConfigFile) => ErrorCode::FileNotFound,
            Err(e) => return Err(e.into()),
        };
        self.respond(board, &Response::generic(error_code))
    }

    pub(super) fn cfg_erase(&mut self, tag: u16, board: &mut Board) -> Result<(), SessionError> {
        let error_code = if tag == CFG_TAG_ALL {
            let mut cursor = TagCursor::new();
            let mut tags = Vec::new();
            while let Some(tag) = board.config.iterate(&mut cursor) {
                tags.push(tag);
            }
            for tag in tags {
                match board.config.unset(tag) {
                    Ok(()) | Err(ConfigStoreError::NotSet(_)) => {}
                    Err(e) => return Err(SessionError::BadConfig(e)),
                }
            }
            ErrorCode::NoError
        } else {
            match board.config.unset(tag) {
                Ok(()) | Err(ConfigStoreError::NotSet(_)) => ErrorCode::NoError,
                Err(ConfigStoreError::InvalidTag(_)) => ErrorCode::InvalidConfigTag,
                Err(e) => return Err(SessionError::BadConfig(e)),
            }
        };
        self.respond(board, &Response::generic(error_code))
    }

    pub(super) fn cfg_protect(&mut self, board: &mut Board) -> Result<(), SessionError> {
        let result = board.fs.protect(file_id::CONF_PRIMARY);
        self.respond(board, &Response::generic(file_result_code(result)?))
    }

    pub(super) fn cfg_unprotect(&mut self, board: &mut Board) -> Result<(), SessionError> {
        let result = board.fs.unprotect(file_id::CONF_PRIMARY);
        self.respond(board, &Response::generic(file_result_code(result)?))
    }
}

fn file_result_code(result: Result<(), FsError>) -> Result<ErrorCode, SessionError> {
    match result {
        Ok(()) => Ok(ErrorCode::NoError),
        Err(FsError::NotFound) => Ok(ErrorCode::FileNotFound),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{MemoryConfigStore, TagDef};

    fn store() -> MemoryConfigStore {
        let mut store = MemoryConfigStore::new(vec![
            TagDef::new(0x0001, 4, false),
            TagDef::new(0x0002, 1, false),
            TagDef::new(0x0003, 8, false),
        ]);
        store.set(0x0001, &[1, 2, 3, 4]).unwrap();
        store.set(0x0003, &[9; 8]).unwrap();
        store
    }

    #[test]
    fn test_total_size_skips_unset_tags() {
        assert_eq!(total_size(&store(), 512), 6 + 10);
    }

    #[test]
    fn test_populate_keeps_records_whole() {
        let store = store();
        let mut cursor = TagCursor::new();

        let first = populate(&store, &mut cursor, 12);
        assert_eq!(first, vec![0x01, 0x00, 1, 2, 3, 4]);

        let second = populate(&store, &mut cursor, 12);
        assert_eq!(second.len(), 10);
        assert_eq!(&second[..2], &[0x03, 0x00]);

        assert!(populate(&store, &mut cursor, 12).is_empty());
    }
}
