//! Configuration store over a fixed tag table
//!
//! Saved files hold the set tags followed by a CRC32 trailer:
//!
//! ```text
//! +---------+-------+----------------------------------+--------+
//! | version | count | count x (id u16, len u8, value)  | crc32  |
//! +---------+-------+----------------------------------+--------+
//! ```

use bytes::{Buf, BufMut};
use tracing::{debug, warn};

use crate::context::crc32;
use crate::hal::config_store::tag;
use crate::hal::fs::read_all;
use crate::hal::{file_id, ConfigStore, ConfigStoreError, FileSystem, FsError, FsMode, TagCursor};

const FILE_VERSION: u8 = 1;

/// One entry of the tag table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagDef {
    pub id: u16,
    pub size: usize,
    pub required: bool,
}

impl TagDef {
    pub const fn new(id: u16, size: usize, required: bool) -> Self {
        Self { id, size, required }
    }
}

/// Tags read by the control core
pub fn default_tags() -> Vec<TagDef> {
    vec![
        TagDef::new(tag::GPS_LOG_POSITION_ENABLE, 1, false),
        TagDef::new(tag::GPS_DEBUG_LOGGING_ENABLE, 1, false),
        TagDef::new(tag::LOGGING_ENABLE, 1, true),
        TagDef::new(tag::LOGGING_GROUP_SENSOR_READINGS_ENABLE, 1, false),
        TagDef::new(tag::LOGGING_DATE_TIME_STAMP_ENABLE, 1, false),
        TagDef::new(tag::BATTERY_LOG_ENABLE, 1, false),
        TagDef::new(tag::BATTERY_LOW_THRESHOLD, 1, false),
        TagDef::new(tag::BLUETOOTH_LOG_ENABLE, 1, false),
        TagDef::new(tag::CELLULAR_ENABLE, 1, false),
    ]
}

#[derive(Debug, Clone)]
struct Entry {
    def: TagDef,
    value: Option<Vec<u8>>,
}

/// In-memory tag store, iterated in ascending tag order
#[derive(Debug, Clone)]
pub struct MemoryConfigStore {
    entries: Vec<Entry>,
}

impl MemoryConfigStore {
    pub fn new(mut tags: Vec<TagDef>) -> Self {
        tags.sort_by_key(|def| def.id);
        tags.dedup_by_key(|def| def.id);

        Self {
            entries: tags.into_iter().map(|def| Entry { def, value: None }).collect(),
        }
    }

    fn entry(&self, tag: u16) -> Result<&Entry, ConfigStoreError> {
        self.entries
            .binary_search_by_key(&tag, |e| e.def.id)
            .map(|i| &self.entries[i])
            .map_err(|_| ConfigStoreError::InvalidTag(tag))
    }

    fn entry_mut(&mut self, tag: u16) -> Result<&mut Entry, ConfigStoreError> {
        match self.entries.binary_search_by_key(&tag, |e| e.def.id) {
            Ok(i) => Ok(&mut self.entries[i]),
            Err(_) => Err(ConfigStoreError::InvalidTag(tag)),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let set: Vec<_> = self
            .entries
            .iter()
            .filter_map(|e| e.value.as_ref().map(|v| (e.def.id, v)))
            .collect();

        let mut buf = Vec::new();
        buf.put_u8(FILE_VERSION);
        buf.put_u16_le(set.len() as u16);
        for (id, value) in set {
            buf.put_u16_le(id);
            buf.put_u8(value.len() as u8);
            buf.put_slice(value);
        }
        let crc = crc32(&buf);
        buf.put_u32_le(crc);
        buf
    }

    fn decode(data: &[u8]) -> Option<Vec<(u16, Vec<u8>)>> {
        if data.len() < 7 {
            return None;
        }
        let (body, mut trailer) = data.split_at(data.len() - 4);
        if crc32(body) != trailer.get_u32_le() {
            return None;
        }

        let mut body = body;
        if body.get_u8() != FILE_VERSION {
            return None;
        }
        let count = body.get_u16_le();
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if body.remaining() < 3 {
                return None;
            }
            let id = body.get_u16_le();
            let len = body.get_u8() as usize;
            if body.remaining() < len {
                return None;
            }
            records.push((id, body[..len].to_vec()));
            body.advance(len);
        }
        Some(records)
    }
}

impl ConfigStore for MemoryConfigStore {
    fn iterate(&self, cursor: &mut TagCursor) -> Option<u16> {
        let id = self.entries.get(cursor.index())?.def.id;
        cursor.advance();
        Some(id)
    }

    fn get(&self, tag: u16) -> Result<&[u8], ConfigStoreError> {
        self.entry(tag)?
            .value
            .as_deref()
            .ok_or(ConfigStoreError::NotSet(tag))
    }

    fn set(&mut self, tag: u16, value: &[u8]) -> Result<(), ConfigStoreError> {
        let entry = self.entry_mut(tag)?;
        if value.len() != entry.def.size {
            return Err(ConfigStoreError::InvalidLength {
                tag,
                expected: entry.def.size,
                actual: value.len(),
            });
        }
        entry.value = Some(value.to_vec());
        Ok(())
    }

    fn unset(&mut self, tag: u16) -> Result<(), ConfigStoreError> {
        self.entry_mut(tag)?.value = None;
        Ok(())
    }

    fn is_required(&self, tag: u16) -> Result<bool, ConfigStoreError> {
        Ok(self.entry(tag)?.def.required)
    }

    fn is_set(&self, tag: u16) -> Result<bool, ConfigStoreError> {
        Ok(self.entry(tag)?.value.is_some())
    }

    fn size(&self, tag: u16) -> Result<usize, ConfigStoreError> {
        Ok(self.entry(tag)?.def.size)
    }

    fn save(&mut self, fs: &mut dyn FileSystem) -> Result<(), ConfigStoreError> {
        match fs.delete(file_id::CONF_PRIMARY) {
            Ok(()) | Err(FsError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let data = self.encode();
        let handle = fs.open(file_id::CONF_PRIMARY, FsMode::Create)?;
        let written = fs.write(handle, &data);
        fs.close(handle)?;
        written?;

        debug!(bytes = data.len(), "Configuration file written");
        Ok(())
    }

    fn load(&mut self, fs: &mut dyn FileSystem) -> Result<(), ConfigStoreError> {
        let data = match read_all(fs, file_id::CONF_PRIMARY) {
            Ok(data) => data,
            Err(FsError::NotFound) => return Err(ConfigStoreError::NoValidConfigFile),
            Err(e) => return Err(e.into()),
        };
        let records = Self::decode(&data).ok_or(ConfigStoreError::NoValidConfigFile)?;

        for entry in &mut self.entries {
            entry.value = None;
        }
        for (id, value) in records {
            if let Err(e) = self.set(id, &value) {
                warn!(tag = format!("0x{:04X}", id), error = %e, "Skipping stored tag");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::MemoryFileSystem;

    fn store() -> MemoryConfigStore {
        MemoryConfigStore::new(vec![
            TagDef::new(0x0200, 2, true),
            TagDef::new(0x0100, 1, false),
        ])
    }

    #[test]
    fn test_iterates_in_ascending_order() {
        let store = store();
        let mut cursor = TagCursor::new();

        assert_eq!(store.iterate(&mut cursor), Some(0x0100));
        assert_eq!(store.iterate(&mut cursor), Some(0x0200));
        assert_eq!(store.iterate(&mut cursor), None);
    }

    #[test]
    fn test_set_checks_length_and_tag() {
        let mut store = store();

        assert_eq!(
            store.set(0x0200, &[1]),
            Err(ConfigStoreError::InvalidLength {
                tag: 0x0200,
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(store.set(0x0300, &[1]), Err(ConfigStoreError::InvalidTag(0x0300)));
        assert_eq!(store.get(0x0100), Err(ConfigStoreError::NotSet(0x0100)));
    }

    #[test]
    fn test_save_then_load() {
        let mut fs = MemoryFileSystem::new(1024);
        fs.mount().unwrap();

        let mut store = store();
        store.set(0x0200, &[0xAB, 0xCD]).unwrap();
        store.save(&mut fs).unwrap();

        let mut restored = MemoryConfigStore::new(vec![
            TagDef::new(0x0200, 2, true),
            TagDef::new(0x0100, 1, false),
        ]);
        restored.set(0x0100, &[1]).unwrap();
        restored.load(&mut fs).unwrap();

        assert_eq!(restored.get(0x0200).unwrap(), &[0xAB, 0xCD]);
        assert!(!restored.is_set(0x0100).unwrap());
    }

    #[test]
    fn test_corrupt_file_is_not_valid() {
        let mut fs = MemoryFileSystem::new(1024);
        fs.mount().unwrap();
        fs.handle().insert(file_id::CONF_PRIMARY, vec![1, 0, 0, 0xDE, 0xAD, 0xBE, 0xEF]);

        assert_eq!(store().load(&mut fs), Err(ConfigStoreError::NoValidConfigFile));
    }

    #[test]
    fn test_missing_file_is_not_valid() {
        let mut fs = MemoryFileSystem::new(1024);
        fs.mount().unwrap();

        assert_eq!(store().load(&mut fs), Err(ConfigStoreError::NoValidConfigFile));
    }
}
