//! RAM-backed flash filesystem

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::hal::{FileHandle, FileId, FileStat, FileSystem, FsError, FsMode};

#[derive(Debug, Clone, Default)]
struct StoredFile {
    data: Vec<u8>,
    protected: bool,
    circular: bool,
}

#[derive(Debug, Clone, Copy)]
struct OpenFile {
    id: FileId,
    mode: FsMode,
    position: usize,
}

#[derive(Debug)]
struct FsState {
    capacity: usize,
    mounted: bool,
    fail_mount: bool,
    files: BTreeMap<FileId, StoredFile>,
    open: HashMap<u32, OpenFile>,
    next_handle: u32,
    flushes: u32,
}

impl FsState {
    fn used(&self) -> usize {
        self.files.values().map(|f| f.data.len()).sum()
    }

    fn check_mounted(&self) -> Result<(), FsError> {
        if self.mounted {
            Ok(())
        } else {
            Err(FsError::NotMounted)
        }
    }

    fn open_file(&self, handle: FileHandle) -> Result<OpenFile, FsError> {
        self.open.get(&handle.0).copied().ok_or(FsError::InvalidHandle)
    }
}

/// Filesystem whose files live in memory, bounded by a total byte capacity
pub struct MemoryFileSystem {
    state: Arc<Mutex<FsState>>,
}

impl MemoryFileSystem {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(FsState {
                capacity,
                mounted: false,
                fail_mount: false,
                files: BTreeMap::new(),
                open: HashMap::new(),
                next_handle: 1,
                flushes: 0,
            })),
        }
    }

    pub fn handle(&self) -> MemoryFsHandle {
        MemoryFsHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl FileSystem for MemoryFileSystem {
    fn mount(&mut self) -> Result<(), FsError> {
        let mut state = self.state.lock();
        if state.fail_mount {
            return Err(FsError::Io("mount failed".into()));
        }
        state.mounted = true;
        Ok(())
    }

    fn format(&mut self) -> Result<(), FsError> {
        let mut state = self.state.lock();
        state.check_mounted()?;
        state.files.clear();
        state.open.clear();
        Ok(())
    }

    fn open(&mut self, id: FileId, mode: FsMode) -> Result<FileHandle, FsError> {
        let mut state = self.state.lock();
        state.check_mounted()?;

        match mode {
            FsMode::ReadOnly => {
                if !state.files.contains_key(&id) {
                    return Err(FsError::NotFound);
                }
            }
            FsMode::WriteOnly => match state.files.get(&id) {
                None => return Err(FsError::NotFound),
                Some(file) if file.protected => return Err(FsError::Protected),
                Some(_) => {}
            },
            FsMode::Create | FsMode::CreateCircular => {
                if state.files.contains_key(&id) {
                    return Err(FsError::AlreadyExists);
                }
                state.files.insert(
                    id,
                    StoredFile {
                        circular: mode == FsMode::CreateCircular,
                        ..StoredFile::default()
                    },
                );
            }
        }

        let handle = state.next_handle;
        state.next_handle += 1;
        state.open.insert(
            handle,
            OpenFile {
                id,
                mode,
                position: 0,
            },
        );
        trace!(id, ?mode, handle, "File opened");
        Ok(FileHandle(handle))
    }

    fn close(&mut self, handle: FileHandle) -> Result<(), FsError> {
        self.state
            .lock()
            .open
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(FsError::InvalidHandle)
    }

    fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> Result<usize, FsError> {
        let mut state = self.state.lock();
        let open = state.open_file(handle)?;
        if open.mode != FsMode::ReadOnly {
            return Err(FsError::InvalidMode);
        }

        let file = state.files.get(&open.id).ok_or(FsError::NotFound)?;
        let start = open.position.min(file.data.len());
        let n = buf.len().min(file.data.len() - start);
        buf[..n].copy_from_slice(&file.data[start..start + n]);

        if let Some(entry) = state.open.get_mut(&handle.0) {
            entry.position = start + n;
        }
        Ok(n)
    }

    fn write(&mut self, handle: FileHandle, data: &[u8]) -> Result<usize, FsError> {
        let mut state = self.state.lock();
        let open = state.open_file(handle)?;
        if open.mode == FsMode::ReadOnly {
            return Err(FsError::InvalidMode);
        }

        let free = state.capacity.saturating_sub(state.used());
        let capacity = state.capacity;
        let file = state.files.get_mut(&open.id).ok_or(FsError::NotFound)?;
        if file.protected {
            return Err(FsError::Protected);
        }

        if data.len() > free {
            let shortfall = data.len() - free;
            if !file.circular || shortfall > file.data.len() || data.len() > capacity {
                return Err(FsError::FilesystemFull);
            }
            file.data.drain(..shortfall);
        }

        file.data.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self, handle: FileHandle) -> Result<(), FsError> {
        let mut state = self.state.lock();
        state.open_file(handle)?;
        state.flushes += 1;
        Ok(())
    }

    fn seek(&mut self, handle: FileHandle, offset: u32) -> Result<(), FsError> {
        let mut state = self.state.lock();
        let open = state.open_file(handle)?;
        if open.mode != FsMode::ReadOnly {
            return Err(FsError::InvalidMode);
        }
        let size = state.files.get(&open.id).map_or(0, |f| f.data.len());
        if offset as usize > size {
            return Err(FsError::Io(format!("seek to {offset} past end of file ({size} bytes)")));
        }
        if let Some(entry) = state.open.get_mut(&handle.0) {
            entry.position = offset as usize;
        }
        Ok(())
    }

    fn stat(&self, id: FileId) -> Result<FileStat, FsError> {
        let state = self.state.lock();
        state.check_mounted()?;
        state
            .files
            .get(&id)
            .map(|file| FileStat {
                size: file.data.len() as u32,
                protected: file.protected,
                circular: file.circular,
            })
            .ok_or(FsError::NotFound)
    }

    fn delete(&mut self, id: FileId) -> Result<(), FsError> {
        let mut state = self.state.lock();
        state.check_mounted()?;
        match state.files.get(&id) {
            None => return Err(FsError::NotFound),
            Some(file) if file.protected => return Err(FsError::Protected),
            Some(_) => {}
        }
        state.files.remove(&id);
        state.open.retain(|_, open| open.id != id);
        Ok(())
    }

    fn protect(&mut self, id: FileId) -> Result<(), FsError> {
        self.set_protected(id, true)
    }

    fn unprotect(&mut self, id: FileId) -> Result<(), FsError> {
        self.set_protected(id, false)
    }
}

impl MemoryFileSystem {
    fn set_protected(&mut self, id: FileId, protected: bool) -> Result<(), FsError> {
        let mut state = self.state.lock();
        state.check_mounted()?;
        let file = state.files.get_mut(&id).ok_or(FsError::NotFound)?;
        file.protected = protected;
        Ok(())
    }
}

/// Inspection and fault injection for a [`MemoryFileSystem`]
#[derive(Clone)]
pub struct MemoryFsHandle {
    state: Arc<Mutex<FsState>>,
}

impl MemoryFsHandle {
    pub fn file(&self, id: FileId) -> Option<Vec<u8>> {
        self.state.lock().files.get(&id).map(|f| f.data.clone())
    }

    pub fn exists(&self, id: FileId) -> bool {
        self.state.lock().files.contains_key(&id)
    }

    /// Create or replace a file without going through a handle
    pub fn insert(&self, id: FileId, data: impl Into<Vec<u8>>) {
        self.state.lock().files.insert(
            id,
            StoredFile {
                data: data.into(),
                ..StoredFile::default()
            },
        );
    }

    pub fn set_protected(&self, id: FileId, protected: bool) {
        if let Some(file) = self.state.lock().files.get_mut(&id) {
            file.protected = protected;
        }
    }

    /// Identifier and size of every stored file
    pub fn listing(&self) -> BTreeMap<FileId, usize> {
        self.state
            .lock()
            .files
            .iter()
            .map(|(id, f)| (*id, f.data.len()))
            .collect()
    }

    pub fn open_handles(&self) -> usize {
        self.state.lock().open.len()
    }

    pub fn flushes(&self) -> u32 {
        self.state.lock().flushes
    }

    pub fn set_capacity(&self, capacity: usize) {
        self.state.lock().capacity = capacity;
    }

    pub fn set_fail_mount(&self, fail: bool) {
        self.state.lock().fail_mount = fail;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::file_id;
    use pretty_assertions::assert_eq;

    fn mounted(capacity: usize) -> MemoryFileSystem {
        let mut fs = MemoryFileSystem::new(capacity);
        fs.mount().unwrap();
        fs
    }

    #[test]
    fn test_fill_mode_reports_full() {
        let mut fs = mounted(8);
        let handle = fs.open(file_id::LOG, FsMode::Create).unwrap();

        fs.write(handle, &[1; 6]).unwrap();
        assert_eq!(fs.write(handle, &[2; 4]), Err(FsError::FilesystemFull));
        assert_eq!(fs.stat(file_id::LOG).unwrap().size, 6);
    }

    #[test]
    fn test_circular_mode_drops_oldest_bytes() {
        let mut fs = mounted(8);
        let handle = fs.open(file_id::LOG, FsMode::CreateCircular).unwrap();

        fs.write(handle, &[1, 2, 3, 4, 5, 6]).unwrap();
        fs.write(handle, &[7, 8, 9, 10]).unwrap();

        assert_eq!(fs.handle().file(file_id::LOG).unwrap(), vec![3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_create_existing_file_fails() {
        let mut fs = mounted(64);
        let handle = fs.open(file_id::LOG, FsMode::Create).unwrap();
        fs.close(handle).unwrap();

        assert_eq!(fs.open(file_id::LOG, FsMode::Create), Err(FsError::AlreadyExists));
    }

    #[test]
    fn test_protected_file_cannot_be_deleted() {
        let mut fs = mounted(64);
        fs.handle().insert(file_id::CONF_PRIMARY, vec![1, 2]);
        fs.protect(file_id::CONF_PRIMARY).unwrap();

        assert_eq!(fs.delete(file_id::CONF_PRIMARY), Err(FsError::Protected));
        fs.unprotect(file_id::CONF_PRIMARY).unwrap();
        fs.delete(file_id::CONF_PRIMARY).unwrap();
    }

    #[test]
    fn test_seek_then_read() {
        let mut fs = mounted(64);
        fs.handle().insert(file_id::LOG, b"abcdef".to_vec());
        let handle = fs.open(file_id::LOG, FsMode::ReadOnly).unwrap();

        fs.seek(handle, 2).unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(fs.read(handle, &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"cde");
    }

    #[test]
    fn test_requires_mount() {
        let mut fs = MemoryFileSystem::new(64);
        assert_eq!(fs.open(file_id::LOG, FsMode::Create), Err(FsError::NotMounted));
    }
}
