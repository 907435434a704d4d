//! Memory-mapped region guarded by a single lock word.

use std::fs::OpenOptions;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use memmap2::{MmapOptions, MmapRaw};

use super::futex;
use super::layout::{DATA_OFFSET, LOCKED_BY_READER, LOCKED_BY_WRITER, LOCK_OFFSET, UNLOCKED};
use crate::error::ShmemError;

/// Upper bound on a single futex sleep before the lock word is re-checked.
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Which side of the protocol holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Host/native side producing input state
    Writer,
    /// Plugin client consuming input state
    Reader,
}

impl Role {
    const fn word(self) -> u32 {
        match self {
            Role::Writer => LOCKED_BY_WRITER,
            Role::Reader => LOCKED_BY_READER,
        }
    }
}

/// Observable state of the lock word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked(Role),
}

/// A shared buffer: lock word at offset 0, data at [`DATA_OFFSET`].
pub struct SharedRegion {
    map: MmapRaw,
    data_len: usize,
}

// The map is only touched through the lock word (atomic) or while holding
// the lock, so sharing the region between threads is sound.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Anonymous mapping, shared by threads of this process.
    pub fn anonymous(data_len: usize) -> Result<Self, ShmemError> {
        let map = MmapOptions::new().len(DATA_OFFSET + data_len).map_anon()?;
        Ok(Self {
            map: MmapRaw::from(map),
            data_len,
        })
    }

    /// Create (or truncate) a file-backed region another process can open.
    pub fn create(path: &Path, data_len: usize) -> Result<Self, ShmemError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((DATA_OFFSET + data_len) as u64)?;
        let map = MmapOptions::new().map_raw(&file)?;
        tracing::debug!(path = %path.display(), data_len, "Created shared input region");
        Ok(Self { map, data_len })
    }

    /// Open a region created by [`SharedRegion::create`].
    pub fn open(path: &Path) -> Result<Self, ShmemError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let total = file.metadata()?.len() as usize;
        if total < DATA_OFFSET {
            return Err(ShmemError::RegionTooSmall {
                required: DATA_OFFSET,
                actual: total,
            });
        }
        let map = MmapOptions::new().map_raw(&file)?;
        Ok(Self {
            map,
            data_len: total - DATA_OFFSET,
        })
    }

    /// Number of data bytes after the lock word.
    pub fn data_len(&self) -> usize {
        self.data_len
    }

    fn lock_word(&self) -> &AtomicU32 {
        // Mappings are page aligned, so offset 0 is aligned for a u32.
        unsafe { &*(self.map.as_mut_ptr().add(LOCK_OFFSET) as *const AtomicU32) }
    }

    /// Current lock word, for diagnostics.
    pub fn lock_state(&self) -> LockState {
        match self.lock_word().load(Ordering::Acquire) {
            LOCKED_BY_WRITER => LockState::Locked(Role::Writer),
            LOCKED_BY_READER => LockState::Locked(Role::Reader),
            _ => LockState::Unlocked,
        }
    }

    /// Block until the lock is acquired for `role`.
    pub fn lock(&self, role: Role) -> MemoryGuard<'_> {
        let word = self.lock_word();
        loop {
            match word.compare_exchange(UNLOCKED, role.word(), Ordering::Acquire, Ordering::Acquire) {
                Ok(_) => return MemoryGuard::new(self, role),
                Err(current) => futex::wait(word, current, WAIT_SLICE),
            }
        }
    }

    /// Acquire the lock for `role` only if it is free right now.
    pub fn try_lock(&self, role: Role) -> Option<MemoryGuard<'_>> {
        self.lock_word()
            .compare_exchange(UNLOCKED, role.word(), Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| MemoryGuard::new(self, role))
    }
}

/// Proof of holding the region lock. Releases on drop.
pub struct MemoryGuard<'a> {
    region: &'a SharedRegion,
    role: Role,
    released: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a> MemoryGuard<'a> {
    fn new(region: &'a SharedRegion, role: Role) -> Self {
        Self {
            region,
            role,
            released: false,
            _not_send: PhantomData,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The data region (excludes the lock word).
    pub fn data(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(
                self.region.map.as_ptr().add(DATA_OFFSET),
                self.region.data_len,
            )
        }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        unsafe {
            std::slice::from_raw_parts_mut(
                self.region.map.as_mut_ptr().add(DATA_OFFSET),
                self.region.data_len,
            )
        }
    }

    fn ensure(&self, end: usize) -> Result<(), ShmemError> {
        if end > self.region.data_len {
            return Err(ShmemError::RegionTooSmall {
                required: end,
                actual: self.region.data_len,
            });
        }
        Ok(())
    }

    /// Read the byte at data `offset` as a flag.
    pub fn read_bool(&self, offset: usize) -> Result<bool, ShmemError> {
        self.ensure(offset + 1)?;
        Ok(self.data()[offset] != 0)
    }

    /// Write a flag as `0`/`1` at data `offset`.
    pub fn write_bool(&mut self, offset: usize, value: bool) -> Result<(), ShmemError> {
        self.ensure(offset + 1)?;
        self.data_mut()[offset] = u8::from(value);
        Ok(())
    }

    /// Read a little-endian `i16` at data `offset`.
    pub fn read_i16(&self, offset: usize) -> Result<i16, ShmemError> {
        self.ensure(offset + 2)?;
        let mut bytes = [0u8; 2];
        bytes.copy_from_slice(&self.data()[offset..offset + 2]);
        Ok(i16::from_le_bytes(bytes))
    }

    /// Write a little-endian `i16` at data `offset`.
    pub fn write_i16(&mut self, offset: usize, value: i16) -> Result<(), ShmemError> {
        self.ensure(offset + 2)?;
        self.data_mut()[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Read a little-endian `i32` at data `offset`.
    pub fn read_i32(&self, offset: usize) -> Result<i32, ShmemError> {
        self.ensure(offset + 4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data()[offset..offset + 4]);
        Ok(i32::from_le_bytes(bytes))
    }

    /// Write a little-endian `i32` at data `offset`.
    pub fn write_i32(&mut self, offset: usize, value: i32) -> Result<(), ShmemError> {
        self.ensure(offset + 4)?;
        self.data_mut()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Release now instead of at end of scope.
    pub fn release(mut self) {
        self.unlock();
    }

    fn unlock(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let word = self.region.lock_word();
        word.store(UNLOCKED, Ordering::Release);
        futex::wake_one(word);
    }
}

impl Drop for MemoryGuard<'_> {
    fn drop(&mut self) {
        self.unlock();
    }
}
