//! Services the driver consumes from the surrounding platform.
//!
//! - [`BufferProvider`]: the buffer-sharing framework that owns the backing pages
//! - [`MemoryHotplug`]: brings the ULA physical range online and offline
//! - [`CacheMaintenance`]: CPU cache operations on ULA ranges
//!
//! The in-memory implementations below record every call and can be told to fail. They back the
//! driver's tests and are usable for host-side bring-up without real hardware.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identity of a shared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferHandle(pub u64);

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("unknown buffer {0}")]
    UnknownBuffer(BufferHandle),
    #[error("buffer {0} is already attached")]
    AlreadyAttached(BufferHandle),
    #[error("buffer {0} is not attached")]
    NotAttached(BufferHandle),
    #[error("{0} rejected")]
    Rejected(&'static str),
}

/// How CPU mappings of a buffer are backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmapConfig {
    /// Map the buffer's own pages.
    Linear,
    /// Map the given ULA window instead of the backing pages.
    Ula { base: u64, size: u64 },
}

/// Device-side view of an attached buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMapping {
    pub iova: u64,
    pub len: u64,
}

pub trait BufferProvider: Send + Sync {
    fn configure_mmap(&self, handle: BufferHandle, config: MmapConfig) -> Result<(), PlatformError>;

    /// Attach the buffer to the engine's address translator. The buffer must be one contiguous
    /// device range.
    fn attach(&self, handle: BufferHandle) -> Result<DeviceMapping, PlatformError>;

    fn detach(&self, handle: BufferHandle);
}

pub trait MemoryHotplug: Send + Sync {
    fn online(&self, base: u64, size: u64) -> Result<(), PlatformError>;
    fn offline(&self, base: u64, size: u64) -> Result<(), PlatformError>;
}

pub trait CacheMaintenance: Send + Sync {
    /// Discard CPU cache lines so subsequent reads see device data.
    fn invalidate(&self, base: u64, size: u64);
    /// Write back dirty CPU cache lines.
    fn clean(&self, base: u64, size: u64);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRecord {
    pub mapping: DeviceMapping,
    pub attached: bool,
    pub mmap: MmapConfig,
}

#[derive(Debug, Default)]
struct BufferTable {
    buffers: HashMap<BufferHandle, BufferRecord>,
    next_iova: u64,
    fail_mmap: u32,
    fail_attach: u32,
}

/// Buffer provider backed by a table of registered buffers.
///
/// Each registered buffer gets a distinct, page-aligned iova range.
#[derive(Debug, Default)]
pub struct InMemoryBuffers {
    inner: Mutex<BufferTable>,
}

const FIRST_IOVA: u64 = 0x1000_0000;

impl InMemoryBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: BufferHandle, len: u64) {
        let mut table = lock(&self.inner);
        let iova = table.next_iova.max(FIRST_IOVA);
        table.next_iova = iova + len.div_ceil(4096).max(1) * 4096;
        table.buffers.insert(
            handle,
            BufferRecord {
                mapping: DeviceMapping { iova, len },
                attached: false,
                mmap: MmapConfig::Linear,
            },
        );
    }

    pub fn record(&self, handle: BufferHandle) -> Option<BufferRecord> {
        lock(&self.inner).buffers.get(&handle).copied()
    }

    pub fn attached_count(&self) -> usize {
        lock(&self.inner)
            .buffers
            .values()
            .filter(|r| r.attached)
            .count()
    }

    /// Make the next `count` mmap configuration requests fail.
    pub fn fail_next_mmaps(&self, count: u32) {
        lock(&self.inner).fail_mmap = count;
    }

    pub fn fail_next_attaches(&self, count: u32) {
        lock(&self.inner).fail_attach = count;
    }
}

impl BufferProvider for InMemoryBuffers {
    fn configure_mmap(&self, handle: BufferHandle, config: MmapConfig) -> Result<(), PlatformError> {
        let mut table = lock(&self.inner);
        if table.fail_mmap > 0 {
            table.fail_mmap -= 1;
            return Err(PlatformError::Rejected("mmap configuration"));
        }
        let record = table
            .buffers
            .get_mut(&handle)
            .ok_or(PlatformError::UnknownBuffer(handle))?;
        record.mmap = config;
        Ok(())
    }

    fn attach(&self, handle: BufferHandle) -> Result<DeviceMapping, PlatformError> {
        let mut table = lock(&self.inner);
        if table.fail_attach > 0 {
            table.fail_attach -= 1;
            return Err(PlatformError::Rejected("device attach"));
        }
        let record = table
            .buffers
            .get_mut(&handle)
            .ok_or(PlatformError::UnknownBuffer(handle))?;
        if record.attached {
            return Err(PlatformError::AlreadyAttached(handle));
        }
        record.attached = true;
        Ok(record.mapping)
    }

    fn detach(&self, handle: BufferHandle) {
        if let Some(record) = lock(&self.inner).buffers.get_mut(&handle) {
            record.attached = false;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugEvent {
    Online { base: u64, size: u64 },
    Offline { base: u64, size: u64 },
}

#[derive(Debug, Default)]
struct HotplugState {
    events: Vec<HotplugEvent>,
    online: bool,
    fail_online: u32,
    fail_offline: u32,
}

/// Hot-plug service that records transitions.
#[derive(Debug, Default)]
pub struct RecordingHotplug {
    inner: Mutex<HotplugState>,
}

impl RecordingHotplug {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HotplugEvent> {
        lock(&self.inner).events.clone()
    }

    pub fn is_online(&self) -> bool {
        lock(&self.inner).online
    }

    pub fn online_count(&self) -> usize {
        lock(&self.inner)
            .events
            .iter()
            .filter(|e| matches!(e, HotplugEvent::Online { .. }))
            .count()
    }

    pub fn offline_count(&self) -> usize {
        lock(&self.inner)
            .events
            .iter()
            .filter(|e| matches!(e, HotplugEvent::Offline { .. }))
            .count()
    }

    pub fn fail_next_onlines(&self, count: u32) {
        lock(&self.inner).fail_online = count;
    }

    pub fn fail_next_offlines(&self, count: u32) {
        lock(&self.inner).fail_offline = count;
    }
}

impl MemoryHotplug for RecordingHotplug {
    fn online(&self, base: u64, size: u64) -> Result<(), PlatformError> {
        let mut state = lock(&self.inner);
        if state.fail_online > 0 {
            state.fail_online -= 1;
            return Err(PlatformError::Rejected("memory online"));
        }
        state.online = true;
        state.events.push(HotplugEvent::Online { base, size });
        Ok(())
    }

    fn offline(&self, base: u64, size: u64) -> Result<(), PlatformError> {
        let mut state = lock(&self.inner);
        if state.fail_offline > 0 {
            state.fail_offline -= 1;
            return Err(PlatformError::Rejected("memory offline"));
        }
        state.online = false;
        state.events.push(HotplugEvent::Offline { base, size });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    Invalidate { base: u64, size: u64 },
    Clean { base: u64, size: u64 },
}

/// Cache maintenance that only records requests.
#[derive(Debug, Default)]
pub struct RecordingCache {
    ops: Mutex<Vec<CacheOp>>,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<CacheOp> {
        lock(&self.ops).clone()
    }

    pub fn take_ops(&self) -> Vec<CacheOp> {
        std::mem::take(&mut *lock(&self.ops))
    }
}

impl CacheMaintenance for RecordingCache {
    fn invalidate(&self, base: u64, size: u64) {
        lock(&self.ops).push(CacheOp::Invalidate { base, size });
    }

    fn clean(&self, base: u64, size: u64) {
        lock(&self.ops).push(CacheOp::Clean { base, size });
    }
}
