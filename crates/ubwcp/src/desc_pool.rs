use std::sync::{Mutex, MutexGuard};

use crate::descriptor::DESCRIPTOR_SIZE;
use crate::error::{Result, UbwcpError};

pub const DESCRIPTOR_COUNT: usize = 256;

/// Exclusive claim on one descriptor slot.
///
/// Not `Clone`: the only way to give a slot back is [`DescriptorPool::free`], which consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct DescriptorSlot(u16);

impl DescriptorSlot {
    pub fn index(&self) -> u16 {
        self.0
    }
}

#[derive(Debug)]
struct DescriptorTable {
    in_use: [bool; DESCRIPTOR_COUNT],
    bytes: Vec<u8>,
}

impl DescriptorTable {
    fn range(index: u16) -> std::ops::Range<usize> {
        let start = usize::from(index) * DESCRIPTOR_SIZE;
        start..start + DESCRIPTOR_SIZE
    }
}

/// The device-visible descriptor table and its slot allocator.
#[derive(Debug)]
pub struct DescriptorPool {
    inner: Mutex<DescriptorTable>,
}

impl Default for DescriptorPool {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorPool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DescriptorTable {
                in_use: [false; DESCRIPTOR_COUNT],
                bytes: vec![0; DESCRIPTOR_COUNT * DESCRIPTOR_SIZE],
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DescriptorTable> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the lowest free slot.
    pub fn alloc(&self) -> Result<DescriptorSlot> {
        let mut table = self.lock();
        let index = table
            .in_use
            .iter()
            .position(|used| !used)
            .ok_or(UbwcpError::Exhausted(DESCRIPTOR_COUNT))?;
        table.in_use[index] = true;
        tracing::trace!(slot = index, "descriptor allocated");
        // DESCRIPTOR_COUNT fits in u16.
        Ok(DescriptorSlot(index as u16))
    }

    /// Return a slot to the pool and zero its descriptor bytes.
    pub fn free(&self, slot: DescriptorSlot) {
        let mut table = self.lock();
        let index = slot.index();
        table.in_use[usize::from(index)] = false;
        table.bytes[DescriptorTable::range(index)].fill(0);
        tracing::trace!(slot = index, "descriptor freed");
    }

    pub fn write(&self, slot: &DescriptorSlot, image: &[u8; DESCRIPTOR_SIZE]) {
        let mut table = self.lock();
        table.bytes[DescriptorTable::range(slot.index())].copy_from_slice(image);
    }

    pub fn read(&self, index: u16) -> Option<[u8; DESCRIPTOR_SIZE]> {
        if usize::from(index) >= DESCRIPTOR_COUNT {
            return None;
        }
        let table = self.lock();
        let mut out = [0u8; DESCRIPTOR_SIZE];
        out.copy_from_slice(&table.bytes[DescriptorTable::range(index)]);
        Some(out)
    }

    pub fn in_use(&self) -> usize {
        self.lock().in_use.iter().filter(|used| **used).count()
    }

    pub fn is_allocated(&self, index: u16) -> bool {
        self.lock()
            .in_use
            .get(usize::from(index))
            .copied()
            .unwrap_or(false)
    }

    /// Copy of the whole table as the engine sees it.
    pub fn table_bytes(&self) -> Vec<u8> {
        self.lock().bytes.clone()
    }
}
