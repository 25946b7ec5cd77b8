use std::num::NonZeroU32;
use std::sync::{Mutex, MutexGuard};

use crate::attrs::BufferAttrs;
use crate::desc_pool::DescriptorSlot;
use crate::descriptor::DescriptorImage;
use crate::error::{Result, UbwcpError};
use crate::format::StdFormat;
use crate::geometry::Geometry;
use crate::platform::{BufferHandle, DeviceMapping};

/// CPU access direction, numbered like DMA data directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Bidirectional = 0,
    /// CPU writes, device consumes.
    Write = 1,
    /// Device produced, CPU reads.
    Read = 2,
}

impl Direction {
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(Direction::Bidirectional),
            1 => Ok(Direction::Write),
            2 => Ok(Direction::Read),
            _ => Err(UbwcpError::Invalid("unknown access direction")),
        }
    }

    pub fn cpu_reads(self) -> bool {
        matches!(self, Direction::Read | Direction::Bidirectional)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockState {
    #[default]
    Unlocked,
    /// `direction` is the one given to the first lock; nested locks only bump the count.
    Locked {
        direction: Direction,
        count: NonZeroU32,
    },
}

impl LockState {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Locked { .. })
    }

    pub fn count(&self) -> u32 {
        match self {
            LockState::Unlocked => 0,
            LockState::Locked { count, .. } => count.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UlaReservation {
    pub base: u64,
    pub size: u64,
}

/// Derived state of a non-linear attribute set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Layout {
    pub(crate) format: StdFormat,
    pub(crate) geometry: Geometry,
    pub(crate) image: DescriptorImage,
}

#[derive(Debug)]
pub(crate) struct SlotBinding {
    pub(crate) slot: DescriptorSlot,
    /// Slot bytes and range-check window match the current layout.
    pub(crate) programmed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct SurfaceState {
    pub(crate) attrs: Option<BufferAttrs>,
    pub(crate) layout: Option<Layout>,
    pub(crate) ula: Option<UlaReservation>,
    pub(crate) mapping: Option<DeviceMapping>,
    pub(crate) descriptor: Option<SlotBinding>,
    pub(crate) lock: LockState,
    pub(crate) permanent_translation: bool,
    /// Set by `free` before the registry entry goes away.
    pub(crate) retired: bool,
}

impl SurfaceState {
    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.retired {
            return Err(UbwcpError::Invalid("surface is being freed"));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct Surface {
    handle: BufferHandle,
    state: Mutex<SurfaceState>,
}

impl Surface {
    pub(crate) fn new(handle: BufferHandle) -> Self {
        Self {
            handle,
            state: Mutex::new(SurfaceState::default()),
        }
    }

    pub(crate) fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SurfaceState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn info(&self) -> SurfaceInfo {
        let state = self.state();
        SurfaceInfo {
            handle: self.handle,
            attrs: state.attrs,
            geometry: state.layout.map(|l| l.geometry),
            descriptor_image: state.layout.map(|l| l.image),
            ula: state.ula,
            iova: state.mapping.map(|m| m.iova),
            descriptor_slot: state.descriptor.as_ref().map(|b| b.slot.index()),
            lock: state.lock,
            permanent_translation: state.permanent_translation,
        }
    }
}

/// Read-only snapshot of one surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceInfo {
    pub handle: BufferHandle,
    pub attrs: Option<BufferAttrs>,
    pub geometry: Option<Geometry>,
    pub descriptor_image: Option<DescriptorImage>,
    pub ula: Option<UlaReservation>,
    pub iova: Option<u64>,
    pub descriptor_slot: Option<u16>,
    pub lock: LockState,
    pub permanent_translation: bool,
}

impl SurfaceInfo {
    pub fn attrs_set(&self) -> bool {
        self.attrs.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    pub fn lock_count(&self) -> u32 {
        self.lock.count()
    }
}
