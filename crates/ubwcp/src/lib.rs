//! Buffer-compression management for the UBWCP engine.
//!
//! A client registers a shared buffer as a [`BufferHandle`], describes its image with
//! [`BufferAttrs`], and then brackets CPU access with [`UbwcpDriver::lock`] and
//! [`UbwcpDriver::unlock`]. While a surface is locked the engine translates CPU accesses to its
//! linear (ULA) window into compressed accesses to the backing buffer.
//!
//! The driver owns:
//!
//! - a first-fit ULA address pool, brought online with the first surface and taken offline with
//!   the last one ([`MemoryHotplug`])
//! - a 256-slot descriptor table shared with the engine
//! - the fault interrupt reporter
//!
//! Hardware access goes through [`ubwcp_hw::UbwcpHw`]; buffer plumbing and cache maintenance go
//! through the traits in [`platform`].

#![forbid(unsafe_code)]

pub mod attrs;
pub mod config;
pub mod desc_pool;
pub mod descriptor;
mod driver;
mod engine;
pub mod error;
pub mod fault;
pub mod format;
pub mod geometry;
pub mod platform;
mod registry;
mod stats;
mod surface;
pub mod ula_pool;

pub use attrs::{BufferAttrs, SubsystemTarget};
pub use config::{CacheFlush, CacheFlushPolicy, IrqLines, UbwcpConfig};
pub use descriptor::{DescriptorImage, HeightUnit};
pub use driver::{Platform, UbwcpDriver};
pub use error::{Result, UbwcpError};
pub use fault::{FaultRecord, FaultTotals, IrqOutcome};
pub use format::{ImageFormat, PlanePresence, StdFormat};
pub use geometry::Geometry;
pub use platform::{
    BufferHandle, BufferProvider, CacheMaintenance, CacheOp, DeviceMapping, HotplugEvent,
    InMemoryBuffers, MemoryHotplug, MmapConfig, PlatformError, RecordingCache, RecordingHotplug,
};
pub use stats::{UbwcpStats, UbwcpStatsSnapshot};
pub use surface::{Direction, LockState, SurfaceInfo, UlaReservation};

pub use ubwcp_hw::{HwError, HwVersion, InterruptKind, UbwcpHw};
