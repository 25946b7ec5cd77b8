#![allow(dead_code)]

use std::sync::Arc;

use ubwcp::{
    BufferAttrs, BufferHandle, CacheFlushPolicy, HwVersion, ImageFormat, InMemoryBuffers,
    Platform, RecordingCache, RecordingHotplug, UbwcpConfig, UbwcpDriver,
};
use ubwcp_hw::SimulatedUbwcp;

/// Enough backing store for any 1080p surface.
pub const BUFFER_LEN: u64 = 8 << 20;

pub struct Rig {
    pub hw: Arc<SimulatedUbwcp>,
    pub buffers: Arc<InMemoryBuffers>,
    pub hotplug: Arc<RecordingHotplug>,
    pub cache: Arc<RecordingCache>,
    pub config: UbwcpConfig,
    pub driver: UbwcpDriver,
}

impl Rig {
    /// Register backing store for `id` with the buffer provider and create the surface.
    pub fn surface(&self, id: u64) -> BufferHandle {
        self.surface_with_len(id, BUFFER_LEN)
    }

    pub fn surface_with_len(&self, id: u64, len: u64) -> BufferHandle {
        let handle = BufferHandle(id);
        self.buffers.register(handle, len);
        self.driver.create(handle).unwrap();
        handle
    }
}

/// Bulk cache cleaning keeps tests from sleeping between cache lines.
pub fn test_config() -> UbwcpConfig {
    UbwcpConfig {
        cache_flush: CacheFlushPolicy::Bulk,
        ..UbwcpConfig::default()
    }
}

pub fn rig() -> Rig {
    rig_with(HwVersion::new(1, 1), test_config())
}

pub fn rig_with(version: HwVersion, config: UbwcpConfig) -> Rig {
    let hw = Arc::new(SimulatedUbwcp::new(version));
    hw.set_ula_aperture(config.ula_pool_base, config.ula_pool_size);
    let buffers = Arc::new(InMemoryBuffers::new());
    let hotplug = Arc::new(RecordingHotplug::new());
    let cache = Arc::new(RecordingCache::new());
    let driver = UbwcpDriver::new(
        config.clone(),
        hw.clone(),
        Platform {
            buffers: buffers.clone(),
            hotplug: hotplug.clone(),
            cache: cache.clone(),
        },
    )
    .unwrap();
    Rig {
        hw,
        buffers,
        hotplug,
        cache,
        config,
        driver,
    }
}

pub fn nv12_1080p() -> BufferAttrs {
    BufferAttrs::new(ImageFormat::Nv12, 1920, 1080, 1920, 1088)
}

pub fn nv12_small() -> BufferAttrs {
    BufferAttrs::new(ImageFormat::Nv12, 64, 32, 64, 32)
}

pub fn linear() -> BufferAttrs {
    BufferAttrs::new(ImageFormat::Linear, 64, 32, 64, 32)
}
