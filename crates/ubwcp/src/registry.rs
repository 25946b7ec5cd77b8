use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Result, UbwcpError};
use crate::platform::{BufferHandle, MemoryHotplug};
use crate::stats::UbwcpStats;
use crate::surface::Surface;

#[derive(Debug, Default)]
struct RegistryInner {
    surfaces: HashMap<BufferHandle, Arc<Surface>>,
    /// The ULA physical range is currently online.
    online: bool,
}

/// Handle to surface map. Owns the memory online/offline transitions of the ULA range: the first
/// insert brings it online, the removal that empties the map takes it offline.
pub(crate) struct SurfaceRegistry {
    inner: Mutex<RegistryInner>,
    hotplug: Arc<dyn MemoryHotplug>,
    pool_base: u64,
    pool_size: u64,
    stats: Arc<UbwcpStats>,
}

impl SurfaceRegistry {
    pub(crate) fn new(
        hotplug: Arc<dyn MemoryHotplug>,
        pool_base: u64,
        pool_size: u64,
        stats: Arc<UbwcpStats>,
    ) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            hotplug,
            pool_base,
            pool_size,
            stats,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn insert(&self, surface: Arc<Surface>) -> Result<()> {
        let handle = surface.handle();
        let mut inner = self.lock();
        if inner.surfaces.contains_key(&handle) {
            return Err(UbwcpError::AlreadyExists(handle));
        }
        inner
            .surfaces
            .try_reserve(1)
            .map_err(|_| UbwcpError::OutOfMemory)?;

        if !inner.online {
            self.hotplug
                .online(self.pool_base, self.pool_size)
                .map_err(|err| UbwcpError::Fail(format!("ULA memory online failed: {err}")))?;
            inner.online = true;
            self.stats.inc_memory_onlines();
            tracing::debug!(
                base = self.pool_base,
                size = self.pool_size,
                "ULA memory online"
            );
        }

        inner.surfaces.insert(handle, surface);
        Ok(())
    }

    pub(crate) fn remove(&self, handle: BufferHandle) -> Option<Arc<Surface>> {
        let mut inner = self.lock();
        let removed = inner.surfaces.remove(&handle)?;
        if inner.surfaces.is_empty() && inner.online {
            match self.hotplug.offline(self.pool_base, self.pool_size) {
                Ok(()) => {
                    inner.online = false;
                    self.stats.inc_memory_offlines();
                    tracing::debug!(
                        base = self.pool_base,
                        size = self.pool_size,
                        "ULA memory offline"
                    );
                }
                // Still online; the next first insert will not online it again.
                Err(err) => {
                    self.stats.inc_memory_offline_failures();
                    tracing::warn!(error = %err, "ULA memory offline failed");
                }
            }
        }
        Some(removed)
    }

    pub(crate) fn get(&self, handle: BufferHandle) -> Option<Arc<Surface>> {
        self.lock().surfaces.get(&handle).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().surfaces.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock().surfaces.is_empty()
    }

    pub(crate) fn is_online(&self) -> bool {
        self.lock().online
    }
}
