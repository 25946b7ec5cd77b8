use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ubwcp_hw::{HwVersion, UbwcpHw, DESCRIPTOR_STRIDE};

use crate::attrs::BufferAttrs;
use crate::config::{CacheFlush, UbwcpConfig};
use crate::desc_pool::DescriptorPool;
use crate::descriptor::{DescriptorImage, HeightUnit};
use crate::engine::Engine;
use crate::error::{Result, UbwcpError};
use crate::fault::{FaultRecord, FaultReporter, FaultTotals, IrqOutcome};
use crate::geometry::Geometry;
use crate::platform::{BufferHandle, BufferProvider, CacheMaintenance, MemoryHotplug, MmapConfig};
use crate::registry::SurfaceRegistry;
use crate::stats::{UbwcpStats, UbwcpStatsSnapshot};
use crate::surface::{
    Direction, Layout, LockState, SlotBinding, Surface, SurfaceInfo, SurfaceState, UlaReservation,
};
use crate::ula_pool::UlaPool;

/// UV plane start must be cache-line aligned.
const UV_START_ALIGN: u64 = 64;

/// Platform services consumed by the driver.
#[derive(Clone)]
pub struct Platform {
    pub buffers: Arc<dyn BufferProvider>,
    pub hotplug: Arc<dyn MemoryHotplug>,
    pub cache: Arc<dyn CacheMaintenance>,
}

/// The engine record: owns every process-wide resource and implements the surface operations.
///
/// All methods take `&self`; share the driver between threads through an `Arc`.
pub struct UbwcpDriver {
    config: UbwcpConfig,
    version: HwVersion,
    height_unit: HeightUnit,
    cache_flush: CacheFlush,
    engine: Engine,
    registry: SurfaceRegistry,
    ula: Mutex<UlaPool>,
    descriptors: DescriptorPool,
    buffers: Arc<dyn BufferProvider>,
    cache: Arc<dyn CacheMaintenance>,
    faults: FaultReporter,
    stats: Arc<UbwcpStats>,
}

impl std::fmt::Debug for UbwcpDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UbwcpDriver")
            .field("version", &self.version)
            .field("height_unit", &self.height_unit)
            .field("cache_flush", &self.cache_flush)
            .field("surfaces", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl UbwcpDriver {
    /// Bring up the engine: read its version, install the descriptor table and enable the fault
    /// interrupts.
    pub fn new(config: UbwcpConfig, hw: Arc<dyn UbwcpHw>, platform: Platform) -> Result<Self> {
        config.validate()?;

        let engine = Engine::new(hw);
        let version = engine.version();
        if version.major == 0 {
            return Err(UbwcpError::UnsupportedHardware(version));
        }
        let height_unit = if version == HwVersion::new(1, 1) {
            HeightUnit::Bytes
        } else {
            HeightUnit::Pixels
        };
        let cache_flush = config.cache_flush_for(version);
        let ula = UlaPool::new(config.ula_pool_base, config.ula_pool_size)?;

        let stats = Arc::new(UbwcpStats::new());
        let registry = SurfaceRegistry::new(
            platform.hotplug,
            config.ula_pool_base,
            config.ula_pool_size,
            Arc::clone(&stats),
        );
        let faults = FaultReporter::new(
            Arc::clone(engine.hw()),
            config.irq,
            config.fault_report_limit,
            config.fault_queue_depth,
        );

        engine.set_descriptor_table(config.descriptor_table_iova, DESCRIPTOR_STRIDE);
        engine.set_interrupts(true);
        tracing::info!(%version, ?cache_flush, "ubwcp engine initialized");

        Ok(Self {
            config,
            version,
            height_unit,
            cache_flush,
            engine,
            registry,
            ula: Mutex::new(ula),
            descriptors: DescriptorPool::new(),
            buffers: platform.buffers,
            cache: platform.cache,
            faults,
            stats,
        })
    }

    /// Disable fault interrupts and detach the descriptor table.
    pub fn shutdown(self) {
        self.engine.set_interrupts(false);
        self.engine.set_descriptor_table(0, 0);
        let surfaces = self.registry.len();
        if surfaces != 0 {
            tracing::warn!(surfaces, "ubwcp shut down with registered surfaces");
        }
        if !self.ula_pool().is_empty() {
            tracing::warn!("ubwcp shut down with outstanding ULA reservations");
        }
        tracing::info!("ubwcp engine shut down");
    }

    pub fn config(&self) -> &UbwcpConfig {
        &self.config
    }

    pub fn get_hardware_version(&self) -> HwVersion {
        self.version
    }

    fn ula_pool(&self) -> MutexGuard<'_, UlaPool> {
        self.ula
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn surface(&self, handle: BufferHandle) -> Result<Arc<Surface>> {
        self.registry
            .get(handle)
            .ok_or(UbwcpError::Invalid("unknown buffer"))
    }

    /// Start tracking `handle`. The first registered surface brings the ULA range online.
    pub fn create(&self, handle: BufferHandle) -> Result<()> {
        self.registry.insert(Arc::new(Surface::new(handle)))?;
        self.stats.inc_surfaces_created();
        tracing::debug!(%handle, "surface created");
        Ok(())
    }

    /// Configure the surface for compressed access.
    ///
    /// A failure leaves the surface without attributes, even if an earlier call had set some.
    pub fn set_attributes(&self, handle: BufferHandle, attrs: &BufferAttrs) -> Result<()> {
        let surface = self.surface(handle)?;
        let mut state = surface.state();
        state.ensure_live()?;
        if state.lock.is_locked() {
            return Err(UbwcpError::Busy);
        }

        match self.apply_attributes(handle, &mut state, attrs) {
            Ok(()) => {
                self.stats.inc_attrs_set();
                tracing::debug!(%handle, format = attrs.image_format, "surface attributes set");
                Ok(())
            }
            Err(err) => {
                self.reset_attributes(handle, &mut state);
                self.stats.inc_attrs_failed();
                tracing::debug!(%handle, error = %err, "surface attributes rejected");
                Err(err)
            }
        }
    }

    fn apply_attributes(
        &self,
        handle: BufferHandle,
        state: &mut SurfaceState,
        attrs: &BufferAttrs,
    ) -> Result<()> {
        if let Some(binding) = state.descriptor.as_mut() {
            binding.programmed = false;
        }

        self.buffers
            .configure_mmap(handle, MmapConfig::Linear)
            .map_err(|err| UbwcpError::Fail(format!("reverting mmap to linear failed: {err}")))?;

        let format = attrs.validate()?;
        let Some((std_format, presence)) = format.layout() else {
            self.release_layout(handle, state);
            state.attrs = Some(*attrs);
            return Ok(());
        };

        let geometry = Geometry::compute(attrs, std_format, presence)?;
        let min_span = geometry
            .device_span()
            .ok_or(UbwcpError::InvalidAttrs("surface geometry overflows"))?;

        let previous = state.ula.take();
        let base = {
            let mut pool = self.ula_pool();
            match previous {
                Some(old) => pool.realloc(old.base, old.size, geometry.ula_size),
                None => pool.alloc(geometry.ula_size),
            }
        }?;
        let ula = UlaReservation {
            base,
            size: geometry.ula_size,
        };
        state.ula = Some(ula);

        self.buffers
            .configure_mmap(
                handle,
                MmapConfig::Ula {
                    base: ula.base,
                    size: ula.size,
                },
            )
            .map_err(|err| UbwcpError::Fail(format!("mapping ULA window failed: {err}")))?;

        let mapping = match state.mapping {
            Some(mapping) => mapping,
            None => {
                let mapping = self
                    .buffers
                    .attach(handle)
                    .map_err(|err| UbwcpError::Fail(format!("device attach failed: {err}")))?;
                state.mapping = Some(mapping);
                mapping
            }
        };
        if mapping.len < min_span {
            return Err(UbwcpError::Fail(format!(
                "buffer spans {:#x} bytes, surface needs {min_span:#x}",
                mapping.len
            )));
        }

        let uv_start = ula
            .base
            .checked_add(geometry.uv_offset)
            .ok_or(UbwcpError::InvalidAttrs("uv start overflows"))?;
        if uv_start % UV_START_ALIGN != 0 {
            return Err(UbwcpError::InvalidAttrs("uv start is not cache-line aligned"));
        }

        let image = DescriptorImage::build(
            attrs,
            std_format,
            &geometry,
            ula.base,
            mapping.iova,
            self.height_unit,
        )?;
        state.layout = Some(Layout {
            format: std_format,
            geometry,
            image,
        });
        state.attrs = Some(*attrs);
        Ok(())
    }

    /// Drop the ULA reservation, device mapping, descriptor slot and descriptor image. Only called
    /// on an unlocked surface.
    fn release_layout(&self, handle: BufferHandle, state: &mut SurfaceState) {
        if let Some(binding) = state.descriptor.take() {
            self.descriptors.free(binding.slot);
        }
        if let Some(ula) = state.ula.take() {
            if let Err(err) = self.buffers.configure_mmap(handle, MmapConfig::Linear) {
                tracing::warn!(%handle, error = %err, "reverting mmap to linear failed");
            }
            if let Err(err) = self.ula_pool().free(ula.base, ula.size) {
                tracing::warn!(%handle, base = ula.base, error = %err, "ULA release failed");
            }
        }
        if state.mapping.take().is_some() {
            self.buffers.detach(handle);
        }
        state.layout = None;
    }

    fn reset_attributes(&self, handle: BufferHandle, state: &mut SurfaceState) {
        self.release_layout(handle, state);
        state.attrs = None;
    }

    pub fn get_attributes(&self, handle: BufferHandle) -> Result<BufferAttrs> {
        let surface = self.surface(handle)?;
        let state = surface.state();
        state.ensure_live()?;
        state.attrs.ok_or(UbwcpError::NotSet)
    }

    /// Open the ULA window for CPU access. Nested locks only bump the lock count.
    pub fn lock(&self, handle: BufferHandle, direction: Direction) -> Result<()> {
        let surface = self.surface(handle)?;
        let mut state = surface.state();
        state.ensure_live()?;

        if let LockState::Locked {
            direction: held,
            count,
        } = state.lock
        {
            let count = count
                .checked_add(1)
                .ok_or(UbwcpError::Invalid("lock count overflow"))?;
            state.lock = LockState::Locked {
                direction: held,
                count,
            };
            self.stats.inc_locks();
            tracing::trace!(%handle, count = count.get(), "nested lock");
            return Ok(());
        }

        if state.attrs.is_none() {
            return Err(UbwcpError::Invalid("attributes not set"));
        }
        let (Some(layout), Some(ula)) = (state.layout, state.ula) else {
            return Err(UbwcpError::Invalid("linear surfaces cannot be locked"));
        };

        let binding = match state.descriptor.take() {
            Some(binding) if binding.programmed => binding,
            bound => {
                let slot = match bound {
                    Some(binding) => binding.slot,
                    None => self.descriptors.alloc()?,
                };
                self.descriptors.write(&slot, &layout.image.encode());
                self.engine
                    .program_range_check(slot.index(), ula.base, ula.size);
                self.stats.inc_descriptor_programs();
                SlotBinding {
                    slot,
                    programmed: true,
                }
            }
        };
        let slot = binding.slot.index();
        state.descriptor = Some(binding);

        self.engine.enable_range_check(slot);
        if let Err(err) = self.engine.flush() {
            self.stats.inc_hw_flush_failures();
            tracing::warn!(%handle, slot, error = %err, "engine flush after range-check enable failed");
        }
        if direction.cpu_reads() {
            self.cache.invalidate(ula.base, ula.size);
        }

        state.lock = LockState::Locked {
            direction,
            count: NonZeroU32::MIN,
        };
        self.stats.inc_locks();
        tracing::debug!(%handle, slot, ?direction, format = ?layout.format, "surface locked");
        Ok(())
    }

    /// Release one lock. The last unlock hands the window back to the engine.
    pub fn unlock(&self, handle: BufferHandle, direction: Direction) -> Result<()> {
        let surface = self.surface(handle)?;
        let mut state = surface.state();
        state.ensure_live()?;

        let LockState::Locked {
            direction: held,
            count,
        } = state.lock
        else {
            return Err(UbwcpError::Invalid("surface is not locked"));
        };
        self.faults.reset_rate_limit();
        if direction != held {
            tracing::trace!(%handle, ?direction, ?held, "unlock direction differs from lock");
        }

        match NonZeroU32::new(count.get() - 1) {
            Some(rest) => {
                state.lock = LockState::Locked {
                    direction: held,
                    count: rest,
                };
            }
            None => {
                self.final_unlock(handle, &mut state);
                tracing::debug!(%handle, "surface unlocked");
            }
        }
        self.stats.inc_unlocks();
        Ok(())
    }

    fn final_unlock(&self, handle: BufferHandle, state: &mut SurfaceState) {
        if let Some(ula) = state.ula {
            self.clean_cache(ula);
        }

        if let Some(binding) = state.descriptor.take() {
            let slot = binding.slot.index();
            if let Err(err) = self.engine.disable_range_check_with_flush(slot) {
                self.stats.inc_hw_flush_failures();
                tracing::warn!(%handle, slot, error = %err, "range-check disable with flush failed");
            }
            if state.permanent_translation {
                state.descriptor = Some(binding);
            } else {
                self.descriptors.free(binding.slot);
            }
        }

        state.lock = LockState::Unlocked;
    }

    fn clean_cache(&self, ula: UlaReservation) {
        match self.cache_flush {
            CacheFlush::Bulk => self.cache.clean(ula.base, ula.size),
            CacheFlush::PerLine {
                line_bytes,
                delay_us,
            } => {
                let end = ula.base + ula.size;
                let mut line = ula.base;
                while line < end {
                    self.cache.clean(line, line_bytes.min(end - line));
                    if delay_us != 0 {
                        std::thread::sleep(Duration::from_micros(delay_us));
                    }
                    line += line_bytes;
                }
            }
        }
    }

    /// Keep the descriptor bound across unlocks. Disabling it while unlocked releases the slot.
    pub fn set_permanent_translation(&self, handle: BufferHandle, enable: bool) -> Result<()> {
        let surface = self.surface(handle)?;
        let mut state = surface.state();
        state.ensure_live()?;

        state.permanent_translation = enable;
        if !enable && !state.lock.is_locked() {
            if let Some(binding) = state.descriptor.take() {
                self.descriptors.free(binding.slot);
            }
        }
        tracing::debug!(%handle, enable, "permanent translation");
        Ok(())
    }

    /// Stop tracking `handle`, unlocking and releasing everything it holds. The last freed surface
    /// takes the ULA range offline.
    ///
    /// A failed offline does not fail the call: the surface is gone either way. The range stays
    /// online and the failure is counted in `memory_offline_failures`.
    pub fn free(&self, handle: BufferHandle) -> Result<()> {
        let surface = self.surface(handle)?;
        {
            let mut state = surface.state();
            state.ensure_live()?;

            if state.lock.is_locked() {
                tracing::debug!(%handle, count = state.lock.count(), "freeing a locked surface");
                self.final_unlock(handle, &mut state);
            }
            self.reset_attributes(handle, &mut state);
            state.retired = true;
        }

        self.registry.remove(handle);
        self.stats.inc_surfaces_freed();
        tracing::debug!(%handle, "surface freed");
        Ok(())
    }

    /// Interrupt entry point for the engine's fault lines.
    pub fn handle_irq(&self, irq: u32) -> IrqOutcome {
        self.faults.handle_irq(irq)
    }

    pub fn drain_faults(&self) -> Vec<FaultRecord> {
        self.faults.drain()
    }

    pub fn fault_totals(&self) -> FaultTotals {
        self.faults.totals()
    }

    pub fn suppressed_faults(&self) -> u64 {
        self.faults.suppressed()
    }

    pub fn surface_info(&self, handle: BufferHandle) -> Result<SurfaceInfo> {
        Ok(self.surface(handle)?.info())
    }

    pub fn surface_count(&self) -> usize {
        self.registry.len()
    }

    pub fn has_surfaces(&self) -> bool {
        !self.registry.is_empty()
    }

    pub fn ula_online(&self) -> bool {
        self.registry.is_online()
    }

    /// Live ULA reservations as `(base, size)`.
    pub fn ula_reservations(&self) -> Vec<(u64, u64)> {
        self.ula_pool().reservations()
    }

    pub fn descriptors_in_use(&self) -> usize {
        self.descriptors.in_use()
    }

    /// The whole descriptor table, 64 bytes per slot.
    pub fn descriptor_table(&self) -> Vec<u8> {
        self.descriptors.table_bytes()
    }

    /// Raw bytes of one descriptor slot as the engine would read them.
    pub fn descriptor_bytes(&self, slot: u16) -> Option<[u8; crate::descriptor::DESCRIPTOR_SIZE]> {
        self.descriptors.read(slot)
    }

    pub fn stats(&self) -> UbwcpStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::BufferAttrs;
    use crate::config::CacheFlushPolicy;
    use crate::format::ImageFormat;
    use crate::platform::{CacheOp, InMemoryBuffers, RecordingCache, RecordingHotplug};
    use pretty_assertions::assert_eq;
    use ubwcp_hw::{InterruptKind, SimulatedUbwcp};

    struct Rig {
        hw: Arc<SimulatedUbwcp>,
        buffers: Arc<InMemoryBuffers>,
        cache: Arc<RecordingCache>,
        driver: UbwcpDriver,
    }

    fn rig(version: HwVersion, config: UbwcpConfig) -> Result<Rig> {
        let hw = Arc::new(SimulatedUbwcp::new(version));
        let buffers = Arc::new(InMemoryBuffers::new());
        let cache = Arc::new(RecordingCache::new());
        let driver = UbwcpDriver::new(
            config,
            hw.clone(),
            Platform {
                buffers: buffers.clone(),
                hotplug: Arc::new(RecordingHotplug::new()),
                cache: cache.clone(),
            },
        )?;
        Ok(Rig {
            hw,
            buffers,
            cache,
            driver,
        })
    }

    fn small_surface(rig: &Rig, id: u64) -> BufferHandle {
        let handle = BufferHandle(id);
        rig.buffers.register(handle, 0x10_0000);
        rig.driver.create(handle).unwrap();
        rig.driver
            .set_attributes(handle, &BufferAttrs::new(ImageFormat::Nv12, 64, 32, 64, 32))
            .unwrap();
        handle
    }

    #[test]
    fn zero_major_version_is_unsupported() {
        let err = rig(HwVersion::new(0, 9), UbwcpConfig::default()).err();
        assert_eq!(
            err,
            Some(UbwcpError::UnsupportedHardware(HwVersion::new(0, 9)))
        );
    }

    #[test]
    fn invalid_config_is_rejected_before_touching_hardware() {
        let config = UbwcpConfig {
            descriptor_table_iova: 0,
            ..UbwcpConfig::default()
        };
        assert!(matches!(
            rig(HwVersion::new(1, 1), config).err(),
            Some(UbwcpError::InvalidConfig(_))
        ));
    }

    #[test]
    fn init_and_shutdown_program_the_engine() {
        let rig = rig(HwVersion::new(2, 0), UbwcpConfig::default()).unwrap();
        assert_eq!(
            rig.hw.descriptor_table(),
            Some((UbwcpConfig::default().descriptor_table_iova, DESCRIPTOR_STRIDE))
        );
        assert!(InterruptKind::ALL
            .into_iter()
            .all(|kind| rig.hw.interrupt_enabled(kind)));
        assert_eq!(rig.driver.get_hardware_version(), HwVersion::new(2, 0));
        assert_eq!(rig.driver.config(), &UbwcpConfig::default());

        let hw = rig.hw.clone();
        rig.driver.shutdown();
        assert_eq!(hw.descriptor_table(), None);
        assert!(InterruptKind::ALL
            .into_iter()
            .all(|kind| !hw.interrupt_enabled(kind)));
    }

    #[test]
    fn per_line_clean_walks_the_whole_window() {
        let config = UbwcpConfig {
            cache_flush: CacheFlushPolicy::PerLine,
            per_line_delay_us: 0,
            ..UbwcpConfig::default()
        };
        let rig = rig(HwVersion::new(1, 1), config).unwrap();
        let handle = small_surface(&rig, 1);
        let ula = rig.driver.surface_info(handle).unwrap().ula.unwrap();

        rig.driver.lock(handle, Direction::Write).unwrap();
        assert!(rig.cache.take_ops().is_empty());
        rig.driver.unlock(handle, Direction::Write).unwrap();

        let ops = rig.cache.take_ops();
        assert_eq!(ops.len() as u64, ula.size / 64);
        assert_eq!(
            ops.first(),
            Some(&CacheOp::Clean {
                base: ula.base,
                size: 64
            })
        );
        assert_eq!(
            ops.last(),
            Some(&CacheOp::Clean {
                base: ula.base + ula.size - 64,
                size: 64
            })
        );
    }

    #[test]
    fn bulk_clean_is_one_operation() {
        let config = UbwcpConfig {
            cache_flush: CacheFlushPolicy::Bulk,
            ..UbwcpConfig::default()
        };
        let rig = rig(HwVersion::new(1, 1), config).unwrap();
        let handle = small_surface(&rig, 1);
        let ula = rig.driver.surface_info(handle).unwrap().ula.unwrap();

        rig.driver.lock(handle, Direction::Read).unwrap();
        rig.driver.unlock(handle, Direction::Read).unwrap();
        assert_eq!(
            rig.cache.ops(),
            vec![
                CacheOp::Invalidate {
                    base: ula.base,
                    size: ula.size
                },
                CacheOp::Clean {
                    base: ula.base,
                    size: ula.size
                },
            ]
        );
    }

    #[test]
    fn switching_to_linear_releases_a_kept_slot() {
        let rig = rig(HwVersion::new(2, 0), UbwcpConfig::default()).unwrap();
        let handle = small_surface(&rig, 1);
        rig.driver.set_permanent_translation(handle, true).unwrap();
        rig.driver.lock(handle, Direction::Write).unwrap();
        rig.driver.unlock(handle, Direction::Write).unwrap();
        assert_eq!(rig.driver.descriptors_in_use(), 1);

        let linear = BufferAttrs::new(ImageFormat::Linear, 64, 32, 64, 32);
        rig.driver.set_attributes(handle, &linear).unwrap();
        assert_eq!(rig.driver.descriptors_in_use(), 0);
        assert!(rig.driver.ula_reservations().is_empty());
        assert_eq!(rig.buffers.attached_count(), 0);
        assert_eq!(
            rig.buffers.record(handle).unwrap().mmap,
            MmapConfig::Linear
        );
    }
}
