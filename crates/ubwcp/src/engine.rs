use std::sync::{Arc, Mutex, MutexGuard};

use ubwcp_hw::{HwError, HwVersion, InterruptKind, UbwcpHw};

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serialized access to the engine.
///
/// Range-check enable/disable go through the range-check lock and flushes go through the flush
/// lock. Disable-with-flush takes both, flush lock first.
pub(crate) struct Engine {
    hw: Arc<dyn UbwcpHw>,
    flush_lock: Mutex<()>,
    range_check_lock: Mutex<()>,
}

impl Engine {
    pub(crate) fn new(hw: Arc<dyn UbwcpHw>) -> Self {
        Self {
            hw,
            flush_lock: Mutex::new(()),
            range_check_lock: Mutex::new(()),
        }
    }

    pub(crate) fn hw(&self) -> &Arc<dyn UbwcpHw> {
        &self.hw
    }

    pub(crate) fn version(&self) -> HwVersion {
        self.hw.version()
    }

    pub(crate) fn set_descriptor_table(&self, base: u64, stride: u32) {
        self.hw.set_descriptor_table(base, stride);
    }

    pub(crate) fn set_interrupts(&self, enable: bool) {
        for kind in InterruptKind::ALL {
            self.hw.interrupt_enable(kind, enable);
        }
    }

    /// Only called for a slot the caller owns exclusively, so no engine-wide lock is needed.
    pub(crate) fn program_range_check(&self, slot: u16, base: u64, size: u64) {
        self.hw.set_range_check(slot, base, size);
    }

    pub(crate) fn enable_range_check(&self, slot: u16) {
        let _range = lock(&self.range_check_lock);
        self.hw.enable_range_check(slot);
    }

    pub(crate) fn flush(&self) -> Result<(), HwError> {
        let _flush = lock(&self.flush_lock);
        self.hw.flush()
    }

    pub(crate) fn disable_range_check_with_flush(&self, slot: u16) -> Result<(), HwError> {
        let _flush = lock(&self.flush_lock);
        let _range = lock(&self.range_check_lock);
        self.hw.disable_range_check_with_flush(slot)
    }
}
