use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::contract::{HwError, HwVersion, InterruptKind, UbwcpHw, CACHE_LINE_SHIFT};

/// One programmed range-check window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeCheckWindow {
    pub base: u64,
    pub size: u64,
    pub enabled: bool,
}

impl RangeCheckWindow {
    fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr - self.base < self.size
    }
}

/// Register-level operations observed by [`SimulatedUbwcp`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwEvent {
    SetDescriptorTable { base: u64, stride: u32 },
    SetRangeCheck { slot: u16, base: u64, size: u64 },
    EnableRangeCheck { slot: u16 },
    DisableRangeCheck { slot: u16 },
    Flush,
    InterruptEnable { kind: InterruptKind, enable: bool },
    InterruptClear { kind: InterruptKind },
}

/// Result of a simulated CPU access into the ULA aperture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// The address is covered by an enabled window and goes through the (de)compressor.
    Translated { slot: u16 },
    /// The address is inside the aperture but no enabled window covers it.
    Fault(InterruptKind),
    /// The address is outside the ULA aperture; the engine does not see it.
    Passthrough,
}

#[derive(Debug, Default)]
struct SimState {
    descriptor_table: Option<(u64, u32)>,
    windows: BTreeMap<u16, RangeCheckWindow>,
    irq_enabled: u32,
    pending: [Option<u64>; 4],
    aperture: Option<(u64, u64)>,
    fail_flushes: u32,
    flushes: u64,
    events: Vec<HwEvent>,
}

/// Deterministic behavioral model of the engine.
///
/// All register writes are recorded in an event log so callers can assert ordering (program before
/// enable, disable before release, one flush per lock). The model is `Send + Sync` and can be shared
/// between the driver and a test harness through an `Arc`.
#[derive(Debug)]
pub struct SimulatedUbwcp {
    version: HwVersion,
    state: Mutex<SimState>,
}

impl Default for SimulatedUbwcp {
    fn default() -> Self {
        Self::new(HwVersion::new(1, 1))
    }
}

impl SimulatedUbwcp {
    pub fn new(version: HwVersion) -> Self {
        Self {
            version,
            state: Mutex::new(SimState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Restrict fault detection to `[base, base + size)`. Accesses outside it pass through.
    pub fn set_ula_aperture(&self, base: u64, size: u64) {
        self.lock().aperture = Some((base, size));
    }

    /// Make the next `count` flushes (including disable-with-flush) report a timeout.
    pub fn fail_next_flushes(&self, count: u32) {
        self.lock().fail_flushes = count;
    }

    pub fn descriptor_table(&self) -> Option<(u64, u32)> {
        self.lock().descriptor_table
    }

    pub fn window(&self, slot: u16) -> Option<RangeCheckWindow> {
        self.lock().windows.get(&slot).copied()
    }

    pub fn enabled_windows(&self) -> Vec<(u16, RangeCheckWindow)> {
        self.lock()
            .windows
            .iter()
            .filter(|(_, w)| w.enabled)
            .map(|(slot, w)| (*slot, *w))
            .collect()
    }

    pub fn flush_count(&self) -> u64 {
        self.lock().flushes
    }

    pub fn interrupt_enabled(&self, kind: InterruptKind) -> bool {
        self.lock().irq_enabled & (1 << kind.hw_bit()) != 0
    }

    /// Kinds whose fault is pending and whose interrupt is enabled.
    pub fn pending_interrupts(&self) -> Vec<InterruptKind> {
        let state = self.lock();
        InterruptKind::ALL
            .into_iter()
            .filter(|kind| {
                state.pending[kind.index()].is_some() && state.irq_enabled & (1 << kind.hw_bit()) != 0
            })
            .collect()
    }

    pub fn events(&self) -> Vec<HwEvent> {
        self.lock().events.clone()
    }

    pub fn take_events(&self) -> Vec<HwEvent> {
        std::mem::take(&mut self.lock().events)
    }

    /// Latch a fault of `kind` at byte address `addr`.
    ///
    /// Returns whether the interrupt line is asserted, i.e. whether the kind is enabled.
    pub fn raise_fault(&self, kind: InterruptKind, addr: u64) -> bool {
        let mut state = self.lock();
        state.pending[kind.index()] = Some(addr >> CACHE_LINE_SHIFT);
        state.irq_enabled & (1 << kind.hw_bit()) != 0
    }

    /// Model a CPU access at `addr`. Accesses not covered by an enabled window latch a read or
    /// write fault.
    pub fn access(&self, addr: u64, write: bool) -> AccessOutcome {
        let mut state = self.lock();
        if let Some((base, size)) = state.aperture {
            if addr < base || addr - base >= size {
                return AccessOutcome::Passthrough;
            }
        }
        let hit = state
            .windows
            .iter()
            .find(|(_, w)| w.enabled && w.contains(addr))
            .map(|(slot, _)| *slot);
        if let Some(slot) = hit {
            return AccessOutcome::Translated { slot };
        }

        let kind = if write {
            InterruptKind::WriteFault
        } else {
            InterruptKind::ReadFault
        };
        state.pending[kind.index()] = Some(addr >> CACHE_LINE_SHIFT);
        tracing::trace!(addr, %kind, "simulated range-check fault");
        AccessOutcome::Fault(kind)
    }

    fn complete_flush(state: &mut SimState) -> Result<(), HwError> {
        state.flushes += 1;
        if state.fail_flushes > 0 {
            state.fail_flushes -= 1;
            return Err(HwError::FlushTimeout);
        }
        Ok(())
    }
}

impl UbwcpHw for SimulatedUbwcp {
    fn version(&self) -> HwVersion {
        self.version
    }

    fn set_descriptor_table(&self, base: u64, stride: u32) {
        let mut state = self.lock();
        state.descriptor_table = if base == 0 && stride == 0 {
            None
        } else {
            Some((base, stride))
        };
        state.events.push(HwEvent::SetDescriptorTable { base, stride });
    }

    fn set_range_check(&self, slot: u16, ula_base: u64, ula_size: u64) {
        let mut state = self.lock();
        let enabled = state.windows.get(&slot).map_or(false, |w| w.enabled);
        state.windows.insert(
            slot,
            RangeCheckWindow {
                base: ula_base,
                size: ula_size,
                enabled,
            },
        );
        state.events.push(HwEvent::SetRangeCheck {
            slot,
            base: ula_base,
            size: ula_size,
        });
    }

    fn enable_range_check(&self, slot: u16) {
        let mut state = self.lock();
        if let Some(window) = state.windows.get_mut(&slot) {
            window.enabled = true;
        } else {
            tracing::warn!(slot, "range check enabled on an unprogrammed slot");
        }
        state.events.push(HwEvent::EnableRangeCheck { slot });
    }

    fn disable_range_check_with_flush(&self, slot: u16) -> Result<(), HwError> {
        let mut state = self.lock();
        if let Some(window) = state.windows.get_mut(&slot) {
            window.enabled = false;
        }
        state.events.push(HwEvent::DisableRangeCheck { slot });
        Self::complete_flush(&mut state)
    }

    fn flush(&self) -> Result<(), HwError> {
        let mut state = self.lock();
        state.events.push(HwEvent::Flush);
        Self::complete_flush(&mut state)
    }

    fn interrupt_enable(&self, kind: InterruptKind, enable: bool) {
        let mut state = self.lock();
        if enable {
            state.irq_enabled |= 1 << kind.hw_bit();
        } else {
            state.irq_enabled &= !(1 << kind.hw_bit());
        }
        state.events.push(HwEvent::InterruptEnable { kind, enable });
    }

    fn interrupt_source_address(&self, kind: InterruptKind) -> u64 {
        self.lock().pending[kind.index()].unwrap_or(0)
    }

    fn interrupt_clear(&self, kind: InterruptKind) {
        let mut state = self.lock();
        state.pending[kind.index()] = None;
        state.events.push(HwEvent::InterruptClear { kind });
    }
}
