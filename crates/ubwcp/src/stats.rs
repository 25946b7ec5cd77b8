use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of [`UbwcpStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UbwcpStatsSnapshot {
    pub surfaces_created: u64,
    pub surfaces_freed: u64,
    pub attrs_set: u64,
    pub attrs_failed: u64,
    pub locks: u64,
    pub unlocks: u64,
    pub descriptor_programs: u64,
    pub hw_flush_failures: u64,
    pub memory_onlines: u64,
    pub memory_offlines: u64,
    pub memory_offline_failures: u64,
}

/// Driver-wide counters. Updated with relaxed atomics from any thread.
#[derive(Debug, Default)]
pub struct UbwcpStats {
    surfaces_created: AtomicU64,
    surfaces_freed: AtomicU64,
    attrs_set: AtomicU64,
    attrs_failed: AtomicU64,
    locks: AtomicU64,
    unlocks: AtomicU64,
    descriptor_programs: AtomicU64,
    hw_flush_failures: AtomicU64,
    memory_onlines: AtomicU64,
    memory_offlines: AtomicU64,
    memory_offline_failures: AtomicU64,
}

macro_rules! counter {
    ($($inc:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $inc(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl UbwcpStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        inc_surfaces_created => surfaces_created,
        inc_surfaces_freed => surfaces_freed,
        inc_attrs_set => attrs_set,
        inc_attrs_failed => attrs_failed,
        inc_locks => locks,
        inc_unlocks => unlocks,
        inc_descriptor_programs => descriptor_programs,
        inc_hw_flush_failures => hw_flush_failures,
        inc_memory_onlines => memory_onlines,
        inc_memory_offlines => memory_offlines,
        inc_memory_offline_failures => memory_offline_failures,
    }

    pub fn snapshot(&self) -> UbwcpStatsSnapshot {
        UbwcpStatsSnapshot {
            surfaces_created: self.surfaces_created.load(Ordering::Relaxed),
            surfaces_freed: self.surfaces_freed.load(Ordering::Relaxed),
            attrs_set: self.attrs_set.load(Ordering::Relaxed),
            attrs_failed: self.attrs_failed.load(Ordering::Relaxed),
            locks: self.locks.load(Ordering::Relaxed),
            unlocks: self.unlocks.load(Ordering::Relaxed),
            descriptor_programs: self.descriptor_programs.load(Ordering::Relaxed),
            hw_flush_failures: self.hw_flush_failures.load(Ordering::Relaxed),
            memory_onlines: self.memory_onlines.load(Ordering::Relaxed),
            memory_offlines: self.memory_offlines.load(Ordering::Relaxed),
            memory_offline_failures: self.memory_offline_failures.load(Ordering::Relaxed),
        }
    }
}
