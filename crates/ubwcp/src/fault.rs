//! Fault interrupt demultiplexing and rate-limited reporting.
//!
//! The interrupt path only touches hardware registers, atomics and the record queue. It never
//! takes a surface lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ubwcp_hw::{InterruptKind, UbwcpHw, CACHE_LINE_SHIFT};

use crate::config::IrqLines;

/// One reported engine fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord {
    pub kind: InterruptKind,
    /// Byte address of the faulting cache line.
    pub address: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqOutcome {
    Handled(InterruptKind),
    /// The line does not belong to the engine.
    Unknown,
}

/// Per-kind fault totals, including suppressed ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultTotals {
    pub read: u64,
    pub write: u64,
    pub decode: u64,
    pub encode: u64,
}

impl FaultTotals {
    pub fn get(&self, kind: InterruptKind) -> u64 {
        match kind {
            InterruptKind::ReadFault => self.read,
            InterruptKind::WriteFault => self.write,
            InterruptKind::DecodeFault => self.decode,
            InterruptKind::EncodeFault => self.encode,
        }
    }
}

pub struct FaultReporter {
    hw: Arc<dyn UbwcpHw>,
    lines: IrqLines,
    limit: u32,
    depth: usize,
    count: AtomicU32,
    totals: [AtomicU64; 4],
    suppressed: AtomicU64,
    queue: Mutex<VecDeque<FaultRecord>>,
}

impl std::fmt::Debug for FaultReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultReporter")
            .field("lines", &self.lines)
            .field("limit", &self.limit)
            .field("count", &self.count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl FaultReporter {
    pub fn new(hw: Arc<dyn UbwcpHw>, lines: IrqLines, limit: u32, depth: usize) -> Self {
        Self {
            hw,
            lines,
            limit,
            depth,
            count: AtomicU32::new(0),
            totals: Default::default(),
            suppressed: AtomicU64::new(0),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<FaultRecord>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Interrupt entry point.
    pub fn handle_irq(&self, irq: u32) -> IrqOutcome {
        let Some(kind) = self.lines.kind(irq) else {
            return IrqOutcome::Unknown;
        };

        self.totals[kind.index()].fetch_add(1, Ordering::Relaxed);
        let seen = self.count.fetch_add(1, Ordering::Relaxed);
        if seen < self.limit {
            let address = self.hw.interrupt_source_address(kind) << CACHE_LINE_SHIFT;
            tracing::error!(irq, %kind, address, "ubwcp fault");
            self.push(FaultRecord { kind, address });
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
        }
        self.hw.interrupt_clear(kind);
        IrqOutcome::Handled(kind)
    }

    fn push(&self, record: FaultRecord) {
        if self.depth == 0 {
            return;
        }
        let mut queue = self.queue();
        while queue.len() >= self.depth {
            queue.pop_front();
        }
        queue.push_back(record);
    }

    /// Re-arm reporting. Called at the start of every unlock.
    pub fn reset_rate_limit(&self) {
        self.count.store(0, Ordering::Relaxed);
    }

    pub fn drain(&self) -> Vec<FaultRecord> {
        self.queue().drain(..).collect()
    }

    pub fn totals(&self) -> FaultTotals {
        let load = |kind: InterruptKind| self.totals[kind.index()].load(Ordering::Relaxed);
        FaultTotals {
            read: load(InterruptKind::ReadFault),
            write: load(InterruptKind::WriteFault),
            decode: load(InterruptKind::DecodeFault),
            encode: load(InterruptKind::EncodeFault),
        }
    }

    /// Faults counted but not reported because of the rate limit.
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}
