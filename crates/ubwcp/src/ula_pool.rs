use std::collections::BTreeMap;

use crate::error::{Result, UbwcpError};
use crate::geometry::align_up;

/// Allocation granule of the ULA window.
pub const ULA_GRANULE: u64 = 4096;

/// Half-open `[start, end)` address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: u64,
    end: u64,
}

impl Span {
    fn len(&self) -> u64 {
        self.end - self.start
    }
}

/// Free space as disjoint, sorted, non-adjacent spans.
#[derive(Debug, Default, Clone)]
struct FreeList {
    spans: Vec<Span>,
}

impl FreeList {
    fn insert(&mut self, start: u64, end: u64) {
        let idx = self.spans.partition_point(|s| s.end < start);
        let mut merged = Span { start, end };
        let mut last = idx;
        while last < self.spans.len() && self.spans[last].start <= merged.end {
            merged.start = merged.start.min(self.spans[last].start);
            merged.end = merged.end.max(self.spans[last].end);
            last += 1;
        }
        self.spans.splice(idx..last, [merged]);
    }

    /// Carve `len` bytes from the lowest span large enough to hold them.
    fn take_first_fit(&mut self, len: u64) -> Option<u64> {
        let idx = self.spans.iter().position(|s| s.len() >= len)?;
        let span = &mut self.spans[idx];
        let addr = span.start;
        span.start += len;
        if span.start == span.end {
            self.spans.remove(idx);
        }
        Some(addr)
    }

    fn total(&self) -> u64 {
        self.spans.iter().map(Span::len).sum()
    }
}

/// First-fit allocator over the single ULA physical range.
///
/// Every reservation is 4 KiB aligned and sized, lies inside `[base, base + size)` and does not
/// overlap any other reservation. Frees must name exactly a reservation handed out earlier.
#[derive(Debug, Clone)]
pub struct UlaPool {
    free: FreeList,
    allocations: BTreeMap<u64, u64>,
}

impl UlaPool {
    pub fn new(base: u64, size: u64) -> Result<Self> {
        if size == 0 || base % ULA_GRANULE != 0 || size % ULA_GRANULE != 0 {
            return Err(UbwcpError::InvalidConfig(
                "ULA pool must be non-empty and 4 KiB aligned",
            ));
        }
        let end = base
            .checked_add(size)
            .ok_or(UbwcpError::InvalidConfig("ULA pool wraps the address space"))?;
        let mut free = FreeList::default();
        free.insert(base, end);
        Ok(Self {
            free,
            allocations: BTreeMap::new(),
        })
    }

    fn granular(size: u64) -> Result<u64> {
        if size == 0 {
            return Err(UbwcpError::Invalid("zero-sized ULA request"));
        }
        align_up(size, ULA_GRANULE).ok_or(UbwcpError::OutOfSpace { size })
    }

    pub fn alloc(&mut self, size: u64) -> Result<u64> {
        let len = Self::granular(size)?;
        let addr = self
            .free
            .take_first_fit(len)
            .ok_or(UbwcpError::OutOfSpace { size: len })?;
        self.allocations.insert(addr, len);
        tracing::trace!(addr, len, "ULA reserved");
        Ok(addr)
    }

    pub fn free(&mut self, addr: u64, size: u64) -> Result<()> {
        let len = Self::granular(size)?;
        match self.allocations.get(&addr) {
            Some(owned) if *owned == len => {}
            _ => return Err(UbwcpError::Invalid("ULA range is not a live reservation")),
        }
        self.allocations.remove(&addr);
        self.free.insert(addr, addr + len);
        tracing::trace!(addr, len, "ULA released");
        Ok(())
    }

    /// Resize a reservation. Equal sizes keep the address; otherwise the old range is released
    /// before the new one is carved, so a failed grow leaves nothing reserved.
    ///
    /// `old_size == 0` means there is no previous reservation.
    pub fn realloc(&mut self, old_addr: u64, old_size: u64, new_size: u64) -> Result<u64> {
        if old_size != 0 {
            if old_size == new_size {
                return Ok(old_addr);
            }
            self.free(old_addr, old_size)?;
        }
        self.alloc(new_size)
    }

    pub fn available(&self) -> u64 {
        self.free.total()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// Live reservations as `(addr, len)`, in address order.
    pub fn reservations(&self) -> Vec<(u64, u64)> {
        self.allocations.iter().map(|(a, l)| (*a, *l)).collect()
    }
}
