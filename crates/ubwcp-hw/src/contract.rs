use std::fmt;

use thiserror::Error;

/// Size in bytes of one buffer descriptor in the engine's descriptor table.
pub const DESCRIPTOR_STRIDE: u32 = 64;

/// Addresses programmed as "cache-line granule" values are shifted right by this amount.
pub const CACHE_LINE_SHIFT: u32 = 6;

/// Addresses programmed as "page granule" values are shifted right by this amount.
pub const PAGE_SHIFT: u32 = 12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HwError {
    #[error("engine did not quiesce before the flush timeout")]
    FlushTimeout,
}

/// Engine revision as read from the version register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HwVersion {
    pub major: u32,
    pub minor: u32,
}

impl HwVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for HwVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The four fault interrupts raised by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InterruptKind {
    /// CPU read landed in the ULA window without an enabled range check.
    ReadFault,
    /// CPU write landed in the ULA window without an enabled range check.
    WriteFault,
    DecodeFault,
    EncodeFault,
}

impl InterruptKind {
    pub const ALL: [InterruptKind; 4] = [
        InterruptKind::ReadFault,
        InterruptKind::WriteFault,
        InterruptKind::DecodeFault,
        InterruptKind::EncodeFault,
    ];

    /// Bit position of this interrupt in the engine's enable/status registers.
    pub const fn hw_bit(self) -> u32 {
        match self {
            InterruptKind::ReadFault => 0,
            InterruptKind::WriteFault => 1,
            InterruptKind::DecodeFault => 2,
            InterruptKind::EncodeFault => 3,
        }
    }

    pub const fn index(self) -> usize {
        self.hw_bit() as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            InterruptKind::ReadFault => "read-fault",
            InterruptKind::WriteFault => "write-fault",
            InterruptKind::DecodeFault => "decode-fault",
            InterruptKind::EncodeFault => "encode-fault",
        }
    }
}

impl fmt::Display for InterruptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Primitives the core driver consumes from the engine.
///
/// Implementations only program registers; they do not serialize callers. The driver holds its
/// flush and range-check locks around the calls that must not interleave.
///
/// Contract: once [`UbwcpHw::enable_range_check`] returns, CPU loads and stores inside the slot's
/// window go through the engine. Once [`UbwcpHw::disable_range_check_with_flush`] returns, no
/// engine DMA is outstanding for that slot.
pub trait UbwcpHw: Send + Sync {
    /// Read the version register.
    fn version(&self) -> HwVersion;

    /// Point the engine at the descriptor table. `(0, 0)` detaches it.
    fn set_descriptor_table(&self, base: u64, stride: u32);

    fn set_range_check(&self, slot: u16, ula_base: u64, ula_size: u64);

    fn enable_range_check(&self, slot: u16);

    fn disable_range_check_with_flush(&self, slot: u16) -> Result<(), HwError>;

    /// Block until the engine has drained all outstanding work.
    fn flush(&self) -> Result<(), HwError>;

    fn interrupt_enable(&self, kind: InterruptKind, enable: bool);

    /// Source address of the pending fault, in cache-line units.
    fn interrupt_source_address(&self, kind: InterruptKind) -> u64;

    fn interrupt_clear(&self, kind: InterruptKind);
}
