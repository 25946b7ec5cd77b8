use serde::{Deserialize, Serialize};
use ubwcp_hw::{HwVersion, InterruptKind};

use crate::error::{Result, UbwcpError};
use crate::ula_pool::ULA_GRANULE;

/// How the CPU cache is cleaned over a ULA window at final unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheFlushPolicy {
    /// Per-line on major revision 1, bulk otherwise.
    Auto,
    Bulk,
    /// Line by line with a delay after each line.
    PerLine,
}

/// Interrupt line numbers of the four fault sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrqLines {
    pub read_fault: u32,
    pub write_fault: u32,
    pub encode_fault: u32,
    pub decode_fault: u32,
}

impl Default for IrqLines {
    fn default() -> Self {
        Self {
            read_fault: 0,
            write_fault: 1,
            encode_fault: 2,
            decode_fault: 3,
        }
    }
}

impl IrqLines {
    pub fn line(&self, kind: InterruptKind) -> u32 {
        match kind {
            InterruptKind::ReadFault => self.read_fault,
            InterruptKind::WriteFault => self.write_fault,
            InterruptKind::EncodeFault => self.encode_fault,
            InterruptKind::DecodeFault => self.decode_fault,
        }
    }

    pub fn kind(&self, irq: u32) -> Option<InterruptKind> {
        InterruptKind::ALL.into_iter().find(|kind| self.line(*kind) == irq)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UbwcpConfig {
    pub ula_pool_base: u64,
    pub ula_pool_size: u64,
    /// Device address of the descriptor table.
    pub descriptor_table_iova: u64,
    /// Faults reported between two unlocks before the reporter goes quiet.
    pub fault_report_limit: u32,
    /// Fault records kept for [`crate::UbwcpDriver::drain_faults`].
    pub fault_queue_depth: usize,
    pub cache_flush: CacheFlushPolicy,
    pub cache_line_bytes: u64,
    pub per_line_delay_us: u64,
    pub irq: IrqLines,
}

impl Default for UbwcpConfig {
    fn default() -> Self {
        Self {
            ula_pool_base: 0x1_0000_0000,
            ula_pool_size: 0x4000_0000,
            descriptor_table_iova: 0x8000_0000,
            fault_report_limit: 21,
            fault_queue_depth: 64,
            cache_flush: CacheFlushPolicy::Auto,
            cache_line_bytes: 64,
            per_line_delay_us: 89,
            irq: IrqLines::default(),
        }
    }
}

/// Cache clean recipe chosen at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFlush {
    Bulk,
    PerLine { line_bytes: u64, delay_us: u64 },
}

impl UbwcpConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ula_pool_size == 0
            || self.ula_pool_base % ULA_GRANULE != 0
            || self.ula_pool_size % ULA_GRANULE != 0
        {
            return Err(UbwcpError::InvalidConfig(
                "ULA pool must be non-empty and 4 KiB aligned",
            ));
        }
        if self.ula_pool_base.checked_add(self.ula_pool_size).is_none() {
            return Err(UbwcpError::InvalidConfig("ULA pool wraps the address space"));
        }
        if self.descriptor_table_iova == 0 {
            return Err(UbwcpError::InvalidConfig("descriptor table iova must be non-zero"));
        }
        if self.cache_line_bytes == 0 {
            return Err(UbwcpError::InvalidConfig("cache line size must be non-zero"));
        }
        let irq = &self.irq;
        let lines = [irq.read_fault, irq.write_fault, irq.encode_fault, irq.decode_fault];
        for (i, line) in lines.iter().enumerate() {
            if lines[..i].contains(line) {
                return Err(UbwcpError::InvalidConfig("fault interrupt lines must be distinct"));
            }
        }
        Ok(())
    }

    pub fn cache_flush_for(&self, version: HwVersion) -> CacheFlush {
        let per_line = match self.cache_flush {
            CacheFlushPolicy::Auto => version.major == 1,
            CacheFlushPolicy::Bulk => false,
            CacheFlushPolicy::PerLine => true,
        };
        if per_line {
            CacheFlush::PerLine {
                line_bytes: self.cache_line_bytes,
                delay_us: self.per_line_delay_us,
            }
        } else {
            CacheFlush::Bulk
        }
    }
}
