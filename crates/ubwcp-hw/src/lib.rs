//! Register-level contract for the UBWCP compression engine.
//!
//! The core driver never touches MMIO directly. Everything it needs from the engine goes through
//! [`UbwcpHw`]:
//!
//! - descriptor table placement
//! - per-descriptor range-check windows (program, enable, disable-with-flush)
//! - engine flush
//! - the four fault interrupts and their source-address registers
//! - the hardware version register
//!
//! [`SimulatedUbwcp`] is a deterministic model of the engine. It records every call, can inject
//! flush failures, and can raise range-check faults for CPU accesses that fall outside an enabled
//! window.

#![forbid(unsafe_code)]

mod contract;
mod sim;

pub use contract::{
    HwError, HwVersion, InterruptKind, UbwcpHw, CACHE_LINE_SHIFT, DESCRIPTOR_STRIDE, PAGE_SHIFT,
};
pub use sim::{AccessOutcome, HwEvent, RangeCheckWindow, SimulatedUbwcp};
