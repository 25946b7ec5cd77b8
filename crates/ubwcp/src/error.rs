use thiserror::Error;
use ubwcp_hw::HwVersion;

use crate::platform::BufferHandle;

pub type Result<T, E = UbwcpError> = std::result::Result<T, E>;

pub const EIO: i32 = 5;
pub const ENOMEM: i32 = 12;
pub const EBUSY: i32 = 16;
pub const EEXIST: i32 = 17;
pub const EINVAL: i32 = 22;
pub const ENOSPC: i32 = 28;
pub const ENODATA: i32 = 61;
pub const ENOBUFS: i32 = 105;

/// Errors returned by surface operations.
///
/// Each variant maps to one status code of the character-device boundary via
/// [`UbwcpError::errno`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UbwcpError {
    #[error("buffer {0} is already registered")]
    AlreadyExists(BufferHandle),

    #[error("out of memory while registering a surface")]
    OutOfMemory,

    #[error("surface is locked")]
    Busy,

    #[error("invalid buffer attributes: {0}")]
    InvalidAttrs(&'static str),

    #[error("ULA pool cannot fit {size:#x} bytes")]
    OutOfSpace { size: u64 },

    #[error("{0}")]
    Fail(String),

    #[error("buffer attributes are not set")]
    NotSet,

    #[error("invalid request: {0}")]
    Invalid(&'static str),

    #[error("all {0} buffer descriptors are in use")]
    Exhausted(usize),

    #[error("unsupported hardware version {0}")]
    UnsupportedHardware(HwVersion),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl UbwcpError {
    /// Negative errno value reported across the ioctl boundary.
    pub fn errno(&self) -> i32 {
        match self {
            UbwcpError::AlreadyExists(_) => -EEXIST,
            UbwcpError::OutOfMemory => -ENOMEM,
            UbwcpError::Busy => -EBUSY,
            UbwcpError::InvalidAttrs(_)
            | UbwcpError::Invalid(_)
            | UbwcpError::InvalidConfig(_) => -EINVAL,
            UbwcpError::OutOfSpace { .. } => -ENOSPC,
            UbwcpError::Fail(_) | UbwcpError::UnsupportedHardware(_) => -EIO,
            UbwcpError::NotSet => -ENODATA,
            UbwcpError::Exhausted(_) => -ENOBUFS,
        }
    }
}
