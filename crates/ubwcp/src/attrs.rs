use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UbwcpError};
use crate::format::ImageFormat;

pub const COMPRESSION_LOSSLESS: u16 = 0;
pub const SUBSAMPLE_4_2_0: u16 = 0;

pub const MAX_WIDTH: u32 = 10 * 1024;
pub const MAX_HEIGHT: u32 = 10 * 1024;
pub const STRIDE_ALIGN: u32 = 64;
pub const MAX_STRIDE: u32 = 4 * 8192;
/// Scanlines may exceed the height by at most this many lines.
pub const MAX_EXTRA_SCANLINES: u32 = 10;
pub const MAX_PLANAR_PADDING: u32 = 4096;

bitflags! {
    /// Subsystems that will access the surface through the engine.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct SubsystemTarget: u16 {
        const CPU = 0x1;
    }
}

/// Surface attributes as supplied by the client.
///
/// Every field is kept in its raw boundary form so that a rejected record can still be logged and
/// compared byte for byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferAttrs {
    pub image_format: u16,
    pub major_ver: u16,
    pub minor_ver: u16,
    pub compression_type: u16,
    pub lossy_params: u16,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub scanlines: u32,
    pub planar_padding: u32,
    pub subsample: u16,
    pub sub_system_target: u16,
    pub y_offset: u32,
    pub batch_size: u16,
}

impl BufferAttrs {
    /// Lossless, 4:2:0, CPU-targeted attributes with no planar padding.
    pub fn new(format: ImageFormat, width: u32, height: u32, stride: u32, scanlines: u32) -> Self {
        Self {
            image_format: format.raw(),
            major_ver: 0,
            minor_ver: 0,
            compression_type: COMPRESSION_LOSSLESS,
            lossy_params: 0,
            width,
            height,
            stride,
            scanlines,
            planar_padding: 0,
            subsample: SUBSAMPLE_4_2_0,
            sub_system_target: SubsystemTarget::CPU.bits(),
            y_offset: 0,
            batch_size: 1,
        }
    }

    pub fn with_planar_padding(mut self, planar_padding: u32) -> Self {
        self.planar_padding = planar_padding;
        self
    }

    pub fn targets(&self) -> SubsystemTarget {
        SubsystemTarget::from_bits_retain(self.sub_system_target)
    }

    /// Check the record against what the engine supports and return its decoded format.
    pub fn validate(&self) -> Result<ImageFormat> {
        let format = ImageFormat::from_raw(self.image_format)
            .ok_or(UbwcpError::InvalidAttrs("unknown image format"))?;

        if self.major_ver != 0 || self.minor_ver != 0 {
            return Err(UbwcpError::InvalidAttrs("ubwc version must be 0.0"));
        }
        if self.compression_type != COMPRESSION_LOSSLESS {
            return Err(UbwcpError::InvalidAttrs("only lossless compression is supported"));
        }
        if self.lossy_params != 0 {
            return Err(UbwcpError::InvalidAttrs("lossy parameters must be 0"));
        }
        if self.width > MAX_WIDTH {
            return Err(UbwcpError::InvalidAttrs("width above limit"));
        }
        if self.height > MAX_HEIGHT {
            return Err(UbwcpError::InvalidAttrs("height above limit"));
        }
        if self.stride % STRIDE_ALIGN != 0 || self.stride < self.width || self.stride > MAX_STRIDE {
            return Err(UbwcpError::InvalidAttrs(
                "stride must be 64-byte aligned, at least the width and at most 32768",
            ));
        }
        if self.scanlines < self.height
            || u64::from(self.scanlines) > u64::from(self.height) + u64::from(MAX_EXTRA_SCANLINES)
        {
            return Err(UbwcpError::InvalidAttrs("scanlines out of range"));
        }
        if self.planar_padding > MAX_PLANAR_PADDING {
            return Err(UbwcpError::InvalidAttrs("planar padding above 4096"));
        }
        if self.subsample != SUBSAMPLE_4_2_0 {
            return Err(UbwcpError::InvalidAttrs("only 4:2:0 subsampling is supported"));
        }

        let targets = self.targets();
        if !SubsystemTarget::CPU.contains(targets) {
            return Err(UbwcpError::InvalidAttrs("only the CPU subsystem target is supported"));
        }
        if !targets.contains(SubsystemTarget::CPU) {
            return Err(UbwcpError::InvalidAttrs("CPU subsystem target is required"));
        }

        if self.y_offset != 0 {
            return Err(UbwcpError::InvalidAttrs("y offset must be 0"));
        }
        if self.batch_size != 1 {
            return Err(UbwcpError::InvalidAttrs("batch size must be 1"));
        }

        Ok(format)
    }
}
