//! In-memory image of one hardware buffer descriptor.

use ubwcp_hw::{CACHE_LINE_SHIFT, DESCRIPTOR_STRIDE, PAGE_SHIFT};

use crate::attrs::BufferAttrs;
use crate::error::{Result, UbwcpError};
use crate::format::StdFormat;
use crate::geometry::Geometry;

pub const DESCRIPTOR_SIZE: usize = DESCRIPTOR_STRIDE as usize;

pub const UV_START_FORMAT_OFFSET: usize = 0;
pub const STRIDE_OFFSET: usize = 8;
pub const STRIDE_UBWCP_OFFSET: usize = 10;
pub const METADATA_BASE_Y_OFFSET: usize = 12;
pub const METADATA_BASE_UV_OFFSET: usize = 16;
pub const BUFFER_Y_OFFSET_OFFSET: usize = 20;
pub const BUFFER_UV_OFFSET_OFFSET: usize = 22;
pub const WIDTH_HEIGHT_OFFSET: usize = 24;

const UV_START_BITS: u32 = 48;
const UV_START_MASK: u64 = (1 << UV_START_BITS) - 1;

/// Unit of the height half of the packed width/height field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeightUnit {
    /// Revision 1.1 wants both dimensions in bytes.
    Bytes,
    Pixels,
}

/// Field values of a descriptor, already shifted to their hardware granules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescriptorImage {
    /// UV plane start in cache lines (48 bits).
    pub uv_start_addr: u64,
    pub format: u16,
    /// Cache lines. Compressed stride for TP10, uncompressed stride otherwise.
    pub stride: u16,
    /// Uncompressed stride in cache lines; TP10 only.
    pub stride_ubwcp: u16,
    /// Pages.
    pub metadata_base_y: u32,
    /// Pages.
    pub metadata_base_uv: u32,
    pub buffer_y_offset: u16,
    pub buffer_uv_offset: u16,
    /// Width in bytes in the upper half, height in the lower half.
    pub width_height: u32,
}

fn narrow<T: TryFrom<u64>>(value: u64, what: &'static str) -> Result<T> {
    T::try_from(value).map_err(|_| UbwcpError::InvalidAttrs(what))
}

impl DescriptorImage {
    pub fn build(
        attrs: &BufferAttrs,
        format: StdFormat,
        geometry: &Geometry,
        ula_base: u64,
        iova: u64,
        height_unit: HeightUnit,
    ) -> Result<Self> {
        let uv_start = ula_base
            .checked_add(geometry.uv_offset)
            .ok_or(UbwcpError::InvalidAttrs("uv start overflows"))?;
        let uv_start_addr = uv_start >> CACHE_LINE_SHIFT;
        if uv_start_addr > UV_START_MASK {
            return Err(UbwcpError::InvalidAttrs("uv start beyond 48-bit cache-line address"));
        }

        let byte_plane = format.descriptor_byte_format().planes()[0];
        let to_bytes = |pixels: u32| {
            u64::from(pixels) * u64::from(byte_plane.pixel_bytes) / u64::from(byte_plane.per_pixel)
        };
        let width_b = to_bytes(attrs.width);
        let height = match height_unit {
            HeightUnit::Bytes => to_bytes(attrs.height),
            HeightUnit::Pixels => u64::from(attrs.height),
        };
        let width_b: u16 = narrow(width_b, "width in bytes exceeds 16 bits")?;
        let height: u16 = narrow(height, "height exceeds 16 bits")?;

        let stride_b = u64::from(attrs.stride);
        let (stride, stride_ubwcp) = if format == StdFormat::Tp10 {
            (geometry.tp10_stride_bytes, stride_b)
        } else {
            (stride_b, 0)
        };

        let metadata_base_uv = iova
            .checked_add(geometry.metadata_p0)
            .and_then(|v| v.checked_add(geometry.pixel_p0))
            .ok_or(UbwcpError::InvalidAttrs("metadata uv base overflows"))?;

        Ok(Self {
            uv_start_addr,
            format: format.hw_code(),
            stride: narrow(stride >> CACHE_LINE_SHIFT, "stride exceeds descriptor field")?,
            stride_ubwcp: narrow(
                stride_ubwcp >> CACHE_LINE_SHIFT,
                "stride exceeds descriptor field",
            )?,
            metadata_base_y: narrow(iova >> PAGE_SHIFT, "iova beyond descriptor range")?,
            metadata_base_uv: narrow(
                metadata_base_uv >> PAGE_SHIFT,
                "iova beyond descriptor range",
            )?,
            buffer_y_offset: narrow(
                geometry.metadata_p0 >> PAGE_SHIFT,
                "metadata size exceeds descriptor field",
            )?,
            buffer_uv_offset: narrow(
                geometry.metadata_p1 >> PAGE_SHIFT,
                "metadata size exceeds descriptor field",
            )?,
            width_height: u32::from(width_b) << 16 | u32::from(height),
        })
    }

    pub fn encode(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut out = [0u8; DESCRIPTOR_SIZE];
        let word0 = (self.uv_start_addr & UV_START_MASK) | u64::from(self.format) << UV_START_BITS;
        out[UV_START_FORMAT_OFFSET..UV_START_FORMAT_OFFSET + 8].copy_from_slice(&word0.to_le_bytes());
        out[STRIDE_OFFSET..STRIDE_OFFSET + 2].copy_from_slice(&self.stride.to_le_bytes());
        out[STRIDE_UBWCP_OFFSET..STRIDE_UBWCP_OFFSET + 2]
            .copy_from_slice(&self.stride_ubwcp.to_le_bytes());
        out[METADATA_BASE_Y_OFFSET..METADATA_BASE_Y_OFFSET + 4]
            .copy_from_slice(&self.metadata_base_y.to_le_bytes());
        out[METADATA_BASE_UV_OFFSET..METADATA_BASE_UV_OFFSET + 4]
            .copy_from_slice(&self.metadata_base_uv.to_le_bytes());
        out[BUFFER_Y_OFFSET_OFFSET..BUFFER_Y_OFFSET_OFFSET + 2]
            .copy_from_slice(&self.buffer_y_offset.to_le_bytes());
        out[BUFFER_UV_OFFSET_OFFSET..BUFFER_UV_OFFSET_OFFSET + 2]
            .copy_from_slice(&self.buffer_uv_offset.to_le_bytes());
        out[WIDTH_HEIGHT_OFFSET..WIDTH_HEIGHT_OFFSET + 4]
            .copy_from_slice(&self.width_height.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; DESCRIPTOR_SIZE]) -> Self {
        let u16_at = |off: usize| u16::from_le_bytes([bytes[off], bytes[off + 1]]);
        let u32_at = |off: usize| {
            u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
        };
        let mut word0 = [0u8; 8];
        word0.copy_from_slice(&bytes[UV_START_FORMAT_OFFSET..UV_START_FORMAT_OFFSET + 8]);
        let word0 = u64::from_le_bytes(word0);

        Self {
            uv_start_addr: word0 & UV_START_MASK,
            format: (word0 >> UV_START_BITS) as u16,
            stride: u16_at(STRIDE_OFFSET),
            stride_ubwcp: u16_at(STRIDE_UBWCP_OFFSET),
            metadata_base_y: u32_at(METADATA_BASE_Y_OFFSET),
            metadata_base_uv: u32_at(METADATA_BASE_UV_OFFSET),
            buffer_y_offset: u16_at(BUFFER_Y_OFFSET_OFFSET),
            buffer_uv_offset: u16_at(BUFFER_UV_OFFSET_OFFSET),
            width_height: u32_at(WIDTH_HEIGHT_OFFSET),
        }
    }

    pub fn width_bytes(&self) -> u32 {
        self.width_height >> 16
    }

    pub fn height(&self) -> u32 {
        self.width_height & 0xffff
    }
}
