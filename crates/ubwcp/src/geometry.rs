//! Per-surface size and layout arithmetic.

use crate::attrs::BufferAttrs;
use crate::error::{Result, UbwcpError};
use crate::format::{PlaneInfo, PlanePresence, StdFormat};

/// Tiles per metadata row are rounded up to this many.
pub const METADATA_PITCH_ALIGN: u64 = 64;
/// Metadata tile rows are rounded up to this many.
pub const METADATA_HEIGHT_ALIGN: u64 = 16;
pub const METADATA_SIZE_ALIGN: u64 = 4096;
pub const PIXEL_DATA_SIZE_ALIGN: u64 = 4096;
pub const ULA_SIZE_ALIGN: u64 = 4096;
/// TP10 rows are padded to a multiple of this many pixels before computing the compressed stride.
pub const TP10_STRIDE_PIXEL_ALIGN: u64 = 192;

const OVERFLOW: UbwcpError = UbwcpError::InvalidAttrs("surface geometry overflows");

/// Round `value` up to a multiple of `alignment`. `alignment` need not be a power of two.
pub fn align_up(value: u64, alignment: u64) -> Option<u64> {
    if alignment == 0 {
        return None;
    }
    let rem = value % alignment;
    if rem == 0 {
        Some(value)
    } else {
        value.checked_add(alignment - rem)
    }
}

fn div_ceil(value: u64, divisor: u64) -> u64 {
    value / divisor + u64::from(value % divisor != 0)
}

/// Derived sizes for one set of attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub metadata_p0: u64,
    pub pixel_p0: u64,
    pub metadata_p1: u64,
    pub pixel_p1: u64,
    /// Compressed stride in bytes; non-zero for TP10 only.
    pub tp10_stride_bytes: u64,
    /// ULA window size, 4 KiB aligned.
    pub ula_size: u64,
    /// Offset of the UV plane from the window base. Points past the window for single-plane data.
    pub uv_offset: u64,
}

impl Geometry {
    pub fn compute(attrs: &BufferAttrs, format: StdFormat, presence: PlanePresence) -> Result<Self> {
        let planes = format.planes();
        let width = u64::from(attrs.width);
        let height = u64::from(attrs.height);

        let mut geometry = Geometry::default();
        for (index, info) in planes.iter().enumerate() {
            let present = match index {
                0 => presence.has_y(),
                _ => presence.has_uv(),
            };
            if !present {
                continue;
            }
            let (w, h) = plane_dims(width, height, index);
            let metadata = metadata_size(info, w, h).ok_or(OVERFLOW)?;
            let pixel = pixel_data_size(info, w, h).ok_or(OVERFLOW)?;
            if index == 0 {
                geometry.metadata_p0 = metadata;
                geometry.pixel_p0 = pixel;
            } else {
                geometry.metadata_p1 = metadata;
                geometry.pixel_p1 = pixel;
            }
        }

        if format == StdFormat::Tp10 {
            let padded = align_up(width, TP10_STRIDE_PIXEL_ALIGN).ok_or(OVERFLOW)?;
            geometry.tp10_stride_bytes = padded / 3 + padded;
        }

        let stride = u64::from(attrs.stride);
        let scanlines = u64::from(attrs.scanlines);
        let y_bytes = stride.checked_mul(scanlines).ok_or(OVERFLOW)?;
        let uv_bytes = stride.checked_mul(scanlines / 2).ok_or(OVERFLOW)?;

        let (ula, uv_offset) = if planes.len() == 1 {
            (y_bytes, y_bytes)
        } else {
            match presence {
                PlanePresence::Both => {
                    let uv_offset = y_bytes
                        .checked_add(u64::from(attrs.planar_padding))
                        .ok_or(OVERFLOW)?;
                    (uv_offset.checked_add(uv_bytes).ok_or(OVERFLOW)?, uv_offset)
                }
                PlanePresence::YOnly => (y_bytes, y_bytes),
                PlanePresence::UvOnly => (uv_bytes, 0),
            }
        };

        geometry.ula_size = align_up(ula, ULA_SIZE_ALIGN).ok_or(OVERFLOW)?;
        geometry.uv_offset = uv_offset;
        if geometry.ula_size == 0 {
            return Err(UbwcpError::InvalidAttrs("surface has an empty ULA window"));
        }
        Ok(geometry)
    }

    /// Minimum device-side span the backing buffer must provide.
    pub fn device_span(&self) -> Option<u64> {
        self.metadata_p0
            .checked_add(self.pixel_p0)?
            .checked_add(self.metadata_p1)?
            .checked_add(self.pixel_p1)
    }
}

/// The UV plane is half width and half height.
fn plane_dims(width: u64, height: u64, plane: usize) -> (u64, u64) {
    if plane == 0 {
        (width, height)
    } else {
        (width / 2, height / 2)
    }
}

fn metadata_size(info: &PlaneInfo, width: u64, height: u64) -> Option<u64> {
    let pitch = align_up(
        div_ceil(width, u64::from(info.tile.width)),
        METADATA_PITCH_ALIGN,
    )?;
    let lines = align_up(
        div_ceil(height, u64::from(info.tile.height)),
        METADATA_HEIGHT_ALIGN,
    )?;
    // One metadata byte per tile.
    align_up(pitch.checked_mul(lines)?, METADATA_SIZE_ALIGN)
}

fn pixel_data_size(info: &PlaneInfo, width: u64, height: u64) -> Option<u64> {
    let pitch = align_up(width, u64::from(info.macro_tile.width))?;
    let lines = align_up(height, u64::from(info.macro_tile.height))?;
    let bytes = pitch
        .checked_mul(lines)?
        .checked_mul(u64::from(info.pixel_bytes))?
        / u64::from(info.per_pixel);
    align_up(bytes, PIXEL_DATA_SIZE_ALIGN)
}
