//! Image formats understood by the engine and their per-plane tiling parameters.

use serde::{Deserialize, Serialize};

/// Image format as passed through the ioctl boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ImageFormat {
    Linear = 0,
    Rgba8888 = 1,
    Nv12 = 2,
    Nv12Y = 3,
    Nv12Uv = 4,
    Nv124r = 5,
    Nv124rY = 6,
    Nv124rUv = 7,
    Tp10 = 8,
    Tp10Y = 9,
    Tp10Uv = 10,
    P010 = 11,
    P010Y = 12,
    P010Uv = 13,
    P016 = 14,
    P016Y = 15,
    P016Uv = 16,
}

impl ImageFormat {
    pub fn from_raw(raw: u16) -> Option<Self> {
        use ImageFormat::*;
        Some(match raw {
            0 => Linear,
            1 => Rgba8888,
            2 => Nv12,
            3 => Nv12Y,
            4 => Nv12Uv,
            5 => Nv124r,
            6 => Nv124rY,
            7 => Nv124rUv,
            8 => Tp10,
            9 => Tp10Y,
            10 => Tp10Uv,
            11 => P010,
            12 => P010Y,
            13 => P010Uv,
            14 => P016,
            15 => P016Y,
            16 => P016Uv,
            _ => return None,
        })
    }

    pub const fn raw(self) -> u16 {
        self as u16
    }

    /// Canonical format and plane presence, or `None` for [`ImageFormat::Linear`].
    pub fn layout(self) -> Option<(StdFormat, PlanePresence)> {
        use ImageFormat::*;
        use PlanePresence::{Both, UvOnly, YOnly};
        Some(match self {
            Linear => return None,
            Rgba8888 => (StdFormat::Rgba, Both),
            Nv12 => (StdFormat::Nv12, Both),
            Nv12Y => (StdFormat::Nv12, YOnly),
            Nv12Uv => (StdFormat::Nv12, UvOnly),
            Nv124r => (StdFormat::Nv124r, Both),
            Nv124rY => (StdFormat::Nv124r, YOnly),
            Nv124rUv => (StdFormat::Nv124r, UvOnly),
            Tp10 => (StdFormat::Tp10, Both),
            Tp10Y => (StdFormat::Tp10, YOnly),
            Tp10Uv => (StdFormat::Tp10, UvOnly),
            P010 => (StdFormat::P010, Both),
            P010Y => (StdFormat::P010, YOnly),
            P010Uv => (StdFormat::P010, UvOnly),
            P016 => (StdFormat::P016, Both),
            P016Y => (StdFormat::P016, YOnly),
            P016Uv => (StdFormat::P016, UvOnly),
        })
    }
}

/// Which planes of a two-plane format are carried by the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanePresence {
    Both,
    /// Second (UV) plane missing.
    YOnly,
    /// First (Y) plane missing.
    UvOnly,
}

impl PlanePresence {
    pub fn has_y(self) -> bool {
        !matches!(self, PlanePresence::UvOnly)
    }

    pub fn has_uv(self) -> bool {
        !matches!(self, PlanePresence::YOnly)
    }
}

/// Canonical formats with an entry in the tiling table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdFormat {
    Rgba,
    Nv12,
    Nv124r,
    P010,
    Tp10,
    P016,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dims {
    pub width: u32,
    pub height: u32,
}

const fn dims(width: u32, height: u32) -> Dims {
    Dims { width, height }
}

/// Tiling parameters of one plane.
///
/// Bytes per pixel is `pixel_bytes / per_pixel`; TP10 packs three samples into four bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneInfo {
    pub pixel_bytes: u32,
    pub per_pixel: u32,
    pub tile: Dims,
    pub macro_tile: Dims,
}

const fn plane(pixel_bytes: u32, per_pixel: u32, tile: Dims, macro_tile: Dims) -> PlaneInfo {
    PlaneInfo {
        pixel_bytes,
        per_pixel,
        tile,
        macro_tile,
    }
}

const RGBA_PLANES: [PlaneInfo; 1] = [plane(4, 1, dims(16, 4), dims(64, 16))];
const NV12_PLANES: [PlaneInfo; 2] = [
    plane(1, 1, dims(32, 8), dims(128, 32)),
    plane(2, 1, dims(16, 8), dims(64, 32)),
];
const NV124R_PLANES: [PlaneInfo; 2] = [
    plane(1, 1, dims(64, 4), dims(256, 16)),
    plane(2, 1, dims(32, 4), dims(128, 16)),
];
const P010_PLANES: [PlaneInfo; 2] = [
    plane(2, 1, dims(32, 4), dims(128, 16)),
    plane(4, 1, dims(16, 4), dims(64, 16)),
];
const TP10_PLANES: [PlaneInfo; 2] = [
    plane(4, 3, dims(48, 4), dims(192, 16)),
    plane(8, 3, dims(24, 4), dims(96, 16)),
];
const P016_PLANES: [PlaneInfo; 2] = [
    plane(2, 1, dims(32, 4), dims(128, 16)),
    plane(4, 1, dims(16, 4), dims(64, 16)),
];

impl StdFormat {
    pub fn planes(self) -> &'static [PlaneInfo] {
        match self {
            StdFormat::Rgba => &RGBA_PLANES,
            StdFormat::Nv12 => &NV12_PLANES,
            StdFormat::Nv124r => &NV124R_PLANES,
            StdFormat::P010 => &P010_PLANES,
            StdFormat::Tp10 => &TP10_PLANES,
            StdFormat::P016 => &P016_PLANES,
        }
    }

    /// Format code written into the descriptor.
    pub const fn hw_code(self) -> u16 {
        match self {
            StdFormat::Rgba => 0x0,
            StdFormat::Nv12 => 0x2,
            StdFormat::Nv124r => 0x4,
            StdFormat::P010 => 0x6,
            StdFormat::Tp10 => 0x8,
            StdFormat::P016 => 0xA,
        }
    }

    /// Format whose plane-0 byte ratio is used when converting pixel dimensions for the
    /// descriptor. TP10 is programmed with P010 byte dimensions.
    pub const fn descriptor_byte_format(self) -> StdFormat {
        match self {
            StdFormat::Tp10 => StdFormat::P010,
            other => other,
        }
    }
}
