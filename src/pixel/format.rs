//! Pixel formats and plane layouts

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel layout of a [`PixelBuffer`](super::PixelBuffer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PixelFormat {
    /// 32-bit little-endian ARGB, premultiplied alpha first (memory order B, G, R, A)
    #[default]
    Bgra32,
    /// 32-bit RGBA
    Rgba32,
    /// 32-bit big-endian ARGB
    Argb32,
    /// Y plane followed by an interleaved CbCr plane at half resolution
    Nv12,
    /// Y, Cb and Cr planes, chroma at half resolution
    I420,
}

/// Geometry of one plane for a given image size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub width: usize,
    pub height: usize,
    pub bytes_per_pixel: usize,
}

impl PlaneLayout {
    /// Minimum bytes needed for one row of this plane; `None` on overflow
    pub const fn min_bytes_per_row(&self) -> Option<usize> {
        self.width.checked_mul(self.bytes_per_pixel)
    }
}

impl PixelFormat {
    /// Whether the format stores components in separate planes
    pub const fn is_planar(&self) -> bool {
        matches!(self, Self::Nv12 | Self::I420)
    }

    /// Memory regions backing an image of the given size.
    ///
    /// Packed formats have exactly one region; planar formats have one per plane.
    pub fn regions(&self, width: usize, height: usize) -> Vec<PlaneLayout> {
        let chroma_width = width.div_ceil(2);
        let chroma_height = height.div_ceil(2);

        match self {
            Self::Bgra32 | Self::Rgba32 | Self::Argb32 => vec![PlaneLayout {
                width,
                height,
                bytes_per_pixel: 4,
            }],
            Self::Nv12 => vec![
                PlaneLayout {
                    width,
                    height,
                    bytes_per_pixel: 1,
                },
                PlaneLayout {
                    width: chroma_width,
                    height: chroma_height,
                    bytes_per_pixel: 2,
                },
            ],
            Self::I420 => vec![
                PlaneLayout {
                    width,
                    height,
                    bytes_per_pixel: 1,
                },
                PlaneLayout {
                    width: chroma_width,
                    height: chroma_height,
                    bytes_per_pixel: 1,
                },
                PlaneLayout {
                    width: chroma_width,
                    height: chroma_height,
                    bytes_per_pixel: 1,
                },
            ],
        }
    }

    /// FFmpeg `-pixel_format` name for raw input
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            Self::Bgra32 => "bgra",
            Self::Rgba32 => "rgba",
            Self::Argb32 => "argb",
            Self::Nv12 => "nv12",
            Self::I420 => "yuv420p",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Bgra32 => write!(f, "BGRA"),
            PixelFormat::Rgba32 => write!(f, "RGBA"),
            PixelFormat::Argb32 => write!(f, "ARGB"),
            PixelFormat::Nv12 => write!(f, "NV12"),
            PixelFormat::I420 => write!(f, "I420"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nv12_regions_round_odd_sizes_up() {
        let regions = PixelFormat::Nv12.regions(5, 3);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].min_bytes_per_row(), Some(5));
        assert_eq!((regions[1].width, regions[1].height), (3, 2));
        assert_eq!(regions[1].min_bytes_per_row(), Some(6));
    }

    #[test]
    fn test_packed_has_single_region() {
        assert!(!PixelFormat::Bgra32.is_planar());
        assert_eq!(PixelFormat::Bgra32.regions(8, 2).len(), 1);
        assert_eq!(PixelFormat::I420.regions(8, 2).len(), 3);
    }
}
