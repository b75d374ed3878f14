//! Pixel buffers
//!
//! Plane-aware pixel storage, deep copies that tolerate differing row
//! strides, and a small drawing surface for overlays with flip support.

pub mod attachments;
pub mod buffer;
pub mod copy;
pub mod draw;
pub mod format;

pub use attachments::{AttachmentMode, Attachments};
pub use buffer::{
    AlignedAllocator, PixelBuffer, PixelBufferAllocator, PixelBufferGuard, Plane, PlaneMut,
};
pub use draw::{Color, DrawingSurface};
pub use format::{PixelFormat, PlaneLayout};

use thiserror::Error;

/// Pixel buffer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PixelBufferError {
    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Plane {plane}: {bytes_per_row} bytes per row is below the minimum of {min}")]
    InvalidStride {
        plane: usize,
        bytes_per_row: usize,
        min: usize,
    },

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("Failed to allocate {0} bytes")]
    AllocationFailed(usize),

    #[error("Failed to lock pixel buffer")]
    LockFailed,

    #[error("Cannot draw into a {0} buffer")]
    UnsupportedDrawingSurface(PixelFormat),
}
