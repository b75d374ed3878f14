//! Flip options
//!
//! A two-bit flag set with two derived mappings that are deliberately
//! different: the affine transform used for recorded video tracks and
//! drawing surfaces, and the mirroring/orientation pair used for live
//! capture connections.

use crate::geometry::{AffineTransform, Rect};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Flip flags for recorded video and capture connections
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FlipOptions: u8 {
        const VERTICAL = 1 << 0;
        const HORIZONTAL = 1 << 1;
    }
}

/// Video orientation of a capture connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VideoOrientation {
    Portrait,
    PortraitUpsideDown,
}

/// Mirroring and orientation applied to a capture connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionFlip {
    pub mirrored: bool,
    pub orientation: VideoOrientation,
}

impl FlipOptions {
    /// Scale factors `(sx, sy)` of the track transform
    pub fn scale_factors(&self) -> (f64, f64) {
        let sx = if self.contains(Self::HORIZONTAL) { -1.0 } else { 1.0 };
        let sy = if self.contains(Self::VERTICAL) { -1.0 } else { 1.0 };
        (sx, sy)
    }

    /// Transform configured on a video track
    pub fn transform(&self) -> AffineTransform {
        let (sx, sy) = self.scale_factors();
        AffineTransform::IDENTITY.scaled_by(sx, sy)
    }

    /// Recover the flags from a video track transform.
    ///
    /// Inverse of [`FlipOptions::transform`] for all four flag combinations.
    pub fn from_transform(transform: &AffineTransform) -> Self {
        let mut options = Self::empty();
        if transform.d != 1.0 {
            options |= Self::VERTICAL;
        }
        if transform.a != 1.0 {
            options |= Self::HORIZONTAL;
        }
        options
    }

    /// Mapping applied to live capture connections (previews, data outputs).
    ///
    /// This does not follow the track transform: a single flag turns
    /// mirroring on, both flags together rotate without mirroring.
    pub fn connection_flip(&self) -> ConnectionFlip {
        let vertical = self.contains(Self::VERTICAL);
        let horizontal = self.contains(Self::HORIZONTAL);

        let (mirrored, orientation) = if vertical && horizontal {
            (false, VideoOrientation::PortraitUpsideDown)
        } else if horizontal {
            (true, VideoOrientation::Portrait)
        } else if vertical {
            (true, VideoOrientation::PortraitUpsideDown)
        } else {
            (false, VideoOrientation::Portrait)
        };

        ConnectionFlip {
            mirrored,
            orientation,
        }
    }

    /// Transform that pre-flips a drawing surface covering `bounds`
    pub fn drawing_transform(&self, bounds: Rect) -> AffineTransform {
        let mut ctm = AffineTransform::IDENTITY;

        if self.contains(Self::HORIZONTAL) {
            ctm = ctm.translated_by(bounds.width(), 0.0).scaled_by(-1.0, 1.0);
        }

        if self.contains(Self::VERTICAL) {
            ctm = ctm.translated_by(0.0, bounds.height()).scaled_by(1.0, -1.0);
        }

        ctm
    }
}
