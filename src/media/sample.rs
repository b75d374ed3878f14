//! Samples delivered by capture outputs

use crate::media::MediaTime;
use crate::pixel::PixelBuffer;
use std::sync::Arc;

/// A compressed or PCM audio sample buffer
#[derive(Debug, Clone)]
pub struct AudioSample {
    /// Presentation timestamp of the first frame
    pub presentation_time: MediaTime,

    /// Number of audio frames in `data`
    pub frame_count: usize,

    /// Raw sample payload
    pub data: Arc<[u8]>,
}

impl AudioSample {
    pub fn new(
        presentation_time: MediaTime,
        frame_count: usize,
        data: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            presentation_time,
            frame_count,
            data: data.into(),
        }
    }
}

/// A video sample as delivered by a capture output.
///
/// Capture outputs may deliver samples without an image buffer (dropped or
/// marker samples); the recorder refuses those.
#[derive(Debug, Clone)]
pub struct VideoSample {
    pub presentation_time: MediaTime,
    pub image_buffer: Option<PixelBuffer>,
}

impl VideoSample {
    pub fn new(image_buffer: PixelBuffer, presentation_time: MediaTime) -> Self {
        Self {
            presentation_time,
            image_buffer: Some(image_buffer),
        }
    }
}
