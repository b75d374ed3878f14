//! Camera toolbox - camera capture helpers and a single-use video recorder.
//!
//! Pixel buffers can be copied, flipped and drawn over before they are
//! appended to a recording. The recorder drives one container writer
//! session at a time and reports back through an event channel.

pub mod capture;
pub mod flip;
pub mod geometry;
pub mod media;
pub mod pixel;
pub mod recorder;
pub mod utils;
pub mod writer;

pub use flip::FlipOptions;
pub use recorder::{Recorder, RecorderEvent, RecorderStatus, RecordingConfig};
pub use utils::{RecorderError, RecorderResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging.
///
/// `RUST_LOG` overrides the default filter. Calling this twice is harmless.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camera_toolbox=debug,record_pattern=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
