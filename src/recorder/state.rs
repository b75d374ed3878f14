//! Recorder state management
//!
//! Defines the recorder status machine, its events and the recording
//! configuration.

use crate::utils::{ConfigError, RecorderError};
use crate::writer::{AudioSettings, FileKind, VideoSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current status of the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderStatus {
    /// No session
    #[default]
    Idle,
    /// Session is being built in the background
    Initializing,
    /// Session open, nothing appended yet
    Ready,
    /// Start time set, appending
    Writing,
    Finishing,
    Cancelling,
}

impl RecorderStatus {
    /// Whether appends and lifecycle calls are accepted
    pub fn is_recording(&self) -> bool {
        matches!(self, RecorderStatus::Ready | RecorderStatus::Writing)
    }
}

/// Notifications delivered through the recorder's event channel
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    StatusChanged(RecorderStatus),
    InitializationFailed(RecorderError),
    Finished {
        output_path: PathBuf,
        file_kind: FileKind,
        error: Option<RecorderError>,
    },
    Cancelled {
        output_path: PathBuf,
        file_kind: FileKind,
    },
    ReadyForMoreVideoData,
    ReadyForMoreAudioData,
}

fn default_realtime() -> bool {
    true
}

/// Configuration for one recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingConfig {
    /// Output file; a unique temporary file when absent
    #[serde(default)]
    pub output_path: Option<PathBuf>,

    #[serde(default)]
    pub file_kind: FileKind,

    pub video: VideoSettings,

    #[serde(default)]
    pub audio: Option<AudioSettings>,

    /// Whether the source delivers data in real time
    #[serde(default = "default_realtime")]
    pub realtime: bool,
}

impl RecordingConfig {
    pub fn new(output_path: impl Into<PathBuf>, file_kind: FileKind, video: VideoSettings) -> Self {
        Self {
            output_path: Some(output_path.into()),
            file_kind,
            video,
            audio: None,
            realtime: true,
        }
    }

    pub fn with_audio(mut self, audio: AudioSettings) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// The configured path, or a fresh temporary one
    pub fn resolved_output_path(&self) -> PathBuf {
        self.output_path
            .clone()
            .unwrap_or_else(|| self.file_kind.temporary_path())
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flip::FlipOptions;
    use crate::writer::{AudioFormatId, Dimensions, VideoCodec};
    use std::io::Write;

    const CONFIG: &str = r#"{
        "outputPath": "/tmp/capture.mp4",
        "fileKind": "mp4",
        "video": {
            "mode": "custom",
            "codec": "h264",
            "dimensions": { "width": 1280, "height": 720 },
            "flipOptions": "VERTICAL | HORIZONTAL"
        },
        "audio": {
            "mode": "custom",
            "formatId": "aac",
            "sampleRate": 48000.0,
            "numberOfChannels": 2
        }
    }"#;

    #[test]
    fn test_is_recording() {
        assert!(RecorderStatus::Ready.is_recording());
        assert!(RecorderStatus::Writing.is_recording());
        assert!(!RecorderStatus::Idle.is_recording());
        assert!(!RecorderStatus::Initializing.is_recording());
        assert!(!RecorderStatus::Finishing.is_recording());
        assert!(!RecorderStatus::Cancelling.is_recording());
    }

    #[test]
    fn test_config_from_json_str() {
        let config = RecordingConfig::from_json_str(CONFIG).unwrap();

        assert_eq!(config.output_path, Some(PathBuf::from("/tmp/capture.mp4")));
        assert_eq!(config.file_kind, FileKind::Mp4);
        assert!(config.realtime);
        assert_eq!(
            config.video,
            VideoSettings::Custom {
                codec: VideoCodec::H264,
                dimensions: Dimensions::new(1280, 720),
                source_attributes: None,
                flip_options: FlipOptions::all(),
            }
        );
        assert_eq!(
            config.audio,
            Some(AudioSettings::Custom {
                format_id: AudioFormatId::Aac,
                sample_rate: 48_000.0,
                number_of_channels: 2,
                channel_layout: None,
            })
        );
    }

    #[test]
    fn test_config_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let config = RecordingConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.file_kind, FileKind::Mp4);

        let missing = RecordingConfig::from_json_file(Path::new("/nonexistent/config.json"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        assert!(matches!(
            RecordingConfig::from_json_str("{}"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_output_path_resolves_to_temp_file() {
        let config = RecordingConfig {
            output_path: None,
            file_kind: FileKind::Mov,
            video: VideoSettings::Custom {
                codec: VideoCodec::H264,
                dimensions: Dimensions::new(2, 2),
                source_attributes: None,
                flip_options: FlipOptions::empty(),
            },
            audio: None,
            realtime: false,
        };

        let path = config.resolved_output_path();
        assert!(path.starts_with(std::env::temp_dir()));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mov"));
    }
}
