// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Typed settings snapshot consumed from the external configuration store.
//!
//! Everything here is a closed set: unknown enum values are rejected by
//! `serde` at parse time and cross-field constraints are rejected by
//! [`SettingsSnapshot::validate`], both before the snapshot ever reaches a
//! [`crate::controller::PipelineController`]. The controller never inspects
//! a config dictionary directly — it only ever sees this typed snapshot.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{NvrError, Result};

/// Immutable view of recording, streaming and per-camera options handed to
/// every controller. Cheap to clone; controllers only borrow what they need.
#[derive(Debug, Clone, Deserialize)]
pub struct SettingsSnapshot {
    pub recording: RecordingSettings,
    pub streaming: StreamingSettings,
    pub storage: StorageSettings,
    pub cameras: Vec<CameraSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingSettings {
    #[serde(default)]
    pub file_format: FileFormat,
    #[serde(default)]
    pub codec: Codec,
    #[serde(default = "default_rotation_minutes")]
    pub rotation_minutes: u32,
    #[serde(default = "default_fragment_duration_ms")]
    pub fragment_duration_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamingSettings {
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u32,
    #[serde(default = "default_tcp_timeout_ms")]
    pub tcp_timeout_ms: u32,
    #[serde(default = "default_keepalive_timeout_s")]
    pub keepalive_timeout_s: u32,
    #[serde(default)]
    pub use_hardware_acceleration: bool,
    #[serde(default)]
    pub decoder_preference: Vec<String>,
    #[serde(default = "default_true")]
    pub show_timestamp: bool,
    #[serde(default = "default_true")]
    pub show_camera_name: bool,
    #[serde(default)]
    pub osd: OsdSettings,
    #[serde(default = "default_layout")]
    pub default_layout: String,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_seconds")]
    pub reconnect_delay_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsdSettings {
    #[serde(default = "default_osd_font")]
    pub font: String,
    #[serde(default = "default_osd_color")]
    pub color: String,
    #[serde(default = "default_osd_alignment")]
    pub alignment: String,
    #[serde(default = "default_osd_padding")]
    pub padding: u32,
}

impl Default for OsdSettings {
    fn default() -> Self {
        Self {
            font: default_osd_font(),
            color: default_osd_color(),
            alignment: default_osd_alignment(),
            padding: default_osd_padding(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CameraSettings {
    pub camera_id: String,
    pub name: String,
    pub rtsp_url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub streaming_enabled_start: bool,
    #[serde(default)]
    pub recording_enabled_start: bool,
    #[serde(default)]
    pub video_transform: VideoTransform,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub recording_path: PathBuf,
    #[serde(default = "default_min_free_space_gb")]
    pub min_free_space_gb: u64,
}

/// The pipeline's operating mode (data model entity §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    StreamingOnly,
    RecordingOnly,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Mp4,
    Mkv,
    Avi,
}

impl FileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Mp4 => "mp4",
            FileFormat::Mkv => "mkv",
            FileFormat::Avi => "avi",
        }
    }

    /// Name of the muxer-factory splitmuxsink should instantiate.
    pub fn muxer_factory(self) -> &'static str {
        match self {
            FileFormat::Mp4 => "qtmux",
            FileFormat::Mkv => "matroskamux",
            FileFormat::Avi => "avimux",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    H264,
    H265,
}

impl Codec {
    pub fn depay_factory(self) -> &'static str {
        match self {
            Codec::H264 => "rtph264depay",
            Codec::H265 => "rtph265depay",
        }
    }

    pub fn parse_factory(self) -> &'static str {
        match self {
            Codec::H264 => "h264parse",
            Codec::H265 => "h265parse",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlipMode {
    #[default]
    None,
    Horizontal,
    Vertical,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct VideoTransform {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub flip: FlipMode,
    #[serde(default)]
    pub rotation: Rotation,
}

/// The single `videoflip` `method` value the transform settings resolve to.
/// Mirrors the table in spec.md §4.2: rotation takes priority for the
/// non-combinable 90/270 cases; 180 combines with flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMethod {
    Identity,
    Clockwise90,
    CounterClockwise90,
    Rotate180,
    HorizontalFlip,
    VerticalFlip,
}

impl VideoTransform {
    pub fn method(&self) -> TransformMethod {
        use FlipMode::*;
        use Rotation::*;
        match (self.rotation, self.flip) {
            (R90, _) => TransformMethod::Clockwise90,
            (R270, _) => TransformMethod::CounterClockwise90,
            (R180, None) => TransformMethod::Rotate180,
            (R180, Horizontal) => TransformMethod::VerticalFlip,
            (R180, Vertical) => TransformMethod::HorizontalFlip,
            (R180, Both) => TransformMethod::Rotate180,
            (R0, None) => TransformMethod::Identity,
            (R0, Horizontal) => TransformMethod::HorizontalFlip,
            (R0, Vertical) => TransformMethod::VerticalFlip,
            (R0, Both) => TransformMethod::Rotate180,
        }
    }
}

fn default_rotation_minutes() -> u32 {
    10
}
fn default_fragment_duration_ms() -> u64 {
    1000
}
fn default_latency_ms() -> u32 {
    200
}
fn default_tcp_timeout_ms() -> u32 {
    5000
}
fn default_keepalive_timeout_s() -> u32 {
    5
}
fn default_true() -> bool {
    true
}
fn default_layout() -> String {
    "grid".to_string()
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_reconnect_delay_seconds() -> u64 {
    5
}
fn default_osd_font() -> String {
    "Sans".to_string()
}
fn default_osd_color() -> String {
    "#FFFFFF".to_string()
}
fn default_osd_alignment() -> String {
    "top-left".to_string()
}
fn default_osd_padding() -> u32 {
    8
}
fn default_min_free_space_gb() -> u64 {
    1
}

impl SettingsSnapshot {
    /// Load and validate a snapshot from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NvrError::Config(format!("cannot read config file: {e}")))?;
        let snapshot: SettingsSnapshot = toml::from_str(&content)
            .map_err(|e| NvrError::Config(format!("invalid TOML: {e}")))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(NvrError::Config("no cameras defined".into()));
        }
        if !(1..=1440).contains(&self.recording.rotation_minutes) {
            return Err(NvrError::Config(
                "recording.rotation_minutes must be within 1..=1440".into(),
            ));
        }
        if self.storage.min_free_space_gb == 0 {
            return Err(NvrError::Config(
                "storage.min_free_space_gb must be > 0".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for cam in &self.cameras {
            if !seen.insert(cam.camera_id.clone()) {
                return Err(NvrError::Config(format!(
                    "duplicate camera_id '{}'",
                    cam.camera_id
                )));
            }
            if cam.video_transform.enabled {
                // Rejecting non-cardinal rotations is enforced by the closed
                // `Rotation` enum itself; nothing else to check here.
            }
        }
        Ok(())
    }

    pub fn camera(&self, camera_id: &str) -> Option<&CameraSettings> {
        self.cameras.iter().find(|c| c.camera_id == camera_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_table_matches_spec() {
        let cases = [
            (Rotation::R0, FlipMode::None, TransformMethod::Identity),
            (Rotation::R0, FlipMode::Horizontal, TransformMethod::HorizontalFlip),
            (Rotation::R0, FlipMode::Vertical, TransformMethod::VerticalFlip),
            (Rotation::R0, FlipMode::Both, TransformMethod::Rotate180),
            (Rotation::R90, FlipMode::None, TransformMethod::Clockwise90),
            (Rotation::R90, FlipMode::Both, TransformMethod::Clockwise90),
            (Rotation::R270, FlipMode::None, TransformMethod::CounterClockwise90),
            (Rotation::R180, FlipMode::None, TransformMethod::Rotate180),
            (Rotation::R180, FlipMode::Horizontal, TransformMethod::VerticalFlip),
            (Rotation::R180, FlipMode::Vertical, TransformMethod::HorizontalFlip),
        ];
        for (rotation, flip, expected) in cases {
            let vt = VideoTransform { enabled: true, flip, rotation };
            assert_eq!(vt.method(), expected, "{:?}/{:?}", rotation, flip);
        }
    }

    #[test]
    fn file_format_extension_and_muxer() {
        assert_eq!(FileFormat::Mp4.extension(), "mp4");
        assert_eq!(FileFormat::Mp4.muxer_factory(), "qtmux");
        assert_eq!(FileFormat::Mkv.extension(), "mkv");
        assert_eq!(FileFormat::Avi.muxer_factory(), "avimux");
    }
}
