use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, VmsError};

pub type CameraId = Uuid;
pub type RecordingId = Uuid;
pub type AnprEventId = Uuid;
pub type UserId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Offline,
    Online,
    Reconnecting,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    Off,
    Manual,
    Continuous,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecordingPolicy {
    pub mode: RecordingMode,
    pub segment_seconds: u32,
    pub retention_days: u32,
}

impl RecordingPolicy {
    fn validate(&self) -> Result<()> {
        if !(1..=60).contains(&self.segment_seconds) {
            return Err(VmsError::validation("segment_seconds must be in 1..=60"));
        }
        if !(1..=365).contains(&self.retention_days) {
            return Err(VmsError::validation("retention_days must be in 1..=365"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AnprPolicy {
    pub enabled: bool,
    pub sample_every_n_frames: u32,
    pub confidence_threshold: f32,
}

impl AnprPolicy {
    fn validate(&self) -> Result<()> {
        if !(1..=30).contains(&self.sample_every_n_frames) {
            return Err(VmsError::validation(
                "sample_every_n_frames must be in 1..=30",
            ));
        }
        if !(0.1..=1.0).contains(&self.confidence_threshold) {
            return Err(VmsError::validation(
                "confidence_threshold must be in 0.1..=1.0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct GridPosition {
    pub row: u32,
    pub column: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObservedMetadata {
    pub fps: Option<f32>,
    pub bitrate_kbps: Option<u32>,
    pub resolution: Option<String>,
}

/// A registered camera. `stored_secret` holds a vault ciphertext, never a
/// plaintext credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub id: CameraId,
    pub name: String,
    pub location: Option<String>,
    pub ingress_url: String,
    pub username: Option<String>,
    pub stored_secret: Option<String>,
    pub tags: Vec<String>,
    pub grid: GridPosition,
    pub recording: RecordingPolicy,
    pub anpr: AnprPolicy,
    pub status: CameraStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub observed: ObservedMetadata,
}

impl Camera {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(VmsError::validation("camera name must not be empty"));
        }
        if self.ingress_url.trim().is_empty() {
            return Err(VmsError::validation("ingress_url must not be empty"));
        }
        self.recording.validate()?;
        self.anpr.validate()?;
        Ok(())
    }

    /// Two cameras are config-equivalent when every field that affects the
    /// supervisor's behavior is identical. Status, last_seen, and observed
    /// metadata are supervisor-owned and excluded.
    pub fn config_eq(&self, other: &Camera) -> bool {
        self.name == other.name
            && self.location == other.location
            && self.ingress_url == other.ingress_url
            && self.username == other.username
            && self.stored_secret == other.stored_secret
            && self.tags == other.tags
            && self.grid.row == other.grid.row
            && self.grid.column == other.grid.column
            && self.grid.size == other.grid.size
            && self.recording.mode as u8 == other.recording.mode as u8
            && self.recording.segment_seconds == other.recording.segment_seconds
            && self.recording.retention_days == other.recording.retention_days
            && self.anpr.enabled == other.anpr.enabled
            && self.anpr.sample_every_n_frames == other.anpr.sample_every_n_frames
            && (self.anpr.confidence_threshold - other.anpr.confidence_threshold).abs() < f32::EPSILON
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: RecordingId,
    pub camera_id: CameraId,
    pub date: chrono::NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub path: String,
    pub duration_sec: Option<u64>,
    pub size_bytes: Option<u64>,
    pub container: String,
    pub observed: ObservedMetadata,
}

impl Recording {
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn finalize(&mut self, end_time: DateTime<Utc>, size_bytes: u64) {
        let duration = (end_time - self.start_time).num_seconds().max(0) as u64;
        self.end_time = Some(end_time);
        self.duration_sec = Some(duration);
        self.size_bytes = Some(size_bytes);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnprEvent {
    pub id: AnprEventId,
    pub camera_id: CameraId,
    pub timestamp: DateTime<Utc>,
    pub plate: String,
    pub confidence: f32,
    pub snapshot_path: String,
    pub bbox: BoundingBox,
    pub detector_metadata: serde_json::Value,
}

/// Normalize a raw plate read into the canonical uppercase-alphanumeric form.
/// Returns `None` if the result is shorter than 3 characters.
pub fn normalize_plate(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if cleaned.len() >= 3 {
        Some(cleaned)
    } else {
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_cameras: u64,
    pub cameras_online: u64,
    pub active_recordings: u64,
    pub anpr_events_today: u64,
    pub storage_used_bytes: Option<u64>,
    pub storage_total_bytes: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_plate_rejects_short_strings() {
        assert_eq!(normalize_plate("a1"), None);
        assert_eq!(normalize_plate("ab-1"), Some("AB1".to_string()));
    }

    #[test]
    fn normalize_plate_strips_punctuation_and_upcases() {
        assert_eq!(normalize_plate("ab-123 cd"), Some("AB123CD".to_string()));
    }

    #[test]
    fn recording_finalize_computes_duration() {
        let start = Utc::now();
        let mut rec = Recording {
            id: Uuid::new_v4(),
            camera_id: Uuid::new_v4(),
            date: start.date_naive(),
            start_time: start,
            end_time: None,
            path: "x".into(),
            duration_sec: None,
            size_bytes: None,
            container: "mp4".into(),
            observed: ObservedMetadata::default(),
        };
        let end = start + chrono::Duration::seconds(42);
        rec.finalize(end, 1024);
        assert_eq!(rec.duration_sec, Some(42));
        assert_eq!(rec.size_bytes, Some(1024));
        assert!(!rec.is_active());
    }
}
