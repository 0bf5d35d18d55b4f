mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{AnprEvent, Camera, CameraId, Recording, RecordingId, SystemStats, User, UserId};

#[derive(Debug, Clone, Default)]
pub struct RecordingFilter {
    pub camera_id: Option<CameraId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct AnprEventFilter {
    pub camera_id: Option<CameraId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub plate_contains: Option<String>,
}

/// Abstract repository over the four entities. The crate ships
/// [`InMemoryStore`] as the concrete implementation; a future on-disk
/// implementation only needs to satisfy this trait.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn put_camera(&self, camera: Camera) -> Result<()>;
    async fn get_camera(&self, id: CameraId) -> Result<Camera>;
    async fn list_cameras(&self) -> Result<Vec<Camera>>;
    async fn delete_camera(&self, id: CameraId) -> Result<()>;

    async fn put_recording(&self, recording: Recording) -> Result<()>;
    async fn get_recording(&self, id: RecordingId) -> Result<Recording>;
    async fn list_recordings(&self, filter: RecordingFilter) -> Result<Vec<Recording>>;
    async fn active_recording_for_camera(&self, camera_id: CameraId) -> Result<Option<Recording>>;
    async fn delete_recording(&self, id: RecordingId) -> Result<()>;

    async fn put_anpr_event(&self, event: AnprEvent) -> Result<()>;
    async fn list_anpr_events(&self, filter: AnprEventFilter) -> Result<Vec<AnprEvent>>;
    async fn count_anpr_events_since(&self, camera_id: Option<CameraId>, since: DateTime<Utc>) -> Result<u64>;

    async fn put_user(&self, user: User) -> Result<()>;
    async fn get_user(&self, id: UserId) -> Result<User>;
    async fn get_user_by_email(&self, email: &str) -> Result<User>;

    async fn system_stats(&self) -> Result<SystemStats>;
}
