use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{Result, VmsError};
use crate::model::{
    AnprEvent, AnprEventId, Camera, CameraId, CameraStatus, Recording, RecordingId, SystemStats,
    User, UserId,
};

use super::{AnprEventFilter, MetadataStore, RecordingFilter};

/// In-memory reference implementation of [`MetadataStore`]. Each table is
/// guarded by its own `RwLock`; a mutating call holds the write lock for the
/// whole operation, which is coarser than per-row locking but keeps every
/// invariant in the testable-properties list linearizable without extra
/// bookkeeping.
#[derive(Default)]
pub struct InMemoryStore {
    cameras: RwLock<HashMap<CameraId, Camera>>,
    recordings: RwLock<HashMap<RecordingId, Recording>>,
    anpr_events: RwLock<HashMap<AnprEventId, AnprEvent>>,
    users: RwLock<HashMap<UserId, User>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn put_camera(&self, camera: Camera) -> Result<()> {
        self.cameras.write().await.insert(camera.id, camera);
        Ok(())
    }

    async fn get_camera(&self, id: CameraId) -> Result<Camera> {
        self.cameras
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| VmsError::not_found(format!("camera {id}")))
    }

    async fn list_cameras(&self) -> Result<Vec<Camera>> {
        let mut cameras: Vec<Camera> = self.cameras.read().await.values().cloned().collect();
        cameras.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(cameras)
    }

    async fn delete_camera(&self, id: CameraId) -> Result<()> {
        self.cameras
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| VmsError::not_found(format!("camera {id}")))?;

        // Cascade: recordings and ANPR events belonging to this camera.
        self.recordings
            .write()
            .await
            .retain(|_, r| r.camera_id != id);
        self.anpr_events
            .write()
            .await
            .retain(|_, e| e.camera_id != id);
        Ok(())
    }

    async fn put_recording(&self, recording: Recording) -> Result<()> {
        self.recordings
            .write()
            .await
            .insert(recording.id, recording);
        Ok(())
    }

    async fn get_recording(&self, id: RecordingId) -> Result<Recording> {
        self.recordings
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| VmsError::not_found(format!("recording {id}")))
    }

    async fn list_recordings(&self, filter: RecordingFilter) -> Result<Vec<Recording>> {
        let mut out: Vec<Recording> = self
            .recordings
            .read()
            .await
            .values()
            .filter(|r| match filter.camera_id {
                Some(cid) => r.camera_id == cid,
                None => true,
            })
            .filter(|r| match filter.from {
                Some(from) => r.start_time >= from,
                None => true,
            })
            .filter(|r| match filter.to {
                Some(to) => r.start_time <= to,
                None => true,
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(out)
    }

    async fn active_recording_for_camera(&self, camera_id: CameraId) -> Result<Option<Recording>> {
        Ok(self
            .recordings
            .read()
            .await
            .values()
            .find(|r| r.camera_id == camera_id && r.is_active())
            .cloned())
    }

    async fn delete_recording(&self, id: RecordingId) -> Result<()> {
        self.recordings
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| VmsError::not_found(format!("recording {id}")))?;
        Ok(())
    }

    async fn put_anpr_event(&self, event: AnprEvent) -> Result<()> {
        self.anpr_events.write().await.insert(event.id, event);
        Ok(())
    }

    async fn list_anpr_events(&self, filter: AnprEventFilter) -> Result<Vec<AnprEvent>> {
        let needle = filter.plate_contains.map(|p| p.to_ascii_uppercase());
        let mut out: Vec<AnprEvent> = self
            .anpr_events
            .read()
            .await
            .values()
            .filter(|e| match filter.camera_id {
                Some(cid) => e.camera_id == cid,
                None => true,
            })
            .filter(|e| match filter.from {
                Some(from) => e.timestamp >= from,
                None => true,
            })
            .filter(|e| match filter.to {
                Some(to) => e.timestamp <= to,
                None => true,
            })
            .filter(|e| match &needle {
                Some(n) => e.plate.to_ascii_uppercase().contains(n.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }

    async fn count_anpr_events_since(
        &self,
        camera_id: Option<CameraId>,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let count = self
            .anpr_events
            .read()
            .await
            .values()
            .filter(|e| match camera_id {
                Some(cid) => e.camera_id == cid,
                None => true,
            })
            .filter(|e| e.timestamp >= since)
            .count();
        Ok(count as u64)
    }

    async fn put_user(&self, user: User) -> Result<()> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == user.email && u.id != user.id) {
            return Err(VmsError::conflict(format!(
                "user with email {} already exists",
                user.email
            )));
        }
        users.insert(user.id, user);
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<User> {
        self.users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| VmsError::not_found(format!("user {id}")))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User> {
        self.users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| VmsError::not_found(format!("user with email {email}")))
    }

    async fn system_stats(&self) -> Result<SystemStats> {
        let cameras = self.cameras.read().await;
        let recordings = self.recordings.read().await;
        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        let anpr_today = self
            .anpr_events
            .read()
            .await
            .values()
            .filter(|e| e.timestamp >= midnight)
            .count();

        Ok(SystemStats {
            total_cameras: cameras.len() as u64,
            cameras_online: cameras
                .values()
                .filter(|c| c.status == CameraStatus::Online)
                .count() as u64,
            active_recordings: recordings.values().filter(|r| r.is_active()).count() as u64,
            anpr_events_today: anpr_today as u64,
            storage_used_bytes: None,
            storage_total_bytes: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnprPolicy, BoundingBox, GridPosition, ObservedMetadata, RecordingMode, RecordingPolicy};
    use uuid::Uuid;

    fn sample_camera() -> Camera {
        Camera {
            id: Uuid::new_v4(),
            name: "front-door".into(),
            location: None,
            ingress_url: "rtsp://example/cam1".into(),
            username: None,
            stored_secret: None,
            tags: vec![],
            grid: GridPosition::default(),
            recording: RecordingPolicy {
                mode: RecordingMode::Manual,
                segment_seconds: 10,
                retention_days: 7,
            },
            anpr: AnprPolicy {
                enabled: false,
                sample_every_n_frames: 5,
                confidence_threshold: 0.5,
            },
            status: CameraStatus::Offline,
            last_seen: None,
            observed: ObservedMetadata::default(),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryStore::new();
        let cam = sample_camera();
        store.put_camera(cam.clone()).await.unwrap();
        let fetched = store.get_camera(cam.id).await.unwrap();
        assert_eq!(fetched.name, cam.name);
    }

    #[tokio::test]
    async fn get_missing_camera_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.get_camera(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, VmsError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_camera_cascades_to_recordings_and_events() {
        let store = InMemoryStore::new();
        let cam = sample_camera();
        store.put_camera(cam.clone()).await.unwrap();

        let recording = Recording {
            id: Uuid::new_v4(),
            camera_id: cam.id,
            date: Utc::now().date_naive(),
            start_time: Utc::now(),
            end_time: Some(Utc::now()),
            path: "/tmp/r.mp4".into(),
            duration_sec: Some(10),
            size_bytes: Some(100),
            container: "mp4".into(),
            observed: ObservedMetadata::default(),
        };
        store.put_recording(recording.clone()).await.unwrap();

        let event = AnprEvent {
            id: Uuid::new_v4(),
            camera_id: cam.id,
            timestamp: Utc::now(),
            plate: "ABC123".into(),
            confidence: 0.9,
            snapshot_path: "/tmp/s.jpg".into(),
            bbox: BoundingBox { x: 0, y: 0, w: 1, h: 1 },
            detector_metadata: serde_json::Value::Null,
        };
        store.put_anpr_event(event).await.unwrap();

        store.delete_camera(cam.id).await.unwrap();

        assert!(store.get_recording(recording.id).await.is_err());
        let events = store
            .list_anpr_events(AnprEventFilter {
                camera_id: Some(cam.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn at_most_one_active_recording_is_queryable() {
        let store = InMemoryStore::new();
        let cam = sample_camera();
        store.put_camera(cam.clone()).await.unwrap();
        assert!(store
            .active_recording_for_camera(cam.id)
            .await
            .unwrap()
            .is_none());

        let recording = Recording {
            id: Uuid::new_v4(),
            camera_id: cam.id,
            date: Utc::now().date_naive(),
            start_time: Utc::now(),
            end_time: None,
            path: "/tmp/r2.mp4".into(),
            duration_sec: None,
            size_bytes: None,
            container: "mp4".into(),
            observed: ObservedMetadata::default(),
        };
        store.put_recording(recording.clone()).await.unwrap();
        let active = store.active_recording_for_camera(cam.id).await.unwrap();
        assert_eq!(active.unwrap().id, recording.id);
    }

    #[tokio::test]
    async fn duplicate_user_email_is_conflict() {
        let store = InMemoryStore::new();
        let user = User {
            id: Uuid::new_v4(),
            email: "a@example.com".into(),
            password_hash: "x".into(),
            display_name: "A".into(),
            created_at: Utc::now(),
        };
        store.put_user(user.clone()).await.unwrap();
        let mut dup = user.clone();
        dup.id = Uuid::new_v4();
        let err = store.put_user(dup).await.unwrap_err();
        assert!(matches!(err, VmsError::Conflict(_)));
    }
}
