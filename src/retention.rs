use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::app::Application;
use crate::store::RecordingFilter;

/// Sweeps expired recordings once at startup and then on a fixed interval
/// (24h by default). A recording row without a file on disk is still
/// deleted; a missing file is not treated as an error.
pub async fn run(app: Arc<Application>) {
    sweep_once(&app).await;

    let mut ticker = tokio::time::interval(Duration::from_secs(app.config.retention.sweep_interval_secs));
    ticker.tick().await; // consume the immediate first tick, we already swept above
    loop {
        ticker.tick().await;
        sweep_once(&app).await;
    }
}

async fn sweep_once(app: &Arc<Application>) {
    let cameras = match app.store.list_cameras().await {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "retention sweep failed to list cameras");
            return;
        }
    };

    let mut deleted = 0u64;
    for camera in cameras {
        let cutoff = Utc::now() - chrono::Duration::days(camera.recording.retention_days as i64);
        let recordings = match app
            .store
            .list_recordings(RecordingFilter {
                camera_id: Some(camera.id),
                ..Default::default()
            })
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(camera_id = %camera.id, error = %e, "retention sweep failed to list recordings");
                continue;
            }
        };

        for recording in recordings {
            if recording.is_active() {
                continue;
            }
            if recording.start_time >= cutoff {
                continue;
            }

            match tokio::fs::remove_file(&recording.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %recording.path, error = %e, "failed to remove expired recording file");
                }
            }

            if let Err(e) = app.store.delete_recording(recording.id).await {
                warn!(recording_id = %recording.id, error = %e, "failed to delete expired recording row");
                continue;
            }
            deleted += 1;
        }
    }

    if deleted > 0 {
        info!(deleted, "retention sweep removed expired recordings");
    } else {
        debug!("retention sweep found nothing to remove");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnprPolicy, CameraStatus, GridPosition, ObservedMetadata, Recording, RecordingMode, RecordingPolicy};
    use crate::store::{InMemoryStore, MetadataStore};
    use uuid::Uuid;

    fn camera(retention_days: u32) -> crate::model::Camera {
        crate::model::Camera {
            id: Uuid::new_v4(),
            name: "cam".into(),
            location: None,
            ingress_url: "rtsp://example/cam".into(),
            username: None,
            stored_secret: None,
            tags: vec![],
            grid: GridPosition::default(),
            recording: RecordingPolicy {
                mode: RecordingMode::Continuous,
                segment_seconds: 10,
                retention_days,
            },
            anpr: AnprPolicy {
                enabled: false,
                sample_every_n_frames: 5,
                confidence_threshold: 0.5,
            },
            status: CameraStatus::Online,
            last_seen: None,
            observed: ObservedMetadata::default(),
        }
    }

    #[tokio::test]
    async fn sweep_deletes_expired_row_even_without_a_file() {
        let store = InMemoryStore::new();
        let cam = camera(1);
        store.put_camera(cam.clone()).await.unwrap();

        let old_start = Utc::now() - chrono::Duration::hours(25);
        let recording = Recording {
            id: Uuid::new_v4(),
            camera_id: cam.id,
            date: old_start.date_naive(),
            start_time: old_start,
            end_time: Some(old_start + chrono::Duration::seconds(30)),
            path: "/nonexistent/path.mp4".into(),
            duration_sec: Some(30),
            size_bytes: Some(10),
            container: "mp4".into(),
            observed: ObservedMetadata::default(),
        };
        store.put_recording(recording.clone()).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(cam.recording.retention_days as i64);
        assert!(recording.start_time < cutoff);

        // Mirrors sweep_once's per-recording body without constructing a
        // full Application (kept store-only for a focused unit test).
        if !recording.is_active() && recording.start_time < cutoff {
            let _ = tokio::fs::remove_file(&recording.path).await;
            store.delete_recording(recording.id).await.unwrap();
        }

        assert!(store.get_recording(recording.id).await.is_err());
    }

    #[tokio::test]
    async fn active_recording_is_never_swept() {
        let store = InMemoryStore::new();
        let cam = camera(1);
        store.put_camera(cam.clone()).await.unwrap();

        let old_start = Utc::now() - chrono::Duration::hours(48);
        let recording = Recording {
            id: Uuid::new_v4(),
            camera_id: cam.id,
            date: old_start.date_naive(),
            start_time: old_start,
            end_time: None,
            path: "/nonexistent/active.mp4".into(),
            duration_sec: None,
            size_bytes: None,
            container: "mp4".into(),
            observed: ObservedMetadata::default(),
        };
        store.put_recording(recording.clone()).await.unwrap();

        assert!(recording.is_active());
        assert!(store.get_recording(recording.id).await.is_ok());
    }
}
