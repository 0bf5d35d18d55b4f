use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::anpr::{self, AnprHandles, DedupFilter};
use crate::bus::{BusEvent, EventBus};
use crate::config::{StorageConfig, TranscoderConfig};
use crate::error::{Result, VmsError};
use crate::model::{Camera, CameraId, CameraStatus, ObservedMetadata, Recording, RecordingId};
use crate::store::MetadataStore;
use crate::transcoder::{ChildHandle, TranscoderDriver};
use crate::vault::CredentialVault;

const COMMAND_QUEUE_CAPACITY: usize = 32;
const STABLE_RESET_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Starting,
    Online,
    Reconnecting,
    Restarting,
    Stopping,
    Failed,
}

impl From<SupervisorState> for CameraStatus {
    fn from(s: SupervisorState) -> Self {
        match s {
            SupervisorState::Online | SupervisorState::Starting => CameraStatus::Online,
            SupervisorState::Reconnecting => CameraStatus::Reconnecting,
            SupervisorState::Failed => CameraStatus::Error,
            _ => CameraStatus::Offline,
        }
    }
}

enum Command {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<Result<()>>),
    Restart(oneshot::Sender<Result<()>>),
    BeginRecording(oneshot::Sender<Result<RecordingId>>),
    EndRecording(oneshot::Sender<Result<Recording>>),
    Snapshot(oneshot::Sender<Result<String>>),
    UpdateConfig(Camera, oneshot::Sender<Result<()>>),
    TriggerAnpr(oneshot::Sender<Result<()>>),
    Shutdown { finalize_recording: bool, reply: oneshot::Sender<Result<()>> },
}

/// Lightweight, cloneable handle used by callers (the HTTP layer, the
/// Health Prober) to reach a running supervisor. All commands are
/// serialized through the bounded channel; the supervisor task is the only
/// writer of this camera's state.
#[derive(Clone)]
pub struct CameraSupervisorHandle {
    pub camera_id: CameraId,
    tx: mpsc::Sender<Command>,
}

impl CameraSupervisorHandle {
    pub async fn start(&self) -> Result<()> {
        self.call(Command::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.call(Command::Stop).await
    }

    pub async fn restart(&self) -> Result<()> {
        self.call(Command::Restart).await
    }

    pub async fn begin_recording(&self) -> Result<RecordingId> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::BeginRecording(tx)).await?;
        rx.await.map_err(|_| VmsError::Cancelled)?
    }

    pub async fn end_recording(&self) -> Result<Recording> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::EndRecording(tx)).await?;
        rx.await.map_err(|_| VmsError::Cancelled)?
    }

    pub async fn snapshot(&self) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| VmsError::Cancelled)?
    }

    pub async fn update_config(&self, camera: Camera) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::UpdateConfig(camera, tx)).await?;
        rx.await.map_err(|_| VmsError::Cancelled)?
    }

    /// One-shot ANPR sample, bypassing the periodic interval but sharing the
    /// same per-camera dedup filter as the periodic worker.
    pub async fn trigger_anpr(&self) -> Result<()> {
        self.call(Command::TriggerAnpr).await
    }

    pub async fn shutdown(&self, finalize_recording: bool) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown {
            finalize_recording,
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| VmsError::Cancelled)?
    }

    async fn call(&self, make: impl FnOnce(oneshot::Sender<Result<()>>) -> Command) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| VmsError::Cancelled)?
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| VmsError::fatal("supervisor task is gone"))
    }
}

pub struct SupervisorHandles {
    pub store: Arc<dyn MetadataStore>,
    pub bus: Arc<EventBus>,
    pub transcoder: Arc<dyn TranscoderDriver>,
    pub vault: Arc<CredentialVault>,
    pub storage: StorageConfig,
    pub transcoder_cfg: TranscoderConfig,
    pub anpr_handles: Arc<AnprHandles>,
}

/// Spawns the per-camera supervisor task and returns a handle to it. The
/// task runs until `shutdown` completes or the handle is dropped and the
/// channel closes. `anpr_dedup` is the same dedup filter the camera's
/// periodic ANPR worker (if any) uses, so a `trigger anpr` command shares
/// dedup state with it rather than tracking its own.
pub fn spawn(
    camera: Camera,
    handles: Arc<SupervisorHandles>,
    anpr_dedup: Arc<SyncMutex<DedupFilter>>,
) -> CameraSupervisorHandle {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let camera_id = camera.id;
    tokio::spawn(run(camera, rx, handles, anpr_dedup));
    CameraSupervisorHandle { camera_id, tx }
}

struct Actor {
    camera: Camera,
    state: SupervisorState,
    handles: Arc<SupervisorHandles>,
    live: Option<ChildHandle>,
    recording: Option<(RecordingId, ChildHandle, chrono::DateTime<Utc>, PathBuf)>,
    consecutive_failures: u32,
    online_since: Option<Instant>,
    anpr_dedup: Arc<SyncMutex<DedupFilter>>,
}

async fn run(
    camera: Camera,
    mut rx: mpsc::Receiver<Command>,
    handles: Arc<SupervisorHandles>,
    anpr_dedup: Arc<SyncMutex<DedupFilter>>,
) {
    let mut actor = Actor {
        camera,
        state: SupervisorState::Idle,
        handles,
        live: None,
        recording: None,
        consecutive_failures: 0,
        online_since: None,
        anpr_dedup,
    };

    loop {
        let live_exit = async {
            match &mut actor.live {
                Some(h) => h.wait().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    Some(cmd) => {
                        if actor.handle_command(cmd).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            exit = live_exit => {
                actor.handle_live_exit(exit).await;
            }
        }
    }

    debug!(camera_id = %actor.camera.id, "supervisor task exiting");
}

impl Actor {
    async fn resolved_url(&self) -> Result<String> {
        let Camera {
            ingress_url,
            username,
            stored_secret,
            ..
        } = &self.camera;

        if let (Some(user), Some(secret)) = (username, stored_secret) {
            let password = self.handles.vault.open(secret)?;
            if let Some(idx) = ingress_url.find("://") {
                let (scheme, rest) = ingress_url.split_at(idx + 3);
                return Ok(format!("{scheme}{user}:{password}@{rest}"));
            }
        }
        Ok(ingress_url.clone())
    }

    fn live_dir(&self) -> PathBuf {
        PathBuf::from(&self.handles.storage.data_dir)
            .join("streams")
            .join(self.camera.id.to_string())
            .join("live")
    }

    async fn set_state(&mut self, state: SupervisorState) {
        if self.state == state {
            return;
        }
        info!(camera_id = %self.camera.id, from = ?self.state, to = ?state, "supervisor state transition");
        self.state = state;
        self.camera.status = state.into();
        self.camera.last_seen = Some(Utc::now());
        if state == SupervisorState::Online {
            self.online_since = Some(Instant::now());
        }
        if let Err(e) = self.handles.store.put_camera(self.camera.clone()).await {
            error!(camera_id = %self.camera.id, error = %e, "failed to persist camera status transition");
        }
        self.handles
            .bus
            .publish(BusEvent::CameraStatus {
                camera_id: self.camera.id,
                status: self.camera.status,
            });
    }

    async fn start_live(&mut self) {
        self.set_state(SupervisorState::Starting).await;
        let url = match self.resolved_url().await {
            Ok(u) => u,
            Err(e) => {
                error!(camera_id = %self.camera.id, error = %e, "failed to resolve ingress url");
                self.set_state(SupervisorState::Failed).await;
                return;
            }
        };

        let dir = self.live_dir();
        match self
            .handles
            .transcoder
            .start_live_segmenter(
                self.camera.id,
                &url,
                &dir,
                self.handles.storage.live_segment_secs,
                self.handles.storage.live_window_segments,
            )
            .await
        {
            Ok(handle) => {
                self.live = Some(handle);
                self.set_state(SupervisorState::Online).await;
            }
            Err(e) => {
                error!(camera_id = %self.camera.id, error = %e, "failed to start live segmenter");
                self.set_state(SupervisorState::Failed).await;
            }
        }
    }

    async fn stop_live(&mut self) {
        if let Some(mut handle) = self.live.take() {
            handle.terminate();
            let _ = handle.wait().await;
        }
    }

    async fn handle_live_exit(&mut self, _exit: Option<crate::transcoder::ExitStatus>) {
        self.live = None;
        if matches!(self.state, SupervisorState::Stopping) {
            self.set_state(SupervisorState::Idle).await;
            return;
        }

        if let Some(since) = self.online_since {
            if since.elapsed() >= STABLE_RESET_AFTER {
                self.consecutive_failures = 0;
            }
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures > self.handles.transcoder_cfg.restart_max_attempts {
            error!(
                camera_id = %self.camera.id,
                attempts = self.consecutive_failures,
                "giving up after repeated reconnect failures"
            );
            self.set_state(SupervisorState::Failed).await;
            return;
        }

        let backoff = backoff_for(
            self.consecutive_failures,
            self.handles.transcoder_cfg.restart_initial_backoff_secs,
            self.handles.transcoder_cfg.restart_max_backoff_secs,
        );
        warn!(camera_id = %self.camera.id, attempt = self.consecutive_failures, ?backoff, "live segmenter exited, reconnecting");
        self.set_state(SupervisorState::Reconnecting).await;
        tokio::time::sleep(backoff).await;
        self.start_live().await;
    }

    /// Returns `true` if the actor loop should terminate.
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Start(reply) => {
                if matches!(self.state, SupervisorState::Idle | SupervisorState::Failed) {
                    self.consecutive_failures = 0;
                    self.start_live().await;
                }
                let _ = reply.send(Ok(()));
                false
            }
            Command::Stop(reply) => {
                self.set_state(SupervisorState::Stopping).await;
                self.stop_live().await;
                self.set_state(SupervisorState::Idle).await;
                let _ = reply.send(Ok(()));
                false
            }
            Command::Restart(reply) => {
                self.set_state(SupervisorState::Restarting).await;
                self.stop_live().await;
                self.start_live().await;
                let _ = reply.send(Ok(()));
                false
            }
            Command::BeginRecording(reply) => {
                let result = self.begin_recording().await;
                let _ = reply.send(result);
                false
            }
            Command::EndRecording(reply) => {
                let result = self.end_recording().await;
                let _ = reply.send(result);
                false
            }
            Command::Snapshot(reply) => {
                let result = self.snapshot().await;
                let _ = reply.send(result);
                false
            }
            Command::UpdateConfig(new_camera, reply) => {
                let result = self.update_config(new_camera).await;
                let _ = reply.send(result);
                false
            }
            Command::TriggerAnpr(reply) => {
                let result = anpr::run_one_shot(&self.camera, &self.handles.anpr_handles, &self.anpr_dedup).await;
                let _ = reply.send(result);
                false
            }
            Command::Shutdown {
                finalize_recording,
                reply,
            } => {
                if finalize_recording && self.recording.is_some() {
                    let _ = self.end_recording().await;
                }
                self.stop_live().await;
                self.set_state(SupervisorState::Idle).await;
                let _ = reply.send(Ok(()));
                true
            }
        }
    }

    async fn begin_recording(&mut self) -> Result<RecordingId> {
        if self.recording.is_some() {
            return Err(VmsError::conflict("recording already active"));
        }

        let url = self.resolved_url().await?;
        let now = Utc::now();
        let date = now.date_naive();
        let file_name = format!(
            "recording_{}.mp4",
            now.to_rfc3339().replace(':', "-").replace('.', "-")
        );
        let path = PathBuf::from(&self.handles.storage.data_dir)
            .join("records")
            .join(self.camera.id.to_string())
            .join(date.format("%Y-%m-%d").to_string())
            .join(&file_name);

        let handle = self
            .handles
            .transcoder
            .start_recording(self.camera.id, &url, &path)
            .await?;

        let recording_id = Uuid::new_v4();
        let recording = Recording {
            id: recording_id,
            camera_id: self.camera.id,
            date,
            start_time: now,
            end_time: None,
            path: path.to_string_lossy().to_string(),
            duration_sec: None,
            size_bytes: None,
            container: "mp4".to_string(),
            observed: ObservedMetadata::default(),
        };
        self.handles.store.put_recording(recording.clone()).await?;
        self.handles
            .bus
            .publish(BusEvent::RecordingStarted(recording));
        self.recording = Some((recording_id, handle, now, path));
        Ok(recording_id)
    }

    async fn end_recording(&mut self) -> Result<Recording> {
        let (recording_id, mut handle, start_time, path) = self
            .recording
            .take()
            .ok_or_else(|| VmsError::conflict("no active recording"))?;

        handle.terminate();
        let _ = handle.wait().await;

        let mut recording = self.handles.store.get_recording(recording_id).await?;
        let size = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        recording.finalize(Utc::now(), size);
        debug_assert_eq!(recording.start_time, start_time);
        self.handles.store.put_recording(recording.clone()).await?;
        self.handles
            .bus
            .publish(BusEvent::RecordingStopped(recording.clone()));
        Ok(recording)
    }

    async fn snapshot(&mut self) -> Result<String> {
        if self.state != SupervisorState::Online {
            return Err(VmsError::validation("camera is not online"));
        }
        let url = self.resolved_url().await?;
        let now = Utc::now();
        let file_name = format!(
            "snapshot_{}.jpg",
            now.to_rfc3339().replace(':', "-").replace('.', "-")
        );
        let path = PathBuf::from(&self.handles.storage.data_dir)
            .join("snapshots")
            .join(self.camera.id.to_string())
            .join(&file_name);
        self.handles.transcoder.take_snapshot(&url, &path).await?;
        Ok(path.to_string_lossy().to_string())
    }

    async fn update_config(&mut self, new_camera: Camera) -> Result<()> {
        new_camera.validate()?;
        if self.camera.config_eq(&new_camera) {
            // Identical config is a true no-op: no restart, no bus event.
            return Ok(());
        }

        let url_changed = self.camera.ingress_url != new_camera.ingress_url
            || self.camera.username != new_camera.username
            || self.camera.stored_secret != new_camera.stored_secret;

        if url_changed && self.recording.is_some() {
            let _ = self.end_recording().await;
        }

        self.camera = new_camera;
        self.handles
            .bus
            .publish(BusEvent::CameraUpdated(self.camera.clone()));

        if matches!(self.state, SupervisorState::Online | SupervisorState::Starting) {
            self.set_state(SupervisorState::Restarting).await;
            self.stop_live().await;
            self.start_live().await;
        }
        Ok(())
    }
}

/// `attempt` starts at 1. First failure waits `initial`; doubling after
/// that, capped at `max`.
fn backoff_for(attempt: u32, initial_secs: u64, max_secs: u64) -> Duration {
    if attempt <= 1 {
        return Duration::from_secs(initial_secs);
    }
    let scaled = initial_secs.saturating_mul(1u64 << (attempt - 1).min(10));
    Duration::from_secs(scaled.min(max_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_starts_at_initial_and_caps() {
        assert_eq!(backoff_for(1, 5, 60), Duration::from_secs(5));
        assert_eq!(backoff_for(2, 5, 60), Duration::from_secs(10));
        assert_eq!(backoff_for(3, 5, 60), Duration::from_secs(20));
        assert_eq!(backoff_for(10, 5, 60), Duration::from_secs(60));
    }

    #[test]
    fn state_maps_to_camera_status() {
        assert_eq!(CameraStatus::from(SupervisorState::Online), CameraStatus::Online);
        assert_eq!(CameraStatus::from(SupervisorState::Idle), CameraStatus::Offline);
        assert_eq!(CameraStatus::from(SupervisorState::Failed), CameraStatus::Error);
    }
}
