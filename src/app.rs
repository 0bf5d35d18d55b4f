use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::info;

use crate::anpr::{self, AnprHandles, DedupFilter, DetectPlates, ExtractText, StubDetector, StubExtractor};
use crate::bus::EventBus;
use crate::config::Config;
use crate::error::Result;
use crate::model::{Camera, CameraId};
use crate::store::MetadataStore;
use crate::supervisor::{self, CameraSupervisorHandle, SupervisorHandles};
use crate::transcoder::TranscoderDriver;
use crate::vault::CredentialVault;

/// The single composition root: every shared dependency is constructed once
/// here and handed out as `Arc<Application>`. No module-level statics exist
/// anywhere in the crate; anything that needs the store, the bus, or a
/// running supervisor reaches it through this value.
pub struct Application {
    pub config: Config,
    pub store: Arc<dyn MetadataStore>,
    pub bus: Arc<EventBus>,
    pub vault: Arc<CredentialVault>,
    pub transcoder: Arc<dyn TranscoderDriver>,
    pub anpr_enabled: bool,
    supervisor_handles: Arc<SupervisorHandles>,
    anpr_handles: Arc<AnprHandles>,
    supervisors: RwLock<HashMap<CameraId, CameraSupervisorHandle>>,
    anpr_cancels: RwLock<HashMap<CameraId, watch::Sender<bool>>>,
    anpr_dedup: RwLock<HashMap<CameraId, Arc<Mutex<DedupFilter>>>>,
    anpr_dedup_window_secs: u64,
}

impl Application {
    pub fn new(
        config: Config,
        store: Arc<dyn MetadataStore>,
        bus: Arc<EventBus>,
        vault: Arc<CredentialVault>,
        transcoder: Arc<dyn TranscoderDriver>,
        anpr_enabled: bool,
    ) -> Arc<Self> {
        Self::with_anpr_strategies(
            config,
            store,
            bus,
            vault,
            transcoder,
            anpr_enabled,
            Arc::new(StubDetector::default()),
            Arc::new(StubExtractor::default()),
        )
    }

    pub fn with_anpr_strategies(
        config: Config,
        store: Arc<dyn MetadataStore>,
        bus: Arc<EventBus>,
        vault: Arc<CredentialVault>,
        transcoder: Arc<dyn TranscoderDriver>,
        anpr_enabled: bool,
        detector: Arc<dyn DetectPlates>,
        extractor: Arc<dyn ExtractText>,
    ) -> Arc<Self> {
        let anpr_handles = Arc::new(AnprHandles {
            store: store.clone(),
            bus: bus.clone(),
            transcoder: transcoder.clone(),
            detector,
            extractor,
            data_dir: config.storage.data_dir.clone(),
            extract_timeout: Duration::from_secs(config.anpr.extract_timeout_secs),
            dedup_prune_interval_secs: config.anpr.dedup_prune_interval_secs,
        });

        let supervisor_handles = Arc::new(SupervisorHandles {
            store: store.clone(),
            bus: bus.clone(),
            transcoder: transcoder.clone(),
            vault: vault.clone(),
            storage: config.storage.clone(),
            transcoder_cfg: config.transcoder.clone(),
            anpr_handles: anpr_handles.clone(),
        });

        let anpr_dedup_window_secs = config.anpr.dedup_window_secs;

        Arc::new(Self {
            config,
            store,
            bus,
            vault,
            transcoder,
            anpr_enabled,
            supervisor_handles,
            anpr_handles,
            supervisors: RwLock::new(HashMap::new()),
            anpr_cancels: RwLock::new(HashMap::new()),
            anpr_dedup: RwLock::new(HashMap::new()),
            anpr_dedup_window_secs,
        })
    }

    pub fn get_supervisor(&self, camera_id: CameraId) -> Option<CameraSupervisorHandle> {
        self.supervisors.read().get(&camera_id).cloned()
    }

    /// Starts the supervisor (and, if eligible, the ANPR worker) for a
    /// camera that was just created or loaded at startup. The dedup filter
    /// is created once here and shared between the supervisor's `trigger
    /// anpr` command and the periodic worker, whichever runs.
    pub fn register_camera(self: &Arc<Self>, camera: Camera) {
        let camera_id = camera.id;
        let eligible = anpr::camera_anpr_eligible(&camera, self.anpr_enabled);

        let dedup = Arc::new(Mutex::new(DedupFilter::new(self.anpr_dedup_window_secs)));
        self.anpr_dedup.write().insert(camera_id, dedup.clone());

        let handle = supervisor::spawn(camera.clone(), self.supervisor_handles.clone(), dedup.clone());
        self.supervisors.write().insert(camera_id, handle);

        if eligible {
            self.spawn_anpr_worker(camera, dedup);
        }
        info!(%camera_id, anpr_eligible = eligible, "camera registered");
    }

    fn spawn_anpr_worker(self: &Arc<Self>, camera: Camera, dedup: Arc<Mutex<DedupFilter>>) {
        let (tx, rx) = watch::channel(false);
        self.anpr_cancels.write().insert(camera.id, tx);
        let handles = self.anpr_handles.clone();
        tokio::spawn(anpr::run_periodic(camera, handles, dedup, rx));
    }

    /// Stops and removes a camera's supervisor and ANPR worker, for
    /// `delete camera`: finalizes any in-progress recording, then stops the
    /// live child, then the caller deletes the store row.
    pub async fn deregister_camera(&self, camera_id: CameraId) -> Result<()> {
        if let Some(cancel) = self.anpr_cancels.write().remove(&camera_id) {
            let _ = cancel.send(true);
        }
        if let Some(handle) = self.supervisors.write().remove(&camera_id) {
            handle.shutdown(true).await?;
        }
        self.anpr_dedup.write().remove(&camera_id);
        Ok(())
    }

    /// Re-applies a camera's policy to its running supervisor and restarts
    /// (or starts) its ANPR worker if eligibility changed.
    pub async fn update_camera(self: &Arc<Self>, camera: Camera) -> Result<()> {
        let camera_id = camera.id;
        if let Some(handle) = self.get_supervisor(camera_id) {
            handle.update_config(camera.clone()).await?;
        }

        let should_run_anpr = anpr::camera_anpr_eligible(&camera, self.anpr_enabled);
        let already_running = self.anpr_cancels.read().contains_key(&camera_id);
        if should_run_anpr && !already_running {
            let dedup = self
                .anpr_dedup
                .read()
                .get(&camera_id)
                .cloned()
                .unwrap_or_else(|| Arc::new(Mutex::new(DedupFilter::new(self.anpr_dedup_window_secs))));
            self.spawn_anpr_worker(camera, dedup);
        } else if !should_run_anpr && already_running {
            if let Some(cancel) = self.anpr_cancels.write().remove(&camera_id) {
                let _ = cancel.send(true);
            }
        }
        Ok(())
    }

    /// Dispatches a one-shot ANPR sample for `camera_id` through its
    /// supervisor, sharing the periodic worker's dedup state.
    pub async fn trigger_anpr(&self, camera_id: CameraId) -> Result<()> {
        let handle = self
            .get_supervisor(camera_id)
            .ok_or_else(|| crate::error::VmsError::not_found("camera supervisor not running"))?;
        handle.trigger_anpr().await
    }
}
