mod process;

pub use process::ProcessTranscoderDriver;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::model::CameraId;

/// Outcome of a child process once it exits, delivered to whoever holds the
/// exit-code future. `None` means the process was killed rather than exiting
/// on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A handle to a running (or finished) child process. The owning Camera
/// Supervisor is the only thing that should call `terminate`.
pub struct ChildHandle {
    exit_rx: oneshot::Receiver<ExitStatus>,
    terminate_tx: Option<oneshot::Sender<()>>,
}

impl ChildHandle {
    pub fn new(exit_rx: oneshot::Receiver<ExitStatus>, terminate_tx: oneshot::Sender<()>) -> Self {
        Self {
            exit_rx,
            terminate_tx: Some(terminate_tx),
        }
    }

    /// Request graceful termination. Idempotent: calling twice is a no-op on
    /// the second call since the signal channel is consumed once.
    pub fn terminate(&mut self) {
        if let Some(tx) = self.terminate_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Await process exit. Resolves to `None` if the watcher task was
    /// dropped without ever sending (process supervision aborted).
    pub async fn wait(&mut self) -> Option<ExitStatus> {
        (&mut self.exit_rx).await.ok()
    }
}

/// Spawns and supervises the external transcoder binary. Implementations
/// never restart a failed child themselves; that policy lives in the Camera
/// Supervisor.
#[async_trait]
pub trait TranscoderDriver: Send + Sync {
    async fn start_live_segmenter(
        &self,
        camera_id: CameraId,
        ingress_url: &str,
        output_dir: &Path,
        segment_secs: u32,
        window_segments: u32,
    ) -> Result<ChildHandle>;

    async fn start_recording(
        &self,
        camera_id: CameraId,
        ingress_url: &str,
        output_path: &Path,
    ) -> Result<ChildHandle>;

    async fn take_snapshot(&self, ingress_url: &str, output_path: &Path) -> Result<()>;

    async fn extract_frame(&self, ingress_url: &str, output_path: &Path, timeout: Duration) -> Result<()>;
}

pub mod fake {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    /// A `TranscoderDriver` that spawns nothing external: it fabricates
    /// plausible output so supervisor and ANPR logic can be exercised
    /// without a real `ffmpeg` binary.
    #[derive(Default)]
    pub struct FakeTranscoderDriver {
        pub live_starts: AtomicU64,
        pub recording_starts: AtomicU64,
        pub snapshots: AtomicU64,
        pub frame_extracts: AtomicU64,
        /// When set, the next spawned live segmenter exits immediately with
        /// this code instead of running until terminated.
        pub force_live_exit_code: Option<i32>,
    }

    impl FakeTranscoderDriver {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }
    }

    #[async_trait]
    impl TranscoderDriver for FakeTranscoderDriver {
        async fn start_live_segmenter(
            &self,
            _camera_id: CameraId,
            _ingress_url: &str,
            output_dir: &Path,
            _segment_secs: u32,
            _window_segments: u32,
        ) -> Result<ChildHandle> {
            self.live_starts.fetch_add(1, Ordering::SeqCst);
            tokio::fs::create_dir_all(output_dir).await.ok();
            let playlist = output_dir.join("index.m3u8");
            tokio::fs::write(&playlist, "#EXTM3U\n#EXT-X-VERSION:3\n")
                .await
                .ok();

            let (exit_tx, exit_rx) = oneshot::channel();
            let (terminate_tx, terminate_rx) = oneshot::channel();
            let forced = self.force_live_exit_code;
            tokio::spawn(async move {
                if let Some(code) = forced {
                    let _ = exit_tx.send(ExitStatus { code: Some(code) });
                    return;
                }
                tokio::select! {
                    _ = terminate_rx => {
                        let _ = exit_tx.send(ExitStatus { code: Some(0) });
                    }
                }
            });
            Ok(ChildHandle::new(exit_rx, terminate_tx))
        }

        async fn start_recording(
            &self,
            _camera_id: CameraId,
            _ingress_url: &str,
            output_path: &Path,
        ) -> Result<ChildHandle> {
            self.recording_starts.fetch_add(1, Ordering::SeqCst);
            if let Some(parent) = output_path.parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            tokio::fs::write(output_path, b"").await.ok();

            let (exit_tx, exit_rx) = oneshot::channel();
            let (terminate_tx, terminate_rx) = oneshot::channel();
            tokio::spawn(async move {
                tokio::select! {
                    _ = terminate_rx => {
                        let _ = exit_tx.send(ExitStatus { code: Some(0) });
                    }
                }
            });
            Ok(ChildHandle::new(exit_rx, terminate_tx))
        }

        async fn take_snapshot(&self, _ingress_url: &str, output_path: &Path) -> Result<()> {
            self.snapshots.fetch_add(1, Ordering::SeqCst);
            if let Some(parent) = output_path.parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            tokio::fs::write(output_path, b"fake-jpeg").await?;
            Ok(())
        }

        async fn extract_frame(
            &self,
            _ingress_url: &str,
            output_path: &Path,
            _timeout: Duration,
        ) -> Result<()> {
            self.frame_extracts.fetch_add(1, Ordering::SeqCst);
            if let Some(parent) = output_path.parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            sleep(Duration::from_millis(1)).await;
            tokio::fs::write(output_path, b"fake-frame").await?;
            Ok(())
        }
    }
}
