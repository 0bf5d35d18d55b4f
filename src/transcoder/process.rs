use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::error::{Result, VmsError};
use crate::model::CameraId;

use super::{ChildHandle, ExitStatus, TranscoderDriver};

/// Drives an external media-processing binary (conventionally `ffmpeg`) via
/// `tokio::process::Command`. The binary path is resolved once at
/// construction from `FFMPEG_PATH` or `PATH`.
pub struct ProcessTranscoderDriver {
    binary: String,
    grace_period: Duration,
}

impl ProcessTranscoderDriver {
    pub fn new(binary: impl Into<String>, grace_period: Duration) -> Self {
        Self {
            binary: binary.into(),
            grace_period,
        }
    }

    fn spawn_watched(&self, mut cmd: Command) -> Result<ChildHandle> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| VmsError::transient(format!("spawn {}: {e}", self.binary)))?;

        let (exit_tx, exit_rx) = oneshot::channel();
        let (terminate_tx, mut terminate_rx) = oneshot::channel();
        let grace = self.grace_period;
        let pid = child.id();

        tokio::spawn(async move {
            // One task owns one child's lifetime end to end: it watches for
            // exit and for a termination request, and never outlives either.
            tokio::select! {
                status = child.wait() => {
                    let status = status.map(|s| ExitStatus { code: s.code() }).unwrap_or(ExitStatus { code: None });
                    let _ = exit_tx.send(status);
                }
                _ = &mut terminate_rx => {
                    if let Some(id) = pid {
                        debug!(pid = id, "sending graceful terminate");
                    }
                    // tokio::process has no portable SIGTERM; request a
                    // cooperative quit via stdin-less kill after the grace
                    // period if the child hasn't exited on its own.
                    let graceful = timeout(grace, child.wait()).await;
                    let status = match graceful {
                        Ok(Ok(s)) => ExitStatus { code: s.code() },
                        _ => {
                            warn!("grace period elapsed, force killing child");
                            let _ = child.kill().await;
                            ExitStatus { code: None }
                        }
                    };
                    let _ = exit_tx.send(status);
                }
            }
        });

        Ok(ChildHandle::new(exit_rx, terminate_tx))
    }
}

#[async_trait]
impl TranscoderDriver for ProcessTranscoderDriver {
    async fn start_live_segmenter(
        &self,
        camera_id: CameraId,
        ingress_url: &str,
        output_dir: &Path,
        segment_secs: u32,
        window_segments: u32,
    ) -> Result<ChildHandle> {
        tokio::fs::create_dir_all(output_dir).await?;
        let playlist = output_dir.join("index.m3u8");
        let segment_pattern = output_dir.join("segment_%03d.ts");

        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "-rtsp_transport",
            "tcp",
            "-i",
            ingress_url,
            "-c:v",
            "libx264",
            "-preset",
            "ultrafast",
            "-tune",
            "zerolatency",
            "-c:a",
            "aac",
            "-f",
            "hls",
            "-hls_time",
            &segment_secs.to_string(),
            "-hls_list_size",
            &window_segments.to_string(),
            "-hls_flags",
            "delete_segments+program_date_time",
            "-hls_segment_filename",
        ])
        .arg(&segment_pattern)
        .arg(&playlist);

        debug!(%camera_id, dir = %output_dir.display(), "starting live segmenter");
        self.spawn_watched(cmd)
    }

    async fn start_recording(
        &self,
        camera_id: CameraId,
        ingress_url: &str,
        output_path: &Path,
    ) -> Result<ChildHandle> {
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut cmd = Command::new(&self.binary);
        cmd.args(["-rtsp_transport", "tcp", "-i", ingress_url, "-c", "copy"])
            .arg(output_path);

        debug!(%camera_id, path = %output_path.display(), "starting recording");
        self.spawn_watched(cmd)
    }

    async fn take_snapshot(&self, ingress_url: &str, output_path: &Path) -> Result<()> {
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut cmd = Command::new(&self.binary);
        cmd.args(["-rtsp_transport", "tcp", "-i", ingress_url, "-frames:v", "1"])
            .arg(output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let status = cmd
            .status()
            .await
            .map_err(|e| VmsError::transient(format!("snapshot spawn failed: {e}")))?;
        if !status.success() {
            error!(?status, "snapshot process exited non-zero");
            return Err(VmsError::transient("snapshot process failed"));
        }
        Ok(())
    }

    async fn extract_frame(&self, ingress_url: &str, output_path: &Path, deadline: Duration) -> Result<()> {
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut cmd = Command::new(&self.binary);
        cmd.args(["-rtsp_transport", "tcp", "-i", ingress_url, "-frames:v", "1"])
            .arg(output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let status = timeout(deadline, cmd.status())
            .await
            .map_err(|_| VmsError::transient("frame extraction timed out"))?
            .map_err(|e| VmsError::transient(format!("frame extraction spawn failed: {e}")))?;

        if !status.success() {
            return Err(VmsError::transient("frame extraction process failed"));
        }
        Ok(())
    }
}
