use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Result, VmsError};
use crate::model::BoundingBox;

use super::{DetectPlates, ExtractText, PlateCandidate};

#[derive(Deserialize)]
struct RawCandidate {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    confidence: f32,
}

/// Drives an external plate-detector binary via `tokio::process::Command`,
/// the same spawn/wait-with-timeout shape the Transcoder Driver uses for its
/// `ffmpeg` child. Invoked as `<binary> <frame_path>`; expected to print a
/// JSON array of `{x, y, w, h, confidence}` objects to stdout.
pub struct ProcessDetector {
    binary: String,
    timeout: Duration,
}

impl ProcessDetector {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl DetectPlates for ProcessDetector {
    async fn detect(&self, frame_path: &Path) -> Result<Vec<PlateCandidate>> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(frame_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| VmsError::transient("plate detector timed out"))?
            .map_err(|e| VmsError::transient(format!("plate detector spawn failed: {e}")))?;

        if !output.status.success() {
            warn!(status = ?output.status, "plate detector exited non-zero");
            return Err(VmsError::transient("plate detector process failed"));
        }

        let raw: Vec<RawCandidate> = serde_json::from_slice(&output.stdout)
            .map_err(|e| VmsError::transient(format!("plate detector output malformed: {e}")))?;

        Ok(raw
            .into_iter()
            .map(|c| PlateCandidate {
                bbox: BoundingBox {
                    x: c.x,
                    y: c.y,
                    w: c.w,
                    h: c.h,
                },
                confidence: c.confidence,
            })
            .collect())
    }
}

/// Drives an external text-recognition binary the same way. Invoked as
/// `<binary> <frame_path> <x> <y> <w> <h>`; prints the recognized plate text
/// to stdout, or nothing if it found none.
pub struct ProcessExtractor {
    binary: String,
    timeout: Duration,
}

impl ProcessExtractor {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ExtractText for ProcessExtractor {
    async fn extract(&self, frame_path: &Path, bbox: BoundingBox) -> Result<Option<String>> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(frame_path)
            .arg(bbox.x.to_string())
            .arg(bbox.y.to_string())
            .arg(bbox.w.to_string())
            .arg(bbox.h.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| VmsError::transient("text extractor timed out"))?
            .map_err(|e| VmsError::transient(format!("text extractor spawn failed: {e}")))?;

        if !output.status.success() {
            debug!(status = ?output.status, "text extractor exited non-zero, treating as no read");
            return Ok(None);
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(text))
    }
}
