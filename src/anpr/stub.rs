use async_trait::async_trait;

use crate::error::Result;
use crate::model::BoundingBox;

use super::{DetectPlates, ExtractText, PlateCandidate};

/// Deterministic detector used when no external detector binary is
/// configured (and in tests): every frame yields exactly one candidate
/// region covering its center, at a fixed confidence.
pub struct StubDetector {
    pub confidence: f32,
}

impl Default for StubDetector {
    fn default() -> Self {
        Self { confidence: 0.95 }
    }
}

#[async_trait]
impl DetectPlates for StubDetector {
    async fn detect(&self, _frame_path: &std::path::Path) -> Result<Vec<PlateCandidate>> {
        Ok(vec![PlateCandidate {
            bbox: BoundingBox {
                x: 100,
                y: 100,
                w: 200,
                h: 60,
            },
            confidence: self.confidence,
        }])
    }
}

/// Deterministic extractor pairing with [`StubDetector`]: always returns a
/// fixed plate string. Real deployments replace this with a binary-backed
/// implementation analogous to [`crate::transcoder::ProcessTranscoderDriver`].
pub struct StubExtractor {
    pub plate: String,
}

impl Default for StubExtractor {
    fn default() -> Self {
        Self {
            plate: "TEST123".to_string(),
        }
    }
}

#[async_trait]
impl ExtractText for StubExtractor {
    async fn extract(&self, _frame_path: &std::path::Path, _bbox: BoundingBox) -> Result<Option<String>> {
        Ok(Some(self.plate.clone()))
    }
}
