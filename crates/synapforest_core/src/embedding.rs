//! Optional image embedding hook.
//!
//! The library does not ship a model. Hosts attach an `Embedder` to the
//! ingestion service and vectors are persisted in `item_vectors`.

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),
    #[error("embedding failed: {0}")]
    Failed(String),
}

/// Produces a feature vector for one stored image.
pub trait Embedder: Send + Sync {
    fn embed(&self, image_path: &Path) -> Result<Vec<f32>, EmbedError>;
}
