//! Model file resolution and session construction.

use std::path::{Path, PathBuf};

use ort::session::{builder::GraphOptimizationLevel, Session};
use tracing::info;

use crate::error::VisionError;

/// Resolves a model file inside the configured model directory.
///
/// A missing file is a configuration error naming the expected path, so the
/// operator sees exactly which file to provide where.
pub fn resolve_model_path(model_dir: &Path, file_name: &str) -> Result<PathBuf, VisionError> {
    let path = model_dir.join(file_name);
    if !path.is_file() {
        return Err(VisionError::Config(format!(
            "model file not found: {}",
            path.display()
        )));
    }
    Ok(path)
}

/// Builds a CPU inference session with the options shared by both proposers.
pub fn build_session(path: &Path) -> Result<Session, VisionError> {
    let cpus = num_cpus::get();
    let intra = std::cmp::max(1, cpus / 2);
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra)?
        .with_inter_threads(1)?
        .commit_from_file(path)?;
    info!("Loaded ONNX model from {:?}", path);
    Ok(session)
}
