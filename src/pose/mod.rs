mod common;
mod ort;

use std::path::PathBuf;

use anyhow::Result;

use crate::{
    model_download::ensure_model_ready,
    types::{Frame, LandmarkSet},
};

pub use self::ort::MoveNetEngine;

/// Anything that can find the torso in a frame.
///
/// `Ok(None)` means no body was found; that is not an error.
pub trait LandmarkSource: Send + 'static {
    fn detect(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>>;
}

#[derive(Clone, Debug)]
pub struct PoseBackend {
    pub model_path: PathBuf,
    pub model_url: Option<String>,
    pub min_confidence: f32,
    pub intra_threads: usize,
}

impl PoseBackend {
    pub fn label(&self) -> &'static str {
        "ort-movenet"
    }
}

/// Makes sure the model file is present and loads it.
pub fn start_landmark_source(backend: &PoseBackend) -> Result<MoveNetEngine> {
    log::info!("starting pose backend: {}", backend.label());
    ensure_model_ready(&backend.model_path, backend.model_url.as_deref())?;
    let engine = MoveNetEngine::new(backend)?;
    log::info!(
        "pose backend ready using {}",
        backend.model_path.display()
    );
    Ok(engine)
}
