use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{LandmarkSource, PoseBackend, common};
use crate::types::{Frame, LandmarkSet};

pub struct MoveNetEngine {
    session: Session,
    min_confidence: f32,
}

impl MoveNetEngine {
    pub fn new(backend: &PoseBackend) -> Result<Self> {
        let session = load_session(&backend.model_path, backend.intra_threads)?;
        Ok(Self {
            session,
            min_confidence: backend.min_confidence,
        })
    }
}

fn load_session(model_path: &Path, intra_threads: usize) -> Result<Session> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load ORT session from {}", model_path.display()))
}

impl LandmarkSource for MoveNetEngine {
    fn detect(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>> {
        let input = common::prepare_frame(frame)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run ORT session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("model returned no outputs"));
        }

        let scores = outputs[0].try_extract_array::<f32>()?;
        let flattened: Vec<f32> = scores.iter().copied().collect();
        let keypoints = common::decode_keypoints(&flattened)?;

        Ok(common::torso_landmarks(&keypoints, self.min_confidence))
    }
}
