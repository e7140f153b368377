use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::{
    model_download::default_model_path,
    overlay::{FitMode, Lift, OverlayPreset},
};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub garments: GarmentConfig,
    pub camera: CameraConfig,
    pub pose: PoseConfig,
    pub overlay: OverlayConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GarmentConfig {
    pub dir: PathBuf,
    /// Explicit catalog; entries missing on disk are skipped.
    pub files: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub index: u32,
    pub mirror: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    pub model_path: PathBuf,
    pub model_url: Option<String>,
    pub min_confidence: f32,
    pub intra_threads: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PresetName {
    ShoulderToWaist,
    UniformFit,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub preset: PresetName,
    pub width_ratio: Option<f32>,
    pub height_ratio: Option<f32>,
    pub lift: Option<Lift>,
    pub fit: Option<FitMode>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub jpeg_quality: u8,
}

impl Default for GarmentConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("clothes_images"),
            files: None,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            mirror: true,
        }
    }
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            model_url: None,
            min_confidence: 0.3,
            intra_threads: 2,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            preset: PresetName::ShoulderToWaist,
            width_ratio: None,
            height_ratio: None,
            lift: None,
            fit: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            jpeg_quality: 80,
        }
    }
}

impl OverlayConfig {
    /// The named preset with any configured overrides applied.
    pub fn resolve(&self) -> OverlayPreset {
        let base = match self.preset {
            PresetName::ShoulderToWaist => OverlayPreset::SHOULDER_TO_WAIST,
            PresetName::UniformFit => OverlayPreset::UNIFORM_FIT,
        };
        OverlayPreset {
            width_ratio: self.width_ratio.unwrap_or(base.width_ratio),
            height_ratio: self.height_ratio.unwrap_or(base.height_ratio),
            lift: self.lift.unwrap_or(base.lift),
            fit: self.fit.unwrap_or(base.fit),
        }
    }
}

impl AppConfig {
    /// Reads `path` if given. A missing file means defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            log::info!(
                "configuration file {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        log::info!("loaded configuration from {}", path.display());
        Ok(config)
    }
}
