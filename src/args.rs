use std::{net::SocketAddr, path::PathBuf};

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::config::{AppConfig, PresetName};

#[derive(Parser, Debug)]
#[command(author, version, about = "Webcam virtual try-on mirror", long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug)]
pub struct CommonArgs {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the garment images
    #[arg(short, long, global = true)]
    pub garments: Option<PathBuf>,

    /// Camera index
    #[arg(long, global = true)]
    pub camera: Option<u32>,

    /// MoveNet ONNX model path
    #[arg(long, global = true)]
    pub model: Option<PathBuf>,

    /// Overlay placement preset
    #[arg(long, value_enum, global = true)]
    pub preset: Option<PresetName>,

    /// Do not mirror the camera image
    #[arg(long, global = true)]
    pub no_mirror: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream the composited feed over HTTP
    Serve {
        /// Address to listen on
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// JPEG quality for streamed frames
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
        jpeg_quality: Option<u8>,
    },
    /// Show the composited feed in a local window
    Display,
    /// List available cameras
    Cameras,
}

impl CommonArgs {
    /// Command-line values win over the configuration file.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.garments {
            config.garments.dir = dir.clone();
        }
        if let Some(index) = self.camera {
            config.camera.index = index;
        }
        if let Some(model) = &self.model {
            config.pose.model_path = model.clone();
        }
        if let Some(preset) = self.preset {
            config.overlay.preset = preset;
        }
        if self.no_mirror {
            config.camera.mirror = false;
        }
    }
}
