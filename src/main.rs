mod args;
mod config;
mod display;
mod garment;
mod model_download;
mod overlay;
mod pipeline;
mod pose;
mod server;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use args::{Args, Command};
use config::AppConfig;
use garment::{GarmentCatalog, GarmentStore};
use pipeline::FramePipeline;
use pose::PoseBackend;
use types::Frame;

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let mut config = AppConfig::load(args.common.config.as_deref())?;
    args.common.apply(&mut config);

    match args.command {
        Command::Cameras => list_cameras(),
        Command::Serve { bind, jpeg_quality } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(quality) = jpeg_quality {
                config.server.jpeg_quality = quality;
            }
            run_server(config)
        }
        Command::Display => run_local(config),
    }
}

fn open_garments(config: &AppConfig) -> Result<Arc<GarmentStore>> {
    let catalog = GarmentCatalog::scan(&config.garments.dir, config.garments.files.as_deref())
        .context("cannot start without garments")?;
    let store = GarmentStore::open(catalog).context("cannot start without garments")?;
    Ok(Arc::new(store))
}

fn build_pipeline(config: &AppConfig, garments: Arc<GarmentStore>) -> Result<FramePipeline> {
    let backend = PoseBackend {
        model_path: config.pose.model_path.clone(),
        model_url: config.pose.model_url.clone(),
        min_confidence: config.pose.min_confidence,
        intra_threads: config.pose.intra_threads,
    };
    let landmarks = pose::start_landmark_source(&backend)?;
    Ok(FramePipeline::new(
        Box::new(landmarks),
        garments,
        config.overlay.resolve(),
        config.camera.mirror,
    ))
}

#[cfg(feature = "camera-nokhwa")]
fn open_camera(config: &AppConfig) -> Result<(pipeline::CameraStream, Receiver<Frame>)> {
    let (frame_tx, frame_rx) = crossbeam_channel::bounded(1);
    let stream = pipeline::start_camera_stream(config.camera.index, frame_tx)
        .with_context(|| format!("cannot open webcam {}", config.camera.index))?;
    Ok((stream, frame_rx))
}

#[cfg(not(feature = "camera-nokhwa"))]
fn open_camera(_config: &AppConfig) -> Result<((), Receiver<Frame>)> {
    anyhow::bail!("built without camera support (enable the camera-nokhwa feature)")
}

#[cfg(feature = "camera-nokhwa")]
fn list_cameras() -> Result<()> {
    for camera in pipeline::list_cameras()? {
        println!("{camera}");
    }
    Ok(())
}

#[cfg(not(feature = "camera-nokhwa"))]
fn list_cameras() -> Result<()> {
    anyhow::bail!("built without camera support (enable the camera-nokhwa feature)")
}

fn run_server(config: AppConfig) -> Result<()> {
    let garments = open_garments(&config)?;
    let pipeline = build_pipeline(&config, garments.clone())?;
    let (camera, frame_rx) = open_camera(&config)?;

    let shutdown = CancellationToken::new();
    let (jpeg_tx, jpeg_rx) = watch::channel(None);
    let compositor = pipeline::start_frame_compositor(
        pipeline,
        frame_rx,
        jpeg_tx,
        config.server.jpeg_quality,
        shutdown.clone(),
    );

    let state = Arc::new(server::AppState::new(garments, jpeg_rx, shutdown.clone()));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let served = runtime.block_on(async {
        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                log::error!("failed to listen for ctrl-c: {err}");
                return;
            }
            log::info!("shutting down");
            signal_token.cancel();
        });
        server::serve(config.server.bind, state).await
    });

    shutdown.cancel();
    if compositor.join().is_err() {
        log::error!("frame compositor panicked");
    }
    drop(camera);
    served
}

fn run_local(config: AppConfig) -> Result<()> {
    let garments = open_garments(&config)?;
    let pipeline = build_pipeline(&config, garments)?;
    let (camera, frame_rx) = open_camera(&config)?;

    let result = display::run_display(pipeline, frame_rx);
    drop(camera);
    result
}
