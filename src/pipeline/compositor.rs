use std::{
    io::Cursor,
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use image::{ExtendedColorType, codecs::jpeg::JpegEncoder};
use rayon::prelude::*;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    garment::GarmentStore,
    overlay::{self, OverlayPreset, Placement},
    pose::LandmarkSource,
    types::Frame,
};

const FRAME_WAIT: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct CompositedFrame {
    pub frame: Frame,
    pub placement: Option<Placement>,
}

/// Flip, detect and composite, one frame at a time.
pub struct FramePipeline {
    landmarks: Box<dyn LandmarkSource>,
    garments: Arc<GarmentStore>,
    preset: OverlayPreset,
    mirror: bool,
}

impl FramePipeline {
    pub fn new(
        landmarks: Box<dyn LandmarkSource>,
        garments: Arc<GarmentStore>,
        preset: OverlayPreset,
        mirror: bool,
    ) -> Self {
        Self {
            landmarks,
            garments,
            preset,
            mirror,
        }
    }

    pub fn garments(&self) -> &Arc<GarmentStore> {
        &self.garments
    }

    pub fn process(&mut self, mut frame: Frame) -> CompositedFrame {
        if self.mirror {
            flip_horizontal(&mut frame);
        }

        let landmarks = match self.landmarks.detect(&frame) {
            Ok(found) => found,
            Err(err) => {
                log::warn!("pose detection failed: {err:?}");
                None
            }
        };
        if landmarks.is_none() {
            log::debug!("no body detected, passing frame through");
        }

        let Some(garment) = self.garments.current() else {
            return CompositedFrame {
                frame,
                placement: None,
            };
        };

        let placement = match overlay::overlay_garment(
            &mut frame.rgb,
            frame.width,
            frame.height,
            &garment,
            landmarks.as_ref(),
            &self.preset,
        ) {
            Ok(placement) => placement,
            Err(err) => {
                log::warn!("garment overlay failed: {err:?}");
                None
            }
        };

        if let Some(placement) = &placement {
            log::trace!("garment placed at {placement:?}");
        }
        CompositedFrame { frame, placement }
    }
}

/// Mirrors the frame left to right in place.
pub fn flip_horizontal(frame: &mut Frame) {
    let stride = frame.width as usize * 3;
    if stride == 0 {
        return;
    }
    frame.rgb.par_chunks_exact_mut(stride).for_each(|row| {
        row.reverse();
        for px in row.chunks_exact_mut(3) {
            px.reverse();
        }
    });
}

pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::with_capacity(frame.rgb.len() / 8));
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(&frame.rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
        .context("jpeg encoding failed")?;
    Ok(out.into_inner())
}

/// Returns the newest frame, skipping anything older still queued.
pub fn recv_latest_frame(frame_rx: &Receiver<Frame>, wait: Duration) -> Result<Frame, RecvTimeoutError> {
    let mut frame = frame_rx.recv_timeout(wait)?;
    while let Ok(newer) = frame_rx.try_recv() {
        frame = newer;
    }
    Ok(frame)
}

/// Runs the pipeline on its own thread and publishes the latest JPEG on
/// `jpeg_tx` until `cancel` fires or the camera goes away.
pub fn start_frame_compositor(
    mut pipeline: FramePipeline,
    frame_rx: Receiver<Frame>,
    jpeg_tx: watch::Sender<Option<Bytes>>,
    jpeg_quality: u8,
    cancel: CancellationToken,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !cancel.is_cancelled() {
            let frame = match recv_latest_frame(&frame_rx, FRAME_WAIT) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!("camera channel closed, stopping compositor");
                    break;
                }
            };

            let composited = pipeline.process(frame);
            match encode_jpeg(&composited.frame, jpeg_quality) {
                Ok(jpeg) => {
                    jpeg_tx.send_replace(Some(Bytes::from(jpeg)));
                    log::trace!(
                        "published frame {:?} after capture",
                        composited.frame.timestamp.elapsed()
                    );
                }
                Err(err) => log::warn!("dropping frame: {err:?}"),
            }
        }
        log::info!("frame compositor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        garment::GarmentCatalog,
        types::{Landmark, LandmarkSet},
    };
    use image::{Rgba, RgbaImage};

    struct FixedPose(Option<LandmarkSet>);

    impl LandmarkSource for FixedPose {
        fn detect(&mut self, _frame: &Frame) -> Result<Option<LandmarkSet>> {
            Ok(self.0)
        }
    }

    struct BrokenDetector;

    impl LandmarkSource for BrokenDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Option<LandmarkSet>> {
            Err(anyhow::anyhow!("model exploded"))
        }
    }

    fn torso() -> LandmarkSet {
        LandmarkSet {
            left_shoulder: Landmark::new(0.3, 0.3, 0.9),
            right_shoulder: Landmark::new(0.7, 0.3, 0.9),
            left_hip: Landmark::new(0.35, 0.7, 0.9),
            right_hip: Landmark::new(0.65, 0.7, 0.9),
        }
    }

    fn store() -> (tempfile::TempDir, Arc<GarmentStore>) {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(8, 8, Rgba([250, 10, 10, 255]))
            .save(dir.path().join("shirt.png"))
            .unwrap();
        let catalog = GarmentCatalog::scan(dir.path(), None).unwrap();
        let store = Arc::new(GarmentStore::open(catalog).unwrap());
        (dir, store)
    }

    fn gray_frame(width: u32, height: u32) -> Frame {
        Frame::new(vec![40; (width * height * 3) as usize], width, height)
    }

    #[test]
    fn flip_mirrors_each_row() {
        let mut frame = Frame::new(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12], 2, 2);
        flip_horizontal(&mut frame);
        assert_eq!(frame.rgb, [4, 5, 6, 1, 2, 3, 10, 11, 12, 7, 8, 9]);
    }

    #[test]
    fn detected_body_gets_garment() {
        let (_dir, garments) = store();
        let mut pipeline = FramePipeline::new(
            Box::new(FixedPose(Some(torso()))),
            garments,
            OverlayPreset::default(),
            true,
        );
        let out = pipeline.process(gray_frame(100, 100));
        let placement = out.placement.unwrap();
        let idx = (((placement.y + 1) * 100 + placement.x + 1) * 3) as usize;
        assert_eq!(&out.frame.rgb[idx..idx + 3], &[250, 10, 10]);
    }

    #[test]
    fn detection_miss_and_detector_error_pass_frame_through() {
        let (_dir, garments) = store();
        let sources: Vec<Box<dyn LandmarkSource>> =
            vec![Box::new(FixedPose(None)), Box::new(BrokenDetector)];
        for source in sources {
            let mut pipeline =
                FramePipeline::new(source, garments.clone(), OverlayPreset::default(), false);
            let frame = gray_frame(32, 24);
            let captured_at = frame.timestamp;
            let out = pipeline.process(frame);
            assert!(out.placement.is_none());
            assert_eq!(out.frame.timestamp, captured_at);
            assert!(out.frame.rgb.iter().all(|v| *v == 40));
        }
    }

    #[test]
    fn jpeg_output_has_markers() {
        let jpeg = encode_jpeg(&gray_frame(16, 16), 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn latest_frame_wins() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        tx.send(gray_frame(1, 1)).unwrap();
        tx.send(gray_frame(2, 1)).unwrap();
        tx.send(gray_frame(3, 1)).unwrap();
        let frame = recv_latest_frame(&rx, FRAME_WAIT).unwrap();
        assert_eq!(frame.width, 3);
        assert!(matches!(
            recv_latest_frame(&rx, Duration::from_millis(5)),
            Err(RecvTimeoutError::Timeout)
        ));
    }

    #[test]
    fn compositor_publishes_and_stops_on_cancel() {
        let (_dir, garments) = store();
        let pipeline = FramePipeline::new(
            Box::new(FixedPose(None)),
            garments,
            OverlayPreset::default(),
            false,
        );
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(1);
        let (jpeg_tx, mut jpeg_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let handle = start_frame_compositor(pipeline, frame_rx, jpeg_tx, 75, cancel.clone());

        frame_tx.send(gray_frame(16, 16)).unwrap();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            jpeg_rx.changed().await.unwrap();
        });
        assert!(jpeg_rx.borrow().as_ref().is_some_and(|jpeg| jpeg.starts_with(&[0xFF, 0xD8])));

        cancel.cancel();
        handle.join().unwrap();
        drop(frame_tx);
    }
}
