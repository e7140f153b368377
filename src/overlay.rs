//! Garment placement and alpha compositing onto camera frames.
//!
//! Placement is a fixed-ratio heuristic over the shoulder and hip keypoints.
//! Two presets are provided; both are plain [`OverlayPreset`] values so the
//! ratios can be tuned from configuration.

use anyhow::{Context, Result};
use fast_image_resize as fir;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::{GarmentImage, LandmarkSet};

/// How the garment is scaled into the target box.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitMode {
    /// Width and height scale independently to fill the box.
    Stretch,
    /// One scale factor for both axes, the largest that fits inside the box.
    Uniform,
}

/// Where the top edge of the garment goes relative to the shoulder line.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "amount")]
pub enum Lift {
    /// Raise the start line by a fraction of the shoulder-to-hip span; the box
    /// height is measured from that raised line.
    TorsoFraction(f32),
    /// Raise the top edge by a fraction of the scaled garment height.
    GarmentFraction(f32),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverlayPreset {
    pub width_ratio: f32,
    pub height_ratio: f32,
    pub lift: Lift,
    pub fit: FitMode,
}

impl OverlayPreset {
    /// Covers shoulders to just below the hips, stretched to fill.
    pub const SHOULDER_TO_WAIST: Self = Self {
        width_ratio: 2.2,
        height_ratio: 1.2,
        lift: Lift::TorsoFraction(0.1),
        fit: FitMode::Stretch,
    };

    /// Larger box with the garment's aspect ratio preserved.
    pub const UNIFORM_FIT: Self = Self {
        width_ratio: 2.4,
        height_ratio: 2.0,
        lift: Lift::GarmentFraction(0.2),
        fit: FitMode::Uniform,
    };
}

impl Default for OverlayPreset {
    fn default() -> Self {
        Self::SHOULDER_TO_WAIST
    }
}

/// Target rectangle in frame pixels. `x`/`y` are already shifted into the
/// frame; `width`/`height` are the garment's resized dimensions and may
/// exceed the frame, in which case the excess is clipped when blending.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Computes where the garment goes, or `None` when the box is degenerate.
pub fn compute_placement(
    landmarks: &LandmarkSet,
    frame_width: u32,
    frame_height: u32,
    garment_width: u32,
    garment_height: u32,
    preset: &OverlayPreset,
) -> Option<Placement> {
    let (left_x, shoulder_y) = landmarks.left_shoulder.to_pixel(frame_width, frame_height);
    let (right_x, _) = landmarks.right_shoulder.to_pixel(frame_width, frame_height);
    // The shoulder line follows the left shoulder; the hip line is the mean of
    // both hips, truncated once.
    let hip_y = ((landmarks.left_hip.y + landmarks.right_hip.y) / 2.0 * frame_height as f32) as i32;
    let torso = hip_y - shoulder_y;
    let shoulder_width = (right_x - left_x).abs();

    let (width, height, left, top) = match (preset.fit, preset.lift) {
        (FitMode::Stretch, Lift::TorsoFraction(lift)) => {
            let start_y = (shoulder_y - (torso as f32 * lift) as i32).max(0);
            let height = ((hip_y - start_y) as f32 * preset.height_ratio) as i32;
            let width = (shoulder_width as f32 * preset.width_ratio) as i32;
            let center_x = (left_x + right_x).div_euclid(2);
            (width, height, center_x - width.div_euclid(2), start_y)
        }
        (fit, lift) => {
            let box_w = shoulder_width as f32 * preset.width_ratio;
            let box_h = torso.abs() as f32 * preset.height_ratio;
            let (width, height) = match fit {
                FitMode::Stretch => (box_w as i32, box_h as i32),
                FitMode::Uniform => {
                    if garment_width == 0 || garment_height == 0 {
                        return None;
                    }
                    let scale =
                        (box_w / garment_width as f32).min(box_h / garment_height as f32);
                    (
                        (garment_width as f32 * scale).round() as i32,
                        (garment_height as f32 * scale).round() as i32,
                    )
                }
            };
            let top = match lift {
                Lift::TorsoFraction(f) => shoulder_y as f32 - torso as f32 * f,
                Lift::GarmentFraction(f) => shoulder_y as f32 - height as f32 * f,
            };
            let center_x = (left_x + right_x) as f32 / 2.0;
            let left = center_x - width as f32 / 2.0;
            (width, height, left as i32, top as i32)
        }
    };

    if width <= 0 || height <= 0 {
        return None;
    }

    let x = shift_into(left, width, frame_width);
    let y = shift_into(top, height, frame_height);
    if x >= frame_width || y >= frame_height {
        return None;
    }

    Some(Placement {
        x,
        y,
        width: width as u32,
        height: height as u32,
    })
}

fn shift_into(origin: i32, size: i32, limit: u32) -> u32 {
    origin.min(limit as i32 - size).max(0) as u32
}

/// Resizes `garment` with a box filter, which averages source areas when
/// shrinking.
pub fn resize_garment(garment: &GarmentImage, width: u32, height: u32) -> Result<GarmentImage> {
    if garment.width == width && garment.height == height {
        return Ok(garment.clone());
    }

    let pixel_type = if garment.has_alpha() {
        fir::PixelType::U8x4
    } else {
        fir::PixelType::U8x3
    };
    let src_image = fir::images::Image::from_vec_u8(
        garment.width,
        garment.height,
        garment.pixels.clone(),
        pixel_type,
    )?;
    let mut dst_image = fir::images::Image::new(width, height, pixel_type);
    let mut resizer = fir::Resizer::new();
    let resize_options =
        fir::ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Box));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("garment resize failed")?;

    Ok(GarmentImage {
        pixels: dst_image.into_vec(),
        width,
        height,
        channels: garment.channels,
    })
}

/// Blends `garment` onto the RGB `frame` at (`x`, `y`), clipping at the frame
/// edges. Alpha 255 copies the garment exactly; alpha 0 leaves the frame as is.
pub fn blend_at(
    frame: &mut [u8],
    frame_width: u32,
    frame_height: u32,
    garment: &GarmentImage,
    x: u32,
    y: u32,
) {
    if x >= frame_width || y >= frame_height {
        return;
    }
    let visible_w = garment.width.min(frame_width - x) as usize;
    let visible_h = garment.height.min(frame_height - y) as usize;
    if visible_w == 0 || visible_h == 0 {
        return;
    }

    let channels = garment.channels as usize;
    let src_stride = garment.width as usize * channels;
    let dst_stride = frame_width as usize * 3;
    let (x, y) = (x as usize, y as usize);

    frame
        .par_chunks_exact_mut(dst_stride)
        .skip(y)
        .take(visible_h)
        .enumerate()
        .for_each(|(row, dst_row)| {
            let src_row = &garment.pixels[row * src_stride..(row + 1) * src_stride];
            let dst = &mut dst_row[x * 3..(x + visible_w) * 3];
            for (dst_px, src_px) in dst
                .chunks_exact_mut(3)
                .zip(src_row.chunks_exact(channels))
            {
                let alpha = if channels == 4 { src_px[3] as u32 } else { 255 };
                match alpha {
                    255 => dst_px.copy_from_slice(&src_px[..3]),
                    0 => {}
                    _ => {
                        for c in 0..3 {
                            let blended =
                                alpha * src_px[c] as u32 + (255 - alpha) * dst_px[c] as u32;
                            dst_px[c] = ((blended + 127) / 255) as u8;
                        }
                    }
                }
            }
        });
}

/// Places `garment` over the torso described by `landmarks`. Returns the
/// placement used, or `None` when the frame was left untouched.
pub fn overlay_garment(
    frame: &mut [u8],
    frame_width: u32,
    frame_height: u32,
    garment: &GarmentImage,
    landmarks: Option<&LandmarkSet>,
    preset: &OverlayPreset,
) -> Result<Option<Placement>> {
    let Some(landmarks) = landmarks else {
        return Ok(None);
    };
    let Some(placement) = compute_placement(
        landmarks,
        frame_width,
        frame_height,
        garment.width,
        garment.height,
        preset,
    ) else {
        return Ok(None);
    };

    let resized = resize_garment(garment, placement.width, placement.height)?;
    blend_at(
        frame,
        frame_width,
        frame_height,
        &resized,
        placement.x,
        placement.y,
    );
    Ok(Some(placement))
}
