use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;

use crate::types::{Frame, Landmark, LandmarkSet};

pub const INPUT_SIZE: u32 = 192;
pub const NUM_KEYPOINTS: usize = 17;

const LEFT_SHOULDER: usize = 5;
const RIGHT_SHOULDER: usize = 6;
const LEFT_HIP: usize = 11;
const RIGHT_HIP: usize = 12;

/// Resizes the frame to the model input and lays it out as NHWC floats in 0-255.
///
/// The frame is stretched rather than letterboxed, so normalized model output
/// maps straight back onto frame coordinates.
pub fn prepare_frame(frame: &Frame) -> Result<Array4<f32>> {
    if !frame.is_well_formed() {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            frame.rgb.len(),
            frame.width as usize * frame.height as usize * 3
        ));
    }

    let src_image = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgb.clone(),
        fir::PixelType::U8x3,
    )?;
    let mut dst_image = fir::images::Image::new(INPUT_SIZE, INPUT_SIZE, fir::PixelType::U8x3);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;

    let values: Vec<f32> = dst_image.into_vec().into_iter().map(f32::from).collect();
    Array4::<f32>::from_shape_vec((1, INPUT_SIZE as usize, INPUT_SIZE as usize, 3), values)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))
}

/// Splits MoveNet output (`[1, 1, 17, 3]`, each row `y, x, score`) into keypoints.
pub fn decode_keypoints(flat: &[f32]) -> Result<Vec<Landmark>> {
    if flat.len() < NUM_KEYPOINTS * 3 {
        return Err(anyhow!(
            "unexpected keypoint output length: got {}, need {}",
            flat.len(),
            NUM_KEYPOINTS * 3
        ));
    }

    Ok(flat
        .chunks_exact(3)
        .take(NUM_KEYPOINTS)
        .map(|kp| Landmark::new(kp[1], kp[0], kp[2]))
        .collect())
}

/// Picks the torso keypoints. Returns `None` when any of them is below
/// `min_confidence`, which counts as "no body in frame".
pub fn torso_landmarks(keypoints: &[Landmark], min_confidence: f32) -> Option<LandmarkSet> {
    let set = LandmarkSet {
        left_shoulder: *keypoints.get(LEFT_SHOULDER)?,
        right_shoulder: *keypoints.get(RIGHT_SHOULDER)?,
        left_hip: *keypoints.get(LEFT_HIP)?,
        right_hip: *keypoints.get(RIGHT_HIP)?,
    };
    (set.min_confidence() >= min_confidence).then_some(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movenet_output(score: f32) -> Vec<f32> {
        (0..NUM_KEYPOINTS)
            .flat_map(|i| [i as f32 / 100.0, i as f32 / 50.0, score])
            .collect()
    }

    #[test]
    fn decode_swaps_yx_order() {
        let keypoints = decode_keypoints(&movenet_output(0.8)).unwrap();
        assert_eq!(keypoints.len(), NUM_KEYPOINTS);
        assert_eq!(keypoints[5], Landmark::new(0.1, 0.05, 0.8));
    }

    #[test]
    fn short_output_is_rejected() {
        assert!(decode_keypoints(&[0.0; 12]).is_err());
    }

    #[test]
    fn torso_requires_confident_keypoints() {
        let confident = decode_keypoints(&movenet_output(0.8)).unwrap();
        let set = torso_landmarks(&confident, 0.3).unwrap();
        assert_eq!(set.left_hip, confident[11]);
        assert_eq!(set.right_shoulder, confident[6]);

        let mut one_weak = confident.clone();
        one_weak[12].confidence = 0.1;
        assert!(torso_landmarks(&one_weak, 0.3).is_none());
    }

    #[test]
    fn prepare_frame_has_model_shape() {
        let frame = Frame::new(vec![255; 64 * 48 * 3], 64, 48);
        let input = prepare_frame(&frame).unwrap();
        assert_eq!(input.shape(), &[1, 192, 192, 3]);
        assert!(input.iter().all(|v| (*v - 255.0).abs() < 1.0));

        let broken = Frame::new(vec![0; 10], 64, 48);
        assert!(prepare_frame(&broken).is_err());
    }
}
