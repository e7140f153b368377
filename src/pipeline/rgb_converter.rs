use anyhow::{Result, anyhow};
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgb, yuyv422_to_rgb,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

#[derive(Debug)]
pub struct RgbFrame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub fn convert_camera_frame(frame: &Buffer) -> Result<RgbFrame> {
    let resolution = frame.resolution();
    let width = resolution.width_x;
    let height = resolution.height_y;

    let rgb = convert_raw(frame.source_frame_format(), frame.buffer(), width, height)?;

    Ok(RgbFrame { rgb, width, height })
}

pub(crate) fn convert_raw(
    format: FrameFormat,
    data: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>> {
    match format {
        FrameFormat::NV12 => nv12_to_rgb(data, width, height),
        FrameFormat::YUYV => yuyv_to_rgb(data, width, height),
        FrameFormat::MJPEG => mjpeg_to_rgb(data),
        FrameFormat::RAWRGB => raw_rgb(data, width, height, false),
        FrameFormat::RAWBGR => raw_rgb(data, width, height, true),
        FrameFormat::GRAY => gray_to_rgb(data, width, height),
    }
}

fn nv12_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_plane_len = width as usize * height as usize;
    let uv_plane_len = y_plane_len / 2;

    if data.len() < y_plane_len + uv_plane_len {
        return Err(anyhow!(
            "NV12 buffer too small: got {}, expected {}",
            data.len(),
            y_plane_len + uv_plane_len
        ));
    }

    let image = YuvBiPlanarImage {
        y_plane: &data[..y_plane_len],
        y_stride: width,
        uv_plane: &data[y_plane_len..y_plane_len + uv_plane_len],
        uv_stride: width,
        width,
        height,
    };
    let mut rgb = vec![0u8; y_plane_len * 3];

    yuv_nv12_to_rgb(
        &image,
        &mut rgb,
        width * 3,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12→RGB failed: {err:?}"))?;

    Ok(rgb)
}

fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected_len = width as usize * height as usize * 2;
    if data.len() < expected_len {
        return Err(anyhow!(
            "YUYV buffer too small: got {}, expected {}",
            data.len(),
            expected_len
        ));
    }

    let mut rgb = vec![0u8; width as usize * height as usize * 3];
    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    yuyv422_to_rgb(
        &packed,
        &mut rgb,
        width * 3,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422→RGB failed: {err:?}"))?;

    Ok(rgb)
}

fn mjpeg_to_rgb(data: &[u8]) -> Result<Vec<u8>> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGB);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgb = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;

    if let Some(info) = decoder.info() {
        let expected_len = usize::try_from(info.width)
            .and_then(|w| usize::try_from(info.height).map(|h| w * h * 3))
            .map_err(|_| anyhow!("MJPEG dimensions do not fit usize"))?;
        if rgb.len() < expected_len {
            return Err(anyhow!(
                "MJPEG decode produced too few bytes: got {}, expected {}",
                rgb.len(),
                expected_len
            ));
        }
    }

    Ok(rgb)
}

fn raw_rgb(data: &[u8], width: u32, height: u32, swap_rb: bool) -> Result<Vec<u8>> {
    let expected_len = width as usize * height as usize * 3;
    if data.len() < expected_len {
        return Err(anyhow!(
            "RGB buffer too small: got {}, expected {}",
            data.len(),
            expected_len
        ));
    }

    let mut rgb = data[..expected_len].to_vec();
    if swap_rb {
        rgb.par_chunks_exact_mut(3).for_each(|px| px.swap(0, 2));
    }
    Ok(rgb)
}

fn gray_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected_len = width as usize * height as usize;
    if data.len() < expected_len {
        return Err(anyhow!(
            "GRAY buffer too small: got {}, expected {}",
            data.len(),
            expected_len
        ));
    }

    let mut rgb = vec![0u8; expected_len * 3];
    rgb.par_chunks_exact_mut(3)
        .zip(data.par_iter().copied())
        .for_each(|(dst, value)| dst.fill(value));

    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_is_swapped_to_rgb() {
        let bgr = [1, 2, 3, 4, 5, 6];
        let rgb = convert_raw(FrameFormat::RAWBGR, &bgr, 2, 1).unwrap();
        assert_eq!(rgb, [3, 2, 1, 6, 5, 4]);
        let same = convert_raw(FrameFormat::RAWRGB, &bgr, 2, 1).unwrap();
        assert_eq!(same, bgr);
    }

    #[test]
    fn gray_expands_to_three_channels() {
        let rgb = convert_raw(FrameFormat::GRAY, &[10, 200], 2, 1).unwrap();
        assert_eq!(rgb, [10, 10, 10, 200, 200, 200]);
    }

    #[test]
    fn short_buffers_are_errors() {
        assert!(convert_raw(FrameFormat::RAWRGB, &[0; 5], 2, 1).is_err());
        assert!(convert_raw(FrameFormat::YUYV, &[0; 3], 2, 1).is_err());
        assert!(convert_raw(FrameFormat::NV12, &[0; 4], 2, 2).is_err());
    }
}
