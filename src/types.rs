use std::time::Instant;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(rgb: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgb,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.rgb.len() == self.width as usize * self.height as usize * 3
    }
}

/// A single body keypoint in normalized image coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    /// Pixel position, truncated toward zero.
    pub fn to_pixel(&self, width: u32, height: u32) -> (i32, i32) {
        ((self.x * width as f32) as i32, (self.y * height as f32) as i32)
    }
}

/// The four torso keypoints the overlay needs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LandmarkSet {
    pub left_shoulder: Landmark,
    pub right_shoulder: Landmark,
    pub left_hip: Landmark,
    pub right_hip: Landmark,
}

impl LandmarkSet {
    pub fn min_confidence(&self) -> f32 {
        [
            self.left_shoulder.confidence,
            self.right_shoulder.confidence,
            self.left_hip.confidence,
            self.right_hip.confidence,
        ]
        .into_iter()
        .fold(f32::INFINITY, f32::min)
    }
}

/// Decoded garment pixels, RGB or RGBA.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GarmentImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

impl GarmentImage {
    pub fn has_alpha(&self) -> bool {
        self.channels == 4
    }

    pub fn from_dynamic(image: image::DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        if image.color().has_alpha() {
            Self {
                pixels: image.into_rgba8().into_raw(),
                width,
                height,
                channels: 4,
            }
        } else {
            Self {
                pixels: image.into_rgb8().into_raw(),
                width,
                height,
                channels: 3,
            }
        }
    }
}
