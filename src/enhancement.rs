use image::{DynamicImage, GrayImage, Luma, Pixel, RgbImage};
use imageproc::morphology::{grayscale_open, Mask};

use crate::error::{Result, TunerError};
use crate::grid::ParameterTuple;

pub const MIN_INTENSITY: u8 = 0;
pub const MAX_INTENSITY: u8 = 255;

/// Largest footprint whose centre still fits the `u8` offsets of [`Mask`]
pub const MAX_MORPH_SIZE: i32 = 511;

/// ITU-R BT.601 luma weights (R, G, B)
pub const LUMA_WEIGHTS: [f64; 3] = [0.299, 0.587, 0.114];

/// 8-bit working copy of a source image
#[derive(Debug, Clone, PartialEq)]
pub enum SourceImage {
    Gray(GrayImage),
    Color(RgbImage),
}

impl SourceImage {
    /// Reduce any decoded image to 8-bit samples, dropping alpha
    pub fn from_dynamic(image: &DynamicImage) -> Self {
        if image.color().has_color() {
            SourceImage::Color(image.to_rgb8())
        } else {
            SourceImage::Gray(image.to_luma8())
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            SourceImage::Gray(gray) => gray.dimensions(),
            SourceImage::Color(rgb) => rgb.dimensions(),
        }
    }

    pub fn channel_count(&self) -> u8 {
        match self {
            SourceImage::Gray(_) => 1,
            SourceImage::Color(_) => 3,
        }
    }

    fn map_samples<F>(&self, f: F) -> SourceImage
    where
        F: Fn(u8) -> u8,
    {
        match self {
            SourceImage::Gray(gray) => {
                SourceImage::Gray(GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
                    gray.get_pixel(x, y).map(&f)
                }))
            }
            SourceImage::Color(rgb) => {
                SourceImage::Color(RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                    rgb.get_pixel(x, y).map(&f)
                }))
            }
        }
    }
}

impl From<&DynamicImage> for SourceImage {
    fn from(image: &DynamicImage) -> Self {
        SourceImage::from_dynamic(image)
    }
}

// Halves round to even, matching OpenCV's saturate_cast
fn saturate(value: f64) -> u8 {
    value.round_ties_even().clamp(MIN_INTENSITY as f64, MAX_INTENSITY as f64) as u8
}

/// Additive brightness offset, clipped to the intensity range
pub fn adjust_brightness(image: &SourceImage, brightness: i32) -> SourceImage {
    image.map_samples(|v| (v as i32).saturating_add(brightness).clamp(0, MAX_INTENSITY as i32) as u8)
}

/// Multiplicative contrast scale, rounded and clipped to the intensity range
pub fn adjust_contrast(image: &SourceImage, contrast: f64) -> SourceImage {
    image.map_samples(|v| saturate(v as f64 * contrast))
}

/// Single-channel images pass through, colour is reduced with [`LUMA_WEIGHTS`]
pub fn to_grayscale(image: SourceImage) -> GrayImage {
    match image {
        SourceImage::Gray(gray) => gray,
        SourceImage::Color(rgb) => GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
            let [r, g, b] = rgb.get_pixel(x, y).0;
            let luma = LUMA_WEIGHTS[0] * r as f64 + LUMA_WEIGHTS[1] * g as f64 + LUMA_WEIGHTS[2] * b as f64;
            Luma([saturate(luma)])
        }),
    }
}

/// Samples strictly above `threshold` become [`MAX_INTENSITY`], all others [`MIN_INTENSITY`]
pub fn binarize(image: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        if image.get_pixel(x, y)[0] > threshold {
            Luma([MAX_INTENSITY])
        } else {
            Luma([MIN_INTENSITY])
        }
    })
}

/// Square-bounded elliptical footprint centred on its middle sample
#[derive(Debug, Clone, PartialEq)]
pub struct StructuringElement {
    size: u32,
    mask: Vec<bool>,
}

impl StructuringElement {
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        row < self.size && col < self.size && self.mask[(row * self.size + col) as usize]
    }

    /// Number of set samples
    pub fn count(&self) -> usize {
        self.mask.iter().filter(|&&set| set).count()
    }

    /// Footprint as an imageproc mask centred on the middle sample
    pub fn to_mask(&self) -> Mask {
        let footprint = GrayImage::from_fn(self.size, self.size, |col, row| {
            if self.contains(row, col) {
                Luma([MAX_INTENSITY])
            } else {
                Luma([MIN_INTENSITY])
            }
        });
        let center = (self.size / 2) as u8;
        Mask::from_image(&footprint, center, center)
    }
}

fn validate_morph_size(morph_size: i32) -> Result<u32> {
    if morph_size <= 0 {
        return Err(TunerError::invalid("morph_size", morph_size, "must be positive"));
    }
    if morph_size % 2 == 0 {
        return Err(TunerError::invalid("morph_size", morph_size, "must be odd"));
    }
    if morph_size > MAX_MORPH_SIZE {
        return Err(TunerError::invalid(
            "morph_size",
            morph_size,
            format!("must not exceed {}", MAX_MORPH_SIZE),
        ));
    }
    Ok(morph_size as u32)
}

/// Build the elliptical structuring element of `size × size`.
///
/// Row `i` covers the columns `c - dx ..= c + dx` where
/// `dx = round(c * sqrt(1 - ((i - r) / r)²))`, `r` and `c` being the half sizes.
pub fn elliptical_kernel(morph_size: i32) -> Result<StructuringElement> {
    let size = validate_morph_size(morph_size)?;
    let half = (size / 2) as i64;
    let inv_r2 = if half > 0 { 1.0 / (half * half) as f64 } else { 0.0 };

    let mut mask = vec![false; (size * size) as usize];
    for row in 0..size as i64 {
        let dy = row - half;
        let dx = ((half as f64) * (((half * half - dy * dy) as f64) * inv_r2).sqrt()).round() as i64;
        let first = (half - dx).max(0);
        let last = (half + dx + 1).min(size as i64);
        for col in first..last {
            mask[(row * size as i64 + col) as usize] = true;
        }
    }

    Ok(StructuringElement { size, mask })
}

/// Morphological opening with an elliptical `morph_size × morph_size` footprint.
///
/// Bright regions that cannot contain the footprint disappear; larger shapes survive.
/// Neighbours outside the image are ignored, so shapes touching the border are kept.
pub fn remove_small_noise(binary: &GrayImage, morph_size: i32) -> Result<GrayImage> {
    let kernel = elliptical_kernel(morph_size)?;
    if kernel.size() == 1 {
        return Ok(binary.clone());
    }
    Ok(grayscale_open(binary, &kernel.to_mask()))
}

/// Colour inversion blended with the input by the pass counter:
/// `saturate((255 - p) + pass * p / (pass + 1))`.
pub fn invert_colors(image: &SourceImage, pass: u32) -> SourceImage {
    let pass = pass as u64;
    image.map_samples(|v| {
        let inverted = (MAX_INTENSITY - v) as u64;
        let blended = inverted + pass * v as u64 / (pass + 1);
        blended.min(MAX_INTENSITY as u64) as u8
    })
}

/// Check a tuple before any pixel work, returning the threshold as a sample value
pub fn validate_parameters(params: &ParameterTuple) -> Result<u8> {
    validate_morph_size(params.morph_size)?;
    if !(MIN_INTENSITY as i32..=MAX_INTENSITY as i32).contains(&params.threshold) {
        return Err(TunerError::invalid(
            "threshold",
            params.threshold,
            format!("must lie within {}..={}", MIN_INTENSITY, MAX_INTENSITY),
        ));
    }
    if !(params.contrast.is_finite() && params.contrast >= 0.0) {
        return Err(TunerError::invalid("contrast", params.contrast, "must be a non-negative finite number"));
    }
    Ok(params.threshold as u8)
}

/// Brightness, contrast, grayscale, binarization and opening, in that order
pub fn enhance(source: &SourceImage, params: &ParameterTuple) -> Result<GrayImage> {
    let threshold = validate_parameters(params)?;

    let brightened = adjust_brightness(source, params.brightness);
    let contrasted = adjust_contrast(&brightened, params.contrast);
    let gray = to_grayscale(contrasted);
    let binary = binarize(&gray, threshold);
    let cleaned = remove_small_noise(&binary, params.morph_size)?;

    log::trace!("Enhanced {}x{} image with {}", cleaned.width(), cleaned.height(), params);
    Ok(cleaned)
}
