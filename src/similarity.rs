use image::{imageops, DynamicImage, GenericImageView, GrayImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::SimilaritySettings;
use crate::error::{Result, TunerError};

/// Gaussian window used by SSIM
pub const SSIM_WINDOW: usize = 11;
pub const SSIM_SIGMA: f64 = 1.5;
const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;

/// PSNR and SSIM of one processed image against the target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPair {
    /// Decibels, `+inf` for identical images
    pub psnr: f64,
    pub ssim: f64,
}

/// Planar image with samples normalized to `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    width: usize,
    height: usize,
    planes: Vec<Vec<f64>>,
}

impl NormalizedImage {
    pub fn from_rgb(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let mut planes = vec![Vec::with_capacity((width * height) as usize); 3];
        for pixel in image.pixels() {
            for (plane, &value) in planes.iter_mut().zip(pixel.0.iter()) {
                plane.push(value as f64 / 255.0);
            }
        }
        Self {
            width: width as usize,
            height: height as usize,
            planes,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width as u32, self.height as u32)
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    fn check_same_shape(&self, other: &NormalizedImage) -> Result<()> {
        if self.dimensions() != other.dimensions() || self.channels() != other.channels() {
            return Err(TunerError::DimensionMismatch {
                expected: self.dimensions(),
                actual: other.dimensions(),
            });
        }
        Ok(())
    }
}

/// Open the target image, mapping any read or decode failure to `TargetNotFound`
pub fn load_target<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    let path = path.as_ref();
    image::open(path).map_err(|source| TunerError::TargetNotFound {
        path: path.to_path_buf(),
        source,
    })
}

/// Replicate a single-channel image into three identical channels
pub fn gray_to_rgb(image: &GrayImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y)[0];
        Rgb([v, v, v])
    })
}

/// Bring the processed image and the target onto the same three-channel grid.
///
/// The target is resampled to the processed image's dimensions; it is left untouched
/// when the sizes already agree.
pub fn align_pair(
    processed: &GrayImage,
    target: &DynamicImage,
    settings: &SimilaritySettings,
) -> Result<(RgbImage, RgbImage)> {
    let (width, height) = processed.dimensions();
    if width == 0 || height == 0 {
        return Err(TunerError::DimensionMismatch {
            expected: target.dimensions(),
            actual: (width, height),
        });
    }

    let target_rgb = target.to_rgb8();
    let target_rgb = if target_rgb.dimensions() == (width, height) {
        target_rgb
    } else {
        imageops::resize(&target_rgb, width, height, settings.get_filter_type())
    };

    Ok((gray_to_rgb(processed), target_rgb))
}

/// `10 * log10(data_range² / mse)`, infinite when the images are identical
pub fn psnr(a: &NormalizedImage, b: &NormalizedImage, data_range: f64) -> Result<f64> {
    a.check_same_shape(b)?;

    let mut sum = 0.0;
    let mut count = 0usize;
    for (pa, pb) in a.planes.iter().zip(b.planes.iter()) {
        for (x, y) in pa.iter().zip(pb.iter()) {
            sum += (x - y) * (x - y);
        }
        count += pa.len();
    }
    if count == 0 {
        return Err(TunerError::DimensionMismatch {
            expected: a.dimensions(),
            actual: b.dimensions(),
        });
    }

    let mse = sum / count as f64;
    if mse == 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(10.0 * (data_range * data_range / mse).log10())
}

fn gaussian_kernel(size: usize, sigma: f64) -> Vec<f64> {
    let center = (size / 2) as f64;
    let weights: Vec<f64> = (0..size)
        .map(|i| {
            let d = i as f64 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

// Separable valid-region convolution of a row-major plane
fn filter_valid(plane: &[f64], width: usize, height: usize, kernel: &[f64]) -> Vec<f64> {
    let k = kernel.len();
    let out_w = width + 1 - k;
    let out_h = height + 1 - k;

    let mut horizontal = vec![0.0; out_w * height];
    for y in 0..height {
        let row = &plane[y * width..(y + 1) * width];
        for x in 0..out_w {
            horizontal[y * out_w + x] = kernel.iter().zip(&row[x..x + k]).map(|(w, v)| w * v).sum();
        }
    }

    let mut out = vec![0.0; out_w * out_h];
    for y in 0..out_h {
        for x in 0..out_w {
            out[y * out_w + x] = kernel
                .iter()
                .enumerate()
                .map(|(i, w)| w * horizontal[(y + i) * out_w + x])
                .sum();
        }
    }
    out
}

fn average_pool(plane: &[f64], width: usize, height: usize, factor: usize) -> (Vec<f64>, usize, usize) {
    let out_w = width / factor;
    let out_h = height / factor;
    let norm = (factor * factor) as f64;
    let mut out = Vec::with_capacity(out_w * out_h);
    for oy in 0..out_h {
        for ox in 0..out_w {
            let mut sum = 0.0;
            for y in oy * factor..(oy + 1) * factor {
                sum += plane[y * width + ox * factor..y * width + (ox + 1) * factor].iter().sum::<f64>();
            }
            out.push(sum / norm);
        }
    }
    (out, out_w, out_h)
}

fn ssim_plane(x: &[f64], y: &[f64], width: usize, height: usize, kernel: &[f64], c1: f64, c2: f64) -> f64 {
    let xx: Vec<f64> = x.iter().map(|v| v * v).collect();
    let yy: Vec<f64> = y.iter().map(|v| v * v).collect();
    let xy: Vec<f64> = x.iter().zip(y).map(|(a, b)| a * b).collect();

    let mu_x = filter_valid(x, width, height, kernel);
    let mu_y = filter_valid(y, width, height, kernel);
    let mu_xx = filter_valid(&xx, width, height, kernel);
    let mu_yy = filter_valid(&yy, width, height, kernel);
    let mu_xy = filter_valid(&xy, width, height, kernel);

    let n = mu_x.len();
    let mut total = 0.0;
    for i in 0..n {
        let (mx, my) = (mu_x[i], mu_y[i]);
        let sigma_x = mu_xx[i] - mx * mx;
        let sigma_y = mu_yy[i] - my * my;
        let sigma_xy = mu_xy[i] - mx * my;
        let luminance = (2.0 * mx * my + c1) / (mx * mx + my * my + c1);
        let structure = (2.0 * sigma_xy + c2) / (sigma_x + sigma_y + c2);
        total += luminance * structure;
    }
    total / n as f64
}

/// Gaussian-windowed SSIM averaged over channels and window positions.
///
/// Images larger than 256 pixels on their short side are average-pooled first by
/// `round(min(H, W) / 256)`; windows shrink to the largest odd size that fits.
pub fn ssim(a: &NormalizedImage, b: &NormalizedImage, data_range: f64) -> Result<f64> {
    a.check_same_shape(b)?;
    if a.width == 0 || a.height == 0 {
        return Err(TunerError::DimensionMismatch {
            expected: a.dimensions(),
            actual: b.dimensions(),
        });
    }

    let factor = ((a.width.min(a.height) as f64 / 256.0).round() as usize).max(1);
    let c1 = (SSIM_K1 * data_range).powi(2);
    let c2 = (SSIM_K2 * data_range).powi(2);

    let mut total = 0.0;
    for (pa, pb) in a.planes.iter().zip(b.planes.iter()) {
        let (x, width, height) = average_pool(pa, a.width, a.height, factor);
        let (y, _, _) = average_pool(pb, a.width, a.height, factor);

        let shortest = width.min(height);
        let window = if shortest >= SSIM_WINDOW {
            SSIM_WINDOW
        } else if shortest % 2 == 1 {
            shortest
        } else {
            shortest - 1
        };
        let kernel = gaussian_kernel(window, SSIM_SIGMA);
        total += ssim_plane(&x, &y, width, height, &kernel, c1, c2);
    }
    Ok(total / a.channels() as f64)
}

/// Score a processed image against an already-loaded target
pub fn score_against(
    processed: &GrayImage,
    target: &DynamicImage,
    settings: &SimilaritySettings,
) -> Result<MetricPair> {
    let (processed_rgb, target_rgb) = align_pair(processed, target, settings)?;
    let a = NormalizedImage::from_rgb(&processed_rgb);
    let b = NormalizedImage::from_rgb(&target_rgb);

    Ok(MetricPair {
        psnr: psnr(&a, &b, settings.data_range)?,
        ssim: ssim(&a, &b, settings.data_range)?,
    })
}

/// Load the target from disk and score the processed image against it
pub fn score<P: AsRef<Path>>(
    processed: &GrayImage,
    target_path: P,
    settings: &SimilaritySettings,
) -> Result<MetricPair> {
    let target = load_target(target_path)?;
    score_against(processed, &target, settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use tempfile::tempdir;

    fn checkerboard(width: u32, height: u32, cell: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            if ((x / cell) + (y / cell)) % 2 == 0 {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    #[test]
    fn test_identical_images_score_infinite_psnr_and_unit_ssim() {
        let settings = SimilaritySettings::default();
        let image = checkerboard(48, 32, 4);
        let target = DynamicImage::ImageLuma8(image.clone());

        let metrics = score_against(&image, &target, &settings).expect("identical images should score");
        assert!(metrics.psnr.is_infinite() && metrics.psnr > 0.0);
        assert!((metrics.ssim - 1.0).abs() < 1e-9, "ssim = {}", metrics.ssim);
    }

    #[test]
    fn test_black_against_white_has_zero_psnr() {
        let settings = SimilaritySettings::default();
        let black = GrayImage::new(20, 20);
        let white = DynamicImage::ImageLuma8(GrayImage::from_pixel(20, 20, Luma([255])));

        let metrics = score_against(&black, &white, &settings).unwrap();
        assert!(metrics.psnr.abs() < 1e-12, "psnr = {}", metrics.psnr);
        assert!(metrics.ssim < 0.01);
    }

    #[test]
    fn test_psnr_matches_integer_reference() {
        let a = gray_to_rgb(&checkerboard(30, 30, 3));
        let b = gray_to_rgb(&GrayImage::from_fn(30, 30, |x, y| Luma([((x * 7 + y * 3) % 256) as u8])));

        let ours = psnr(&NormalizedImage::from_rgb(&a), &NormalizedImage::from_rgb(&b), 1.0).unwrap();
        let reference = imageproc::stats::peak_signal_to_noise_ratio(&a, &b);
        assert!((ours - reference).abs() < 1e-9, "ours={} reference={}", ours, reference);
    }

    #[test]
    fn test_inverted_structure_has_negative_ssim() {
        let image = checkerboard(40, 40, 5);
        let inverted = GrayImage::from_fn(40, 40, |x, y| Luma([255 - image.get_pixel(x, y)[0]]));

        let a = NormalizedImage::from_rgb(&gray_to_rgb(&image));
        let b = NormalizedImage::from_rgb(&gray_to_rgb(&inverted));
        let value = ssim(&a, &b, 1.0).unwrap();
        assert!(value < 0.0, "ssim = {}", value);
        assert!(value >= -1.0);
    }

    #[test]
    fn test_target_is_resized_to_processed_dimensions() {
        let settings = SimilaritySettings::default();
        let processed = GrayImage::from_pixel(20, 10, Luma([255]));
        let target = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([255, 255, 255])));

        let (left, right) = align_pair(&processed, &target, &settings).unwrap();
        assert_eq!(left.dimensions(), (20, 10));
        assert_eq!(right.dimensions(), (20, 10));

        let metrics = score_against(&processed, &target, &settings).unwrap();
        assert!(metrics.psnr.is_infinite());
    }

    #[test]
    fn test_small_images_shrink_the_window() {
        let a = NormalizedImage::from_rgb(&gray_to_rgb(&checkerboard(6, 4, 1)));
        let value = ssim(&a, &a, 1.0).unwrap();
        assert!((value - 1.0).abs() < 1e-9);

        let tiny = NormalizedImage::from_rgb(&gray_to_rgb(&GrayImage::from_pixel(1, 1, Luma([40]))));
        assert!((ssim(&tiny, &tiny, 1.0).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_large_images_are_pooled_before_windowing() {
        let image = checkerboard(600, 520, 16);
        let a = NormalizedImage::from_rgb(&gray_to_rgb(&image));
        let value = ssim(&a, &a, 1.0).unwrap();
        assert!((value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_target_reports_target_not_found() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.png");
        let processed = GrayImage::new(4, 4);

        match score(&processed, &missing, &SimilaritySettings::default()) {
            Err(TunerError::TargetNotFound { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected TargetNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_sized_processed_image_is_a_dimension_mismatch() {
        let target = DynamicImage::ImageLuma8(GrayImage::new(8, 8));
        let result = score_against(&GrayImage::new(0, 5), &target, &SimilaritySettings::default());
        assert!(matches!(result, Err(TunerError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_mismatched_normalized_images_are_rejected() {
        let a = NormalizedImage::from_rgb(&RgbImage::new(4, 4));
        let b = NormalizedImage::from_rgb(&RgbImage::new(5, 4));
        assert!(matches!(psnr(&a, &b, 1.0), Err(TunerError::DimensionMismatch { .. })));
        assert!(matches!(ssim(&a, &b, 1.0), Err(TunerError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_score_reads_target_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("target.png");
        let image = checkerboard(16, 16, 2);
        image.save(&path).unwrap();

        let metrics = score(&image, &path, &SimilaritySettings::default()).unwrap();
        assert!(metrics.psnr.is_infinite());
    }
}
