use std::path::Path;

use enhance_tuner::config::{Config, GridConfig};
use enhance_tuner::grid::ParameterRange;
use image::{GrayImage, Luma};

/// Horizontal ramp, `step` intensity levels per column.
pub fn horizontal_gradient(width: u32, height: u32, step: u32) -> GrayImage {
    assert!(width > 0 && height > 0, "image dimensions must be positive");
    GrayImage::from_fn(width, height, |x, _| Luma([(x * step).min(255) as u8]))
}

/// Black/white split of `image` at `threshold`, strictly greater is white.
pub fn binarized(image: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([if image.get_pixel(x, y)[0] > threshold { 255 } else { 0 }])
    })
}

/// A grid small enough to run in well under a second.
pub fn small_grid() -> GridConfig {
    GridConfig {
        brightness: ParameterRange::new(-20, 21, 10),
        contrast: ParameterRange::new(1.0, 1.6, 0.5),
        threshold: ParameterRange::new(80, 181, 50),
        morph_size: ParameterRange::new(1, 4, 2),
    }
}

/// Lay out `input/`, `target/` and `output/` under `root` and return a config for them.
pub fn workspace(root: &Path, source: &GrayImage, target: &GrayImage) -> Config {
    let input_dir = root.join("input");
    let target_dir = root.join("target");
    std::fs::create_dir_all(&input_dir).expect("create input dir");
    std::fs::create_dir_all(&target_dir).expect("create target dir");

    source.save(input_dir.join("source.png")).expect("write source");
    target.save(target_dir.join("target.png")).expect("write target");

    let mut config = Config::default();
    config.input_directory = input_dir.display().to_string();
    config.target_image = target_dir.join("target.png").display().to_string();
    config.output_directory = root.join("output").display().to_string();
    config.grid = small_grid();
    config
}
