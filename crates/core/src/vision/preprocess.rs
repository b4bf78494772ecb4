use std::collections::BTreeSet;

use anyhow::{Result, ensure};
use candle_core::{Device, Tensor};
use image::{DynamicImage, GenericImageView, imageops::FilterType};
use serde::Deserialize;

/// Visual tokenizer geometry and normalisation, read from `preprocessor_config.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub image_size: u32,
    pub patch_size: u32,
    pub hidden_stride: u32,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            image_size: 448,
            patch_size: 14,
            hidden_stride: 2,
            image_mean: [0.5, 0.5, 0.5],
            image_std: [0.5, 0.5, 0.5],
        }
    }
}

impl ImageSettings {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.image_size > 0, "image_size must be positive");
        ensure!(
            self.patch_size > 0 && self.image_size % self.patch_size == 0,
            "image_size {} is not a multiple of patch_size {}",
            self.image_size,
            self.patch_size
        );
        let grid = self.image_size / self.patch_size;
        ensure!(
            self.hidden_stride > 0 && grid % self.hidden_stride == 0,
            "patch grid {grid} is not divisible by hidden_stride {}",
            self.hidden_stride
        );
        ensure!(
            self.image_std.iter().all(|&s| s != 0.0),
            "image_std must be non-zero"
        );
        Ok(())
    }

    /// Number of visual tokens a single view expands to.
    pub fn tokens_per_view(&self) -> usize {
        let side = (self.image_size / self.patch_size / self.hidden_stride) as usize;
        side * side
    }
}

#[derive(Debug, Clone)]
pub struct PartitionResult {
    /// Global view first (only when tiled), then tiles in row-major order.
    pub views: Vec<DynamicImage>,
    /// Chosen grid as `(columns, rows)`.
    pub grid: (u32, u32),
}

pub fn partition_image(
    image: &DynamicImage,
    max_partition: usize,
    image_size: u32,
) -> Result<PartitionResult> {
    let (orig_width, orig_height) = image.dimensions();
    ensure!(
        orig_width > 0 && orig_height > 0,
        "image has zero width or height"
    );
    ensure!(max_partition >= 1, "max_partition must be at least 1");
    let max_num = u32::try_from(max_partition).unwrap_or(u32::MAX);
    let aspect_ratio = orig_width as f64 / orig_height as f64;

    let mut candidates: BTreeSet<(u32, u32)> = BTreeSet::new();
    for cols in 1..=max_num {
        for rows in 1..=max_num / cols {
            candidates.insert((cols, rows));
        }
    }

    let mut grid = (1, 1);
    let mut best_ratio_diff = f64::MAX;
    let area = orig_width as f64 * orig_height as f64;
    for &(cols, rows) in &candidates {
        let target_ratio = cols as f64 / rows as f64;
        let ratio_diff = (aspect_ratio - target_ratio).abs();
        if ratio_diff < best_ratio_diff {
            best_ratio_diff = ratio_diff;
            grid = (cols, rows);
        } else if (ratio_diff - best_ratio_diff).abs() < f64::EPSILON {
            let grid_area = image_size as f64 * image_size as f64 * (cols * rows) as f64;
            if area > 0.5 * grid_area {
                grid = (cols, rows);
            }
        }
    }

    let (cols, rows) = grid;
    let resized = image.resize_exact(cols * image_size, rows * image_size, FilterType::CatmullRom);

    let mut views = Vec::with_capacity((cols * rows + 1) as usize);
    if cols * rows > 1 {
        views.push(image.resize_exact(image_size, image_size, FilterType::CatmullRom));
    }
    for i in 0..cols * rows {
        let x = (i % cols) * image_size;
        let y = (i / cols) * image_size;
        views.push(resized.crop_imm(x, y, image_size, image_size));
    }

    Ok(PartitionResult { views, grid })
}

/// Stack views into a normalised `[views, 3, size, size]` f32 tensor.
pub fn views_to_tensor(
    views: &[DynamicImage],
    settings: &ImageSettings,
    device: &Device,
) -> Result<Tensor> {
    ensure!(!views.is_empty(), "no image views to encode");
    let size = settings.image_size;
    let mut data = Vec::with_capacity(views.len() * 3 * (size * size) as usize);
    for view in views {
        let rgb = view.to_rgb8();
        ensure!(
            rgb.dimensions() == (size, size),
            "view has size {:?}, expected {size}x{size}",
            rgb.dimensions()
        );
        for c in 0..3 {
            let mean = settings.image_mean[c];
            let std = settings.image_std[c];
            for y in 0..size {
                for x in 0..size {
                    let value = rgb.get_pixel(x, y)[c] as f32 / 255.0;
                    data.push((value - mean) / std);
                }
            }
        }
    }
    let shape = (views.len(), 3, size as usize, size as usize);
    Ok(Tensor::from_vec(data, shape, device)?)
}
