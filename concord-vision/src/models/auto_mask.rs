//! Prompt-free automatic mask generation.
//!
//! Drives a promptable segmentation model (image plus one point prompt in,
//! three candidate masks with predicted IoUs out) over a regular grid of
//! foreground points. Each grid point keeps its best candidate by predicted
//! IoU; the winners then pass predicted-IoU, stability and minimum-area
//! filters before near-duplicates are suppressed.

use std::path::Path;

use concord_core::{iou, Mask};
use image::{imageops::FilterType, RgbImage};
use ndarray::{s, Array2, Array3, Array4, ArrayView2, Ix4};
use ort::session::Session;
use ort::value::{Tensor, TensorRef};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::AutoMaskConfig;
use crate::error::VisionError;
use crate::models::registry;
use crate::proposer::{Proposal, RegionProposer};

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Automatic mask generator over a single prompt-decoder ONNX session.
///
/// Expected model contract: inputs `image` `[1,3,S,S]` (ImageNet-normalized),
/// `point_coords` `[1,1,2]` and `point_labels` `[1,1]` in input pixel space;
/// outputs `masks` `[1,K,H,W]` logits and `iou_predictions` `[1,K]`.
#[derive(Debug)]
pub struct AutoMaskGenerator {
    session: Mutex<Session>,
    config: AutoMaskConfig,
}

impl AutoMaskGenerator {
    pub fn new(model_dir: &Path, config: AutoMaskConfig) -> Result<Self, VisionError> {
        let path = registry::resolve_model_path(model_dir, &config.model_file)?;
        let session = registry::build_session(&path)?;
        Ok(Self {
            session: Mutex::new(session),
            config,
        })
    }

    fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let size = self.config.input_size;
        let resized = image::imageops::resize(image, size, size, FilterType::Lanczos3);
        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel.0[c] as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }
        tensor
    }
}

/// Evenly spaced prompt points in input pixel space, row-major.
fn grid_points(points_per_side: u32, input_size: f32) -> Vec<(f32, f32)> {
    let mut points = Vec::with_capacity((points_per_side * points_per_side) as usize);
    for gy in 0..points_per_side {
        for gx in 0..points_per_side {
            points.push((
                (gx as f32 + 0.5) * input_size / points_per_side as f32,
                (gy as f32 + 0.5) * input_size / points_per_side as f32,
            ));
        }
    }
    points
}

/// Area at (threshold + offset) over area at (threshold - offset).
///
/// A mask whose binarization barely changes under a logit nudge is stable;
/// one that balloons or collapses is noise.
fn stability_score(logits: &ArrayView2<f32>, threshold: f32, offset: f32) -> f32 {
    let high = threshold + offset;
    let low = threshold - offset;
    let mut upper = 0usize;
    let mut lower = 0usize;
    for value in logits.iter() {
        if *value > high {
            upper += 1;
        }
        if *value > low {
            lower += 1;
        }
    }
    if lower == 0 {
        return 0.0;
    }
    upper as f32 / lower as f32
}

impl RegionProposer for AutoMaskGenerator {
    fn name(&self) -> &'static str {
        "auto_mask"
    }

    fn propose(&self, image: &RgbImage) -> Result<Vec<Proposal>, VisionError> {
        let (image_w, image_h) = image.dimensions();
        if image_w == 0 || image_h == 0 {
            return Ok(Vec::new());
        }

        let input = self.preprocess(image);
        let mut survivors: Vec<Proposal> = Vec::new();

        {
            let mut session = self.session.lock();
            for (px, py) in grid_points(self.config.points_per_side, self.config.input_size as f32)
            {
                let mut coords = Array3::<f32>::zeros((1, 1, 2));
                coords[[0, 0, 0]] = px;
                coords[[0, 0, 1]] = py;
                let labels = Array2::<f32>::from_elem((1, 1), 1.0);

                let outputs = session.run(ort::inputs![
                    "image" => TensorRef::from_array_view(&input)?,
                    "point_coords" => Tensor::from_array(coords)?,
                    "point_labels" => Tensor::from_array(labels)?,
                ])?;

                let ious = outputs["iou_predictions"].try_extract_array::<f32>()?;
                let mut best_index = 0usize;
                let mut best_iou = f32::MIN;
                for (index, value) in ious.iter().enumerate() {
                    if *value > best_iou {
                        best_iou = *value;
                        best_index = index;
                    }
                }
                if best_iou < self.config.pred_iou_thresh {
                    continue;
                }

                let masks = outputs["masks"].try_extract_array::<f32>()?;
                let masks = masks
                    .into_dimensionality::<Ix4>()
                    .map_err(|e| VisionError::Model(format!("unexpected masks shape: {}", e)))?;
                if best_index >= masks.shape()[1] {
                    return Err(VisionError::Model(format!(
                        "iou_predictions index {} exceeds {} mask candidates",
                        best_index,
                        masks.shape()[1]
                    )));
                }
                let logits = masks.slice(s![0, best_index, .., ..]);

                let stability = stability_score(
                    &logits,
                    self.config.mask_threshold,
                    self.config.stability_offset,
                );
                if stability < self.config.stability_score_thresh {
                    continue;
                }

                let (mask_h, mask_w) = (logits.shape()[0], logits.shape()[1]);
                let mut data = Vec::with_capacity(mask_h * mask_w);
                for y in 0..mask_h {
                    for x in 0..mask_w {
                        data.push(logits[(y, x)] > self.config.mask_threshold);
                    }
                }
                let mask = Mask::new(mask_w as u32, mask_h as u32, data)?
                    .resample_nearest(image_w, image_h);
                let area = mask.area();
                if area < self.config.min_region_area {
                    continue;
                }

                debug!(
                    point_x = px,
                    point_y = py,
                    predicted_iou = best_iou,
                    stability,
                    area,
                    "grid point produced a mask"
                );
                survivors.push(Proposal {
                    mask,
                    score: best_iou,
                    area,
                });
            }
        }

        // Highest predicted IoU wins duplicate conflicts.
        survivors.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut kept: Vec<Proposal> = Vec::new();
        for proposal in survivors {
            let duplicate = kept
                .iter()
                .any(|k| iou(&k.mask, &proposal.mask) > self.config.dedup_iou);
            if !duplicate {
                kept.push(proposal);
            }
        }

        info!(
            proposer = self.name(),
            proposals = kept.len(),
            "automatic mask generation complete"
        );
        Ok(kept)
    }
}
