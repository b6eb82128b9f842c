//! Single-pass instance segmentation.

use std::path::Path;

use concord_core::Mask;
use image::RgbImage;
use ndarray::{s, Array4, Ix4};
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::InstanceSegConfig;
use crate::error::VisionError;
use crate::models::registry;
use crate::proposer::{Proposal, RegionProposer};

/// Instance segmentation network behind one ONNX session.
///
/// Expected model contract (torchvision-style detection export): input
/// `image` `[1,3,H,W]` scaled to `[0,1]`; outputs `boxes` `[N,4]`, `labels`
/// `[N]` (i64), `scores` `[N]` and `masks` `[N,1,H,W]` probabilities.
#[derive(Debug)]
pub struct InstanceSegmenter {
    session: Mutex<Session>,
    config: InstanceSegConfig,
}

impl InstanceSegmenter {
    pub fn new(model_dir: &Path, config: InstanceSegConfig) -> Result<Self, VisionError> {
        let path = registry::resolve_model_path(model_dir, &config.model_file)?;
        let session = registry::build_session(&path)?;
        Ok(Self {
            session: Mutex::new(session),
            config,
        })
    }
}

impl RegionProposer for InstanceSegmenter {
    fn name(&self) -> &'static str {
        "instance_seg"
    }

    fn propose(&self, image: &RgbImage) -> Result<Vec<Proposal>, VisionError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let mut input = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        for (x, y, pixel) in image.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / 255.0;
            }
        }

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![
            "image" => TensorRef::from_array_view(&input)?,
        ])?;

        let scores: Vec<f32> = outputs["scores"]
            .try_extract_array::<f32>()?
            .iter()
            .copied()
            .collect();
        let labels: Vec<i64> = outputs["labels"]
            .try_extract_array::<i64>()?
            .iter()
            .copied()
            .collect();
        let masks = outputs["masks"].try_extract_array::<f32>()?;
        let masks = masks
            .into_dimensionality::<Ix4>()
            .map_err(|e| VisionError::Model(format!("unexpected masks shape: {}", e)))?;

        let count = masks.shape()[0];
        if masks.shape()[1] != 1 {
            return Err(VisionError::Model(format!(
                "expected single-channel instance masks, got {} channels",
                masks.shape()[1]
            )));
        }
        if scores.len() < count {
            return Err(VisionError::Model(format!(
                "{} masks but only {} scores",
                count,
                scores.len()
            )));
        }
        let (mask_h, mask_w) = (masks.shape()[2], masks.shape()[3]);

        let mut proposals = Vec::new();
        for index in 0..count {
            let score = scores[index];
            if score < self.config.score_thresh {
                continue;
            }
            let plane = masks.slice(s![index, 0, .., ..]);
            let mut data = Vec::with_capacity(mask_h * mask_w);
            for y in 0..mask_h {
                for x in 0..mask_w {
                    data.push(plane[(y, x)] > self.config.mask_thresh);
                }
            }
            let mask = Mask::new(mask_w as u32, mask_h as u32, data)?;
            let mask = if mask.dimensions() == (width, height) {
                mask
            } else {
                mask.resample_nearest(width, height)
            };
            let area = mask.area();
            if area == 0 {
                continue;
            }
            debug!(
                instance = index,
                class = labels.get(index).copied().unwrap_or(-1),
                score,
                area,
                "instance mask kept"
            );
            proposals.push(Proposal { mask, score, area });
        }

        info!(
            proposer = self.name(),
            proposals = proposals.len(),
            "instance segmentation complete"
        );
        Ok(proposals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_file_fails_construction() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = InstanceSegmenter::new(dir.path(), InstanceSegConfig::default()).unwrap_err();
        assert!(matches!(err, VisionError::Config(_)));
    }
}
