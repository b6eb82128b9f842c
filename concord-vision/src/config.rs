//! Configuration for concord-vision

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Automatic mask generator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoMaskConfig {
    /// ONNX file name inside the model directory
    pub model_file: String,
    /// Square input resolution the model was exported for
    pub input_size: u32,
    /// Prompt grid density; the generator runs points_per_side^2 prompts
    pub points_per_side: u32,
    /// Minimum predicted IoU for a mask to survive
    pub pred_iou_thresh: f32,
    /// Minimum stability score for a mask to survive
    pub stability_score_thresh: f32,
    /// Logit offset used when probing stability
    pub stability_offset: f32,
    /// Logit threshold for binarization
    pub mask_threshold: f32,
    /// Minimum pixel area at image resolution
    pub min_region_area: usize,
    /// Masks with IoU above this against an already kept mask are dropped
    pub dedup_iou: f32,
}

impl Default for AutoMaskConfig {
    fn default() -> Self {
        Self {
            model_file: "auto_mask.onnx".to_string(),
            input_size: 1024,
            points_per_side: 16,
            pred_iou_thresh: 0.85,
            stability_score_thresh: 0.9,
            stability_offset: 1.0,
            mask_threshold: 0.0,
            min_region_area: 1000,
            dedup_iou: 0.9,
        }
    }
}

/// Instance segmentation model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceSegConfig {
    /// ONNX file name inside the model directory
    pub model_file: String,
    /// Minimum detection confidence
    pub score_thresh: f32,
    /// Probability threshold for mask binarization
    pub mask_thresh: f32,
}

impl Default for InstanceSegConfig {
    fn default() -> Self {
        Self {
            model_file: "instance_seg.onnx".to_string(),
            score_thresh: 0.5,
            mask_thresh: 0.5,
        }
    }
}

/// Vision system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Directory holding the ONNX model files
    pub model_dir: PathBuf,
    /// Automatic mask generator settings
    pub auto: AutoMaskConfig,
    /// Instance segmentation settings
    pub instance: InstanceSegConfig,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("./models"),
            auto: AutoMaskConfig::default(),
            instance: InstanceSegConfig::default(),
        }
    }
}

impl VisionConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.auto.model_file.is_empty() || self.instance.model_file.is_empty() {
            return Err("Model file names must not be empty".to_string());
        }
        if self.auto.input_size < 64 {
            return Err("Auto mask input size must be at least 64".to_string());
        }
        if self.auto.points_per_side == 0 || self.auto.points_per_side > 64 {
            return Err("Points per side must be between 1 and 64".to_string());
        }
        for (name, value) in [
            ("pred_iou_thresh", self.auto.pred_iou_thresh),
            ("stability_score_thresh", self.auto.stability_score_thresh),
            ("dedup_iou", self.auto.dedup_iou),
            ("score_thresh", self.instance.score_thresh),
            ("mask_thresh", self.instance.mask_thresh),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be between 0.0 and 1.0", name));
            }
        }
        if self.auto.stability_offset <= 0.0 {
            return Err("Stability offset must be positive".to_string());
        }
        Ok(())
    }
}
