//! concord-vision: image-side machinery for Concord.
//!
//! Turns free-form user strokes into labeled reference regions, runs the two
//! ONNX segmentation proposers (automatic mask generation and instance
//! segmentation), and renders the overlay, cutout and trend artifacts a run
//! publishes.

pub mod config;
pub mod error;
pub mod models;
pub mod proposer;
pub mod render;
pub mod strokes;

pub use config::{AutoMaskConfig, InstanceSegConfig, VisionConfig};
pub use error::VisionError;
pub use models::{AutoMaskGenerator, InstanceSegmenter};
pub use proposer::{label_proposals, Proposal, RegionProposer};
pub use render::{render_cutout, render_overlay, render_trend};
pub use strokes::{rasterize_strokes, Stroke, StrokePoint};
