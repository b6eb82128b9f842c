//! ONNX model loading and the two segmentation proposers

pub mod auto_mask;
pub mod instance_seg;
pub mod registry;

pub use auto_mask::AutoMaskGenerator;
pub use instance_seg::InstanceSegmenter;
