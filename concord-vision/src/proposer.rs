//! The seam between matching and the segmentation backends.

use concord_core::Region;
use image::RgbImage;
use tracing::debug;

use crate::error::VisionError;

/// A raw candidate mask from a model, before labeling.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub mask: concord_core::Mask,
    /// Model confidence surrogate (predicted IoU or detection score).
    pub score: f32,
    pub area: usize,
}

/// Anything that can propose candidate masks for an image.
///
/// Proposers run synchronously; callers move them onto a blocking thread.
/// Returning an empty proposal list is a valid outcome, not an error.
pub trait RegionProposer: Send + Sync {
    fn name(&self) -> &'static str;

    fn propose(&self, image: &RgbImage) -> Result<Vec<Proposal>, VisionError>;
}

/// Normalizes raw proposals into labeled candidate regions.
///
/// Labels follow the proposal order (1-based). Masks keep whatever
/// resolution the proposer emitted; comparison resamples candidates to the
/// reference resolution, never the other way around.
pub fn label_proposals(proposals: Vec<Proposal>) -> Vec<Region> {
    proposals
        .into_iter()
        .enumerate()
        .map(|(index, proposal)| {
            if let Some((x, y, w, h)) = proposal.mask.bounding_box() {
                debug!(
                    candidate = index + 1,
                    score = proposal.score,
                    area = proposal.area,
                    bbox_x = x,
                    bbox_y = y,
                    bbox_w = w,
                    bbox_h = h,
                    "labeled candidate mask"
                );
            }
            Region::new(index as u32 + 1, proposal.mask)
        })
        .collect()
}
