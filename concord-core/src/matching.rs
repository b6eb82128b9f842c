//! IoU scoring and greedy region matching.
//!
//! Matching is intentionally non-exclusive: every reference region gets the
//! candidate with the highest IoU, and one candidate may win several
//! references (a single model mask covering two user regions is a legitimate
//! outcome, not a conflict to resolve).

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::mask::{Mask, Region};

/// Intersection-over-union between a reference mask and a candidate mask.
///
/// When dimensions differ the candidate is resampled to the reference
/// dimensions with nearest-neighbor; the reference is never resampled.
/// Two empty masks score 0.0.
pub fn iou(reference: &Mask, candidate: &Mask) -> f32 {
    let resampled;
    let candidate = if candidate.dimensions() == reference.dimensions() {
        candidate
    } else {
        resampled = candidate.resample_nearest(reference.width(), reference.height());
        &resampled
    };

    // Dimensions match here, so the area calls cannot fail.
    let intersection = reference.intersection_area(candidate).unwrap_or(0);
    let union = reference.union_area(candidate).unwrap_or(0);
    if union == 0 {
        return 0.0;
    }
    intersection as f32 / union as f32
}

/// One reference region paired with its best-scoring candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionMatch {
    pub reference_label: u32,
    /// Index into the candidate list, or `None` when no candidates existed.
    pub candidate_index: Option<usize>,
    pub score: f32,
}

/// Result of matching one candidate set against the reference regions.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub matches: Vec<RegionMatch>,
    /// OR of all reference masks, at image dimensions.
    pub combined_reference: Mask,
    /// OR of the matched candidate masks, at image dimensions.
    pub combined_candidates: Mask,
    /// Arithmetic mean of per-reference best scores; 0.0 with no references.
    pub mean_score: f32,
    /// References that had no candidate at all to match against.
    pub unmatched_references: usize,
}

/// Greedily pairs every reference region with its best candidate by IoU.
///
/// Candidates are scanned in index order with a strict `>` comparison, so
/// equal scores keep the lowest index. A reference with an empty candidate
/// set is logged as a warning and recorded with score 0.0; the run goes on.
pub fn match_and_combine(
    references: &[Region],
    candidates: &[Region],
    width: u32,
    height: u32,
) -> MatchOutcome {
    let mut combined_reference = Mask::empty(width, height);
    let mut combined_candidates = Mask::empty(width, height);
    let mut matches = Vec::with_capacity(references.len());
    let mut unmatched_references = 0;
    let mut total_score = 0.0f32;

    for reference in references {
        if let Err(err) = combined_reference.union_with(&reference.mask) {
            warn!(label = reference.label, %err, "reference mask skipped in combined view");
        }

        let mut best_match: Option<(usize, f32)> = None;
        for (candidate_index, candidate) in candidates.iter().enumerate() {
            let score = iou(&reference.mask, &candidate.mask);
            match best_match {
                Some((_, best_score)) if score <= best_score => {}
                _ => best_match = Some((candidate_index, score)),
            }
        }

        match best_match {
            Some((candidate_index, score)) => {
                let candidate = &candidates[candidate_index].mask;
                let at_image = if candidate.dimensions() == (width, height) {
                    candidate.clone()
                } else {
                    candidate.resample_nearest(width, height)
                };
                if let Err(err) = combined_candidates.union_with(&at_image) {
                    warn!(candidate = candidate_index, %err, "candidate mask skipped in combined view");
                }
                debug!(
                    label = reference.label,
                    candidate = candidate_index,
                    score,
                    "matched region"
                );
                total_score += score;
                matches.push(RegionMatch {
                    reference_label: reference.label,
                    candidate_index: Some(candidate_index),
                    score,
                });
            }
            None => {
                warn!(
                    label = reference.label,
                    "no candidate masks to match against region"
                );
                unmatched_references += 1;
                matches.push(RegionMatch {
                    reference_label: reference.label,
                    candidate_index: None,
                    score: 0.0,
                });
            }
        }
    }

    let mean_score = if matches.is_empty() {
        0.0
    } else {
        total_score / matches.len() as f32
    };

    MatchOutcome {
        matches,
        combined_reference,
        combined_candidates,
        mean_score,
        unmatched_references,
    }
}

/// Agreement between two models: IoU of their combined candidate masks.
///
/// 0.0 when either side matched nothing, by the same empty-mask rule as
/// [`iou`].
pub fn agreement(a: &MatchOutcome, b: &MatchOutcome) -> f32 {
    iou(&a.combined_candidates, &b.combined_candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_mask(width: u32, height: u32, x0: u32, y0: u32, w: u32, h: u32) -> Mask {
        Mask::from_fn(width, height, |x, y| {
            x >= x0 && x < x0 + w && y >= y0 && y < y0 + h
        })
    }

    fn rect_region(label: u32, width: u32, height: u32, x0: u32, y0: u32, w: u32, h: u32) -> Region {
        Region::new(label, rect_mask(width, height, x0, y0, w, h))
    }

    #[test]
    fn test_iou_identical_masks() {
        let mask = rect_mask(20, 20, 5, 5, 10, 10);
        assert_eq!(iou(&mask, &mask), 1.0);
    }

    #[test]
    fn test_iou_disjoint_masks() {
        let a = rect_mask(20, 20, 0, 0, 5, 5);
        let b = rect_mask(20, 20, 10, 10, 5, 5);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_partial_overlap() {
        // 10x10 squares offset by 5: intersection 25, union 175
        let a = rect_mask(30, 30, 0, 0, 10, 10);
        let b = rect_mask(30, 30, 5, 5, 10, 10);
        let expected = 25.0 / 175.0;
        assert!((iou(&a, &b) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_iou_both_empty_is_zero() {
        let a = Mask::empty(10, 10);
        let b = Mask::empty(10, 10);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_one_empty_is_zero() {
        let a = rect_mask(10, 10, 0, 0, 4, 4);
        let b = Mask::empty(10, 10);
        assert_eq!(iou(&a, &b), 0.0);
        assert_eq!(iou(&b, &a), 0.0);
    }

    #[test]
    fn test_iou_symmetry_same_dimensions() {
        let a = rect_mask(25, 25, 2, 3, 9, 7);
        let b = rect_mask(25, 25, 6, 5, 11, 12);
        assert_eq!(iou(&a, &b), iou(&b, &a));
    }

    #[test]
    fn test_iou_resamples_candidate_to_reference() {
        let reference = rect_mask(10, 10, 2, 2, 4, 4);
        // Same shape drawn at double resolution
        let candidate = rect_mask(20, 20, 4, 4, 8, 8);
        let direct = iou(&reference, &candidate);
        let presampled = iou(&reference, &candidate.resample_nearest(10, 10));
        assert_eq!(direct, presampled);
        assert!((direct - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_two_squares_against_their_union() {
        // Two disjoint user squares; one candidate covering exactly both.
        let left = rect_region(1, 40, 20, 0, 0, 10, 10);
        let right = rect_region(2, 40, 20, 20, 0, 10, 10);
        let union_mask = Mask::from_fn(40, 20, |x, y| {
            left.mask.get(x, y) || right.mask.get(x, y)
        });
        let candidates = vec![Region::new(1, union_mask.clone())];

        let outcome = match_and_combine(&[left, right], &candidates, 40, 20);

        assert_eq!(outcome.matches.len(), 2);
        for m in &outcome.matches {
            assert_eq!(m.candidate_index, Some(0));
            assert!((m.score - 0.5).abs() < 1e-6);
        }
        assert!((outcome.mean_score - 0.5).abs() < 1e-6);
        assert_eq!(outcome.unmatched_references, 0);
        assert_eq!(outcome.combined_candidates, union_mask);
        assert_eq!(outcome.combined_reference, union_mask);
    }

    #[test]
    fn test_empty_candidates_warns_and_scores_zero() {
        let references = vec![
            rect_region(1, 20, 20, 0, 0, 4, 4),
            rect_region(2, 20, 20, 8, 8, 4, 4),
            rect_region(3, 20, 20, 14, 2, 4, 4),
        ];
        let outcome = match_and_combine(&references, &[], 20, 20);

        assert_eq!(outcome.matches.len(), 3);
        assert_eq!(outcome.unmatched_references, 3);
        assert!(outcome
            .matches
            .iter()
            .all(|m| m.candidate_index.is_none() && m.score == 0.0));
        assert_eq!(outcome.mean_score, 0.0);
        assert!(outcome.combined_candidates.is_empty());
        assert_eq!(outcome.combined_reference.area(), 48);
    }

    #[test]
    fn test_empty_references_mean_is_zero() {
        let candidates = vec![rect_region(1, 20, 20, 0, 0, 4, 4)];
        let outcome = match_and_combine(&[], &candidates, 20, 20);
        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.mean_score, 0.0);
        assert_eq!(outcome.unmatched_references, 0);
        assert!(outcome.combined_reference.is_empty());
        assert!(outcome.combined_candidates.is_empty());
    }

    #[test]
    fn test_tie_keeps_lowest_candidate_index() {
        let reference = rect_region(1, 20, 20, 0, 0, 6, 6);
        // Two identical candidates; index 0 must win the tie.
        let candidates = vec![
            rect_region(1, 20, 20, 0, 0, 6, 6),
            rect_region(2, 20, 20, 0, 0, 6, 6),
        ];
        let outcome = match_and_combine(&[reference], &candidates, 20, 20);
        assert_eq!(outcome.matches[0].candidate_index, Some(0));
    }

    #[test]
    fn test_zero_scoring_candidate_still_recorded() {
        // Candidates exist but none overlap; the best (index 0) is kept
        // with score 0.0 rather than reported as unmatched.
        let reference = rect_region(1, 20, 20, 0, 0, 4, 4);
        let candidates = vec![rect_region(1, 20, 20, 10, 10, 4, 4)];
        let outcome = match_and_combine(&[reference], &candidates, 20, 20);
        assert_eq!(outcome.matches[0].candidate_index, Some(0));
        assert_eq!(outcome.matches[0].score, 0.0);
        assert_eq!(outcome.unmatched_references, 0);
    }

    #[test]
    fn test_non_exclusive_candidate_reuse() {
        let references = vec![
            rect_region(1, 30, 30, 0, 0, 10, 10),
            rect_region(2, 30, 30, 20, 20, 10, 10),
        ];
        let big = Region::new(1, Mask::from_fn(30, 30, |_, _| true));
        let outcome = match_and_combine(&references, &[big], 30, 30);
        // Both references picked the single candidate.
        assert!(outcome
            .matches
            .iter()
            .all(|m| m.candidate_index == Some(0)));
    }

    #[test]
    fn test_matching_is_deterministic() {
        let references = vec![
            rect_region(1, 30, 30, 0, 0, 12, 12),
            rect_region(2, 30, 30, 15, 15, 10, 10),
        ];
        let candidates = vec![
            rect_region(1, 30, 30, 1, 1, 12, 12),
            rect_region(2, 30, 30, 14, 14, 10, 10),
            rect_region(3, 30, 30, 5, 5, 20, 20),
        ];
        let first = match_and_combine(&references, &candidates, 30, 30);
        let second = match_and_combine(&references, &candidates, 30, 30);
        assert_eq!(first.matches, second.matches);
        assert_eq!(first.mean_score, second.mean_score);
        assert_eq!(first.combined_candidates, second.combined_candidates);
    }

    #[test]
    fn test_agreement_of_outcomes() {
        let references = vec![rect_region(1, 20, 20, 0, 0, 10, 10)];
        let exact = vec![rect_region(1, 20, 20, 0, 0, 10, 10)];
        let shifted = vec![rect_region(1, 20, 20, 5, 0, 10, 10)];

        let a = match_and_combine(&references, &exact, 20, 20);
        let b = match_and_combine(&references, &shifted, 20, 20);
        let score = agreement(&a, &b);
        // 10x10 squares offset by 5 in x: intersection 50, union 150
        assert!((score - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(agreement(&a, &b), agreement(&b, &a));
    }

    #[test]
    fn test_agreement_empty_sides_is_zero() {
        let references = vec![rect_region(1, 20, 20, 0, 0, 10, 10)];
        let matched = match_and_combine(&references, &[rect_region(1, 20, 20, 0, 0, 10, 10)], 20, 20);
        let unmatched = match_and_combine(&references, &[], 20, 20);
        assert_eq!(agreement(&matched, &unmatched), 0.0);
        assert_eq!(agreement(&unmatched, &unmatched), 0.0);
    }
}
