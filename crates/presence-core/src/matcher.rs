//! Nearest-neighbour identity matching.
//!
//! A probe is accepted only when two independent gates pass: the raw
//! distance must be within `tolerance`, and the derived confidence
//! `1 - min(1, distance)` must exceed `confidence_floor`. The gates disagree
//! near the boundary (distance 0.6 passes a 0.6 tolerance but only yields
//! 0.4 confidence), so they are never folded into a single threshold.

use crate::types::{Embedding, Identity, MatchResult};

pub const DEFAULT_TOLERANCE: f32 = 0.6;
pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.5;

/// Acceptance thresholds for a match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    /// Maximum accepted raw distance (inclusive).
    pub tolerance: f32,
    /// Confidence must be strictly greater than this.
    pub confidence_floor: f32,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
        }
    }
}

impl MatchPolicy {
    /// Map a raw distance to a confidence score in [0, 1].
    ///
    /// Assumes distances are roughly bounded near 1 (dlib/ArcFace L2 space).
    pub fn confidence(distance: f32) -> f32 {
        1.0 - distance.min(1.0)
    }

    pub fn accepts(&self, distance: f32) -> bool {
        distance <= self.tolerance && Self::confidence(distance) > self.confidence_floor
    }
}

/// Distance an embedding space is calibrated for.
///
/// dlib-style descriptors are compared with Euclidean distance. ArcFace
/// vectors are L2-normalised and compared by angle: on unit vectors the
/// Euclidean distance is `sqrt(2 * cosine_distance)`, which would push
/// same-person pairs past the default 0.6 tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Metric {
    #[default]
    Euclidean,
    Cosine,
}

impl Metric {
    pub fn matcher(self) -> Box<dyn Matcher> {
        match self {
            Metric::Euclidean => Box::new(EuclideanMatcher),
            Metric::Cosine => Box::new(CosineMatcher),
        }
    }
}

/// Strategy for comparing a probe embedding against a gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[Identity], policy: &MatchPolicy)
        -> MatchResult;
}

/// Euclidean nearest-neighbour matcher.
///
/// Ties on the minimum distance go to the first entry in gallery order.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[Identity],
        policy: &MatchPolicy,
    ) -> MatchResult {
        nearest(probe, gallery, policy, Embedding::euclidean_distance)
    }
}

/// Cosine-distance nearest-neighbour matcher, same gates and tie rule as
/// [`EuclideanMatcher`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[Identity],
        policy: &MatchPolicy,
    ) -> MatchResult {
        nearest(probe, gallery, policy, Embedding::cosine_distance)
    }
}

fn nearest(
    probe: &Embedding,
    gallery: &[Identity],
    policy: &MatchPolicy,
    distance: impl Fn(&Embedding, &Embedding) -> f32,
) -> MatchResult {
    let mut best_dist = f32::INFINITY;
    let mut best_idx: Option<usize> = None;

    for (i, identity) in gallery.iter().enumerate() {
        let dist = distance(probe, &identity.embedding);
        // Strict `<` keeps the first of several equal minima.
        if dist < best_dist {
            best_dist = dist;
            best_idx = Some(i);
        }
    }

    let Some(idx) = best_idx else {
        return MatchResult::unknown(0.0, f32::INFINITY);
    };

    let confidence = MatchPolicy::confidence(best_dist);
    if policy.accepts(best_dist) {
        MatchResult {
            name: Some(gallery[idx].name.clone()),
            confidence,
            distance: best_dist,
        }
    } else {
        MatchResult::unknown(confidence, best_dist)
    }
}
