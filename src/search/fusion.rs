//! Score fusion across the appearance and landmark modalities.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::store::ScoredLabel;
use crate::config::SearchConfig;

/// Fusion weights and thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionConfig {
    pub image_weight: f32,
    pub landmark_weight: f32,
    /// Multiplier for labels found by both modalities
    pub dual_boost: f32,
    /// Fused scores must be strictly greater than this
    pub min_score: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self::from_search(&SearchConfig::default())
    }
}

impl FusionConfig {
    pub fn from_search(config: &SearchConfig) -> Self {
        Self {
            image_weight: config.image_weight,
            landmark_weight: config.landmark_weight,
            dual_boost: config.dual_boost,
            min_score: config.min_score,
        }
    }

    pub fn with_weights(mut self, image_weight: f32, landmark_weight: f32) -> Self {
        self.image_weight = image_weight;
        self.landmark_weight = landmark_weight;
        self
    }
}

/// One fused label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedMatch {
    pub label: String,
    /// Fused score, at most 1.0
    pub score: f32,
    /// Best appearance similarity, if the label was an appearance hit
    pub image_score: Option<f32>,
    /// Best landmark similarity, if the label was a landmark hit
    pub landmark_score: Option<f32>,
}

/// A label with a single score (landmark-only recognition).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    #[serde(rename = "confidence")]
    pub score: f32,
}

impl From<ScoredLabel> for LabelScore {
    fn from(hit: ScoredLabel) -> Self {
        Self {
            label: hit.label,
            score: hit.score,
        }
    }
}

#[derive(Default)]
struct Accumulator {
    image: Option<f32>,
    landmark: Option<f32>,
}

fn keep_max(slot: &mut Option<f32>, score: f32) {
    *slot = Some(slot.map_or(score, |s| s.max(score)));
}

/// Fuse two hit lists into one ranked label list.
///
/// Each label keeps its best score per modality. The combined score is the
/// weighted sum of both (an absent modality contributes zero), boosted when
/// both modalities found the label. Labels at or below `min_score` are
/// dropped. Results are ordered by descending score with ties broken by
/// label, and reported scores are clamped to 1.0.
pub fn fuse(
    image_hits: &[ScoredLabel],
    landmark_hits: &[ScoredLabel],
    config: &FusionConfig,
    top_k: usize,
) -> Vec<FusedMatch> {
    let mut by_label: BTreeMap<&str, Accumulator> = BTreeMap::new();

    for hit in image_hits {
        keep_max(&mut by_label.entry(&hit.label).or_default().image, hit.score);
    }
    for hit in landmark_hits {
        keep_max(
            &mut by_label.entry(&hit.label).or_default().landmark,
            hit.score,
        );
    }

    let mut fused: Vec<(f32, FusedMatch)> = by_label
        .into_iter()
        .filter_map(|(label, acc)| {
            let mut combined = config.image_weight * acc.image.unwrap_or(0.0)
                + config.landmark_weight * acc.landmark.unwrap_or(0.0);
            if acc.image.is_some() && acc.landmark.is_some() {
                combined *= config.dual_boost;
            }
            (combined > config.min_score).then(|| {
                (
                    combined,
                    FusedMatch {
                        label: label.to_string(),
                        score: combined.min(1.0),
                        image_score: acc.image,
                        landmark_score: acc.landmark,
                    },
                )
            })
        })
        .collect();

    // Sort on the unclamped score so boosted labels above 1.0 keep their order.
    fused.sort_by(|(a, ma), (b, mb)| {
        b.partial_cmp(a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| ma.label.cmp(&mb.label))
    });
    fused.truncate(top_k);
    fused.into_iter().map(|(_, m)| m).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(items: &[(&str, f32)]) -> Vec<ScoredLabel> {
        items.iter().map(|(l, s)| ScoredLabel::new(*l, *s)).collect()
    }

    #[test]
    fn test_dual_presence_boost() {
        let config = FusionConfig::default();
        let out = fuse(
            &hits(&[("hello", 0.8)]),
            &hits(&[("hello", 0.9)]),
            &config,
            8,
        );
        assert_eq!(out.len(), 1);
        let expected: f32 = (0.35 * 0.8 + 0.65 * 0.9) * 1.15;
        assert!((out[0].score - expected.min(1.0)).abs() < 1e-6);
        assert_eq!(out[0].image_score, Some(0.8));
        assert_eq!(out[0].landmark_score, Some(0.9));
    }

    #[test]
    fn test_single_modality_must_clear_floor() {
        let config = FusionConfig::default();
        // 0.35 * 0.9 = 0.315, below the floor
        let out = fuse(&hits(&[("a", 0.9)]), &[], &config, 8);
        assert!(out.is_empty());

        // 0.65 * 0.6 = 0.39
        let out = fuse(&[], &hits(&[("b", 0.6)]), &config, 8);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "b");
        assert!(out[0].image_score.is_none());
    }

    #[test]
    fn test_floor_is_strict() {
        let config = FusionConfig {
            image_weight: 1.0,
            landmark_weight: 0.0,
            dual_boost: 1.0,
            min_score: 0.5,
        };
        assert!(fuse(&hits(&[("a", 0.5)]), &[], &config, 8).is_empty());
    }

    #[test]
    fn test_best_score_per_label_wins() {
        let config = FusionConfig::default();
        let out = fuse(
            &[],
            &hits(&[("a", 0.9), ("a", 0.4)]),
            &config,
            8,
        );
        assert_eq!(out[0].landmark_score, Some(0.9));
    }

    #[test]
    fn test_score_clamped_and_order_kept() {
        let config = FusionConfig::default();
        let out = fuse(
            &hits(&[("x", 1.0), ("y", 0.95)]),
            &hits(&[("x", 1.0), ("y", 0.95)]),
            &config,
            8,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].label, "x");
        assert_eq!(out[0].score, 1.0);
        assert_eq!(out[1].score, 1.0);
    }

    #[test]
    fn test_truncates_to_top_k_with_label_tiebreak() {
        let config = FusionConfig::default().with_weights(0.0, 1.0);
        let out = fuse(
            &[],
            &hits(&[("c", 0.7), ("b", 0.7), ("a", 0.9)]),
            &config,
            2,
        );
        let labels: Vec<_> = out.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "b"]);
    }

    #[test]
    fn test_label_score_serializes_as_confidence() {
        let json = serde_json::to_value(LabelScore::from(ScoredLabel::new("a", 0.5))).unwrap();
        assert_eq!(json["confidence"], 0.5);
    }
}
