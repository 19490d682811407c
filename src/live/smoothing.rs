//! Temporal smoothing of live predictions.
//!
//! Every search nudges the tracked labels: all scores decay a little, fresh
//! hits are blended in with an exponential moving average weighted by rank,
//! and labels that fade below a threshold are dropped.

use serde::Serialize;
use std::collections::HashMap;

use crate::config::LiveConfig;

/// Smoother parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingConfig {
    pub alpha: f32,
    pub decay: f32,
    pub new_label_factor: f32,
    pub rank_decay: f32,
    pub prune_threshold_crowded: f32,
    pub prune_threshold_sparse: f32,
    pub crowded_labels: usize,
    pub display_threshold: f32,
    pub display_top: usize,
}

impl SmoothingConfig {
    pub fn from_live(config: &LiveConfig) -> Self {
        Self {
            alpha: config.alpha,
            decay: config.decay,
            new_label_factor: config.new_label_factor,
            rank_decay: config.rank_decay,
            prune_threshold_crowded: config.prune_threshold_crowded,
            prune_threshold_sparse: config.prune_threshold_sparse,
            crowded_labels: config.crowded_labels,
            display_threshold: config.display_threshold,
            display_top: config.display_top,
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self::from_live(&LiveConfig::default())
    }
}

/// A smoothed label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub score: f32,
}

/// EMA over per-label scores.
#[derive(Debug, Clone, Default)]
pub struct EmaSmoother {
    config: SmoothingConfig,
    scores: HashMap<String, f32>,
}

impl EmaSmoother {
    pub fn new(config: SmoothingConfig) -> Self {
        Self {
            config,
            scores: HashMap::new(),
        }
    }

    /// Blend one search result in. `results` must be in rank order.
    /// An empty result leaves the state untouched.
    pub fn update(&mut self, results: &[(String, f32)]) {
        if results.is_empty() {
            return;
        }
        let c = &self.config;

        for score in self.scores.values_mut() {
            *score *= c.decay;
        }

        for (rank, (label, score)) in results.iter().enumerate() {
            let weighted = score * (-(rank as f32) * c.rank_decay).exp();
            self.scores
                .entry(label.clone())
                .and_modify(|old| *old = c.alpha * weighted + (1.0 - c.alpha) * *old)
                .or_insert(weighted * c.new_label_factor);
        }

        let threshold = if self.scores.len() > c.crowded_labels {
            c.prune_threshold_crowded
        } else {
            c.prune_threshold_sparse
        };
        self.scores.retain(|_, v| *v > threshold);
    }

    /// Current top labels above the display threshold.
    pub fn predictions(&self) -> Vec<Prediction> {
        let mut ranked: Vec<Prediction> = self
            .scores
            .iter()
            .filter(|(_, s)| **s > self.config.display_threshold)
            .map(|(label, score)| Prediction {
                label: label.clone(),
                score: *score,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.label.cmp(&b.label))
        });
        ranked.truncate(self.config.display_top);
        ranked
    }

    pub fn score(&self, label: &str) -> Option<f32> {
        self.scores.get(label).copied()
    }

    pub fn tracked(&self) -> usize {
        self.scores.len()
    }

    pub fn reset(&mut self) {
        self.scores.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(items: &[(&str, f32)]) -> Vec<(String, f32)> {
        items.iter().map(|(l, s)| (l.to_string(), *s)).collect()
    }

    #[test]
    fn test_new_label_starts_discounted() {
        let mut smoother = EmaSmoother::default();
        smoother.update(&r(&[("hello", 0.9)]));
        assert!((smoother.score("hello").unwrap() - 0.72).abs() < 1e-6); // 0.9 * 0.8
    }

    #[test]
    fn test_existing_label_blends() {
        let mut smoother = EmaSmoother::default();
        smoother.update(&r(&[("hello", 0.9)]));
        smoother.update(&r(&[("hello", 0.9)]));
        // decay 0.72 -> 0.6984, then 0.25 * 0.9 + 0.75 * 0.6984
        let expected = 0.25 * 0.9 + 0.75 * (0.72 * 0.97);
        assert!((smoother.score("hello").unwrap() - expected).abs() < 1e-5);
    }

    #[test]
    fn test_rank_position_weighting() {
        let mut smoother = EmaSmoother::default();
        smoother.update(&r(&[("a", 0.8), ("b", 0.8)]));
        let a = smoother.score("a").unwrap();
        let b = smoother.score("b").unwrap();
        assert!((b / a - (-0.2f32).exp()).abs() < 1e-5);
    }

    #[test]
    fn test_empty_update_is_noop() {
        let mut smoother = EmaSmoother::default();
        smoother.update(&r(&[("a", 0.8)]));
        let before = smoother.score("a");
        smoother.update(&[]);
        assert_eq!(smoother.score("a"), before);
    }

    #[test]
    fn test_stale_labels_are_pruned() {
        let mut smoother = EmaSmoother::default();
        smoother.update(&r(&[("old", 0.4)]));
        for _ in 0..200 {
            smoother.update(&r(&[("new", 0.9)]));
        }
        assert!(smoother.score("old").is_none());
        assert_eq!(smoother.tracked(), 1);
    }

    #[test]
    fn test_crowded_threshold_applies() {
        let config = SmoothingConfig {
            new_label_factor: 1.0,
            rank_decay: 0.0,
            ..SmoothingConfig::default()
        };
        let mut smoother = EmaSmoother::new(config);
        // Four labels at 0.07: above the sparse floor, below the crowded one.
        smoother.update(&r(&[("a", 0.07), ("b", 0.07), ("c", 0.07), ("d", 0.07)]));
        assert_eq!(smoother.tracked(), 0);

        let mut smoother = EmaSmoother::new(config);
        smoother.update(&r(&[("a", 0.07), ("b", 0.07)]));
        assert_eq!(smoother.tracked(), 2);
    }

    #[test]
    fn test_predictions_top_three_above_threshold() {
        let config = SmoothingConfig {
            new_label_factor: 1.0,
            rank_decay: 0.0,
            ..SmoothingConfig::default()
        };
        let mut smoother = EmaSmoother::new(config);
        smoother.update(&r(&[
            ("a", 0.9),
            ("b", 0.8),
            ("c", 0.7),
            ("d", 0.6),
            ("e", 0.2),
        ]));
        let labels: Vec<_> = smoother.predictions().into_iter().map(|p| p.label).collect();
        assert_eq!(labels, vec!["a", "b", "c"]);

        smoother.reset();
        assert!(smoother.predictions().is_empty());
    }
}
