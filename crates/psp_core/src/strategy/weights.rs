//! Learned strategy weights for invocation scoring.
//!
//! # Responsibility
//! - Combine per-fragment features into one selection score.
//! - Move feature weights toward observed satisfaction (online learning).
//!
//! # Invariants
//! - Feature weights are finite, `>= MIN_FEATURE_WEIGHT`, and sum to 1.0.
//! - `predict` always returns a value in `[0, 1]`.

use serde::{Deserialize, Serialize};

/// Lower bound for every feature weight so no feature is switched off for good.
pub const MIN_FEATURE_WEIGHT: f64 = 0.02;

const NORMALIZATION_TOLERANCE: f64 = 1e-6;

/// Per-fragment features in `[0, 1]` observed at invocation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Share of query keywords covered by the fragment keywords.
    pub relevance: f64,
    /// Learned fragment weight.
    pub weight: f64,
    /// Freshness of the newest backing record.
    pub recency: f64,
    /// 1.0 when the fragment comes from the requesting app.
    pub source_match: f64,
}

impl FeatureVector {
    /// Returns a copy with every feature clamped into `[0, 1]` (NaN -> 0).
    pub fn clamped(self) -> Self {
        Self {
            relevance: unit(self.relevance),
            weight: unit(self.weight),
            recency: unit(self.recency),
            source_match: unit(self.source_match),
        }
    }

    /// Element-wise mean, `None` for an empty slice.
    pub fn mean(vectors: &[FeatureVector]) -> Option<Self> {
        if vectors.is_empty() {
            return None;
        }
        let n = vectors.len() as f64;
        let mut sum = Self::default();
        for vector in vectors {
            sum.relevance += vector.relevance;
            sum.weight += vector.weight;
            sum.recency += vector.recency;
            sum.source_match += vector.source_match;
        }
        Some(Self {
            relevance: sum.relevance / n,
            weight: sum.weight / n,
            recency: sum.recency / n,
            source_match: sum.source_match / n,
        })
    }
}

/// Linear scoring weights over [`FeatureVector`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyWeights {
    pub relevance: f64,
    pub weight: f64,
    pub recency: f64,
    pub source_match: f64,
    /// Number of feedback samples folded in so far.
    pub sample_count: u32,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            relevance: 0.45,
            weight: 0.30,
            recency: 0.15,
            source_match: 0.10,
            sample_count: 0,
        }
    }
}

impl StrategyWeights {
    /// Weighted score of one feature vector, clamped to `[0, 1]`.
    pub fn predict(&self, features: &FeatureVector) -> f64 {
        let features = features.clamped();
        unit(
            self.relevance * features.relevance
                + self.weight * features.weight
                + self.recency * features.recency
                + self.source_match * features.source_match,
        )
    }

    /// Applies one gradient step toward `actual` and returns the prediction
    /// error observed before the update.
    ///
    /// `w_f <- w_f + learning_rate * (actual - predicted) * x_f`, then the set
    /// is renormalized with [`StrategyWeights::normalize`].
    pub fn apply_outcome(&mut self, features: &FeatureVector, actual: f64, learning_rate: f64) -> f64 {
        let features = features.clamped();
        let predicted = self.predict(&features);
        let error = unit(actual) - predicted;
        let step = learning_rate * error;

        self.relevance += step * features.relevance;
        self.weight += step * features.weight;
        self.recency += step * features.recency;
        self.source_match += step * features.source_match;
        self.normalize();
        self.sample_count = self.sample_count.saturating_add(1);

        error
    }

    /// Rescales the set to sum to 1.0 with no weight below
    /// [`MIN_FEATURE_WEIGHT`].
    ///
    /// Weights that would land under the floor are pinned to it and the
    /// remaining mass is shared by the others in proportion.
    pub fn normalize(&mut self) {
        let values = [self.relevance, self.weight, self.recency, self.source_match]
            .map(|value| if value.is_finite() { value.max(0.0) } else { 0.0 });
        let mut pinned = [false; 4];

        let scaled = loop {
            let free_count = pinned.iter().filter(|pinned| !**pinned).count();
            let free_mass = 1.0 - MIN_FEATURE_WEIGHT * (values.len() - free_count) as f64;
            let free_sum: f64 = values
                .iter()
                .zip(&pinned)
                .filter(|(_, pinned)| !**pinned)
                .map(|(value, _)| *value)
                .sum();
            let scaled = values.map(|value| {
                if free_sum > 0.0 {
                    value * free_mass / free_sum
                } else {
                    free_mass / free_count.max(1) as f64
                }
            });

            let mut newly_pinned = false;
            for (value, pinned) in scaled.iter().zip(pinned.iter_mut()) {
                if !*pinned && *value < MIN_FEATURE_WEIGHT {
                    *pinned = true;
                    newly_pinned = true;
                }
            }
            if !newly_pinned {
                break scaled;
            }
        };

        for ((slot, value), pinned) in self.values_mut().into_iter().zip(scaled).zip(pinned) {
            *slot = if pinned { MIN_FEATURE_WEIGHT } else { value };
        }
    }

    /// Whether the stored set satisfies the weight invariants.
    pub fn is_normalized(&self) -> bool {
        let values = [self.relevance, self.weight, self.recency, self.source_match];
        values
            .iter()
            .all(|value| {
                value.is_finite() && *value >= MIN_FEATURE_WEIGHT - NORMALIZATION_TOLERANCE
            })
            && (self.sum() - 1.0).abs() <= NORMALIZATION_TOLERANCE
    }

    fn sum(&self) -> f64 {
        self.relevance + self.weight + self.recency + self.source_match
    }

    fn values_mut(&mut self) -> [&mut f64; 4] {
        [
            &mut self.relevance,
            &mut self.weight,
            &mut self.recency,
            &mut self.source_match,
        ]
    }
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::{FeatureVector, StrategyWeights, MIN_FEATURE_WEIGHT};

    fn relevant_only() -> FeatureVector {
        FeatureVector {
            relevance: 1.0,
            weight: 0.0,
            recency: 0.0,
            source_match: 0.0,
        }
    }

    #[test]
    fn default_weights_are_normalized() {
        assert!(StrategyWeights::default().is_normalized());
    }

    #[test]
    fn positive_outcome_raises_contributing_feature() {
        let mut weights = StrategyWeights::default();
        let before = weights.relevance;
        let error = weights.apply_outcome(&relevant_only(), 1.0, 0.2);
        assert!(error > 0.0);
        assert!(weights.relevance > before);
        assert!(weights.is_normalized());
        assert_eq!(weights.sample_count, 1);
    }

    #[test]
    fn negative_outcome_lowers_contributing_feature() {
        let mut weights = StrategyWeights::default();
        let before = weights.relevance;
        weights.apply_outcome(&relevant_only(), 0.0, 0.2);
        assert!(weights.relevance < before);
        assert!(weights.is_normalized());
    }

    #[test]
    fn repeated_negative_outcomes_keep_floor() {
        let mut weights = StrategyWeights::default();
        for _ in 0..500 {
            weights.apply_outcome(&relevant_only(), 0.0, 1.0);
        }
        assert!(weights.is_normalized());
        assert!(weights.relevance >= MIN_FEATURE_WEIGHT - 1e-12);
    }

    #[test]
    fn normalize_pins_small_weights_at_floor_after_rescaling() {
        let mut weights = StrategyWeights {
            relevance: 0.0,
            weight: 10.0,
            recency: 30.0,
            source_match: f64::NAN,
            sample_count: 0,
        };
        weights.normalize();

        assert_eq!(weights.relevance, MIN_FEATURE_WEIGHT);
        assert_eq!(weights.source_match, MIN_FEATURE_WEIGHT);
        let free = 1.0 - 2.0 * MIN_FEATURE_WEIGHT;
        assert!((weights.weight - free * 0.25).abs() < 1e-12);
        assert!((weights.recency - free * 0.75).abs() < 1e-12);
        assert!(weights.is_normalized());
    }

    #[test]
    fn predict_clamps_out_of_range_features() {
        let weights = StrategyWeights::default();
        let features = FeatureVector {
            relevance: 5.0,
            weight: f64::NAN,
            recency: -1.0,
            source_match: 1.0,
        };
        let score = weights.predict(&features);
        assert!((0.0..=1.0).contains(&score));
        assert!((score - (0.45 + 0.10)).abs() < 1e-9);
    }

    #[test]
    fn mean_averages_features() {
        let mean = FeatureVector::mean(&[
            relevant_only(),
            FeatureVector {
                relevance: 0.0,
                weight: 1.0,
                recency: 0.0,
                source_match: 0.0,
            },
        ])
        .expect("non-empty mean");
        assert_eq!(mean.relevance, 0.5);
        assert_eq!(mean.weight, 0.5);
        assert!(FeatureVector::mean(&[]).is_none());
    }
}
