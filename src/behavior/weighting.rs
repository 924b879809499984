use super::TrackStats;
use tracing::warn;

/// Affinity score: `(plays + prior) / (plays + skip_weight * skips + 2 * prior)`.
///
/// A track with no history scores exactly 0.5. Every play moves the score
/// up and every skip moves it down, and it always stays inside (0, 1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffinityWeights {
    skip_weight: f64,
    prior: f64,
}

impl AffinityWeights {
    pub const DEFAULT_SKIP_WEIGHT: f64 = 2.0;
    pub const DEFAULT_PRIOR: f64 = 1.0;

    /// Non-positive or non-finite values fall back to the defaults.
    pub fn new(skip_weight: f64, prior: f64) -> Self {
        let skip_weight = if skip_weight.is_finite() && skip_weight > 0.0 {
            skip_weight
        } else {
            warn!("Ignoring skip weight {}, using {}", skip_weight, Self::DEFAULT_SKIP_WEIGHT);
            Self::DEFAULT_SKIP_WEIGHT
        };
        let prior = if prior.is_finite() && prior > 0.0 {
            prior
        } else {
            warn!("Ignoring prior {}, using {}", prior, Self::DEFAULT_PRIOR);
            Self::DEFAULT_PRIOR
        };

        Self { skip_weight, prior }
    }

    pub fn neutral(&self) -> f64 {
        0.5
    }

    pub fn score(&self, stats: TrackStats) -> f64 {
        let plays = stats.play_count as f64;
        let skips = stats.skip_count as f64;
        (plays + self.prior) / (plays + self.skip_weight * skips + 2.0 * self.prior)
    }
}

impl Default for AffinityWeights {
    fn default() -> Self {
        Self {
            skip_weight: Self::DEFAULT_SKIP_WEIGHT,
            prior: Self::DEFAULT_PRIOR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(play_count: u64, skip_count: u64) -> TrackStats {
        TrackStats {
            play_count,
            skip_count,
        }
    }

    #[test]
    fn test_no_history_is_neutral() {
        let weights = AffinityWeights::default();
        assert_eq!(weights.score(stats(0, 0)), weights.neutral());
    }

    #[test]
    fn test_plays_raise_and_skips_lower() {
        let weights = AffinityWeights::default();
        for plays in 0..20 {
            for skips in 0..20 {
                let base = weights.score(stats(plays, skips));
                assert!(weights.score(stats(plays + 1, skips)) > base);
                assert!(weights.score(stats(plays, skips + 1)) < base);
            }
        }
    }

    #[test]
    fn test_one_skip_outweighs_one_play() {
        let weights = AffinityWeights::default();
        assert!(weights.score(stats(1, 1)) < weights.neutral());
    }

    #[test]
    fn test_bad_parameters_fall_back() {
        assert_eq!(AffinityWeights::new(-1.0, f64::NAN), AffinityWeights::default());
    }
}
