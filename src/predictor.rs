//! Perceptron-based reuse predictor.
//!
//! Maps a 64-bit address to a signed score by summing the weights
//! selected by the address's set bits (bits 0..32). The sign of the
//! score predicts reuse/no-reuse; the magnitude is the confidence.
//! See the design notes for the rationale behind the per-bit feature
//! form over the older hashed-table layout.

const NUM_WEIGHTS: usize = 32;
const WEIGHT_MIN: i32 = -32;
const WEIGHT_MAX: i32 = 31;

/// Tunable knobs, mirrors the constructor defaults.
#[derive(Debug, Clone, Copy)]
pub struct PredictorConfig {
    pub threshold: i32,
    pub theta: i32,
    pub lr: i32,
    pub train_sample_mod: u64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            threshold: 0,
            theta: 32,
            lr: 2,
            train_sample_mod: 5,
        }
    }
}

/// Outcome of scoring an address, bundling the interpretation the
/// caller would otherwise have to re-derive from threshold/theta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prediction {
    pub score: i32,
    pub predict_no_reuse: bool,
    pub confident: bool,
}

/// One perceptron predictor per cache. Volatile, warm-starts at zero.
#[derive(Debug, Clone)]
pub struct Predictor {
    weights: [i32; NUM_WEIGHTS],
    config: PredictorConfig,
    train_tick: u64,
    last_addr: Option<u64>,
    last_score: i32,
    total_predictions: u64,
    correct_predictions: u64,
}

impl Predictor {
    pub fn new(threshold: i32, theta: i32, lr: i32) -> Self {
        Self::with_config(PredictorConfig {
            threshold,
            theta,
            lr,
            ..PredictorConfig::default()
        })
    }

    pub fn with_config(config: PredictorConfig) -> Self {
        Self {
            weights: [0; NUM_WEIGHTS],
            config,
            train_tick: 0,
            last_addr: None,
            last_score: 0,
            total_predictions: 0,
            correct_predictions: 0,
        }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn weights(&self) -> &[i32; NUM_WEIGHTS] {
        &self.weights
    }

    /// Directly sets a weight, clamped to the legal range. Exposed for
    /// tests and for warm-seeding experiments; not used on the hot path.
    pub fn set_weight(&mut self, index: usize, value: i32) {
        self.weights[index] = value.clamp(WEIGHT_MIN, WEIGHT_MAX);
    }

    /// Sums `weights[i]` for every set bit of `addr`. Caches the
    /// address/score pair for a subsequent `train` call.
    pub fn score(&mut self, addr: u64) -> i32 {
        let mut sum: i32 = 0;
        for i in 0..NUM_WEIGHTS {
            if addr & (1u64 << i) != 0 {
                sum += self.weights[i];
            }
        }
        self.last_addr = Some(addr);
        self.last_score = sum;
        self.total_predictions += 1;
        sum
    }

    /// Scores `addr` and interprets the result against `threshold`/`theta`.
    pub fn evaluate(&mut self, addr: u64) -> Prediction {
        let score = self.score(addr);
        Prediction {
            score,
            predict_no_reuse: score >= self.config.threshold,
            confident: score.unsigned_abs() as i32 >= self.config.theta,
        }
    }

    /// Trains on the outcome of a previously scored address. A no-op
    /// unless the sampling gate admits this call and `addr` matches
    /// the address from the last `score`/`evaluate` call.
    pub fn train(&mut self, addr: u64, reused: bool) {
        self.train_tick = self.train_tick.wrapping_add(1);
        if self.train_tick % self.config.train_sample_mod != 0 {
            return;
        }
        if self.last_addr != Some(addr) {
            return;
        }

        let predicted_no_reuse = self.last_score >= self.config.threshold;
        let wrong = predicted_no_reuse == reused;
        if !wrong {
            self.correct_predictions += 1;
        }
        if !(wrong || self.last_score.unsigned_abs() as i32 < self.config.theta) {
            return;
        }

        let lr = self.config.lr;
        for i in 0..NUM_WEIGHTS {
            if addr & (1u64 << i) != 0 {
                self.weights[i] = if reused {
                    (self.weights[i] - lr).max(WEIGHT_MIN)
                } else {
                    (self.weights[i] + lr).min(WEIGHT_MAX)
                };
            }
        }
    }

    /// `(total_predictions, correct_predictions, accuracy)`.
    pub fn stats(&self) -> (u64, u64, f64) {
        let accuracy = if self.total_predictions == 0 {
            0.0
        } else {
            self.correct_predictions as f64 / self.total_predictions as f64
        };
        (self.total_predictions, self.correct_predictions, accuracy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_predictor_scores_zero() {
        let mut p = Predictor::new(0, 32, 2);
        assert_eq!(p.score(0xDEAD_BEEF), 0);
        assert_eq!(p.score(0), 0);
    }

    #[test]
    fn score_is_idempotent_for_same_address() {
        let mut p = Predictor::new(0, 32, 2);
        p.set_weight(3, 10);
        let a = p.score(0b1000);
        let b = p.score(0b1000);
        assert_eq!(a, b);
    }

    #[test]
    fn single_bit_isolation() {
        let mut p = Predictor::new(0, 32, 2);
        p.set_weight(5, 31);
        for addr in [0u64, 1, 2, 4, 8, 16, 32, 64] {
            let expected = if addr & (1 << 5) != 0 { 31 } else { 0 };
            assert_eq!(p.score(addr), expected, "addr {addr:#x}");
        }
    }

    #[test]
    fn score_all_ones_sums_every_weight() {
        let mut p = Predictor::new(0, 32, 2);
        for i in 0..NUM_WEIGHTS {
            p.set_weight(i, (i as i32) % 10 - 3);
        }
        let expected: i32 = p.weights.iter().sum();
        assert_eq!(p.score(0xFFFF_FFFF), expected);
    }

    #[test]
    fn weights_never_overflow_saturation() {
        let mut p = Predictor::with_config(PredictorConfig {
            threshold: 0,
            theta: 32,
            lr: 2,
            train_sample_mod: 1,
        });
        let addr = 0b1u64;
        for _ in 0..100 {
            p.score(addr);
            p.train(addr, false);
        }
        assert_eq!(p.weights[0], WEIGHT_MAX);

        let mut p = Predictor::with_config(PredictorConfig {
            threshold: 0,
            theta: 32,
            lr: 2,
            train_sample_mod: 1,
        });
        for _ in 0..100 {
            p.score(addr);
            p.train(addr, true);
        }
        assert_eq!(p.weights[0], WEIGHT_MIN);
    }

    #[test]
    fn training_requires_matching_last_address() {
        let mut p = Predictor::with_config(PredictorConfig {
            threshold: 0,
            theta: 32,
            lr: 2,
            train_sample_mod: 1,
        });
        p.score(0xAAAA);
        p.train(0xBBBB, false);
        assert_eq!(p.weights, [0; NUM_WEIGHTS]);
    }

    #[test]
    fn sampling_gate_suppresses_training_until_nth_call() {
        let mut p = Predictor::with_config(PredictorConfig {
            threshold: 0,
            theta: 32,
            lr: 2,
            train_sample_mod: 5,
        });
        let addr = 0b11u64;
        p.score(addr);
        for _ in 0..4 {
            p.train(addr, true);
        }
        assert_eq!(p.weights, [0; NUM_WEIGHTS]);
        p.train(addr, true);
        assert_eq!(p.weights[0], -2);
        assert_eq!(p.weights[1], -2);
        assert_eq!(p.train_tick, 5);
    }

    #[test]
    fn hit_training_pushes_score_down() {
        let mut p = Predictor::with_config(PredictorConfig {
            threshold: 0,
            theta: 32,
            lr: 2,
            train_sample_mod: 1,
        });
        let addr = 0xDEAD_BEEFu64;
        let before = p.score(addr);
        p.train(addr, true);
        let after = p.score(addr);
        assert!(after < before);
    }

    #[test]
    fn eviction_training_pushes_score_up() {
        let mut p = Predictor::with_config(PredictorConfig {
            threshold: 0,
            theta: 32,
            lr: 2,
            train_sample_mod: 1,
        });
        let addr = 0xDEAD_BEEFu64;
        let before = p.score(addr);
        p.train(addr, false);
        let after = p.score(addr);
        assert!(after > before);
    }

    #[test]
    fn correct_predictions_never_exceed_total() {
        let mut p = Predictor::with_config(PredictorConfig {
            threshold: 0,
            theta: 1,
            lr: 2,
            train_sample_mod: 1,
        });
        for i in 0..50u64 {
            p.score(i);
            p.train(i, i % 3 == 0);
            let (total, correct, _) = p.stats();
            assert!(correct <= total);
        }
    }
}
