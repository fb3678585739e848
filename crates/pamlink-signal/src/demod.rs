//! Adaptive blind PAM4 demodulation.
//!
//! The amplitude range seen at a hop is not known in advance, so the
//! demodulator learns it: the observed minimum and maximum are tracked with
//! exponential smoothing and the three decision thresholds sit at the quarter
//! points between them. The first `warmup` samples only calibrate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::Symbol;
use crate::error::{Result, SignalError};

/// Default smoothing factor.
pub const DEFAULT_ALPHA: f64 = 0.02;

/// Default number of calibration-only samples.
pub const DEFAULT_WARMUP: usize = 50;

/// Demodulator tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemodulatorConfig {
    /// Smoothing factor in `[0, 1]`; larger values follow new extremes faster.
    pub alpha: f64,
    /// Samples used for calibration before the first classification.
    pub warmup: usize,
}

impl Default for DemodulatorConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            warmup: DEFAULT_WARMUP,
        }
    }
}

/// Lifecycle of a link's demodulator. There is no transition back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemodState {
    WarmingUp,
    Classifying,
}

/// Per-link range estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    pub min_est: f64,
    pub max_est: f64,
    pub thresholds: [f64; 3],
    pub warmup_remaining: usize,
    pub alpha: f64,
}

impl ChannelState {
    fn new(config: DemodulatorConfig) -> Self {
        let alpha = if config.alpha.is_nan() {
            DEFAULT_ALPHA
        } else {
            config.alpha.clamp(0.0, 1.0)
        };
        let mut state = Self {
            min_est: f64::from(u8::MAX),
            max_est: 0.0,
            thresholds: [0.0; 3],
            warmup_remaining: config.warmup,
            alpha,
        };
        state.recompute_thresholds();
        state
    }

    fn smooth(&self, old: f64, new: f64) -> f64 {
        (1.0 - self.alpha) * old + self.alpha * new
    }

    fn track(&mut self, x: f64) {
        if x < self.min_est {
            self.min_est = self.smooth(self.min_est, x);
        }
        if x > self.max_est {
            self.max_est = self.smooth(self.max_est, x);
        }
    }

    // The span is floored at 1 so thresholds stay ordered before the bounds cross.
    fn recompute_thresholds(&mut self) {
        let step = (self.max_est - self.min_est).max(1.0) / 4.0;
        self.thresholds = [
            self.min_est + step,
            self.min_est + 2.0 * step,
            self.min_est + 3.0 * step,
        ];
    }

    fn classify(&self, x: f64) -> Symbol {
        self.thresholds
            .iter()
            .position(|threshold| x < *threshold)
            .map_or(3, |level| level as Symbol)
    }
}

/// Recovers PAM4 levels from raw amplitude samples on one link.
///
/// Owned by exactly one connection handler; never shared.
#[derive(Debug, Clone)]
pub struct AdaptiveDemodulator {
    channel: ChannelState,
}

impl AdaptiveDemodulator {
    pub fn new(config: DemodulatorConfig) -> Self {
        Self {
            channel: ChannelState::new(config),
        }
    }

    /// Feed one raw sample.
    ///
    /// Returns `None` while warming up, otherwise the level in `0..=3`.
    pub fn observe(&mut self, sample: u8) -> Option<Symbol> {
        let x = f64::from(sample);
        self.channel.track(x);
        self.channel.recompute_thresholds();

        if self.channel.warmup_remaining > 0 {
            self.channel.warmup_remaining -= 1;
            return None;
        }
        Some(self.channel.classify(x))
    }

    /// Feed a chunk and collect the classified levels.
    pub fn observe_chunk(&mut self, samples: &[u8]) -> Vec<Symbol> {
        samples.iter().filter_map(|s| self.observe(*s)).collect()
    }

    pub fn state(&self) -> DemodState {
        if self.channel.warmup_remaining > 0 {
            DemodState::WarmingUp
        } else {
            DemodState::Classifying
        }
    }

    pub fn channel(&self) -> &ChannelState {
        &self.channel
    }
}

impl Default for AdaptiveDemodulator {
    fn default() -> Self {
        Self::new(DemodulatorConfig::default())
    }
}

/// How a recovered level is turned back into two bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelMapping {
    /// Level index is the bit pair (0→00, 1→01, 2→10, 3→11).
    Natural,
    /// Adjacent levels differ in one bit (0→00, 1→01, 2→11, 3→10).
    #[default]
    Gray,
}

impl LevelMapping {
    /// Two-bit value for a PAM4 level.
    pub fn bits(self, level: Symbol) -> u8 {
        let level = level & 0b11;
        match self {
            LevelMapping::Natural => level,
            LevelMapping::Gray => [0b00, 0b01, 0b11, 0b10][usize::from(level)],
        }
    }
}

impl FromStr for LevelMapping {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "natural" => Ok(LevelMapping::Natural),
            "gray" => Ok(LevelMapping::Gray),
            other => Err(SignalError::UnknownLevelMapping(other.to_string())),
        }
    }
}

impl fmt::Display for LevelMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelMapping::Natural => f.write_str("natural"),
            LevelMapping::Gray => f.write_str("gray"),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn config(alpha: f64, warmup: usize) -> DemodulatorConfig {
        DemodulatorConfig { alpha, warmup }
    }

    #[test]
    fn starts_warming_up_and_switches_once() {
        let mut demod = AdaptiveDemodulator::new(config(0.5, 2));
        assert_eq!(demod.state(), DemodState::WarmingUp);
        assert_eq!(demod.observe(10), None);
        assert_eq!(demod.observe(200), None);
        assert_eq!(demod.state(), DemodState::Classifying);
        assert!(demod.observe(100).is_some());
        assert_eq!(demod.state(), DemodState::Classifying);
    }

    #[test]
    fn zero_warmup_classifies_immediately() {
        let mut demod = AdaptiveDemodulator::new(config(0.5, 0));
        assert!(demod.observe(42).is_some());
    }

    #[test]
    fn learns_range_and_separates_levels() {
        let mut demod = AdaptiveDemodulator::new(config(0.3, 40));
        let levels = [20u8, 90, 160, 230];
        for _ in 0..10 {
            for sample in levels {
                assert_eq!(demod.observe(sample), None);
            }
        }
        let (min, max) = (demod.channel().min_est, demod.channel().max_est);
        assert!(min < 40.0 && max > 210.0, "bounds {min}..{max} did not converge");

        let decided: Vec<Symbol> = levels.iter().filter_map(|s| demod.observe(*s)).collect();
        assert_eq!(decided, vec![0, 1, 2, 3]);
    }

    #[test]
    fn bounds_only_move_toward_new_extremes() {
        let mut demod = AdaptiveDemodulator::new(config(0.5, 0));
        demod.observe(100);
        assert_eq!(demod.channel().min_est, 177.5);
        assert_eq!(demod.channel().max_est, 50.0);

        for _ in 0..20 {
            demod.observe(0);
            demod.observe(255);
        }
        let (min, max) = (demod.channel().min_est, demod.channel().max_est);
        assert!(min < 1.0 && max > 254.0);
        demod.observe(128);
        assert_eq!(demod.channel().min_est, min);
        assert_eq!(demod.channel().max_est, max);
    }

    #[test]
    fn thresholds_are_quarter_points() {
        let mut demod = AdaptiveDemodulator::new(config(1.0, 0));
        demod.observe(0);
        demod.observe(200);
        assert_eq!(demod.channel().thresholds, [50.0, 100.0, 150.0]);
        assert_eq!(demod.observe(49), Some(0));
        assert_eq!(demod.observe(50), Some(1));
        assert_eq!(demod.observe(149), Some(2));
        assert_eq!(demod.observe(150), Some(3));
    }

    #[test]
    fn gray_mapping_differs_by_one_bit_between_neighbours() {
        for level in 0..3u8 {
            let a = LevelMapping::Gray.bits(level);
            let b = LevelMapping::Gray.bits(level + 1);
            assert_eq!((a ^ b).count_ones(), 1);
        }
        assert_eq!(LevelMapping::Natural.bits(2), 0b10);
        assert_eq!(LevelMapping::Gray.bits(2), 0b11);
    }

    proptest! {
        #[test]
        fn warmup_then_levels(samples in proptest::collection::vec(any::<u8>(), 0..300), warmup in 0usize..100, alpha in 0.0f64..=1.0) {
            let mut demod = AdaptiveDemodulator::new(config(alpha, warmup));
            for (i, sample) in samples.iter().enumerate() {
                let out = demod.observe(*sample);
                if i < warmup {
                    prop_assert_eq!(out, None);
                } else {
                    prop_assert!(matches!(out, Some(0..=3)));
                }
            }
        }
    }
}
