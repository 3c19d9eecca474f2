//! Decoding strategy settings

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Thresholds run when none are configured: greedy followed by a sweep of
/// nucleus thresholds.
pub const DEFAULT_TOP_P: [f64; 7] = [0.0, 0.3, 0.5, 0.7, 0.9, 0.95, 1.0];

/// One decoding strategy.
///
/// Configured as a bare threshold: `0.0` selects greedy decoding, any value
/// in `(0, 1]` selects nucleus sampling at that threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum DecodingStrategy {
    /// Always take the most probable token
    Greedy,
    /// Sample from the smallest token set whose cumulative probability reaches `top_p`
    Nucleus { top_p: f64 },
}

impl DecodingStrategy {
    /// Build a strategy from a configured threshold
    pub fn from_threshold(p: f64) -> Result<Self, ConfigError> {
        if p == 0.0 {
            Ok(Self::Greedy)
        } else if p > 0.0 && p <= 1.0 {
            Ok(Self::Nucleus { top_p: p })
        } else {
            Err(ConfigError::InvalidThreshold(p))
        }
    }

    /// The configured threshold (`0.0` for greedy)
    pub fn threshold(&self) -> f64 {
        match self {
            Self::Greedy => 0.0,
            Self::Nucleus { top_p } => *top_p,
        }
    }

    /// Check if this strategy is deterministic
    pub fn is_greedy(&self) -> bool {
        matches!(self, Self::Greedy)
    }

    /// Threshold rendered for record identifiers.
    ///
    /// Always carries a fractional part (`0.0`, `1.0`, `0.95`) so ids look
    /// the same whichever way the threshold was written. Thresholds below
    /// `1e-4` use exponent form with at least two exponent digits (`1e-05`).
    pub fn label(&self) -> String {
        let shortest = format!("{:?}", self.threshold());
        match shortest.split_once('e') {
            Some((mantissa, exponent)) => {
                let (sign, digits) = match exponent.strip_prefix('-') {
                    Some(digits) => ('-', digits),
                    None => ('+', exponent),
                };
                format!("{}e{}{:0>2}", mantissa, sign, digits)
            }
            None => shortest,
        }
    }
}

impl TryFrom<f64> for DecodingStrategy {
    type Error = ConfigError;

    fn try_from(p: f64) -> Result<Self, Self::Error> {
        Self::from_threshold(p)
    }
}

impl From<DecodingStrategy> for f64 {
    fn from(strategy: DecodingStrategy) -> Self {
        strategy.threshold()
    }
}

impl fmt::Display for DecodingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Greedy => write!(f, "greedy"),
            Self::Nucleus { top_p } => write!(f, "nucleus(p={})", top_p),
        }
    }
}

/// Configuration for the generation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum number of tokens to generate per prompt (not counting the prompt)
    #[serde(default = "default_length")]
    pub length: usize,

    /// Strategies to run for every batch, in order
    #[serde(default = "default_strategies")]
    pub top_p: Vec<DecodingStrategy>,

    /// Seed for the sampling strategies
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_length() -> usize {
    200
}

fn default_strategies() -> Vec<DecodingStrategy> {
    DEFAULT_TOP_P
        .iter()
        .map(|&p| DecodingStrategy::from_threshold(p))
        .collect::<Result<_, _>>()
        .unwrap_or_default()
}

fn default_seed() -> u64 {
    42
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            length: default_length(),
            top_p: default_strategies(),
            seed: default_seed(),
        }
    }
}

impl GenerationConfig {
    /// Replace the strategy list from raw thresholds
    pub fn set_thresholds(&mut self, thresholds: &[f64]) -> Result<(), ConfigError> {
        self.top_p = thresholds
            .iter()
            .map(|&p| DecodingStrategy::from_threshold(p))
            .collect::<Result<_, _>>()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_threshold_is_greedy() {
        assert_eq!(
            DecodingStrategy::from_threshold(0.0).unwrap(),
            DecodingStrategy::Greedy
        );
        assert!(DecodingStrategy::Greedy.is_greedy());
    }

    #[test]
    fn test_nucleus_threshold_range() {
        assert_eq!(
            DecodingStrategy::from_threshold(0.9).unwrap(),
            DecodingStrategy::Nucleus { top_p: 0.9 }
        );
        assert!(DecodingStrategy::from_threshold(1.0).is_ok());
        assert!(DecodingStrategy::from_threshold(1.5).is_err());
        assert!(DecodingStrategy::from_threshold(-0.1).is_err());
        assert!(DecodingStrategy::from_threshold(f64::NAN).is_err());
    }

    #[test]
    fn test_labels_keep_fractional_part() {
        let labels: Vec<String> = default_strategies().iter().map(|s| s.label()).collect();
        assert_eq!(
            labels,
            vec!["0.0", "0.3", "0.5", "0.7", "0.9", "0.95", "1.0"]
        );
    }

    #[test]
    fn test_small_threshold_labels() {
        let label = |p| DecodingStrategy::from_threshold(p).unwrap().label();
        assert_eq!(label(1e-5), "1e-05");
        assert_eq!(label(2.5e-7), "2.5e-07");
        assert_eq!(label(0.0001), "0.0001");
        assert_eq!(label(0.001), "0.001");
    }

    #[test]
    fn test_strategies_deserialize_from_thresholds() {
        let config: GenerationConfig = serde_yaml::from_str("top_p: [0.0, 0.9]").unwrap();
        assert_eq!(
            config.top_p,
            vec![
                DecodingStrategy::Greedy,
                DecodingStrategy::Nucleus { top_p: 0.9 }
            ]
        );
        assert_eq!(config.length, 200);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_invalid_threshold_rejected_on_load() {
        let result: Result<GenerationConfig, _> = serde_yaml::from_str("top_p: [2.0]");
        assert!(result.is_err());
    }

    #[test]
    fn test_set_thresholds() {
        let mut config = GenerationConfig::default();
        config.set_thresholds(&[0.5]).unwrap();
        assert_eq!(config.top_p, vec![DecodingStrategy::Nucleus { top_p: 0.5 }]);
        assert!(config.set_thresholds(&[0.5, 3.0]).is_err());
    }
}
