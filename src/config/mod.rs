//! Configuration system for batchgen
//!
//! A `RunConfig` can be loaded from a YAML or JSON file and is then
//! overridden field by field from the command line.

mod generation;
mod inference;

pub use generation::{DecodingStrategy, GenerationConfig, DEFAULT_TOP_P};
pub use inference::{DeviceConfig, InferenceConfig};

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use boostr::DType;

use crate::pipeline::BatchPolicy;

/// Invalid configuration values
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was left empty
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// Batch size of zero
    #[error("batch size must be positive")]
    ZeroBatchSize,

    /// Nothing would be generated
    #[error("response length must be positive")]
    ZeroLength,

    /// Context cap of zero
    #[error("max context length must be positive")]
    ZeroContextLen,

    /// No decoding strategy configured
    #[error("at least one top-p threshold is required")]
    NoStrategies,

    /// Threshold outside `0` or `(0, 1]`
    #[error("top-p threshold must be 0 (greedy) or in (0, 1], got {0}")]
    InvalidThreshold(f64),

    /// Config file with an unknown extension
    #[error("unsupported config file format: {0}")]
    UnsupportedFormat(String),
}

/// Parse a dtype string into a `DType`.
///
/// Accepts short and long forms: "f32"/"float32", "f16"/"float16", "bf16"/"bfloat16".
/// Returns an error for unknown strings or when f16/bf16 is requested without the `f16` feature.
pub fn parse_dtype(s: &str) -> Result<DType> {
    match s {
        "f32" | "float32" => Ok(DType::F32),
        #[cfg(feature = "f16")]
        "f16" | "float16" => Ok(DType::F16),
        #[cfg(feature = "f16")]
        "bf16" | "bfloat16" => Ok(DType::BF16),
        #[cfg(not(feature = "f16"))]
        "f16" | "float16" | "bf16" | "bfloat16" => Err(anyhow!(
            "dtype '{}' requested but the 'f16' feature is not enabled; \
             rebuild with `--features f16` or use 'f32'",
            s
        )),
        other => Err(anyhow!("unknown dtype: '{}'", other)),
    }
}

/// Batching settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of prompts per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Partitioning policy
    #[serde(default)]
    pub policy: BatchPolicy,

    /// Group prompts of similar length to reduce padding
    #[serde(default)]
    pub sort_by_length: bool,
}

fn default_batch_size() -> usize {
    20
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            policy: BatchPolicy::default(),
            sort_by_length: false,
        }
    }
}

/// Full configuration for one generation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Newline-delimited prompt file
    #[serde(default)]
    pub prompt_path: PathBuf,

    /// Output table (CSV)
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    /// Model path, name under the model directory, or Hub repository id
    #[serde(default)]
    pub model: String,

    /// Log progress every this many batches (0 disables)
    #[serde(default = "default_display_progress")]
    pub display_progress: usize,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub inference: InferenceConfig,
}

fn default_output_path() -> PathBuf {
    PathBuf::from("output.csv")
}

fn default_display_progress() -> usize {
    100
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            prompt_path: PathBuf::new(),
            output_path: default_output_path(),
            model: String::new(),
            display_progress: default_display_progress(),
            batch: BatchConfig::default(),
            generation: GenerationConfig::default(),
            inference: InferenceConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration, picking the format from the file extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(path),
            Some("json") => Self::from_json(path),
            other => Err(ConfigError::UnsupportedFormat(other.unwrap_or("").to_string()).into()),
        }
    }

    /// Check that the configuration can drive a run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prompt_path.as_os_str().is_empty() {
            return Err(ConfigError::Missing("prompt_path"));
        }
        if self.model.is_empty() {
            return Err(ConfigError::Missing("model"));
        }
        if self.batch.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.generation.length == 0 {
            return Err(ConfigError::ZeroLength);
        }
        if self.generation.top_p.is_empty() {
            return Err(ConfigError::NoStrategies);
        }
        if self.inference.max_context_len == Some(0) {
            return Err(ConfigError::ZeroContextLen);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_run_config_yaml() {
        let yaml = r#"
prompt_path: prompts/test.wp.src
output_path: out/gpt2_small.csv
model: gpt2

batch:
  batch_size: 8
  policy: legacy
  sort_by_length: true

generation:
  length: 50
  top_p: [0.0, 0.95]
  seed: 7

inference:
  device: cpu
  dtype: f32
"#;
        let config: RunConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.model, "gpt2");
        assert_eq!(config.batch.batch_size, 8);
        assert_eq!(config.batch.policy, BatchPolicy::Legacy);
        assert!(config.batch.sort_by_length);
        assert_eq!(config.generation.length, 50);
        assert_eq!(config.generation.top_p.len(), 2);
        assert_eq!(config.generation.seed, 7);
        assert!(!config.inference.wants_cuda());
        assert_eq!(config.display_progress, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_follow_reference_settings() {
        let config = RunConfig::default();
        assert_eq!(config.output_path, PathBuf::from("output.csv"));
        assert_eq!(config.batch.batch_size, 20);
        assert_eq!(config.batch.policy, BatchPolicy::Uniform);
        assert_eq!(config.generation.length, 200);
        assert_eq!(config.generation.top_p.len(), DEFAULT_TOP_P.len());
        assert_eq!(config.generation.seed, 42);
    }

    #[test]
    fn test_validate_rejects_missing_and_zero_fields() {
        let mut config = RunConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("prompt_path"))
        ));

        config.prompt_path = PathBuf::from("prompts.txt");
        assert!(matches!(config.validate(), Err(ConfigError::Missing("model"))));

        config.model = "gpt2".to_string();
        config.batch.batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroBatchSize)));

        config.batch.batch_size = 4;
        config.inference.max_context_len = Some(0);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroContextLen)));

        config.inference.max_context_len = Some(256);
        config.generation.top_p.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoStrategies)));
    }

    #[test]
    fn test_from_file_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"prompt_path": "p.txt", "model": "gpt2", "generation": {{"top_p": [0.5]}}}}"#
        )
        .unwrap();

        let config = RunConfig::from_file(file.path()).unwrap();
        assert_eq!(config.prompt_path, PathBuf::from("p.txt"));
        assert_eq!(
            config.generation.top_p,
            vec![DecodingStrategy::Nucleus { top_p: 0.5 }]
        );
    }

    #[test]
    fn test_from_file_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        assert!(RunConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_parse_dtype_f32() {
        assert_eq!(parse_dtype("f32").unwrap(), DType::F32);
        assert_eq!(parse_dtype("float32").unwrap(), DType::F32);
    }

    #[cfg(not(feature = "f16"))]
    #[test]
    fn test_parse_dtype_f16_without_feature() {
        assert!(parse_dtype("f16").is_err());
        assert!(parse_dtype("bf16").is_err());
    }

    #[test]
    fn test_parse_dtype_unknown() {
        assert!(parse_dtype("int8").is_err());
        assert!(parse_dtype("").is_err());
    }
}
