//! Inference configuration settings

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Device configuration for inference
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceConfig {
    /// Simple device string (e.g., "cuda:0", "cpu")
    Simple(String),
    /// Detailed device configuration
    Detailed {
        /// Device type: "cuda", "cpu"
        device_type: String,
        /// Device ID (for multi-GPU)
        #[serde(default)]
        device_id: usize,
    },
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig::Simple("cuda:0".to_string())
    }
}

impl DeviceConfig {
    /// Get device type ("cuda" or "cpu")
    pub fn device_type(&self) -> &str {
        match self {
            DeviceConfig::Simple(s) => {
                if s.starts_with("cuda") {
                    "cuda"
                } else {
                    "cpu"
                }
            }
            DeviceConfig::Detailed { device_type, .. } => device_type,
        }
    }

    /// Get device ID (for multi-GPU)
    pub fn device_id(&self) -> usize {
        match self {
            DeviceConfig::Simple(s) => s
                .strip_prefix("cuda:")
                .and_then(|id| id.parse().ok())
                .unwrap_or(0),
            DeviceConfig::Detailed { device_id, .. } => *device_id,
        }
    }

    /// Check if using CUDA
    pub fn is_cuda(&self) -> bool {
        self.device_type() == "cuda"
    }
}

/// Model and device settings for a generation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Target compute device
    #[serde(default)]
    pub device: DeviceConfig,

    /// Stay on the CPU even when a GPU is configured and available
    #[serde(default)]
    pub no_cuda: bool,

    /// Data type for the KV cache (f32, f16, bf16); defaults to the
    /// checkpoint's `torch_dtype`
    #[serde(default)]
    pub dtype: Option<String>,

    /// Initial KV cache capacity in tokens; grows up to the model's context length
    #[serde(default = "default_num_ctx")]
    pub num_ctx: usize,

    /// Cap on prompt plus response tokens, below the model's own limit
    #[serde(default)]
    pub max_context_len: Option<usize>,

    /// Directory searched for models given by name
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
}

fn default_num_ctx() -> usize {
    1024
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            no_cuda: false,
            dtype: None,
            num_ctx: default_num_ctx(),
            max_context_len: None,
            model_dir: None,
        }
    }
}

impl InferenceConfig {
    /// Whether the run should try to claim a CUDA device
    pub fn wants_cuda(&self) -> bool {
        self.device.is_cuda() && !self.no_cuda
    }

    /// Directory searched for models given by name.
    ///
    /// Falls back to `BATCHGEN_MODEL_DIR`, then `./models`.
    pub fn model_dir(&self) -> PathBuf {
        self.model_dir.clone().unwrap_or_else(|| {
            std::env::var("BATCHGEN_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./models"))
        })
    }
}
