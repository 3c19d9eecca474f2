//! Model configuration
//!
//! Architecture comes from boostr's `UniversalConfig`; this wrapper adds the
//! dtype used for runtime state and an optional context cap. Checkpoints of
//! families boostr cannot build (GPT-2 and similar) are rejected up front.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use boostr::model::{HuggingFaceConfig, UniversalConfig};
use boostr::DType;

/// Loaded model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(flatten)]
    pub model: UniversalConfig,

    /// Data type of the KV cache / SSM state
    #[serde(default = "default_dtype")]
    pub dtype: String,

    /// Cap on the sequence length below the model's own limit
    #[serde(default)]
    pub max_context_len: Option<usize>,
}

fn default_dtype() -> String {
    "f32".to_string()
}

/// Hugging Face `model_type`s whose layer layout boostr cannot build
const UNSUPPORTED_MODEL_TYPES: &[&str] = &[
    "gpt2",
    "gpt_neo",
    "gptj",
    "gpt_neox",
    "gpt_bigcode",
    "opt",
    "bloom",
    "falcon",
    "mpt",
    "bert",
    "t5",
    "bart",
];

impl ModelConfig {
    pub fn from_universal_with_dtype(model: UniversalConfig, dtype: &str) -> Self {
        Self {
            model,
            dtype: dtype.to_string(),
            max_context_len: None,
        }
    }

    /// Read `config.json` from a model directory.
    ///
    /// Accepts either boostr's native layout or a Hugging Face config; the
    /// dtype follows `torch_dtype` when present.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join("config.json");
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("unrecognized model config {}", config_path.display()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        check_architecture(content)?;
        let dtype = dtype_from_config(content);

        if let Ok(model) = serde_json::from_str::<UniversalConfig>(content) {
            return Ok(Self::from_universal_with_dtype(model, dtype));
        }

        let hf = HuggingFaceConfig::from_json(content)
            .map_err(|e| anyhow!("Failed to parse config: {}", e))?;
        Ok(Self::from_universal_with_dtype(hf.to_universal(), dtype))
    }

    pub fn dtype(&self) -> &str {
        &self.dtype
    }

    /// Runtime state dtype; unknown names fall back to BF16
    pub fn state_dtype(&self) -> DType {
        match self.dtype.as_str() {
            "f16" | "float16" => DType::F16,
            "bf16" | "bfloat16" => DType::BF16,
            "f32" | "float32" => DType::F32,
            _ => DType::BF16,
        }
    }

    pub fn model_type(&self) -> &str {
        &self.model.model_type
    }

    pub fn vocab_size(&self) -> usize {
        self.model.vocab_size
    }

    pub fn num_layers(&self) -> usize {
        self.model.num_layers
    }

    /// Maximum sequence length, respecting `max_context_len`
    pub fn max_seq_len(&self) -> usize {
        match self.max_context_len {
            Some(cap) => cap.min(self.model.max_seq_len),
            None => self.model.max_seq_len,
        }
    }
}

/// Fail for a `model_type` (or GGUF `general.architecture`) naming a family
/// boostr has no implementation for
pub fn ensure_supported(model_type: &str) -> Result<()> {
    let name = normalize(model_type);
    if UNSUPPORTED_MODEL_TYPES.iter().any(|t| normalize(t) == name) {
        return Err(unsupported(model_type));
    }
    Ok(())
}

fn normalize(name: &str) -> String {
    name.replace('_', "").to_ascii_lowercase()
}

/// Check `model_type` and `architectures` of a config.json
fn check_architecture(content: &str) -> Result<()> {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(content) else {
        return Ok(());
    };

    if let Some(model_type) = json.get("model_type").and_then(|v| v.as_str()) {
        ensure_supported(model_type)?;
    }

    let architectures = json
        .get("architectures")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str());
    for arch in architectures {
        let class = normalize(arch);
        if UNSUPPORTED_MODEL_TYPES
            .iter()
            .any(|t| class.starts_with(&normalize(t)))
        {
            return Err(unsupported(arch));
        }
    }
    Ok(())
}

fn unsupported(name: &str) -> anyhow::Error {
    anyhow!(
        "unsupported architecture '{}': only Llama-family, Mamba and hybrid models can be loaded",
        name
    )
}

/// Map `torch_dtype` from a config.json to a dtype name
fn dtype_from_config(content: &str) -> &'static str {
    let torch_dtype = serde_json::from_str::<serde_json::Value>(content)
        .ok()
        .and_then(|json| json.get("torch_dtype")?.as_str().map(str::to_string));

    match torch_dtype.as_deref() {
        Some("bfloat16") => "bf16",
        Some("float16") => "f16",
        _ => "f32",
    }
}
