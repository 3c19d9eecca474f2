//! Model file discovery

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

/// Weight file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// Hugging Face SafeTensors, config in `config.json`
    SafeTensors,
    /// llama.cpp GGUF with embedded metadata and vocabulary
    Gguf,
}

/// Files making up one model
#[derive(Debug, Clone)]
pub struct ModelSource {
    pub weights_path: PathBuf,
    /// `config.json` next to SafeTensors weights
    pub config_path: Option<PathBuf>,
    /// `tokenizer.json` next to the weights
    pub tokenizer_path: Option<PathBuf>,
    pub format: ModelFormat,
}

impl ModelSource {
    fn new(weights_path: PathBuf, format: ModelFormat) -> Self {
        let dir = weights_path.parent().map(Path::to_path_buf).unwrap_or_default();
        let config_path = match format {
            ModelFormat::SafeTensors => existing(dir.join("config.json")),
            ModelFormat::Gguf => None,
        };
        Self {
            tokenizer_path: existing(dir.join("tokenizer.json")),
            config_path,
            weights_path,
            format,
        }
    }

    /// Directory holding the weights
    pub fn dir(&self) -> &Path {
        self.weights_path.parent().unwrap_or_else(|| Path::new("."))
    }
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.exists().then_some(path)
}

/// Locate model files from a weights file or a model directory
pub fn detect_model_source<P: AsRef<Path>>(path: P) -> Result<ModelSource> {
    let path = path.as_ref();

    if path.is_file() {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let format = match ext {
            "safetensors" => ModelFormat::SafeTensors,
            "gguf" => ModelFormat::Gguf,
            _ => return Err(anyhow!("Unsupported model file format: .{}", ext)),
        };
        Ok(ModelSource::new(path.to_path_buf(), format))
    } else if path.is_dir() {
        detect_model_in_directory(path)
    } else {
        Err(anyhow!("Model path does not exist: {}", path.display()))
    }
}

/// SafeTensors wins over GGUF when a directory holds both
fn detect_model_in_directory(dir: &Path) -> Result<ModelSource> {
    for name in ["model.safetensors", "pytorch_model.safetensors"] {
        let candidate = dir.join(name);
        if candidate.exists() {
            return Ok(ModelSource::new(candidate, ModelFormat::SafeTensors));
        }
    }

    if let Some(first_shard) = first_match(dir, "model-00001-of-*.safetensors") {
        return Ok(ModelSource::new(first_shard, ModelFormat::SafeTensors));
    }

    if let Some(gguf_file) = first_match(dir, "*.gguf") {
        return Ok(ModelSource::new(gguf_file, ModelFormat::Gguf));
    }

    Err(anyhow!(
        "No supported model files found in directory: {}",
        dir.display()
    ))
}

fn first_match(dir: &Path, pattern: &str) -> Option<PathBuf> {
    let pattern = dir.join(pattern);
    let mut matches: Vec<PathBuf> = glob::glob(pattern.to_str()?)
        .ok()?
        .filter_map(|r| r.ok())
        .collect();
    matches.sort();
    matches.into_iter().next()
}
