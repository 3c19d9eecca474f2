//! Model loading
//!
//! Resolves a model argument to files on disk and loads weights, config and
//! a matching tokenizer:
//! - SafeTensors with `config.json`, tokenizer from `tokenizer.json` or a
//!   splintr vocabulary picked by size
//! - GGUF with its embedded metadata and vocabulary

mod detect;
mod gguf;
mod hub;
mod safetensors;

pub use detect::{detect_model_source, ModelFormat, ModelSource};
pub use gguf::load_gguf;
pub use hub::{download_file, download_model, local_name, resolve_model, MODEL_FILES};
pub use safetensors::load_safetensors;

use std::path::Path;

use anyhow::Result;

use boostr::model::LoadedModel;
use boostr::ops::TensorOps;
use boostr::{DType, Runtime};

use crate::model::ModelConfig;
use crate::tokenizer::{BoxedTokenizer, HfTokenizer, Tokenizer};

/// Everything needed to build an executor
pub struct ModelBundle<R: Runtime<DType = DType>> {
    pub model: LoadedModel<R>,
    pub config: ModelConfig,
    pub tokenizer: BoxedTokenizer,
}

/// Load model and tokenizer from a weights file or model directory
pub fn load_model_bundle<R: Runtime<DType = DType>, P: AsRef<Path>>(
    path: P,
    device: &R::Device,
) -> Result<ModelBundle<R>>
where
    R::Client: TensorOps<R> + boostr::quant::DequantOps<R>,
{
    let source = detect_model_source(path)?;
    tracing::info!(
        "Loading {:?} model from {}",
        source.format,
        source.weights_path.display()
    );

    match source.format {
        ModelFormat::Gguf => {
            let (model, config, tokenizer) = load_gguf::<R>(&source, device)?;
            tracing::info!("Using GGUF-embedded tokenizer");
            Ok(ModelBundle {
                model,
                config,
                tokenizer: Box::new(tokenizer),
            })
        }
        ModelFormat::SafeTensors => {
            let (model, config) = load_safetensors::<R>(&source, device)?;
            let tokenizer = load_tokenizer(&source, &config)?;
            Ok(ModelBundle {
                model,
                config,
                tokenizer,
            })
        }
    }
}

/// Tokenizer for a SafeTensors checkpoint
pub fn load_tokenizer(source: &ModelSource, config: &ModelConfig) -> Result<BoxedTokenizer> {
    match &source.tokenizer_path {
        Some(path) => {
            tracing::info!("Using tokenizer {}", path.display());
            Ok(Box::new(HfTokenizer::from_file(path)?))
        }
        None => {
            let tokenizer = Tokenizer::from_vocab_size(config.vocab_size())?;
            tracing::info!("Using splintr vocabulary {}", tokenizer.vocab_name());
            Ok(Box::new(tokenizer))
        }
    }
}
