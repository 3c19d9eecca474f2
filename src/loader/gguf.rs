//! GGUF model loading
//!
//! GGUF files carry weights, architecture metadata and the vocabulary, so
//! the model config and tokenizer both come from the one file.

use anyhow::{anyhow, Result};

use boostr::format::Gguf;
use boostr::model::{AttentionConfig, LoadedModel, SsmConfig, UniversalConfig};
use boostr::ops::TensorOps;
use boostr::{DType, Runtime, VarBuilder, VarMap};

use super::detect::ModelSource;
use crate::model::{ensure_supported, ModelConfig};
use crate::tokenizer::GgufVocab;

/// Load a GGUF model with its embedded tokenizer
pub fn load_gguf<R: Runtime<DType = DType>>(
    source: &ModelSource,
    device: &R::Device,
) -> Result<(LoadedModel<R>, ModelConfig, GgufVocab)>
where
    R::Client: TensorOps<R> + boostr::quant::DequantOps<R>,
{
    let path = &source.weights_path;

    let gguf = Gguf::open_with_mmap(path, false)
        .map_err(|e| anyhow!("Failed to open GGUF file: {}", e))?;

    let config = ModelConfig::from_universal_with_dtype(universal_from_metadata(&gguf)?, "f32");
    let tokenizer = GgufVocab::from_gguf(&gguf)?;

    let var_map = VarMap::<R>::from_gguf(path, device)
        .map_err(|e| anyhow!("Failed to load GGUF tensors: {}", e))?;
    tracing::info!("Loaded {} tensors from GGUF", var_map.len());

    let var_map_ref: &'static mut VarMap<R> = Box::leak(Box::new(var_map));
    let mut vb = VarBuilder::new(var_map_ref, device);

    let model = LoadedModel::load(&config.model, &mut vb)
        .map_err(|e| anyhow!("Failed to load model: {}", e))?;

    Ok((model, config, tokenizer))
}

/// Build the architecture config from GGUF metadata keys
fn universal_from_metadata(gguf: &Gguf) -> Result<UniversalConfig> {
    let metadata = gguf.metadata();
    let arch = metadata.architecture().unwrap_or("llama");
    ensure_supported(arch)?;
    let key = |suffix: &str| format!("{}.{}", arch, suffix);

    let vocab_size = match metadata.get_u32("general.vocab_size") {
        Some(vs) => vs as usize,
        None => metadata
            .get_array("tokenizer.ggml.tokens")
            .map(|tokens| tokens.len())
            .ok_or_else(|| anyhow!("GGUF has neither general.vocab_size nor a token list"))?,
    };

    let hidden_size: usize = metadata
        .embedding_length()
        .ok_or_else(|| anyhow!("GGUF missing {}", key("embedding_length")))?
        .try_into()?;

    let num_layers: usize = metadata
        .block_count()
        .ok_or_else(|| anyhow!("GGUF missing {}", key("block_count")))?
        .try_into()?;

    let max_seq_len = metadata
        .context_length()
        .map(|v| v as usize)
        .unwrap_or(4096);

    let model_type = match arch {
        "mistral" => "mistral",
        "mamba" | "mamba2" => "mamba2",
        "mamba3" => "mamba3",
        _ => "llama",
    };

    let num_heads = metadata
        .get_u32(&key("attention.head_count"))
        .map(|v| v as usize)
        .unwrap_or(32);
    let num_kv_heads = metadata
        .get_u32(&key("attention.head_count_kv"))
        .map(|v| v as usize);
    let rope_theta = metadata
        .get_f32(&key("rope.freq_base"))
        .unwrap_or(10000.0);

    let attention = AttentionConfig {
        num_heads,
        num_kv_heads,
        head_dim: (num_heads > 0).then(|| hidden_size / num_heads),
        rope_theta: rope_theta as f32,
        rope_scaling: None,
        kv_latent_dim: None,
        q_latent_dim: None,
        d_rope: None,
        sliding_window: None,
        use_alibi: false,
    };

    let ssm = model_type.starts_with("mamba").then(|| SsmConfig {
        variant: model_type.to_string(),
        num_heads,
        head_dim: 64,
        state_size: 64,
        chunk_size: 256,
        n_groups: 1,
        conv_kernel: 4,
        expand: 2,
        complex_rope: None,
        mimo_rank: None,
        use_conv: None,
    });

    Ok(UniversalConfig {
        model_type: model_type.to_string(),
        vocab_size,
        hidden_size,
        num_layers,
        max_seq_len,
        intermediate_size: metadata
            .get_u32(&key("feed_forward_length"))
            .map(|v| v as usize),
        rms_norm_eps: metadata
            .get_f32(&key("attention.layer_norm_rms_epsilon"))
            .map(|v| v as f64)
            .unwrap_or(1e-5),
        attention: Some(attention),
        ssm,
        moe: None,
        hybrid_layers: None,
        tie_word_embeddings: false,
        vision: None,
        audio: None,
    })
}
