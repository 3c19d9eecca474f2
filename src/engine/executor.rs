//! Inference executor
//!
//! Runs a boostr `LoadedModel` as the pipeline's [`Generator`]. Rows of a
//! batch are decoded one after another, each with its own KV cache (or SSM
//! state for Mamba models), starting from the row's unpadded prompt.

use anyhow::{anyhow, Result};

use boostr::inference::{LayeredKvCache, LayeredSsmState};
use boostr::model::LoadedModel;
use boostr::ops::TensorOps;
use boostr::{
    ActivationOps, BinaryOps, ConvOps, DType, NormalizationOps, Runtime, ScalarOps, Tensor,
    UnaryOps,
};

use super::sampler::Sampler;
use crate::loader::ModelBundle;
use crate::model::ModelConfig;
use crate::pipeline::{AlignedInput, GenerationRequest, Generator, TokenMatrix};
use crate::tokenizer::{BoxedTokenizer, TokenizerTrait};

/// Model, tokenizer and device for one run
pub struct Executor<R: Runtime<DType = DType>> {
    model: LoadedModel<R>,
    config: ModelConfig,
    tokenizer: BoxedTokenizer,
    device: R::Device,
    /// Initial KV cache capacity in tokens
    num_ctx: usize,
}

impl<R: Runtime<DType = DType>> Executor<R>
where
    R::Client: TensorOps<R>
        + ScalarOps<R>
        + ConvOps<R>
        + NormalizationOps<R>
        + UnaryOps<R>
        + ActivationOps<R>
        + BinaryOps<R>
        + boostr::model::ModelClient<R>
        + boostr::quant::DequantOps<R>,
{
    pub fn new(bundle: ModelBundle<R>, device: R::Device, num_ctx: usize) -> Self {
        let ModelBundle {
            model,
            config,
            tokenizer,
        } = bundle;
        Self {
            model,
            config,
            tokenizer,
            device,
            num_ctx,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Run one single-token forward pass so kernels are loaded before the
    /// first batch
    pub fn warmup(&self) -> Result<()> {
        let start = std::time::Instant::now();
        let mut state = self.new_state(16)?;
        let input = Tensor::from_slice(&[self.tokenizer.eos_token_id()], &[1, 1], &self.device);
        state.forward(&self.model, &input)?;
        tracing::debug!("Model warmup complete in {:?}", start.elapsed());
        Ok(())
    }

    /// Decode up to `budget` tokens after `prompt`. EOS is kept and ends the
    /// row.
    fn generate_row(
        &self,
        prompt: &[u32],
        budget: usize,
        sampler: &mut Sampler,
    ) -> Result<Vec<u32>> {
        if prompt.is_empty() {
            tracing::debug!("Empty prompt, nothing to generate");
            return Ok(Vec::new());
        }

        let max_seq_len = self.config.max_seq_len();
        let budget = budget.min(max_seq_len.saturating_sub(prompt.len()));
        if budget == 0 {
            return Ok(Vec::new());
        }

        let mut state = self.new_state(max_seq_len)?;
        let input = Tensor::from_slice(prompt, &[1, prompt.len()], &self.device);
        let mut logits = state.forward(&self.model, &input)?;

        let mut generated = Vec::with_capacity(budget);
        for i in 0..budget {
            let next_token = sampler.next_token(&last_logits(&logits)?);
            generated.push(next_token);

            if self.tokenizer.is_eos(next_token) {
                tracing::debug!("Hit EOS after {} tokens", i + 1);
                break;
            }
            if i + 1 == budget {
                break;
            }

            let next_input = Tensor::from_slice(&[next_token], &[1, 1], &self.device);
            logits = state.forward(&self.model, &next_input)?;
        }

        Ok(generated)
    }

    fn new_state(&self, max_seq_len: usize) -> Result<DecodeState<R>> {
        let num_layers = self.model.num_layers();
        let dtype = self.config.state_dtype();

        if self.model.needs_ssm_state() {
            let mamba_config = self
                .model
                .mamba_config()
                .ok_or_else(|| anyhow!("Mamba2 model missing mamba config"))?;
            return Ok(DecodeState::Ssm(LayeredSsmState::new(
                num_layers,
                1,
                mamba_config,
                dtype,
                &self.device,
            )));
        }

        let kv_cache = LayeredKvCache::new_positional(
            num_layers,
            1,
            self.model.num_kv_heads().unwrap_or(8),
            self.num_ctx.min(max_seq_len),
            max_seq_len,
            self.model.head_dim().unwrap_or(64),
            dtype,
            &self.device,
        )
        .map_err(|e| anyhow!("Failed to create KV cache: {}", e))?;
        Ok(DecodeState::Kv(kv_cache))
    }
}

/// Recurrent state carried between forward passes
enum DecodeState<R: Runtime<DType = DType>> {
    Kv(LayeredKvCache<R>),
    Ssm(LayeredSsmState<R>),
}

impl<R: Runtime<DType = DType>> DecodeState<R>
where
    R::Client: TensorOps<R>
        + ScalarOps<R>
        + ConvOps<R>
        + NormalizationOps<R>
        + UnaryOps<R>
        + ActivationOps<R>
        + BinaryOps<R>
        + boostr::model::ModelClient<R>
        + boostr::quant::DequantOps<R>,
{
    fn forward(&mut self, model: &LoadedModel<R>, input: &Tensor<R>) -> Result<Tensor<R>> {
        let logits = match self {
            Self::Kv(kv_cache) => {
                let position = kv_cache.seq_len();
                model.forward_with_kv_cache(input, kv_cache, position)
            }
            Self::Ssm(ssm_state) => model.forward_with_ssm_state(input, ssm_state),
        };
        logits.map_err(|e| anyhow!("Forward pass failed: {}", e))
    }
}

/// Logits of the final position as a host vector
fn last_logits<R: Runtime<DType = DType>>(logits: &Tensor<R>) -> Result<Vec<f32>>
where
    R::Client: TensorOps<R>,
{
    let seq_len = logits.dim(1)?;
    let last = logits.narrow(1, seq_len - 1, 1)?.squeeze(Some(1)).contiguous();
    Ok(last.to_vec())
}

impl<R: Runtime<DType = DType>> Generator for Executor<R>
where
    R::Client: TensorOps<R>
        + ScalarOps<R>
        + ConvOps<R>
        + NormalizationOps<R>
        + UnaryOps<R>
        + ActivationOps<R>
        + BinaryOps<R>
        + boostr::model::ModelClient<R>
        + boostr::quant::DequantOps<R>,
{
    fn tokenizer(&self) -> &dyn TokenizerTrait {
        self.tokenizer.as_ref()
    }

    fn generate(&self, input: &AlignedInput, request: &GenerationRequest) -> Result<TokenMatrix> {
        let boundary = input.boundary_index();
        let budget = request.max_length.saturating_sub(boundary);

        let mut rows = Vec::with_capacity(input.num_rows());
        for row in 0..input.num_rows() {
            let mut sampler = Sampler::for_row(request, row);
            let generated = self.generate_row(input.prompt_tokens(row), budget, &mut sampler)?;

            tracing::debug!(row, tokens = generated.len(), "Row decoded");

            let mut tokens = input.row(row).to_vec();
            tokens.extend(generated);
            rows.push(tokens);
        }

        let width = rows.iter().map(Vec::len).max().unwrap_or(boundary);
        for row in &mut rows {
            row.resize(width, request.pad_token_id);
        }

        Ok(TokenMatrix::new(vec![rows.len(), width], rows.concat()))
    }
}
