//! Batch generation command

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use boostr::ops::TensorOps;
use boostr::{
    ActivationOps, BinaryOps, ConvOps, CpuRuntime, DType, NormalizationOps, Runtime, ScalarOps,
    UnaryOps,
};

use crate::config::{parse_dtype, RunConfig};
use crate::device::{self, DeviceTarget};
use crate::engine::Executor;
use crate::loader::{load_model_bundle, resolve_model};
use crate::pipeline::{run_job, BatchPolicy, RunSummary};

/// Flags for `batchgen generate`. Unset flags keep the value from
/// `--config` or the built-in default.
#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// YAML or JSON run configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Newline-delimited prompt file
    #[arg(long)]
    pub prompt_path: Option<PathBuf>,

    /// Output CSV [default: output.csv]
    #[arg(long)]
    pub output_path: Option<PathBuf>,

    /// Model path, name under the model directory, or Hub repository id
    #[arg(long, short, alias = "model-name-or-path")]
    pub model: Option<String>,

    /// Maximum tokens generated per prompt [default: 200]
    #[arg(long)]
    pub length: Option<usize>,

    /// Prompts per batch [default: 20]
    #[arg(long = "bsz")]
    pub batch_size: Option<usize>,

    /// Top-p thresholds, 0 for greedy [default: 0.0 0.3 0.5 0.7 0.9 0.95 1.0]
    #[arg(long = "top-p", num_args = 1..)]
    pub top_p: Vec<f64>,

    /// Stay on the CPU
    #[arg(long)]
    pub no_cuda: bool,

    /// Sampling seed [default: 42]
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log progress every N batches, 0 to disable [default: 100]
    #[arg(long)]
    pub display_progress: Option<usize>,

    /// Batch prompts of similar length together
    #[arg(long)]
    pub sort_by_length: bool,

    /// Reproduce the old batching quirks (N == bsz gives singletons,
    /// bsz == 1 gives one batch)
    #[arg(long)]
    pub legacy_batching: bool,

    /// KV cache dtype (f32, f16, bf16) [default: from the checkpoint]
    #[arg(long)]
    pub dtype: Option<String>,

    /// Initial KV cache capacity in tokens
    #[arg(long)]
    pub num_ctx: Option<usize>,

    /// Cap on prompt plus response tokens [default: the model's limit]
    #[arg(long)]
    pub max_context_len: Option<usize>,

    /// Directory searched for models given by name
    #[arg(long, env = "BATCHGEN_MODEL_DIR")]
    pub model_dir: Option<PathBuf>,
}

impl GenerateArgs {
    /// Merge flags over the config file (or defaults) and validate
    pub fn into_config(self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_file(path)?,
            None => RunConfig::default(),
        };

        if let Some(prompt_path) = self.prompt_path {
            config.prompt_path = prompt_path;
        }
        if let Some(output_path) = self.output_path {
            config.output_path = output_path;
        }
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(length) = self.length {
            config.generation.length = length;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch.batch_size = batch_size;
        }
        if !self.top_p.is_empty() {
            config.generation.set_thresholds(&self.top_p)?;
        }
        if let Some(seed) = self.seed {
            config.generation.seed = seed;
        }
        if let Some(every) = self.display_progress {
            config.display_progress = every;
        }
        if self.no_cuda {
            config.inference.no_cuda = true;
        }
        if self.sort_by_length {
            config.batch.sort_by_length = true;
        }
        if self.legacy_batching {
            config.batch.policy = BatchPolicy::Legacy;
        }
        if let Some(dtype) = self.dtype {
            config.inference.dtype = Some(dtype);
        }
        if let Some(num_ctx) = self.num_ctx {
            config.inference.num_ctx = num_ctx;
        }
        if let Some(cap) = self.max_context_len {
            config.inference.max_context_len = Some(cap);
        }
        if let Some(model_dir) = self.model_dir {
            config.inference.model_dir = Some(model_dir);
        }

        config.validate()?;
        if let Some(dtype) = &config.inference.dtype {
            parse_dtype(dtype)?;
        }
        Ok(config)
    }
}

/// Run `batchgen generate`
pub fn generate(args: GenerateArgs) -> Result<()> {
    let config = args.into_config()?;

    tracing::info!(
        "Model {} | prompts {} | output {}",
        config.model,
        config.prompt_path.display(),
        config.output_path.display()
    );

    let summary = run_on_device(&config)?;

    tracing::info!(
        "Wrote {} records for {} prompts ({} batches) to {}",
        summary.records,
        summary.prompts,
        summary.batches,
        config.output_path.display()
    );
    Ok(())
}

fn run_on_device(config: &RunConfig) -> Result<RunSummary> {
    let inference = &config.inference;
    let visible_gpus = if inference.wants_cuda() {
        device::cuda_device_count()
    } else {
        0
    };

    match device::select_device(
        inference.wants_cuda(),
        inference.device.device_id(),
        visible_gpus,
    ) {
        DeviceTarget::Cuda(device_id) => run_on_cuda(config, device_id),
        DeviceTarget::Cpu => run_on_cpu(config),
    }
}

#[cfg(feature = "cuda")]
fn run_on_cuda(config: &RunConfig, device_id: usize) -> Result<RunSummary> {
    use boostr::CudaRuntime;

    run_job(
        config,
        || device::claim_cuda(device_id),
        |claim| load_executor::<CudaRuntime>(config, claim.into_device()),
    )
}

#[cfg(not(feature = "cuda"))]
fn run_on_cuda(_config: &RunConfig, device_id: usize) -> Result<RunSummary> {
    anyhow::bail!("cuda:{} requested but batchgen was built without CUDA support", device_id)
}

fn run_on_cpu(config: &RunConfig) -> Result<RunSummary> {
    run_job(config, device::claim_cpu, |claim| {
        load_executor::<CpuRuntime>(config, claim.into_device())
    })
}

/// Resolve, load and warm up the model on a claimed device
fn load_executor<R: Runtime<DType = DType>>(
    config: &RunConfig,
    device: R::Device,
) -> Result<Executor<R>>
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
    let path = resolve_model(&config.model, &config.inference.model_dir())?;
    tracing::info!("Loading model: {}", path.display());

    let mut bundle = load_model_bundle::<R, _>(&path, &device)?;
    if let Some(dtype) = &config.inference.dtype {
        bundle.config.dtype = dtype.clone();
    }
    bundle.config.max_context_len = config.inference.max_context_len;

    let executor = Executor::new(bundle, device, config.inference.num_ctx);
    executor.warmup()?;
    tracing::info!(
        "Model ready ({}, {} layers, vocab {})",
        executor.config().model_type(),
        executor.config().num_layers(),
        executor.config().vocab_size()
    );
    Ok(executor)
}
