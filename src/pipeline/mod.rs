//! Batch generation pipeline
//!
//! Prompts are partitioned by the [`Batcher`], each batch is encoded once by
//! the [`InputAligner`], and every configured [`DecodingStrategy`] is run
//! against it in order. The [`ResultAssembler`] appends one record per row
//! before the next strategy starts, so records land in (batch, strategy,
//! row) order and everything written before a failure is kept.

mod aligner;
mod assembler;
mod batcher;
#[cfg(test)]
pub(crate) mod mock;
mod prompt;
mod runner;

pub use aligner::{AlignError, AlignedInput, InputAligner};
pub use assembler::{composite_id, CsvSink, GenerationResult, RecordSink, ResultAssembler};
pub use batcher::{Batch, BatchError, BatchPlan, BatchPolicy, Batcher, Permutation};
pub use prompt::{load_prompts, prompts_from_lines, Prompt, RESPONSE_MARKER};
pub use runner::{
    derive_seed, normalize_rows, GeneratedRows, GenerationRequest, Generator, ShapeError,
    StrategyRunner, TokenMatrix,
};

use std::time::Instant;

use anyhow::{Context, Result};

use crate::config::{DecodingStrategy, RunConfig};
use crate::device::{DeviceClaim, ResourceError};

/// Counts reported at the end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub prompts: usize,
    pub batches: usize,
    pub records: usize,
}

/// Drives a generator over a prompt list
pub struct Pipeline<'g, G: Generator + ?Sized> {
    generator: &'g G,
    batcher: Batcher,
    runner: StrategyRunner,
    strategies: Vec<DecodingStrategy>,
    display_progress: usize,
}

impl<'g, G: Generator + ?Sized> Pipeline<'g, G> {
    pub fn new(
        generator: &'g G,
        batcher: Batcher,
        runner: StrategyRunner,
        strategies: Vec<DecodingStrategy>,
    ) -> Self {
        Self {
            generator,
            batcher,
            runner,
            strategies,
            display_progress: 0,
        }
    }

    /// Build the pipeline described by `config`
    pub fn from_config(generator: &'g G, config: &RunConfig) -> Result<Self> {
        let batcher = Batcher::new(config.batch.batch_size)?
            .with_policy(config.batch.policy)
            .with_sort_by_length(config.batch.sort_by_length);
        let runner = StrategyRunner::new(config.generation.length, config.generation.seed);

        Ok(Self::new(
            generator,
            batcher,
            runner,
            config.generation.top_p.clone(),
        )
        .with_display_progress(config.display_progress))
    }

    /// Log progress every `every` batches (0 disables)
    pub fn with_display_progress(mut self, every: usize) -> Self {
        self.display_progress = every;
        self
    }

    /// Generate every (prompt, strategy) record into `sink`
    pub fn run<S: RecordSink + ?Sized>(
        &self,
        prompts: &[Prompt],
        sink: &mut S,
    ) -> Result<RunSummary> {
        let plan = self.batcher.plan(prompts);
        let tokenizer = self.generator.tokenizer();
        let aligner = InputAligner::new(tokenizer);
        let assembler = ResultAssembler::new(tokenizer);

        tracing::info!(
            "Generating {} prompts in {} batches with {} strategies",
            prompts.len(),
            plan.len(),
            self.strategies.len()
        );

        let start = Instant::now();
        let mut records = 0usize;

        for (batch_no, batch) in plan.batches().iter().enumerate() {
            let input = aligner
                .align(batch)
                .with_context(|| format!("failed to encode batch {}", batch_no))?;

            for (position, &strategy) in self.strategies.iter().enumerate() {
                let stream = (batch_no * self.strategies.len() + position) as u64;
                let rows = self
                    .runner
                    .run(self.generator, &input, strategy, stream)
                    .with_context(|| {
                        format!("generation failed for batch {} ({})", batch_no, strategy)
                    })?;

                records += assembler.emit(batch, &rows, strategy, sink)?;
                sink.flush()?;
            }

            let done = batch_no + 1;
            if self.display_progress > 0 && done % self.display_progress == 0 {
                tracing::info!(
                    "Processed {}/{} batches ({} records, {:.1}s)",
                    done,
                    plan.len(),
                    records,
                    start.elapsed().as_secs_f64()
                );
            }
        }

        tracing::info!(
            "Finished: {} records in {:.2}s",
            records,
            start.elapsed().as_secs_f64()
        );

        Ok(RunSummary {
            prompts: prompts.len(),
            batches: plan.len(),
            records,
        })
    }
}

/// Run a whole job: claim the device, load the generator, then stream
/// records to `config.output_path`.
///
/// The output file is only created once the device is claimed and the
/// generator is loaded.
pub fn run_job<D, G, C, L>(config: &RunConfig, claim: C, load: L) -> Result<RunSummary>
where
    G: Generator,
    C: FnOnce() -> Result<DeviceClaim<D>, ResourceError>,
    L: FnOnce(DeviceClaim<D>) -> Result<G>,
{
    config.validate()?;

    let claim = claim()?;
    let generator = load(claim)?;

    let prompts = load_prompts(&config.prompt_path, RESPONSE_MARKER)?;
    let pipeline = Pipeline::from_config(&generator, config)?;

    let mut sink = CsvSink::create(&config.output_path)?;
    let summary = pipeline.run(&prompts, &mut sink)?;
    sink.flush()?;

    Ok(summary)
}
