//! Batchgen - batch text generation under several decoding strategies
//!
//! Runs every prompt of a file through a pretrained language model once per
//! configured top-p threshold and writes one CSV record per
//! (prompt, threshold) pair.
//!
//! # Architecture
//!
//! - **pipeline**: batching, left-padded alignment, strategy runs, record
//!   assembly; independent of any model backend
//! - **device**: claims the compute device before anything is loaded
//! - **engine**: boostr-backed generator and token sampling
//! - **loader** / **tokenizer** / **model**: SafeTensors and GGUF loading,
//!   Hub downloads, tokenizer selection
//!
//! # Example
//!
//! ```bash
//! batchgen generate --prompt-path prompts.txt \
//!     --model TinyLlama/TinyLlama-1.1B-Chat-v1.0 \
//!     --top-p 0.0 0.9 0.95 --bsz 16 --output-path tinyllama.csv
//! ```

pub mod cli;
pub mod config;
pub mod device;
pub mod engine;
pub mod loader;
pub mod model;
pub mod pipeline;
pub mod tokenizer;

pub use config::{DecodingStrategy, RunConfig};
pub use device::{DeviceClaim, ResourceError};
pub use engine::Executor;
pub use pipeline::{run_job, GenerationResult, Generator, Pipeline, RunSummary};
