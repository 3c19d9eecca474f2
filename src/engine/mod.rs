//! Model execution
//!
//! [`Executor`] drives a boostr model as a text generator; [`sampler`]
//! picks tokens from logits.

mod executor;
pub mod sampler;

pub use executor::Executor;
pub use sampler::Sampler;
