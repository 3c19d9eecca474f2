//! Strategy execution
//!
//! One call into the generation capability per (batch, strategy), with the
//! raw output normalized into exactly one token row per batch member.

use anyhow::Result;
use thiserror::Error;

use super::aligner::AlignedInput;
use crate::config::DecodingStrategy;
use crate::tokenizer::TokenizerTrait;

/// The text generation capability the pipeline drives.
///
/// Implementations are constructed once and used read-only for the whole
/// run.
pub trait Generator {
    /// Tokenizer matching the model's vocabulary
    fn tokenizer(&self) -> &dyn TokenizerTrait;

    /// Generate one continuation per row of `input`.
    ///
    /// Each returned row holds the input row followed by the generated
    /// tokens, padded on the right with `request.pad_token_id` to a common
    /// width of at most `request.max_length`.
    fn generate(&self, input: &AlignedInput, request: &GenerationRequest) -> Result<TokenMatrix>;
}

/// Parameters of a single generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub strategy: DecodingStrategy,
    /// Prompt width plus the response length cap
    pub max_length: usize,
    pub temperature: f32,
    pub top_k: Option<usize>,
    pub repetition_penalty: f32,
    pub num_return_sequences: usize,
    pub pad_token_id: u32,
    /// RNG seed for sampling strategies; `None` for greedy
    pub seed: Option<u64>,
}

impl GenerationRequest {
    /// Nucleus threshold as used by the sampler (`0.0` for greedy)
    pub fn top_p(&self) -> f32 {
        self.strategy.threshold() as f32
    }
}

/// Raw token output with the shape the capability chose
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMatrix {
    shape: Vec<usize>,
    data: Vec<u32>,
}

impl TokenMatrix {
    pub fn new(shape: Vec<usize>, data: Vec<u32>) -> Self {
        Self { shape, data }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[u32] {
        &self.data
    }
}

/// Capability output that cannot be mapped onto the batch rows
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("shape {shape:?} does not match {len} elements")]
    DataLength { shape: Vec<usize>, len: usize },

    #[error("cannot read rows from shape {0:?}")]
    UnsupportedShape(Vec<usize>),

    #[error("expected {expected} rows, got {actual}")]
    RowCount { expected: usize, actual: usize },

    #[error("row {row} has {len} tokens, shorter than the prompt boundary {boundary}")]
    ShortRow {
        row: usize,
        len: usize,
        boundary: usize,
    },
}

/// Split a token matrix into `expected_rows` rows.
///
/// Accepts a squeezed single row `[L]`, the plain `[R, L]` layout, and the
/// 3-D layouts `[R, 1, L]` / `[1, R, L]` produced when one sequence per
/// input is requested.
pub fn normalize_rows(
    matrix: TokenMatrix,
    expected_rows: usize,
) -> Result<Vec<Vec<u32>>, ShapeError> {
    let TokenMatrix { shape, data } = matrix;

    let elements: usize = shape.iter().product();
    if elements != data.len() {
        return Err(ShapeError::DataLength {
            shape,
            len: data.len(),
        });
    }

    let (rows, width) = match shape.as_slice() {
        [len] => (1, *len),
        [rows, len] => (*rows, *len),
        [rows, 1, len] | [1, rows, len] => (*rows, *len),
        _ => return Err(ShapeError::UnsupportedShape(shape)),
    };

    if rows != expected_rows {
        return Err(ShapeError::RowCount {
            expected: expected_rows,
            actual: rows,
        });
    }

    if width == 0 {
        return Ok(vec![Vec::new(); rows]);
    }
    Ok(data.chunks(width).map(<[u32]>::to_vec).collect())
}

/// Generated rows for one batch, still including the prompt region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedRows {
    rows: Vec<Vec<u32>>,
    boundary_index: usize,
}

impl GeneratedRows {
    pub fn rows(&self) -> &[Vec<u32>] {
        &self.rows
    }

    pub fn boundary_index(&self) -> usize {
        self.boundary_index
    }

    /// Tokens after the prompt region of `row`
    pub fn continuation(&self, row: usize) -> &[u32] {
        &self.rows[row][self.boundary_index..]
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Mix a stream number into a base seed (splitmix64 finalizer)
pub fn derive_seed(base: u64, stream: u64) -> u64 {
    let mut z = base.wrapping_add(stream.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Runs decoding strategies against aligned batches
#[derive(Debug, Clone)]
pub struct StrategyRunner {
    length: usize,
    seed: u64,
}

impl StrategyRunner {
    /// `length` caps the generated tokens per row; `seed` drives sampling
    pub fn new(length: usize, seed: u64) -> Self {
        Self { length, seed }
    }

    /// Build the request for one call. `stream` distinguishes calls within
    /// a run so each (batch, strategy) pair samples independently.
    pub fn request(
        &self,
        input: &AlignedInput,
        strategy: DecodingStrategy,
        pad_token_id: u32,
        stream: u64,
    ) -> GenerationRequest {
        GenerationRequest {
            strategy,
            max_length: self.length + input.boundary_index(),
            temperature: 1.0,
            top_k: None,
            repetition_penalty: 1.0,
            num_return_sequences: 1,
            pad_token_id,
            seed: (!strategy.is_greedy()).then(|| derive_seed(self.seed, stream)),
        }
    }

    /// Invoke the capability once and normalize its output
    pub fn run<G: Generator + ?Sized>(
        &self,
        generator: &G,
        input: &AlignedInput,
        strategy: DecodingStrategy,
        stream: u64,
    ) -> Result<GeneratedRows> {
        let pad_token_id = generator.tokenizer().pad_token_id();
        let request = self.request(input, strategy, pad_token_id, stream);

        tracing::debug!(
            %strategy,
            rows = input.num_rows(),
            max_length = request.max_length,
            "Running strategy"
        );

        let matrix = generator.generate(input, &request)?;
        let rows = normalize_rows(matrix, input.num_rows())?;

        let boundary = input.boundary_index();
        if let Some((row, r)) = rows.iter().enumerate().find(|(_, r)| r.len() < boundary) {
            return Err(ShapeError::ShortRow {
                row,
                len: r.len(),
                boundary,
            }
            .into());
        }

        Ok(GeneratedRows {
            rows,
            boundary_index: boundary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::mock::{MockGenerator, OutputLayout};

    fn aligned() -> AlignedInput {
        AlignedInput::from_rows(&[vec![104, 105], vec![121, 111, 117]], 0)
    }

    #[test]
    fn test_request_fixed_parameters() {
        let runner = StrategyRunner::new(20, 42);
        let input = aligned();

        let greedy = runner.request(&input, DecodingStrategy::Greedy, 0, 3);
        assert_eq!(greedy.max_length, 23);
        assert_eq!(greedy.temperature, 1.0);
        assert_eq!(greedy.top_k, None);
        assert_eq!(greedy.repetition_penalty, 1.0);
        assert_eq!(greedy.num_return_sequences, 1);
        assert_eq!(greedy.seed, None);

        let nucleus = runner.request(&input, DecodingStrategy::Nucleus { top_p: 0.9 }, 0, 3);
        assert!(nucleus.seed.is_some());
        assert!((nucleus.top_p() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_seeds_differ_per_stream() {
        assert_ne!(derive_seed(42, 0), derive_seed(42, 1));
        assert_eq!(derive_seed(42, 5), derive_seed(42, 5));
        assert_ne!(derive_seed(1, 0), derive_seed(2, 0));
    }

    #[test]
    fn test_normalize_plain_rows() {
        let rows = normalize_rows(TokenMatrix::new(vec![2, 3], vec![1, 2, 3, 4, 5, 6]), 2).unwrap();
        assert_eq!(rows, vec![vec![1, 2, 3], vec![4, 5, 6]]);
    }

    #[test]
    fn test_normalize_squeezed_single_row() {
        let rows = normalize_rows(TokenMatrix::new(vec![4], vec![1, 2, 3, 4]), 1).unwrap();
        assert_eq!(rows, vec![vec![1, 2, 3, 4]]);
    }

    #[test]
    fn test_normalize_extra_dimension() {
        let data = vec![1, 2, 3, 4];
        let a = normalize_rows(TokenMatrix::new(vec![2, 1, 2], data.clone()), 2).unwrap();
        let b = normalize_rows(TokenMatrix::new(vec![1, 2, 2], data), 2).unwrap();
        assert_eq!(a, vec![vec![1, 2], vec![3, 4]]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalize_rejects_bad_shapes() {
        assert_eq!(
            normalize_rows(TokenMatrix::new(vec![3, 2], vec![1, 2, 3, 4, 5, 6]), 2),
            Err(ShapeError::RowCount {
                expected: 2,
                actual: 3
            })
        );
        assert!(matches!(
            normalize_rows(TokenMatrix::new(vec![2, 2], vec![1, 2, 3]), 2),
            Err(ShapeError::DataLength { .. })
        ));
        assert!(matches!(
            normalize_rows(TokenMatrix::new(vec![2, 2, 2], vec![0; 8]), 2),
            Err(ShapeError::UnsupportedShape(_))
        ));
        assert!(matches!(
            normalize_rows(TokenMatrix::new(vec![4], vec![1, 2, 3, 4]), 2),
            Err(ShapeError::RowCount { .. })
        ));
    }

    #[test]
    fn test_run_keeps_prompt_region_width() {
        let generator = MockGenerator::new();
        let runner = StrategyRunner::new(5, 42);
        let input = aligned();

        let rows = runner
            .run(&generator, &input, DecodingStrategy::Greedy, 0)
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows.boundary_index(), 3);
        for (i, row) in rows.rows().iter().enumerate() {
            assert_eq!(&row[..3], input.row(i));
            assert_eq!(rows.continuation(i).len(), 5);
        }
    }

    #[test]
    fn test_run_normalizes_squeezed_output() {
        let generator = MockGenerator::new().with_layout(OutputLayout::Squeezed);
        let input = AlignedInput::from_rows(&[vec![104, 105]], 0);

        let rows = StrategyRunner::new(4, 42)
            .run(&generator, &input, DecodingStrategy::Greedy, 0)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.continuation(0).len(), 4);
    }

    #[test]
    fn test_run_flattens_nested_output() {
        let plain = MockGenerator::new();
        let nested = MockGenerator::new().with_layout(OutputLayout::Nested);
        let runner = StrategyRunner::new(5, 42);
        let input = aligned();
        let strategy = DecodingStrategy::Nucleus { top_p: 0.7 };

        let expected = runner.run(&plain, &input, strategy, 3).unwrap();
        let rows = runner.run(&nested, &input, strategy, 3).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows.boundary_index(), 3);
        assert_eq!(rows, expected);
    }

    #[test]
    fn test_run_rejects_missing_rows() {
        let generator = MockGenerator::new().with_layout(OutputLayout::DropLastRow);
        let err = StrategyRunner::new(4, 42)
            .run(&generator, &aligned(), DecodingStrategy::Greedy, 0)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ShapeError>(),
            Some(&ShapeError::RowCount {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_greedy_is_deterministic() {
        let generator = MockGenerator::new();
        let runner = StrategyRunner::new(8, 42);
        let input = aligned();

        let first = runner.run(&generator, &input, DecodingStrategy::Greedy, 0).unwrap();
        let second = runner.run(&generator, &input, DecodingStrategy::Greedy, 9).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_nucleus_reproducible_for_same_stream() {
        let generator = MockGenerator::new();
        let runner = StrategyRunner::new(8, 42);
        let input = aligned();
        let strategy = DecodingStrategy::Nucleus { top_p: 0.9 };

        let first = runner.run(&generator, &input, strategy, 1).unwrap();
        let second = runner.run(&generator, &input, strategy, 1).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_generator_error_propagates() {
        let generator = MockGenerator::new().failing_after(0);
        let result =
            StrategyRunner::new(4, 42).run(&generator, &aligned(), DecodingStrategy::Greedy, 0);
        assert!(result.is_err());
    }
}
