//! Left-padded batch encoding

use thiserror::Error;

use super::batcher::Batch;
use crate::tokenizer::TokenizerTrait;

/// Batch encoding failures. Any failure fails the whole batch.
#[derive(Debug, Error)]
pub enum AlignError {
    #[error("cannot align an empty batch")]
    EmptyBatch,

    #[error("failed to encode prompt {original_index}: {reason}")]
    Encode {
        original_index: usize,
        reason: String,
    },
}

/// Rectangular, left-padded token matrix for one batch.
///
/// Every row is `boundary_index` tokens wide, so generated tokens start at
/// the same column for all rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedInput {
    input_ids: Vec<u32>,
    attention_mask: Vec<u8>,
    num_rows: usize,
    boundary_index: usize,
}

impl AlignedInput {
    /// Left-pad `rows` to a common width
    pub fn from_rows(rows: &[Vec<u32>], pad_token_id: u32) -> Self {
        let boundary_index = rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut input_ids = Vec::with_capacity(rows.len() * boundary_index);
        let mut attention_mask = Vec::with_capacity(rows.len() * boundary_index);

        for row in rows {
            let padding = boundary_index - row.len();
            input_ids.extend(std::iter::repeat(pad_token_id).take(padding));
            input_ids.extend_from_slice(row);
            attention_mask.extend(std::iter::repeat(0u8).take(padding));
            attention_mask.extend(std::iter::repeat(1u8).take(row.len()));
        }

        Self {
            input_ids,
            attention_mask,
            num_rows: rows.len(),
            boundary_index,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Row width; the first column after which generated tokens begin
    pub fn boundary_index(&self) -> usize {
        self.boundary_index
    }

    /// Token ids of one row, padding included
    pub fn row(&self, row: usize) -> &[u32] {
        let start = row * self.boundary_index;
        &self.input_ids[start..start + self.boundary_index]
    }

    /// Validity mask of one row (1 = real token, 0 = padding)
    pub fn mask_row(&self, row: usize) -> &[u8] {
        let start = row * self.boundary_index;
        &self.attention_mask[start..start + self.boundary_index]
    }

    /// Number of padding tokens before the prompt in `row`
    pub fn padding_len(&self, row: usize) -> usize {
        self.mask_row(row).iter().take_while(|&&m| m == 0).count()
    }

    /// The real prompt tokens of `row`
    pub fn prompt_tokens(&self, row: usize) -> &[u32] {
        &self.row(row)[self.padding_len(row)..]
    }

    /// Flat row-major token ids
    pub fn input_ids(&self) -> &[u32] {
        &self.input_ids
    }

    /// Flat row-major validity mask
    pub fn attention_mask(&self) -> &[u8] {
        &self.attention_mask
    }
}

/// Encodes batches into `AlignedInput`
pub struct InputAligner<'t> {
    tokenizer: &'t dyn TokenizerTrait,
}

impl<'t> InputAligner<'t> {
    pub fn new(tokenizer: &'t dyn TokenizerTrait) -> Self {
        Self { tokenizer }
    }

    pub fn align(&self, batch: &Batch) -> Result<AlignedInput, AlignError> {
        if batch.is_empty() {
            return Err(AlignError::EmptyBatch);
        }

        let rows = batch
            .prompts()
            .iter()
            .map(|prompt| {
                self.tokenizer
                    .encode(prompt.text())
                    .map_err(|e| AlignError::Encode {
                        original_index: prompt.original_index(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let aligned = AlignedInput::from_rows(&rows, self.tokenizer.pad_token_id());
        tracing::debug!(
            rows = aligned.num_rows(),
            boundary = aligned.boundary_index(),
            "Aligned batch"
        );
        Ok(aligned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::batcher::Batcher;
    use crate::pipeline::mock::ByteTokenizer;
    use crate::pipeline::prompt::prompts_from_lines;

    #[test]
    fn test_left_padding_shares_boundary() {
        let aligned = AlignedInput::from_rows(&[vec![5, 6, 7], vec![9]], 0);

        assert_eq!(aligned.boundary_index(), 3);
        assert_eq!(aligned.row(0), &[5, 6, 7]);
        assert_eq!(aligned.row(1), &[0, 0, 9]);
        assert_eq!(aligned.mask_row(1), &[0, 0, 1]);
        assert_eq!(aligned.prompt_tokens(1), &[9]);
        assert_eq!(aligned.padding_len(0), 0);
    }

    #[test]
    fn test_every_row_is_boundary_wide() {
        let tokenizer = ByteTokenizer::new();
        let prompts = prompts_from_lines(["a", "a longer prompt", "mid size"], "");
        let plan = Batcher::new(3).unwrap().plan(&prompts);

        let aligned = InputAligner::new(&tokenizer)
            .align(&plan.batches()[0])
            .unwrap();

        assert_eq!(aligned.boundary_index(), "a longer prompt".len());
        for row in 0..aligned.num_rows() {
            assert_eq!(aligned.row(row).len(), aligned.boundary_index());
            assert_eq!(aligned.mask_row(row).len(), aligned.boundary_index());
        }
        assert_eq!(aligned.prompt_tokens(0), &[u32::from(b'a')]);
        assert!(aligned.row(0)[..aligned.padding_len(0)]
            .iter()
            .all(|&t| t == tokenizer.pad_token_id()));
    }

    #[test]
    fn test_encoding_failure_fails_batch() {
        let tokenizer = ByteTokenizer::new().failing_on("bad");
        let prompts = prompts_from_lines(["fine", "bad prompt"], "");
        let plan = Batcher::new(2).unwrap().plan(&prompts);

        let err = InputAligner::new(&tokenizer)
            .align(&plan.batches()[0])
            .unwrap_err();
        assert!(matches!(err, AlignError::Encode { original_index: 1, .. }));
    }
}
