//! In-memory tokenizer and generator for pipeline tests

use std::cell::Cell;

use anyhow::{anyhow, bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::aligner::AlignedInput;
use super::runner::{derive_seed, GenerationRequest, Generator, TokenMatrix};
use crate::tokenizer::TokenizerTrait;

const EOS: u32 = 256;

/// One token per byte, plus EOS
pub struct ByteTokenizer {
    fail_on: Option<String>,
}

impl ByteTokenizer {
    pub fn new() -> Self {
        Self { fail_on: None }
    }

    /// Fail to encode any text containing `needle`
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }
}

impl TokenizerTrait for ByteTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        if let Some(needle) = &self.fail_on {
            if text.contains(needle.as_str()) {
                bail!("refusing to encode {:?}", text);
            }
        }
        Ok(text.bytes().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let mut out = String::new();
        for &id in ids {
            match id {
                EOS => out.push_str("<|endoftext|>"),
                b if b < 256 => out.push(char::from(b as u8)),
                other => return Err(anyhow!("unknown token {}", other)),
            }
        }
        Ok(out)
    }

    fn is_eos(&self, token_id: u32) -> bool {
        token_id == EOS
    }

    fn vocab_size(&self) -> usize {
        257
    }

    fn eos_token_id(&self) -> u32 {
        EOS
    }
}

/// How the mock shapes its output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    /// `[R, L]`
    Plain,
    /// `[L]` when there is a single row
    Squeezed,
    /// `[R, 1, L]`
    Nested,
    /// `[R - 1, L]`
    DropLastRow,
}

/// Emits uppercase letters after each prompt: a function of the prompt for
/// greedy requests, seeded draws for sampling requests.
pub struct MockGenerator {
    tokenizer: ByteTokenizer,
    layout: OutputLayout,
    fail_after: Option<usize>,
    calls: Cell<usize>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            tokenizer: ByteTokenizer::new(),
            layout: OutputLayout::Plain,
            fail_after: None,
            calls: Cell::new(0),
        }
    }

    pub fn with_layout(mut self, layout: OutputLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Succeed `calls` times, then fail every call
    pub fn failing_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Generator for MockGenerator {
    fn tokenizer(&self) -> &dyn TokenizerTrait {
        &self.tokenizer
    }

    fn generate(&self, input: &AlignedInput, request: &GenerationRequest) -> Result<TokenMatrix> {
        let call = self.calls.get();
        self.calls.set(call + 1);
        if self.fail_after.is_some_and(|limit| call >= limit) {
            bail!("mock generation failure on call {}", call);
        }

        let new_tokens = request.max_length - input.boundary_index();
        let mut rows = Vec::with_capacity(input.num_rows());
        for row in 0..input.num_rows() {
            let mut tokens = input.row(row).to_vec();
            match request.seed {
                None => {
                    let base: u32 = input.prompt_tokens(row).iter().sum();
                    tokens.extend((0..new_tokens as u32).map(|k| 65 + (base + k) % 26));
                }
                Some(seed) => {
                    let mut rng = StdRng::seed_from_u64(derive_seed(seed, row as u64));
                    tokens.extend((0..new_tokens).map(|_| rng.gen_range(65..91)));
                }
            }
            rows.push(tokens);
        }

        if self.layout == OutputLayout::DropLastRow {
            rows.pop();
        }

        let width = request.max_length;
        let shape = match self.layout {
            OutputLayout::Squeezed if rows.len() == 1 => vec![width],
            OutputLayout::Nested => vec![rows.len(), 1, width],
            _ => vec![rows.len(), width],
        };
        Ok(TokenMatrix::new(shape, rows.concat()))
    }
}
