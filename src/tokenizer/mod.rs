//! Tokenizers
//!
//! Three backends share one trait:
//! - [`HfTokenizer`] reads a Hugging Face `tokenizer.json` (byte-level BPE
//!   and SentencePiece vocabularies)
//! - [`GgufVocab`] uses the vocabulary embedded in a GGUF file
//! - [`Tokenizer`] wraps a splintr pretrained vocabulary picked by size

mod gguf;
mod hf;

pub use gguf::GgufVocab;
pub use hf::HfTokenizer;

use anyhow::{anyhow, Result};

/// Encoding and decoding as seen by the pipeline
pub trait TokenizerTrait: Send + Sync {
    /// Encode text to token IDs
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode token IDs to text, special tokens included
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Check if a token is the EOS token
    fn is_eos(&self, token_id: u32) -> bool;

    fn vocab_size(&self) -> usize;

    fn eos_token_id(&self) -> u32;

    /// Token used to pad short rows. Vocabularies without a dedicated pad
    /// token reuse EOS.
    fn pad_token_id(&self) -> u32 {
        self.eos_token_id()
    }
}

/// Boxed tokenizer type for use in executors
pub type BoxedTokenizer = Box<dyn TokenizerTrait>;

/// Splintr pretrained vocabulary.
///
/// Used when a model ships neither `tokenizer.json` nor an embedded vocab;
/// the vocabulary is then guessed from the model's vocab size. Supported
/// names: `cl100k_base`, `o200k_base`, `llama3`, `deepseek_v3`, `mistral`.
pub struct Tokenizer {
    inner: splintr::Tokenizer,
    eos_token_id: u32,
    bos_token_id: Option<u32>,
    vocab_name: String,
}

impl Tokenizer {
    pub fn from_pretrained(name: &str) -> Result<Self> {
        let inner = splintr::from_pretrained(name)
            .map_err(|e| anyhow!("Failed to create tokenizer '{}': {}", name, e))?;

        Ok(Self {
            inner,
            eos_token_id: splintr::eos_token_id_by_name(name),
            bos_token_id: splintr::bos_token_id_by_name(name),
            vocab_name: name.to_string(),
        })
    }

    /// Pick the pretrained vocabulary closest to `vocab_size`
    pub fn from_vocab_size(vocab_size: usize) -> Result<Self> {
        let vocab_name = match vocab_size {
            v if v <= 32100 => "mistral",
            v if v <= 100350 => "cl100k_base",
            v if v <= 128400 => "llama3",
            v if v <= 129000 => "deepseek_v3",
            v if v <= 200100 => "o200k_base",
            _ => "llama3",
        };
        tracing::warn!(
            "No tokenizer file found, using splintr '{}' for vocab size {}",
            vocab_name,
            vocab_size
        );

        Self::from_pretrained(vocab_name)
    }

    pub fn vocab_name(&self) -> &str {
        &self.vocab_name
    }
}

impl TokenizerTrait for Tokenizer {
    /// Prepends BOS when the vocabulary defines one
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut tokens: Vec<u32> = self.bos_token_id.into_iter().collect();
        tokens.extend(self.inner.encode_with_special(text));
        Ok(tokens)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids)
            .map_err(|e| anyhow!("Decode error: {}", e))
    }

    fn is_eos(&self, token_id: u32) -> bool {
        token_id == self.eos_token_id
    }

    fn vocab_size(&self) -> usize {
        self.inner.vocab_size()
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }
}
