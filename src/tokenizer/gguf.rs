//! Vocabulary embedded in a GGUF file

use anyhow::{anyhow, Result};

use boostr::format::gguf_tokenizer::GgufTokenizer;
use boostr::format::Gguf;

use super::TokenizerTrait;

/// boostr's GGUF tokenizer plus the special ids read from the file's
/// `tokenizer.ggml.*` metadata
pub struct GgufVocab {
    inner: GgufTokenizer,
    eos_token_id: u32,
    pad_token_id: u32,
    vocab_size: usize,
}

impl GgufVocab {
    pub fn from_gguf(gguf: &Gguf) -> Result<Self> {
        let inner = GgufTokenizer::from_gguf(gguf)
            .map_err(|e| anyhow!("Failed to build GGUF tokenizer: {}", e))?;

        let metadata = gguf.metadata();
        let vocab_size = metadata
            .get_array("tokenizer.ggml.tokens")
            .map(|tokens| tokens.len())
            .ok_or_else(|| anyhow!("GGUF missing tokenizer.ggml.tokens"))?;
        let (eos_token_id, pad_token_id) = special_ids(
            metadata.get_u32("tokenizer.ggml.eos_token_id"),
            metadata.get_u32("tokenizer.ggml.padding_token_id"),
            vocab_size,
        )?;

        tracing::debug!(eos_token_id, pad_token_id, vocab_size, "GGUF vocabulary");
        Ok(Self {
            inner,
            eos_token_id,
            pad_token_id,
            vocab_size,
        })
    }
}

/// EOS and pad ids from metadata values. EOS is required; a missing or
/// out-of-range pad id falls back to EOS.
fn special_ids(eos: Option<u32>, pad: Option<u32>, vocab_size: usize) -> Result<(u32, u32)> {
    let eos = eos.ok_or_else(|| anyhow!("GGUF missing tokenizer.ggml.eos_token_id"))?;
    if eos as usize >= vocab_size {
        return Err(anyhow!(
            "GGUF eos_token_id {} outside vocabulary of {}",
            eos,
            vocab_size
        ));
    }
    let pad = pad.filter(|&id| (id as usize) < vocab_size).unwrap_or(eos);
    Ok((eos, pad))
}

impl TokenizerTrait for GgufVocab {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(self.inner.encode(text))
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner.decode(ids).map_err(|e| anyhow!("{e}"))
    }

    fn is_eos(&self, token_id: u32) -> bool {
        token_id == self.eos_token_id
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }
}
