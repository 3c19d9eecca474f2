//! Hugging Face `tokenizer.json` support

use std::path::Path;

use anyhow::{anyhow, Result};

use super::TokenizerTrait;

/// Names tried, in order, when looking for the end-of-text token
const EOS_CANDIDATES: &[&str] = &["<|endoftext|>", "</s>", "<eos>", "<|end_of_text|>"];

pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    eos_token_id: u32,
    pad_token_id: u32,
}

impl HfTokenizer {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| anyhow!("Failed to load tokenizer {}: {}", path.display(), e))?;

        let eos_token_id = EOS_CANDIDATES
            .iter()
            .find_map(|name| inner.token_to_id(name))
            .ok_or_else(|| {
                anyhow!(
                    "Tokenizer {} defines none of the end-of-text tokens {:?}",
                    path.display(),
                    EOS_CANDIDATES
                )
            })?;

        // Vocabularies without a padding token pad with EOS
        let pad_token_id = inner
            .get_padding()
            .map(|p| p.pad_id)
            .unwrap_or(eos_token_id);

        tracing::debug!(
            eos = eos_token_id,
            pad = pad_token_id,
            vocab = inner.get_vocab_size(true),
            "Loaded tokenizer.json"
        );

        Ok(Self {
            inner,
            eos_token_id,
            pad_token_id,
        })
    }
}

impl TokenizerTrait for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| anyhow!("Tokenizer encode error: {}", e))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, false)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))
    }

    fn is_eos(&self, token_id: u32) -> bool {
        token_id == self.eos_token_id
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORD_LEVEL: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [
    {"id": 0, "content": "<|endoftext|>", "single_word": false, "lstrip": false,
     "rstrip": false, "normalized": false, "special": true}
  ],
  "normalizer": null,
  "pre_tokenizer": {"type": "Whitespace"},
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {"<|endoftext|>": 0, "once": 1, "upon": 2, "a": 3, "time": 4, "[UNK]": 5},
    "unk_token": "[UNK]"
  }
}"#;

    fn write_tokenizer(json: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tokenizer.json"), json).unwrap();
        dir
    }

    #[test]
    fn test_eos_doubles_as_pad() {
        let dir = write_tokenizer(WORD_LEVEL);
        let tokenizer = HfTokenizer::from_file(dir.path().join("tokenizer.json")).unwrap();

        assert_eq!(tokenizer.eos_token_id(), 0);
        assert_eq!(tokenizer.pad_token_id(), 0);
        assert!(tokenizer.is_eos(0));
        assert_eq!(tokenizer.vocab_size(), 6);
    }

    #[test]
    fn test_encode_and_keep_special_tokens() {
        let dir = write_tokenizer(WORD_LEVEL);
        let tokenizer = HfTokenizer::from_file(dir.path().join("tokenizer.json")).unwrap();

        assert_eq!(tokenizer.encode("once upon a time").unwrap(), vec![1, 2, 3, 4]);

        let text = tokenizer.decode(&[4, 0]).unwrap();
        assert!(text.contains("time"));
        assert!(text.contains("<|endoftext|>"));
    }

    #[test]
    fn test_missing_eos_rejected() {
        let json = WORD_LEVEL.replace("<|endoftext|>", "<sep>");
        let dir = write_tokenizer(&json);
        assert!(HfTokenizer::from_file(dir.path().join("tokenizer.json")).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(HfTokenizer::from_file("/nonexistent/tokenizer.json").is_err());
    }
}
