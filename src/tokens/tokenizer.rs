//! Tokenizer boundary.
//!
//! The accountant only needs `encode(text, model)`. The production
//! implementation is backed by `tiktoken-rs`. BPE tables are loaded once per
//! encoding (every chat model shares `cl100k_base`) and kept for the life of
//! the process. Loading a table is CPU-bound; async callers go through
//! [`TokenAccountant::spawn_count`](crate::tokens::TokenAccountant::spawn_count).

use crate::error::RelayError;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tiktoken_rs::tokenizer::{get_tokenizer, Tokenizer as Encoding};
use tiktoken_rs::CoreBPE;

/// Encodes text into model-specific token ids.
pub trait Tokenizer: Send + Sync + fmt::Debug {
    /// Encodes `text` with the tokenizer used by `model`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedModel` if no encoding is known for `model`.
    fn encode(&self, text: &str, model: &str) -> Result<Vec<u32>, RelayError>;

    /// Returns the number of tokens `text` encodes to.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedModel` if no encoding is known for `model`.
    fn count(&self, text: &str, model: &str) -> Result<usize, RelayError> {
        self.encode(text, model).map(|ids| ids.len())
    }
}

type BpeCache = Mutex<HashMap<Encoding, Arc<CoreBPE>>>;

fn bpe_cache() -> &'static BpeCache {
    static CACHE: OnceLock<BpeCache> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Tokenizer backed by tiktoken's published BPE ranks.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiktokenTokenizer;

impl TiktokenTokenizer {
    /// Creates a tokenizer handle. All handles share one BPE cache.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn bpe_for(model: &str) -> Result<Arc<CoreBPE>, RelayError> {
        let encoding = get_tokenizer(model).ok_or_else(|| {
            tracing::warn!(model = %model, "No tokenizer encoding for model");
            RelayError::unsupported_model(model)
        })?;

        let mut cache = bpe_cache().lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bpe) = cache.get(&encoding) {
            return Ok(Arc::clone(bpe));
        }

        let bpe = tiktoken_rs::get_bpe_from_tokenizer(encoding).map_err(|e| {
            tracing::warn!(model = %model, encoding = ?encoding, error = %e, "Failed to load tokenizer encoding");
            RelayError::unsupported_model(model)
        })?;
        tracing::debug!(encoding = ?encoding, "Loaded tokenizer encoding");

        let bpe = Arc::new(bpe);
        cache.insert(encoding, Arc::clone(&bpe));
        Ok(bpe)
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str, model: &str) -> Result<Vec<u32>, RelayError> {
        let bpe = Self::bpe_for(model)?;
        Ok(bpe
            .encode_ordinary(text)
            .into_iter()
            .map(|rank| rank as u32)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_has_no_tokens() {
        let tokenizer = TiktokenTokenizer::new();
        assert_eq!(tokenizer.count("", "gpt-4-0613").unwrap(), 0);
    }

    #[test]
    fn common_words_are_single_tokens() {
        let tokenizer = TiktokenTokenizer::new();
        assert_eq!(tokenizer.count("user", "gpt-4-0613").unwrap(), 1);
        assert_eq!(tokenizer.count("hello", "gpt-4-0613").unwrap(), 1);
    }

    #[test]
    fn encoding_is_deterministic() {
        let tokenizer = TiktokenTokenizer::new();
        let first = tokenizer.encode("tokens are not characters", "gpt-3.5-turbo-0613");
        let second = tokenizer.encode("tokens are not characters", "gpt-3.5-turbo-0613");
        assert_eq!(first.unwrap(), second.unwrap());
    }

    #[test]
    fn chat_models_share_one_encoding_table() {
        let alias = TiktokenTokenizer::bpe_for("gpt-3.5-turbo").unwrap();
        let snapshot = TiktokenTokenizer::bpe_for("gpt-3.5-turbo-0613").unwrap();
        let gpt_4 = TiktokenTokenizer::bpe_for("gpt-4-0613").unwrap();

        assert!(Arc::ptr_eq(&alias, &snapshot));
        assert!(Arc::ptr_eq(&alias, &gpt_4));
    }

    #[test]
    fn unknown_model_has_no_encoding() {
        let error = TiktokenTokenizer::new()
            .encode("hello", "not-a-real-model")
            .unwrap_err();
        assert!(error.is_unsupported_model());
    }
}
