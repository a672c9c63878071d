//! Token accounting.
//!
//! Exact chat-format token counts for byte-pair tokenized models, following
//! the framing rules published in the OpenAI cookbook: a fixed per-message
//! overhead, the encoded role and content, an optional name adjustment, and
//! three tokens priming the assistant reply.

mod accountant;
mod overhead;
mod tokenizer;

pub use accountant::{
    completion_usage_suffix, stream_usage_suffix, TokenAccountant, REPLY_PRIMING_TOKENS,
};
pub use overhead::{OverheadTable, ResolvedOverhead, TokenOverhead};
pub use tokenizer::{TiktokenTokenizer, Tokenizer};
