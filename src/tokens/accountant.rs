//! Chat-format token counting.

use crate::error::RelayError;
use crate::messages::Message;
use crate::tokens::overhead::OverheadTable;
use crate::tokens::tokenizer::{TiktokenTokenizer, Tokenizer};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Every reply is primed with `<|start|>assistant<|message|>`.
pub const REPLY_PRIMING_TOKENS: i64 = 3;

/// Model used to encode standalone message content (`cl100k_base`).
const BASE_ENCODING_MODEL: &str = "gpt-3.5-turbo";

/// Suffix appended to each streamed fragment.
#[must_use]
pub fn stream_usage_suffix(tokens: usize) -> String {
    format!(" ({} tokens)", tokens)
}

/// Suffix appended to a blocking completion's reply.
#[must_use]
pub fn completion_usage_suffix(tokens: usize) -> String {
    format!(" ({} tokens used)", tokens)
}

/// Computes the exact prompt token count of a conversation.
///
/// The accountant is stateless: the overhead table is read-only and the
/// tokenizer caches are append-only, so one instance can be shared by any
/// number of concurrent calls.
#[derive(Debug, Clone)]
pub struct TokenAccountant {
    table: &'static OverheadTable,
    tokenizer: Arc<dyn Tokenizer>,
}

impl TokenAccountant {
    /// Creates an accountant over the given table and tokenizer.
    #[must_use]
    pub fn new(table: &'static OverheadTable, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { table, tokenizer }
    }

    /// Replaces the tokenizer, keeping the overhead table.
    #[must_use]
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Returns the overhead table in use.
    #[must_use]
    pub fn table(&self) -> &'static OverheadTable {
        self.table
    }

    /// Counts the tokens `messages` consume when sent to `model`.
    ///
    /// An empty conversation costs exactly the reply priming (3 tokens).
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedModel` if the model has no overhead entry, is not
    /// part of a known family, or has no tokenizer encoding.
    pub fn count_tokens(&self, messages: &[Message], model: &str) -> Result<usize, RelayError> {
        let resolved = self.table.resolve(model)?;
        if let Some(ref requested) = resolved.fallback_from {
            tracing::warn!(
                model = %requested,
                assumed = %resolved.model,
                "Model may update over time; counting tokens as its pinned snapshot"
            );
        }

        let overhead = resolved.overhead;
        let encoding_model = resolved.model.as_str();
        let mut total: i64 = 0;

        for message in messages {
            total += overhead.tokens_per_message;
            total += self.encoded_len(&message.content, encoding_model)?;
            total += self.encoded_len(&message.role, encoding_model)?;

            if let Some(name) = message.name.as_deref().filter(|n| !n.is_empty()) {
                total += self.encoded_len(name, encoding_model)?;
                total += overhead.tokens_per_name;
            }
        }
        total += REPLY_PRIMING_TOKENS;

        tracing::trace!(
            model = %model,
            messages = messages.len(),
            tokens = total,
            "Counted conversation tokens"
        );

        // Name overhead is at least -1 and a non-empty name encodes to at
        // least one token, so no message lowers the running total.
        Ok(usize::try_from(total).unwrap_or_default())
    }

    /// Counts the tokens of a message's trimmed content with the base encoding.
    ///
    /// The base encoding is the chat models' `cl100k_base`, not the older
    /// GPT-3 `r50k_base`/`p50k_base` encodings. Lengths are comparable with
    /// [`count_tokens`](Self::count_tokens) but not with limits published
    /// for completion-era models.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedModel` if the base encoding cannot be loaded.
    pub fn content_length(&self, message: &Message) -> Result<usize, RelayError> {
        self.tokenizer
            .count(message.content.trim(), BASE_ENCODING_MODEL)
    }

    /// Counts tokens on the blocking thread pool.
    ///
    /// The first count for an encoding loads its BPE table, which is too
    /// slow to run on an async worker. The returned handle resolves to the
    /// same value as [`count_tokens`](Self::count_tokens).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_count(
        &self,
        messages: &[Message],
        model: &str,
    ) -> JoinHandle<Result<usize, RelayError>> {
        let accountant = self.clone();
        let messages = messages.to_vec();
        let model = model.to_string();
        tokio::task::spawn_blocking(move || accountant.count_tokens(&messages, &model))
    }

    /// Formats the streaming usage suffix for a conversation.
    ///
    /// # Errors
    ///
    /// Propagates any error from [`count_tokens`](Self::count_tokens).
    pub fn stream_annotation(
        &self,
        messages: &[Message],
        model: &str,
    ) -> Result<String, RelayError> {
        self.count_tokens(messages, model).map(stream_usage_suffix)
    }

    /// Formats the blocking-completion usage suffix for a conversation.
    ///
    /// # Errors
    ///
    /// Propagates any error from [`count_tokens`](Self::count_tokens).
    pub fn completion_annotation(
        &self,
        messages: &[Message],
        model: &str,
    ) -> Result<String, RelayError> {
        self.count_tokens(messages, model)
            .map(completion_usage_suffix)
    }

    fn encoded_len(&self, text: &str, model: &str) -> Result<i64, RelayError> {
        let len = self.tokenizer.count(text, model)?;
        Ok(i64::try_from(len).unwrap_or(i64::MAX))
    }
}

impl Default for TokenAccountant {
    fn default() -> Self {
        Self::new(OverheadTable::shared(), Arc::new(TiktokenTokenizer::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Splits on whitespace so expected counts are easy to derive by hand.
    #[derive(Debug)]
    struct WordTokenizer;

    impl Tokenizer for WordTokenizer {
        fn encode(&self, text: &str, _model: &str) -> Result<Vec<u32>, RelayError> {
            Ok(text.split_whitespace().map(|w| w.len() as u32).collect())
        }
    }

    fn word_accountant() -> TokenAccountant {
        TokenAccountant::default().with_tokenizer(Arc::new(WordTokenizer))
    }

    #[test]
    fn empty_conversation_costs_priming_only() {
        let accountant = word_accountant();
        assert_eq!(accountant.count_tokens(&[], "gpt-4").unwrap(), 3);
    }

    #[test]
    fn standard_overhead_arithmetic() {
        let accountant = word_accountant();
        let messages = vec![Message::user("one two three")];

        // 3 per message + 3 content + 1 role + 3 priming
        assert_eq!(accountant.count_tokens(&messages, "gpt-4-0613").unwrap(), 10);
    }

    #[test]
    fn legacy_overhead_arithmetic() {
        let accountant = word_accountant();
        let messages = vec![Message::user("one two three")];

        // 4 per message + 3 content + 1 role + 3 priming
        assert_eq!(
            accountant
                .count_tokens(&messages, "gpt-3.5-turbo-0301")
                .unwrap(),
            11
        );
    }

    #[test]
    fn name_adds_its_length_and_per_name_overhead() {
        let accountant = word_accountant();
        let named = vec![Message::user("hi").with_name("alice")];
        let unnamed = vec![Message::user("hi")];

        let with_name = accountant.count_tokens(&named, "gpt-4-0613").unwrap();
        let without = accountant.count_tokens(&unnamed, "gpt-4-0613").unwrap();
        assert_eq!(with_name, without + 2);

        let legacy_named = accountant
            .count_tokens(&named, "gpt-3.5-turbo-0301")
            .unwrap();
        let legacy_unnamed = accountant
            .count_tokens(&unnamed, "gpt-3.5-turbo-0301")
            .unwrap();
        assert_eq!(legacy_named, legacy_unnamed);
    }

    #[test]
    fn empty_name_is_ignored() {
        let accountant = word_accountant();
        let named = vec![Message::user("hi").with_name("")];
        let unnamed = vec![Message::user("hi")];

        assert_eq!(
            accountant.count_tokens(&named, "gpt-4-0613").unwrap(),
            accountant.count_tokens(&unnamed, "gpt-4-0613").unwrap()
        );
    }

    #[test]
    fn count_is_monotonic_as_messages_are_appended() {
        let accountant = word_accountant();
        let mut messages = Vec::new();
        let mut previous = accountant.count_tokens(&messages, "gpt-4").unwrap();

        for text in ["", "a", "a b c", "", "last one"] {
            messages.push(Message::assistant(text));
            let current = accountant.count_tokens(&messages, "gpt-4").unwrap();
            assert!(current >= previous);
            assert!(current >= 3);
            previous = current;
        }
    }

    #[test]
    fn unknown_model_is_an_error_not_zero() {
        let accountant = word_accountant();
        let error = accountant
            .count_tokens(&[Message::user("hello")], "not-a-real-model")
            .unwrap_err();
        assert!(error.is_unsupported_model());
    }

    #[test]
    fn identical_inputs_yield_identical_counts() {
        let accountant = TokenAccountant::default();
        let messages = vec![
            Message::system("You are a helpful assistant."),
            Message::user("What is a token?"),
        ];

        let first = accountant.count_tokens(&messages, "gpt-3.5-turbo").unwrap();
        let second = accountant.count_tokens(&messages, "gpt-3.5-turbo").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn tiktoken_single_message_gpt_4() {
        let accountant = TokenAccountant::default();
        let messages = vec![Message::user("hello")];

        // 3 per message + "hello" (1) + "user" (1) + 3 priming
        assert_eq!(accountant.count_tokens(&messages, "gpt-4").unwrap(), 8);
        // 4 per message for the 0301 snapshot
        assert_eq!(
            accountant
                .count_tokens(&messages, "gpt-3.5-turbo-0301")
                .unwrap(),
            9
        );
    }

    #[test]
    fn content_length_trims_whitespace() {
        let accountant = TokenAccountant::default();
        let padded = Message::user("   hello   ");
        let bare = Message::user("hello");

        assert_eq!(
            accountant.content_length(&padded).unwrap(),
            accountant.content_length(&bare).unwrap()
        );
    }

    #[test]
    fn content_length_uses_the_chat_encoding() {
        let accountant = TokenAccountant::default();

        assert_eq!(BASE_ENCODING_MODEL, "gpt-3.5-turbo");
        assert_eq!(accountant.content_length(&Message::user("hello")).unwrap(), 1);
        assert_eq!(
            accountant
                .content_length(&Message::user("hello world"))
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn spawn_count_matches_inline_count() {
        let accountant = TokenAccountant::default();
        let messages = vec![
            Message::system("You are a helpful assistant."),
            Message::user("Count me off the async worker."),
        ];

        let inline = accountant.count_tokens(&messages, "gpt-4").unwrap();
        let spawned = accountant
            .spawn_count(&messages, "gpt-4")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inline, spawned);
    }

    #[tokio::test]
    async fn spawn_count_reports_unsupported_model() {
        let error = word_accountant()
            .spawn_count(&[Message::user("hi")], "llama3")
            .await
            .unwrap()
            .unwrap_err();
        assert!(error.is_unsupported_model());
    }

    #[test]
    fn annotations_use_distinct_wording() {
        let accountant = word_accountant();
        assert_eq!(accountant.stream_annotation(&[], "gpt-4").unwrap(), " (3 tokens)");
        assert_eq!(
            accountant.completion_annotation(&[], "gpt-4").unwrap(),
            " (3 tokens used)"
        );
    }
}
