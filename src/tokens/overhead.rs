//! Per-model message framing overhead.
//!
//! Lookup is an explicit two-step resolution: the exact model string first,
//! then a family prefix that maps a moving alias or an unlisted dated variant
//! onto a pinned snapshot. The family step never chains, so resolution always
//! terminates after at most two lookups.

use crate::error::RelayError;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Fixed framing cost of a chat message for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenOverhead {
    /// Tokens added for every message (`<|start|>{role}\n{content}<|end|>\n`)
    pub tokens_per_message: i64,
    /// Tokens added when a message carries a name
    pub tokens_per_name: i64,
}

impl TokenOverhead {
    /// Creates a new overhead entry.
    #[must_use]
    pub const fn new(tokens_per_message: i64, tokens_per_name: i64) -> Self {
        Self {
            tokens_per_message,
            tokens_per_name,
        }
    }
}

/// Snapshots with `<|start|>{role}\n{content}<|end|>\n` framing.
const STANDARD: TokenOverhead = TokenOverhead::new(3, 1);

/// The `-0301` snapshot: role is omitted when a name is given.
const LEGACY_0301: TokenOverhead = TokenOverhead::new(4, -1);

const EXACT_MODELS: &[(&str, TokenOverhead)] = &[
    ("gpt-3.5-turbo", STANDARD),
    ("gpt-4", STANDARD),
    ("gpt-3.5-turbo-0613", STANDARD),
    ("gpt-3.5-turbo-16k-0613", STANDARD),
    ("gpt-4-0314", STANDARD),
    ("gpt-4-32k-0314", STANDARD),
    ("gpt-4-0613", STANDARD),
    ("gpt-4-32k-0613", STANDARD),
    ("gpt-3.5-turbo-0301", LEGACY_0301),
];

/// Family substring and the pinned snapshot it is counted as. Order matters.
const MODEL_FAMILIES: &[(&str, &str)] = &[
    ("gpt-3.5-turbo", "gpt-3.5-turbo-0613"),
    ("gpt-4", "gpt-4-0613"),
];

/// Outcome of resolving a model against the overhead table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOverhead {
    /// The model whose overhead and encoding are used for counting
    pub model: String,
    /// The framing overhead for `model`
    pub overhead: TokenOverhead,
    /// The requested model, when resolution went through a family fallback
    pub fallback_from: Option<String>,
}

impl ResolvedOverhead {
    /// Returns true if the exact model was unknown and a family was assumed.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.fallback_from.is_some()
    }
}

/// Read-only model → overhead table.
#[derive(Debug, Clone)]
pub struct OverheadTable {
    exact: HashMap<&'static str, TokenOverhead>,
    families: Vec<(&'static str, &'static str)>,
}

impl OverheadTable {
    /// Builds the standard table of supported chat models.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            exact: EXACT_MODELS.iter().copied().collect(),
            families: MODEL_FAMILIES.to_vec(),
        }
    }

    /// Returns the process-wide standard table, built on first use.
    #[must_use]
    pub fn shared() -> &'static OverheadTable {
        static TABLE: OnceLock<OverheadTable> = OnceLock::new();
        TABLE.get_or_init(Self::standard)
    }

    /// Looks up the exact model string only.
    #[must_use]
    pub fn exact(&self, model: &str) -> Option<TokenOverhead> {
        self.exact.get(model).copied()
    }

    /// Resolves a model to its overhead, falling back to a family snapshot.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedModel` if the model is neither listed nor part of
    /// a known family.
    pub fn resolve(&self, model: &str) -> Result<ResolvedOverhead, RelayError> {
        if let Some(overhead) = self.exact(model) {
            return Ok(ResolvedOverhead {
                model: model.to_string(),
                overhead,
                fallback_from: None,
            });
        }

        let (_, snapshot) = self
            .families
            .iter()
            .find(|(family, _)| model.contains(family))
            .ok_or_else(|| RelayError::unsupported_model(model))?;

        let overhead = self
            .exact(snapshot)
            .ok_or_else(|| RelayError::unsupported_model(model))?;

        Ok(ResolvedOverhead {
            model: (*snapshot).to_string(),
            overhead,
            fallback_from: Some(model.to_string()),
        })
    }
}

impl Default for OverheadTable {
    fn default() -> Self {
        Self::standard()
    }
}
