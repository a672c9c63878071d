//! Sampling-mode presets.

use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named preset selecting the sampling temperature.
///
/// Each mode maps to exactly one fixed temperature; nothing else in a
/// request can change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// Near-deterministic answers (0.1)
    Fresh,
    /// Slightly varied answers (0.4)
    Warmth,
    /// Default trade-off (0.7)
    #[default]
    Balance,
    /// Most varied answers (1.0)
    Creativity,
}

impl SamplingMode {
    /// All modes in menu order.
    pub const ALL: [SamplingMode; 4] = [
        SamplingMode::Fresh,
        SamplingMode::Warmth,
        SamplingMode::Balance,
        SamplingMode::Creativity,
    ];

    /// Returns the sampling temperature for this mode.
    #[must_use]
    pub const fn temperature(self) -> f32 {
        match self {
            Self::Fresh => 0.1,
            Self::Warmth => 0.4,
            Self::Balance => 0.7,
            Self::Creativity => 1.0,
        }
    }

    /// Returns the label shown to chat users.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Fresh => "清新",
            Self::Warmth => "温暖",
            Self::Balance => "平衡",
            Self::Creativity => "创意",
        }
    }

    /// Returns the English name of this mode.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Warmth => "warmth",
            Self::Balance => "balance",
            Self::Creativity => "creativity",
        }
    }

    /// Looks a mode up by its chat label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.label() == label.trim())
    }

    /// Returns every chat label in menu order.
    #[must_use]
    pub fn labels() -> Vec<&'static str> {
        Self::ALL.iter().map(|mode| mode.label()).collect()
    }
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SamplingMode {
    type Err = RelayError;

    /// Accepts English names (case-insensitive) or chat labels.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(trimmed))
            .or_else(|| Self::from_label(trimmed))
            .ok_or_else(|| {
                RelayError::config(
                    "mode",
                    format!("unknown sampling mode '{}'; expected one of fresh, warmth, balance, creativity", s),
                )
            })
    }
}
