//! Error types for input validation.

use thiserror::Error;

/// Why a raw input line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Line is empty or whitespace only.
    #[error("empty {kind}")]
    Empty {
        /// "DOI" or "title", for display.
        kind: &'static str,
    },

    /// Line does not look like a DOI.
    #[error("invalid DOI format: {value}\n  Suggestion: DOIs look like 10.1234/suffix")]
    InvalidDoi {
        /// The trimmed line.
        value: String,
    },

    /// Title is below the minimum length.
    #[error("title too short (min {min} chars): {preview}")]
    TitleTooShort {
        /// First 50 characters of the trimmed title.
        preview: String,
        /// Minimum accepted length.
        min: usize,
    },
}

impl ValidationError {
    /// Creates an `InvalidDoi` error.
    #[must_use]
    pub fn invalid_doi(value: &str) -> Self {
        Self::InvalidDoi {
            value: value.to_string(),
        }
    }

    /// Creates a `TitleTooShort` error with a bounded preview.
    #[must_use]
    pub fn title_too_short(title: &str, min: usize) -> Self {
        Self::TitleTooShort {
            preview: title.chars().take(50).collect(),
            min,
        }
    }
}
