use std::fmt;

use thiserror::Error;

use crate::types::{ContentKind, Provider};

/// Boxed source error carried by [`ConversionError::ConversionFailed`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Position of the offending element inside a conversation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    /// Index of the message in the sequence being converted
    pub message: Option<usize>,
    /// Index of the content block inside that message
    pub content: Option<usize>,
}

impl Location {
    /// Location that names no particular element
    pub const NONE: Self = Self {
        message: None,
        content: None,
    };

    /// Location of a whole message
    pub const fn message(index: usize) -> Self {
        Self {
            message: Some(index),
            content: None,
        }
    }

    /// Location of a single content block
    pub const fn content(message: usize, content: usize) -> Self {
        Self {
            message: Some(message),
            content: Some(content),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.message, self.content) {
            (Some(m), Some(c)) => write!(f, " at message {m}, content {c}"),
            (Some(m), None) => write!(f, " at message {m}"),
            (None, Some(c)) => write!(f, " at content {c}"),
            (None, None) => Ok(()),
        }
    }
}

/// Errors produced while moving a conversation between the canonical model and a wire format
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The codec cannot represent this content for its provider
    #[error("{provider} cannot represent `{content_type}` content{at}")]
    UnsupportedContentType {
        /// Provider whose format was targeted
        provider: Provider,
        /// Canonical kind or wire block type that was rejected
        content_type: String,
        /// Where the content was found
        at: Location,
    },

    /// Content is structurally malformed
    #[error("invalid message format: `{field}` {reason}{at}")]
    InvalidMessageFormat {
        /// Field that failed validation
        field: &'static str,
        /// What is wrong with it
        reason: String,
        /// Where the content was found
        at: Location,
    },

    /// An underlying marshal or unmarshal step failed
    #[error("conversion of `{field}` failed{at}: {source}")]
    ConversionFailed {
        /// Field being converted
        field: &'static str,
        /// Where the content was found
        at: Location,
        /// Underlying error
        #[source]
        source: BoxError,
    },

    /// Persisted history was written with an incompatible schema
    #[error("schema version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version this build reads
        expected: u32,
        /// Version found in the document
        found: u32,
    },

    /// History belongs to a different provider than the codec being invoked
    #[error("provider mismatch: history originated from {found}, codec handles {expected}")]
    ProviderMismatch {
        /// Provider the codec handles
        expected: Provider,
        /// Provider recorded in the history
        found: Provider,
    },

    /// Typed accessor used on the wrong content variant
    #[error("content type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Variant the caller asked for
        expected: ContentKind,
        /// Variant actually held
        found: ContentKind,
    },
}

impl ConversionError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>, at: Location) -> Self {
        Self::InvalidMessageFormat {
            field,
            reason: reason.into(),
            at,
        }
    }

    pub(crate) fn failed(field: &'static str, at: Location, source: impl Into<BoxError>) -> Self {
        Self::ConversionFailed {
            field,
            at,
            source: source.into(),
        }
    }

    pub(crate) fn unsupported(provider: Provider, content_type: impl Into<String>, at: Location) -> Self {
        Self::UnsupportedContentType {
            provider,
            content_type: content_type.into(),
            at,
        }
    }

    /// Whether this error means stored or received data cannot be trusted
    ///
    /// These are never resolved by retrying the same conversion.
    pub const fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidMessageFormat { .. }
                | Self::ConversionFailed { .. }
                | Self::VersionMismatch { .. }
                | Self::ProviderMismatch { .. }
        )
    }
}

/// Result alias for conversion operations
pub type Result<T, E = ConversionError> = std::result::Result<T, E>;
