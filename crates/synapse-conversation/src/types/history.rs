use serde::{Deserialize, Serialize};

use super::message::Message;
use crate::error::{ConversionError, Location, Result};

/// Version of the persisted [`History`] document
///
/// Bump whenever the serialized shape changes incompatibly.
pub const SCHEMA_VERSION: u32 = 1;

/// Provider family whose wire format a codec speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Provider {
    /// `OpenAI` chat completions
    OpenAi,
    /// Anthropic messages
    Anthropic,
    /// Google Generative Language
    Google,
}

/// Bookkeeping that travels with a history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMetadata {
    /// Provider the conversation started with, kept across handoffs
    pub original_provider: Provider,
}

/// Provider-neutral conversation history
///
/// Messages are append-only: new turns are pushed at the end and existing
/// turns are never rewritten. Deserializing checks the schema version and
/// validates every message, as [`History::from_json`] does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "PersistedHistory")]
pub struct History {
    /// Provider whose codec owns this history
    origin_provider: Provider,
    /// Schema version of the persisted form
    schema_version: u32,
    /// Messages in conversation order
    messages: Vec<Message>,
    /// Bookkeeping metadata
    metadata: HistoryMetadata,
}

/// Unchecked persisted form of a [`History`]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedHistory {
    origin_provider: Provider,
    schema_version: u32,
    #[serde(default)]
    messages: Vec<Message>,
    metadata: HistoryMetadata,
}

impl TryFrom<PersistedHistory> for History {
    type Error = ConversionError;

    fn try_from(persisted: PersistedHistory) -> Result<Self> {
        if persisted.schema_version != SCHEMA_VERSION {
            return Err(ConversionError::VersionMismatch {
                expected: SCHEMA_VERSION,
                found: persisted.schema_version,
            });
        }

        for (i, message) in persisted.messages.iter().enumerate() {
            message.validate(i)?;
        }

        Ok(Self {
            origin_provider: persisted.origin_provider,
            schema_version: persisted.schema_version,
            messages: persisted.messages,
            metadata: persisted.metadata,
        })
    }
}

impl History {
    /// Create an empty conversation
    pub const fn new(provider: Provider) -> Self {
        Self {
            origin_provider: provider,
            schema_version: SCHEMA_VERSION,
            messages: Vec::new(),
            metadata: HistoryMetadata {
                original_provider: provider,
            },
        }
    }

    pub const fn origin_provider(&self) -> Provider {
        self.origin_provider
    }

    pub const fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub const fn metadata(&self) -> &HistoryMetadata {
        &self.metadata
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub const fn len(&self) -> usize {
        self.messages.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a completed turn
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append several completed turns, in order
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    /// Hand the conversation over to another provider's codec
    ///
    /// `metadata.original_provider` is left untouched.
    pub const fn hand_off(&mut self, provider: Provider) {
        self.origin_provider = provider;
    }

    /// Serialize to the persisted JSON form
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ConversionError::failed("history", Location::NONE, e))
    }

    /// Restore a history from its persisted JSON form
    ///
    /// The schema version is checked before the document body is interpreted,
    /// and every content block is validated after deserialization.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| ConversionError::failed("history", Location::NONE, e))?;

        let found = value
            .get("schemaVersion")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| ConversionError::invalid("schemaVersion", "is missing", Location::NONE))?;

        if found != u64::from(SCHEMA_VERSION) {
            return Err(ConversionError::VersionMismatch {
                expected: SCHEMA_VERSION,
                found: u32::try_from(found).unwrap_or(u32::MAX),
            });
        }

        // Deserialize the unchecked form so validation errors keep their variant
        let persisted: PersistedHistory =
            serde_json::from_value(value).map_err(|e| ConversionError::failed("history", Location::NONE, e))?;

        Self::try_from(persisted)
    }
}
