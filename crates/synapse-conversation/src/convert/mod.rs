//! Bidirectional conversion between the canonical history and wire formats
//!
//! Each submodule implements [`Codec`] for one provider family. Encode is
//! best-effort: content the provider cannot express is dropped. Decode is
//! strict: anything unrecognized or malformed fails the whole decode.

pub mod anthropic;
pub mod common;
pub mod google;
pub mod openai;

use serde::de::DeserializeOwned;

use crate::error::{ConversionError, Location, Result};
use crate::types::{History, Message, Provider};

pub use anthropic::AnthropicCodec;
pub use google::GoogleCodec;
pub use openai::OpenAiCodec;

/// Paired encode/decode functions for one provider's wire format
pub trait Codec {
    /// Provider-native transcript representation
    type Wire;

    /// Provider family this codec speaks
    const PROVIDER: Provider;

    /// Convert a history into the provider's ordered wire messages
    fn encode(&self, history: &History) -> Result<Self::Wire>;

    /// Decode wire messages that follow `prior` in the same conversation
    ///
    /// `prior` only seeds call-id bookkeeping; it is never modified.
    fn decode_messages(&self, prior: &[Message], wire: Self::Wire) -> Result<Vec<Message>>;

    /// Decode wire messages and append them to an existing history
    ///
    /// The history must belong to this codec's provider. Nothing is
    /// appended unless the whole transcript decodes.
    fn decode_into(&self, history: &mut History, wire: Self::Wire) -> Result<()> {
        if history.origin_provider() != Self::PROVIDER {
            return Err(ConversionError::ProviderMismatch {
                expected: Self::PROVIDER,
                found: history.origin_provider(),
            });
        }

        let messages = self.decode_messages(history.messages(), wire)?;
        history.extend(messages);
        Ok(())
    }

    /// Decode a provider-native transcript into a fresh history
    fn decode(&self, wire: Self::Wire) -> Result<History> {
        let mut history = History::new(Self::PROVIDER);
        self.decode_into(&mut history, wire)?;
        Ok(history)
    }

    /// Parse and decode a raw JSON transcript
    fn decode_json(&self, json: &str) -> Result<History>
    where
        Self::Wire: DeserializeOwned,
    {
        let wire = serde_json::from_str(json).map_err(|e| ConversionError::failed("transcript", Location::NONE, e))?;
        self.decode(wire)
    }

    /// Restore a persisted history that must belong to this codec's provider
    fn restore(&self, persisted: &str) -> Result<History> {
        let history = History::from_json(persisted)?;

        if history.origin_provider() != Self::PROVIDER {
            return Err(ConversionError::ProviderMismatch {
                expected: Self::PROVIDER,
                found: history.origin_provider(),
            });
        }

        Ok(history)
    }
}
