//! Canonical conversation model for Synapse
//!
//! Holds one provider-neutral conversation history and moves it between the
//! `OpenAI`, Anthropic and Google wire formats. Each provider has a codec
//! implementing [`Codec`]; histories persist as versioned JSON documents.
//! Anthropic lacks a native structured-output mode, so its codec can pass
//! assistant text through [`JsonRecovery`].

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod config;
pub mod convert;
pub mod error;
pub mod protocol;
pub mod recovery;
pub mod stream;
pub mod types;

pub use config::ConversionConfig;
pub use convert::anthropic::AnthropicStreamState;
pub use convert::google::{GoogleStreamState, google_chunk_deltas};
pub use convert::openai::openai_chunk_deltas;
pub use convert::{AnthropicCodec, Codec, GoogleCodec, OpenAiCodec};
pub use error::{ConversionError, Location, Result};
pub use recovery::JsonRecovery;
pub use stream::{StreamAccumulator, StreamDelta};
pub use types::{History, Message, MessageContent, Provider, Role};
