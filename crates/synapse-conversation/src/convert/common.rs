//! Conversion helpers shared by every codec
//!
//! Role tables, system-prompt handling, synthetic tool-call IDs and the
//! base64 / data URI plumbing used for binary content.

use std::collections::{HashMap, VecDeque};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::{ConversionError, Location, Result};
use crate::types::{ContentKind, ImageContent, Message, MessageContent, Provider, Role};

// -- Roles --

/// Mapping between canonical roles and one provider's role tokens
#[derive(Debug)]
pub struct RoleMapping {
    provider: Provider,
    /// One row per canonical role; `None` means the provider has no slot for it
    rows: &'static [(Role, Option<&'static str>)],
    /// Extra tokens accepted on decode only
    aliases: &'static [(&'static str, Role)],
}

impl RoleMapping {
    pub const fn new(
        provider: Provider,
        rows: &'static [(Role, Option<&'static str>)],
        aliases: &'static [(&'static str, Role)],
    ) -> Self {
        Self {
            provider,
            rows,
            aliases,
        }
    }

    /// Provider token for a canonical role, `None` when there is no slot for it
    pub fn token(&self, role: Role) -> Option<&'static str> {
        self.rows.iter().find(|(r, _)| *r == role).and_then(|(_, token)| *token)
    }

    /// Canonical role for a provider token
    ///
    /// When several roles share a token the first row wins.
    pub fn role(&self, token: &str, at: Location) -> Result<Role> {
        self.rows
            .iter()
            .find_map(|(role, t)| (*t == Some(token)).then_some(*role))
            .or_else(|| self.aliases.iter().find_map(|(t, role)| (*t == token).then_some(*role)))
            .ok_or_else(|| {
                ConversionError::invalid("role", format!("`{token}` is not a {} role", self.provider), at)
            })
    }
}

// -- System prompt --

/// Fold System messages into the first User message
///
/// System texts are newline-joined in order and prepended to the first text
/// block of the first User message. Non-text content carried by System
/// messages moves to the front of that User message. When no User message
/// exists, one is created at the start of the conversation.
pub fn merge_system(messages: &[Message]) -> Vec<Message> {
    let mut system_text = Vec::new();
    let mut system_other = Vec::new();
    let mut merged = Vec::with_capacity(messages.len());

    for message in messages {
        if message.role != Role::System {
            merged.push(message.clone());
            continue;
        }

        for content in &message.content {
            match content {
                MessageContent::Text(text) if !text.text.is_empty() => system_text.push(text.text.as_str()),
                MessageContent::Text(_) => {}
                other => system_other.push(other.clone()),
            }
        }
    }

    if system_text.is_empty() && system_other.is_empty() {
        return merged;
    }

    let prefix = system_text.join("\n");

    let index = if let Some(index) = merged.iter().position(|m| m.role == Role::User) {
        index
    } else {
        merged.insert(0, Message::user());
        0
    };
    let user = &mut merged[index];

    if !prefix.is_empty() {
        let first_text = user.content.iter_mut().find_map(|c| match c {
            MessageContent::Text(text) => Some(text),
            _ => None,
        });

        match first_text {
            Some(text) if text.text.is_empty() => text.text = prefix,
            Some(text) => text.text = format!("{prefix}\n{}", text.text),
            None => user.content.insert(0, MessageContent::text(prefix)),
        }
    }

    if !system_other.is_empty() {
        let rest = std::mem::replace(&mut user.content, system_other);
        user.content.extend(rest);
    }

    merged
}

/// Split System messages off for providers with a native system field
///
/// Returns the system text blocks in order and the remaining messages with
/// their original indices. Non-text content in System messages has no slot
/// and is dropped.
pub fn split_system(provider: Provider, messages: &[Message]) -> (Vec<&str>, Vec<(usize, &Message)>) {
    let mut system = Vec::new();
    let mut rest = Vec::with_capacity(messages.len());

    for (i, message) in messages.iter().enumerate() {
        if message.role != Role::System {
            rest.push((i, message));
            continue;
        }

        for (j, content) in message.content.iter().enumerate() {
            match content {
                MessageContent::Text(text) => system.push(text.text.as_str()),
                other => log_dropped(provider, other.kind(), Location::content(i, j)),
            }
        }
    }

    (system, rest)
}

// -- Tool call IDs --

/// Deterministic ID for a call that carries none
pub fn synthetic_call_id(name: &str, ordinal: usize) -> String {
    format!("call_{name}_{ordinal}")
}

/// Whether `id` has the shape produced by [`synthetic_call_id`] for `name`
pub fn is_synthetic_call_id(id: &str, name: &str) -> bool {
    id.strip_prefix("call_")
        .and_then(|rest| rest.strip_prefix(name))
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Tracks outstanding calls so name-only responses can be matched to an ID
#[derive(Debug, Default)]
pub struct CallIdTracker {
    /// Unanswered call IDs per tool name, oldest first
    pending: HashMap<String, VecDeque<String>>,
    /// Tool name for every call ID seen
    names: HashMap<String, String>,
}

impl CallIdTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the tracker with everything already in a conversation
    pub fn from_messages(messages: &[Message]) -> Self {
        let mut tracker = Self::new();

        for message in messages {
            let mut legacy_ordinal = 0;
            for content in &message.content {
                match content {
                    MessageContent::ToolCall(call) => tracker.record(&call.name, &call.id),
                    MessageContent::FunctionCall(call) => {
                        tracker.record(&call.name, &synthetic_call_id(&call.name, legacy_ordinal));
                        legacy_ordinal += 1;
                    }
                    MessageContent::ToolResponse(response) => tracker.answer(&response.tool_call_id),
                    MessageContent::FunctionResponse(response) => {
                        tracker.resolve(&response.name);
                    }
                    _ => {}
                }
            }
        }

        tracker
    }

    /// Remember a call awaiting its response
    pub fn record(&mut self, name: &str, id: &str) {
        self.names.insert(id.to_owned(), name.to_owned());
        self.pending.entry(name.to_owned()).or_default().push_back(id.to_owned());
    }

    /// Mark a call answered by ID
    pub fn answer(&mut self, id: &str) {
        if let Some(name) = self.names.get(id)
            && let Some(queue) = self.pending.get_mut(name)
        {
            queue.retain(|pending| pending != id);
        }
    }

    /// Take the oldest unanswered call ID for `name`
    pub fn resolve(&mut self, name: &str) -> Option<String> {
        self.pending.get_mut(name).and_then(VecDeque::pop_front)
    }

    /// Tool name recorded for a call ID
    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }
}

// -- Binary content --

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode base64 content, treating an empty payload as missing data
pub fn decode_base64(data: &str, at: Location) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(ConversionError::invalid(
            "data",
            "binary content needs inline data or a reference url",
            at,
        ));
    }

    STANDARD.decode(data).map_err(|e| ConversionError::failed("data", at, e))
}

/// Build a `data:` URI carrying base64 bytes
pub fn data_uri(media_type: &str, bytes: &[u8]) -> String {
    format!("data:{media_type};base64,{}", encode_base64(bytes))
}

/// Split a base64 `data:` URI into its media type and payload
pub fn parse_data_uri(uri: &str) -> Option<(&str, &str)> {
    let (header, payload) = uri.strip_prefix("data:")?.split_once(',')?;
    let media_type = header.strip_suffix(";base64")?;
    Some((media_type, payload))
}

/// Guess an image MIME type from its leading bytes
pub fn sniff_image_type(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => Some("image/png"),
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        _ => None,
    }
}

/// Media type for inline image bytes, sniffed when the content does not say
pub fn image_media_type<'a>(image: &'a ImageContent, bytes: &[u8], at: Location) -> Result<&'a str> {
    match image.media_type.as_deref() {
        Some(media_type) => Ok(media_type),
        None => sniff_image_type(bytes)
            .ok_or_else(|| ConversionError::invalid("media_type", "is required for inline images", at)),
    }
}

// -- JSON payloads --

/// Parse tool arguments, treating an empty string as an empty object
pub fn parse_arguments(arguments: &str, at: Location) -> Result<serde_json::Value> {
    if arguments.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }

    serde_json::from_str(arguments).map_err(|e| ConversionError::failed("arguments", at, e))
}

pub fn to_json_string(value: &serde_json::Value, field: &'static str, at: Location) -> Result<String> {
    serde_json::to_string(value).map_err(|e| ConversionError::failed(field, at, e))
}

// -- Logging --

/// Record that encode dropped content the target provider cannot express
pub fn log_dropped(provider: Provider, kind: ContentKind, at: Location) {
    tracing::debug!(
        provider = %provider,
        content_type = %kind,
        message_index = at.message,
        content_index = at.content,
        "dropping content the provider cannot represent"
    );
}

/// Record that encode dropped a message left without content
pub fn log_empty_message(provider: Provider, message_index: usize) {
    tracing::debug!(
        provider = %provider,
        message_index,
        "dropping message with no representable content"
    );
}
