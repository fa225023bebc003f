//! Conversion between the canonical history and the Anthropic Messages API
//!
//! System messages move to the top-level `system` field. Anthropic has no
//! native structured-output mode, so assistant text decoded from responses
//! and streams can optionally be passed through [`JsonRecovery`].

use std::collections::HashMap;

use super::Codec;
use super::common::{
    CallIdTracker, RoleMapping, decode_base64, encode_base64, image_media_type, log_dropped, log_empty_message,
    parse_arguments, split_system, synthetic_call_id, to_json_string,
};
use crate::config::{AnthropicConfig, RecoveryConfig};
use crate::error::{ConversionError, Location, Result};
use crate::protocol::anthropic::{
    AnthropicContent, AnthropicContentBlock, AnthropicConversation, AnthropicMessage, AnthropicResponse,
    AnthropicSource, AnthropicStreamContentBlock, AnthropicStreamDelta, AnthropicStreamEvent,
};
use crate::recovery::JsonRecovery;
use crate::stream::{StreamAccumulator, StreamDelta};
use crate::types::{
    ContentForm, ContentShape, History, ImageContent, Message, MessageContent, PdfContent, Provider, Role,
    ToolCallContent, ToolResponseContent,
};

const ROLES: RoleMapping = RoleMapping::new(
    Provider::Anthropic,
    &[
        (Role::System, None),
        (Role::User, Some("user")),
        (Role::Assistant, Some("assistant")),
        (Role::Model, Some("assistant")),
        (Role::Tool, Some("user")),
        (Role::Function, Some("user")),
    ],
    &[],
);

/// Codec for Anthropic Messages API conversations
#[derive(Debug, Clone, Default)]
pub struct AnthropicCodec {
    /// Run JSON recovery on decoded response text
    structured_output: bool,
    recovery: JsonRecovery,
}

impl AnthropicCodec {
    pub const fn new(config: &AnthropicConfig, recovery: &RecoveryConfig) -> Self {
        Self {
            structured_output: config.structured_output,
            recovery: JsonRecovery::new(recovery),
        }
    }

    /// Decode a Messages API response body into an assistant message
    pub fn decode_response(&self, response: AnthropicResponse) -> Result<Message> {
        let at = Location::message(0);
        let mut message = Message::new(ROLES.role(&response.role, at)?);
        let mut calls = CallIdTracker::new();

        // Recovery applies to each text block on its own
        for (j, block) in response.content.into_iter().enumerate() {
            let content = decode_block(block, Location::content(0, j), &mut calls)?;
            message.content.push(self.recover(content));
        }

        Ok(message)
    }

    /// Finish a stream built from [`AnthropicStreamState`] deltas
    pub fn finish_stream(&self, stream: StreamAccumulator) -> Result<Message> {
        let mut message = stream.finish()?;
        message.content = message.content.into_iter().map(|c| self.recover(c)).collect();
        Ok(message)
    }

    fn recover(&self, content: MessageContent) -> MessageContent {
        match content {
            MessageContent::Text(text) if self.structured_output => {
                MessageContent::text(self.recovery.recover(&text.text).into_owned())
            }
            other => other,
        }
    }
}

impl Codec for AnthropicCodec {
    type Wire = AnthropicConversation;

    const PROVIDER: Provider = Provider::Anthropic;

    fn encode(&self, history: &History) -> Result<AnthropicConversation> {
        // Move system prompts to the top-level field
        let (system, rest) = split_system(Self::PROVIDER, history.messages());
        let system = encode_system(history.messages(), &system);

        let mut calls = CallIdTracker::new();
        let mut messages = Vec::with_capacity(rest.len());

        for (i, message) in rest {
            let role = ROLES.token(message.role).unwrap_or("user");
            let blocks = encode_blocks(i, message, role, &mut calls)?;

            if blocks.is_empty() {
                log_empty_message(Self::PROVIDER, i);
                continue;
            }

            // Shorthand string content only when it arrived that way
            let content = match <[_; 1]>::try_from(blocks) {
                Ok([AnthropicContentBlock::Text { text }])
                    if message.form_for(Self::PROVIDER) == Some(ContentForm::String) =>
                {
                    AnthropicContent::Text(text)
                }
                Ok(block) => AnthropicContent::Blocks(block.into()),
                Err(blocks) => AnthropicContent::Blocks(blocks),
            };

            messages.push(AnthropicMessage {
                role: role.to_owned(),
                content,
            });
        }

        Ok(AnthropicConversation { system, messages })
    }

    fn decode_messages(&self, prior: &[Message], wire: AnthropicConversation) -> Result<Vec<Message>> {
        let mut calls = CallIdTracker::from_messages(prior);
        let mut messages = Vec::with_capacity(wire.messages.len() + 1);

        // The top-level system prompt becomes a leading System message
        if let Some(system) = wire.system {
            messages.push(decode_system(system)?);
        }

        for (i, message) in wire.messages.into_iter().enumerate() {
            messages.push(decode_message(i, message, &mut calls)?);
        }

        Ok(messages)
    }
}

// -- Outbound: canonical history -> Anthropic wire format --

/// Top-level system prompt, as text blocks if any System message arrived that way
fn encode_system(messages: &[Message], texts: &[&str]) -> Option<AnthropicContent> {
    if texts.is_empty() {
        return None;
    }

    let as_blocks = messages
        .iter()
        .any(|m| m.role == Role::System && m.form_for(Provider::Anthropic) == Some(ContentForm::Blocks));

    Some(if as_blocks {
        AnthropicContent::Blocks(
            texts
                .iter()
                .map(|text| AnthropicContentBlock::Text {
                    text: (*text).to_owned(),
                })
                .collect(),
        )
    } else {
        AnthropicContent::Text(texts.join("\n"))
    })
}

fn encode_blocks(
    index: usize,
    message: &Message,
    role: &str,
    calls: &mut CallIdTracker,
) -> Result<Vec<AnthropicContentBlock>> {
    let mut blocks = Vec::with_capacity(message.content.len());
    let mut legacy_ordinal = 0;

    for (j, content) in message.content.iter().enumerate() {
        let at = Location::content(index, j);

        let block = match content {
            MessageContent::Text(text) => AnthropicContentBlock::Text { text: text.text.clone() },
            MessageContent::Image(image) if role == "user" => AnthropicContentBlock::Image {
                source: image_source(image, at)?,
            },
            MessageContent::Pdf(pdf) if role == "user" => AnthropicContentBlock::Document {
                source: pdf_source(pdf, at)?,
            },
            MessageContent::ToolCall(call) if role == "assistant" => {
                calls.record(&call.name, &call.id);
                AnthropicContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: parse_arguments(&call.arguments, at)?,
                }
            }
            // Legacy calls get the synthetic id their response will resolve to
            MessageContent::FunctionCall(call) if role == "assistant" => {
                let id = synthetic_call_id(&call.name, legacy_ordinal);
                legacy_ordinal += 1;
                calls.record(&call.name, &id);
                AnthropicContentBlock::ToolUse {
                    id,
                    name: call.name.clone(),
                    input: parse_arguments(&call.arguments, at)?,
                }
            }
            MessageContent::ToolResponse(response) if role == "user" => {
                calls.answer(&response.tool_call_id);

                // Re-emit text blocks the result arrived in
                let content = match response.blocks() {
                    Some(blocks) => AnthropicContent::Blocks(
                        blocks
                            .iter()
                            .map(|text| AnthropicContentBlock::Text { text: text.clone() })
                            .collect(),
                    ),
                    None => AnthropicContent::Text(response.response.clone()),
                };

                AnthropicContentBlock::ToolResult {
                    tool_use_id: response.tool_call_id.clone(),
                    content: Some(content),
                    is_error: response.is_error.then_some(true),
                }
            }
            // Legacy responses answer the oldest open call with the same name
            MessageContent::FunctionResponse(response) if role == "user" => AnthropicContentBlock::ToolResult {
                tool_use_id: calls
                    .resolve(&response.name)
                    .unwrap_or_else(|| synthetic_call_id(&response.name, 0)),
                content: Some(AnthropicContent::Text(response.content.clone())),
                is_error: None,
            },
            other => {
                log_dropped(Provider::Anthropic, other.kind(), at);
                continue;
            }
        };

        blocks.push(block);
    }

    Ok(blocks)
}

fn image_source(image: &ImageContent, at: Location) -> Result<AnthropicSource> {
    match (&image.data, &image.url) {
        (Some(bytes), _) if !bytes.is_empty() => Ok(AnthropicSource {
            source_type: "base64".to_owned(),
            media_type: Some(image_media_type(image, bytes, at)?.to_owned()),
            data: Some(encode_base64(bytes)),
            url: None,
        }),
        (_, Some(url)) if !url.is_empty() => Ok(AnthropicSource {
            source_type: "url".to_owned(),
            media_type: image.media_type.clone(),
            data: None,
            url: Some(url.clone()),
        }),
        _ => Err(missing_source(at)),
    }
}

fn pdf_source(pdf: &PdfContent, at: Location) -> Result<AnthropicSource> {
    match (&pdf.data, &pdf.url) {
        (Some(bytes), _) if !bytes.is_empty() => Ok(AnthropicSource {
            source_type: "base64".to_owned(),
            media_type: Some(PdfContent::MEDIA_TYPE.to_owned()),
            data: Some(encode_base64(bytes)),
            url: None,
        }),
        (_, Some(url)) if !url.is_empty() => Ok(AnthropicSource {
            source_type: "url".to_owned(),
            url: Some(url.clone()),
            ..AnthropicSource::default()
        }),
        _ => Err(missing_source(at)),
    }
}

fn missing_source(at: Location) -> ConversionError {
    ConversionError::invalid("data", "binary content needs inline data or a reference url", at)
}

// -- Inbound: Anthropic wire format -> canonical history --

fn decode_system(system: AnthropicContent) -> Result<Message> {
    let blocks = match system {
        AnthropicContent::Text(text) => return Ok(Message::system().with_text(text)),
        AnthropicContent::Blocks(blocks) => blocks,
    };

    let mut message = Message::system().with_shape(Provider::Anthropic, ContentForm::Blocks);

    for (j, block) in blocks.into_iter().enumerate() {
        match block {
            AnthropicContentBlock::Text { text } => message.content.push(MessageContent::text(text)),
            other => {
                let at = Location {
                    message: None,
                    content: Some(j),
                };
                return Err(ConversionError::unsupported(
                    Provider::Anthropic,
                    format!("system {}", other.type_name()),
                    at,
                ));
            }
        }
    }

    Ok(message)
}

fn decode_message(index: usize, message: AnthropicMessage, calls: &mut CallIdTracker) -> Result<Message> {
    let role = ROLES.role(&message.role, Location::message(index))?;

    // Shorthand string content is a single text block
    let (blocks, form) = match message.content {
        AnthropicContent::Text(text) => (vec![AnthropicContentBlock::Text { text }], Some(ContentForm::String)),
        AnthropicContent::Blocks(blocks) => (blocks, None),
    };

    let content = blocks
        .into_iter()
        .enumerate()
        .map(|(j, block)| decode_block(block, Location::content(index, j), calls))
        .collect::<Result<Vec<_>>>()?;

    Ok(Message {
        role,
        content,
        shape: form.map(|form| ContentShape {
            provider: Provider::Anthropic,
            form,
        }),
    })
}

fn decode_block(block: AnthropicContentBlock, at: Location, calls: &mut CallIdTracker) -> Result<MessageContent> {
    let content = match block {
        AnthropicContentBlock::Text { text } => MessageContent::text(text),
        AnthropicContentBlock::Image { source } => {
            let (media_type, data, url) = decode_source(source, "image", at)?;
            MessageContent::Image(ImageContent {
                media_type,
                data,
                url,
                detail: None,
            })
        }
        AnthropicContentBlock::Document { source } => {
            if let Some(media_type) = source.media_type.as_deref()
                && media_type != PdfContent::MEDIA_TYPE
            {
                return Err(ConversionError::unsupported(
                    Provider::Anthropic,
                    format!("document {media_type}"),
                    at,
                ));
            }
            let (_, data, url) = decode_source(source, "document", at)?;
            MessageContent::Pdf(PdfContent { data, url })
        }
        AnthropicContentBlock::ToolUse { id, name, input } => {
            calls.record(&name, &id);
            MessageContent::ToolCall(ToolCallContent {
                id,
                name,
                arguments: to_json_string(&input, "input", at)?,
            })
        }
        AnthropicContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            // Results carry only the id; the name comes from the matching call
            let name = calls.name_of(&tool_use_id).unwrap_or_default().to_owned();
            calls.answer(&tool_use_id);
            let (response, blocks) = tool_result_text(content, at)?;

            MessageContent::ToolResponse(ToolResponseContent {
                tool_call_id: tool_use_id,
                name,
                response,
                is_error: is_error.unwrap_or(false),
                blocks,
            })
        }
        other @ (AnthropicContentBlock::Thinking { .. }
        | AnthropicContentBlock::RedactedThinking { .. }
        | AnthropicContentBlock::Unknown) => {
            return Err(ConversionError::unsupported(Provider::Anthropic, other.type_name(), at));
        }
    };

    content.validate(at)?;
    Ok(content)
}

type DecodedSource = (Option<String>, Option<Vec<u8>>, Option<String>);

/// Media type, inline bytes and reference URL of a block source
fn decode_source(source: AnthropicSource, block: &str, at: Location) -> Result<DecodedSource> {
    match source.source_type.as_str() {
        "base64" => {
            let bytes = decode_base64(source.data.as_deref().unwrap_or_default(), at)?;
            Ok((source.media_type, Some(bytes), None))
        }
        "url" => {
            let url = source.url.filter(|u| !u.is_empty()).ok_or_else(|| missing_source(at))?;
            Ok((source.media_type, None, Some(url)))
        }
        other => Err(ConversionError::unsupported(
            Provider::Anthropic,
            format!("{block} {other} source"),
            at,
        )),
    }
}

/// Text of `tool_result` content, plus its blocks when it arrived as an array
///
/// Blocks are newline-joined into the flat response text.
fn tool_result_text(content: Option<AnthropicContent>, at: Location) -> Result<(String, Option<Vec<String>>)> {
    let blocks = match content {
        None => return Ok((String::new(), None)),
        Some(AnthropicContent::Text(text)) => return Ok((text, None)),
        Some(AnthropicContent::Blocks(blocks)) => blocks,
    };

    let texts = blocks
        .into_iter()
        .map(|block| match block {
            AnthropicContentBlock::Text { text } => Ok(text),
            other => Err(ConversionError::unsupported(
                Provider::Anthropic,
                format!("tool_result {}", other.type_name()),
                at,
            )),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((texts.join("\n"), Some(texts)))
}

// -- Stream conversion --

/// Tracks block indices across an Anthropic SSE stream
///
/// Anthropic numbers content blocks across the whole message, text included,
/// while stream deltas number tool calls on their own.
#[derive(Debug, Default)]
pub struct AnthropicStreamState {
    /// Tool call index for each tool-use block index
    tool_blocks: HashMap<u32, u32>,
    next_tool_call_index: u32,
}

impl AnthropicStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert one stream event into canonical deltas
    pub fn convert_event(&mut self, event: &AnthropicStreamEvent) -> Vec<StreamDelta> {
        match event {
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block: AnthropicStreamContentBlock::ToolUse { id, name },
            } => {
                let tool_index = self.next_tool_call_index;
                self.next_tool_call_index += 1;
                self.tool_blocks.insert(*index, tool_index);

                vec![StreamDelta::ToolCallStart {
                    index: tool_index,
                    id: Some(id.clone()),
                    name: name.clone(),
                }]
            }
            AnthropicStreamEvent::ContentBlockStart {
                content_block: AnthropicStreamContentBlock::Text { text },
                ..
            }
            | AnthropicStreamEvent::ContentBlockDelta {
                delta: AnthropicStreamDelta::TextDelta { text },
                ..
            } if !text.is_empty() => vec![StreamDelta::Text(text.clone())],
            AnthropicStreamEvent::ContentBlockDelta {
                index,
                delta: AnthropicStreamDelta::InputJsonDelta { partial_json },
            } => self
                .tool_blocks
                .get(index)
                .map(|&tool_index| StreamDelta::ToolCallArguments {
                    index: tool_index,
                    fragment: partial_json.clone(),
                })
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde_json::json;

    use super::*;

    fn conversation(value: serde_json::Value) -> AnthropicConversation {
        serde_json::from_value(value).unwrap()
    }

    fn structured() -> AnthropicCodec {
        AnthropicCodec::new(
            &AnthropicConfig {
                structured_output: true,
            },
            &RecoveryConfig::default(),
        )
    }

    #[test]
    fn tool_exchange_round_trip() {
        let wire = json!({
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "What's the weather in Paris?"}]},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_01", "name": "get_weather", "input": {"city": "Paris"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_01", "content": "18C and sunny"}
                ]}
            ]
        });

        let history = AnthropicCodec::default().decode(conversation(wire.clone())).unwrap();

        let roles: Vec<_> = history.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::User, Role::Assistant, Role::User]);

        let call = history.messages()[1].content[0].as_tool_call().unwrap();
        assert_eq!(call.arguments, r#"{"city":"Paris"}"#);

        let response = history.messages()[2].content[0].as_tool_response().unwrap();
        assert_eq!(response.tool_call_id, "toolu_01");
        assert_eq!(response.name, "get_weather");

        let encoded = AnthropicCodec::default().encode(&history).unwrap();
        assert_eq!(serde_json::to_value(&encoded).unwrap(), wire);
    }

    #[test]
    fn system_messages_move_to_the_top_level() {
        let mut history = History::new(Provider::OpenAi);
        history.push(Message::system().with_text("You are terse."));
        history.push(Message::user().with_text("Hi"));
        history.push(Message::system().with_text("Never apologize."));

        let encoded = AnthropicCodec::default().encode(&history).unwrap();

        assert_eq!(
            encoded.system,
            Some(AnthropicContent::Text("You are terse.\nNever apologize.".to_owned()))
        );
        assert_eq!(encoded.messages.len(), 1);

        let decoded = AnthropicCodec::default().decode(encoded).unwrap();
        assert_eq!(decoded.messages()[0].role, Role::System);
        assert_eq!(decoded.messages()[0].text(), "You are terse.\nNever apologize.");
    }

    #[test]
    fn string_content_decodes_to_text() {
        let wire = json!({"messages": [
            {"role": "user", "content": "Hello"},
            {"role": "assistant", "content": [{"type": "text", "text": "Hi"}]}
        ]});

        let history = AnthropicCodec::default().decode(conversation(wire.clone())).unwrap();
        assert_eq!(history.messages()[0].content[0].as_text().unwrap(), "Hello");

        let encoded = AnthropicCodec::default().encode(&history).unwrap();
        assert_eq!(serde_json::to_value(&encoded).unwrap(), wire);
    }

    #[test]
    fn system_blocks_round_trip() {
        let wire = json!({
            "system": [
                {"type": "text", "text": "You are a code reviewer."},
                {"type": "text", "text": "Reply in English."}
            ],
            "messages": [{"role": "user", "content": [{"type": "text", "text": "Review this."}]}]
        });

        let history = AnthropicCodec::default().decode(conversation(wire.clone())).unwrap();
        let system = &history.messages()[0];
        assert_eq!(system.role, Role::System);
        assert_eq!(system.content.len(), 2);
        assert_eq!(system.content[1].as_text().unwrap(), "Reply in English.");

        let encoded = AnthropicCodec::default().encode(&history).unwrap();
        assert_eq!(serde_json::to_value(&encoded).unwrap(), wire);
    }

    #[test]
    fn non_text_system_block_fails_decode() {
        let err = AnthropicCodec::default()
            .decode(conversation(json!({
                "system": [{"type": "image", "source": {"type": "url", "url": "https://example.com/a.png"}}],
                "messages": []
            })))
            .unwrap_err();

        assert!(matches!(
            err,
            ConversionError::UnsupportedContentType { ref content_type, .. } if content_type == "system image"
        ));
    }

    #[test]
    fn tool_result_blocks_round_trip() {
        let wire = json!({"messages": [
            {"role": "assistant", "content": [{"type": "tool_use", "id": "t1", "name": "ls", "input": {}}]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": [
                    {"type": "text", "text": "Cargo.toml"},
                    {"type": "text", "text": "src"}
                ]}
            ]}
        ]});

        let history = AnthropicCodec::default().decode(conversation(wire.clone())).unwrap();
        let response = history.messages()[1].content[0].as_tool_response().unwrap();
        assert_eq!(response.response, "Cargo.toml\nsrc");

        let encoded = AnthropicCodec::default().encode(&history).unwrap();
        assert_eq!(serde_json::to_value(&encoded).unwrap(), wire);

        let openai = serde_json::to_value(crate::convert::OpenAiCodec.encode(&history).unwrap()).unwrap();
        assert_eq!(openai[1]["content"], "Cargo.toml\nsrc");
    }

    #[test]
    fn edited_tool_result_drops_stale_blocks() {
        let history = AnthropicCodec::default()
            .decode(conversation(json!({"messages": [
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": [{"type": "text", "text": "old"}]}
                ]}
            ]})))
            .unwrap();

        let mut message = history.messages()[0].clone();
        if let MessageContent::ToolResponse(response) = &mut message.content[0] {
            response.response = "new".to_owned();
        }
        let mut edited = History::new(Provider::Anthropic);
        edited.push(message);

        let encoded = serde_json::to_value(AnthropicCodec::default().encode(&edited).unwrap()).unwrap();
        assert_eq!(encoded["messages"][0]["content"][0]["content"], "new");
    }

    #[test]
    fn images_and_documents_round_trip() {
        let wire = json!({
            "messages": [{"role": "user", "content": [
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "iVBORw0="}},
                {"type": "image", "source": {"type": "url", "url": "https://example.com/cat.jpg"}},
                {"type": "document", "source": {"type": "base64", "media_type": "application/pdf", "data": "JVBERg=="}},
                {"type": "text", "text": "Compare these."}
            ]}]
        });

        let history = AnthropicCodec::default().decode(conversation(wire.clone())).unwrap();
        let content = &history.messages()[0].content;
        assert_eq!(content[0].as_image().unwrap().media_type.as_deref(), Some("image/png"));
        assert_eq!(content[1].as_image().unwrap().url.as_deref(), Some("https://example.com/cat.jpg"));
        assert_eq!(content[2].as_pdf().unwrap().data.as_deref(), Some(&b"%PDF"[..]));

        let encoded = AnthropicCodec::default().encode(&history).unwrap();
        assert_eq!(serde_json::to_value(&encoded).unwrap(), wire);
    }

    #[test]
    fn inline_image_type_is_sniffed() {
        let mut history = History::new(Provider::OpenAi);
        history.push(Message::user().with_content(
            MessageContent::image(ImageContent {
                media_type: None,
                data: Some(vec![0xFF, 0xD8, 0xFF, 0xE0]),
                url: None,
                detail: None,
            })
            .unwrap(),
        ));

        let encoded = AnthropicCodec::default().encode(&history).unwrap();
        let AnthropicContent::Blocks(blocks) = &encoded.messages[0].content else {
            panic!("expected blocks");
        };
        let AnthropicContentBlock::Image { source } = &blocks[0] else {
            panic!("expected image block");
        };
        assert_eq!(source.media_type.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn source_without_data_is_invalid() {
        let err = AnthropicCodec::default()
            .decode(conversation(json!({"messages": [{"role": "user", "content": [
                {"type": "image", "source": {"type": "base64", "media_type": "image/png"}}
            ]}]})))
            .unwrap_err();

        assert!(matches!(
            err,
            ConversionError::InvalidMessageFormat { field: "data", at, .. } if at == Location::content(0, 0)
        ));
    }

    #[test]
    fn thinking_blocks_fail_decode() {
        let err = AnthropicCodec::default()
            .decode(conversation(json!({"messages": [{"role": "assistant", "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "sig"},
                {"type": "text", "text": "Answer"}
            ]}]})))
            .unwrap_err();

        assert!(matches!(
            err,
            ConversionError::UnsupportedContentType { ref content_type, .. } if content_type == "thinking"
        ));
    }

    #[test]
    fn unknown_blocks_fail_decode() {
        let err = AnthropicCodec::default()
            .decode(conversation(json!({"messages": [{"role": "user", "content": [
                {"type": "search_result", "source": "x"}
            ]}]})))
            .unwrap_err();

        assert!(matches!(err, ConversionError::UnsupportedContentType { .. }));
    }

    #[test]
    fn malformed_tool_arguments_fail_encode() {
        let mut history = History::new(Provider::OpenAi);
        history.push(
            Message::assistant().with_content(MessageContent::tool_call("call_1", "search", "{\"q\":").unwrap()),
        );

        let err = AnthropicCodec::default().encode(&history).unwrap_err();
        assert!(matches!(err, ConversionError::ConversionFailed { field: "arguments", .. }));
    }

    #[test]
    fn error_results_keep_their_flag() {
        let wire = json!({"messages": [
            {"role": "assistant", "content": [{"type": "tool_use", "id": "t1", "name": "run", "input": {}}]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": "boom", "is_error": true}
            ]}
        ]});

        let history = AnthropicCodec::default().decode(conversation(wire.clone())).unwrap();
        assert!(history.messages()[1].content[0].as_tool_response().unwrap().is_error);

        let encoded = AnthropicCodec::default().encode(&history).unwrap();
        assert_eq!(serde_json::to_value(&encoded).unwrap(), wire);
    }

    #[test]
    fn legacy_function_exchange_encodes_as_tool_use() {
        let mut history = History::new(Provider::OpenAi);
        history.push(Message::assistant().with_content(MessageContent::function_call("lookup", "").unwrap()));
        history.push(
            Message::new(Role::Function).with_content(MessageContent::function_response("lookup", "42").unwrap()),
        );

        let encoded = serde_json::to_value(AnthropicCodec::default().encode(&history).unwrap()).unwrap();

        assert_eq!(
            encoded,
            json!({"messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "call_lookup_0", "name": "lookup", "input": {}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "call_lookup_0", "content": "42"}
                ]}
            ]})
        );
    }

    #[test]
    fn response_text_is_recovered_in_structured_mode() {
        let response: AnthropicResponse = serde_json::from_str(indoc! {r#"
            {
                "id": "msg_01",
                "role": "assistant",
                "model": "claude",
                "stop_reason": "end_turn",
                "content": [
                    {"type": "text", "text": "Here you go:\n```json\n{\"answer\": 42}\n```"}
                ]
            }
        "#})
        .unwrap();

        let plain = AnthropicCodec::default().decode_response(response.clone()).unwrap();
        assert!(plain.text().starts_with("Here you go:"));

        let recovered = structured().decode_response(response).unwrap();
        assert_eq!(recovered.text(), r#"{"answer": 42}"#);
    }

    #[test]
    fn stream_events_accumulate_with_recovery() {
        let events: Vec<AnthropicStreamEvent> = serde_json::from_value(json!([
            {"type": "message_start", "message": {"id": "msg_01"}},
            {"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}},
            {"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Result: {\"ok\""}},
            {"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": ": true}"}},
            {"type": "content_block_stop", "index": 0},
            {"type": "content_block_start", "index": 1,
                "content_block": {"type": "tool_use", "id": "toolu_9", "name": "save"}},
            {"type": "content_block_delta", "index": 1,
                "delta": {"type": "input_json_delta", "partial_json": "{\"path\":"}},
            {"type": "content_block_delta", "index": 1,
                "delta": {"type": "input_json_delta", "partial_json": "\"/tmp/a\"}"}},
            {"type": "content_block_stop", "index": 1},
            {"type": "message_delta", "delta": {"stop_reason": "tool_use"}},
            {"type": "message_stop"}
        ]))
        .unwrap();

        let mut state = AnthropicStreamState::new();
        let mut stream = StreamAccumulator::new();
        for event in &events {
            stream.extend(state.convert_event(event));
        }

        let message = structured().finish_stream(stream).unwrap();
        assert_eq!(message.content[0].as_text().unwrap(), r#"{"ok": true}"#);

        let call = message.content[1].as_tool_call().unwrap();
        assert_eq!(call.id, "toolu_9");
        assert_eq!(call.name, "save");
        assert_eq!(call.arguments, r#"{"path":"/tmp/a"}"#);
    }
}
