//! Conversion between the canonical history and Google `generateContent` contents
//!
//! Google has no system role inside `contents`. By default System messages
//! are folded into the first user turn; [`GoogleConfig::system_instruction`]
//! switches to the native `systemInstruction` field instead.
//!
//! Older Gemini models send function calls and responses without IDs. Those
//! decode with synthetic `call_<name>_<n>` IDs, which are omitted again on
//! encode.

use serde_json::{Map, Value};

use super::Codec;
use super::common::{
    CallIdTracker, RoleMapping, decode_base64, encode_base64, image_media_type, is_synthetic_call_id, log_dropped,
    log_empty_message, merge_system, parse_arguments, split_system, synthetic_call_id, to_json_string,
};
use crate::config::GoogleConfig;
use crate::error::{ConversionError, Location, Result};
use crate::protocol::google::{
    GoogleContent, GoogleConversation, GoogleFileData, GoogleFunctionCall, GoogleFunctionResponse, GoogleInlineData,
    GooglePart, GoogleResponse, GoogleStreamChunk,
};
use crate::stream::StreamDelta;
use crate::types::{
    History, ImageContent, Message, MessageContent, PdfContent, Provider, Role, ToolCallContent, ToolResponseContent,
};

const ROLES: RoleMapping = RoleMapping::new(
    Provider::Google,
    &[
        (Role::System, None),
        (Role::User, Some("user")),
        (Role::Assistant, Some("model")),
        (Role::Model, Some("model")),
        (Role::Tool, Some("user")),
        (Role::Function, Some("function")),
    ],
    &[],
);

/// Codec for Google Generative Language API contents
#[derive(Debug, Clone, Copy, Default)]
pub struct GoogleCodec {
    /// Emit System messages as `systemInstruction`
    system_instruction: bool,
}

impl GoogleCodec {
    pub const fn new(config: &GoogleConfig) -> Self {
        Self {
            system_instruction: config.system_instruction,
        }
    }

    /// Decode the first candidate of a `generateContent` response
    #[allow(clippy::unused_self)]
    pub fn decode_response(&self, response: GoogleResponse) -> Result<Message> {
        let candidate = response
            .candidates
            .into_iter()
            .min_by_key(|c| c.index.unwrap_or(0))
            .ok_or_else(|| ConversionError::invalid("candidates", "response has no candidates", Location::NONE))?;

        decode_content(0, candidate.content, &mut CallIdTracker::new())
    }
}

impl Codec for GoogleCodec {
    type Wire = GoogleConversation;

    const PROVIDER: Provider = Provider::Google;

    fn encode(&self, history: &History) -> Result<GoogleConversation> {
        // System text becomes systemInstruction parts or folds into the first user turn
        let (system_instruction, messages) = if self.system_instruction {
            let (system, rest) = split_system(Self::PROVIDER, history.messages());
            let instruction = (!system.is_empty()).then(|| GoogleContent {
                role: None,
                parts: system.iter().map(|text| GooglePart::Text((*text).to_owned())).collect(),
            });
            (instruction, rest.into_iter().map(|(_, m)| m.clone()).collect())
        } else {
            (None, merge_system(history.messages()))
        };

        let mut calls = CallIdTracker::new();
        let mut contents = Vec::with_capacity(messages.len());

        for (i, message) in messages.iter().enumerate() {
            let role = ROLES.token(message.role).unwrap_or("user");
            let parts = encode_parts(i, message, role, &mut calls)?;

            // Drop turns left with nothing Google can carry
            if parts.is_empty() {
                log_empty_message(Self::PROVIDER, i);
                continue;
            }

            contents.push(GoogleContent {
                role: Some(role.to_owned()),
                parts,
            });
        }

        Ok(GoogleConversation {
            system_instruction,
            contents,
        })
    }

    fn decode_messages(&self, prior: &[Message], wire: GoogleConversation) -> Result<Vec<Message>> {
        let mut calls = CallIdTracker::from_messages(prior);
        let mut messages = Vec::with_capacity(wire.contents.len() + 1);

        if let Some(instruction) = wire.system_instruction {
            messages.push(decode_instruction(instruction)?);
        }

        for (i, content) in wire.contents.into_iter().enumerate() {
            messages.push(decode_content(i, content, &mut calls)?);
        }

        Ok(messages)
    }
}

// -- Outbound: canonical history -> Google wire format --

fn encode_parts(index: usize, message: &Message, role: &str, calls: &mut CallIdTracker) -> Result<Vec<GooglePart>> {
    let mut parts = Vec::with_capacity(message.content.len());
    let mut legacy_ordinal = 0;

    for (j, content) in message.content.iter().enumerate() {
        let at = Location::content(index, j);

        let part = match content {
            MessageContent::Text(text) => GooglePart::Text(text.text.clone()),
            MessageContent::Image(image) if role == "user" => image_part(image, at)?,
            MessageContent::Pdf(pdf) if role == "user" => pdf_part(pdf, at)?,
            MessageContent::ToolCall(call) if role == "model" => {
                calls.record(&call.name, &call.id);
                GooglePart::FunctionCall(GoogleFunctionCall {
                    id: wire_call_id(&call.id, &call.name),
                    name: call.name.clone(),
                    args: parse_arguments(&call.arguments, at)?,
                })
            }
            // Legacy calls never carry an id on the wire
            MessageContent::FunctionCall(call) if role == "model" => {
                calls.record(&call.name, &synthetic_call_id(&call.name, legacy_ordinal));
                legacy_ordinal += 1;
                GooglePart::FunctionCall(GoogleFunctionCall {
                    id: None,
                    name: call.name.clone(),
                    args: parse_arguments(&call.arguments, at)?,
                })
            }
            // Google matches responses by name, so a missing one is looked up from its call
            MessageContent::ToolResponse(response) if role != "model" => {
                let name = if response.name.is_empty() {
                    calls
                        .name_of(&response.tool_call_id)
                        .map(str::to_owned)
                        .ok_or_else(|| {
                            ConversionError::invalid("name", "function responses need the name of their call", at)
                        })?
                } else {
                    response.name.clone()
                };
                calls.answer(&response.tool_call_id);

                GooglePart::FunctionResponse(GoogleFunctionResponse {
                    id: wire_call_id(&response.tool_call_id, &name),
                    name,
                    response: response_object(&response.response, response.is_error),
                })
            }
            MessageContent::FunctionResponse(response) if role != "model" => {
                calls.resolve(&response.name);
                GooglePart::FunctionResponse(GoogleFunctionResponse {
                    id: None,
                    name: response.name.clone(),
                    response: response_object(&response.content, false),
                })
            }
            other => {
                log_dropped(Provider::Google, other.kind(), at);
                continue;
            }
        };

        parts.push(part);
    }

    Ok(parts)
}

/// Real call IDs travel on the wire; synthetic ones stay local
fn wire_call_id(id: &str, name: &str) -> Option<String> {
    (!is_synthetic_call_id(id, name)).then(|| id.to_owned())
}

/// Wrap a tool response string in the JSON object Google requires
///
/// Objects pass through. Any other JSON value, or plain text, is wrapped
/// under `result`, or `error` when the call failed.
fn response_object(response: &str, is_error: bool) -> Value {
    let value = serde_json::from_str::<Value>(response).unwrap_or_else(|_| Value::String(response.to_owned()));

    match value {
        Value::Object(object) if !is_error => Value::Object(object),
        other => {
            let key = if is_error { "error" } else { "result" };
            let mut object = Map::new();
            object.insert(key.to_owned(), other);
            Value::Object(object)
        }
    }
}

fn image_part(image: &ImageContent, at: Location) -> Result<GooglePart> {
    match (&image.data, &image.url) {
        (Some(bytes), _) if !bytes.is_empty() => Ok(GooglePart::InlineData(GoogleInlineData {
            mime_type: image_media_type(image, bytes, at)?.to_owned(),
            data: encode_base64(bytes),
        })),
        (_, Some(url)) if !url.is_empty() => Ok(GooglePart::FileData(GoogleFileData {
            mime_type: image.media_type.clone(),
            file_uri: url.clone(),
        })),
        _ => Err(missing_source(at)),
    }
}

fn pdf_part(pdf: &PdfContent, at: Location) -> Result<GooglePart> {
    match (&pdf.data, &pdf.url) {
        (Some(bytes), _) if !bytes.is_empty() => Ok(GooglePart::InlineData(GoogleInlineData {
            mime_type: PdfContent::MEDIA_TYPE.to_owned(),
            data: encode_base64(bytes),
        })),
        (_, Some(url)) if !url.is_empty() => Ok(GooglePart::FileData(GoogleFileData {
            mime_type: Some(PdfContent::MEDIA_TYPE.to_owned()),
            file_uri: url.clone(),
        })),
        _ => Err(missing_source(at)),
    }
}

fn missing_source(at: Location) -> ConversionError {
    ConversionError::invalid("data", "binary content needs inline data or a reference url", at)
}

// -- Inbound: Google wire format -> canonical history --

/// System message with one text block per `systemInstruction` part
fn decode_instruction(instruction: GoogleContent) -> Result<Message> {
    let content = instruction
        .parts
        .into_iter()
        .enumerate()
        .map(|(j, part)| match part {
            GooglePart::Text(text) => Ok(MessageContent::text(text)),
            other => Err(ConversionError::unsupported(
                Provider::Google,
                format!("systemInstruction {}", other.type_name()),
                Location {
                    message: None,
                    content: Some(j),
                },
            )),
        })
        .collect::<Result<Vec<_>>>()?;

    let mut message = Message::system();
    message.content = content;
    Ok(message)
}

fn decode_content(index: usize, content: GoogleContent, calls: &mut CallIdTracker) -> Result<Message> {
    // Contents without a role are user turns
    let role = match content.role.as_deref() {
        Some(token) => ROLES.role(token, Location::message(index))?,
        None => Role::User,
    };

    let mut decoded = Vec::with_capacity(content.parts.len());
    let mut call_ordinal = 0;
    let mut response_ordinal = 0;

    for (j, part) in content.parts.into_iter().enumerate() {
        let at = Location::content(index, j);

        let item = match part {
            GooglePart::Text(text) => MessageContent::text(text),
            GooglePart::InlineData(inline) => {
                let bytes = decode_base64(&inline.data, at)?;
                binary_content(inline.mime_type, Some(bytes), None, at)?
            }
            GooglePart::FileData(file) => {
                if file.file_uri.is_empty() {
                    return Err(missing_source(at));
                }
                let mime_type = file.mime_type.unwrap_or_default();
                binary_content(mime_type, None, Some(file.file_uri), at)?
            }
            // Calls without an id get a synthetic one in order
            GooglePart::FunctionCall(call) => {
                let id = call.id.unwrap_or_else(|| synthetic_call_id(&call.name, call_ordinal));
                call_ordinal += 1;
                calls.record(&call.name, &id);

                MessageContent::ToolCall(ToolCallContent {
                    arguments: to_json_string(&call.args, "args", at)?,
                    id,
                    name: call.name,
                })
            }
            // Responses without an id answer the oldest open call with the same name
            GooglePart::FunctionResponse(response) => {
                let tool_call_id = match response.id {
                    Some(id) => {
                        calls.answer(&id);
                        id
                    }
                    None => calls
                        .resolve(&response.name)
                        .unwrap_or_else(|| synthetic_call_id(&response.name, response_ordinal)),
                };
                response_ordinal += 1;

                let (text, is_error) = response_text(response.response, at)?;
                MessageContent::ToolResponse(ToolResponseContent {
                    tool_call_id,
                    name: response.name,
                    response: text,
                    is_error,
                    blocks: None,
                })
            }
            other @ (GooglePart::ExecutableCode(_) | GooglePart::CodeExecutionResult(_)) => {
                return Err(ConversionError::unsupported(Provider::Google, other.type_name(), at));
            }
        };

        item.validate(at)?;
        decoded.push(item);
    }

    Ok(Message {
        role,
        content: decoded,
        shape: None,
    })
}

/// Image or PDF content by MIME type; an unset type is taken as an image
fn binary_content(
    mime_type: String,
    data: Option<Vec<u8>>,
    url: Option<String>,
    at: Location,
) -> Result<MessageContent> {
    if mime_type == PdfContent::MEDIA_TYPE {
        return Ok(MessageContent::Pdf(PdfContent { data, url }));
    }

    if mime_type.is_empty() || mime_type.starts_with("image/") {
        return Ok(MessageContent::Image(ImageContent {
            media_type: (!mime_type.is_empty()).then_some(mime_type),
            data,
            url,
            detail: None,
        }));
    }

    Err(ConversionError::unsupported(Provider::Google, mime_type, at))
}

/// Inverse of [`response_object`]: unwrap a lone `result` or `error` string
fn response_text(response: Value, at: Location) -> Result<(String, bool)> {
    if let Value::Object(object) = &response
        && object.len() == 1
    {
        match object.iter().next() {
            Some((key, Value::String(text))) if key == "result" => return Ok((text.clone(), false)),
            Some((key, Value::String(text))) if key == "error" => return Ok((text.clone(), true)),
            _ => {}
        }
    }

    Ok((to_json_string(&response, "response", at)?, false))
}

// -- Stream conversion --

/// Numbers function calls across a Google response stream
///
/// Each chunk carries complete function calls, so every call becomes a
/// start delta followed by its full arguments.
#[derive(Debug, Default)]
pub struct GoogleStreamState {
    next_tool_call_index: u32,
}

/// Convert a Google stream chunk into canonical deltas
///
/// Only the first candidate is accumulated.
pub fn google_chunk_deltas(state: &mut GoogleStreamState, chunk: &GoogleStreamChunk) -> Vec<StreamDelta> {
    let mut deltas = Vec::new();

    let Some(candidate) = chunk.candidates.first() else {
        return deltas;
    };

    for part in &candidate.content.parts {
        match part {
            GooglePart::Text(text) if !text.is_empty() => deltas.push(StreamDelta::Text(text.clone())),
            GooglePart::FunctionCall(call) => {
                let index = state.next_tool_call_index;
                state.next_tool_call_index += 1;

                deltas.push(StreamDelta::ToolCallStart {
                    index,
                    id: call.id.clone(),
                    name: call.name.clone(),
                });
                if !call.args.is_null() {
                    deltas.push(StreamDelta::ToolCallArguments {
                        index,
                        fragment: call.args.to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    deltas
}
