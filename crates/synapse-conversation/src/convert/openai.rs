//! Conversion between the canonical history and `OpenAI` chat messages

use std::mem;

use super::Codec;
use super::common::{
    CallIdTracker, RoleMapping, data_uri, decode_base64, image_media_type, log_dropped, log_empty_message,
    parse_data_uri, synthetic_call_id,
};
use crate::error::{ConversionError, Location, Result};
use crate::protocol::openai::{
    OpenAiContent, OpenAiContentPart, OpenAiFile, OpenAiFunctionCall, OpenAiImageUrl, OpenAiMessage, OpenAiResponse,
    OpenAiStreamChunk, OpenAiToolCall,
};
use crate::stream::StreamDelta;
use crate::types::{
    ContentForm, ContentShape, FunctionCallContent, FunctionResponseContent, History, ImageContent, Message,
    MessageContent, PdfContent, Provider, Role, ToolCallContent, ToolResponseContent,
};

const ROLES: RoleMapping = RoleMapping::new(
    Provider::OpenAi,
    &[
        (Role::System, Some("system")),
        (Role::User, Some("user")),
        (Role::Assistant, Some("assistant")),
        (Role::Tool, Some("tool")),
        (Role::Function, Some("function")),
        (Role::Model, Some("assistant")),
    ],
    &[("developer", Role::System)],
);

/// Codec for `OpenAI` chat completion messages
///
/// System prompts use the native `system` role. Tool and function results
/// always travel as separate `tool` messages, so one canonical message can
/// encode to several wire messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiCodec;

impl Codec for OpenAiCodec {
    type Wire = Vec<OpenAiMessage>;

    const PROVIDER: Provider = Provider::OpenAi;

    fn encode(&self, history: &History) -> Result<Vec<OpenAiMessage>> {
        let mut encoder = Encoder::default();

        for (i, message) in history.messages().iter().enumerate() {
            encoder.message(i, message)?;
        }

        Ok(encoder.output)
    }

    fn decode_messages(&self, prior: &[Message], wire: Vec<OpenAiMessage>) -> Result<Vec<Message>> {
        // Tool messages may answer calls made before this transcript
        let mut calls = CallIdTracker::from_messages(prior);

        wire.into_iter()
            .enumerate()
            .map(|(i, message)| decode_message(i, message, &mut calls))
            .collect()
    }
}

impl OpenAiCodec {
    /// Decode the first choice of a chat completion response
    #[allow(clippy::unused_self)]
    pub fn decode_response(&self, response: OpenAiResponse) -> Result<Message> {
        // Lowest choice index wins
        let choice = response
            .choices
            .into_iter()
            .min_by_key(|c| c.index)
            .ok_or_else(|| ConversionError::invalid("choices", "response has no choices", Location::NONE))?;

        decode_message(0, choice.message, &mut CallIdTracker::new())
    }
}

// -- Outbound: canonical history -> OpenAI wire format --

/// Wire message being assembled from one canonical message
#[derive(Debug, Default)]
struct Pending {
    parts: Vec<OpenAiContentPart>,
    tool_calls: Vec<OpenAiToolCall>,
}

impl Pending {
    const fn is_empty(&self) -> bool {
        self.parts.is_empty() && self.tool_calls.is_empty()
    }

    fn into_message(self, role: &str, form: Option<ContentForm>) -> OpenAiMessage {
        let mut message = OpenAiMessage::new(role);

        // A lone text part collapses to a string unless it arrived as an array
        message.content = match <[_; 1]>::try_from(self.parts) {
            Ok([OpenAiContentPart::Text { text }]) if form != Some(ContentForm::Blocks) => {
                Some(Some(OpenAiContent::Text(text)))
            }
            Ok(part) => Some(Some(OpenAiContent::Parts(part.into()))),
            Err(parts) if parts.is_empty() => match form {
                Some(ContentForm::Null) => Some(None),
                Some(ContentForm::Blocks) => Some(Some(OpenAiContent::Parts(parts))),
                Some(ContentForm::String) | None => None,
            },
            Err(parts) => Some(Some(OpenAiContent::Parts(parts))),
        };

        if !self.tool_calls.is_empty() {
            message.tool_calls = Some(self.tool_calls);
        }

        message
    }
}

#[derive(Debug, Default)]
struct Encoder {
    output: Vec<OpenAiMessage>,
    calls: CallIdTracker,
}

impl Encoder {
    fn message(&mut self, index: usize, message: &Message) -> Result<()> {
        let role = ROLES.token(message.role).unwrap_or("user");
        let form = message.form_for(Provider::OpenAi);
        let emitted = self.output.len();
        let mut pending = Pending::default();
        let mut legacy_ordinal = 0;

        for (j, content) in message.content.iter().enumerate() {
            let at = Location::content(index, j);

            match content {
                MessageContent::Text(text) if role != "tool" && role != "function" => {
                    pending.parts.push(OpenAiContentPart::Text { text: text.text.clone() });
                }
                MessageContent::Image(image) if role == "user" => {
                    pending.parts.push(image_part(image, at)?);
                }
                MessageContent::Pdf(pdf) if role == "user" => {
                    pending.parts.push(file_part(pdf, at)?);
                }
                MessageContent::ToolCall(call) if role == "assistant" => {
                    self.calls.record(&call.name, &call.id);
                    pending.tool_calls.push(tool_call(call.id.clone(), &call.name, &call.arguments));
                }
                // Legacy calls need an id for the tool message that answers them
                MessageContent::FunctionCall(call) if role == "assistant" => {
                    let id = synthetic_call_id(&call.name, legacy_ordinal);
                    legacy_ordinal += 1;
                    self.calls.record(&call.name, &id);
                    pending.tool_calls.push(tool_call(id, &call.name, &call.arguments));
                }
                // Tool results become standalone tool messages
                MessageContent::ToolResponse(response) => {
                    self.calls.answer(&response.tool_call_id);
                    self.flush(role, form, &mut pending);
                    self.output
                        .push(tool_message(response.tool_call_id.clone(), response.response.clone()));
                }
                MessageContent::FunctionResponse(response) => {
                    let id = self
                        .calls
                        .resolve(&response.name)
                        .unwrap_or_else(|| synthetic_call_id(&response.name, 0));
                    self.flush(role, form, &mut pending);
                    self.output.push(tool_message(id, response.content.clone()));
                }
                other => log_dropped(Provider::OpenAi, other.kind(), at),
            }
        }

        // An explicit null or empty array still yields a wire message
        if pending.is_empty() && form.is_some() && self.output.len() == emitted {
            self.output.push(Pending::default().into_message(role, form));
        } else {
            self.flush(role, form, &mut pending);
        }

        if self.output.len() == emitted {
            log_empty_message(Provider::OpenAi, index);
        }

        Ok(())
    }

    fn flush(&mut self, role: &str, form: Option<ContentForm>, pending: &mut Pending) {
        if !pending.is_empty() {
            self.output.push(mem::take(pending).into_message(role, form));
        }
    }
}

fn tool_call(id: String, name: &str, arguments: &str) -> OpenAiToolCall {
    OpenAiToolCall {
        id,
        tool_type: "function".to_owned(),
        function: OpenAiFunctionCall {
            name: name.to_owned(),
            arguments: arguments.to_owned(),
        },
    }
}

fn tool_message(tool_call_id: String, content: String) -> OpenAiMessage {
    let mut message = OpenAiMessage::new("tool");
    message.content = Some(Some(OpenAiContent::Text(content)));
    message.tool_call_id = Some(tool_call_id);
    message
}

fn image_part(image: &ImageContent, at: Location) -> Result<OpenAiContentPart> {
    let url = match (&image.data, &image.url) {
        (Some(bytes), _) if !bytes.is_empty() => data_uri(image_media_type(image, bytes, at)?, bytes),
        (_, Some(url)) if !url.is_empty() => url.clone(),
        _ => {
            return Err(ConversionError::invalid(
                "data",
                "binary content needs inline data or a reference url",
                at,
            ));
        }
    };

    Ok(OpenAiContentPart::ImageUrl {
        image_url: OpenAiImageUrl {
            url,
            detail: image.detail.clone(),
        },
    })
}

/// PDFs go inline as a data URI; references map to uploaded file IDs
fn file_part(pdf: &PdfContent, at: Location) -> Result<OpenAiContentPart> {
    let file = match (&pdf.data, &pdf.url) {
        (Some(bytes), _) if !bytes.is_empty() => OpenAiFile {
            file_data: Some(data_uri(PdfContent::MEDIA_TYPE, bytes)),
            ..OpenAiFile::default()
        },
        (_, Some(url)) if !url.is_empty() => OpenAiFile {
            file_id: Some(url.clone()),
            ..OpenAiFile::default()
        },
        _ => {
            return Err(ConversionError::invalid(
                "data",
                "binary content needs inline data or a reference url",
                at,
            ));
        }
    };

    Ok(OpenAiContentPart::File { file })
}

// -- Inbound: OpenAI wire format -> canonical history --

fn decode_message(index: usize, message: OpenAiMessage, calls: &mut CallIdTracker) -> Result<Message> {
    let at = Location::message(index);
    let role = ROLES.role(&message.role, at)?;
    let mut form = None;

    let content = match role {
        Role::Tool => {
            let tool_call_id = message
                .tool_call_id
                .filter(|id| !id.is_empty())
                .ok_or_else(|| ConversionError::invalid("tool_call_id", "is required on tool messages", at))?;
            // Name comes from the call this message answers
            let name = message
                .name
                .or_else(|| calls.name_of(&tool_call_id).map(str::to_owned))
                .unwrap_or_default();
            calls.answer(&tool_call_id);

            vec![MessageContent::ToolResponse(ToolResponseContent {
                tool_call_id,
                name,
                response: plain_text(message.content.flatten(), at)?,
                is_error: false,
                blocks: None,
            })]
        }
        // Legacy function results are matched by name
        Role::Function => {
            let name = message
                .name
                .filter(|name| !name.is_empty())
                .ok_or_else(|| ConversionError::invalid("name", "is required on function messages", at))?;
            calls.resolve(&name);

            vec![MessageContent::FunctionResponse(FunctionResponseContent {
                name,
                content: plain_text(message.content.flatten(), at)?,
            })]
        }
        _ => {
            let mut content = Vec::new();

            // Remember forms the default encoding would not reproduce
            form = match &message.content {
                Some(None) => Some(ContentForm::Null),
                Some(Some(OpenAiContent::Parts(parts)))
                    if matches!(
                        parts.as_slice(),
                        [] | [OpenAiContentPart::Text { .. } | OpenAiContentPart::Refusal { .. }]
                    ) =>
                {
                    Some(ContentForm::Blocks)
                }
                _ => None,
            };

            match message.content.flatten() {
                Some(OpenAiContent::Text(text)) => content.push(MessageContent::text(text)),
                Some(OpenAiContent::Parts(parts)) => {
                    for part in parts {
                        let part_at = Location::content(index, content.len());
                        content.push(decode_part(part, part_at)?);
                    }
                }
                None => {}
            }

            // Tool calls follow the content parts
            for call in message.tool_calls.unwrap_or_default() {
                let call_at = Location::content(index, content.len());
                calls.record(&call.function.name, &call.id);
                let call = MessageContent::ToolCall(ToolCallContent {
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                });
                call.validate(call_at)?;
                content.push(call);
            }

            if let Some(call) = message.function_call {
                let call_at = Location::content(index, content.len());
                calls.record(&call.name, &synthetic_call_id(&call.name, 0));
                let call = MessageContent::FunctionCall(FunctionCallContent {
                    name: call.name,
                    arguments: call.arguments,
                });
                call.validate(call_at)?;
                content.push(call);
            }

            content
        }
    };

    Ok(Message {
        role,
        content,
        shape: form.map(|form| ContentShape {
            provider: Provider::OpenAi,
            form,
        }),
    })
}

fn decode_part(part: OpenAiContentPart, at: Location) -> Result<MessageContent> {
    match part {
        OpenAiContentPart::Text { text } | OpenAiContentPart::Refusal { refusal: text } => {
            Ok(MessageContent::text(text))
        }
        OpenAiContentPart::ImageUrl { image_url } => {
            let mut image = if let Some((media_type, payload)) = parse_data_uri(&image_url.url) {
                ImageContent::inline(media_type, decode_base64(payload, at)?)
            } else if image_url.url.is_empty() {
                return Err(ConversionError::invalid("url", "image_url has no url", at));
            } else {
                ImageContent::reference(image_url.url)
            };
            image.detail = image_url.detail;
            Ok(MessageContent::Image(image))
        }
        OpenAiContentPart::File { file } => decode_file(file, at),
        other @ OpenAiContentPart::InputAudio { .. } => {
            Err(ConversionError::unsupported(Provider::OpenAi, other.type_name(), at))
        }
    }
}

fn decode_file(file: OpenAiFile, at: Location) -> Result<MessageContent> {
    if let Some(file_data) = file.file_data.filter(|d| !d.is_empty()) {
        let (media_type, payload) = parse_data_uri(&file_data)
            .ok_or_else(|| ConversionError::invalid("file_data", "must be a base64 data URI", at))?;

        if media_type != PdfContent::MEDIA_TYPE {
            return Err(ConversionError::unsupported(Provider::OpenAi, format!("file {media_type}"), at));
        }

        return Ok(MessageContent::Pdf(PdfContent::inline(decode_base64(payload, at)?)));
    }

    match file.file_id.filter(|id| !id.is_empty()) {
        Some(file_id) => Ok(MessageContent::Pdf(PdfContent::reference(file_id))),
        None => Err(ConversionError::invalid(
            "file",
            "needs file_data or a file_id reference",
            at,
        )),
    }
}

/// Text of a tool or function message, which may not carry other parts
fn plain_text(content: Option<OpenAiContent>, at: Location) -> Result<String> {
    match content {
        None => Ok(String::new()),
        Some(OpenAiContent::Text(text)) => Ok(text),
        Some(OpenAiContent::Parts(parts)) => parts
            .into_iter()
            .map(|part| match part {
                OpenAiContentPart::Text { text } => Ok(text),
                other => Err(ConversionError::unsupported(Provider::OpenAi, other.type_name(), at)),
            })
            .collect(),
    }
}

// -- Stream conversion --

/// Convert an `OpenAI` stream chunk into canonical deltas
///
/// Only the first choice is accumulated.
pub fn openai_chunk_deltas(chunk: &OpenAiStreamChunk) -> Vec<StreamDelta> {
    let mut deltas = Vec::new();

    let Some(choice) = chunk.choices.iter().find(|c| c.index == 0) else {
        return deltas;
    };

    if let Some(text) = &choice.delta.content
        && !text.is_empty()
    {
        deltas.push(StreamDelta::Text(text.clone()));
    }

    for call in choice.delta.tool_calls.iter().flatten() {
        let name = call.function.as_ref().and_then(|f| f.name.clone());

        if call.id.is_some() || name.is_some() {
            deltas.push(StreamDelta::ToolCallStart {
                index: call.index,
                id: call.id.clone(),
                name: name.unwrap_or_default(),
            });
        }

        if let Some(arguments) = call.function.as_ref().and_then(|f| f.arguments.as_ref())
            && !arguments.is_empty()
        {
            deltas.push(StreamDelta::ToolCallArguments {
                index: call.index,
                fragment: arguments.clone(),
            });
        }
    }

    deltas
}
