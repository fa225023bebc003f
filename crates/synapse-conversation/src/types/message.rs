use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::error::{ConversionError, Location, Result};
use crate::types::Provider;

/// Role of a message participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    /// System instruction
    System,
    /// User message
    User,
    /// Assistant response
    Assistant,
    /// Tool result
    Tool,
    /// Legacy function result
    Function,
    /// Assistant response in providers that call the assistant "model"
    Model,
}

/// Discriminant of a [`MessageContent`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ContentKind {
    Text,
    Image,
    Pdf,
    ToolCall,
    ToolResponse,
    FunctionCall,
    FunctionResponse,
}

/// Plain text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    /// The text string
    pub text: String,
}

/// Image, carried inline or by reference
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContent {
    /// MIME type (e.g. "image/png")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Raw image bytes
    #[serde_as(as = "Option<Base64>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    /// URL or provider file URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Detail level hint (e.g. "auto", "low", "high")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ImageContent {
    /// Image carried as raw bytes
    pub fn inline(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            media_type: Some(media_type.into()),
            data: Some(data),
            ..Self::default()
        }
    }

    /// Image carried by reference
    pub fn reference(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Set the detail hint
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    fn validate(&self, at: Location) -> Result<()> {
        validate_binary(self.data.as_deref(), self.url.as_deref(), at)
    }
}

/// PDF document, carried inline or by reference
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfContent {
    /// Raw document bytes
    #[serde_as(as = "Option<Base64>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    /// URL or provider file reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl PdfContent {
    /// MIME type every provider expects for PDF documents
    pub const MEDIA_TYPE: &'static str = "application/pdf";

    /// Document carried as raw bytes
    pub const fn inline(data: Vec<u8>) -> Self {
        Self {
            data: Some(data),
            url: None,
        }
    }

    /// Document carried by reference
    pub fn reference(url: impl Into<String>) -> Self {
        Self {
            data: None,
            url: Some(url.into()),
        }
    }

    fn validate(&self, at: Location) -> Result<()> {
        validate_binary(self.data.as_deref(), self.url.as_deref(), at)
    }
}

fn validate_binary(data: Option<&[u8]>, url: Option<&str>, at: Location) -> Result<()> {
    let has_data = data.is_some_and(|d| !d.is_empty());
    let has_url = url.is_some_and(|u| !u.is_empty());

    if has_data || has_url {
        Ok(())
    } else {
        Err(ConversionError::invalid(
            "data",
            "binary content needs inline data or a reference url",
            at,
        ))
    }
}

/// Tool invocation requested by the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallContent {
    /// Identifier used to correlate the response
    pub id: String,
    /// Tool name
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

/// Result of a tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponseContent {
    /// ID of the tool call this responds to
    pub tool_call_id: String,
    /// Tool name
    pub name: String,
    /// Output produced by the tool
    pub response: String,
    /// Whether the tool reported a failure
    #[serde(default)]
    pub is_error: bool,
    /// Text blocks the output arrived in, when the provider split it
    ///
    /// `response` holds the same blocks newline-joined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<String>>,
}

impl ToolResponseContent {
    /// Blocks to re-emit, unless `response` was edited after decoding
    pub fn blocks(&self) -> Option<&[String]> {
        self.blocks
            .as_deref()
            .filter(|blocks| blocks.join("\n") == self.response)
    }
}

/// Legacy function call without a stable ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCallContent {
    /// Function name
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

/// Legacy function result, correlated by name only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionResponseContent {
    /// Function name
    pub name: String,
    /// Output produced by the function
    pub content: String,
}

/// Content passed inside a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text(TextContent),
    Image(ImageContent),
    Pdf(PdfContent),
    ToolCall(ToolCallContent),
    ToolResponse(ToolResponseContent),
    /// Decoded from legacy transcripts only
    FunctionCall(FunctionCallContent),
    /// Decoded from legacy transcripts only
    FunctionResponse(FunctionResponseContent),
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextContent { text: text.into() })
    }

    /// Image content, rejected unless it carries data or a reference
    pub fn image(image: ImageContent) -> Result<Self> {
        image.validate(Location::NONE)?;
        Ok(Self::Image(image))
    }

    /// PDF content, rejected unless it carries data or a reference
    pub fn pdf(pdf: PdfContent) -> Result<Self> {
        pdf.validate(Location::NONE)?;
        Ok(Self::Pdf(pdf))
    }

    /// Tool call content; both `id` and `name` are required
    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Result<Self> {
        let content = Self::ToolCall(ToolCallContent {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        });
        content.validate(Location::NONE)?;
        Ok(content)
    }

    /// Tool response content; `tool_call_id` is required
    pub fn tool_response(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        response: impl Into<String>,
        is_error: bool,
    ) -> Result<Self> {
        let content = Self::ToolResponse(ToolResponseContent {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            response: response.into(),
            is_error,
            blocks: None,
        });
        content.validate(Location::NONE)?;
        Ok(content)
    }

    pub fn function_call(name: impl Into<String>, arguments: impl Into<String>) -> Result<Self> {
        let content = Self::FunctionCall(FunctionCallContent {
            name: name.into(),
            arguments: arguments.into(),
        });
        content.validate(Location::NONE)?;
        Ok(content)
    }

    pub fn function_response(name: impl Into<String>, content: impl Into<String>) -> Result<Self> {
        let content = Self::FunctionResponse(FunctionResponseContent {
            name: name.into(),
            content: content.into(),
        });
        content.validate(Location::NONE)?;
        Ok(content)
    }

    pub const fn kind(&self) -> ContentKind {
        match self {
            Self::Text(_) => ContentKind::Text,
            Self::Image(_) => ContentKind::Image,
            Self::Pdf(_) => ContentKind::Pdf,
            Self::ToolCall(_) => ContentKind::ToolCall,
            Self::ToolResponse(_) => ContentKind::ToolResponse,
            Self::FunctionCall(_) => ContentKind::FunctionCall,
            Self::FunctionResponse(_) => ContentKind::FunctionResponse,
        }
    }

    /// Check the variant-specific required fields
    pub(crate) fn validate(&self, at: Location) -> Result<()> {
        match self {
            Self::Text(_) => Ok(()),
            Self::Image(image) => image.validate(at),
            Self::Pdf(pdf) => pdf.validate(at),
            Self::ToolCall(call) => {
                require("id", &call.id, at)?;
                require("name", &call.name, at)
            }
            Self::ToolResponse(response) => require("tool_call_id", &response.tool_call_id, at),
            Self::FunctionCall(call) => require("name", &call.name, at),
            Self::FunctionResponse(response) => require("name", &response.name, at),
        }
    }

    const fn mismatch(&self, expected: ContentKind) -> ConversionError {
        ConversionError::TypeMismatch {
            expected,
            found: self.kind(),
        }
    }

    pub fn as_text(&self) -> Result<&str> {
        match self {
            Self::Text(text) => Ok(&text.text),
            other => Err(other.mismatch(ContentKind::Text)),
        }
    }

    pub fn as_image(&self) -> Result<&ImageContent> {
        match self {
            Self::Image(image) => Ok(image),
            other => Err(other.mismatch(ContentKind::Image)),
        }
    }

    pub fn as_pdf(&self) -> Result<&PdfContent> {
        match self {
            Self::Pdf(pdf) => Ok(pdf),
            other => Err(other.mismatch(ContentKind::Pdf)),
        }
    }

    pub fn as_tool_call(&self) -> Result<&ToolCallContent> {
        match self {
            Self::ToolCall(call) => Ok(call),
            other => Err(other.mismatch(ContentKind::ToolCall)),
        }
    }

    pub fn as_tool_response(&self) -> Result<&ToolResponseContent> {
        match self {
            Self::ToolResponse(response) => Ok(response),
            other => Err(other.mismatch(ContentKind::ToolResponse)),
        }
    }

    pub fn as_function_call(&self) -> Result<&FunctionCallContent> {
        match self {
            Self::FunctionCall(call) => Ok(call),
            other => Err(other.mismatch(ContentKind::FunctionCall)),
        }
    }

    pub fn as_function_response(&self) -> Result<&FunctionResponseContent> {
        match self {
            Self::FunctionResponse(response) => Ok(response),
            other => Err(other.mismatch(ContentKind::FunctionResponse)),
        }
    }
}

fn require(field: &'static str, value: &str, at: Location) -> Result<()> {
    if value.is_empty() {
        Err(ConversionError::invalid(field, "must not be empty", at))
    } else {
        Ok(())
    }
}

/// Wire form a provider used for a message's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentForm {
    /// Explicit `null`
    Null,
    /// Bare string
    String,
    /// Array of parts or blocks
    Blocks,
}

/// Content form recorded on decode so the same provider can re-emit it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentShape {
    /// Provider that wrote the content
    pub provider: Provider,
    /// Form the content took on that provider's wire
    pub form: ContentForm,
}

/// One conversational turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message author
    pub role: Role,
    /// Ordered content blocks
    pub content: Vec<MessageContent>,
    /// Wire form to reproduce, set only where it differs from the codec's default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<ContentShape>,
}

impl Message {
    pub const fn new(role: Role) -> Self {
        Self {
            role,
            content: Vec::new(),
            shape: None,
        }
    }

    /// Record the wire form `provider` used for this message
    #[must_use]
    pub const fn with_shape(mut self, provider: Provider, form: ContentForm) -> Self {
        self.shape = Some(ContentShape { provider, form });
        self
    }

    /// Recorded content form, if `provider` wrote it
    pub fn form_for(&self, provider: Provider) -> Option<ContentForm> {
        self.shape.filter(|shape| shape.provider == provider).map(|shape| shape.form)
    }

    pub const fn system() -> Self {
        Self::new(Role::System)
    }

    pub const fn user() -> Self {
        Self::new(Role::User)
    }

    pub const fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    /// Add any content block to the message
    #[must_use]
    pub fn with_content(mut self, content: MessageContent) -> Self {
        self.content.push(content);
        self
    }

    #[must_use]
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_content(MessageContent::text(text))
    }

    /// Concatenate all text blocks, skipping other content
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text().ok())
            .collect::<Vec<_>>()
            .join("")
    }

    pub(crate) fn validate(&self, message_index: usize) -> Result<()> {
        for (i, content) in self.content.iter().enumerate() {
            content.validate(Location::content(message_index, i))?;
        }
        Ok(())
    }
}
