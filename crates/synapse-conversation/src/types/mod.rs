//! Provider-neutral conversation model
//!
//! These types carry no provider knowledge. Every wire format converts to and
//! from them, and [`History`] doubles as the persisted interchange document.

pub mod history;
pub mod message;

pub use history::{History, HistoryMetadata, Provider, SCHEMA_VERSION};
pub use message::{
    ContentForm, ContentKind, ContentShape, FunctionCallContent, FunctionResponseContent, ImageContent, Message,
    MessageContent, PdfContent, Role, TextContent, ToolCallContent, ToolResponseContent,
};
