//! Incremental assembly of a streamed assistant turn
//!
//! Provider-specific adapters turn stream events into [`StreamDelta`]s. A
//! [`StreamAccumulator`] folds those deltas into one canonical [`Message`]
//! once the stream ends.

use std::collections::HashMap;

use crate::convert::common::synthetic_call_id;
use crate::error::{ConversionError, Location, Result};
use crate::types::{Message, MessageContent, ToolCallContent};

/// Provider-neutral stream increment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDelta {
    /// Text fragment
    Text(String),
    /// Start of a tool call
    ToolCallStart {
        /// Position of the call within the turn
        index: u32,
        /// Call ID when the provider supplies one
        id: Option<String>,
        /// Tool name
        name: String,
    },
    /// Fragment of a tool call's JSON arguments
    ToolCallArguments {
        /// Position of the call within the turn
        index: u32,
        /// Raw JSON fragment
        fragment: String,
    },
}

#[derive(Debug)]
enum Segment {
    Text(String),
    ToolCall {
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
}

/// Collects stream deltas in arrival order
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    segments: Vec<Segment>,
    /// Segment position for each tool call index
    tool_calls: HashMap<u32, usize>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: StreamDelta) {
        match delta {
            StreamDelta::Text(text) if text.is_empty() => {}
            StreamDelta::Text(text) => {
                if let Some(Segment::Text(buffer)) = self.segments.last_mut() {
                    buffer.push_str(&text);
                } else {
                    self.segments.push(Segment::Text(text));
                }
            }
            StreamDelta::ToolCallStart { index, id, name } => {
                if let Segment::ToolCall {
                    id: current_id,
                    name: current_name,
                    ..
                } = self.tool_call(index)
                {
                    if current_id.is_none() {
                        *current_id = id;
                    }
                    if current_name.as_deref().is_none_or(str::is_empty) {
                        *current_name = Some(name);
                    }
                }
            }
            StreamDelta::ToolCallArguments { index, fragment } => {
                if let Segment::ToolCall { arguments, .. } = self.tool_call(index) {
                    arguments.push_str(&fragment);
                }
            }
        }
    }

    pub fn extend(&mut self, deltas: impl IntoIterator<Item = StreamDelta>) {
        for delta in deltas {
            self.push(delta);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Build the assistant message for the completed stream
    ///
    /// Tool calls without arguments get `{}`; calls without an ID get a
    /// synthetic one.
    pub fn finish(self) -> Result<Message> {
        let mut message = Message::assistant();
        let mut call_ordinal = 0;

        for (j, segment) in self.segments.into_iter().enumerate() {
            let at = Location::content(0, j);

            let content = match segment {
                Segment::Text(text) => MessageContent::text(text),
                Segment::ToolCall { id, name, arguments } => {
                    let name = name
                        .filter(|n| !n.is_empty())
                        .ok_or_else(|| ConversionError::invalid("name", "streamed tool call never named its tool", at))?;

                    let arguments = if arguments.trim().is_empty() {
                        "{}".to_owned()
                    } else {
                        serde_json::from_str::<serde::de::IgnoredAny>(&arguments)
                            .map_err(|e| ConversionError::failed("arguments", at, e))?;
                        arguments
                    };

                    let id = id
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(|| synthetic_call_id(&name, call_ordinal));
                    call_ordinal += 1;

                    MessageContent::ToolCall(ToolCallContent { id, name, arguments })
                }
            };

            message.content.push(content);
        }

        Ok(message)
    }

    fn tool_call(&mut self, index: u32) -> &mut Segment {
        let position = *self.tool_calls.entry(index).or_insert_with(|| {
            self.segments.push(Segment::ToolCall {
                id: None,
                name: None,
                arguments: String::new(),
            });
            self.segments.len() - 1
        });

        &mut self.segments[position]
    }
}
