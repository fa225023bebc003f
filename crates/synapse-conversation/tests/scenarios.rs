use indoc::indoc;
use serde_json::json;
use synapse_conversation::protocol::google::GooglePart;
use synapse_conversation::types::ContentKind;
use synapse_conversation::{
    AnthropicCodec, Codec, ConversionError, GoogleCodec, History, Message, MessageContent, OpenAiCodec, Provider, Role,
};

const ANTHROPIC_TOOL_EXCHANGE: &str = indoc! {r#"
    {
        "messages": [
            {"role": "user", "content": [{"type": "text", "text": "How many stars does the repo have?"}]},
            {"role": "assistant", "content": [
                {"type": "tool_use", "id": "toolu_01A", "name": "repo_stats", "input": {"repo": "synapse", "fields": ["stars"]}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_01A", "content": "{\"stars\": 1200}"}
            ]}
        ]
    }
"#};

#[test]
fn anthropic_tool_exchange_decodes_and_re_encodes() {
    let codec = AnthropicCodec::default();
    let history = codec.decode_json(ANTHROPIC_TOOL_EXCHANGE).unwrap();

    assert_eq!(history.len(), 3);
    assert_eq!(history.origin_provider(), Provider::Anthropic);

    let shape: Vec<(Role, ContentKind)> = history
        .messages()
        .iter()
        .map(|m| (m.role, m.content[0].kind()))
        .collect();
    assert_eq!(
        shape,
        [
            (Role::User, ContentKind::Text),
            (Role::Assistant, ContentKind::ToolCall),
            (Role::User, ContentKind::ToolResponse),
        ]
    );

    let encoded = serde_json::to_value(codec.encode(&history).unwrap()).unwrap();
    let original: serde_json::Value = serde_json::from_str(ANTHROPIC_TOOL_EXCHANGE).unwrap();
    assert_eq!(encoded, original);
}

#[test]
fn google_merges_system_prompt_into_single_message() {
    let mut history = History::new(Provider::OpenAi);
    history.push(Message::system().with_text("You are a travel agent."));
    history.push(Message::user().with_text("Plan a weekend in Lisbon."));

    let encoded = GoogleCodec::default().encode(&history).unwrap();

    assert!(encoded.system_instruction.is_none());
    assert_eq!(encoded.contents.len(), 1);
    assert_eq!(encoded.contents[0].role.as_deref(), Some("user"));
    assert_eq!(
        encoded.contents[0].parts,
        [GooglePart::Text("You are a travel agent.\nPlan a weekend in Lisbon.".to_owned())]
    );
}

#[test]
fn conversation_moves_from_openai_to_anthropic() {
    let mut history = OpenAiCodec
        .decode_json(indoc! {r#"
            [
                {"role": "system", "content": "Use metric units."},
                {"role": "user", "content": "Temperature in Oslo?"},
                {"role": "assistant", "tool_calls": [
                    {"id": "call_9", "type": "function", "function": {"name": "weather", "arguments": "{\"city\":\"Oslo\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_9", "content": "4C"},
                {"role": "assistant", "content": "It is 4C in Oslo."}
            ]
        "#})
        .unwrap();

    history.hand_off(Provider::Anthropic);
    let encoded = serde_json::to_value(AnthropicCodec::default().encode(&history).unwrap()).unwrap();

    assert_eq!(
        encoded,
        json!({
            "system": "Use metric units.",
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "Temperature in Oslo?"}]},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "call_9", "name": "weather", "input": {"city": "Oslo"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "call_9", "content": "4C"}
                ]},
                {"role": "assistant", "content": [{"type": "text", "text": "It is 4C in Oslo."}]}
            ]
        })
    );

    let persisted = history.to_json().unwrap();
    let restored = AnthropicCodec::default().restore(&persisted).unwrap();
    assert_eq!(restored.metadata().original_provider, Provider::OpenAi);
    assert_eq!(restored, history);

    let err = OpenAiCodec.restore(&persisted).unwrap_err();
    assert!(matches!(err, ConversionError::ProviderMismatch { .. }));
}

#[test]
fn google_history_reaches_openai_with_synthetic_ids() {
    let history = GoogleCodec::default()
        .decode_json(indoc! {r#"
            {
                "contents": [
                    {"role": "user", "parts": [{"text": "Convert 10 USD"}]},
                    {"role": "model", "parts": [{"functionCall": {"name": "fx", "args": {"amount": 10}}}]},
                    {"role": "user", "parts": [{"functionResponse": {"name": "fx", "response": {"eur": 9.2}}}]}
                ]
            }
        "#})
        .unwrap();

    let encoded = serde_json::to_value(OpenAiCodec.encode(&history).unwrap()).unwrap();

    assert_eq!(encoded[1]["tool_calls"][0]["id"], "call_fx_0");
    assert_eq!(encoded[2]["role"], "tool");
    assert_eq!(encoded[2]["tool_call_id"], "call_fx_0");
    assert_eq!(encoded[2]["content"], r#"{"eur":9.2}"#);
}

#[test]
fn images_are_dropped_for_assistant_turns_only() {
    let image = MessageContent::image(synapse_conversation::types::ImageContent::reference(
        "https://example.com/chart.png",
    ))
    .unwrap();

    let mut history = History::new(Provider::OpenAi);
    history.push(Message::user().with_content(image.clone()).with_text("What does this show?"));
    history.push(Message::assistant().with_content(image).with_text("A rising trend."));

    let encoded = AnthropicCodec::default().encode(&history).unwrap();
    let value = serde_json::to_value(&encoded).unwrap();

    assert_eq!(value["messages"][0]["content"].as_array().unwrap().len(), 2);
    assert_eq!(
        value["messages"][1]["content"],
        json!([{"type": "text", "text": "A rising trend."}])
    );
}
