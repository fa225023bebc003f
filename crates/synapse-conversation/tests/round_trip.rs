use indoc::indoc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use synapse_conversation::types::ImageContent;
use synapse_conversation::{
    AnthropicCodec, Codec, ConversionError, GoogleCodec, History, Message, MessageContent, OpenAiCodec, Provider,
};

/// Decode a transcript, re-encode it and compare as JSON values
fn assert_round_trip<C>(codec: &C, transcript: &str)
where
    C: Codec,
    C::Wire: Serialize + DeserializeOwned,
{
    let history = codec.decode_json(transcript).unwrap();
    let encoded = serde_json::to_value(codec.encode(&history).unwrap()).unwrap();
    let original: serde_json::Value = serde_json::from_str(transcript).unwrap();

    assert_eq!(encoded, original);
}

#[test]
fn openai_mixed_transcript() {
    assert_round_trip(
        &OpenAiCodec,
        indoc! {r#"
            [
                {"role": "system", "content": "You review pull requests."},
                {"role": "user", "content": [
                    {"type": "text", "text": "Review this diagram and design doc."},
                    {"type": "image_url", "image_url": {"url": "https://example.com/arch.png", "detail": "high"}},
                    {"type": "file", "file": {"file_data": "data:application/pdf;base64,JVBERi0xLjQ="}}
                ]},
                {"role": "assistant", "content": "Fetching the diff.", "tool_calls": [
                    {"id": "call_a", "type": "function", "function": {"name": "diff", "arguments": "{\"pr\":42}"}},
                    {"id": "call_b", "type": "function", "function": {"name": "ci_status", "arguments": "{}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_a", "content": "+ fn main() {}"},
                {"role": "tool", "tool_call_id": "call_b", "content": "green"},
                {"role": "assistant", "content": "Looks good."}
            ]
        "#},
    );
}

#[test]
fn anthropic_mixed_transcript() {
    assert_round_trip(
        &AnthropicCodec::default(),
        indoc! {r#"
            {
                "system": "You review pull requests.",
                "messages": [
                    {"role": "user", "content": [
                        {"type": "text", "text": "Review this."},
                        {"type": "document", "source": {"type": "url", "url": "https://example.com/spec.pdf"}}
                    ]},
                    {"role": "assistant", "content": [
                        {"type": "text", "text": "Checking CI."},
                        {"type": "tool_use", "id": "toolu_1", "name": "ci_status", "input": {"branch": "main"}}
                    ]},
                    {"role": "user", "content": [
                        {"type": "tool_result", "tool_use_id": "toolu_1", "content": "red", "is_error": true},
                        {"type": "text", "text": "Why is it red?"}
                    ]}
                ]
            }
        "#},
    );
}

#[test]
fn google_mixed_transcript() {
    assert_round_trip(
        &GoogleCodec::default(),
        indoc! {r#"
            {
                "contents": [
                    {"role": "user", "parts": [
                        {"text": "Summarize this file."},
                        {"fileData": {"mimeType": "application/pdf", "fileUri": "gs://docs/report.pdf"}}
                    ]},
                    {"role": "model", "parts": [
                        {"functionCall": {"name": "read_pages", "args": {"from": 1, "to": 3}}}
                    ]},
                    {"role": "user", "parts": [
                        {"functionResponse": {"name": "read_pages", "response": {"result": "Quarterly revenue grew."}}}
                    ]},
                    {"role": "model", "parts": [{"text": "Revenue grew this quarter."}]}
                ]
            }
        "#},
    );
}

#[test]
fn openai_legacy_function_transcript() {
    let history = OpenAiCodec
        .decode_json(indoc! {r#"
            [
                {"role": "user", "content": "Time in Tokyo?"},
                {"role": "assistant", "content": null, "function_call": {"name": "clock", "arguments": "{\"tz\":\"Asia/Tokyo\"}"}},
                {"role": "function", "name": "clock", "content": "09:00"}
            ]
        "#})
        .unwrap();

    let encoded = serde_json::to_value(OpenAiCodec.encode(&history).unwrap()).unwrap();

    assert_eq!(encoded[1]["tool_calls"][0]["id"], "call_clock_0");
    assert_eq!(encoded[2]["tool_call_id"], "call_clock_0");
    assert_eq!(encoded[2]["content"], "09:00");
}

#[test]
fn persisted_history_survives_restore() {
    let mut history = History::new(Provider::Google);
    history.push(Message::system().with_text("Be brief."));
    history.push(
        Message::user()
            .with_text("What is in this picture?")
            .with_content(MessageContent::image(ImageContent::inline("image/gif", b"GIF89a".to_vec())).unwrap()),
    );
    history.push(Message::assistant().with_content(MessageContent::tool_call("call_1", "vision", "{}").unwrap()));
    history.push(Message::user().with_content(MessageContent::tool_response("call_1", "vision", "a cat", false).unwrap()));

    let persisted = history.to_json().unwrap();
    assert!(persisted.contains(r#""data":"R0lGODlh""#));

    let restored = GoogleCodec::default().restore(&persisted).unwrap();
    assert_eq!(restored, history);
}

#[test]
fn failed_decode_leaves_history_untouched() {
    let mut history = OpenAiCodec
        .decode_json(r#"[{"role": "user", "content": "first"}]"#)
        .unwrap();

    let wire = serde_json::from_str(indoc! {r#"
        [
            {"role": "assistant", "content": "fine"},
            {"role": "user", "content": [{"type": "input_audio", "input_audio": {"data": "AAAA", "format": "mp3"}}]}
        ]
    "#})
    .unwrap();

    let err = OpenAiCodec.decode_into(&mut history, wire).unwrap_err();
    assert!(matches!(err, ConversionError::UnsupportedContentType { .. }));
    assert_eq!(history.len(), 1);
}

#[test]
fn decode_into_correlates_with_earlier_turns() {
    let mut history = GoogleCodec::default()
        .decode_json(r#"{"contents": [{"role": "model", "parts": [{"functionCall": {"name": "roll", "args": {}}}]}]}"#)
        .unwrap();

    let wire = serde_json::from_str(
        r#"{"contents": [{"role": "user", "parts": [{"functionResponse": {"name": "roll", "response": {"result": "6"}}}]}]}"#,
    )
    .unwrap();
    GoogleCodec::default().decode_into(&mut history, wire).unwrap();

    let call = history.messages()[0].content[0].as_tool_call().unwrap();
    let response = history.messages()[1].content[0].as_tool_response().unwrap();
    assert_eq!(response.tool_call_id, call.id);
    assert_eq!(response.response, "6");
}
