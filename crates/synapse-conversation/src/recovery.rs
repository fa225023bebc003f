//! Recovery of JSON payloads from free-form model output
//!
//! Providers without a native structured-output mode wrap JSON in prose,
//! markdown fences or both, and a stream may stop in the middle of a value.
//! [`JsonRecovery`] runs an ordered cascade of extraction strategies, the
//! first success wins:
//!
//! 1. the trimmed text is already a JSON object or array
//! 2. the body of a fenced code block
//! 3. the longest balanced, parseable `{..}` / `[..]` span
//! 4. the text with common preambles and fence markers trimmed, then a
//!    value that spans whole lines
//! 5. fragments separated by blank lines or fence markers
//! 6. fuzzy repair (quote normalization, bare keys and values, trailing
//!    commas) followed by the balanced-span scan
//! 7. the longest parseable substring starting at any opening delimiter
//!
//! Before step 3, input that ends inside an open string or structure, even
//! after quote normalization, is treated as still streaming and left alone. Recovery never fails: when no
//! strategy validates, the original text is returned unchanged.

use std::borrow::Cow;
use std::cmp::Reverse;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::RecoveryConfig;

#[derive(Debug, Clone)]
struct Patterns {
    /// Fenced code block, optional language tag
    fence: Regex,
    /// Lead-in such as "Here's the JSON:" or an opening fence
    preamble: Regex,
    /// Closing fence and trailing whitespace
    postscript: Regex,
}

impl Patterns {
    fn compile() -> Self {
        Self {
            fence: Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("must be valid regex"),
            preamble: Regex::new(
                r"(?i)^(?:\s*(?:(?:here(?:'s| is| are)|below is|the following is)[^\n{\[]*?:|(?:json|output|result|response)\s*:|```[A-Za-z0-9_+-]*))+\s*",
            )
            .expect("must be valid regex"),
            postscript: Regex::new(r"\s*```\s*$").expect("must be valid regex"),
        }
    }
}

/// Extracts a JSON object or array from model text
#[derive(Debug, Clone)]
pub struct JsonRecovery {
    max_scan_bytes: usize,
    patterns: OnceLock<Patterns>,
}

impl Default for JsonRecovery {
    fn default() -> Self {
        Self::new(&RecoveryConfig::default())
    }
}

impl JsonRecovery {
    pub const fn new(config: &RecoveryConfig) -> Self {
        Self {
            max_scan_bytes: config.max_scan_bytes,
            patterns: OnceLock::new(),
        }
    }

    /// The recovered JSON, or `text` unchanged when nothing validates
    pub fn recover<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match self.extract(text) {
            Some(json) if json != text => Cow::Owned(json),
            _ => Cow::Borrowed(text),
        }
    }

    /// Run the cascade and return the first valid payload
    pub fn extract(&self, text: &str) -> Option<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        if is_json_document(trimmed) {
            return Some(found("direct", trimmed));
        }

        if let Some(json) = self.fenced(text) {
            return Some(found("fenced", json));
        }

        // Single-quoted strings may hold a stray double quote
        if is_incomplete(text) && is_incomplete(&double_quote(text)) {
            tracing::trace!(len = text.len(), "text ends inside an open JSON value");
            return None;
        }

        if let Some(json) = longest_balanced_span(text) {
            return Some(found("balanced_span", json));
        }

        let bounded = text.len() <= self.max_scan_bytes;

        if let Some(json) = self.trimmed(text, bounded) {
            return Some(found("trimmed", &json));
        }

        if let Some(json) = fragment(text) {
            return Some(found("fragment", json));
        }

        if let Some(json) = repaired(text) {
            return Some(found("repaired", &json));
        }

        if bounded && let Some(json) = longest_parseable(text) {
            return Some(found("exhaustive", json));
        }

        tracing::trace!(len = text.len(), "no JSON payload found");
        None
    }

    fn patterns(&self) -> &Patterns {
        self.patterns.get_or_init(Patterns::compile)
    }

    fn fenced<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.patterns()
            .fence
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|body| body.as_str().trim())
            .find(|body| is_json_document(body))
    }

    /// Strip lead-ins and closing fences, then search contiguous line ranges
    fn trimmed(&self, text: &str, bounded: bool) -> Option<String> {
        let patterns = self.patterns();
        let body = patterns.preamble.replace(text, "");
        let body = patterns.postscript.replace(&body, "");
        let body = body.trim();

        if is_json_document(body) {
            return Some(body.to_owned());
        }

        if !bounded {
            return None;
        }

        // A value opening a line closes at one place; it must also end that line
        let mut offset = 0;

        for line in body.split_inclusive('\n') {
            let start = offset + (line.len() - line.trim_start().len());
            offset += line.len();

            if !line.trim_start().starts_with(['{', '[']) {
                continue;
            }

            if let Some(end) = leading_document_len(&body[start..]).map(|len| start + len)
                && body[end..].split('\n').next().is_some_and(|rest| rest.trim().is_empty())
            {
                return Some(body[start..end].to_owned());
            }
        }

        None
    }
}

fn found(strategy: &'static str, json: &str) -> String {
    tracing::debug!(strategy, len = json.len(), "recovered JSON payload");
    json.to_owned()
}

/// Whether `text` parses as a JSON object or array
fn is_json_document(text: &str) -> bool {
    matches!(text.as_bytes().first(), Some(b'{' | b'['))
        && serde_json::from_str::<serde_json::Value>(text).is_ok_and(|v| v.is_object() || v.is_array())
}

/// Whether the text stops inside a string literal or an unclosed structure
///
/// Strings are only tracked while inside a structure so that quotes in the
/// surrounding prose do not count.
fn is_incomplete(text: &str) -> bool {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for b in text.bytes() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'{' | b'[' => depth += 1,
            b'}' | b']' => depth = depth.saturating_sub(1),
            b'"' if depth > 0 => in_string = true,
            _ => {}
        }
    }

    depth > 0 || in_string
}

/// Byte offsets of every matched delimiter pair, found in one pass
///
/// Strings are only tracked inside a structure. A mismatched closer discards
/// all delimiters still open.
fn balanced_pairs(text: &str) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    let mut open: Vec<(usize, u8)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' if !open.is_empty() => in_string = true,
            b'{' => open.push((i, b'}')),
            b'[' => open.push((i, b']')),
            b'}' | b']' => match open.pop() {
                Some((start, closer)) if closer == b => pairs.push((start, i)),
                _ => open.clear(),
            },
            _ => {}
        }
    }

    pairs
}

/// Longest balanced span that parses; the earliest wins a tie
fn longest_balanced_span(text: &str) -> Option<&str> {
    let mut pairs = balanced_pairs(text);
    pairs.sort_unstable_by_key(|&(start, end)| (Reverse(end - start), start));

    pairs
        .into_iter()
        .map(|(start, end)| &text[start..=end])
        .find(|span| is_json_document(span))
}

/// Length of the object or array that `text` opens with, when it parses
///
/// Anything after the value is ignored.
fn leading_document_len(text: &str) -> Option<usize> {
    let mut values = serde_json::Deserializer::from_str(text).into_iter::<serde_json::Value>();

    match values.next() {
        Some(Ok(value)) if value.is_object() || value.is_array() => Some(values.byte_offset()),
        _ => None,
    }
}

fn fragment(text: &str) -> Option<&str> {
    text.split("```")
        .flat_map(|chunk| chunk.split("\n\n"))
        .map(|piece| {
            let piece = piece.trim();
            piece.strip_prefix("json").map_or(piece, str::trim_start)
        })
        .find(|piece| is_json_document(piece))
}

/// Repair the region between the first opener and the last closer, then rescan
fn repaired(text: &str) -> Option<String> {
    let start = text.find(['{', '['])?;
    let end = text
        .rfind(['}', ']'])
        .filter(|&end| end > start)
        .map_or(text.len(), |end| end + 1);

    let fixed = fix_structure(&double_quote(&text[start..end]));
    let trimmed = fixed.trim();

    if is_json_document(trimmed) {
        return Some(trimmed.to_owned());
    }

    longest_balanced_span(&fixed).map(str::to_owned)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Double,
    Single,
}

/// Normalize typographic quotes and rewrite single-quoted strings
fn double_quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut state = Quote::None;
    let mut chars = text.chars().map(|c| match c {
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => '"',
        '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => '\'',
        c => c,
    });

    while let Some(c) = chars.next() {
        match state {
            Quote::None => match c {
                '"' => {
                    state = Quote::Double;
                    out.push(c);
                }
                '\'' => {
                    state = Quote::Single;
                    out.push('"');
                }
                _ => out.push(c),
            },
            Quote::Double => {
                out.push(c);
                if c == '\\' {
                    out.extend(chars.next());
                } else if c == '"' {
                    state = Quote::None;
                }
            }
            Quote::Single => match c {
                '\\' => match chars.next() {
                    Some('\'') => out.push('\''),
                    Some(next) => {
                        out.push('\\');
                        out.push(next);
                    }
                    None => out.push('\\'),
                },
                '"' => out.push_str("\\\""),
                '\'' => {
                    state = Quote::None;
                    out.push('"');
                }
                _ => out.push(c),
            },
        }
    }

    out
}

/// Quote bare identifiers and drop trailing commas outside string literals
fn fix_structure(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '"' {
            let end = string_end(&chars, i);
            out.extend(&chars[i..end]);
            i = end;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if !matches!(next, Some('}' | ']')) {
                out.push(',');
            }
            i += 1;
        } else if c.is_ascii_digit() || c == '-' {
            let end = token_end(&chars, i, |c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-'));
            out.extend(&chars[i..end]);
            i = end;
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let end = token_end(&chars, i, |c| c.is_alphanumeric() || matches!(c, '_' | '$'));
            let word: String = chars[i..end].iter().collect();
            if matches!(word.as_str(), "true" | "false" | "null") {
                out.push_str(&word);
            } else {
                out.push('"');
                out.push_str(&word);
                out.push('"');
            }
            i = end;
        } else {
            out.push(c);
            i += 1;
        }
    }

    out
}

/// Index just past the string literal opening at `start`
fn string_end(chars: &[char], start: usize) -> usize {
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '"' => return i + 1,
            _ => i += 1,
        }
    }

    chars.len()
}

fn token_end(chars: &[char], start: usize, continues: impl Fn(char) -> bool) -> usize {
    chars[start + 1..]
        .iter()
        .position(|&c| !continues(c))
        .map_or(chars.len(), |offset| start + 1 + offset)
}

/// Longest value that parses from any opening delimiter
///
/// Openers inside a value already found cannot start a longer one.
fn longest_parseable(text: &str) -> Option<&str> {
    let mut best: Option<&str> = None;
    let mut covered = 0;

    for (start, _) in text.match_indices(['{', '[']) {
        if start < covered {
            continue;
        }

        if let Some(len) = leading_document_len(&text[start..]) {
            covered = start + len;
            if best.is_none_or(|b| len > b.len()) {
                best = Some(&text[start..covered]);
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use indoc::indoc;

    use super::*;

    fn recover(text: &str) -> String {
        JsonRecovery::default().recover(text).into_owned()
    }

    #[test]
    fn bare_json_is_returned_as_is() {
        assert_eq!(recover(r#"{"a":1}"#), r#"{"a":1}"#);
        assert_eq!(recover("  [1, 2]\n"), "[1, 2]");
    }

    #[test]
    fn fenced_block() {
        assert_eq!(recover("```json\n{\"a\":1}\n```"), r#"{"a":1}"#);

        let text = indoc! {r#"
            Sure! Here is the data you asked for:

            ```
            {"name": "Ada", "born": 1815}
            ```

            Let me know if you need anything else.
        "#};
        assert_eq!(recover(text), r#"{"name": "Ada", "born": 1815}"#);
    }

    #[test]
    fn delimiters_inside_strings_are_ignored() {
        let json = r#"{"reason":"contains } in a string"}"#;
        assert_eq!(recover(json), json);

        let text = r#"Verdict: {"reason":"say \"}\" twice", "ok": [1]} (final)"#;
        assert_eq!(recover(text), r#"{"reason":"say \"}\" twice", "ok": [1]}"#);
    }

    #[test]
    fn unterminated_input_is_left_alone() {
        let text = r#"{"a":"unterminated"#;
        assert!(matches!(JsonRecovery::default().recover(text), Cow::Borrowed(t) if t == text));

        let text = "Partial result: {\"items\": [1, 2";
        assert_eq!(recover(text), text);
    }

    #[test]
    fn longest_span_wins() {
        let text = r#"First {"a":1}, then {"b":[1,2,3]}, finally {"c":2}."#;
        assert_eq!(recover(text), r#"{"b":[1,2,3]}"#);

        let text = r#"Either {"a":1} or {"b":2}"#;
        assert_eq!(recover(text), r#"{"a":1}"#);
    }

    #[test]
    fn preamble_and_closing_fence_are_trimmed() {
        let recovery = JsonRecovery::default();
        let text = "Here's the JSON:\n```json\n{\"ok\": true}";

        assert_eq!(recovery.trimmed(text, true).as_deref(), Some("{\"ok\": true}"));
    }

    #[test]
    fn line_ranges_are_searched() {
        let recovery = JsonRecovery::default();
        let text = "Output below\n{\n  \"a\": 1\n}\nnot json }";

        assert_eq!(recovery.trimmed(text, true).as_deref(), Some("{\n  \"a\": 1\n}"));
        assert_eq!(recovery.trimmed(text, false), None);
    }

    #[test]
    fn fragments_split_on_blank_lines_and_fences() {
        let text = "intro text\n\n[1, 2, 3]\n\noutro";
        assert_eq!(fragment(text), Some("[1, 2, 3]"));

        let text = "intro```json\n{\"x\": null}```outro";
        assert_eq!(fragment(text), Some("{\"x\": null}"));
    }

    #[test]
    fn single_quotes_and_trailing_commas_are_repaired() {
        assert_eq!(
            recover("{'name': 'Ada', 'tags': ['x',],}"),
            r#"{"name": "Ada", "tags": ["x"]}"#
        );
    }

    #[test]
    fn bare_keys_and_values_are_quoted() {
        assert_eq!(
            recover("Result: {name: Ada, age: 36, ratio: -1.5e3, active: true, spouse: null}"),
            r#"{"name": "Ada", "age": 36, "ratio": -1.5e3, "active": true, "spouse": null}"#
        );
    }

    #[test]
    fn smart_quotes_are_normalized() {
        assert_eq!(recover("{\u{201C}a\u{201D}: \u{201C}b\u{201D}}"), r#"{"a": "b"}"#);
    }

    #[test]
    fn double_quote_inside_single_quoted_string_is_not_truncation() {
        assert_eq!(recover(r#"{'a': 'it"s'}"#), r#"{"a": "it\"s"}"#);
        assert_eq!(recover(r#"Answer: {'quote': 'say "hi"', 'n': 1}"#), r#"{"quote": "say \"hi\"", "n": 1}"#);
    }

    #[test]
    fn balanced_pairs_skip_strings_and_reset_on_mismatch() {
        let text = r#"x {"k": "]"} ] [1, [2]]"#;
        assert_eq!(balanced_pairs(text), [(2, 11), (19, 21), (15, 22)]);
    }

    #[test]
    fn deep_nesting_is_scanned_in_bounded_time() {
        let depth = 30_000;
        let text = format!("{}x{}", "[".repeat(depth), "]".repeat(depth));
        let started = Instant::now();

        assert_eq!(recover(&text), text);
        assert!(started.elapsed() < Duration::from_secs(10), "took {:?}", started.elapsed());

        let text = format!("{}\nx\n{}", "[\n".repeat(depth / 2), "]\n".repeat(depth / 2));
        let started = Instant::now();

        assert_eq!(recover(&text), text);
        assert!(started.elapsed() < Duration::from_secs(10), "took {:?}", started.elapsed());
    }

    #[test]
    fn quote_conversion_escapes_embedded_double_quotes() {
        assert_eq!(double_quote(r#"{'say': 'a "b" c', 'it\'s': 1}"#), r#"{"say": "a \"b\" c", "it's": 1}"#);
    }

    #[test]
    fn exhaustive_search_finds_longest_parseable_substring() {
        assert_eq!(longest_parseable(r#"x {"a": [1]} ] y"#), Some(r#"{"a": [1]}"#));
        assert_eq!(longest_parseable("no json here"), None);
    }

    #[test]
    fn prose_and_scalars_are_unchanged() {
        for text in ["", "The answer is 42.", "42", "\"just a string\"", "{not: [valid"] {
            assert_eq!(recover(text), text);
        }
    }

    #[test]
    fn recovery_is_idempotent() {
        let fixtures = [
            r#"{"a":1}"#,
            "```json\n{\"a\":1}\n```",
            r#"{"reason":"contains } in a string"}"#,
            r#"{"a":"unterminated"#,
            "Here's the JSON:\n{\"list\": [1, 2]}\nHope that helps!",
            "{'name': 'Ada', 'tags': ['x',],}",
            "Result: {name: Ada}",
            "plain prose",
        ];

        for fixture in fixtures {
            let once = recover(fixture);
            assert_eq!(recover(&once), once, "fixture {fixture:?}");
        }
    }
}
