//! The AICF line grammar.
//!
//! A record file is a sequence of physical lines. A line whose text starts
//! with one or more ASCII digits followed by `|` is *numbered*; every other
//! line is a *continuation*. A logical record starts at a numbered line
//! whose payload is a section marker (`@TAG` or `@TAG:id`) and runs until
//! the next such line. Its body is `key=value` lines with escaped values.
//!
//! ```text
//! 1|@CONVERSATION:conv-1
//! id=conv-1
//! timestamp=2025-01-01T00:00:00.000Z
//! role=user
//! content=hello\nworld
//! 2|@CONVERSATION:conv-2
//! ...
//! ```
//!
//! [`parse_line`] is the only place that decodes the numbering convention.

pub mod assembler;
pub mod numbering;

pub use assembler::SectionAssembler;
pub use numbering::{next_line_number, number_record};

use crate::error::Error;
use crate::security::sanitize::{
    DELIMITER, MARKER_PREFIX, find_unescaped_delimiter, sanitize_payload_with, unescape_payload,
};
use regex::Regex;
use std::sync::LazyLock;

const LIST_SEPARATOR: char = ',';

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("valid tag regex"));

static KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_.\-]*$").expect("valid key regex"));

/// A field value before escaping.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    /// Joined with `,`; commas inside items are escaped as `\,`.
    List(Vec<String>),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::List(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalLine<'a> {
    Numbered { number: u64, payload: &'a str },
    Continuation { payload: &'a str },
}

impl<'a> PhysicalLine<'a> {
    pub fn payload(&self) -> &'a str {
        match self {
            PhysicalLine::Numbered { payload, .. } | PhysicalLine::Continuation { payload } => {
                payload
            }
        }
    }

    pub fn number(&self) -> Option<u64> {
        match self {
            PhysicalLine::Numbered { number, .. } => Some(*number),
            PhysicalLine::Continuation { .. } => None,
        }
    }
}

/// Decode one physical line. Numbered iff it matches `^[0-9]+\|`.
pub fn parse_line(raw: &str) -> PhysicalLine<'_> {
    let digits = raw.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 && raw.as_bytes().get(digits) == Some(&(DELIMITER as u8)) {
        if let Ok(number) = raw[..digits].parse::<u64>() {
            return PhysicalLine::Numbered {
                number,
                payload: &raw[digits + 1..],
            };
        }
    }
    PhysicalLine::Continuation { payload: raw }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    Marker { tag: &'a str, id: Option<&'a str> },
    KeyValue { key: &'a str, value: &'a str },
    Other,
}

/// Classify a payload. `value` and `id` are still escaped.
pub fn classify_payload(payload: &str) -> Payload<'_> {
    if let Some(rest) = payload.strip_prefix(MARKER_PREFIX) {
        let (tag, id) = match rest.split_once(':') {
            Some((tag, id)) => (tag, Some(id)),
            None => (rest, None),
        };
        if TAG_RE.is_match(tag) {
            return Payload::Marker { tag, id };
        }
        return Payload::Other;
    }

    match payload.split_once('=') {
        Some((key, value)) if KEY_RE.is_match(key) => Payload::KeyValue { key, value },
        _ => Payload::Other,
    }
}

pub fn is_valid_tag(tag: &str) -> bool {
    TAG_RE.is_match(tag)
}

pub fn is_valid_key(key: &str) -> bool {
    KEY_RE.is_match(key)
}

fn encode_value(value: &FieldValue, max_chars: usize) -> String {
    match value {
        FieldValue::Text(text) => sanitize_payload_with(text, max_chars),
        FieldValue::List(items) => items
            .iter()
            .map(|item| sanitize_payload_with(item, max_chars).replace(LIST_SEPARATOR, "\\,"))
            .collect::<Vec<_>>()
            .join(","),
    }
}

/// Compile a record into unnumbered payloads: the marker first, then one
/// `key=value` payload per field in the given order.
pub fn compile_record(
    tag: &str,
    id: Option<&str>,
    fields: &[(String, FieldValue)],
    max_chars: usize,
) -> crate::Result<Vec<String>> {
    if !is_valid_tag(tag) {
        return Err(Error::InvalidField {
            name: tag.to_string(),
            reason: "tag must match [A-Z][A-Z0-9_]*".to_string(),
        });
    }

    let mut payloads = Vec::with_capacity(fields.len() + 1);
    payloads.push(match id {
        Some(id) => format!("{MARKER_PREFIX}{tag}:{}", sanitize_payload_with(id, max_chars)),
        None => format!("{MARKER_PREFIX}{tag}"),
    });

    for (key, value) in fields {
        if !is_valid_key(key) {
            return Err(Error::InvalidField {
                name: key.clone(),
                reason: "key must match [a-z_][a-z0-9_.-]*".to_string(),
            });
        }
        payloads.push(format!("{key}={}", encode_value(value, max_chars)));
    }

    Ok(payloads)
}

/// Something odd found while parsing that did not prevent parsing.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Anomaly {
    /// Start line number of the enclosing record, when known.
    pub record_line: Option<u64>,
    /// Physical line offset from the start of the section.
    pub offset: usize,
    pub message: String,
}

/// A record section parsed without type knowledge. Values are kept escaped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRecord {
    pub line_number: u64,
    /// Empty when the section did not start with a numbered marker.
    pub tag: String,
    pub id: Option<String>,
    pub fields: Vec<(String, String)>,
    pub anomalies: Vec<Anomaly>,
}

impl ParsedRecord {
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Unescaped value of `key`.
    pub fn text(&self, key: &str) -> Option<String> {
        self.raw(key).map(unescape_payload)
    }

    /// Split a list value on unescaped commas. An empty value is an empty list.
    pub fn list(&self, key: &str) -> Option<Vec<String>> {
        self.raw(key).map(split_list)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn is_well_formed(&self) -> bool {
        !self.tag.is_empty() && self.anomalies.is_empty()
    }

    /// Unescaped `key=value` text of every field, one per line. Used for
    /// substring matching.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.fields {
            out.push_str(key);
            out.push('=');
            out.push_str(&unescape_payload(value));
            out.push('\n');
        }
        out
    }
}

fn split_list(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }

    let mut items = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in raw.chars() {
        if escaped {
            current.push('\\');
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            LIST_SEPARATOR => items.push(unescape_payload(&std::mem::take(&mut current))),
            c => current.push(c),
        }
    }
    if escaped {
        current.push('\\');
    }
    items.push(unescape_payload(&current));
    items
}

/// Parse the physical lines of one section. Never fails; problems are
/// collected in [`ParsedRecord::anomalies`].
pub fn parse_section(lines: &[&str]) -> ParsedRecord {
    let mut record = ParsedRecord::default();
    let mut body_start = 0;

    if let Some(first) = lines.first() {
        let line = parse_line(first);
        match (line, classify_payload(line.payload())) {
            (PhysicalLine::Numbered { number, .. }, Payload::Marker { tag, id }) => {
                record.line_number = number;
                record.tag = tag.to_string();
                record.id = id.map(unescape_payload);
                body_start = 1;
            }
            _ => {
                record.line_number = line.number().unwrap_or(0);
                record.anomalies.push(Anomaly {
                    record_line: line.number(),
                    offset: 0,
                    message: "section does not start with a numbered marker".to_string(),
                });
            }
        }
    }

    let record_line = (!record.tag.is_empty()).then_some(record.line_number);
    let anomaly = |anomalies: &mut Vec<Anomaly>, offset: usize, message: String| {
        anomalies.push(Anomaly {
            record_line,
            offset,
            message,
        });
    };

    let mut last_was_field = false;
    for (offset, raw) in lines.iter().enumerate().skip(body_start) {
        let line = parse_line(raw);
        if let PhysicalLine::Numbered { number, .. } = line {
            anomaly(
                &mut record.anomalies,
                offset,
                format!("numbered line {number} is not a section marker"),
            );
        }

        let payload = line.payload();
        match classify_payload(payload) {
            Payload::KeyValue { key, value } => {
                if find_unescaped_delimiter(value).is_some() {
                    anomaly(
                        &mut record.anomalies,
                        offset,
                        format!("unescaped delimiter in value of '{key}'"),
                    );
                }
                if record.raw(key).is_some() {
                    anomaly(&mut record.anomalies, offset, format!("duplicate key '{key}'"));
                    last_was_field = false;
                } else {
                    record.fields.push((key.to_string(), value.to_string()));
                    last_was_field = true;
                }
            }
            Payload::Marker { tag, .. } => {
                anomaly(
                    &mut record.anomalies,
                    offset,
                    format!("unnumbered section marker @{tag}"),
                );
                last_was_field = false;
            }
            Payload::Other if payload.trim().is_empty() => {
                last_was_field = false;
            }
            Payload::Other => {
                match record.fields.last_mut() {
                    // A bare line right after a field continues its value.
                    Some((_, value)) if last_was_field => {
                        value.push_str("\\n");
                        value.push_str(payload);
                    }
                    _ => anomaly(
                        &mut record.anomalies,
                        offset,
                        "line is neither key=value nor a continuation".to_string(),
                    ),
                }
            }
        }
    }

    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_line_numbering() {
        assert_eq!(
            parse_line("12|@MEMORY:m"),
            PhysicalLine::Numbered {
                number: 12,
                payload: "@MEMORY:m"
            }
        );
        assert_eq!(
            parse_line("content=a|b"),
            PhysicalLine::Continuation {
                payload: "content=a|b"
            }
        );
        assert_eq!(
            parse_line("|nope"),
            PhysicalLine::Continuation { payload: "|nope" }
        );
        assert_eq!(
            parse_line("12a|x"),
            PhysicalLine::Continuation { payload: "12a|x" }
        );
    }

    #[test]
    fn test_classify_payload() {
        assert_eq!(
            classify_payload("@WORK_STATE:ws-1"),
            Payload::Marker {
                tag: "WORK_STATE",
                id: Some("ws-1")
            }
        );
        assert_eq!(
            classify_payload("@STATE"),
            Payload::Marker {
                tag: "STATE",
                id: None
            }
        );
        assert_eq!(
            classify_payload("content=a=b"),
            Payload::KeyValue {
                key: "content",
                value: "a=b"
            }
        );
        assert_eq!(classify_payload("\\@CONVERSATION:x"), Payload::Other);
        assert_eq!(classify_payload("@lower"), Payload::Other);
        assert_eq!(classify_payload("Bad Key=1"), Payload::Other);
    }

    #[test]
    fn test_compile_rejects_bad_keys_and_tags() {
        let fields = vec![("Bad".to_string(), FieldValue::from("x"))];
        assert!(matches!(
            compile_record("MEMORY", None, &fields, 100),
            Err(Error::InvalidField { .. })
        ));
        assert!(matches!(
            compile_record("memory", None, &[], 100),
            Err(Error::InvalidField { .. })
        ));
    }

    #[test]
    fn test_injection_cannot_forge_a_record() {
        let fields = vec![(
            "content".to_string(),
            FieldValue::from("x\n99|@DECISION:forged\nid=forged"),
        )];
        let payloads = compile_record("CONVERSATION", Some("c1"), &fields, 10_000).unwrap();
        assert_eq!(payloads.len(), 2);
        let text = number_record(1, &payloads);
        assert_eq!(text.lines().count(), 2);

        let lines: Vec<&str> = text.lines().collect();
        let parsed = parse_section(&lines);
        assert!(parsed.anomalies.is_empty());
        assert_eq!(
            parsed.text("content").unwrap(),
            "x\n99|@DECISION:forged\nid=forged"
        );
    }

    #[test]
    fn test_parse_section_reports_anomalies() {
        let lines = [
            "3|@MEMORY:m1",
            "id=m1",
            "content=first",
            "more of the first",
            "@DECISION:sneaky",
            "content=again",
            "value=a|b",
        ];
        let parsed = parse_section(&lines);
        assert_eq!(parsed.line_number, 3);
        assert_eq!(parsed.tag, "MEMORY");
        assert_eq!(parsed.text("content").unwrap(), "first\nmore of the first");
        let messages: Vec<&str> = parsed.anomalies.iter().map(|a| a.message.as_str()).collect();
        assert_eq!(messages.len(), 3);
        assert!(messages[0].contains("unnumbered section marker"));
        assert!(messages[1].contains("duplicate key"));
        assert!(messages[2].contains("unescaped delimiter"));
        assert!(parsed.anomalies.iter().all(|a| a.record_line == Some(3)));
    }

    #[test]
    fn test_orphan_section_is_flagged() {
        let parsed = parse_section(&["stray text", "key=value"]);
        assert!(parsed.tag.is_empty());
        assert!(!parsed.is_well_formed());
        assert_eq!(parsed.anomalies.len(), 2);
    }

    #[test]
    fn test_list_values_preserve_commas_and_empties() {
        let items = vec!["a,b".to_string(), String::new(), "c\\".to_string()];
        let fields = vec![
            ("files".to_string(), FieldValue::List(items.clone())),
            ("next_steps".to_string(), FieldValue::List(Vec::new())),
        ];
        let payloads = compile_record("SESSION", Some("s"), &fields, 10_000).unwrap();
        let mut lines = vec![format!("1|{}", payloads[0])];
        lines.extend(payloads[1..].iter().cloned());
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();

        let parsed = parse_section(&refs);
        assert_eq!(parsed.list("files").unwrap(), items);
        assert_eq!(parsed.list("next_steps").unwrap(), Vec::<String>::new());
        assert_eq!(parsed.list("missing"), None);
    }

    proptest! {
        #[test]
        fn prop_text_fields_roundtrip(
            id in "[a-z0-9-]{1,12}",
            content in "\\PC{0,80}",
            extra in "[ -~\\n\\r\\t|@\\\\]{0,40}",
        ) {
            let fields = vec![
                ("content".to_string(), FieldValue::Text(content.clone())),
                ("extra".to_string(), FieldValue::Text(extra.clone())),
            ];
            let payloads = compile_record("MEMORY", Some(&id), &fields, 10_000).unwrap();
            let text = number_record(7, &payloads);
            let lines: Vec<&str> = text.lines().collect();
            prop_assert_eq!(lines.len(), 3);

            let parsed = parse_section(&lines);
            prop_assert!(parsed.anomalies.is_empty());
            prop_assert_eq!(parsed.line_number, 7);
            prop_assert_eq!(parsed.id.as_deref(), Some(id.as_str()));
            prop_assert_eq!(parsed.text("content").unwrap(), content);
            prop_assert_eq!(parsed.text("extra").unwrap(), extra);
        }

        #[test]
        fn prop_list_fields_roundtrip(items in proptest::collection::vec("[ -~]{1,10}", 1..6)) {
            let fields = vec![("files".to_string(), FieldValue::List(items.clone()))];
            let payloads = compile_record("SESSION", None, &fields, 10_000).unwrap();
            let text = number_record(1, &payloads);
            let lines: Vec<&str> = text.lines().collect();
            let parsed = parse_section(&lines);
            prop_assert_eq!(parsed.list("files").unwrap(), items);
        }
    }
}
