//! Conversion between stored line records and whole documents.
//!
//! Callers upload documents already split into base64 fragments, one per
//! line. Writing only numbers those fragments; reading concatenates them in
//! line order and decodes the result back into UTF-8 text.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while reconstructing a stored document
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid base64 content: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Decoded content is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Identity of a stored text file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextFileKey {
    /// Owning component
    pub component_id: i64,
    /// Document variant, e.g. `readme` or `swagger`
    pub file_type: String,
}

impl TextFileKey {
    pub fn new(component_id: i64, file_type: impl Into<String>) -> Self {
        Self {
            component_id,
            file_type: file_type.into(),
        }
    }
}

/// One persisted line of a text file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFileLine {
    /// 1-based position within the document
    pub line_number: i32,
    /// Base64 fragment exactly as supplied by the caller
    pub content: String,
}

/// Classification of a decoded document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Markdown,
    Json,
    Yaml,
    PlainText,
}

impl ContentKind {
    /// Media type sent back in the `Content-Type` header
    pub fn mime_type(&self) -> &'static str {
        match self {
            ContentKind::Markdown => "text/markdown",
            ContentKind::Json => "application/json",
            ContentKind::Yaml => "text/yaml",
            ContentKind::PlainText => "text/plain",
        }
    }
}

/// Number caller-supplied lines from 1 in input order.
pub fn encode_lines(lines: &[String]) -> Vec<TextFileLine> {
    lines
        .iter()
        .enumerate()
        .map(|(index, content)| TextFileLine {
            line_number: index as i32 + 1,
            content: content.clone(),
        })
        .collect()
}

/// Concatenate line fragments in order and decode them into text.
///
/// ASCII whitespace between or inside fragments is dropped before decoding,
/// so lines uploaded with trailing newlines still reconstruct.
pub fn decode_lines<S: AsRef<str>>(lines: &[S]) -> Result<String, DecodeError> {
    let encoded: String = lines
        .iter()
        .flat_map(|line| line.as_ref().chars())
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = STANDARD.decode(encoded)?;
    Ok(String::from_utf8(bytes)?)
}

/// Classify a decoded document.
///
/// JSON is tried before YAML because every JSON document is also YAML.
/// YAML only counts when it parses to a mapping or sequence, tagged or not;
/// a bare scalar is just text.
pub fn infer_kind(file_type: &str, text: &str) -> ContentKind {
    if file_type.eq_ignore_ascii_case("readme") {
        return ContentKind::Markdown;
    }

    if serde_json::from_str::<serde_json::Value>(text).is_ok() {
        return ContentKind::Json;
    }

    match serde_yaml::from_str::<serde_yaml::Value>(text) {
        Ok(value) if is_structured(&value) => ContentKind::Yaml,
        _ => ContentKind::PlainText,
    }
}

fn is_structured(value: &serde_yaml::Value) -> bool {
    match value {
        serde_yaml::Value::Mapping(_) | serde_yaml::Value::Sequence(_) => true,
        serde_yaml::Value::Tagged(tagged) => is_structured(&tagged.value),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragments(text: &str, width: usize) -> Vec<String> {
        let encoded = STANDARD.encode(text);
        encoded
            .as_bytes()
            .chunks(width)
            .map(|chunk| String::from_utf8(chunk.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn test_encode_numbers_from_one_without_gaps() {
        let lines = vec!["YQ==".to_string(), "Yg==".to_string(), "Yw==".to_string()];
        let encoded = encode_lines(&lines);

        let numbers: Vec<i32> = encoded.iter().map(|l| l.line_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(encoded[1].content, "Yg==");
    }

    #[test]
    fn test_encode_empty() {
        assert!(encode_lines(&[]).is_empty());
    }

    #[test]
    fn test_decode_reassembles_fragments() {
        let text = "# Component\n\nSome *markdown* with ünïcödé.\n";
        let lines = fragments(text, 8);
        assert!(lines.len() > 1);

        assert_eq!(decode_lines(&lines).unwrap(), text);
    }

    #[test]
    fn test_decode_empty_document() {
        let lines: Vec<String> = Vec::new();
        assert_eq!(decode_lines(&lines).unwrap(), "");
    }

    #[test]
    fn test_decode_ignores_line_breaks() {
        let mut lines = fragments("hello world", 4);
        for line in lines.iter_mut() {
            line.push('\n');
        }

        assert_eq!(decode_lines(&lines).unwrap(), "hello world");
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        let err = decode_lines(&["not*base64"]).unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let encoded = STANDARD.encode([0xff, 0xfe, 0xfd]);
        let err = decode_lines(&[encoded]).unwrap_err();
        assert!(matches!(err, DecodeError::Utf8(_)));
    }

    #[test]
    fn test_readme_is_markdown_regardless_of_content() {
        assert_eq!(infer_kind("readme", "{\"a\":1}"), ContentKind::Markdown);
        assert_eq!(infer_kind("README", "a: 1"), ContentKind::Markdown);
        assert_eq!(infer_kind("ReadMe", ""), ContentKind::Markdown);
    }

    #[test]
    fn test_json_detected_before_yaml() {
        assert_eq!(infer_kind("x", "{\"a\":1}"), ContentKind::Json);
        assert_eq!(infer_kind("swagger", "[1, 2, 3]"), ContentKind::Json);
    }

    #[test]
    fn test_yaml_detected() {
        assert_eq!(infer_kind("x", "a: 1"), ContentKind::Yaml);
        assert_eq!(
            infer_kind("swagger", "openapi: 3.0.0\ninfo:\n  title: api\n"),
            ContentKind::Yaml
        );
        assert_eq!(infer_kind("x", "- one\n- two\n"), ContentKind::Yaml);
    }

    #[test]
    fn test_tagged_yaml_counts_only_when_structured() {
        assert_eq!(infer_kind("x", "--- !custom\na: 1\n"), ContentKind::Yaml);
        assert_eq!(infer_kind("x", "!foo bar"), ContentKind::PlainText);
    }

    #[test]
    fn test_plain_text_fallback() {
        assert_eq!(infer_kind("x", "not structured"), ContentKind::PlainText);
        assert_eq!(infer_kind("sbom", ""), ContentKind::PlainText);
        assert_eq!(infer_kind("x", "key: [unclosed"), ContentKind::PlainText);
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(ContentKind::Markdown.mime_type(), "text/markdown");
        assert_eq!(ContentKind::Json.mime_type(), "application/json");
        assert_eq!(ContentKind::Yaml.mime_type(), "text/yaml");
        assert_eq!(ContentKind::PlainText.mime_type(), "text/plain");
    }
}
