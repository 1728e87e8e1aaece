//! `$util` helpers.

use base64::Engine;
use serde_json::Value;

use crate::error::TemplateRenderError;

/// Text form of a value as it appears in rendered output.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// JSON-string escaping without the surrounding quotes.
pub(crate) fn escape_javascript(input: &str) -> String {
    let quoted = Value::String(input.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Form-style percent encoding: space becomes `+`.
pub(crate) fn url_encode(input: &str) -> String {
    form_urlencoded::byte_serialize(input.as_bytes()).collect()
}

pub(crate) fn url_decode(input: &str) -> Result<String, TemplateRenderError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| {
                        TemplateRenderError::Evaluation(format!(
                            "urlDecode: invalid escape at byte {}",
                            i
                        ))
                    })?;
                out.push(hex);
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8(out)
        .map_err(|_| TemplateRenderError::Evaluation("urlDecode: result is not UTF-8".into()))
}

pub(crate) fn base64_encode(input: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(input.as_bytes())
}

pub(crate) fn base64_decode(input: &str) -> Result<String, TemplateRenderError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(input.trim())
        .map_err(|e| TemplateRenderError::Evaluation(format!("base64Decode: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|_| TemplateRenderError::Evaluation("base64Decode: result is not UTF-8".into()))
}

pub(crate) fn parse_json(input: &str) -> Result<Value, TemplateRenderError> {
    serde_json::from_str(input)
        .map_err(|e| TemplateRenderError::Evaluation(format!("parseJson: {}", e)))
}
