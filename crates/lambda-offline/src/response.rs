//! Turning a handler outcome into an HTTP response for `lambda` endpoints.
//!
//! A success always uses the `default` rule. A failure is matched against
//! each rule's selection pattern in declaration order; the first full match
//! wins and `default` catches the rest. The chosen rule then contributes
//! headers (`responseParameters`), an optional body template and a status.

use bytes::Bytes;
use lambda_offline_config::{EndpointSpec, ResponseRule, DEFAULT_RESPONSE};
use lambda_offline_runtime::InvocationOutcome;
use lambda_offline_template::{jsonpath, render, TemplateContext};
use serde_json::Value;

const HEADER_TARGET: &str = "method.response.header.";
const BODY_SOURCE: &str = "integration.response.body";
const INTEGRATION_SOURCE: &str = "integration.response.";

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Status, headers and body chosen for a handler outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedResponse {
    pub status_code: u16,
    /// Header pairs in the order they were set.
    pub headers: Vec<(String, String)>,
    pub body: Value,
    pub content_type: String,
}

impl SelectedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Encoded body: strings verbatim, `null` empty, anything else as JSON.
    pub fn body_bytes(&self) -> Bytes {
        encode_body(&self.body)
    }
}

/// Select and render the response for a success or failure.
///
/// Returns `None` for a timed-out invocation, which has no result to map.
/// `request` is the request-side template context; its payload is replaced
/// by the result before templates are rendered.
pub fn select(
    outcome: &InvocationOutcome,
    endpoint: &EndpointSpec,
    request: &TemplateContext,
) -> Option<SelectedResponse> {
    let (rule_name, rule, result) = match outcome {
        InvocationOutcome::Success(value) => {
            (DEFAULT_RESPONSE, endpoint.default_response(), value.clone())
        }
        InvocationOutcome::Failure(error) => {
            let (name, rule) = select_error_rule(endpoint, &error.message);
            (name, rule, error.to_value())
        }
        InvocationOutcome::TimedOut => return None,
    };

    let mut headers = Vec::new();
    apply_response_parameters(rule, &result, &mut headers, &endpoint.function);
    for (name, value) in endpoint.response_headers.iter() {
        let value = strip_quotes(value);
        if !value.is_empty() {
            set_header(&mut headers, name, value);
        }
    }

    let mut body = result;
    let mut content_type = JSON_CONTENT_TYPE.to_string();
    if let Some((media_type, template)) = rule.response_templates.first() {
        if !template.trim().is_empty() {
            match render(template, &request.for_result(&body)) {
                Ok(rendered) => {
                    body = rendered;
                    content_type = media_type.to_string();
                }
                Err(err) => {
                    lambda_offline_telemetry::log_template_error!(
                        function = %endpoint.function,
                        response = %rule_name,
                        error = %err,
                        "response template failed; sending the unrendered result"
                    );
                }
            }
        }
    }

    let status_code = match rule.status_code {
        Some(status) => status,
        None => {
            tracing::warn!(
                function = %endpoint.function,
                response = %rule_name,
                "response has no statusCode; using 200"
            );
            200
        }
    };

    set_header(&mut headers, "Content-Type", &content_type);

    Some(SelectedResponse {
        status_code,
        headers,
        body,
        content_type,
    })
}

/// The first non-default rule whose pattern fully matches `message`, else `default`.
pub fn select_error_rule<'a>(
    endpoint: &'a EndpointSpec,
    message: &str,
) -> (&'a str, &'a ResponseRule) {
    endpoint
        .responses
        .iter()
        .filter(|(name, _)| name != DEFAULT_RESPONSE)
        .find(|(_, rule)| rule.matches(message))
        .map(|(name, rule)| (name.as_str(), rule))
        .unwrap_or((DEFAULT_RESPONSE, endpoint.default_response()))
}

fn apply_response_parameters(
    rule: &ResponseRule,
    result: &Value,
    headers: &mut Vec<(String, String)>,
    function: &str,
) {
    for (target, source) in rule.response_parameters.iter() {
        let Some(header) = target.strip_prefix(HEADER_TARGET).filter(|h| !h.is_empty()) else {
            lambda_offline_telemetry::log_unsupported_response_parameter!(
                function = %function,
                target = %target,
                "only method.response.header targets are supported"
            );
            continue;
        };

        let value = if let Some(path) = source.strip_prefix(BODY_SOURCE) {
            if path.is_empty() {
                stringify(result)
            } else if path.starts_with('.') || path.starts_with('[') {
                jsonpath::extract(result, &format!("${}", path))
                    .map(|v| stringify(&v))
                    .unwrap_or_default()
            } else {
                unsupported_source(function, target, source);
                continue;
            }
        } else if source.starts_with(INTEGRATION_SOURCE) {
            unsupported_source(function, target, source);
            continue;
        } else {
            strip_quotes(source).to_string()
        };

        if !value.is_empty() {
            set_header(headers, header, &value);
        }
    }
}

fn unsupported_source(function: &str, target: &str, source: &str) {
    lambda_offline_telemetry::log_unsupported_response_parameter!(
        function = %function,
        target = %target,
        source = %source,
        "only integration.response.body sources are supported"
    );
}

/// Set a header unless one with the same name is already present.
fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    if find_header(headers, name).is_none() {
        headers.push((name.to_string(), value.to_string()));
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Remove one layer of matching single or double quotes.
fn strip_quotes(value: &str) -> &str {
    let trimmed = value.trim();
    for quote in ['\'', '"'] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    trimmed
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Encode a result value as a response body.
pub fn encode_body(value: &Value) -> Bytes {
    match value {
        Value::Null => Bytes::new(),
        Value::String(s) => Bytes::from(s.clone()),
        other => Bytes::from(other.to_string()),
    }
}
