//! Variables visible to a template.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// The identity established by a custom authorizer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Principal {
    pub principal_id: String,
    /// The authorizer's `context` object.
    pub context: Map<String, Value>,
}

/// The body exposed as `$input`.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    raw: String,
    parsed: Value,
}

impl Default for Payload {
    fn default() -> Self {
        Self::from_body("")
    }
}

impl Payload {
    /// A request body. JSON bodies are parsed; an empty body is `{}`.
    pub fn from_body(raw: &str) -> Self {
        let parsed = if raw.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        };
        Self {
            raw: raw.to_string(),
            parsed,
        }
    }

    /// A handler result used on the response side.
    pub fn from_value(value: Value) -> Self {
        let raw = match &value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        Self { raw, parsed: value }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn parsed(&self) -> &Value {
        &self.parsed
    }
}

/// Request data rendered by mapping templates.
///
/// Header names are expected in lower case; `$input.params('Name')` looks
/// headers up case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub http_method: String,
    pub stage: String,
    pub request_id: String,
    pub resource_path: String,
    pub api_id: String,
    pub request_time_epoch: i64,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub path_params: BTreeMap<String, String>,
    /// `$context.identity` (sourceIp, userAgent, ...). Absent entries are null.
    pub identity: Map<String, Value>,
    pub principal: Option<Principal>,
    pub stage_variables: BTreeMap<String, String>,
    pub payload: Payload,
    /// Extra root variables, e.g. `$methodArn` for authorizer events.
    pub variables: BTreeMap<String, Value>,
}

impl TemplateContext {
    /// Bind an extra root variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Replace the payload.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// A copy whose `$input` is a handler result.
    pub fn for_result(&self, result: &Value) -> Self {
        self.clone().with_payload(Payload::from_value(result.clone()))
    }

    /// `$context` as a JSON object.
    pub(crate) fn context_object(&self) -> Value {
        let mut authorizer = Map::new();
        if let Some(principal) = &self.principal {
            for (k, v) in &principal.context {
                authorizer.insert(k.clone(), v.clone());
            }
            authorizer.insert(
                "principalId".to_string(),
                Value::String(principal.principal_id.clone()),
            );
        }

        let mut context = Map::new();
        context.insert("apiId".into(), self.api_id.clone().into());
        context.insert("authorizer".into(), Value::Object(authorizer));
        context.insert("httpMethod".into(), self.http_method.clone().into());
        context.insert("identity".into(), Value::Object(self.identity.clone()));
        context.insert("requestId".into(), self.request_id.clone().into());
        context.insert("requestTimeEpoch".into(), self.request_time_epoch.into());
        context.insert("resourcePath".into(), self.resource_path.clone().into());
        context.insert("stage".into(), self.stage.clone().into());
        Value::Object(context)
    }

    /// `$input.params()`.
    pub(crate) fn params_object(&self) -> Value {
        let mut params = Map::new();
        params.insert("header".into(), string_map(&self.headers));
        params.insert("querystring".into(), string_map(&self.query));
        params.insert("path".into(), string_map(&self.path_params));
        Value::Object(params)
    }

    /// `$input.params('name')`: path, then query string, then header.
    pub(crate) fn param(&self, name: &str) -> Option<&str> {
        self.path_params
            .get(name)
            .or_else(|| self.query.get(name))
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    pub(crate) fn stage_variables_object(&self) -> Value {
        string_map(&self.stage_variables)
    }
}

fn string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}
