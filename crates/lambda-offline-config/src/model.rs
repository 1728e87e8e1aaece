use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ordered::OrderedMap;

/// A parsed service file (`serverless.yml`-shaped).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name.
    pub service: String,
    /// Provider-wide defaults.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Functions in declaration order.
    #[serde(default)]
    pub functions: OrderedMap<FunctionConfig>,
}

/// Provider-wide defaults inherited by every function.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Default runtime identifier (default: "rust").
    #[serde(default = "default_runtime")]
    pub runtime: String,
    /// Deployment stage (default: "dev").
    #[serde(default = "default_stage")]
    pub stage: String,
    /// Region used in synthesized ARNs (default: "us-east-1").
    #[serde(default = "default_region")]
    pub region: String,
    /// Default function timeout in seconds (default: 6).
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    /// Default memory size in MB (default: 1024).
    #[serde(default = "default_memory_size")]
    pub memory_size: u32,
    /// Stage variables exposed to templates.
    #[serde(default)]
    pub stage_variables: BTreeMap<String, String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            stage: default_stage(),
            region: default_region(),
            timeout: default_timeout(),
            memory_size: default_memory_size(),
            stage_variables: BTreeMap::new(),
        }
    }
}

fn default_runtime() -> String {
    "rust".to_string()
}

fn default_stage() -> String {
    "dev".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_timeout() -> f64 {
    6.0
}

fn default_memory_size() -> u32 {
    1024
}

/// A single function declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionConfig {
    /// Handler reference resolved by the function loader.
    pub handler: String,
    /// Runtime override.
    #[serde(default)]
    pub runtime: Option<String>,
    /// Timeout override in seconds.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Memory size override in MB.
    #[serde(default)]
    pub memory_size: Option<u32>,
    /// Canned behaviour for the `mock` runtime.
    #[serde(default)]
    pub mock: Option<MockConfig>,
    /// Event sources. Only `http` events are routed.
    #[serde(default)]
    pub events: Vec<EventConfig>,
}

/// Canned behaviour of a `mock` runtime function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockConfig {
    /// Value passed to `succeed`.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Failure passed to `fail` (takes precedence over `result`).
    #[serde(default)]
    pub error: Option<MockError>,
    /// Complete with the incoming event.
    #[serde(default)]
    pub echo: bool,
    /// Delay before completing, in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,
    /// Never complete.
    #[serde(default)]
    pub hang: bool,
}

/// Failure returned by a mock function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockError {
    pub message: String,
    #[serde(default = "default_error_type", rename = "type")]
    pub error_type: String,
}

fn default_error_type() -> String {
    "Error".to_string()
}

/// An event source entry. Non-HTTP sources are accepted and ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    #[serde(default)]
    pub http: Option<HttpEventConfig>,
}

/// Integration type of an HTTP endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Integration {
    /// Request/response mapping templates and response rules.
    #[default]
    Lambda,
    /// The handler receives the raw proxy event and returns the HTTP response.
    LambdaProxy,
}

/// An `http` event declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpEventConfig {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub integration: Integration,
    #[serde(default)]
    pub request: Option<RequestConfig>,
    #[serde(default)]
    pub response: Option<ResponseConfig>,
    /// Response rules in declaration order.
    #[serde(default)]
    pub responses: OrderedMap<ResponseRuleConfig>,
    #[serde(default)]
    pub authorizer: Option<AuthorizerConfig>,
}

/// Request mapping configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Content type -> request template.
    #[serde(default)]
    pub template: OrderedMap<String>,
}

/// Endpoint-level response configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Static headers; values are quoted literals (`"'value'"`).
    #[serde(default)]
    pub headers: OrderedMap<String>,
}

/// A response rule as declared.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRuleConfig {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub selection_pattern: Option<String>,
    #[serde(default)]
    pub response_parameters: OrderedMap<String>,
    #[serde(default)]
    pub response_templates: OrderedMap<String>,
}

/// Authorizer declaration: a bare name/ARN or a detailed block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthorizerConfig {
    Name(String),
    Detailed(AuthorizerDetails),
}

/// Detailed authorizer declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arn: Option<String>,
    #[serde(default, rename = "type")]
    pub credential_type: Option<String>,
    #[serde(default)]
    pub identity_source: Option<String>,
    #[serde(default)]
    pub identity_validation_expression: Option<String>,
    #[serde(default)]
    pub result_ttl_in_seconds: Option<u64>,
}
