//! Resolution of a parsed [`ServiceConfig`] into immutable runtime specs.
//!
//! Everything that can be checked without serving traffic is checked here:
//! timeouts, selection patterns, identity sources, authorizer locality and
//! routing conflicts.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use regex_lite::Regex;

use crate::error::ConfigError;
use crate::model::{
    AuthorizerConfig, FunctionConfig, HttpEventConfig, Integration, MockConfig,
    ResponseRuleConfig, ServiceConfig,
};
use crate::ordered::OrderedMap;

/// Name of the response rule used for successful invocations.
pub const DEFAULT_RESPONSE: &str = "default";

/// Methods an `ANY` endpoint is registered for.
pub const ANY_METHODS: [&str; 7] = ["DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT"];

/// A fully resolved service.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub service: String,
    pub stage: String,
    pub region: String,
    pub stage_variables: BTreeMap<String, String>,
    /// Functions in declaration order.
    pub functions: Vec<Arc<FunctionSpec>>,
    /// HTTP endpoints in declaration order.
    pub endpoints: Vec<EndpointSpec>,
}

impl ServiceSpec {
    /// Find a function by name.
    pub fn function(&self, name: &str) -> Option<&Arc<FunctionSpec>> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// A function and how to run it.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSpec {
    pub name: String,
    /// Handler reference resolved by the function loader.
    pub handler: String,
    pub timeout: Duration,
    /// Runtime identifier, validated by the runtime crate.
    pub runtime: String,
    pub memory_size: u32,
    pub mock: Option<MockConfig>,
}

/// An HTTP endpoint bound to a function.
#[derive(Debug, Clone)]
pub struct EndpointSpec {
    /// Owning function name.
    pub function: String,
    /// Uppercase method, or `ANY`.
    pub method: String,
    /// Normalized path template (leading `/`, no trailing `/`).
    pub path: String,
    pub integration: Integration,
    /// Content type -> request template.
    pub request_templates: OrderedMap<String>,
    /// Static response headers (quoted literal values).
    pub response_headers: OrderedMap<String>,
    /// Response rules in declaration order; always contains [`DEFAULT_RESPONSE`].
    pub responses: Vec<(String, ResponseRule)>,
    pub authorizer: Option<AuthorizerSpec>,
}

impl EndpointSpec {
    /// The methods this endpoint answers.
    pub fn methods(&self) -> Vec<&str> {
        if self.method == "ANY" {
            ANY_METHODS.to_vec()
        } else {
            vec![self.method.as_str()]
        }
    }

    /// The `default` response rule.
    pub fn default_response(&self) -> &ResponseRule {
        self.responses
            .iter()
            .find(|(name, _)| name == DEFAULT_RESPONSE)
            .map(|(_, rule)| rule)
            .expect("resolution always inserts a default response")
    }
}

/// A response rule with its selection pattern compiled.
#[derive(Debug, Clone)]
pub struct ResponseRule {
    pub status_code: Option<u16>,
    /// Pattern as declared (or the rule name).
    pub selection_pattern: String,
    matcher: Regex,
    pub response_parameters: OrderedMap<String>,
    pub response_templates: OrderedMap<String>,
}

impl ResponseRule {
    /// The rule synthesized when `default` is not declared.
    pub fn synthesized_default() -> Self {
        Self {
            status_code: Some(200),
            selection_pattern: DEFAULT_RESPONSE.to_string(),
            matcher: full_match(DEFAULT_RESPONSE).expect("literal pattern compiles"),
            response_parameters: OrderedMap::new(),
            response_templates: OrderedMap::new(),
        }
    }

    /// Whether the pattern matches the entire error message.
    pub fn matches(&self, message: &str) -> bool {
        self.matcher.is_match(message)
    }
}

/// Credential type of an authorizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialType {
    Token,
    Request,
}

/// Where the authorizer's credential is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySource {
    /// Lower-cased header name.
    Header(String),
    QueryString(String),
    Path(String),
}

impl IdentitySource {
    /// Parse `method.request.{header,querystring,path}.<name>`.
    pub fn parse(expr: &str) -> Option<Self> {
        let rest = expr.trim().strip_prefix("method.request.")?;
        let (kind, name) = rest.split_once('.')?;
        if name.is_empty() {
            return None;
        }
        match kind {
            "header" => Some(Self::Header(name.to_ascii_lowercase())),
            "querystring" => Some(Self::QueryString(name.to_string())),
            "path" => Some(Self::Path(name.to_string())),
            _ => None,
        }
    }
}

/// A local authorizer attached to an endpoint.
#[derive(Debug, Clone)]
pub struct AuthorizerSpec {
    /// Name of the authorizer function in this service.
    pub function_name: String,
    pub credential_type: CredentialType,
    pub identity_source: IdentitySource,
    pub identity_validation: Option<Regex>,
    /// Accepted for compatibility; results are never cached.
    pub result_ttl: Duration,
}

impl ServiceConfig {
    /// Resolve into runtime specs, reporting the first configuration error.
    pub fn resolve(&self) -> Result<ServiceSpec, ConfigError> {
        let mut functions = Vec::new();
        let mut endpoints = Vec::new();
        let mut seen_routes: HashMap<(String, String), String> = HashMap::new();

        for (name, function) in self.functions.iter() {
            functions.push(Arc::new(self.resolve_function(name, function)?));
        }

        for (name, function) in self.functions.iter() {
            for event in &function.events {
                let Some(http) = &event.http else {
                    continue;
                };
                let endpoint = self.resolve_endpoint(name, http)?;

                for method in endpoint.methods() {
                    let key = (method.to_string(), endpoint.path.clone());
                    if let Some(first) = seen_routes.get(&key) {
                        return Err(ConfigError::RouteConflict {
                            method: key.0,
                            path: key.1,
                            first: first.clone(),
                            second: name.to_string(),
                        });
                    }
                    seen_routes.insert(key, name.to_string());
                }

                endpoints.push(endpoint);
            }
        }

        Ok(ServiceSpec {
            service: self.service.clone(),
            stage: self.provider.stage.clone(),
            region: self.provider.region.clone(),
            stage_variables: self.provider.stage_variables.clone(),
            functions,
            endpoints,
        })
    }

    fn resolve_function(
        &self,
        name: &str,
        function: &FunctionConfig,
    ) -> Result<FunctionSpec, ConfigError> {
        let seconds = function.timeout.unwrap_or(self.provider.timeout);
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "function '{}': timeout must be a positive number of seconds",
                name
            )));
        }

        Ok(FunctionSpec {
            name: name.to_string(),
            handler: function.handler.clone(),
            timeout: Duration::from_secs_f64(seconds),
            runtime: function
                .runtime
                .clone()
                .unwrap_or_else(|| self.provider.runtime.clone()),
            memory_size: function.memory_size.unwrap_or(self.provider.memory_size),
            mock: function.mock.clone(),
        })
    }

    fn resolve_endpoint(
        &self,
        function: &str,
        http: &HttpEventConfig,
    ) -> Result<EndpointSpec, ConfigError> {
        let method = http.method.trim().to_ascii_uppercase();
        if method.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "function '{}': http event without a method",
                function
            )));
        }

        let mut responses = Vec::with_capacity(http.responses.len() + 1);
        for (name, rule) in http.responses.iter() {
            responses.push((name.to_string(), resolve_rule(function, name, rule)?));
        }
        if !responses.iter().any(|(name, _)| name == DEFAULT_RESPONSE) {
            responses.push((
                DEFAULT_RESPONSE.to_string(),
                ResponseRule::synthesized_default(),
            ));
        }

        let authorizer = match &http.authorizer {
            Some(config) => Some(self.resolve_authorizer(function, config)?),
            None => None,
        };

        Ok(EndpointSpec {
            function: function.to_string(),
            method,
            path: normalize_path(&http.path),
            integration: http.integration,
            request_templates: http
                .request
                .as_ref()
                .map(|r| r.template.clone())
                .unwrap_or_default(),
            response_headers: http
                .response
                .as_ref()
                .map(|r| r.headers.clone())
                .unwrap_or_default(),
            responses,
            authorizer,
        })
    }

    fn resolve_authorizer(
        &self,
        function: &str,
        config: &AuthorizerConfig,
    ) -> Result<AuthorizerSpec, ConfigError> {
        let (reference, details) = match config {
            AuthorizerConfig::Name(name) => (name.clone(), None),
            AuthorizerConfig::Detailed(details) => {
                let reference = details
                    .arn
                    .clone()
                    .or_else(|| details.name.clone())
                    .ok_or_else(|| {
                        ConfigError::Invalid(format!(
                            "function '{}': authorizer needs a name or an arn",
                            function
                        ))
                    })?;
                (reference, Some(details))
            }
        };

        if reference.starts_with("arn:") {
            return Err(ConfigError::RemoteAuthorizer {
                function: function.to_string(),
                authorizer: reference,
            });
        }
        if !self.functions.contains_key(&reference) {
            return Err(ConfigError::UnknownAuthorizer {
                function: function.to_string(),
                authorizer: reference,
            });
        }

        let credential_type = match details.and_then(|d| d.credential_type.as_deref()) {
            None => CredentialType::Token,
            Some(t) if t.eq_ignore_ascii_case("token") => CredentialType::Token,
            Some(t) if t.eq_ignore_ascii_case("request") => CredentialType::Request,
            Some(other) => {
                return Err(ConfigError::Invalid(format!(
                    "function '{}': unknown authorizer type '{}'",
                    function, other
                )))
            }
        };

        let source_expr = details
            .and_then(|d| d.identity_source.clone())
            .unwrap_or_else(|| "method.request.header.Authorization".to_string());
        // REQUEST authorizers may list several sources; the first one gates the call.
        let first_source = source_expr.split(',').next().unwrap_or_default();
        let identity_source = IdentitySource::parse(first_source).ok_or_else(|| {
            ConfigError::InvalidIdentitySource {
                function: function.to_string(),
                source_expr: source_expr.clone(),
            }
        })?;

        let identity_validation = match details.and_then(|d| d.identity_validation_expression.as_deref()) {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                function: function.to_string(),
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?),
            None => None,
        };

        let ttl = details.and_then(|d| d.result_ttl_in_seconds).unwrap_or(300);
        if ttl > 0 {
            tracing::debug!(
                function = %function,
                authorizer = %reference,
                result_ttl_in_seconds = ttl,
                "authorizer result caching is not emulated"
            );
        }

        Ok(AuthorizerSpec {
            function_name: reference,
            credential_type,
            identity_source,
            identity_validation,
            result_ttl: Duration::from_secs(ttl),
        })
    }
}

fn resolve_rule(
    function: &str,
    name: &str,
    rule: &ResponseRuleConfig,
) -> Result<ResponseRule, ConfigError> {
    let pattern = rule
        .selection_pattern
        .clone()
        .unwrap_or_else(|| name.to_string());
    let matcher = full_match(&pattern).map_err(|e| ConfigError::InvalidPattern {
        function: function.to_string(),
        pattern: pattern.clone(),
        reason: e.to_string(),
    })?;

    Ok(ResponseRule {
        status_code: rule.status_code,
        selection_pattern: pattern,
        matcher,
        response_parameters: rule.response_parameters.clone(),
        response_templates: rule.response_templates.clone(),
    })
}

/// Compile a pattern that must match the whole input.
fn full_match(pattern: &str) -> Result<Regex, regex_lite::Error> {
    Regex::new(&format!("^(?:{})$", pattern))
}

/// Normalize an endpoint path: leading slash, no duplicate or trailing slashes.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Join a path prefix and an endpoint path.
pub fn prefixed_path(prefix: &str, path: &str) -> String {
    normalize_path(&format!("{}/{}", prefix, path))
}
