//! Incoming requests as the gateway sees them.

use std::collections::BTreeMap;

use bytes::Bytes;
use lambda_offline_template::Payload;

/// A transport-independent HTTP request.
#[derive(Debug, Clone, Default)]
pub struct GatewayRequest {
    pub method: String,
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
    /// Header pairs in arrival order; names are matched case-insensitively.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Peer address reported as `$context.identity.sourceIp`.
    pub source_ip: Option<String>,
}

impl GatewayRequest {
    pub fn new(method: impl Into<String>, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (uri.to_string(), None),
        };
        Self {
            method: method.into().to_ascii_uppercase(),
            path,
            query,
            ..Default::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn source_ip(mut self, ip: impl Into<String>) -> Self {
        self.source_ip = Some(ip.into());
        self
    }

    /// First value of a header, case-insensitive.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The parsed view of a routed request.
#[derive(Debug, Clone, Default)]
pub struct RequestData {
    pub method: String,
    pub path: String,
    /// Lower-cased header names, first value.
    pub headers: BTreeMap<String, String>,
    pub multi_value_headers: BTreeMap<String, Vec<String>>,
    /// First value per query parameter.
    pub query: BTreeMap<String, String>,
    pub multi_value_query: BTreeMap<String, Vec<String>>,
    pub path_params: BTreeMap<String, String>,
    pub body: Bytes,
}

impl RequestData {
    pub fn parse(request: &GatewayRequest, path_params: Vec<(String, String)>) -> Self {
        let mut headers = BTreeMap::new();
        let mut multi_value_headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in &request.headers {
            let name = name.to_ascii_lowercase();
            headers.entry(name.clone()).or_insert_with(|| value.clone());
            multi_value_headers.entry(name).or_default().push(value.clone());
        }

        let mut query = BTreeMap::new();
        let mut multi_value_query: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Some(raw) = request.query.as_deref().filter(|q| !q.is_empty()) {
            for (name, value) in form_urlencoded::parse(raw.as_bytes()) {
                let (name, value) = (name.into_owned(), value.into_owned());
                query.entry(name.clone()).or_insert_with(|| value.clone());
                multi_value_query.entry(name).or_default().push(value);
            }
        }

        Self {
            method: request.method.to_ascii_uppercase(),
            path: request.path.clone(),
            headers,
            multi_value_headers,
            query,
            multi_value_query,
            path_params: path_params.into_iter().collect(),
            body: request.body.clone(),
        }
    }

    /// Body as text; invalid UTF-8 is replaced.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body as a template payload: JSON when it parses, `{}` when empty.
    pub fn payload(&self) -> Payload {
        Payload::from_body(&self.body_text())
    }

    /// Media type of the request, without parameters, lower-cased.
    pub fn content_type(&self) -> Option<String> {
        self.headers.get("content-type").map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }
}
