//! The request dispatcher.
//!
//! [`Gateway`] owns the route table, the per-route authorizers and the
//! [`Invoker`]. Every request ends in exactly one [`GatewayResponse`]:
//! per-request failures become synthetic error responses, never errors.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use lambda_offline_config::{
    prefixed_path, ConfigError, EndpointSpec, FunctionSpec, Integration, ServiceSpec,
};
use lambda_offline_router::{RouteEntry, RouteMatch, Router};
use lambda_offline_runtime::{
    timeout_message, validate_runtimes, HandlerRegistry, InvocationOutcome, Invoker,
    InvokerOptions,
};
use lambda_offline_telemetry::prometheus::render_metrics;
use lambda_offline_telemetry::{MetricsRegistry, PROMETHEUS_CONTENT_TYPE};
use lambda_offline_template::{render, TemplateContext, DEFAULT_REQUEST_TEMPLATE};
use serde_json::{json, Map, Value};

use crate::auth::{AuthOptions, AuthStrategy};
use crate::cors;
use crate::proxy;
use crate::request::{GatewayRequest, RequestData};
use crate::response::{self, JSON_CONTENT_TYPE};

/// Prefix of the emulator's own endpoints.
pub const RESERVED_PREFIX: &str = "/__offline/";

/// `$context.apiId` of every request.
pub const OFFLINE_API_ID: &str = "offline";

const OFFLINE_INFO: &str =
    "If you believe this is an issue with lambda-offline, please report it with the request and the service file.";

/// Settings layered over the service file by the command line.
#[derive(Clone, Default)]
pub struct GatewayOptions {
    /// Path prefix added to every endpoint.
    pub prefix: String,
    /// Overrides the service stage.
    pub stage: Option<String>,
    /// Overrides the service region.
    pub region: Option<String>,
    /// Disable to let handlers run without a deadline.
    pub timeouts_enabled: bool,
    pub cors: bool,
    pub metrics: Option<Arc<MetricsRegistry>>,
}

impl GatewayOptions {
    pub fn new() -> Self {
        Self {
            timeouts_enabled: true,
            ..Default::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_timeouts(mut self, enabled: bool) -> Self {
        self.timeouts_enabled = enabled;
        self
    }

    pub fn with_cors(mut self, enabled: bool) -> Self {
        self.cors = enabled;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// A transport-independent HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl GatewayResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        let mut response = Self::new(status).with_header("Content-Type", JSON_CONTENT_TYPE);
        response.body = Bytes::from(body.to_string());
        response
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut response = Self::new(status).with_header("Content-Type", "text/plain; charset=utf-8");
        response.body = Bytes::from(body.into());
        response
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Replace every header called `name` with a single value.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn append_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The body parsed as JSON, if it is JSON.
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn text_body(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

struct Route {
    /// The endpoint with its path prefixed.
    endpoint: EndpointSpec,
    function: Arc<FunctionSpec>,
    auth: Option<AuthStrategy>,
}

/// The local API gateway.
pub struct Gateway {
    service: String,
    stage: String,
    stage_variables: std::collections::BTreeMap<String, String>,
    routes: Vec<Route>,
    router: Router,
    /// `"METHOD - path"` for every route, sorted by path then method.
    route_listing: Vec<String>,
    invoker: Invoker,
    metrics: Arc<MetricsRegistry>,
    cors: bool,
}

impl Gateway {
    /// Register every endpoint of `service` against handlers in `registry`.
    ///
    /// Fails on the first configuration problem: unsupported runtimes,
    /// remote or unknown authorizers, duplicate routes.
    pub fn new(
        service: ServiceSpec,
        options: GatewayOptions,
        registry: HandlerRegistry,
    ) -> Result<Self, ConfigError> {
        validate_runtimes(&service)?;

        let stage = options.stage.clone().unwrap_or_else(|| service.stage.clone());
        let region = options.region.clone().unwrap_or_else(|| service.region.clone());
        let auth_options = AuthOptions {
            region: region.clone(),
            stage: stage.clone(),
        };

        let mut router = Router::new();
        let mut routes: Vec<Route> = Vec::with_capacity(service.endpoints.len());

        for endpoint in &service.endpoints {
            let mut endpoint = endpoint.clone();
            endpoint.path = prefixed_path(&options.prefix, &endpoint.path);

            if endpoint.path == "/__offline" || endpoint.path.starts_with(RESERVED_PREFIX) {
                return Err(ConfigError::Invalid(format!(
                    "function '{}': path {} is reserved",
                    endpoint.function, endpoint.path
                )));
            }

            let function = service
                .function(&endpoint.function)
                .cloned()
                .ok_or_else(|| {
                    ConfigError::Invalid(format!("function '{}' is not defined", endpoint.function))
                })?;

            let auth = match &endpoint.authorizer {
                Some(spec) => Some(AuthStrategy::build(
                    service.function(&spec.function_name),
                    spec,
                    &endpoint.function,
                    &endpoint.path,
                    &endpoint.method,
                    &auth_options,
                )?),
                None => None,
            };

            let entry = RouteEntry {
                endpoint_index: routes.len(),
            };
            if let Some(previous) = router.insert(&endpoint.path, &endpoint.method, entry) {
                return Err(ConfigError::RouteConflict {
                    method: endpoint.method.clone(),
                    path: endpoint.path.clone(),
                    first: routes[previous.endpoint_index].endpoint.function.clone(),
                    second: endpoint.function.clone(),
                });
            }

            let authorizer = auth.as_ref().map(|a| a.authorizer().name.as_str());
            lambda_offline_telemetry::log_route_registered!(
                method = %endpoint.method,
                path = %endpoint.path,
                function = %endpoint.function,
                integration = ?endpoint.integration,
                authorizer = ?authorizer,
                "route registered"
            );

            routes.push(Route {
                endpoint,
                function,
                auth,
            });
        }

        let mut listing: Vec<(&str, &str)> = routes
            .iter()
            .map(|r| (r.endpoint.path.as_str(), r.endpoint.method.as_str()))
            .collect();
        listing.sort();
        let route_listing = listing
            .into_iter()
            .map(|(path, method)| format!("{} - {}", method, path))
            .collect();

        let metrics = options
            .metrics
            .clone()
            .unwrap_or_else(|| Arc::new(MetricsRegistry::new()));
        let invoker = Invoker::new(
            registry,
            InvokerOptions {
                timeouts_enabled: options.timeouts_enabled,
                region,
            },
        )
        .with_metrics(Arc::clone(&metrics));

        Ok(Self {
            service: service.service,
            stage,
            stage_variables: service.stage_variables,
            routes,
            router,
            route_listing,
            invoker,
            metrics,
            cors: options.cors,
        })
    }

    /// Registered routes as `"METHOD - path"`, sorted by path then method.
    pub fn routes(&self) -> &[String] {
        &self.route_listing
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Serve one request.
    pub async fn handle(&self, request: GatewayRequest) -> GatewayResponse {
        let started = Instant::now();
        let origin = request.header_value("origin").map(str::to_string);

        let (mut response, route_label) = self.route(&request).await;
        if self.cors {
            cors::apply(&mut response, origin.as_deref());
        }

        let elapsed = started.elapsed();
        let duration_ms = elapsed.as_millis() as u64;
        self.metrics.record_request(
            &request.method,
            &route_label,
            response.status,
            elapsed.as_secs_f64(),
        );
        lambda_offline_telemetry::log_request_completed!(
            method = %request.method,
            path = %request.path,
            route = %route_label,
            status = response.status,
            duration_ms = duration_ms,
            "request completed"
        );

        response
    }

    async fn route(&self, request: &GatewayRequest) -> (GatewayResponse, String) {
        if request.path.starts_with(RESERVED_PREFIX) {
            return (self.reserved(request), request.path.clone());
        }

        if self.cors && request.method == "OPTIONS" {
            let allowed = self.router.allowed_methods(&request.path);
            let handled = allowed.iter().any(|m| m == "OPTIONS" || m == "ANY");
            if !allowed.is_empty() && !handled {
                let response = cors::preflight(
                    request.header_value("origin"),
                    &allowed,
                    request.header_value("access-control-request-headers"),
                );
                return (response, "preflight".to_string());
            }
        }

        match self.router.lookup(&request.path, &request.method) {
            RouteMatch::Found { entry, params } => {
                let route = &self.routes[entry.endpoint_index];
                let response = self.dispatch(route, request, params).await;
                (response, route.endpoint.path.clone())
            }
            RouteMatch::MethodNotAllowed { .. } | RouteMatch::NotFound => {
                (self.not_found(request), "unmatched".to_string())
            }
        }
    }

    async fn dispatch(
        &self,
        route: &Route,
        request: &GatewayRequest,
        params: Vec<(String, String)>,
    ) -> GatewayResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        let data = RequestData::parse(request, params);
        let mut ctx = self.template_context(route, &data, request, &request_id);

        if let Some(auth) = &route.auth {
            match auth.authenticate(&ctx, &data.path, &self.invoker).await {
                Ok(principal) => ctx.principal = Some(principal),
                Err(rejection) => return GatewayResponse::json(rejection.status(), &rejection.body()),
            }
        }

        match route.endpoint.integration {
            Integration::Lambda => self.dispatch_lambda(route, &data, &ctx, &request_id).await,
            Integration::LambdaProxy => {
                let event = proxy::build_event(&data, &route.endpoint.path, &ctx);
                match self.invoke(route, event, &request_id).await {
                    Ok(InvocationOutcome::TimedOut) => self.timed_out(route),
                    Ok(outcome) => proxy::into_response(&outcome, &route.function.name),
                    Err(response) => response,
                }
            }
        }
    }

    async fn dispatch_lambda(
        &self,
        route: &Route,
        data: &RequestData,
        ctx: &TemplateContext,
        request_id: &str,
    ) -> GatewayResponse {
        let content_type = data
            .content_type()
            .unwrap_or_else(|| JSON_CONTENT_TYPE.to_string());
        let template = route
            .endpoint
            .request_templates
            .get(&content_type)
            .map(String::as_str)
            .unwrap_or(DEFAULT_REQUEST_TEMPLATE);

        let event = match render(template, ctx) {
            Ok(event) => event,
            Err(err) => {
                lambda_offline_telemetry::log_template_error!(
                    function = %route.function.name,
                    content_type = %content_type,
                    error = %err,
                    "request template failed"
                );
                let message = format!(
                    "Error while parsing template \"{}\" for {}: {}",
                    content_type, route.function.name, err
                );
                return synthetic_error(&message, "TemplateRenderError");
            }
        };

        let outcome = match self.invoke(route, event, request_id).await {
            Ok(outcome) => outcome,
            Err(response) => return response,
        };

        match response::select(&outcome, &route.endpoint, ctx) {
            Some(selected) => GatewayResponse {
                status: selected.status_code,
                body: selected.body_bytes(),
                headers: selected.headers,
            },
            None => self.timed_out(route),
        }
    }

    async fn invoke(
        &self,
        route: &Route,
        event: Value,
        request_id: &str,
    ) -> Result<InvocationOutcome, GatewayResponse> {
        self.invoker
            .invoke(&route.function, event, request_id)
            .await
            .map_err(|err| {
                tracing::error!(
                    request_id = %request_id,
                    function = %route.function.name,
                    error = %err,
                    "handler could not be loaded"
                );
                synthetic_error(&err.to_string(), "HandlerLoadError")
            })
    }

    fn timed_out(&self, route: &Route) -> GatewayResponse {
        GatewayResponse::text(
            503,
            timeout_message(&route.function.name, route.function.timeout),
        )
    }

    fn template_context(
        &self,
        route: &Route,
        data: &RequestData,
        request: &GatewayRequest,
        request_id: &str,
    ) -> TemplateContext {
        let mut identity = Map::new();
        identity.insert(
            "sourceIp".into(),
            json!(request.source_ip.as_deref().unwrap_or("127.0.0.1")),
        );
        if let Some(agent) = data.headers.get("user-agent") {
            identity.insert("userAgent".into(), json!(agent));
        }

        TemplateContext {
            http_method: data.method.clone(),
            stage: self.stage.clone(),
            request_id: request_id.to_string(),
            resource_path: route.endpoint.path.clone(),
            api_id: OFFLINE_API_ID.to_string(),
            request_time_epoch: chrono::Utc::now().timestamp_millis(),
            headers: data.headers.clone(),
            query: data.query.clone(),
            path_params: data.path_params.clone(),
            identity,
            principal: None,
            stage_variables: self.stage_variables.clone(),
            payload: data.payload(),
            variables: Default::default(),
        }
    }

    fn reserved(&self, request: &GatewayRequest) -> GatewayResponse {
        if request.method != "GET" {
            return GatewayResponse::json(405, &json!({"error": "method not allowed"}))
                .with_header("allow", "GET");
        }

        match request.path.as_str() {
            "/__offline/health" => GatewayResponse::json(
                200,
                &json!({
                    "status": "healthy",
                    "service": self.service,
                    "stage": self.stage,
                    "routes_count": self.routes.len(),
                    "in_flight": self.invoker.in_flight(),
                }),
            ),
            "/__offline/metrics" => {
                let mut response = GatewayResponse::new(200)
                    .with_header("Content-Type", PROMETHEUS_CONTENT_TYPE);
                response.body = Bytes::from(render_metrics(&self.metrics));
                response
            }
            _ => self.not_found(request),
        }
    }

    fn not_found(&self, request: &GatewayRequest) -> GatewayResponse {
        GatewayResponse::json(
            404,
            &json!({
                "statusCode": 404,
                "error": "lambda-offline: route not found.",
                "currentRoute": format!("{} - {}", request.method, request.path),
                "existingRoutes": self.route_listing,
            }),
        )
    }
}

/// The 500 response for failures outside the handler.
fn synthetic_error(message: &str, error_type: &str) -> GatewayResponse {
    GatewayResponse::json(
        500,
        &json!({
            "errorMessage": message,
            "errorType": error_type,
            "stackTrace": [],
            "offlineInfo": OFFLINE_INFO,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use lambda_offline_config::parse_service;
    use lambda_offline_runtime::{async_handler, HandlerError, HandlerReturn, LambdaContext};
    use std::time::Duration;

    const SERVICE: &str = r#"
service: demo
provider:
  stage: dev
  timeout: 1
  stageVariables:
    env: local
functions:
  hello:
    handler: hello
    events:
      - http:
          method: get
          path: /hello
  echo:
    handler: echo
    events:
      - http:
          method: post
          path: /echo/{id}
          request:
            template:
              text/plain: '{"text": "$util.escapeJavaScript($input.body)", "id": "$input.params(''id'')"}'
  never:
    handler: never
    events:
      - http:
          method: get
          path: /never
  twice:
    handler: twice
    events:
      - http:
          method: get
          path: /twice
  lookup:
    handler: lookup
    events:
      - http:
          method: get
          path: /items/{id}
          responses:
            default:
              statusCode: 200
              responseParameters:
                method.response.header.Location: integration.response.body.url
            notFound:
              statusCode: 404
              selectionPattern: "Not Found.*"
  secret:
    handler: secret
    events:
      - http:
          method: get
          path: /secret
          authorizer: auth
          request:
            template:
              application/json: '{"principal": "$context.authorizer.principalId", "role": "$context.authorizer.role"}'
  auth:
    handler: auth
  proxied:
    handler: proxied
    events:
      - http:
          method: any
          path: /proxy/{path+}
          integration: lambda-proxy
  broken:
    handler: echo
    events:
      - http:
          method: post
          path: /broken
          request:
            template:
              application/json: '{"x": $nope}'
  missing:
    handler: not_registered
    events:
      - http:
          method: get
          path: /missing-handler
"#;

    fn registry() -> HandlerRegistry {
        HandlerRegistry::new()
            .with("hello", |_: Value, ctx: LambdaContext| {
                ctx.succeed(json!({"msg": "hi"}));
                HandlerReturn::Immediate
            })
            .with("echo", |event: Value, ctx: LambdaContext| {
                ctx.succeed(event);
                HandlerReturn::Immediate
            })
            .with("never", |_: Value, _: LambdaContext| HandlerReturn::Immediate)
            .with("twice", |_: Value, ctx: LambdaContext| {
                ctx.succeed("first");
                ctx.succeed("second");
                HandlerReturn::Immediate
            })
            .with(
                "lookup",
                async_handler(|event: Value, _: LambdaContext| async move {
                    match event["path"]["id"].as_str() {
                        Some("5") => Err(HandlerError::new("Not Found: id=5")),
                        Some("7") => Ok(json!({"url": "http://x"})),
                        _ => Err(HandlerError::new("Other")),
                    }
                }),
            )
            .with("secret", |event: Value, ctx: LambdaContext| {
                ctx.succeed(event);
                HandlerReturn::Immediate
            })
            .with("auth", |event: Value, ctx: LambdaContext| {
                match event["authorizationToken"].as_str() {
                    Some("allow") => ctx.succeed(json!({
                        "principalId": "user-1",
                        "context": {"role": "admin"}
                    })),
                    Some("deny") => ctx.succeed(json!({
                        "principalId": "user-1",
                        "policyDocument": {"Statement": [{"Effect": "Deny"}]}
                    })),
                    _ => ctx.fail("Unauthorized"),
                }
                HandlerReturn::Immediate
            })
            .with("proxied", |event: Value, ctx: LambdaContext| {
                ctx.succeed(json!({
                    "statusCode": 202,
                    "headers": {"X-Path": event["pathParameters"]["path"]},
                    "body": event["httpMethod"]
                }));
                HandlerReturn::Immediate
            })
    }

    fn gateway_with(options: GatewayOptions) -> Gateway {
        let service = parse_service(SERVICE).unwrap().resolve().unwrap();
        Gateway::new(service, options, registry()).unwrap()
    }

    fn gateway() -> Gateway {
        gateway_with(GatewayOptions::new())
    }

    #[tokio::test]
    async fn hello_success() {
        let response = gateway().handle(GatewayRequest::new("GET", "/hello")).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.json_body(), Some(json!({"msg": "hi"})));
        assert_eq!(response.header_value("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn default_request_template_event() {
        let gateway = gateway();
        let response = gateway
            .handle(
                GatewayRequest::new("POST", "/echo/9?q=1")
                    .header("Content-Type", "application/json")
                    .body(r#"{"a": 1}"#),
            )
            .await;
        let event = response.json_body().unwrap();
        assert_eq!(event["body"], json!({"a": 1}));
        assert_eq!(event["method"], json!("POST"));
        assert_eq!(event["path"], json!({"id": "9"}));
        assert_eq!(event["query"], json!({"q": "1"}));
        assert_eq!(event["stage"], json!("dev"));
        assert_eq!(event["stageVariables"], json!({"env": "local"}));
        assert_eq!(event["headers"]["content-type"], json!("application/json"));
        assert_eq!(event["identity"]["sourceIp"], json!("127.0.0.1"));
    }

    #[tokio::test]
    async fn request_template_by_content_type() {
        let response = gateway()
            .handle(
                GatewayRequest::new("POST", "/echo/3")
                    .header("content-type", "text/plain; charset=utf-8")
                    .body("say \"hi\""),
            )
            .await;
        assert_eq!(
            response.json_body(),
            Some(json!({"text": "say \"hi\"", "id": "3"}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn never_completing_handler_times_out() {
        let gateway = gateway();
        let response = gateway.handle(GatewayRequest::new("GET", "/never")).await;
        assert_eq!(response.status, 503);
        let text = response.text_body();
        assert!(text.contains("never"), "{}", text);
        assert!(text.contains("1000"), "{}", text);
        assert_eq!(gateway.invoker().in_flight(), 0);
    }

    #[tokio::test]
    async fn double_completion_sends_first_result() {
        let response = gateway().handle(GatewayRequest::new("GET", "/twice")).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.text_body(), "first");
    }

    #[tokio::test]
    async fn error_selection_and_headers() {
        let gateway = gateway();

        let not_found = gateway.handle(GatewayRequest::new("GET", "/items/5")).await;
        assert_eq!(not_found.status, 404);
        assert_eq!(not_found.json_body().unwrap()["errorMessage"], json!("Not Found: id=5"));

        let other = gateway.handle(GatewayRequest::new("GET", "/items/1")).await;
        assert_eq!(other.status, 200);
        assert_eq!(other.json_body().unwrap()["errorMessage"], json!("Other"));

        let found = gateway.handle(GatewayRequest::new("GET", "/items/7")).await;
        assert_eq!(found.status, 200);
        assert_eq!(found.header_value("Location"), Some("http://x"));
    }

    #[tokio::test]
    async fn unknown_route_lists_routes() {
        let response = gateway().handle(GatewayRequest::new("GET", "/missing")).await;
        assert_eq!(response.status, 404);
        let body = response.json_body().unwrap();
        assert_eq!(body["statusCode"], json!(404));
        assert_eq!(body["currentRoute"], json!("GET - /missing"));
        assert_eq!(
            body["existingRoutes"],
            json!([
                "POST - /broken",
                "POST - /echo/{id}",
                "GET - /hello",
                "GET - /items/{id}",
                "GET - /missing-handler",
                "GET - /never",
                "ANY - /proxy/{path+}",
                "GET - /secret",
                "GET - /twice"
            ])
        );
    }

    #[tokio::test]
    async fn wrong_method_is_not_found() {
        let response = gateway().handle(GatewayRequest::new("DELETE", "/hello")).await;
        assert_eq!(response.status, 404);
        assert_eq!(response.json_body().unwrap()["currentRoute"], json!("DELETE - /hello"));
    }

    #[tokio::test]
    async fn authorizer_outcomes() {
        let gateway = gateway();

        let allowed = gateway
            .handle(GatewayRequest::new("GET", "/secret").header("Authorization", "allow"))
            .await;
        assert_eq!(allowed.status, 200);
        assert_eq!(
            allowed.json_body(),
            Some(json!({"principal": "user-1", "role": "admin"}))
        );

        let denied = gateway
            .handle(GatewayRequest::new("GET", "/secret").header("Authorization", "deny"))
            .await;
        assert_eq!(denied.status, 403);

        let failed = gateway
            .handle(GatewayRequest::new("GET", "/secret").header("Authorization", "nope"))
            .await;
        assert_eq!(failed.status, 401);
        assert_eq!(failed.json_body(), Some(json!({"message": "Unauthorized"})));

        let missing = gateway.handle(GatewayRequest::new("GET", "/secret")).await;
        assert_eq!(missing.status, 401);
    }

    #[tokio::test]
    async fn proxy_integration() {
        let response = gateway()
            .handle(GatewayRequest::new("PATCH", "/proxy/a/b"))
            .await;
        assert_eq!(response.status, 202);
        assert_eq!(response.header_value("X-Path"), Some("a/b"));
        assert_eq!(response.text_body(), "PATCH");
    }

    #[tokio::test]
    async fn load_errors_are_synthetic() {
        let response = gateway()
            .handle(GatewayRequest::new("GET", "/missing-handler"))
            .await;
        assert_eq!(response.status, 500);
        let body = response.json_body().unwrap();
        assert_eq!(body["errorType"], json!("HandlerLoadError"));
        assert!(body["errorMessage"].as_str().unwrap().contains("not_registered"));
        assert_eq!(body["stackTrace"], json!([]));
        assert!(body["offlineInfo"].is_string());
    }

    #[tokio::test]
    async fn request_template_errors_are_synthetic() {
        let gateway = gateway();
        let response = gateway
            .handle(
                GatewayRequest::new("POST", "/broken")
                    .header("Content-Type", "application/json")
                    .body("{}"),
            )
            .await;
        assert_eq!(response.status, 500);
        let body = response.json_body().unwrap();
        assert_eq!(body["errorType"], json!("TemplateRenderError"));
        let message = body["errorMessage"].as_str().unwrap();
        assert!(message.contains("\"application/json\""), "{}", message);
        assert!(message.contains("for broken"), "{}", message);
        assert!(message.contains("$nope"), "{}", message);
        assert_eq!(body["stackTrace"], json!([]));
        assert_eq!(gateway.invoker().in_flight(), 0);
    }

    #[tokio::test]
    async fn cors_headers_and_preflight() {
        let gateway = gateway_with(GatewayOptions::new().with_cors(true));

        let response = gateway
            .handle(GatewayRequest::new("GET", "/hello").header("Origin", "http://localhost:3000"))
            .await;
        assert_eq!(
            response.header_value("access-control-allow-origin"),
            Some("http://localhost:3000")
        );
        assert_eq!(response.header_value("access-control-allow-credentials"), Some("true"));

        let preflight = gateway.handle(GatewayRequest::new("OPTIONS", "/items/1")).await;
        assert_eq!(preflight.status, 200);
        assert_eq!(
            preflight.header_value("access-control-allow-methods"),
            Some("GET, OPTIONS")
        );
        assert_eq!(preflight.header_value("access-control-allow-origin"), Some("*"));

        let not_found = gateway.handle(GatewayRequest::new("GET", "/nope")).await;
        assert_eq!(not_found.header_value("access-control-allow-origin"), Some("*"));
    }

    #[tokio::test]
    async fn options_without_cors_is_not_found() {
        let response = gateway().handle(GatewayRequest::new("OPTIONS", "/hello")).await;
        assert_eq!(response.status, 404);
        assert!(response.header_value("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn prefix_and_stage_override() {
        let gateway = gateway_with(GatewayOptions::new().with_prefix("/api/").with_stage("test"));
        assert_eq!(gateway.handle(GatewayRequest::new("GET", "/hello")).await.status, 404);
        let response = gateway
            .handle(GatewayRequest::new("POST", "/api/echo/1"))
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.json_body().unwrap()["stage"], json!("test"));
        assert!(gateway.routes().contains(&"GET - /api/hello".to_string()));
    }

    #[tokio::test]
    async fn reserved_endpoints() {
        let gateway = gateway();
        gateway.handle(GatewayRequest::new("GET", "/hello")).await;

        let health = gateway.handle(GatewayRequest::new("GET", "/__offline/health")).await;
        assert_eq!(health.status, 200);
        let body = health.json_body().unwrap();
        assert_eq!(body["status"], json!("healthy"));
        assert_eq!(body["routes_count"], json!(9));
        assert_eq!(body["in_flight"], json!(0));

        let metrics = gateway.handle(GatewayRequest::new("GET", "/__offline/metrics")).await;
        assert_eq!(metrics.status, 200);
        let text = metrics.text_body();
        assert!(text.contains("lambda_offline_requests_total"));
        assert!(text.contains(r#"path="/hello""#));

        let post = gateway.handle(GatewayRequest::new("POST", "/__offline/health")).await;
        assert_eq!(post.status, 405);
    }

    #[test]
    fn configuration_errors() {
        let unsupported = r#"
service: bad
functions:
  f:
    handler: f
    runtime: nodejs18.x
"#;
        let service = parse_service(unsupported).unwrap().resolve().unwrap();
        assert!(matches!(
            Gateway::new(service, GatewayOptions::new(), HandlerRegistry::new()),
            Err(ConfigError::UnsupportedRuntime { .. })
        ));

        let reserved = r#"
service: bad
functions:
  f:
    handler: f
    events:
      - http:
          method: get
          path: /__offline/health
"#;
        let service = parse_service(reserved).unwrap().resolve().unwrap();
        assert!(matches!(
            Gateway::new(service, GatewayOptions::new(), HandlerRegistry::new()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_can_be_disabled() {
        let gateway = Arc::new(gateway_with(GatewayOptions::new().with_timeouts(false)));
        let task = {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move { gateway.handle(GatewayRequest::new("GET", "/never")).await })
        };
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!task.is_finished());
        assert_eq!(gateway.invoker().in_flight(), 1);
        task.abort();
    }
}
