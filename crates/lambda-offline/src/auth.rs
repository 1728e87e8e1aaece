//! Local authorizers.
//!
//! An [`AuthStrategy`] is built once per protected route. On each request
//! it extracts the credential, renders the authorizer event, invokes the
//! authorizer function through the [`Invoker`] and turns the result into a
//! principal or a rejection.

use std::sync::Arc;

use lambda_offline_config::{AuthorizerSpec, ConfigError, CredentialType, FunctionSpec, IdentitySource};
use lambda_offline_runtime::{InvocationOutcome, Invoker};
use lambda_offline_template::{
    render, Principal, TemplateContext, REQUEST_AUTHORIZER_TEMPLATE, TOKEN_AUTHORIZER_TEMPLATE,
};
use serde_json::{json, Map, Value};

/// Settings shared by every strategy of a gateway.
#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub region: String,
    pub stage: String,
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// Missing or invalid credential, or the authorizer failed.
    Unauthorized,
    /// The authorizer returned an explicit deny.
    Forbidden,
}

impl AuthRejection {
    pub fn status(self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
        }
    }

    pub fn body(self) -> Value {
        match self {
            Self::Unauthorized => json!({"message": "Unauthorized"}),
            Self::Forbidden => json!({"message": "User is not authorized to access this resource"}),
        }
    }
}

/// The authorizer guarding one route.
#[derive(Debug, Clone)]
pub struct AuthStrategy {
    authorizer: Arc<FunctionSpec>,
    credential_type: CredentialType,
    identity_source: IdentitySource,
    identity_validation: Option<regex_lite::Regex>,
    method_arn: String,
}

impl AuthStrategy {
    /// Build the strategy for `owner_function`'s route `method path`.
    ///
    /// `authorizer_function` is the local function the declaration names, if the
    /// service defines one.
    pub fn build(
        authorizer_function: Option<&Arc<FunctionSpec>>,
        spec: &AuthorizerSpec,
        owner_function: &str,
        path: &str,
        method: &str,
        options: &AuthOptions,
    ) -> Result<Self, ConfigError> {
        if spec.function_name.starts_with("arn:") {
            return Err(ConfigError::RemoteAuthorizer {
                function: owner_function.to_string(),
                authorizer: spec.function_name.clone(),
            });
        }
        let authorizer = authorizer_function.ok_or_else(|| ConfigError::UnknownAuthorizer {
            function: owner_function.to_string(),
            authorizer: spec.function_name.clone(),
        })?;

        Ok(Self {
            authorizer: Arc::clone(authorizer),
            credential_type: spec.credential_type,
            identity_source: spec.identity_source.clone(),
            identity_validation: spec.identity_validation.clone(),
            method_arn: method_arn(&options.region, owner_function, &options.stage, method, path),
        })
    }

    pub fn authorizer(&self) -> &Arc<FunctionSpec> {
        &self.authorizer
    }

    pub fn method_arn(&self) -> &str {
        &self.method_arn
    }

    /// Read the credential from the request.
    pub fn credential<'a>(&self, request: &'a TemplateContext) -> Option<&'a str> {
        let value = match &self.identity_source {
            IdentitySource::Header(name) => request.headers.get(name),
            IdentitySource::QueryString(name) => request.query.get(name),
            IdentitySource::Path(name) => request.path_params.get(name),
        }?;
        Some(value.as_str()).filter(|v| !v.is_empty())
    }

    /// Run the authorizer for a request.
    ///
    /// `request` is the request-side template context and `request_path`
    /// the concrete path. A missing credential, or one failing the
    /// validation expression, is rejected without invoking anything.
    pub async fn authenticate(
        &self,
        request: &TemplateContext,
        request_path: &str,
        invoker: &Invoker,
    ) -> Result<Principal, AuthRejection> {
        let credential = self.credential(request).ok_or(AuthRejection::Unauthorized)?;
        if let Some(validation) = &self.identity_validation {
            if !validation.is_match(credential) {
                tracing::debug!(
                    authorizer = %self.authorizer.name,
                    "credential does not match the identity validation expression"
                );
                return Err(AuthRejection::Unauthorized);
            }
        }

        let event = self.event(request, credential, request_path)?;
        let request_id = uuid::Uuid::new_v4().to_string();
        let outcome = match invoker.invoke(&self.authorizer, event, &request_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(
                    authorizer = %self.authorizer.name,
                    error = %err,
                    "authorizer could not be loaded"
                );
                return Err(AuthRejection::Unauthorized);
            }
        };

        match outcome {
            InvocationOutcome::Success(Value::Object(result)) => principal_from(result),
            InvocationOutcome::Success(other) => {
                tracing::warn!(
                    authorizer = %self.authorizer.name,
                    result = %other,
                    "authorizer returned a non-object result"
                );
                Err(AuthRejection::Unauthorized)
            }
            InvocationOutcome::Failure(err) => {
                tracing::debug!(
                    authorizer = %self.authorizer.name,
                    error = %err,
                    "authorizer rejected the request"
                );
                Err(AuthRejection::Unauthorized)
            }
            InvocationOutcome::TimedOut => Err(AuthRejection::Unauthorized),
        }
    }

    fn event(
        &self,
        request: &TemplateContext,
        credential: &str,
        request_path: &str,
    ) -> Result<Value, AuthRejection> {
        let ctx = request
            .clone()
            .with_variable("authorizationToken", credential)
            .with_variable("methodArn", self.method_arn.as_str())
            .with_variable("requestPath", request_path);
        let template = match self.credential_type {
            CredentialType::Token => TOKEN_AUTHORIZER_TEMPLATE,
            CredentialType::Request => REQUEST_AUTHORIZER_TEMPLATE,
        };
        render(template, &ctx).map_err(|err| {
            lambda_offline_telemetry::log_template_error!(
                authorizer = %self.authorizer.name,
                error = %err,
                "authorizer event could not be rendered"
            );
            AuthRejection::Unauthorized
        })
    }
}

/// `arn:aws:execute-api:<region>:offline:<function>/<stage>/<METHOD><path>`
pub fn method_arn(region: &str, function: &str, stage: &str, method: &str, path: &str) -> String {
    format!(
        "arn:aws:execute-api:{}:offline:{}/{}/{}{}",
        region,
        function,
        stage,
        method.to_ascii_uppercase(),
        path
    )
}

fn principal_from(result: Map<String, Value>) -> Result<Principal, AuthRejection> {
    if denies(&result) {
        return Err(AuthRejection::Forbidden);
    }

    let principal_id = match result.get("principalId") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let context = match result.get("context") {
        Some(Value::Object(context)) => context.clone(),
        _ => Map::new(),
    };

    Ok(Principal {
        principal_id,
        context,
    })
}

/// Whether any policy statement has `Effect: Deny`.
fn denies(result: &Map<String, Value>) -> bool {
    let statements = match result.get("policyDocument").and_then(|p| p.get("Statement")) {
        Some(Value::Array(statements)) => statements.iter().collect::<Vec<_>>(),
        Some(statement @ Value::Object(_)) => vec![statement],
        _ => return false,
    };
    statements.iter().any(|statement| {
        statement
            .get("Effect")
            .and_then(Value::as_str)
            .is_some_and(|effect| effect.eq_ignore_ascii_case("deny"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lambda_offline_config::parse_service;
    use lambda_offline_runtime::{HandlerRegistry, HandlerReturn, InvokerOptions, LambdaContext};
    use parking_lot::Mutex;
    use std::time::Duration;

    fn options() -> AuthOptions {
        AuthOptions {
            region: "eu-west-1".into(),
            stage: "dev".into(),
        }
    }

    fn spec(authorizer_yaml: &str) -> (Arc<FunctionSpec>, AuthorizerSpec) {
        let yaml = format!(
            r#"
service: svc
functions:
  auth:
    handler: auth
  owner:
    handler: owner
    events:
      - http:
          method: get
          path: /things
          authorizer: {}
"#,
            authorizer_yaml
        );
        let service = parse_service(&yaml).unwrap().resolve().unwrap();
        let authorizer = service.endpoints[0].authorizer.clone().unwrap();
        (Arc::clone(service.function("auth").unwrap()), authorizer)
    }

    fn strategy(authorizer_yaml: &str) -> AuthStrategy {
        let (function, authorizer) = spec(authorizer_yaml);
        AuthStrategy::build(Some(&function), &authorizer, "owner", "/things", "get", &options()).unwrap()
    }

    fn invoker(result: Value, seen: Arc<Mutex<Vec<Value>>>) -> Invoker {
        let registry = HandlerRegistry::new().with("auth", move |event: Value, ctx: LambdaContext| {
            seen.lock().push(event);
            ctx.succeed(result.clone());
            HandlerReturn::Immediate
        });
        Invoker::new(registry, InvokerOptions::default())
    }

    fn request(header: Option<&str>) -> TemplateContext {
        let mut ctx = TemplateContext {
            http_method: "GET".into(),
            resource_path: "/things".into(),
            ..Default::default()
        };
        if let Some(value) = header {
            ctx.headers.insert("authorization".into(), value.into());
        }
        ctx
    }

    #[test]
    fn arn_format() {
        assert_eq!(
            strategy("auth").method_arn(),
            "arn:aws:execute-api:eu-west-1:offline:owner/dev/GET/things"
        );
    }

    #[test]
    fn build_rejects_remote_and_unknown() {
        let (function, mut authorizer) = spec("auth");
        assert!(matches!(
            AuthStrategy::build(None, &authorizer, "owner", "/t", "GET", &options()),
            Err(ConfigError::UnknownAuthorizer { .. })
        ));
        authorizer.function_name = "arn:aws:lambda:us-east-1:1:function:x".into();
        assert!(matches!(
            AuthStrategy::build(Some(&function), &authorizer, "owner", "/t", "GET", &options()),
            Err(ConfigError::RemoteAuthorizer { .. })
        ));
    }

    #[tokio::test]
    async fn token_authorizer_allows() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let invoker = invoker(
            json!({"principalId": "user-1", "context": {"role": "admin"}}),
            Arc::clone(&seen),
        );
        let principal = strategy("auth")
            .authenticate(&request(Some("Bearer t")), "/things", &invoker)
            .await
            .unwrap();
        assert_eq!(principal.principal_id, "user-1");
        assert_eq!(principal.context["role"], json!("admin"));

        let events = seen.lock();
        assert_eq!(events[0]["type"], json!("TOKEN"));
        assert_eq!(events[0]["authorizationToken"], json!("Bearer t"));
        assert_eq!(
            events[0]["methodArn"],
            json!("arn:aws:execute-api:eu-west-1:offline:owner/dev/GET/things")
        );
    }

    #[tokio::test]
    async fn missing_credential_skips_the_authorizer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let invoker = invoker(json!({"principalId": "x"}), Arc::clone(&seen));
        let rejection = strategy("auth")
            .authenticate(&request(None), "/things", &invoker)
            .await
            .unwrap_err();
        assert_eq!(rejection, AuthRejection::Unauthorized);
        assert_eq!(rejection.status(), 401);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn validation_expression_gates_the_call() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let invoker = invoker(json!({"principalId": "x"}), Arc::clone(&seen));
        let strategy = strategy(
            r#"
            name: auth
            identityValidationExpression: "^Bearer [a-z]+$""#,
        );
        assert_eq!(
            strategy
                .authenticate(&request(Some("Basic abc")), "/things", &invoker)
                .await
                .unwrap_err(),
            AuthRejection::Unauthorized
        );
        assert!(seen.lock().is_empty());
        assert!(strategy
            .authenticate(&request(Some("Bearer abc")), "/things", &invoker)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn explicit_deny_is_forbidden() {
        let invoker = invoker(
            json!({
                "principalId": "user-1",
                "policyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{"Action": "execute-api:Invoke", "Effect": "Deny", "Resource": "*"}]
                }
            }),
            Arc::new(Mutex::new(Vec::new())),
        );
        let rejection = strategy("auth")
            .authenticate(&request(Some("t")), "/things", &invoker)
            .await
            .unwrap_err();
        assert_eq!(rejection, AuthRejection::Forbidden);
        assert_eq!(rejection.status(), 403);
        assert_eq!(
            rejection.body(),
            json!({"message": "User is not authorized to access this resource"})
        );
    }

    #[tokio::test]
    async fn null_result_is_unauthorized() {
        let invoker = invoker(Value::Null, Arc::new(Mutex::new(Vec::new())));
        assert_eq!(
            strategy("auth")
                .authenticate(&request(Some("t")), "/things", &invoker)
                .await
                .unwrap_err(),
            AuthRejection::Unauthorized
        );
    }

    #[tokio::test]
    async fn request_authorizer_event() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let invoker = invoker(json!({"principalId": "p"}), Arc::clone(&seen));
        let strategy = strategy(
            r#"
            name: auth
            type: request
            identitySource: method.request.querystring.key"#,
        );
        let mut ctx = request(Some("ignored"));
        ctx.query.insert("key".into(), "k1".into());
        strategy.authenticate(&ctx, "/things", &invoker).await.unwrap();

        let events = seen.lock();
        assert_eq!(events[0]["type"], json!("REQUEST"));
        assert_eq!(events[0]["queryStringParameters"], json!({"key": "k1"}));
        assert_eq!(events[0]["headers"], json!({"authorization": "ignored"}));
        assert_eq!(events[0]["path"], json!("/things"));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_or_hanging_authorizers_are_unauthorized() {
        let registry = HandlerRegistry::new()
            .with("auth", |_: Value, ctx: LambdaContext| {
                ctx.fail("Unauthorized");
                HandlerReturn::Immediate
            })
            .with("slow", |_: Value, _: LambdaContext| HandlerReturn::Immediate);
        let invoker = Invoker::new(registry, InvokerOptions::default());

        let failing = strategy("auth");
        assert_eq!(
            failing.authenticate(&request(Some("t")), "/things", &invoker).await.unwrap_err(),
            AuthRejection::Unauthorized
        );

        let (function, authorizer) = spec("auth");
        let mut hanging = (*function).clone();
        hanging.handler = "slow".into();
        hanging.timeout = Duration::from_millis(100);
        let hanging = AuthStrategy::build(
            Some(&Arc::new(hanging)),
            &authorizer,
            "owner",
            "/things",
            "GET",
            &options(),
        )
        .unwrap();
        assert_eq!(
            hanging.authenticate(&request(Some("t")), "/things", &invoker).await.unwrap_err(),
            AuthRejection::Unauthorized
        );
    }
}
