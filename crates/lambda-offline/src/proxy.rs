//! `lambda-proxy` integration: the handler sees the whole request and
//! returns the whole response.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use lambda_offline_runtime::InvocationOutcome;
use lambda_offline_template::TemplateContext;
use serde_json::{json, Map, Value};

use crate::gateway::GatewayResponse;
use crate::request::RequestData;
use crate::response::JSON_CONTENT_TYPE;

/// Account id reported in proxy request contexts.
pub const OFFLINE_ACCOUNT_ID: &str = "offlineContext_accountId";

/// Build the proxy event for a routed request.
///
/// `resource` is the route template; `ctx` supplies the request context
/// fields (stage, ids, identity, principal, stage variables).
pub fn build_event(request: &RequestData, resource: &str, ctx: &TemplateContext) -> Value {
    let (body, is_base64_encoded) = if request.body.is_empty() {
        (Value::Null, false)
    } else {
        match std::str::from_utf8(&request.body) {
            Ok(text) => (Value::String(text.to_string()), false),
            Err(_) => (Value::String(STANDARD.encode(&request.body)), true),
        }
    };

    let authorizer = match &ctx.principal {
        Some(principal) => {
            let mut authorizer = principal.context.clone();
            authorizer.insert("principalId".into(), json!(principal.principal_id));
            Value::Object(authorizer)
        }
        None => Value::Null,
    };

    json!({
        "resource": resource,
        "path": request.path,
        "httpMethod": request.method,
        "headers": string_map(&request.headers),
        "multiValueHeaders": multi_map(&request.multi_value_headers),
        "queryStringParameters": string_map(&request.query),
        "multiValueQueryStringParameters": multi_map(&request.multi_value_query),
        "pathParameters": string_map(&request.path_params),
        "stageVariables": string_map(&ctx.stage_variables),
        "requestContext": {
            "accountId": OFFLINE_ACCOUNT_ID,
            "apiId": ctx.api_id,
            "resourcePath": resource,
            "path": request.path,
            "httpMethod": request.method,
            "requestId": ctx.request_id,
            "stage": ctx.stage,
            "requestTimeEpoch": ctx.request_time_epoch,
            "identity": Value::Object(ctx.identity.clone()),
            "authorizer": authorizer,
        },
        "body": body,
        "isBase64Encoded": is_base64_encoded,
    })
}

fn string_map(map: &BTreeMap<String, String>) -> Value {
    if map.is_empty() {
        return Value::Null;
    }
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

fn multi_map(map: &BTreeMap<String, Vec<String>>) -> Value {
    if map.is_empty() {
        return Value::Null;
    }
    Value::Object(
        map.iter()
            .map(|(k, values)| (k.clone(), json!(values)))
            .collect(),
    )
}

/// Response sent when a proxy handler fails or returns something malformed.
pub fn bad_gateway() -> GatewayResponse {
    GatewayResponse::json(502, &json!({"message": "Internal server error"}))
}

/// Convert a proxy handler's outcome into a response.
///
/// Timeouts are answered by the dispatcher and map to `bad_gateway` here.
pub fn into_response(outcome: &InvocationOutcome, function: &str) -> GatewayResponse {
    let result = match outcome {
        InvocationOutcome::Success(Value::Object(result)) => result,
        InvocationOutcome::Success(other) => {
            tracing::warn!(function = %function, result = %other, "proxy result is not an object");
            return bad_gateway();
        }
        InvocationOutcome::Failure(_) | InvocationOutcome::TimedOut => return bad_gateway(),
    };

    match parse_result(result) {
        Ok(response) => response,
        Err(reason) => {
            tracing::warn!(function = %function, reason = %reason, "malformed proxy result");
            bad_gateway()
        }
    }
}

fn parse_result(result: &Map<String, Value>) -> Result<GatewayResponse, String> {
    let status = match result.get("statusCode") {
        None | Some(Value::Null) => 200,
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .ok_or_else(|| format!("invalid statusCode {}", n))?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<u16>()
            .map_err(|_| format!("invalid statusCode '{}'", s))?,
        Some(other) => return Err(format!("invalid statusCode {}", other)),
    };
    if !(100..=599).contains(&status) {
        return Err(format!("statusCode {} out of range", status));
    }

    let mut response = GatewayResponse::new(status);

    if let Some(Value::Object(headers)) = result.get("headers") {
        for (name, value) in headers {
            response.set_header(name, &scalar(value));
        }
    }
    if let Some(Value::Object(headers)) = result.get("multiValueHeaders") {
        for (name, values) in headers {
            match values {
                Value::Array(values) => {
                    for value in values {
                        response.append_header(name, &scalar(value));
                    }
                }
                other => response.append_header(name, &scalar(other)),
            }
        }
    }

    let body = match result.get("body") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(body)) => body.clone(),
        Some(_) => return Err("body must be a string".to_string()),
    };
    let is_base64 = result
        .get("isBase64Encoded")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    response.body = if is_base64 {
        Bytes::from(
            STANDARD
                .decode(body.as_bytes())
                .map_err(|e| format!("body is not valid base64: {}", e))?,
        )
    } else {
        Bytes::from(body)
    };

    if response.header_value("content-type").is_none() {
        response.set_header("Content-Type", JSON_CONTENT_TYPE);
    }
    Ok(response)
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
