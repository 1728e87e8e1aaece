//! CORS headers for every response and `OPTIONS` preflights.

use crate::gateway::GatewayResponse;

/// Headers allowed on preflight when the browser does not ask for specific ones.
pub const DEFAULT_ALLOW_HEADERS: &str =
    "Content-Type, X-Amz-Date, Authorization, X-Api-Key, X-Amz-Security-Token, X-Amz-User-Agent";

pub const MAX_AGE_SECONDS: u32 = 3600;

/// Add the allow-origin and allow-credentials headers unless already set.
///
/// The request's `Origin` is echoed back, `*` when there is none.
pub fn apply(response: &mut GatewayResponse, origin: Option<&str>) {
    if response.header_value("access-control-allow-origin").is_none() {
        response.set_header("access-control-allow-origin", origin.unwrap_or("*"));
    }
    if response.header_value("access-control-allow-credentials").is_none() {
        response.set_header("access-control-allow-credentials", "true");
    }
}

/// Answer a preflight for a path registered with `allowed` methods.
pub fn preflight(
    origin: Option<&str>,
    allowed: &[String],
    requested_headers: Option<&str>,
) -> GatewayResponse {
    let mut methods: Vec<&str> = allowed.iter().map(String::as_str).collect();
    if !methods.contains(&"OPTIONS") {
        methods.push("OPTIONS");
    }

    let mut response = GatewayResponse::new(200)
        .with_header("access-control-allow-methods", &methods.join(", "))
        .with_header(
            "access-control-allow-headers",
            requested_headers
                .filter(|h| !h.trim().is_empty())
                .unwrap_or(DEFAULT_ALLOW_HEADERS),
        )
        .with_header("access-control-max-age", &MAX_AGE_SECONDS.to_string())
        .with_header(
            "vary",
            "Origin, Access-Control-Request-Method, Access-Control-Request-Headers",
        );
    apply(&mut response, origin);
    response
}
