//! Mapping templates for lambda-offline.
//!
//! A small Velocity dialect rendered against a [`TemplateContext`]. The
//! rendered text is parsed as JSON; text that is not JSON is returned as a
//! string value.
//!
//! ```
//! use lambda_offline_template::{render, Payload, TemplateContext};
//!
//! let ctx = TemplateContext::default().with_payload(Payload::from_body(r#"{"msg":"hi"}"#));
//! let value = render(r#"{"said": $input.json('$.msg')}"#, &ctx).unwrap();
//! assert_eq!(value, serde_json::json!({"said": "hi"}));
//! ```

mod context;
mod defaults;
mod error;
mod eval;
pub mod jsonpath;
mod parser;
mod util;

pub use context::{Payload, Principal, TemplateContext};
pub use defaults::{DEFAULT_REQUEST_TEMPLATE, REQUEST_AUTHORIZER_TEMPLATE, TOKEN_AUTHORIZER_TEMPLATE};
pub use error::TemplateRenderError;

use serde_json::Value;

/// Render a template to text.
pub fn render_to_string(
    template: &str,
    ctx: &TemplateContext,
) -> Result<String, TemplateRenderError> {
    let nodes = parser::parse_template(template)?;
    let mut out = String::new();
    eval::Evaluator::new(ctx).render(&nodes, &mut out)?;
    Ok(out)
}

/// Render a template and interpret the result as JSON.
pub fn render(template: &str, ctx: &TemplateContext) -> Result<Value, TemplateRenderError> {
    let text = render_to_string(template, ctx)?;
    Ok(serde_json::from_str(text.trim()).unwrap_or(Value::String(text)))
}
