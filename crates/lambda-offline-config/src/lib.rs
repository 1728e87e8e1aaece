//! Service configuration for lambda-offline.
//!
//! Reads a `serverless.yml`-shaped YAML/JSON file describing functions and
//! their HTTP events, and resolves it into immutable [`FunctionSpec`] and
//! [`EndpointSpec`] values. Order-sensitive sections (response rules,
//! response templates, response parameters) keep their declaration order.

pub mod error;
pub mod model;
pub mod ordered;
pub mod parser;
pub mod resolve;

pub use error::ConfigError;
pub use model::{Integration, MockConfig, MockError, ServiceConfig};
pub use ordered::OrderedMap;
pub use parser::{parse_service, parse_service_file};
pub use resolve::{
    normalize_path, prefixed_path, AuthorizerSpec, CredentialType, EndpointSpec, FunctionSpec,
    IdentitySource, ResponseRule, ServiceSpec, DEFAULT_RESPONSE,
};
