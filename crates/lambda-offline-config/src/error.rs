use thiserror::Error;

/// Errors detected while loading or registering the service configuration.
///
/// All of these are fatal: they are reported before the gateway starts serving.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML/JSON parse error.
    #[error("parse error: {0}")]
    Parse(String),

    /// The configuration is structurally valid but semantically wrong.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The function declares a runtime this emulator cannot host.
    #[error("function '{function}' uses unsupported runtime '{runtime}'")]
    UnsupportedRuntime { function: String, runtime: String },

    /// The authorizer points outside of this service (e.g. an ARN).
    #[error("function '{function}': authorizer '{authorizer}' is not a local function; remote authorizers cannot be emulated")]
    RemoteAuthorizer { function: String, authorizer: String },

    /// The authorizer names a function that does not exist in this service.
    #[error("function '{function}': authorizer '{authorizer}' is not defined in this service")]
    UnknownAuthorizer { function: String, authorizer: String },

    /// The identity source expression is not one of the supported accessors.
    #[error("function '{function}': unsupported identity source '{source_expr}'")]
    InvalidIdentitySource { function: String, source_expr: String },

    /// A selection pattern or validation expression is not a valid regex.
    #[error("function '{function}': invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        function: String,
        pattern: String,
        reason: String,
    },

    /// Two endpoints share the same method and path.
    #[error("routing conflict: {method} {path} is declared by '{first}' and '{second}'")]
    RouteConflict {
        method: String,
        path: String,
        first: String,
        second: String,
    },

    /// I/O error reading the configuration file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
