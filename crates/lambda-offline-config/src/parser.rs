use std::path::Path;

use crate::error::ConfigError;
use crate::model::ServiceConfig;

/// Parse a service file from a YAML (or JSON) string.
pub fn parse_service(content: &str) -> Result<ServiceConfig, ConfigError> {
    let config: ServiceConfig = serde_yaml::from_str(content)?;
    if config.service.trim().is_empty() {
        return Err(ConfigError::Invalid("'service' must not be empty".to_string()));
    }
    Ok(config)
}

/// Read and parse a service file.
pub fn parse_service_file(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_service(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Integration;
    use std::io::Write;

    #[test]
    fn parses_minimal_service() {
        let config = parse_service("service: demo\n").unwrap();
        assert_eq!(config.service, "demo");
        assert!(config.functions.is_empty());
        assert_eq!(config.provider.region, "us-east-1");
        assert_eq!(config.provider.timeout, 6.0);
    }

    #[test]
    fn parses_json_too() {
        let config = parse_service(r#"{"service": "demo", "provider": {"stage": "local"}}"#).unwrap();
        assert_eq!(config.provider.stage, "local");
    }

    #[test]
    fn parses_http_events() {
        let yaml = r#"
service: demo
functions:
  hello:
    handler: handlers.hello
    runtime: mock
    mock:
      result: { msg: hi }
      delayMs: 10
    events:
      - schedule: rate(1 minute)
      - http:
          method: get
          path: hello
          integration: lambda-proxy
          request:
            template:
              application/json: '{"a": 1}'
          responses:
            default:
              statusCode: 200
              responseTemplates:
                text/plain: '$input.path("$.msg")'
                application/json: ''
"#;
        let config = parse_service(yaml).unwrap();
        let (name, hello) = config.functions.first().unwrap();
        assert_eq!(name, "hello");
        assert_eq!(hello.runtime.as_deref(), Some("mock"));
        assert_eq!(hello.mock.as_ref().unwrap().delay_ms, 10);
        assert_eq!(hello.events.len(), 2);
        assert!(hello.events[0].http.is_none());

        let http = hello.events[1].http.as_ref().unwrap();
        assert_eq!(http.integration, Integration::LambdaProxy);
        let templates = &http.responses.get("default").unwrap().response_templates;
        assert_eq!(templates.first().map(|(k, _)| k), Some("text/plain"));
    }

    #[test]
    fn rejects_empty_service_name() {
        assert!(matches!(
            parse_service("service: ''\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn reports_parse_errors() {
        assert!(matches!(
            parse_service("service: [unterminated"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "service: from-file").unwrap();
        let config = parse_service_file(file.path()).unwrap();
        assert_eq!(config.service, "from-file");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = parse_service_file(Path::new("/nonexistent/serverless.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
