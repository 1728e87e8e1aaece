//! TestGateway: runs the `lambda-offline` binary for end-to-end tests.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use thiserror::Error;

/// Errors from TestGateway operations.
#[derive(Debug, Error)]
pub enum TestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway failed to start: {0}")]
    StartupFailed(String),

    #[error("gateway binary not found at {0}")]
    BinaryNotFound(String),
}

/// Full-stack test harness.
///
/// Starts `lambda-offline serve` for a service file on a free port and waits
/// for the health endpoint before handing out request helpers.
pub struct TestGateway {
    child: Child,
    port: u16,
    client: reqwest::Client,
}

impl TestGateway {
    /// Serve a service file with default options.
    pub async fn from_config(config_path: impl AsRef<Path>) -> Result<Self, TestError> {
        Self::with_args(config_path, &[]).await
    }

    /// Serve a service file with extra `serve` flags, e.g. `["--cors"]`.
    pub async fn with_args(
        config_path: impl AsRef<Path>,
        extra_args: &[&str],
    ) -> Result<Self, TestError> {
        let binary_path = find_lambda_offline_binary()?;
        let port = find_available_port()?;

        let child = Command::new(&binary_path)
            .arg("serve")
            .arg("--config")
            .arg(config_path.as_ref())
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string())
            .args(extra_args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut gateway = TestGateway {
            child,
            port,
            client: reqwest::Client::new(),
        };
        gateway.wait_for_ready().await?;
        Ok(gateway)
    }

    /// Poll the health endpoint until it answers or the process exits.
    async fn wait_for_ready(&mut self) -> Result<(), TestError> {
        let health_url = format!("{}/__offline/health", self.base_url());
        let max_attempts = 50;
        let delay = Duration::from_millis(100);

        for _ in 0..max_attempts {
            if let Ok(resp) = self.client.get(&health_url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }

            if let Ok(Some(status)) = self.child.try_wait() {
                let mut stderr = String::new();
                if let Some(pipe) = self.child.stderr.as_mut() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                return Err(TestError::StartupFailed(format!(
                    "gateway exited with status {}: {}",
                    status,
                    stderr.trim()
                )));
            }

            tokio::time::sleep(delay).await;
        }

        Err(TestError::StartupFailed(
            "gateway did not become ready in time".to_string(),
        ))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response, TestError> {
        let url = format!("{}{}", self.base_url(), path);
        Ok(self.client.get(&url).send().await?)
    }

    /// POST a JSON body.
    pub async fn post(&self, path: &str, body: &str) -> Result<reqwest::Response, TestError> {
        let url = format!("{}{}", self.base_url(), path);
        Ok(self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await?)
    }

    pub async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::Response, TestError> {
        let url = format!("{}{}", self.base_url(), path);
        Ok(self.client.request(method, &url).send().await?)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Absolute path of a file under the workspace `tests/fixtures` directory.
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../tests/fixtures")
        .join(name)
}

/// Locate the `lambda-offline` binary in the workspace target directory.
fn find_lambda_offline_binary() -> Result<PathBuf, TestError> {
    let target = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../target");
    let target = std::env::var_os("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or(target);

    for profile in ["debug", "release"] {
        let path = target.join(profile).join("lambda-offline");
        if path.exists() {
            return Ok(path);
        }
    }

    Err(TestError::BinaryNotFound(format!(
        "{}/{{debug,release}}/lambda-offline",
        target.display()
    )))
}

/// Ask the OS for a free port.
fn find_available_port() -> Result<u16, TestError> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    async fn minimal() -> TestGateway {
        TestGateway::from_config(fixture("minimal.yaml"))
            .await
            .expect("failed to start gateway")
    }

    #[tokio::test]
    async fn test_gateway_health() {
        let gateway = minimal().await;

        let resp = gateway.get("/__offline/health").await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "fixture");
    }

    #[tokio::test]
    async fn test_gateway_mock_response() {
        let gateway = minimal().await;

        let resp = gateway.get("/hello").await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "application/json"
        );

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, json!({"message": "hello"}));
    }

    #[tokio::test]
    async fn test_gateway_request_template() {
        let gateway = minimal().await;

        let resp = gateway.post("/echo/7", r#"{"name": "x"}"#).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, json!({"id": "7", "body": {"name": "x"}}));
    }

    #[tokio::test]
    async fn test_gateway_error_selection() {
        let gateway = minimal().await;

        let resp = gateway.get("/items/3").await.unwrap();
        assert_eq!(resp.status(), 404);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Not Found: no such item");
    }

    #[tokio::test]
    async fn test_gateway_timeout() {
        let gateway = minimal().await;

        let resp = gateway.get("/never").await.unwrap();
        assert_eq!(resp.status(), 503);

        let text = resp.text().await.unwrap();
        assert!(text.contains("never"), "{}", text);
        assert!(text.contains("1000ms"), "{}", text);
    }

    #[tokio::test]
    async fn test_gateway_proxy() {
        let gateway = minimal().await;

        let resp = gateway
            .request(reqwest::Method::PUT, "/proxy/a/b")
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        assert_eq!(resp.headers().get("x-proxied").unwrap(), "yes");
        assert_eq!(resp.text().await.unwrap(), "created");
    }

    #[tokio::test]
    async fn test_gateway_404_lists_routes() {
        let gateway = minimal().await;

        let resp = gateway.get("/nonexistent").await.unwrap();
        assert_eq!(resp.status(), 404);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["currentRoute"], "GET - /nonexistent");
        let routes = body["existingRoutes"].as_array().unwrap();
        assert!(routes.contains(&json!("GET - /hello")));
    }

    #[tokio::test]
    async fn test_gateway_cors() {
        let gateway = TestGateway::with_args(fixture("minimal.yaml"), &["--cors"])
            .await
            .expect("failed to start gateway");

        let resp = gateway
            .request(reqwest::Method::OPTIONS, "/hello")
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let methods = resp
            .headers()
            .get("access-control-allow-methods")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(methods.contains("GET"));

        let resp = gateway.get("/hello").await.unwrap();
        assert_eq!(resp.headers().get("access-control-allow-origin").unwrap(), "*");
    }

    #[tokio::test]
    async fn test_gateway_prefix_and_stage() {
        let gateway = TestGateway::with_args(
            fixture("minimal.yaml"),
            &["--prefix", "api", "--stage", "local"],
        )
        .await
        .expect("failed to start gateway");

        assert_eq!(gateway.get("/api/hello").await.unwrap().status(), 200);
        assert_eq!(gateway.get("/hello").await.unwrap().status(), 404);

        let health: Value = gateway
            .get("/__offline/health")
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["stage"], "local");
    }
}
