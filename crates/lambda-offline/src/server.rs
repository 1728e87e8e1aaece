//! HTTP(S) front end: accepts connections and hands requests to the [`Gateway`].

use std::convert::Infallible;
use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::gateway::{Gateway, GatewayResponse};
use crate::request::GatewayRequest;

pub const CERT_FILE: &str = "cert.pem";
pub const KEY_FILE: &str = "key.pem";

/// Errors that stop the server before or while listening.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS setup failed for {path}: {reason}")]
    Tls { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServeError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind { addr, source })
}

/// Build a TLS acceptor from `cert.pem` and `key.pem` in `dir`.
pub fn load_tls(dir: &Path) -> Result<TlsAcceptor, ServeError> {
    let cert_path = dir.join(CERT_FILE);
    let key_path = dir.join(KEY_FILE);
    let certs = load_certs(&cert_path)?;
    let key = load_private_key(&key_path)?;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .and_then(|builder| builder.with_no_client_auth().with_single_cert(certs, key))
        .map_err(|e| ServeError::Tls {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;

    tracing::info!(
        cert_path = %cert_path.display(),
        key_path = %key_path.display(),
        "TLS configuration loaded"
    );
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServeError> {
    let tls_error = |reason: String| ServeError::Tls {
        path: path.to_path_buf(),
        reason,
    };
    let file = File::open(path).map_err(|e| tls_error(e.to_string()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("invalid certificate: {}", e)))?;
    if certs.is_empty() {
        return Err(tls_error("no certificates found".to_string()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServeError> {
    let tls_error = |reason: String| ServeError::Tls {
        path: path.to_path_buf(),
        reason,
    };
    let file = File::open(path).map_err(|e| tls_error(e.to_string()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| tls_error(format!("invalid private key: {}", e)))?
        .ok_or_else(|| tls_error("no private key found".to_string()))
}

/// Accept connections until `shutdown` resolves.
///
/// Each connection is served on its own task; in-flight connections are
/// not awaited on shutdown.
pub async fn serve<S>(
    gateway: Arc<Gateway>,
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    shutdown: S,
) -> Result<(), ServeError>
where
    S: Future<Output = ()>,
{
    let addr = listener.local_addr()?;
    let scheme = if tls.is_some() { "https" } else { "http" };
    lambda_offline_telemetry::log_listening!(address = %addr, scheme = scheme, "listening");

    tokio::pin!(shutdown);
    loop {
        let (stream, peer) = tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };

        let gateway = Arc::clone(&gateway);
        match &tls {
            Some(acceptor) => {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => serve_connection(gateway, tls_stream, peer).await,
                        Err(e) => tracing::debug!(peer = %peer, error = %e, "TLS handshake failed"),
                    }
                });
            }
            None => {
                tokio::spawn(serve_connection(gateway, stream, peer));
            }
        }
    }
}

async fn serve_connection<IO>(gateway: Arc<Gateway>, io: IO, peer: SocketAddr)
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let metrics = Arc::clone(gateway.metrics());
    metrics.connection_opened();

    let service = service_fn(move |req| {
        let gateway = Arc::clone(&gateway);
        async move { handle_request(&gateway, req, peer).await }
    });
    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .await
    {
        tracing::debug!(peer = %peer, error = %e, "connection error");
    }

    metrics.connection_closed();
}

async fn handle_request(
    gateway: &Gateway,
    req: Request<Incoming>,
    peer: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!(peer = %peer, error = %e, "failed to read request body");
            return Ok(into_hyper(GatewayResponse::text(400, "failed to read request body")));
        }
    };

    let request = GatewayRequest {
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts
            .headers
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect(),
        body,
        source_ip: Some(peer.ip().to_string()),
    };

    Ok(into_hyper(gateway.handle(request).await))
}

fn into_hyper(response: GatewayResponse) -> Response<Full<Bytes>> {
    let mut out = Response::new(Full::new(response.body));
    *out.status_mut() =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    for (name, value) in &response.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                out.headers_mut().append(name, value);
            }
            _ => tracing::warn!(header = %name, "dropping invalid response header"),
        }
    }
    out
}
