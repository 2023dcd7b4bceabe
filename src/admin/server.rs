//! Admin HTTP server.
//!
//! Serves metrics and status, and toggles latency injection at runtime.

use crate::speedbump::Speedbump;
use crate::util::ShutdownListener;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus_client::encoding::text::encode;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Snapshot returned by `GET /status`.
#[derive(Debug, Serialize)]
struct Status {
    enabled: bool,
    destination: String,
    listen: Option<String>,
    active_connections: usize,
}

/// Admin HTTP server bound to one speedbump instance.
pub struct AdminServer {
    listener: TcpListener,
    speedbump: Arc<Speedbump>,
}

impl AdminServer {
    /// Bind the admin listener.
    pub async fn bind(address: SocketAddr, speedbump: Arc<Speedbump>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self {
            listener,
            speedbump,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve requests until shutdown.
    pub async fn run(self, mut shutdown: ShutdownListener) {
        match self.listener.local_addr() {
            Ok(address) => info!(address = %address, "admin server started"),
            Err(e) => error!(error = %e, "admin server has no local address"),
        }

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let speedbump = Arc::clone(&self.speedbump);

                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let speedbump = Arc::clone(&speedbump);
                                    async move { handle_request(req, &speedbump).await }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(error = %e, "admin connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept admin connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("admin server shutting down");
                    break;
                }
            }
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    speedbump: &Speedbump,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path();
    let method = req.method();

    debug!(path = %path, method = %method, "admin request");

    Ok(route(method, path, speedbump))
}

fn route(method: &Method, path: &str, speedbump: &Speedbump) -> Response<Full<Bytes>> {
    let expected = match path {
        "/" | "/metrics" | "/status" | "/health" | "/healthz" => Method::GET,
        "/enable" | "/disable" => Method::POST,
        _ => return text(StatusCode::NOT_FOUND, "Not found\n"),
    };
    if *method != expected {
        return text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed\n");
    }

    match path {
        "/metrics" => metrics(speedbump),
        "/status" => status(speedbump),
        "/enable" => {
            speedbump.enable();
            text(StatusCode::OK, "enabled\n")
        }
        "/disable" => {
            speedbump.disable();
            text(StatusCode::OK, "disabled\n")
        }
        "/health" | "/healthz" => text(StatusCode::OK, "OK\n"),
        _ => text(
            StatusCode::OK,
            "speedbump admin server\n\nEndpoints:\n  GET  /metrics - Prometheus metrics\n  GET  /status  - Proxy status\n  POST /enable  - Enable latency injection\n  POST /disable - Disable latency injection\n  GET  /health  - Health check\n",
        ),
    }
}

fn metrics(speedbump: &Speedbump) -> Response<Full<Bytes>> {
    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, speedbump.metrics().registry()) {
        error!(error = %e, "failed to encode metrics");
        return text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics\n");
    }
    respond(StatusCode::OK, METRICS_CONTENT_TYPE, buffer)
}

fn status(speedbump: &Speedbump) -> Response<Full<Bytes>> {
    let status = Status {
        enabled: speedbump.is_enabled(),
        destination: speedbump.destination().to_string(),
        listen: speedbump.local_addr().map(|addr| addr.to_string()),
        active_connections: speedbump.active_connections(),
    };

    match serde_yaml::to_string(&status) {
        Ok(body) => respond(StatusCode::OK, "application/yaml", body),
        Err(e) => {
            error!(error = %e, "failed to encode status");
            text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode status\n")
        }
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    respond(status, "text/plain", body)
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
