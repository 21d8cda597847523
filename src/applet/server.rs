//! Applet HTTP surface
//!
//! A [`ServerFactory`] starts one server per applet instance. The server only
//! talks to the instance through its [`ResponseSink`], so alternative
//! factories (tests, other transports) share the exact validation and
//! settle rules of the axum one.

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{lookup_host, TcpListener, TcpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::kinds::BUILTIN_KINDS;
use super::{AppletInstance, AppletState, CompiledSchema};

const LISTEN_BACKLOG: u32 = 128;

/* ===================== Factory Contract ===================== */

/// Everything a server needs to serve one instance
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub sink: ResponseSink,
}

#[async_trait]
pub trait ServerFactory: Send + Sync {
    fn supports(&self, kind: &str) -> bool;

    async fn create_server(&self, config: ServerConfig) -> anyhow::Result<Box<dyn ServerHandle>>;
}

/// Running server
#[async_trait]
pub trait ServerHandle: Send + Sync {
    fn address(&self) -> SocketAddr;

    /// Stop serving. Resolves once the listening socket is closed, so the
    /// port can be handed out again.
    async fn stop(self: Box<Self>);
}

/* ===================== Response Sink ===================== */

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RespondError {
    #[error("response rejected: {0}")]
    Invalid(String),

    #[error("applet instance already settled")]
    AlreadySettled,
}

/// Write side of an applet instance as seen by its server
#[derive(Clone)]
pub struct ResponseSink {
    instance: Arc<AppletInstance>,
    input: Arc<JsonValue>,
    output_schema: Option<Arc<CompiledSchema>>,
}

impl ResponseSink {
    pub(crate) fn new(
        instance: Arc<AppletInstance>,
        input: JsonValue,
        output_schema: Option<CompiledSchema>,
    ) -> Self {
        Self {
            instance,
            input: Arc::new(input),
            output_schema: output_schema.map(Arc::new),
        }
    }

    pub fn id(&self) -> &str {
        &self.instance.id
    }

    pub fn kind(&self) -> &str {
        &self.instance.kind
    }

    pub fn input(&self) -> &JsonValue {
        &self.input
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.instance.deadline
    }

    pub fn state(&self) -> AppletState {
        self.instance.state()
    }

    /// Validate a human response and settle the instance with it
    pub fn respond(&self, response: JsonValue) -> Result<(), RespondError> {
        if self.instance.is_settled() {
            return Err(RespondError::AlreadySettled);
        }
        if let Some(schema) = &self.output_schema {
            schema
                .validate(&response)
                .map_err(|e| RespondError::Invalid(e.to_string()))?;
        }
        if self.instance.settle(Ok(response), AppletState::Resolved) {
            Ok(())
        } else {
            Err(RespondError::AlreadySettled)
        }
    }
}

/* ===================== Axum Server ===================== */

/// Production factory: one axum server per instance, shut down through a
/// cancellation token.
#[derive(Debug, Clone)]
pub struct AxumServerFactory {
    kinds: Vec<String>,
}

impl AxumServerFactory {
    pub fn new() -> Self {
        Self {
            kinds: BUILTIN_KINDS.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Serve an additional kind with the generic routes
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kinds.push(kind.into());
        self
    }
}

impl Default for AxumServerFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerFactory for AxumServerFactory {
    fn supports(&self, kind: &str) -> bool {
        self.kinds.iter().any(|k| k == kind)
    }

    async fn create_server(&self, config: ServerConfig) -> anyhow::Result<Box<dyn ServerHandle>> {
        let listener = bind_listener(&config.host, config.port).await?;
        let address = listener.local_addr()?;
        let applet = config.sink.id().to_string();
        let router = create_router(config.sink);

        let cancellation_token = CancellationToken::new();
        let task = tokio::spawn({
            let shutdown = cancellation_token.child_token();
            async move {
                let served = axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown.cancelled().await;
                    })
                    .await;
                if let Err(e) = served {
                    warn!(applet = %applet, error = %e, "Applet server failed");
                }
            }
        });

        debug!(%address, "Applet server listening");
        Ok(Box::new(AxumServerHandle {
            address,
            cancellation_token,
            task,
        }))
    }
}

/// Listener with `SO_REUSEADDR`, so a port whose previous server left
/// connections in TIME_WAIT can be bound again right away.
async fn bind_listener(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    let addr = lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve {}:{}", host, port))?
        .next()
        .ok_or_else(|| anyhow::anyhow!("no address for {}:{}", host, port))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket
        .bind(addr)
        .with_context(|| format!("failed to bind {}", addr))?;
    Ok(socket.listen(LISTEN_BACKLOG)?)
}

struct AxumServerHandle {
    address: SocketAddr,
    cancellation_token: CancellationToken,
    task: JoinHandle<()>,
}

#[async_trait]
impl ServerHandle for AxumServerHandle {
    fn address(&self) -> SocketAddr {
        self.address
    }

    async fn stop(self: Box<Self>) {
        self.cancellation_token.cancel();
        // The serve task owns the listener; it is closed once the task ends.
        if let Err(e) = self.task.await {
            warn!(address = %self.address, error = %e, "Applet server task failed");
        }
    }
}

/* ===================== Routes ===================== */

#[derive(Serialize)]
struct LivenessResponse<'a> {
    status: &'static str,
    applet: &'a str,
    id: &'a str,
}

#[derive(Serialize)]
struct InputResponse<'a> {
    id: &'a str,
    applet: &'a str,
    deadline: DateTime<Utc>,
    input: &'a JsonValue,
}

#[derive(Serialize)]
struct RespondResponse {
    ok: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
}

/// `GET /` liveness, `GET /input` payload, `POST /respond` human answer
pub fn create_router(sink: ResponseSink) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/input", get(input))
        .route("/respond", post(respond))
        .with_state(sink)
}

async fn liveness(State(sink): State<ResponseSink>) -> impl IntoResponse {
    Json(LivenessResponse {
        status: "ok",
        applet: sink.kind(),
        id: sink.id(),
    })
    .into_response()
}

async fn input(State(sink): State<ResponseSink>) -> impl IntoResponse {
    Json(InputResponse {
        id: sink.id(),
        applet: sink.kind(),
        deadline: sink.deadline(),
        input: sink.input(),
    })
    .into_response()
}

async fn respond(
    State(sink): State<ResponseSink>,
    body: Bytes,
) -> Result<Json<RespondResponse>, (StatusCode, Json<ErrorResponse>)> {
    let response: JsonValue = serde_json::from_slice(&body)
        .map_err(|e| reject(StatusCode::BAD_REQUEST, format!("malformed JSON: {}", e)))?;

    sink.respond(response).map_err(|e| {
        let status = match e {
            RespondError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RespondError::AlreadySettled => StatusCode::CONFLICT,
        };
        reject(status, e.to_string())
    })?;

    debug!(applet = %sink.id(), "Applet response accepted");
    Ok(Json(RespondResponse { ok: true }))
}

fn reject(status: StatusCode, error: String) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { ok: false, error }))
}
