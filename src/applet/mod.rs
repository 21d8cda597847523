//! # Applet Launcher
//!
//! Human checkpoints. A launch allocates a port, starts a short-lived HTTP
//! server for one applet instance and hands back an [`AppletSession`] whose
//! result settles exactly once, on whichever comes first:
//!
//! - a valid human response (`POST /respond`)
//! - the instance deadline
//! - an explicit [`Terminator::terminate`] / [`AppletLauncher::terminate`]
//!
//! Every settle path ends in the same teardown: timer cancelled, server
//! stopped, port released, instance forgotten. Teardown runs once.

pub mod kinds;
pub mod ports;
pub mod schema;
pub mod server;
mod terminator;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AppletConfig;

pub use ports::PortAllocator;
pub use schema::CompiledSchema;
pub use server::{
    AxumServerFactory, RespondError, ResponseSink, ServerConfig, ServerFactory, ServerHandle,
};
pub use terminator::Terminator;

/* ===================== Errors ===================== */

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AppletError {
    #[error("applet instance '{id}' not found")]
    NotFound { id: String },

    #[error("applet instance '{id}' timed out (deadline {deadline})")]
    Timeout { id: String, deadline: DateTime<Utc> },

    #[error("applet instance '{id}' was terminated")]
    Terminated { id: String },

    #[error("applet validation failed: {message}")]
    Validation { message: String },

    #[error("no free port in {start}..={end}")]
    PortsExhausted { start: u16, end: u16 },

    #[error("unknown applet kind '{kind}'")]
    UnknownKind { kind: String },

    #[error("applet server error: {message}")]
    Server { message: String },
}

pub type AppletOutcome = Result<JsonValue, AppletError>;

/* ===================== Requests and State ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppletState {
    /// Port reserved, server not yet listening
    Allocated,
    /// Listening and waiting for a human
    Serving,
    Resolved,
    TimedOut,
    Terminated,
}

impl AppletState {
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            AppletState::Resolved | AppletState::TimedOut | AppletState::Terminated
        )
    }
}

/// What to show the human and what shape the answer must have
#[derive(Debug, Clone, PartialEq)]
pub struct AppletRequest {
    pub kind: String,
    pub input: JsonValue,
    pub input_schema: Option<JsonValue>,
    pub output_schema: Option<JsonValue>,
    /// Overrides the launcher's default deadline
    pub timeout: Option<Duration>,
}

impl AppletRequest {
    pub fn new(kind: impl Into<String>, input: JsonValue) -> Self {
        Self {
            kind: kind.into(),
            input,
            input_schema: None,
            output_schema: None,
            timeout: None,
        }
    }

    pub fn with_input_schema(mut self, schema: JsonValue) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_output_schema(mut self, schema: JsonValue) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/* ===================== Instance ===================== */

/// Shared state of one live applet. The server's handlers, the timer task
/// and the terminator all point at the same instance.
pub(crate) struct AppletInstance {
    pub(crate) id: String,
    pub(crate) kind: String,
    pub(crate) port: u16,
    pub(crate) deadline: DateTime<Utc>,
    state: watch::Sender<AppletState>,
    outcome: Mutex<Option<oneshot::Sender<AppletOutcome>>>,
    server: Mutex<Option<Box<dyn ServerHandle>>>,
    timer: CancellationToken,
    torn_down: AtomicBool,
    /// Cancelled once the server is stopped and the port is free
    released: CancellationToken,
}

impl AppletInstance {
    fn new(
        id: String,
        kind: String,
        port: u16,
        deadline: DateTime<Utc>,
        state: watch::Sender<AppletState>,
        outcome: oneshot::Sender<AppletOutcome>,
    ) -> Self {
        Self {
            id,
            kind,
            port,
            deadline,
            state,
            outcome: Mutex::new(Some(outcome)),
            server: Mutex::new(None),
            timer: CancellationToken::new(),
            torn_down: AtomicBool::new(false),
            released: CancellationToken::new(),
        }
    }

    /// Resolve or reject the pending result. Only the first caller wins;
    /// returns false for every later one.
    pub(crate) fn settle(&self, outcome: AppletOutcome, state: AppletState) -> bool {
        let Some(sender) = lock(&self.outcome).take() else {
            return false;
        };
        self.state.send_replace(state);
        // The session may already be gone; the settle still counts.
        let _ = sender.send(outcome);
        debug!(applet = %self.id, state = ?state, "Applet settled");
        true
    }

    pub(crate) fn state(&self) -> AppletState {
        *self.state.borrow()
    }

    pub(crate) fn is_settled(&self) -> bool {
        lock(&self.outcome).is_none()
    }

    fn attach_server(&self, server: Box<dyn ServerHandle>) {
        *lock(&self.server) = Some(server);
        self.state.send_if_modified(|state| {
            if *state == AppletState::Allocated {
                *state = AppletState::Serving;
                true
            } else {
                false
            }
        });
    }

    /// True only for the first call
    pub(crate) fn claim_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn take_server(&self) -> Option<Box<dyn ServerHandle>> {
        lock(&self.server).take()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) type InstanceMap = Mutex<HashMap<String, Terminator>>;

/* ===================== Session ===================== */

/// Caller's handle on a launched applet
pub struct AppletSession {
    id: String,
    kind: String,
    address: SocketAddr,
    deadline: DateTime<Utc>,
    state: watch::Receiver<AppletState>,
    outcome: oneshot::Receiver<AppletOutcome>,
    terminator: Terminator,
}

impl AppletSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.address)
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn state(&self) -> AppletState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions
    pub fn watch_state(&self) -> watch::Receiver<AppletState> {
        self.state.clone()
    }

    /// Terminate capability that outlives the session
    pub fn terminator(&self) -> Terminator {
        self.terminator.clone()
    }

    /// Await the settled outcome, then release the instance's resources.
    pub async fn wait(self) -> AppletOutcome {
        let outcome = match self.outcome.await {
            Ok(outcome) => outcome,
            Err(_) => Err(AppletError::Terminated { id: self.id.clone() }),
        };
        self.terminator.release().await;
        outcome
    }
}

impl std::fmt::Debug for AppletSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppletSession")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("address", &self.address)
            .field("deadline", &self.deadline)
            .field("state", &self.state())
            .finish()
    }
}

/* ===================== Launcher ===================== */

pub struct AppletLauncher {
    factory: Arc<dyn ServerFactory>,
    ports: Arc<PortAllocator>,
    instances: Arc<InstanceMap>,
    host: String,
    default_timeout: Duration,
}

impl AppletLauncher {
    pub fn new(factory: Arc<dyn ServerFactory>, ports: Arc<PortAllocator>) -> Self {
        Self {
            factory,
            ports,
            instances: Arc::new(Mutex::new(HashMap::new())),
            host: AppletConfig::default().host,
            default_timeout: AppletConfig::default().timeout(),
        }
    }

    /// Launcher backed by the axum server factory
    pub fn from_config(config: &AppletConfig) -> Self {
        let ports = Arc::new(PortAllocator::new(config.port_start..=config.port_end));
        Self::new(Arc::new(AxumServerFactory::new()), ports)
            .with_host(config.host.clone())
            .with_default_timeout(config.timeout())
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// Validate the request, start a server on a free port and arm the
    /// deadline.
    pub async fn launch(&self, request: AppletRequest) -> Result<AppletSession, AppletError> {
        if !self.factory.supports(&request.kind) {
            return Err(AppletError::UnknownKind { kind: request.kind });
        }
        if let Some(schema) = &request.input_schema {
            CompiledSchema::compile(schema)?.validate(&request.input)?;
        }
        let output_schema = request
            .output_schema
            .as_ref()
            .map(CompiledSchema::compile)
            .transpose()?;

        // The reported deadline and the timer are taken from the same instant
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let out_of_range = || AppletError::Validation {
            message: format!("timeout {:?} is out of range", timeout),
        };
        let expires_at = Instant::now().checked_add(timeout).ok_or_else(out_of_range)?;
        let deadline = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta))
            .ok_or_else(out_of_range)?;

        let port = self.ports.allocate()?;
        let id = Uuid::new_v4().to_string();
        let (state_tx, state_rx) = watch::channel(AppletState::Allocated);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let instance = Arc::new(AppletInstance::new(
            id.clone(),
            request.kind.clone(),
            port,
            deadline,
            state_tx,
            outcome_tx,
        ));

        let config = ServerConfig {
            host: self.host.clone(),
            port,
            sink: ResponseSink::new(Arc::clone(&instance), request.input, output_schema),
        };
        let server = match self.factory.create_server(config).await {
            Ok(server) => server,
            Err(e) => {
                self.ports.release(port);
                return Err(AppletError::Server {
                    message: format!("{:#}", e),
                });
            }
        };
        let address = server.address();
        instance.attach_server(server);

        let terminator = Terminator::new(
            Arc::clone(&instance),
            Arc::clone(&self.ports),
            Arc::downgrade(&self.instances),
        );
        lock(&self.instances).insert(id.clone(), terminator.clone());
        spawn_deadline(terminator.clone(), instance.timer.clone(), expires_at);

        info!(applet = %id, kind = %request.kind, %address, %deadline, "Applet launched");

        Ok(AppletSession {
            id,
            kind: request.kind,
            address,
            deadline,
            state: state_rx,
            outcome: outcome_rx,
            terminator,
        })
    }

    /// Terminate a live instance by id and wait for its teardown
    pub async fn terminate(&self, id: &str) -> Result<(), AppletError> {
        let terminator = lock(&self.instances)
            .get(id)
            .cloned()
            .ok_or_else(|| AppletError::NotFound { id: id.to_string() })?;
        terminator.terminate().await;
        Ok(())
    }

    pub async fn terminate_all(&self) {
        let terminators: Vec<Terminator> = lock(&self.instances).values().cloned().collect();
        for terminator in terminators {
            terminator.terminate().await;
        }
    }

    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.instances).keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for AppletLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppletLauncher")
            .field("host", &self.host)
            .field("default_timeout", &self.default_timeout)
            .field("ports", &self.ports)
            .field("active", &self.active_ids())
            .finish()
    }
}

fn spawn_deadline(terminator: Terminator, timer: CancellationToken, expires_at: Instant) {
    tokio::spawn(async move {
        tokio::select! {
            _ = timer.cancelled() => {}
            _ = tokio::time::sleep_until(expires_at) => terminator.expire().await,
        }
    });
}
