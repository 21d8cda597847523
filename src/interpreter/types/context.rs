//! Execution context: the state threaded through every interpreter step

use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use super::control::ContextStatus;
use super::results::ActionLog;
use super::values::Value;
use crate::applet::AppletLauncher;
use crate::store::{MemoryStore, Store};

/* ===================== Scope Chain ===================== */

/// Linked chain of lexical scopes, innermost first.
///
/// Parents are shared behind `Arc`, so pushing a scope never copies the
/// outer bindings and never lets a child's bindings reach its parent.
#[derive(Debug, Clone, Default)]
pub struct ScopeChain {
    current: HashMap<String, Value>,
    parent: Option<Arc<ScopeChain>>,
}

impl ScopeChain {
    pub fn new(bindings: HashMap<String, Value>) -> Self {
        Self {
            current: bindings,
            parent: None,
        }
    }

    /// New innermost scope whose parent is `self`
    pub fn push(&self, bindings: HashMap<String, Value>) -> ScopeChain {
        ScopeChain {
            current: bindings,
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Drop the innermost scope. The root pops to an empty root.
    pub fn pop(&self) -> ScopeChain {
        self.parent
            .as_deref()
            .cloned()
            .unwrap_or_default()
    }

    /// Walk innermost to outermost
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        let mut scope = Some(self);
        while let Some(s) = scope {
            if let Some(value) = s.current.get(name) {
                return Some(value);
            }
            scope = s.parent.as_deref();
        }
        None
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.current.insert(name.into(), value);
    }

    pub fn parent(&self) -> Option<&ScopeChain> {
        self.parent.as_deref()
    }

    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut scope = self.parent.as_deref();
        while let Some(s) = scope {
            depth += 1;
            scope = s.parent.as_deref();
        }
        depth
    }
}

/* ===================== Status Monitor ===================== */

/// Shared, observable status cell.
///
/// Every copy of a context shares one monitor, so a caller holding a
/// subscription sees `WaitingHumanValidation` while a handler is suspended.
#[derive(Clone)]
pub struct StatusMonitor {
    tx: Arc<watch::Sender<ContextStatus>>,
}

impl StatusMonitor {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ContextStatus::Running);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, status: ContextStatus) {
        self.tx.send_replace(status);
    }

    pub fn get(&self) -> ContextStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ContextStatus> {
        self.tx.subscribe()
    }
}

impl Default for StatusMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StatusMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StatusMonitor").field(&self.get()).finish()
    }
}

/* ===================== Context ===================== */

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserInfo {
    pub id: String,
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextMeta {
    /// Append-only
    pub history: Vec<ActionLog>,
}

/// Interpreter state. Each step produces a new context; the previous one is
/// never mutated.
#[derive(Clone)]
pub struct ExecutionContext {
    pub env: BTreeMap<String, String>,
    /// The durable variable space (`output=` targets land here)
    pub data: IndexMap<String, Value>,
    pub scope: ScopeChain,
    pub user: UserInfo,
    pub store: Arc<dyn Store>,
    pub user_logs: Vec<String>,
    pub status: ContextStatus,
    pub applet_launcher: Option<Arc<AppletLauncher>>,
    pub meta: ContextMeta,
    monitor: StatusMonitor,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            env: BTreeMap::new(),
            data: IndexMap::new(),
            scope: ScopeChain::default(),
            user: UserInfo::default(),
            store: Arc::new(MemoryStore::new()),
            user_logs: Vec::new(),
            status: ContextStatus::Running,
            applet_launcher: None,
            meta: ContextMeta::default(),
            monitor: StatusMonitor::new(),
        }
    }

    pub fn with_data(mut self, data: IndexMap<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_user(mut self, user: UserInfo) -> Self {
        self.user = user;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = store;
        self
    }

    pub fn with_scope(mut self, scope: ScopeChain) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_applet_launcher(mut self, launcher: Arc<AppletLauncher>) -> Self {
        self.applet_launcher = Some(launcher);
        self
    }

    /// Identifier resolution: scope chain first, then durable data.
    pub fn lookup(&self, name: &str) -> Value {
        self.scope
            .lookup(name)
            .or_else(|| self.data.get(name))
            .cloned()
            .unwrap_or_default()
    }

    pub fn history(&self) -> &[ActionLog] {
        &self.meta.history
    }

    pub fn monitor(&self) -> &StatusMonitor {
        &self.monitor
    }

    /// Update both this snapshot and the shared monitor
    pub fn set_status(&mut self, status: ContextStatus) {
        self.status = status;
        self.monitor.set(status);
    }

    pub(crate) fn record(&mut self, log: ActionLog) {
        self.meta.history.push(log);
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("env", &self.env)
            .field("data", &self.data)
            .field("scope", &self.scope)
            .field("user", &self.user)
            .field("user_logs", &self.user_logs)
            .field("status", &self.status)
            .field("has_applet_launcher", &self.applet_launcher.is_some())
            .field("history", &self.meta.history.len())
            .finish()
    }
}
