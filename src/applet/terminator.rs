//! Terminate capability for a launched applet

use std::sync::{Arc, Weak};
use tracing::info;

use super::{lock, AppletError, AppletInstance, AppletState, InstanceMap, PortAllocator};

/// Cloneable handle that can end an applet instance from anywhere.
///
/// Terminating is idempotent: the first call rejects the pending result with
/// [`AppletError::Terminated`] (unless something already settled it) and
/// tears the instance down; later calls do nothing.
#[derive(Clone)]
pub struct Terminator {
    instance: Arc<AppletInstance>,
    ports: Arc<PortAllocator>,
    instances: Weak<InstanceMap>,
}

impl Terminator {
    pub(crate) fn new(
        instance: Arc<AppletInstance>,
        ports: Arc<PortAllocator>,
        instances: Weak<InstanceMap>,
    ) -> Self {
        Self {
            instance,
            ports,
            instances,
        }
    }

    pub fn id(&self) -> &str {
        &self.instance.id
    }

    pub fn state(&self) -> AppletState {
        self.instance.state()
    }

    /// Returns true when this call settled the result. Resolves once the
    /// instance is torn down.
    pub async fn terminate(&self) -> bool {
        let settled = self.instance.settle(
            Err(AppletError::Terminated {
                id: self.instance.id.clone(),
            }),
            AppletState::Terminated,
        );
        if settled {
            info!(applet = %self.instance.id, "Applet terminated");
        }
        self.teardown().await;
        settled
    }

    /// Deadline reached
    pub(crate) async fn expire(&self) {
        let settled = self.instance.settle(
            Err(AppletError::Timeout {
                id: self.instance.id.clone(),
                deadline: self.instance.deadline,
            }),
            AppletState::TimedOut,
        );
        if settled {
            info!(applet = %self.instance.id, deadline = %self.instance.deadline, "Applet timed out");
        }
        self.teardown().await;
    }

    /// Free resources after the outcome has been consumed
    pub(crate) async fn release(&self) {
        self.teardown().await;
    }

    /// The first caller starts the teardown; every caller waits for it.
    ///
    /// The work runs on its own task so a caller that is dropped mid-way
    /// (an aborted program) still leaves the port free.
    async fn teardown(&self) {
        if self.instance.claim_teardown() {
            let instance = Arc::clone(&self.instance);
            let ports = Arc::clone(&self.ports);
            let instances = self.instances.clone();
            tokio::spawn(async move {
                instance.timer.cancel();
                if let Some(server) = instance.take_server() {
                    server.stop().await;
                }
                ports.release(instance.port);
                if let Some(instances) = instances.upgrade() {
                    lock(&instances).remove(&instance.id);
                }
                info!(applet = %instance.id, port = instance.port, "Applet torn down");
                instance.released.cancel();
            });
        }
        self.instance.released.cancelled().await;
    }
}

impl std::fmt::Debug for Terminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminator")
            .field("id", &self.instance.id)
            .field("state", &self.instance.state())
            .finish()
    }
}
