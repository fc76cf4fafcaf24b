use predbench_server::fault::FaultPolicy;
use predbench_server::{Counters, Server, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// An in-process prediction server on an ephemeral loopback port.
/// Stops when dropped.
pub struct LocalServer {
    pub addr: SocketAddr,
    counters: Arc<Counters>,
    handle: JoinHandle<()>,
}

impl Drop for LocalServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl LocalServer {
    /// Start a server applying `policy` and wait until it accepts connections.
    ///
    /// Returns `Err` if the policy is invalid, the server cannot bind, or the
    /// readiness deadline elapses.
    pub async fn spawn(policy: FaultPolicy) -> Result<Self, String> {
        policy.validate()?;

        let server = Server::new(ServerConfig {
            address: SocketAddr::from(([127, 0, 0, 1], 0)),
            policy,
        });
        let counters = server.counters();

        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            if let Err(e) = server.run(ready_tx).await {
                tracing::error!("local prediction server stopped: {e}");
            }
        });

        let addr = match timeout(READY_TIMEOUT, ready_rx).await {
            Ok(Ok(addr)) => addr,
            Ok(Err(_)) => {
                handle.abort();
                return Err("Local server exited before binding".to_string());
            }
            Err(_) => {
                handle.abort();
                return Err(format!("Local server not ready within {READY_TIMEOUT:?}"));
            }
        };

        Ok(LocalServer { addr, counters, handle })
    }

    /// Calls the server answered (200 or 204) so far.
    pub fn answered(&self) -> u64 {
        self.counters.answered()
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }
}
