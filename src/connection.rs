//! Allocation and teardown of the single physical device session.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::milight::{LightController, MilightError, Session, SessionConfig};

mod keeper;
pub use keeper::{ConnectionKeeper, KeeperConfig};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("can't allocate connection: {0}")]
    Connect(#[from] MilightError),
}

/// Allocation state as observed by the keeper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub allocated: bool,
    pub exists: bool,
}

/// Mediated, exclusive-but-reusable access to the device session
///
/// Implemented by [ConnectionManager]; the keeper and the dispatcher are
/// tested against fakes implementing this trait.
#[async_trait]
pub trait ManageConnection: Send + Sync {
    /// Mark the session allocated, performing the handshake if none exists
    async fn allocate(&self) -> Result<Arc<dyn LightController>, ConnectionError>;
    /// Mark the session unallocated; never closes the socket
    async fn release(&self);
    /// Observe the allocation state
    async fn status(&self) -> ConnectionStatus;
    /// Close and discard the session; idempotent. The next allocation
    /// performs a fresh handshake.
    async fn terminate(&self);
    /// Final teardown on daemon close: stop any background upkeep, then
    /// discard the session
    async fn shutdown(&self) {
        self.terminate().await;
    }
}

/// Owns the lazily-created [Session] behind a single mutex region
pub struct ConnectionManager {
    host: String,
    port: u16,
    config: SessionConfig,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    session: Option<Arc<Session>>,
    allocated: bool,
}

impl ConnectionManager {
    pub fn new(host: impl Into<String>, port: u16, config: SessionConfig) -> Self {
        Self {
            host: host.into(),
            port,
            config,
            state: Mutex::new(State::default()),
        }
    }
}

#[async_trait]
impl ManageConnection for ConnectionManager {
    async fn allocate(&self) -> Result<Arc<dyn LightController>, ConnectionError> {
        let mut state = self.state.lock().await;

        if let Some(session) = state.session.clone() {
            state.allocated = true;
            return Ok(session);
        }

        let session = Arc::new(Session::connect(&self.host, self.port, &self.config).await?);
        info!(host = %self.host, port = %self.port, "milight connected");

        state.session = Some(session.clone());
        state.allocated = true;

        Ok(session)
    }

    async fn release(&self) {
        self.state.lock().await.allocated = false;
    }

    async fn status(&self) -> ConnectionStatus {
        let state = self.state.lock().await;

        ConnectionStatus {
            allocated: state.allocated,
            exists: state.session.is_some(),
        }
    }

    async fn terminate(&self) {
        let mut state = self.state.lock().await;

        if let Some(session) = state.session.take() {
            session.close().await;
            info!("milight connection terminated");
        }

        state.allocated = false;
    }
}
