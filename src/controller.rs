//! Public control surface of the daemon: light commands and sequence
//! management.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::connection::{ConnectionKeeper, ConnectionManager, KeeperConfig, ManageConnection};
use crate::milight::SessionConfig;
use crate::models::{Light, SeqState, Sequence, SequenceState};
use crate::sequencer::Sequencer;
use crate::store::{SequenceStore, StoreError};

mod command;
pub use command::{Command, UnsupportedColor};

mod dispatch;
use dispatch::Worker;
pub use dispatch::{Dispatcher, DispatcherConfig};

/// Light-control entry point shared by direct callers and the sequencer
pub trait LightApi: Send + Sync {
    /// Enqueue a command for every present field of the state; true only if
    /// all of them were accepted
    fn apply(&self, light: &Light) -> bool;
}

/// Timings and limits for the whole controller stack
#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    pub dispatcher: DispatcherConfig,
    pub keeper: KeeperConfig,
    pub session: SessionConfig,
}

/// Drives the device through the bounded command queue and owns the
/// sequencer and the sequence store.
pub struct Controller {
    dispatcher: Dispatcher,
    sequencer: Sequencer<Dispatcher>,
    store: SequenceStore,
    connections: Arc<dyn ManageConnection>,
    worker: Mutex<Option<Worker>>,
}

impl Controller {
    /// Build the production stack: session manager, idle keeper, dispatcher
    /// and sequencer
    pub fn new(
        host: &str,
        port: u16,
        store_dir: &Path,
        config: &ControllerConfig,
    ) -> Result<Self, StoreError> {
        let store = SequenceStore::new(store_dir)?;
        let connman = Arc::new(ConnectionManager::new(host, port, config.session.clone()));
        let keeper = Arc::new(ConnectionKeeper::new(connman, config.keeper.clone()));

        Ok(Self::with_connections(keeper, store, config))
    }

    /// Build a controller on top of an arbitrary connection manager, letting
    /// tests substitute a fake device
    pub fn with_connections(
        connections: Arc<dyn ManageConnection>,
        store: SequenceStore,
        config: &ControllerConfig,
    ) -> Self {
        let (dispatcher, worker) = Dispatcher::new(connections.clone(), &config.dispatcher);
        let sequencer = Sequencer::new(dispatcher.clone());

        Self {
            dispatcher,
            sequencer,
            store,
            connections,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Process a light state
    ///
    /// Direct commands (`from_sequence == false`) always preempt a running
    /// sequence before anything is enqueued.
    pub async fn process(&self, from_sequence: bool, light: &Light) -> bool {
        if !from_sequence {
            self.sequencer.stop().await;
        }

        self.dispatcher.apply(light)
    }

    pub async fn get_sequences(&self) -> Result<Vec<Sequence>, StoreError> {
        self.store.get_all().await
    }

    pub async fn get_sequence(&self, name: &str) -> Result<Sequence, StoreError> {
        self.store.get(name).await
    }

    pub async fn add_sequence(&self, seq: &Sequence) -> Result<(), StoreError> {
        self.store.add(seq).await
    }

    pub async fn delete_sequence(&self, name: &str) -> Result<(), StoreError> {
        self.store.remove(name).await
    }

    pub async fn get_sequence_state(&self) -> SequenceState {
        match self.sequencer.status().await {
            Some(seq) => SequenceState {
                name: seq.name.clone(),
                state: SeqState::Running,
            },
            None => SequenceState {
                name: String::new(),
                state: SeqState::Stopped,
            },
        }
    }

    /// Start or stop sequence playback, returning the resulting state
    pub async fn set_sequence_state(
        &self,
        state: SequenceState,
    ) -> Result<SequenceState, StoreError> {
        match state.state {
            SeqState::Running => {
                let seq = self.store.get(&state.name).await?;
                self.sequencer.start(seq).await;
            }
            SeqState::Stopped => self.sequencer.stop().await,
        }

        Ok(self.get_sequence_state().await)
    }

    /// Shut down sequencer, worker and device connection, in that order
    ///
    /// Blocks until every loop has exited. Idempotent.
    pub async fn close(&self) {
        self.sequencer.stop().await;

        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            worker.stop().await;
        }

        self.connections.shutdown().await;
    }
}
