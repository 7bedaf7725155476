//! Bounded command queue and the single worker draining it.

use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::{Command, LightApi};
use crate::connection::{ConnectionError, ManageConnection};
use crate::milight::MilightError;
use crate::models::Light;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Commands queued at most; new ones are dropped once full
    pub queue_depth: usize,
    /// Pause after a failed allocation or an invalidated session
    pub retry_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_depth: 3,
            retry_delay: Duration::from_secs(3),
        }
    }
}

/// Producer half of the command queue
///
/// Cloned by everything that issues light commands (HTTP layer, sequencer).
#[derive(Clone)]
pub struct Dispatcher {
    cmd_tx: mpsc::Sender<Command>,
}

/// Handle to the worker task, used for synchronous shutdown
pub(super) struct Worker {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Worker {
    pub(super) async fn stop(self) {
        self.shutdown_tx.send(()).ok();
        self.task.await.ok();
    }
}

impl Dispatcher {
    pub(super) fn new(
        connections: Arc<dyn ManageConnection>,
        config: &DispatcherConfig,
    ) -> (Self, Worker) {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.queue_depth);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(cmd_rx, shutdown_rx, connections, config.retry_delay));

        (Self { cmd_tx }, Worker { shutdown_tx, task })
    }

    /// Enqueue without blocking; a full queue drops the command
    pub fn send(&self, cmd: Command) -> bool {
        self.cmd_tx.try_send(cmd).is_ok()
    }
}

impl LightApi for Dispatcher {
    fn apply(&self, light: &Light) -> bool {
        let mut res = true;

        if let Some(switch) = &light.switch {
            info!(switch = %switch, "light switch");

            if !self.send(Command::switch(switch)) {
                warn!(switch = %switch, "light switch command dropped");
                res = false;
            }
        }

        if let Some(brightness) = light.brightness {
            info!(brightness = %brightness, "light brightness");

            if !self.send(Command::brightness(brightness)) {
                warn!(brightness = %brightness, "light brightness command dropped");
                res = false;
            }
        }

        if let Some(color) = &light.color {
            info!(color = %color, "light color");

            match Command::color(color) {
                Ok(cmd) => {
                    if !self.send(cmd) {
                        warn!(color = %color, "light color command dropped");
                        res = false;
                    }
                }
                Err(error) => {
                    warn!(error = %error, "invalid light color");
                    res = false;
                }
            }
        }

        res
    }
}

enum CommandError {
    Allocate(ConnectionError),
    Exec(MilightError),
}

async fn run(
    mut cmd_rx: mpsc::Receiver<Command>,
    mut shutdown_rx: oneshot::Receiver<()>,
    connections: Arc<dyn ManageConnection>,
    retry_delay: Duration,
) {
    info!("milight controller loop started");

    loop {
        let cmd = select! {
            _ = &mut shutdown_rx => break,
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
        };

        match process_command(&*connections, cmd).await {
            Ok(()) => {}
            Err(CommandError::Allocate(error)) => {
                // Command is dropped; liveness over durability
                warn!(error = %error, "can't allocate milight device");
                sleep(retry_delay).await;
            }
            Err(CommandError::Exec(error)) => {
                if error.invalidates_session() {
                    warn!(error = %error, "milight session invalidated");
                    connections.terminate().await;
                    sleep(retry_delay).await;
                } else {
                    error!(error = %error, "milight command error");
                }
            }
        }
    }

    info!("milight controller loop terminated");
}

async fn process_command(
    connections: &dyn ManageConnection,
    cmd: Command,
) -> Result<(), CommandError> {
    let light = connections
        .allocate()
        .await
        .map_err(CommandError::Allocate)?;

    let result = cmd.exec(&*light).await;
    connections.release().await;

    result.map_err(CommandError::Exec)
}
