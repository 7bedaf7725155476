//! Background eviction of the idle device session.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::select;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::{ConnectionError, ConnectionStatus, ManageConnection};
use crate::milight::LightController;

/// Eviction timings
#[derive(Debug, Clone)]
pub struct KeeperConfig {
    /// How often the monitor checks the connection
    pub check_period: Duration,
    /// Idle time after which an unallocated session is terminated
    pub ttl: Duration,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            check_period: Duration::from_secs(15),
            ttl: Duration::from_secs(30),
        }
    }
}

/// Reclaims the physical connection once it has been idle for longer than
/// the TTL, so bursty traffic reuses one session but long idle periods free
/// the device.
pub struct ConnectionKeeper<M: ManageConnection> {
    connman: Arc<M>,
    last_activity: Arc<Mutex<Instant>>,
    monitor: Mutex<Option<MonitorHandle>>,
}

struct MonitorHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl<M: ManageConnection + 'static> ConnectionKeeper<M> {
    pub fn new(connman: Arc<M>, config: KeeperConfig) -> Self {
        let last_activity = Arc::new(Mutex::new(Instant::now()));
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn({
            let connman = connman.clone();
            let last_activity = last_activity.clone();

            async move {
                debug!("milight monitoring loop started");

                loop {
                    select! {
                        _ = &mut stop_rx => break,
                        _ = sleep(config.check_period) => {
                            let status = connman.status().await;
                            let idle = last_activity.lock().unwrap().elapsed();

                            if status.exists && !status.allocated && idle > config.ttl {
                                connman.terminate().await;
                            }
                        }
                    }
                }

                debug!("milight monitoring loop terminated");
            }
        });

        Self {
            connman,
            last_activity,
            monitor: Mutex::new(Some(MonitorHandle { stop_tx, task })),
        }
    }

    /// Stop the monitor loop, then terminate the underlying connection
    ///
    /// Blocks until the loop has exited. Idempotent.
    pub async fn shutdown(&self) {
        let handle = self.monitor.lock().unwrap().take();

        if let Some(MonitorHandle { stop_tx, task }) = handle {
            stop_tx.send(()).ok();
            task.await.ok();
        }

        self.connman.terminate().await;
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }
}

#[async_trait]
impl<M: ManageConnection + 'static> ManageConnection for ConnectionKeeper<M> {
    async fn allocate(&self) -> Result<Arc<dyn LightController>, ConnectionError> {
        self.touch();
        self.connman.allocate().await
    }

    async fn release(&self) {
        self.connman.release().await;
        self.touch();
    }

    async fn status(&self) -> ConnectionStatus {
        self.connman.status().await
    }

    /// Discards the session only; the monitor loop keeps running so idle
    /// eviction survives session invalidation
    async fn terminate(&self) {
        self.connman.terminate().await;
    }

    async fn shutdown(&self) {
        ConnectionKeeper::shutdown(self).await;
    }
}
