//! Wires a [`ConnectionManager`] and its engine to a render channel on a background task.

use crate::shared::{
    config::{ConnectionConfig, EngineConfig},
    connection::{ConnectionManager, LastKnownGood},
    render::RenderSnapshot,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

/// Running chart session
pub struct SessionHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<LastKnownGood>>,
}

impl SessionHandle {
    /// Signal teardown. Safe to call repeatedly.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Wait for the session task to finish, returning its last-known-good snapshot.
    pub async fn join(&mut self) -> Option<LastKnownGood> {
        let task = self.task.take()?;
        match task.await {
            Ok(snapshot) => Some(snapshot),
            Err(error) => {
                warn!(%error, "chart session task failed");
                None
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn a session publishing a fresh [`RenderSnapshot`] after every engine change.
pub fn spawn_session(
    engine: EngineConfig,
    connection: ConnectionConfig,
    seed: LastKnownGood,
    snapshot_tx: watch::Sender<RenderSnapshot>,
) -> SessionHandle {
    let manager = ConnectionManager::from_config(&engine, connection).with_last_known_good(seed);
    run_session(manager, snapshot_tx)
}

/// Spawn a session around an already built manager
pub fn run_session(
    mut manager: ConnectionManager,
    snapshot_tx: watch::Sender<RenderSnapshot>,
) -> SessionHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    snapshot_tx.send_replace(manager.engine().snapshot());
    manager.engine_mut().subscribe(move |_, view| {
        snapshot_tx.send_replace(view.snapshot());
    });

    let task = tokio::spawn(async move {
        info!(state = %manager.state(), "chart session started");
        manager.run(shutdown_rx).await;
        info!("chart session stopped");
        manager.last_known_good().clone()
    });

    SessionHandle {
        shutdown_tx,
        task: Some(task),
    }
}
