//! Start/stop plumbing for the periodic loops

use skyflow_cloud::{Lifecycle, LifecycleState};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// One spawned loop plus the channel that tells it to exit
#[derive(Debug, Default)]
pub(crate) struct BackgroundLoop {
    lifecycle: Lifecycle,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundLoop {
    pub(crate) fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Spawn `body` unless a loop is already running; false if it was
    ///
    /// `body` gets a receiver that changes (or closes) when the loop must exit.
    pub(crate) fn start<F, Fut>(&self, body: F) -> bool
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if !self.lifecycle.begin_start() {
            return false;
        }

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(body(rx));
        *lock(&self.stop_tx) = Some(tx);
        *lock(&self.handle) = Some(handle);
        self.lifecycle.mark_running();
        true
    }

    /// Signal the loop and wait for it to exit; false if nothing was running
    pub(crate) async fn stop(&self) -> bool {
        if !self.lifecycle.begin_stop() {
            return false;
        }

        if let Some(tx) = lock(&self.stop_tx).take() {
            let _ = tx.send(true);
        }
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
            && e.is_panic()
        {
            warn!(error = %e, "Background loop panicked");
        }
        true
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
