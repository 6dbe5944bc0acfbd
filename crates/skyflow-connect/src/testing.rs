//! In-process stand-ins for plugin channels
//!
//! Enabled with the `test-utils` feature so dependent crates can drive the
//! registry, health checker and monitor without a gRPC server.

use crate::connection::{ConnState, ProviderConnection, ServingStatus};
use crate::dialer::{DialSettings, Dialer};
use crate::error::{ConnectError, Result};
use async_trait::async_trait;
use skyflow_cloud::ProviderConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug)]
struct StubConnectionInner {
    state: AtomicU8,
    serving: Mutex<ServingStatus>,
    probe_error: AtomicBool,
    probes: AtomicUsize,
    closes: AtomicUsize,
    fail_close: AtomicBool,
}

/// Connection whose state and probe answers are set by the test
///
/// Clones share state, so the copy kept by [`StubDialer`] controls the one
/// owned by the registry.
#[derive(Debug, Clone)]
pub struct StubConnection {
    provider: String,
    inner: Arc<StubConnectionInner>,
}

impl StubConnection {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            inner: Arc::new(StubConnectionInner {
                state: AtomicU8::new(ConnState::Ready as u8),
                serving: Mutex::new(ServingStatus::Serving),
                probe_error: AtomicBool::new(false),
                probes: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                fail_close: AtomicBool::new(false),
            }),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn set_state(&self, state: ConnState) {
        self.inner.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn set_serving(&self, status: ServingStatus) {
        *lock(&self.inner.serving) = status;
    }

    /// Make probes fail with an RPC error instead of answering
    pub fn fail_probes(&self, fail: bool) {
        self.inner.probe_error.store(fail, Ordering::SeqCst);
    }

    /// Make `close` return an error
    pub fn fail_close(&self, fail: bool) {
        self.inner.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> usize {
        self.inner.probes.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }
}

#[async_trait]
impl ProviderConnection for StubConnection {
    fn state(&self) -> ConnState {
        ConnState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    async fn probe(&self, _timeout: Duration) -> Result<ServingStatus> {
        self.inner.probes.fetch_add(1, Ordering::SeqCst);
        if self.inner.probe_error.load(Ordering::SeqCst) {
            return Err(ConnectError::Probe("stub probe failure".to_string()));
        }
        Ok(*lock(&self.inner.serving))
    }

    async fn close(&self) -> Result<()> {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnState::Shutdown);
        if self.inner.fail_close.load(Ordering::SeqCst) {
            return Err(ConnectError::Close {
                provider: self.provider.clone(),
                reason: "stub close failure".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct StubDialerState {
    failures_left: HashMap<String, u32>,
    dials: HashMap<String, usize>,
    connections: HashMap<String, Vec<StubConnection>>,
    delay: Duration,
}

/// Dialer that hands out [`StubConnection`]s and records every attempt
#[derive(Debug, Clone, Default)]
pub struct StubDialer {
    state: Arc<Mutex<StubDialerState>>,
}

impl StubDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` dials of `provider` fail
    pub fn fail_next_dials(&self, provider: &str, count: u32) {
        lock(&self.state)
            .failures_left
            .insert(provider.to_string(), count);
    }

    /// Every dial takes `delay` before answering
    pub fn set_dial_delay(&self, delay: Duration) {
        lock(&self.state).delay = delay;
    }

    /// Attempts so far, successful or not
    pub fn dial_count(&self, provider: &str) -> usize {
        lock(&self.state).dials.get(provider).copied().unwrap_or(0)
    }

    /// Every connection handed out for `provider`, oldest first
    pub fn connections(&self, provider: &str) -> Vec<StubConnection> {
        lock(&self.state)
            .connections
            .get(provider)
            .cloned()
            .unwrap_or_default()
    }

    pub fn latest(&self, provider: &str) -> Option<StubConnection> {
        self.connections(provider).pop()
    }

    /// Connections for `provider` that have not been closed
    pub fn open_connections(&self, provider: &str) -> usize {
        self.connections(provider)
            .iter()
            .filter(|c| !c.is_closed())
            .count()
    }
}

#[async_trait]
impl Dialer for StubDialer {
    type Connection = StubConnection;

    async fn dial(&self, config: &ProviderConfig, _settings: &DialSettings) -> Result<StubConnection> {
        let delay = {
            let mut state = lock(&self.state);
            *state.dials.entry(config.name.clone()).or_default() += 1;
            state.delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        if let Some(left) = state.failures_left.get_mut(&config.name)
            && *left > 0
        {
            *left -= 1;
            return Err(ConnectError::Transport(format!(
                "connection refused: {}",
                config.address
            )));
        }

        let connection = StubConnection::new(&config.name);
        state
            .connections
            .entry(config.name.clone())
            .or_default()
            .push(connection.clone());
        Ok(connection)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
