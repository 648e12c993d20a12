// Connection Supervisor
// Tracks availability and reconnects with linearly increasing delays up to a bounded attempt count

use super::store::StoreAdapter;
use crate::config::RedisSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Connection status of the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Not connected yet, or connection lost and a reconnect is pending
    Disconnected,
    Connected,
    /// Waiting for or running a reconnect attempt
    Reconnecting,
    /// Reconnect attempts exhausted
    Unavailable,
    /// Closed by the owner
    Closed,
}

/// Linear reconnect backoff: attempt `n` waits `n * base_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Connection state snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Reconnect attempts since the last successful connection
    pub attempts: u32,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Owns the availability flag of the store and the reconnect task
pub struct ConnectionSupervisor {
    store: Arc<dyn StoreAdapter>,
    policy: ReconnectPolicy,
    ping_timeout: Duration,
    max_memory: String,
    eviction_policy: String,
    state: RwLock<ConnectionState>,
    reconnecting: AtomicBool,
    connecting: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl ConnectionSupervisor {
    pub fn new(store: Arc<dyn StoreAdapter>, settings: &RedisSettings) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            policy: ReconnectPolicy {
                base_delay: settings.retry_delay(),
                max_attempts: settings.max_reconnect_attempts,
            },
            ping_timeout: settings.command_timeout(),
            max_memory: settings.max_memory.clone(),
            eviction_policy: settings.eviction_policy.clone(),
            state: RwLock::new(ConnectionState {
                status: ConnectionStatus::Disconnected,
                attempts: 0,
                last_connected: None,
                last_error: None,
            }),
            reconnecting: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    pub fn status(&self) -> ConnectionStatus {
        self.read_state().status
    }

    pub fn state(&self) -> ConnectionState {
        self.read_state().clone()
    }

    /// Whether commands should be sent to the store
    pub fn is_available(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Ping the store and mark it connected. On failure a reconnect loop is started.
    pub async fn connect(self: &Arc<Self>) -> bool {
        if self.status() == ConnectionStatus::Closed {
            return false;
        }

        info!("Connecting to store: {}", self.store.name());
        match self.ping().await {
            Ok(()) => {
                self.mark_connected();
                self.configure_store().await;
                true
            }
            Err(reason) => {
                error!("Failed to connect to store {}: {}", self.store.name(), reason);
                self.connection_lost(&reason);
                false
            }
        }
    }

    /// Lazy connect: start one background connect attempt when the store has
    /// never been reached and no reconnect loop is running
    pub fn ensure_connecting(self: &Arc<Self>) {
        if self.status() != ConnectionStatus::Disconnected
            || self.reconnecting.load(Ordering::SeqCst)
        {
            return;
        }
        if self
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            supervisor.connect().await;
            supervisor.connecting.store(false, Ordering::SeqCst);
        });
    }

    /// Manual recovery: forget previous attempts and connect again
    pub async fn reconnect_now(self: &Arc<Self>) -> bool {
        {
            let mut state = self.write_state();
            if state.status == ConnectionStatus::Closed {
                return false;
            }
            state.attempts = 0;
            state.status = ConnectionStatus::Disconnected;
        }
        self.connect().await
    }

    /// Report a connectivity failure observed on the request path
    pub fn connection_lost(self: &Arc<Self>, reason: &str) {
        {
            let mut state = self.write_state();
            match state.status {
                ConnectionStatus::Closed | ConnectionStatus::Unavailable => return,
                ConnectionStatus::Connected => {
                    warn!("Store connection lost: {}", reason);
                    state.status = ConnectionStatus::Disconnected;
                }
                ConnectionStatus::Disconnected | ConnectionStatus::Reconnecting => {}
            }
            state.last_error = Some(reason.to_string());
        }
        self.spawn_reconnect();
    }

    /// Stop reconnecting and mark the connection closed
    pub async fn close(&self) {
        self.write_state().status = ConnectionStatus::Closed;
        self.shutdown.send_replace(true);
        if let Err(e) = self.store.quit().await {
            error!("Error closing store connection: {}", e);
        }
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                supervisor.reconnect_loop().await;
                supervisor.reconnecting.store(false, Ordering::SeqCst);

                // A loss reported while the flag was still set would otherwise go unhandled
                if supervisor.status() != ConnectionStatus::Disconnected
                    || supervisor
                        .reconnecting
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_err()
                {
                    break;
                }
            }
        });
    }

    async fn reconnect_loop(&self) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let attempt = {
                let mut state = self.write_state();
                match state.status {
                    ConnectionStatus::Closed | ConnectionStatus::Connected => return,
                    _ => {}
                }
                if state.attempts >= self.policy.max_attempts {
                    state.status = ConnectionStatus::Unavailable;
                    error!(
                        "Max reconnection attempts reached ({}), store marked unavailable",
                        self.policy.max_attempts
                    );
                    return;
                }
                state.attempts += 1;
                state.status = ConnectionStatus::Reconnecting;
                state.attempts
            };

            let delay = self.policy.delay_for(attempt);
            debug!(
                "Reconnecting to store in {:?} (attempt {}/{})",
                delay, attempt, self.policy.max_attempts
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }

            match self.ping().await {
                Ok(()) => {
                    if self.status() == ConnectionStatus::Closed {
                        return;
                    }
                    self.mark_connected();
                    self.configure_store().await;
                    info!("Store reconnected after {} attempt(s)", attempt);
                    return;
                }
                Err(reason) => {
                    warn!("Reconnect attempt {} failed: {}", attempt, reason);
                    self.write_state().last_error = Some(reason);
                }
            }
        }
    }

    async fn ping(&self) -> std::result::Result<(), String> {
        match tokio::time::timeout(self.ping_timeout, self.store.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("PING timed out after {:?}", self.ping_timeout)),
        }
    }

    fn mark_connected(&self) {
        let mut state = self.write_state();
        state.status = ConnectionStatus::Connected;
        state.attempts = 0;
        state.last_connected = Some(Utc::now());
        state.last_error = None;
        info!("Store connected: {}", self.store.name());
    }

    /// Apply eviction policy and memory budget; managed stores often reject CONFIG, so failures only warn
    async fn configure_store(&self) {
        let settings = [
            ("maxmemory-policy", self.eviction_policy.as_str()),
            ("maxmemory", self.max_memory.as_str()),
        ];
        for (parameter, value) in settings {
            let result =
                tokio::time::timeout(self.ping_timeout, self.store.config_set(parameter, value))
                    .await;
            match result {
                Ok(Ok(())) => debug!("Configured store {} = {}", parameter, value),
                Ok(Err(e)) => warn!("Failed to configure store {}: {}", parameter, e),
                Err(_) => warn!("Timed out configuring store {}", parameter),
            }
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, ConnectionState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, ConnectionState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
