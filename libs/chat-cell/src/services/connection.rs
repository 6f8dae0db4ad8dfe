use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shared_utils::Clock;

use crate::error::ChatError;
use crate::models::{ChatConfig, ConnectionState};
use crate::services::transport::ChatTransport;

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
}

/// Owns the single live chat connection for the lifetime of the widget.
/// Connect attempts are serialized through an in-flight guard plus a
/// minimum-interval gate, so rapid re-renders never set up duplicate
/// connections.
pub struct ChatConnectionManager {
    transport: Arc<dyn ChatTransport>,
    clock: Arc<dyn Clock>,
    config: ChatConfig,
    state: Arc<Mutex<ConnectionState>>,
    connecting: Arc<AtomicBool>,
    last_attempt: Arc<Mutex<Option<DateTime<Utc>>>>,
    shutdown: Arc<AtomicBool>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ChatConnectionManager {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        clock: Arc<dyn Clock>,
        config: ChatConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            transport,
            clock,
            config,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            connecting: Arc::new(AtomicBool::new(false)),
            last_attempt: Arc::new(Mutex::new(None)),
            shutdown: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.transport.is_connected()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!("Chat connection state {:?} -> {:?}", *state, next);
            *state = next;
            let _ = self.events.send(ConnectionEvent::StateChanged(next));
        }
    }

    /// Drives the connection to `Connected`, retrying with exponential
    /// backoff up to the configured cap. A failed run is terminal for this
    /// call and leaves the state at `Error`.
    pub async fn ensure_connected(&self) -> Result<(), ChatError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(ChatError::ShutDown);
        }
        if self.connecting.swap(true, Ordering::SeqCst) {
            return Err(ChatError::ConnectInProgress);
        }

        // Minimum-interval gate against rapid re-entry.
        {
            let mut last = self.last_attempt.lock();
            let now = self.clock.now();
            if let Some(prev) = *last {
                let min = chrono::Duration::from_std(self.config.min_connect_interval)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                // The state enum can lag a drop; only the transport knows
                // whether the socket is actually still up.
                if now - prev < min && self.is_connected() {
                    self.connecting.store(false, Ordering::SeqCst);
                    return Ok(());
                }
            }
            *last = Some(now);
        }

        let result = self.connect_with_retries().await;
        self.connecting.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                self.schedule_reverify();
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Error);
                Err(e)
            }
        }
    }

    async fn connect_with_retries(&self) -> Result<(), ChatError> {
        self.set_state(ConnectionState::Connecting);

        for attempt in 1..=self.config.max_connect_attempts {
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(ChatError::ShutDown);
            }

            // (a) Liveness probe against whatever connection exists.
            if matches!(self.transport.ping().await, Ok(true)) {
                info!("Chat connection alive on attempt {}", attempt);
                return Ok(());
            }

            // (b) In-place revival of a dropped connection.
            if self.transport.reconnect().await.is_ok()
                && matches!(self.transport.ping().await, Ok(true))
            {
                info!("Chat connection revived on attempt {}", attempt);
                return Ok(());
            }

            // (c) Tear down whatever is left and start fresh.
            let _ = self.transport.disconnect().await;
            match self.transport.connect().await {
                Ok(()) => {
                    info!("Fresh chat connection established on attempt {}", attempt);
                    return Ok(());
                }
                Err(e) => warn!("Chat connect attempt {} failed: {}", attempt, e),
            }

            if attempt < self.config.max_connect_attempts {
                let delay = self.config.backoff_base * 2u32.pow(attempt - 1);
                debug!("Backing off {:?} before next connect attempt", delay);
                self.clock.sleep(delay).await;
            }
        }

        Err(ChatError::ConnectionFailed {
            attempts: self.config.max_connect_attempts,
        })
    }

    /// Delayed re-verification after a successful handshake: some backends
    /// accept the connection and drop it moments later, so re-check once
    /// and re-enter connecting if the check fails.
    pub fn schedule_reverify(&self) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.clock.sleep(manager.config.reverify_delay).await;
            if manager.shutdown.load(Ordering::SeqCst) {
                return;
            }
            if !matches!(manager.transport.ping().await, Ok(true)) {
                warn!("Post-connect re-verification failed, reconnecting");
                if let Err(e) = manager.ensure_connected().await {
                    warn!("Re-verification reconnect failed: {}", e);
                }
            }
        })
    }

    /// Periodic liveness check. Detected drops re-enter the connecting
    /// sequence; the loop ends on teardown.
    pub fn spawn_liveness(&self) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                manager.clock.sleep(manager.config.liveness_interval).await;
                if manager.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if !matches!(manager.transport.ping().await, Ok(true)) {
                    info!("Liveness check detected a dropped chat connection");
                    manager.set_state(ConnectionState::Disconnected);
                    if let Err(e) = manager.ensure_connected().await {
                        warn!("Liveness reconnect failed: {}", e);
                    }
                }
            }
        })
    }

    /// Best-effort disconnect and counter reset. Safe from any state.
    pub async fn teardown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(e) = self.transport.disconnect().await {
            debug!("Disconnect during teardown failed: {}", e);
        }
        self.connecting.store(false, Ordering::SeqCst);
        *self.last_attempt.lock() = None;
        self.set_state(ConnectionState::Disconnected);
    }
}

impl Clone for ChatConnectionManager {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            connecting: Arc::clone(&self.connecting),
            last_attempt: Arc::clone(&self.last_attempt),
            shutdown: Arc::clone(&self.shutdown),
            events: self.events.clone(),
        }
    }
}
