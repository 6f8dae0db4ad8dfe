use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shared_utils::Clock;

use crate::error::ChatError;
use crate::models::{
    ChatConfig, ChatMessage, PendingDelivery, TranscriptEvent, APOLOGY_TEXT,
    RECONNECTED_TEXT, RECONNECTING_TEXT, RECONNECT_FAILED_TEXT, RESTART_COMMAND,
    RESTART_NOTICE_TEXT, SEND_FAILED_TEXT, SEND_TIMEOUT_TEXT,
};
use crate::models::ConnectionState;
use crate::services::connection::{ChatConnectionManager, ConnectionEvent};
use crate::services::history::ChatHistory;
use crate::services::transport::ChatTransport;

/// Reduces the wire shapes the chat backend has been observed to emit to
/// plain text: a bare string, `{message}`, `{message:{content}}`, and
/// two-element array variants of those. Anything else normalizes to empty,
/// which the session treats as a server error.
pub fn normalize_payload(payload: &Value) -> String {
    fn extract(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => match map.get("message") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Object(inner)) => inner
                    .get("content")
                    .and_then(|c| c.as_str())
                    .map(|s| s.to_string()),
                _ => None,
            },
            Value::Array(items) if items.len() == 2 => {
                extract(&items[1]).or_else(|| extract(&items[0]))
            }
            _ => None,
        }
    }

    extract(payload)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

struct SessionInner {
    transcript: Vec<ChatMessage>,
    queue: VecDeque<PendingDelivery>,
    in_flight: bool,
    last_accepted: Option<String>,
    awaiting_response: bool,
    send_seq: u64,
    recovery_needed: bool,
}

/// Orchestrates the chat transcript: paces bot replies through a strict
/// FIFO, single-in-flight delivery queue, guards the outbound send path
/// with a timeout, and persists history for authenticated users.
pub struct ChatSession {
    config: ChatConfig,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn ChatTransport>,
    connection: ChatConnectionManager,
    history: Option<Arc<ChatHistory>>,
    user_id: Option<String>,
    inner: Arc<Mutex<SessionInner>>,
    events: broadcast::Sender<TranscriptEvent>,
    // Bumped on restart/shutdown so stale timer continuations become no-ops.
    generation: Arc<AtomicU64>,
    alive: Arc<AtomicBool>,
}

impl ChatSession {
    pub fn new(
        config: ChatConfig,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn ChatTransport>,
        connection: ChatConnectionManager,
        history: Option<Arc<ChatHistory>>,
        user_id: Option<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            clock,
            transport,
            connection,
            history,
            user_id,
            inner: Arc::new(Mutex::new(SessionInner {
                transcript: Vec::new(),
                queue: VecDeque::new(),
                in_flight: false,
                last_accepted: None,
                awaiting_response: false,
                send_seq: 0,
                recovery_needed: false,
            })),
            events,
            generation: Arc::new(AtomicU64::new(0)),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Seeds the transcript: persisted history for authenticated users, the
    /// welcome message otherwise (or when no unexpired history exists).
    pub fn start(&self) {
        let restored = match (&self.user_id, &self.history) {
            (Some(user_id), Some(history)) => match history.load(user_id) {
                Ok(messages) => messages,
                Err(e) => {
                    warn!("Failed to load chat history: {}", e);
                    None
                }
            },
            _ => None,
        };

        let mut inner = self.inner.lock();
        inner.transcript = match restored {
            Some(messages) if !messages.is_empty() => {
                info!("Restored {} persisted chat messages", messages.len());
                messages
            }
            _ => vec![ChatMessage::welcome(self.clock.now())],
        };
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.events.subscribe()
    }

    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.inner.lock().transcript.clone()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_delivery_in_flight(&self) -> bool {
        self.inner.lock().in_flight
    }

    pub fn recovery_needed(&self) -> bool {
        self.inner.lock().recovery_needed
    }

    pub fn connection(&self) -> &ChatConnectionManager {
        &self.connection
    }

    /// Forwards inbound transport payloads into the session until shutdown.
    pub fn spawn_response_pump(&self) -> JoinHandle<()> {
        let session = self.clone();
        let mut responses = self.transport.responses();
        tokio::spawn(async move {
            loop {
                match responses.recv().await {
                    Ok(payload) => {
                        if !session.alive.load(Ordering::SeqCst) {
                            break;
                        }
                        session.handle_bot_payload(payload).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Response pump lagged, skipped {} payloads", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Surfaces terminal connection failures in the transcript, whichever
    /// path hit them (liveness tick, re-verification, or a send-initiated
    /// reconnect), until shutdown.
    pub fn spawn_connection_monitor(&self) -> JoinHandle<()> {
        let session = self.clone();
        let mut events = self.connection.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ConnectionEvent::StateChanged(state)) => {
                        if !session.alive.load(Ordering::SeqCst) {
                            break;
                        }
                        if state == ConnectionState::Error {
                            session.append_bot(RECONNECT_FAILED_TEXT);
                            session.set_recovery_needed();
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Connection monitor lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Entry point for one inbound bot payload: normalize, then either
    /// surface the empty-payload error, drop a duplicate, or enqueue.
    pub async fn handle_bot_payload(&self, payload: Value) {
        let text = normalize_payload(&payload);

        // Whatever the backend sent resolves the outstanding send guard.
        {
            let mut inner = self.inner.lock();
            inner.awaiting_response = false;
        }

        if text.is_empty() {
            debug!("Empty bot payload, surfacing apology");
            // The apology interrupts the exchange, so a re-send of the
            // previous answer is no longer a duplicate.
            self.inner.lock().last_accepted = None;
            self.append_bot(APOLOGY_TEXT);
            self.set_recovery_needed();
            return;
        }

        let start_processing = {
            let mut inner = self.inner.lock();
            if inner.last_accepted.as_deref() == Some(text.as_str()) {
                debug!("Dropping duplicate bot payload");
                return;
            }
            inner.last_accepted = Some(text.clone());
            inner.queue.push_back(PendingDelivery {
                text,
                enqueued_at: self.clock.now(),
            });
            if inner.in_flight {
                false
            } else {
                inner.in_flight = true;
                true
            }
        };

        if start_processing {
            let session = self.clone();
            let generation = self.generation.load(Ordering::SeqCst);
            tokio::spawn(async move {
                session.process_queue(generation).await;
            });
        }
    }

    /// Serialized delivery: one typing placeholder, a wait that normalizes
    /// perceived latency to `response_delay`, then the real message, then a
    /// fixed gap before the next item.
    async fn process_queue(&self, generation: u64) {
        loop {
            if !self.alive.load(Ordering::SeqCst)
                || self.generation.load(Ordering::SeqCst) != generation
            {
                return;
            }

            let item = {
                let mut inner = self.inner.lock();
                match inner.queue.pop_front() {
                    Some(item) => item,
                    None => {
                        inner.in_flight = false;
                        return;
                    }
                }
            };

            let placeholder = {
                let placeholder = ChatMessage::typing_placeholder(self.clock.now());
                let mut inner = self.inner.lock();
                inner.transcript.push(placeholder.clone());
                placeholder
            };
            let _ = self.events.send(TranscriptEvent::PlaceholderShown(placeholder.clone()));

            let elapsed = (self.clock.now() - item.enqueued_at)
                .to_std()
                .unwrap_or_default();
            let wait = self.config.response_delay.saturating_sub(elapsed);
            self.clock.sleep(wait).await;

            if !self.alive.load(Ordering::SeqCst)
                || self.generation.load(Ordering::SeqCst) != generation
            {
                // Restart already scrubbed the placeholder with the rest of
                // the transcript.
                return;
            }

            let message = {
                let message = ChatMessage::bot(item.text, self.clock.now());
                let mut inner = self.inner.lock();
                inner.transcript.retain(|m| m.id != placeholder.id);
                inner.transcript.push(message.clone());
                message
            };
            let _ = self.events.send(TranscriptEvent::PlaceholderResolved {
                placeholder_id: placeholder.id,
                message,
            });
            self.persist();

            self.clock.sleep(self.config.inter_message_gap).await;
        }
    }

    /// Outbound send. Rejected while a previous send's timeout guard is
    /// still outstanding; runs one reconnect cycle first when the
    /// connection is down.
    pub async fn send(&self, text: &str) -> Result<(), ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        if text == RESTART_COMMAND {
            self.restart().await;
            return Ok(());
        }

        if self.inner.lock().awaiting_response {
            return Err(ChatError::SendPending);
        }

        if !self.connection.is_connected() {
            self.append_bot(RECONNECTING_TEXT);
            match self.connection.ensure_connected().await {
                Ok(()) => self.append_bot(RECONNECTED_TEXT),
                Err(e) => {
                    // The connection monitor appends the failure notice off
                    // the Error state transition.
                    warn!("Reconnect before send failed: {}", e);
                    self.set_recovery_needed();
                    return Err(e);
                }
            }
        }

        {
            let message = ChatMessage::user(text, self.clock.now());
            let mut inner = self.inner.lock();
            inner.transcript.push(message.clone());
            drop(inner);
            let _ = self.events.send(TranscriptEvent::MessageAppended(message));
        }
        self.persist();

        let seq = {
            let mut inner = self.inner.lock();
            inner.awaiting_response = true;
            inner.send_seq += 1;
            inner.send_seq
        };
        self.spawn_send_watchdog(seq);

        let payload = json!({ "message": text }).to_string();
        if let Err(e) = self.transport.send(&payload).await {
            warn!("Chat send failed: {}", e);
            self.inner.lock().awaiting_response = false;
            self.append_bot(SEND_FAILED_TEXT);
            return Err(e);
        }

        Ok(())
    }

    /// If no response arrives before the ceiling, clear the pending state,
    /// surface a timeout error, and re-check connection health.
    fn spawn_send_watchdog(&self, seq: u64) {
        let session = self.clone();
        let generation = self.generation.load(Ordering::SeqCst);
        tokio::spawn(async move {
            session.clock.sleep(session.config.send_timeout).await;
            if !session.alive.load(Ordering::SeqCst)
                || session.generation.load(Ordering::SeqCst) != generation
            {
                return;
            }

            let timed_out = {
                let mut inner = session.inner.lock();
                if inner.awaiting_response && inner.send_seq == seq {
                    inner.awaiting_response = false;
                    true
                } else {
                    false
                }
            };

            if timed_out {
                info!("Send timed out after {:?}", session.config.send_timeout);
                session.append_bot(SEND_TIMEOUT_TEXT);
                session.set_recovery_needed();
                if let Err(e) = session.connection.ensure_connected().await {
                    debug!("Post-timeout health check: {}", e);
                }
            }
        });
    }

    /// Deterministic local reset regardless of backend acknowledgement:
    /// queue cleared, in-flight and duplicate state dropped, pending
    /// timeouts cancelled, transcript reduced to the restart notice plus
    /// the welcome message, persisted history purged.
    pub async fn restart(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let now = self.clock.now();

        {
            let mut inner = self.inner.lock();
            inner.queue.clear();
            inner.in_flight = false;
            inner.last_accepted = None;
            inner.awaiting_response = false;
            inner.recovery_needed = false;
            inner.transcript = vec![
                ChatMessage::bot(RESTART_NOTICE_TEXT, now),
                ChatMessage::welcome(now),
            ];
        }
        let _ = self.events.send(TranscriptEvent::Restarted);

        let payload = json!({ "message": RESTART_COMMAND }).to_string();
        if let Err(e) = self.transport.send(&payload).await {
            warn!("Restart notify failed (continuing locally): {}", e);
        }

        if let (Some(user_id), Some(history)) = (&self.user_id, &self.history) {
            if let Err(e) = history.purge(user_id) {
                warn!("Failed to purge chat history on restart: {}", e);
            }
        }
    }

    /// Ends the session for this mount: pending timers become no-ops and
    /// the connection is torn down best-effort.
    pub async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.connection.teardown().await;
    }

    fn append_bot(&self, text: &str) {
        let message = ChatMessage::bot(text, self.clock.now());
        {
            let mut inner = self.inner.lock();
            inner.transcript.push(message.clone());
        }
        let _ = self.events.send(TranscriptEvent::MessageAppended(message));
        self.persist();
    }

    fn set_recovery_needed(&self) {
        self.inner.lock().recovery_needed = true;
        let _ = self.events.send(TranscriptEvent::RecoveryRequired);
    }

    /// Persists on every transcript change beyond the initial greeting,
    /// for authenticated users only.
    fn persist(&self) {
        let (user_id, history) = match (&self.user_id, &self.history) {
            (Some(user_id), Some(history)) => (user_id, history),
            _ => return,
        };

        let transcript = {
            let inner = self.inner.lock();
            if inner.transcript.len() <= 1 {
                return;
            }
            inner.transcript.clone()
        };

        if let Err(e) = history.save(user_id, &transcript) {
            warn!("Failed to persist chat history: {}", e);
        }
    }
}

impl Clone for ChatSession {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            clock: Arc::clone(&self.clock),
            transport: Arc::clone(&self.transport),
            connection: self.connection.clone(),
            history: self.history.clone(),
            user_id: self.user_id.clone(),
            inner: Arc::clone(&self.inner),
            events: self.events.clone(),
            generation: Arc::clone(&self.generation),
            alive: Arc::clone(&self.alive),
        }
    }
}
