#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use chat_cell::{
    ChatConfig, ChatConnectionManager, ChatError, ChatHistory, ChatSession, ChatTransport,
    HistoryStore, MemoryHistoryStore,
};
use shared_utils::{Clock, ManualClock};

/// Scriptable transport: connect calls can be made to fail a fixed number
/// of times, reconnect support is opt-in, and every call is recorded.
pub struct MockTransport {
    connected: Mutex<bool>,
    connect_failures_left: AtomicU32,
    reconnect_supported: Mutex<bool>,
    fail_sends: Mutex<bool>,
    calls: Mutex<Vec<&'static str>>,
    sent: Mutex<Vec<String>>,
    responses: broadcast::Sender<Value>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (responses, _) = broadcast::channel(64);
        Self {
            connected: Mutex::new(false),
            connect_failures_left: AtomicU32::new(0),
            reconnect_supported: Mutex::new(false),
            fail_sends: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            responses,
        }
    }

    pub fn connected() -> Self {
        let transport = Self::new();
        *transport.connected.lock() = true;
        transport
    }

    pub fn fail_connects(&self, count: u32) {
        self.connect_failures_left.store(count, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        *self.connected.lock() = connected;
    }

    pub fn support_reconnect(&self) {
        *self.reconnect_supported.lock() = true;
    }

    pub fn fail_sends(&self) {
        *self.fail_sends.lock() = true;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn emit(&self, payload: Value) {
        let _ = self.responses.send(payload);
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn connect(&self) -> Result<(), ChatError> {
        self.calls.lock().push("connect");
        let left = self.connect_failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.connect_failures_left.store(left - 1, Ordering::SeqCst);
            return Err(ChatError::Transport("connect refused".to_string()));
        }
        *self.connected.lock() = true;
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), ChatError> {
        self.calls.lock().push("reconnect");
        if *self.reconnect_supported.lock() {
            *self.connected.lock() = true;
            Ok(())
        } else {
            Err(ChatError::NotConnected)
        }
    }

    async fn disconnect(&self) -> Result<(), ChatError> {
        self.calls.lock().push("disconnect");
        *self.connected.lock() = false;
        Ok(())
    }

    async fn ping(&self) -> Result<bool, ChatError> {
        self.calls.lock().push("ping");
        Ok(*self.connected.lock())
    }

    async fn send(&self, message: &str) -> Result<(), ChatError> {
        self.calls.lock().push("send");
        if *self.fail_sends.lock() {
            return Err(ChatError::Transport("send refused".to_string()));
        }
        self.sent.lock().push(message.to_string());
        Ok(())
    }

    fn responses(&self) -> broadcast::Receiver<Value> {
        self.responses.subscribe()
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }
}

pub struct TestHarness {
    pub clock: Arc<ManualClock>,
    pub transport: Arc<MockTransport>,
    pub session: ChatSession,
    pub store: Arc<MemoryHistoryStore>,
}

pub fn harness_with_user(user_id: Option<&str>) -> TestHarness {
    let start = Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let transport = Arc::new(MockTransport::connected());
    let config = ChatConfig::default();
    let connection = ChatConnectionManager::new(
        transport.clone() as Arc<dyn ChatTransport>,
        clock.clone() as Arc<dyn Clock>,
        config.clone(),
    );

    let store = Arc::new(MemoryHistoryStore::new());
    let history = user_id.map(|_| {
        Arc::new(ChatHistory::new(
            store.clone() as Arc<dyn HistoryStore>,
            clock.clone() as Arc<dyn Clock>,
            config.history_retention_days,
        ))
    });

    let session = ChatSession::new(
        config,
        clock.clone() as Arc<dyn Clock>,
        transport.clone() as Arc<dyn ChatTransport>,
        connection,
        history,
        user_id.map(|id| id.to_string()),
    );
    session.start();
    session.spawn_connection_monitor();

    TestHarness {
        clock,
        transport,
        session,
        store,
    }
}

pub fn harness() -> TestHarness {
    harness_with_user(None)
}

/// Lets spawned delivery/watchdog tasks run to completion on the current
/// runtime without real waiting.
pub async fn drain(session: &ChatSession) {
    for _ in 0..64 {
        tokio::task::yield_now().await;
        if session.queue_len() == 0 && !session.is_delivery_in_flight() {
            // A few extra yields so trailing cooldown sleeps resolve.
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
            return;
        }
    }
}
