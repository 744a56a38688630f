//! In-memory remote endpoint for testing and local development
//!
//! Records webhook registrations and replies instead of calling a platform.
//! Failures can be injected to exercise the relay's error paths.

use super::{RemoteConnector, RemoteEndpoint};
use crate::error::{RelayError, Result};
use crate::types::{InboundEvent, IncomingMessage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// A reply captured by [`MemoryEndpoint`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedReply {
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
}

/// Endpoint that keeps everything in memory
///
/// Accepts either a Telegram-shaped update (`{"update_id", "message": {...}}`)
/// or a flat payload (`{"text": "...", "chat_id": 1}`).
#[derive(Default)]
pub struct MemoryEndpoint {
    webhook: Mutex<Option<String>>,
    registrations: Mutex<Vec<String>>,
    replies: Mutex<Vec<RecordedReply>>,
    reply_notify: Notify,
    fail_registration: AtomicBool,
    fail_reply_text: Mutex<Option<String>>,
    bot_username: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl MemoryEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following registration fail until reset
    pub fn set_fail_registration(&self, fail: bool) {
        self.fail_registration.store(fail, Ordering::SeqCst);
    }

    /// Make replies with exactly this text fail
    pub fn fail_replies_with(&self, text: impl Into<String>) {
        *lock(&self.fail_reply_text) = Some(text.into());
    }

    /// Username reported by `bot_username`
    pub fn set_bot_username(&self, username: impl Into<String>) {
        *lock(&self.bot_username) = Some(username.into());
    }

    /// Every URL passed to `register_webhook`, in order
    pub fn registrations(&self) -> Vec<String> {
        lock(&self.registrations).clone()
    }

    /// Every reply sent so far, in order
    pub fn replies(&self) -> Vec<RecordedReply> {
        lock(&self.replies).clone()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` replies were recorded, or `limit` elapses
    ///
    /// Returns the replies seen at that point.
    pub async fn wait_for_replies(&self, count: usize, limit: Duration) -> Vec<RecordedReply> {
        let wait = async {
            loop {
                let notified = self.reply_notify.notified();
                if lock(&self.replies).len() >= count {
                    return;
                }
                notified.await;
            }
        };
        let _ = tokio::time::timeout(limit, wait).await;
        self.replies()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl RemoteEndpoint for MemoryEndpoint {
    async fn register_webhook(&self, url: &str, _secret: Option<&str>) -> Result<()> {
        if self.fail_registration.load(Ordering::SeqCst) {
            return Err(RelayError::Registration(format!(
                "memory endpoint rejected {}",
                url
            )));
        }
        lock(&self.registrations).push(url.to_string());
        *lock(&self.webhook) = Some(url.to_string());
        Ok(())
    }

    async fn webhook_url(&self) -> Result<String> {
        Ok(lock(&self.webhook).clone().unwrap_or_default())
    }

    fn decode(&self, event: &InboundEvent) -> Result<Option<IncomingMessage>> {
        let payload = &event.payload;
        let message = payload.get("message").unwrap_or(payload);
        if !message.is_object() {
            return Err(RelayError::Remote(format!(
                "Event {} is not a JSON object",
                event.id
            )));
        }

        Ok(Some(IncomingMessage {
            update_id: payload["update_id"].as_i64().unwrap_or(0),
            chat_id: message
                .get("chat")
                .and_then(|c| c.get("id"))
                .or_else(|| message.get("chat_id"))
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            message_id: message["message_id"].as_i64().unwrap_or(0),
            text: message["text"].as_str().map(|s| s.to_string()),
        }))
    }

    async fn reply(&self, message: &IncomingMessage, text: &str) -> Result<()> {
        if lock(&self.fail_reply_text).as_deref() == Some(text) {
            return Err(RelayError::Remote(format!("reply '{}' rejected", text)));
        }

        lock(&self.replies).push(RecordedReply {
            chat_id: message.chat_id,
            message_id: message.message_id,
            text: text.to_string(),
        });
        self.reply_notify.notify_waiters();
        Ok(())
    }

    fn bot_username(&self) -> Option<String> {
        lock(&self.bot_username).clone()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Connector that always hands out the same shared [`MemoryEndpoint`]
#[derive(Clone, Default)]
pub struct MemoryConnector {
    endpoint: Arc<MemoryEndpoint>,
    connects: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The endpoint handed out by `connect`
    pub fn endpoint(&self) -> Arc<MemoryEndpoint> {
        self.endpoint.clone()
    }

    /// How many times `connect` built a handle
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteConnector for MemoryConnector {
    async fn connect(&self, credential: &str) -> Result<Arc<dyn RemoteEndpoint>> {
        if credential.trim().is_empty() {
            return Err(RelayError::Config("credential is empty".to_string()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.endpoint.clone())
    }
}
