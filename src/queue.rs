//! Unbounded FIFO queue between the webhook handler and the echo worker
//!
//! Any number of producers may push; exactly one consumer may be taken.

use crate::error::{RelayError, Result};
use crate::types::InboundEvent;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Ordered, unbounded, single-consumer queue of inbound events
pub struct EventQueue {
    tx: mpsc::UnboundedSender<InboundEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<InboundEvent>>>,
}

impl EventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Enqueue an event without waiting
    ///
    /// Fails only once the consumer has been dropped.
    pub fn push(&self, event: InboundEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| RelayError::QueueClosed)
    }

    /// Take the consumer side; returns `None` if it was already taken
    pub fn take_consumer(&self) -> Option<EventConsumer> {
        let mut rx = self.rx.lock().unwrap_or_else(|e| e.into_inner());
        rx.take().map(|rx| EventConsumer { rx })
    }

    /// Whether the consumer has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer half of an [`EventQueue`]
pub struct EventConsumer {
    rx: mpsc::UnboundedReceiver<InboundEvent>,
}

impl EventConsumer {
    /// Wait for the next event
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued
    pub fn try_recv(&mut self) -> Option<InboundEvent> {
        self.rx.try_recv().ok()
    }

    /// Discard everything still queued, returning how many events were dropped
    pub fn discard(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}
