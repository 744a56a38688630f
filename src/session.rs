//! Relay session lifecycle
//!
//! A `RelaySession` moves through `Unconfigured → Registering → Running →
//! Stopped`. Only the `Running` state carries a remote handle and an echo
//! worker, so the handle cannot outlive registration or survive shutdown.

use crate::error::{RelayError, Result};
use crate::queue::{EventConsumer, EventQueue};
use crate::remote::{bounded, RemoteConnector, RemoteEndpoint};
use crate::types::{InboundEvent, IncomingMessage, SessionState};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Reply sent for the `/start` command
pub const WELCOME_TEXT: &str = "Welcome to my echo bot!";

/// Tunables for a [`RelaySession`]
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// How long shutdown keeps processing already-queued events
    pub drain_timeout: Duration,

    /// Upper bound on each outbound call (registration, webhook info, reply)
    pub outbound_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(5),
            outbound_timeout: Duration::from_secs(15),
        }
    }
}

enum Lifecycle {
    Unconfigured,
    Running(RunningSession),
    Stopped,
}

struct RunningSession {
    remote: Arc<dyn RemoteEndpoint>,
    public_url: String,
    worker: EchoWorker,
}

/// Webhook relay session
///
/// Owns the event queue and, while running, the remote handle and the echo
/// worker. `configure` and `shutdown` are serialized; `submit` and the state
/// queries never wait on them.
pub struct RelaySession {
    connector: Arc<dyn RemoteConnector>,
    options: SessionOptions,
    queue: EventQueue,
    phase: AtomicU8,
    registered_url: RwLock<Option<String>>,
    lifecycle: Mutex<Lifecycle>,
}

impl RelaySession {
    /// Create an unconfigured session with default options
    pub fn new(connector: impl RemoteConnector + 'static) -> Self {
        Self::with_options(connector, SessionOptions::default())
    }

    /// Create an unconfigured session
    pub fn with_options(connector: impl RemoteConnector + 'static, options: SessionOptions) -> Self {
        Self {
            connector: Arc::new(connector),
            options,
            queue: EventQueue::new(),
            phase: AtomicU8::new(SessionState::Unconfigured as u8),
            registered_url: RwLock::new(None),
            lifecycle: Mutex::new(Lifecycle::Unconfigured),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SessionState) {
        self.phase.store(state as u8, Ordering::SeqCst);
    }

    /// Whether the session accepts events
    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// The webhook URL last reported by the platform
    pub fn registered_url(&self) -> Option<String> {
        self.registered_url
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_registered_url(&self, url: &str) {
        *self
            .registered_url
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(url.to_string());
    }

    /// Register the webhook and make sure the session is running
    ///
    /// The first successful call builds the remote handle and starts the echo
    /// worker. Later calls reuse both; they only re-register when `public_url`
    /// changed. Returns the webhook URL the platform reports.
    pub async fn configure(
        &self,
        credential: &str,
        public_url: &str,
        passphrase: Option<&str>,
    ) -> Result<String> {
        let mut lifecycle = self.lifecycle.lock().await;

        match &mut *lifecycle {
            Lifecycle::Stopped => {
                return Err(RelayError::not_running("configure", SessionState::Stopped));
            }
            Lifecycle::Running(running) => {
                return self.reconfigure(running, public_url, passphrase).await;
            }
            Lifecycle::Unconfigured => {}
        }

        let registering = RegisteringGuard::enter(&self.phase);
        let running = match self.start(credential, public_url, passphrase).await {
            Ok(running) => running,
            Err(e) => {
                tracing::warn!(url = %public_url, error = %e, "Webhook registration failed");
                return Err(e);
            }
        };

        // The consumer is taken inside `start` without a later await, so the
        // running state is stored in the same poll and survives cancellation.
        let remote = running.remote.clone();
        *lifecycle = Lifecycle::Running(running);
        self.set_registered_url(public_url);
        registering.finish(SessionState::Running);

        let url = self.query_webhook_url(&*remote, public_url).await;
        self.set_registered_url(&url);

        tracing::info!(url = %url, "Relay session running");
        Ok(url)
    }

    /// Registering → Running: build the handle, register, start the worker
    ///
    /// No await follows `take_consumer`; callers rely on that to store the
    /// result before they can be cancelled.
    async fn start(
        &self,
        credential: &str,
        public_url: &str,
        passphrase: Option<&str>,
    ) -> Result<RunningSession> {
        let remote = self.register(credential, public_url, passphrase).await?;
        let consumer = self.queue.take_consumer().ok_or(RelayError::QueueClosed)?;
        let worker = EchoWorker::spawn(remote.clone(), consumer, &self.options);

        Ok(RunningSession {
            remote,
            public_url: public_url.to_string(),
            worker,
        })
    }

    /// Repeat `configure` while running: re-register only on a new URL
    async fn reconfigure(
        &self,
        running: &mut RunningSession,
        public_url: &str,
        passphrase: Option<&str>,
    ) -> Result<String> {
        if running.public_url != public_url {
            bounded(
                self.options.outbound_timeout,
                "webhook registration",
                running.remote.register_webhook(public_url, passphrase),
            )
            .await
            .map_err(as_registration_error)?;

            tracing::info!(
                from = %running.public_url,
                to = %public_url,
                "Webhook re-registered"
            );
            running.public_url = public_url.to_string();
        }

        let url = self.query_webhook_url(&*running.remote, public_url).await;
        self.set_registered_url(&url);
        Ok(url)
    }

    async fn register(
        &self,
        credential: &str,
        public_url: &str,
        passphrase: Option<&str>,
    ) -> Result<Arc<dyn RemoteEndpoint>> {
        let remote = self
            .connector
            .connect(credential)
            .await
            .map_err(as_registration_error)?;

        bounded(
            self.options.outbound_timeout,
            "webhook registration",
            remote.register_webhook(public_url, passphrase),
        )
        .await
        .map_err(as_registration_error)?;

        Ok(remote)
    }

    /// Ask the platform for its webhook URL, falling back to what was registered
    async fn query_webhook_url(&self, remote: &dyn RemoteEndpoint, fallback: &str) -> String {
        match bounded(self.options.outbound_timeout, "webhook info", remote.webhook_url()).await {
            Ok(url) if !url.is_empty() => url,
            Ok(_) => fallback.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to query webhook info");
                fallback.to_string()
            }
        }
    }

    /// Enqueue a webhook payload for the echo worker
    ///
    /// Returns as soon as the payload is queued.
    pub fn submit(&self, payload: serde_json::Value) -> Result<()> {
        let state = self.state();
        if state != SessionState::Running {
            return Err(RelayError::not_running("submit", state));
        }

        let event = InboundEvent::new(payload);
        let event_id = event.id.clone();
        match self.queue.push(event) {
            Ok(()) => {
                tracing::debug!(event_id = %event_id, "Event queued");
                Ok(())
            }
            // Lost a race with shutdown: the worker already dropped the consumer
            Err(RelayError::QueueClosed) => Err(RelayError::not_running("submit", self.state())),
            Err(e) => Err(e),
        }
    }

    /// Stop the worker, release the remote handle, and enter `Stopped`
    ///
    /// Calling this on a session that is not running is an error, including
    /// a second shutdown.
    pub async fn shutdown(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;

        let running = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(running) => running,
            other => {
                *lifecycle = other;
                return Err(RelayError::not_running("shut down", self.state()));
            }
        };
        self.set_state(SessionState::Stopped);

        running.worker.stop().await;
        if let Err(e) = running.remote.close().await {
            tracing::warn!(error = %e, "Failed to close remote endpoint");
        }

        tracing::info!("Relay session stopped");
        Ok(())
    }
}

/// Holds the phase at `Registering`; resets it to `Unconfigured` when dropped
/// before [`RegisteringGuard::finish`], including when `configure` is cancelled
struct RegisteringGuard<'a> {
    phase: &'a AtomicU8,
    finished: bool,
}

impl<'a> RegisteringGuard<'a> {
    fn enter(phase: &'a AtomicU8) -> Self {
        phase.store(SessionState::Registering as u8, Ordering::SeqCst);
        Self {
            phase,
            finished: false,
        }
    }

    fn finish(mut self, state: SessionState) {
        self.phase.store(state as u8, Ordering::SeqCst);
        self.finished = true;
    }
}

impl Drop for RegisteringGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.phase
                .store(SessionState::Unconfigured as u8, Ordering::SeqCst);
        }
    }
}

fn as_registration_error(e: RelayError) -> RelayError {
    match e {
        RelayError::Registration(_) => e,
        other => RelayError::Registration(other.to_string()),
    }
}

/// Text to send back for a decoded message, if any
///
/// `bot_username` decides whether `/start@name` is addressed to this bot.
pub fn echo_reply(message: &IncomingMessage, bot_username: Option<&str>) -> Option<String> {
    if message.is_command("start", bot_username) {
        return Some(WELCOME_TEXT.to_string());
    }
    message.text.clone().filter(|text| !text.is_empty())
}

/// Background task draining the event queue one event at a time
struct EchoWorker {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl EchoWorker {
    fn spawn(
        remote: Arc<dyn RemoteEndpoint>,
        consumer: EventConsumer,
        options: &SessionOptions,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Self::run(
            remote,
            consumer,
            shutdown_rx,
            options.outbound_timeout,
            options.drain_timeout,
        ));
        Self {
            shutdown_tx,
            handle,
        }
    }

    async fn run(
        remote: Arc<dyn RemoteEndpoint>,
        mut consumer: EventConsumer,
        mut shutdown_rx: watch::Receiver<bool>,
        reply_timeout: Duration,
        drain_timeout: Duration,
    ) {
        tracing::info!(endpoint = remote.name(), "Echo worker started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                event = consumer.recv() => match event {
                    Some(event) => handle_event(&*remote, event, reply_timeout).await,
                    None => break,
                },
            }
        }

        let mut drained = 0usize;
        let finished = tokio::time::timeout(drain_timeout, async {
            while let Some(event) = consumer.try_recv() {
                handle_event(&*remote, event, reply_timeout).await;
                drained += 1;
            }
        })
        .await
        .is_ok();

        let dropped = consumer.discard();
        if finished {
            tracing::info!(drained, "Echo worker stopped");
        } else {
            tracing::warn!(drained, dropped, "Drain timed out, dropping queued events");
        }
    }

    async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Echo worker terminated abnormally");
        }
    }
}

async fn handle_event(remote: &dyn RemoteEndpoint, event: InboundEvent, reply_timeout: Duration) {
    let message = match remote.decode(&event) {
        Ok(Some(message)) => message,
        Ok(None) => {
            tracing::debug!(event_id = %event.id, "Event carries no message, skipping");
            return;
        }
        Err(e) => {
            tracing::warn!(event_id = %event.id, error = %e, "Failed to decode event");
            return;
        }
    };

    let username = remote.bot_username();
    let Some(text) = echo_reply(&message, username.as_deref()) else {
        tracing::debug!(event_id = %event.id, "Message has no text, skipping");
        return;
    };

    if let Err(e) = bounded(reply_timeout, "reply", remote.reply(&message, &text)).await {
        tracing::warn!(
            event_id = %event.id,
            chat_id = message.chat_id,
            error = %e,
            "Echo reply failed"
        );
    }
}
