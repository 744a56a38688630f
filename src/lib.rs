//! # a3s-relay
//!
//! Webhook relay with echo replies and a self-keepalive for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-relay` receives webhook-delivered updates from a messaging platform,
//! queues them, and answers each one with an echo. A keepalive scheduler
//! re-pings the service's own URL so hosts that suspend idle processes keep
//! it awake while traffic arrives.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_relay::RelaySession;
//! use a3s_relay::remote::memory::MemoryConnector;
//!
//! # async fn example() -> a3s_relay::Result<()> {
//! let connector = MemoryConnector::new();
//! let session = RelaySession::new(connector.clone());
//!
//! session.configure("bot-token", "https://relay.example.com/", None).await?;
//! session.submit(serde_json::json!({"text": "hi"}))?;
//!
//! session.shutdown().await?;
//! assert_eq!(connector.endpoint().replies()[0].text, "hi");
//! # Ok(())
//! # }
//! ```
//!
//! ## Remotes
//!
//! - **telegram** — Telegram Bot API over HTTPS
//! - **memory** — In-process endpoint for testing
//!
//! ## Architecture
//!
//! - **RelaySession** — lifecycle state machine owning the event queue and echo worker
//! - **EventQueue** — unbounded FIFO between the webhook route and the worker
//! - **RemoteEndpoint** trait — platform client the session registers and replies through
//! - **KeepaliveScheduler** — single-slot rearmable self-ping timer
//! - **api** — axum routes wiring the above together

pub mod api;
pub mod config;
pub mod error;
pub mod keepalive;
pub mod queue;
pub mod remote;
pub mod session;
pub mod types;

// Re-export core types
pub use api::{build_app, AppState};
pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use keepalive::{HttpPinger, KeepaliveScheduler, Pinger};
pub use queue::{EventConsumer, EventQueue};
pub use remote::{RemoteConnector, RemoteEndpoint};
pub use session::{RelaySession, SessionOptions};
pub use types::{InboundEvent, IncomingMessage, SessionState};

// Re-export remotes for convenience
pub use remote::memory::{MemoryConnector, MemoryEndpoint};
pub use remote::telegram::{TelegramConnector, TelegramEndpoint};
