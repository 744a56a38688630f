//! Remote endpoint trait — the messaging-platform client abstraction
//!
//! The relay never talks to the platform directly. A `RemoteConnector`
//! turns a credential into a `RemoteEndpoint`, which registers the webhook,
//! decodes inbound payloads, and sends replies.

use crate::error::{RelayError, Result};
use crate::types::{InboundEvent, IncomingMessage};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;
pub mod telegram;

/// Client for a single bot on the remote platform
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    /// Tell the platform to deliver updates to `url`
    ///
    /// A non-empty `secret` is passed along as the platform's webhook secret.
    async fn register_webhook(&self, url: &str, secret: Option<&str>) -> Result<()>;

    /// The webhook URL the platform currently has on record
    async fn webhook_url(&self) -> Result<String>;

    /// Decode a raw payload; `Ok(None)` means the update carries no message
    fn decode(&self, event: &InboundEvent) -> Result<Option<IncomingMessage>>;

    /// Send `text` to the chat the message came from
    async fn reply(&self, message: &IncomingMessage, text: &str) -> Result<()>;

    /// The bot's own username, once known
    ///
    /// Used to tell `/cmd@name` commands addressed to other bots apart.
    /// Default implementation knows none.
    fn bot_username(&self) -> Option<String> {
        None
    }

    /// Release any resources held by the client
    ///
    /// Default implementation does nothing.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Endpoint name (e.g., "telegram", "memory")
    fn name(&self) -> &str;
}

/// Builds a `RemoteEndpoint` from a bot credential
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Construct a client for the bot identified by `credential`
    async fn connect(&self, credential: &str) -> Result<Arc<dyn RemoteEndpoint>>;
}

/// Run an outbound call with an upper bound on its duration
pub(crate) async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RelayError::Timeout(format!(
            "{} exceeded {}ms",
            what,
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let value = bounded(Duration::from_secs(1), "noop", async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let result: Result<()> = bounded(Duration::from_millis(50), "slow call", async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        match result {
            Err(RelayError::Timeout(msg)) => assert!(msg.contains("slow call")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
