//! Self-keepalive scheduler
//!
//! Holds at most one pending delayed ping. Every `arm` cancels the pending
//! trigger and schedules a fresh one, so the countdown restarts on each call.
//! When the ping targets the service's own `/ping` route, the fired request
//! arms the next trigger and the chain sustains itself while requests keep
//! arriving inside the window.

use crate::error::{RelayError, Result};
use crate::remote::bounded;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Performs the outbound keepalive request
#[async_trait]
pub trait Pinger: Send + Sync {
    /// Issue one request to `url`
    async fn ping(&self, url: &str) -> Result<()>;
}

/// `Pinger` issuing a plain HTTP GET
#[derive(Clone)]
pub struct HttpPinger {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpPinger {
    /// Create a pinger whose requests are bounded by `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl Default for HttpPinger {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

#[async_trait]
impl Pinger for HttpPinger {
    async fn ping(&self, url: &str) -> Result<()> {
        bounded(self.timeout, "keepalive ping", async {
            let resp = self.client.get(url).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(RelayError::Remote(format!(
                    "Keepalive ping to {} returned {}",
                    url, status
                )));
            }
            Ok(())
        })
        .await
    }
}

/// Convert a period in seconds
///
/// Zero, negative, non-finite, and out-of-range values disable arming.
pub fn period_from_secs(secs: f64) -> Option<Duration> {
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

/// Whether a trigger armed now with `period` would have a representable deadline
pub fn period_is_schedulable(period: Duration) -> bool {
    Instant::now().checked_add(period).is_some()
}

struct Trigger {
    cancel_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    deadline: Instant,
    fired: Arc<AtomicBool>,
}

impl Trigger {
    fn spawn(pinger: Arc<dyn Pinger>, url: String, deadline: Instant) -> Self {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let fired = Arc::new(AtomicBool::new(false));

        let fired_flag = fired.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel_rx => {
                    tracing::trace!(url = %url, "Keepalive trigger cancelled");
                    return;
                }
                _ = tokio::time::sleep_until(deadline) => {}
            }

            fired_flag.store(true, Ordering::SeqCst);
            tracing::debug!(url = %url, "Keepalive trigger fired");
            if let Err(e) = pinger.ping(&url).await {
                tracing::warn!(url = %url, error = %e, "Keepalive ping failed");
            }
        });

        Self {
            cancel_tx,
            handle,
            deadline,
            fired,
        }
    }

    fn is_pending(&self) -> bool {
        !self.fired.load(Ordering::SeqCst) && !self.handle.is_finished()
    }

    /// Signal cancellation; a trigger that already fired finishes its ping
    fn cancel(self) -> JoinHandle<()> {
        let _ = self.cancel_tx.send(());
        self.handle
    }
}

struct Slot {
    period: Option<Duration>,
    trigger: Option<Trigger>,
    /// Cancelled or fired triggers that may still be running
    retired: Vec<JoinHandle<()>>,
}

impl Slot {
    fn retire_current(&mut self) {
        self.retired.retain(|h| !h.is_finished());
        if let Some(trigger) = self.trigger.take() {
            self.retired.push(trigger.cancel());
        }
    }
}

/// Single-slot rearmable keepalive timer
pub struct KeepaliveScheduler {
    pinger: Arc<dyn Pinger>,
    slot: Mutex<Slot>,
}

impl KeepaliveScheduler {
    /// Create a scheduler; `period_secs` of 0 disables arming
    pub fn new(period_secs: f64, pinger: impl Pinger + 'static) -> Self {
        Self::with_period(period_from_secs(period_secs), pinger)
    }

    /// Create a scheduler with an explicit period
    pub fn with_period(period: Option<Duration>, pinger: impl Pinger + 'static) -> Self {
        Self {
            pinger: Arc::new(pinger),
            slot: Mutex::new(Slot {
                period,
                trigger: None,
                retired: Vec::new(),
            }),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current period, `None` once disabled
    pub fn period(&self) -> Option<Duration> {
        self.slot().period
    }

    /// Whether a trigger is scheduled and has not fired yet
    pub fn is_armed(&self) -> bool {
        self.slot().trigger.as_ref().is_some_and(Trigger::is_pending)
    }

    /// When the pending trigger will fire
    pub fn deadline(&self) -> Option<Instant> {
        self.slot()
            .trigger
            .as_ref()
            .filter(|t| t.is_pending())
            .map(|t| t.deadline)
    }

    /// Replace any pending trigger with one that pings `url` after the period
    ///
    /// A no-op after `shutdown`. Must be called from within a tokio runtime.
    pub fn arm(&self, url: &str) {
        let mut slot = self.slot();
        slot.retire_current();

        let Some(period) = slot.period else {
            tracing::debug!(url = %url, "Keepalive disabled, not arming");
            return;
        };

        let Some(deadline) = Instant::now().checked_add(period) else {
            tracing::warn!(
                url = %url,
                period_secs = period.as_secs(),
                "Keepalive period overflows the clock, not arming"
            );
            return;
        };

        slot.trigger = Some(Trigger::spawn(self.pinger.clone(), url.to_string(), deadline));
        tracing::debug!(url = %url, period_ms = period.as_millis() as u64, "Keepalive armed");
    }

    /// Cancel the pending trigger
    ///
    /// With `wait`, also waits until every cancelled or fired trigger has
    /// finished, including a ping that is already in flight.
    pub async fn cancel(&self, wait: bool) {
        let handles = {
            let mut slot = self.slot();
            slot.retire_current();
            if !wait {
                return;
            }
            std::mem::take(&mut slot.retired)
        };

        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::warn!(error = %e, "Keepalive trigger panicked");
                }
            }
        }
    }

    /// Disable arming for good and wait for all trigger activity to settle
    pub async fn shutdown(&self) {
        self.slot().period = None;
        self.cancel(true).await;
        tracing::info!("Keepalive scheduler stopped");
    }
}

impl Drop for KeepaliveScheduler {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(trigger) = slot.trigger.take() {
            let _ = trigger.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct RecordingPinger {
        tx: mpsc::UnboundedSender<(String, Instant)>,
    }

    #[async_trait]
    impl Pinger for RecordingPinger {
        async fn ping(&self, url: &str) -> Result<()> {
            let _ = self.tx.send((url.to_string(), Instant::now()));
            Ok(())
        }
    }

    fn recording(period_secs: f64) -> (KeepaliveScheduler, mpsc::UnboundedReceiver<(String, Instant)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (KeepaliveScheduler::new(period_secs, RecordingPinger { tx }), rx)
    }

    #[test]
    fn test_period_from_secs() {
        assert_eq!(period_from_secs(300.0), Some(Duration::from_secs(300)));
        assert_eq!(period_from_secs(0.5), Some(Duration::from_millis(500)));
        assert_eq!(period_from_secs(0.0), None);
        assert_eq!(period_from_secs(-1.0), None);
        assert_eq!(period_from_secs(f64::NAN), None);
        assert_eq!(period_from_secs(f64::INFINITY), None);
        assert_eq!(period_from_secs(1e30), None);
        assert!(period_from_secs(1e19).is_some());
    }

    #[test]
    fn test_period_is_schedulable() {
        assert!(period_is_schedulable(Duration::from_secs(300)));
        assert!(!period_is_schedulable(Duration::MAX));
    }

    #[tokio::test]
    async fn test_unrepresentable_period_disables() {
        let (scheduler, _rx) = recording(1e30);
        assert!(scheduler.period().is_none());
        scheduler.arm("http://x/ping");
        assert!(!scheduler.is_armed());
    }

    #[tokio::test]
    async fn test_overflowing_deadline_does_not_arm() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let scheduler = KeepaliveScheduler::with_period(Some(Duration::MAX), RecordingPinger { tx });

        scheduler.arm("http://x/ping");
        assert!(!scheduler.is_armed());
        assert!(scheduler.deadline().is_none());

        let (tx, _rx) = mpsc::unbounded_channel();
        let scheduler = KeepaliveScheduler::new(1e19, RecordingPinger { tx });
        scheduler.arm("http://x/ping");
        assert!(!scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_fires_after_period() {
        let (scheduler, mut rx) = recording(300.0);
        let start = Instant::now();

        scheduler.arm("http://x/ping");
        assert!(scheduler.is_armed());
        assert_eq!(scheduler.deadline(), Some(start + Duration::from_secs(300)));

        let (url, fired_at) = rx.recv().await.unwrap();
        assert_eq!(url, "http://x/ping");
        assert_eq!(fired_at - start, Duration::from_secs(300));
        assert!(!scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_restarts_countdown() {
        let (scheduler, mut rx) = recording(300.0);
        let start = Instant::now();

        scheduler.arm("http://x/ping");
        tokio::time::sleep(Duration::from_secs(100)).await;
        scheduler.arm("http://x/ping");

        let (_, fired_at) = rx.recv().await.unwrap();
        assert_eq!(fired_at - start, Duration::from_secs(400));

        tokio::time::sleep(Duration::from_secs(1000)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_arms_leave_one_trigger() {
        let (scheduler, mut rx) = recording(10.0);

        for i in 0..50 {
            scheduler.arm(&format!("http://x/ping?n={}", i));
            assert!(scheduler.is_armed());
        }

        let (url, _) = rx.recv().await.unwrap();
        assert_eq!(url, "http://x/ping?n=49");

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_never_arms() {
        let (scheduler, mut rx) = recording(0.0);
        scheduler.arm("http://x/ping");

        assert!(!scheduler.is_armed());
        assert!(scheduler.period().is_none());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_without_wait() {
        let (scheduler, mut rx) = recording(5.0);
        scheduler.arm("http://x/ping");
        scheduler.cancel(false).await;

        assert!(!scheduler.is_armed());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());

        scheduler.arm("http://x/ping");
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_disables_arm() {
        let (scheduler, mut rx) = recording(5.0);
        scheduler.arm("http://x/ping");
        scheduler.shutdown().await;

        assert!(scheduler.period().is_none());
        scheduler.arm("http://x/ping");
        assert!(!scheduler.is_armed());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }

    struct SlowPinger {
        done: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Pinger for SlowPinger {
        async fn ping(&self, _url: &str) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(2)).await;
            self.done.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_ping() {
        let done = Arc::new(AtomicBool::new(false));
        let scheduler = KeepaliveScheduler::new(1.0, SlowPinger { done: done.clone() });

        scheduler.arm("http://x/ping");
        // Past the deadline, the ping is now mid-flight
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!scheduler.is_armed());
        assert!(!done.load(Ordering::SeqCst));

        scheduler.shutdown().await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_during_in_flight_ping_does_not_cut_it() {
        let done = Arc::new(AtomicBool::new(false));
        let scheduler = KeepaliveScheduler::new(1.0, SlowPinger { done: done.clone() });

        scheduler.arm("http://x/ping");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        scheduler.arm("http://x/ping");
        assert!(scheduler.is_armed());

        // First ping settles at t=3.0 while the new trigger fires at t=2.5
        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert!(done.load(Ordering::SeqCst));
        scheduler.shutdown().await;
    }
}
