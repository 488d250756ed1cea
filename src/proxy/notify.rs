//! Store-changed notification channel

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cadence of the activity-independent refresh signal, catching status
/// transitions that complete asynchronously without a capture event.
pub const REFRESH_TICK: Duration = Duration::from_millis(200);

/// Signal-only "something changed, re-render" primitive.
///
/// Rapid changes coalesce: the payload is a version counter with no meaning
/// beyond waking subscribers, who must re-derive state from
/// `CaptureStore::snapshot()` rather than trust the signal's contents.
#[derive(Clone)]
pub struct ChangeNotifier {
    tx: Arc<watch::Sender<u64>>,
}

/// Subscriber end; awaits the next (possibly coalesced) change.
pub struct ChangeListener {
    rx: watch::Receiver<u64>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Fire-and-forget change signal; no-op without subscribers.
    pub fn notify(&self) {
        self.tx.send_modify(|version| *version = version.wrapping_add(1));
    }

    pub fn subscribe(&self) -> ChangeListener {
        ChangeListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Spawn the periodic low-frequency signal; runs until aborted.
    pub fn spawn_ticker(&self, period: Duration) -> JoinHandle<()> {
        let notifier = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick fires immediately; harmless for a refresh signal.
            loop {
                interval.tick().await;
                notifier.notify();
            }
        })
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeListener {
    /// Wait for the next change signal. Returns false once every notifier
    /// handle (including the ticker) is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_notify_wakes_subscriber() {
        let notifier = ChangeNotifier::new();
        let mut listener = notifier.subscribe();

        notifier.notify();
        assert!(timeout(Duration::from_secs(1), listener.changed())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_rapid_changes_coalesce() {
        let notifier = ChangeNotifier::new();
        let mut listener = notifier.subscribe();

        notifier.notify();
        notifier.notify();
        notifier.notify();

        assert!(listener.changed().await);
        // All three collapsed into one wakeup; nothing else is pending.
        assert!(timeout(Duration::from_millis(50), listener.changed())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_ticker_fires_without_activity() {
        let notifier = ChangeNotifier::new();
        let mut listener = notifier.subscribe();
        let ticker = notifier.spawn_ticker(Duration::from_millis(10));

        assert!(timeout(Duration::from_secs(1), listener.changed())
            .await
            .unwrap());
        assert!(timeout(Duration::from_secs(1), listener.changed())
            .await
            .unwrap());

        ticker.abort();
    }

    #[tokio::test]
    async fn test_listener_ends_when_notifier_dropped() {
        let notifier = ChangeNotifier::new();
        let mut listener = notifier.subscribe();
        drop(notifier);

        assert!(!listener.changed().await);
    }
}
