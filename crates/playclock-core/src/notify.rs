//! Change notification fan-out

use playclock_util::DeviceId;
use tokio::sync::broadcast;

/// Default broadcast channel capacity. A receiver that falls more than this
/// many notices behind observes a lag error and must resynchronize by
/// re-fetching state.
pub const DEFAULT_NOTICE_CAPACITY: usize = 256;

/// A state-change notice published by the engine.
///
/// Notices carry no session data. Observers treat them as an invalidation
/// signal and re-fetch the device snapshot, so a missed notice degrades to
/// polling rather than to wrong state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The session or connectivity of this device changed
    DeviceChanged { device_id: DeviceId },
    /// This device's session ran out of time
    TimeOver { device_id: DeviceId },
}

impl Notice {
    pub fn device_id(&self) -> &DeviceId {
        match self {
            Notice::DeviceChanged { device_id } => device_id,
            Notice::TimeOver { device_id } => device_id,
        }
    }
}

/// Broadcast sender for engine notices.
///
/// Publishing is fire and forget: it never blocks the engine, and with no
/// subscribers the notice is dropped. Clones share one channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn device_changed(&self, device_id: &DeviceId) {
        self.publish(Notice::DeviceChanged {
            device_id: device_id.clone(),
        });
    }

    pub fn time_over(&self, device_id: &DeviceId) {
        self.publish(Notice::TimeOver {
            device_id: device_id.clone(),
        });
    }

    fn publish(&self, notice: Notice) {
        // Err only means there are no subscribers right now
        let _ = self.tx.send(notice);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_NOTICE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_notices_in_order() {
        let notifier = Notifier::default();
        let mut rx = notifier.subscribe();

        let device: DeviceId = "ps5-1".into();
        notifier.device_changed(&device);
        notifier.time_over(&device);

        assert_eq!(
            rx.recv().await.unwrap(),
            Notice::DeviceChanged {
                device_id: device.clone()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            Notice::TimeOver { device_id: device }
        );
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let notifier = Notifier::default();
        assert_eq!(notifier.subscriber_count(), 0);

        // Must not panic or block
        notifier.device_changed(&"pc-1".into());
        notifier.time_over(&"pc-1".into());
    }

    #[tokio::test]
    async fn each_subscriber_sees_every_notice() {
        let notifier = Notifier::default();
        let mut rx1 = notifier.subscribe();
        let mut rx2 = notifier.subscribe();

        notifier.device_changed(&"pc-1".into());

        assert_eq!(rx1.recv().await.unwrap().device_id().as_str(), "pc-1");
        assert_eq!(rx2.recv().await.unwrap().device_id().as_str(), "pc-1");
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking_publish() {
        let notifier = Notifier::new(2);
        let mut rx = notifier.subscribe();

        for _ in 0..5 {
            notifier.device_changed(&"pc-1".into());
        }

        // The receiver first learns that it fell behind, then catches up
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped >= 1),
            other => panic!("expected lag, got {other:?}"),
        }
        assert!(rx.recv().await.is_ok());
    }
}
