//! Per-device operation serialization

use playclock_util::DeviceId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per device.
///
/// Every mutating session operation holds its device's lock across the whole
/// read-check-write, so transitions on one device serialize while unrelated
/// devices proceed concurrently. Notices are published before the lock is
/// released, which makes per-device notice order match commit order.
#[derive(Debug, Default)]
pub struct DeviceLocks {
    locks: StdMutex<HashMap<DeviceId, Arc<Mutex<()>>>>,
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a device, creating it on first use. Locks are
    /// never removed; the map is bounded by the configured device catalog.
    pub async fn acquire(&self, device_id: &DeviceId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            locks.entry(device_id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_device_operations_serialize() {
        let locks = Arc::new(DeviceLocks::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.acquire(&"ps5-1".into()).await;
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_devices_do_not_block_each_other() {
        let locks = Arc::new(DeviceLocks::new());

        let held = locks.acquire(&"pc-1".into()).await;

        // Acquiring another device's lock must complete immediately
        let other = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(&"pc-2".into()),
        )
        .await;
        assert!(other.is_ok());

        drop(held);
    }

    #[tokio::test]
    async fn lock_is_reacquirable_after_release() {
        let locks = DeviceLocks::new();

        let first = locks.acquire(&"pc-1".into()).await;
        drop(first);
        let _second = locks.acquire(&"pc-1".into()).await;
    }
}
