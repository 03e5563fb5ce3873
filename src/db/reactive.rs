use std::collections::HashMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError, channel};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use uuid::Uuid;

use super::core::Db;
use super::types::{AuditEntry, AuditFilter};

/// Channel-style handle for a live audit window. Each received value is the
/// full, re-queried result window, never a delta; the latest one is
/// authoritative. Unsubscribes on drop.
pub struct AuditSubscriber {
    subscription_id: String,
    subscriptions: Weak<RwLock<HashMap<String, AuditFilter>>>,
    receiver: Receiver<Vec<AuditEntry>>,
}

impl AuditSubscriber {
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Vec<AuditEntry>, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn unsubscribe(&self) {
        remove_subscription(&self.subscriptions, &self.subscription_id);
    }
}

impl Drop for AuditSubscriber {
    fn drop(&mut self) {
        remove_subscription(&self.subscriptions, &self.subscription_id);
    }
}

/// Callback-style handle for a live audit window. Unsubscribes on drop.
pub struct AuditObserver {
    subscription_id: String,
    subscriptions: Weak<RwLock<HashMap<String, AuditFilter>>>,
}

impl AuditObserver {
    pub fn unsubscribe(&self) {
        remove_subscription(&self.subscriptions, &self.subscription_id);
    }
}

impl Drop for AuditObserver {
    fn drop(&mut self) {
        remove_subscription(&self.subscriptions, &self.subscription_id);
    }
}

fn remove_subscription(
    subscriptions: &Weak<RwLock<HashMap<String, AuditFilter>>>,
    subscription_id: &str,
) {
    if let Some(subscriptions) = subscriptions.upgrade() {
        if let Ok(mut subscriptions) = subscriptions.write() {
            subscriptions.remove(subscription_id);
        }
    }
}

impl Db {
    /// Push mode, channel style: delivers the current filtered window
    /// immediately, then the full re-queried window after every append that
    /// falls inside the filter. Dropping the subscriber (or calling
    /// `unsubscribe`) stops delivery; re-subscribing with a different filter
    /// means dropping the old handle first.
    pub fn subscribe_audit(&self, filter: AuditFilter) -> Result<AuditSubscriber> {
        let subscription_id = Uuid::now_v7().to_string();

        // Initial window; also validates the filter before registration
        let initial = self.query_audit(&filter)?;

        {
            let mut subscriptions = self
                .subscriptions
                .write()
                .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on subscriptions"))?;
            subscriptions.insert(subscription_id.clone(), filter);
        }

        // Register the raw observer before sending the initial window so it
        // is queued for the forwarding thread
        let rx = self.notifier.observer();
        self.notifier.notify(json!({
            "subscription_id": subscription_id,
            "window": initial,
        }));

        let (filtered_tx, filtered_rx) = channel::<Vec<AuditEntry>>();
        let target_subscription_id = subscription_id.clone();

        std::thread::spawn(move || {
            for notification in rx {
                if let Some(window) = window_for_subscription(&notification, &target_subscription_id)
                {
                    if filtered_tx.send(window).is_err() {
                        break;
                    }
                }
            }
        });

        Ok(AuditSubscriber {
            subscription_id,
            subscriptions: Arc::downgrade(&self.subscriptions),
            receiver: filtered_rx,
        })
    }

    /// Push mode, callback style: the initial window is delivered
    /// synchronously before this returns, updates arrive on a background
    /// thread with the same full-window semantics as [`Db::subscribe_audit`].
    pub fn observe_audit(
        &self,
        filter: AuditFilter,
        mut callback: impl FnMut(Vec<AuditEntry>) + Send + 'static,
    ) -> Result<AuditObserver> {
        let subscription_id = Uuid::now_v7().to_string();

        let initial = self.query_audit(&filter)?;

        {
            let mut subscriptions = self
                .subscriptions
                .write()
                .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on subscriptions"))?;
            subscriptions.insert(subscription_id.clone(), filter);
        }

        callback(initial);

        let target_subscription_id = subscription_id.clone();
        self.notifier.observe(move |notification| {
            if let Some(window) = window_for_subscription(&notification, &target_subscription_id) {
                callback(window);
            }
        });

        Ok(AuditObserver {
            subscription_id,
            subscriptions: Arc::downgrade(&self.subscriptions),
        })
    }

    /// Called after every committed append. Re-runs the stored query for
    /// each subscription whose filter the new entry falls into and publishes
    /// the fresh window.
    pub(crate) fn notify_audit_subscribers(&self, entry: &AuditEntry) -> Result<()> {
        let affected: Vec<(String, AuditFilter)> = {
            let subscriptions = self
                .subscriptions
                .read()
                .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on subscriptions"))?;
            subscriptions
                .iter()
                .filter(|(_, filter)| filter.matches(entry))
                .map(|(id, filter)| (id.clone(), filter.clone()))
                .collect()
        }; // Lock released before re-querying

        for (subscription_id, filter) in affected {
            let window = self.query_audit(&filter)?;
            self.notifier.notify(json!({
                "subscription_id": subscription_id,
                "window": window,
            }));
        }

        Ok(())
    }

    pub fn subscription_count(&self) -> Result<usize> {
        let subscriptions = self
            .subscriptions
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on subscriptions"))?;
        Ok(subscriptions.len())
    }
}

fn window_for_subscription(
    notification: &serde_json::Value,
    subscription_id: &str,
) -> Option<Vec<AuditEntry>> {
    let obj = notification.as_object()?;
    if obj.get("subscription_id").and_then(|v| v.as_str()) != Some(subscription_id) {
        return None;
    }
    let window = obj.get("window")?;
    serde_json::from_value::<Vec<AuditEntry>>(window.clone()).ok()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use crate::db::{AuditFilter, Db};

    #[test]
    fn subscriber_gets_the_initial_window() -> anyhow::Result<()> {
        let db = Db::open_memory()?;
        db.put_document(
            "clinic-1",
            "therapist-7",
            "button",
            "btn-1",
            &json!({"label": "agua"}),
        )?;

        let subscriber = db.subscribe_audit(AuditFilter::for_org("clinic-1"))?;
        let initial = subscriber.recv_timeout(Duration::from_millis(200))?;
        assert_eq!(initial.len(), 1);

        Ok(())
    }

    #[test]
    fn subscriber_gets_the_full_window_after_each_append() -> anyhow::Result<()> {
        let db = Db::open_memory()?;
        let subscriber = db.subscribe_audit(AuditFilter::for_org("clinic-1"))?;

        let initial = subscriber.recv_timeout(Duration::from_millis(200))?;
        assert_eq!(initial.len(), 0);

        db.put_document(
            "clinic-1",
            "therapist-7",
            "button",
            "btn-1",
            &json!({"label": "agua"}),
        )?;
        let window = subscriber.recv_timeout(Duration::from_millis(1000))?;
        assert_eq!(window.len(), 1);

        db.put_document(
            "clinic-1",
            "therapist-7",
            "button",
            "btn-2",
            &json!({"label": "pan"}),
        )?;
        let window = subscriber.recv_timeout(Duration::from_millis(1000))?;
        // Full window, not a delta
        assert_eq!(window.len(), 2);

        Ok(())
    }

    #[test]
    fn appends_outside_the_filter_do_not_deliver() -> anyhow::Result<()> {
        let db = Db::open_memory()?;
        let mut filter = AuditFilter::for_org("clinic-1");
        filter.document_type = Some("profile".to_string());
        let subscriber = db.subscribe_audit(filter)?;

        let _ = subscriber.recv_timeout(Duration::from_millis(200))?;

        db.put_document(
            "clinic-1",
            "therapist-7",
            "button",
            "btn-1",
            &json!({"label": "agua"}),
        )?;
        db.put_document(
            "clinic-2",
            "therapist-9",
            "profile",
            "pat-1",
            &json!({"name": "Juan"}),
        )?;

        assert!(
            subscriber
                .recv_timeout(Duration::from_millis(150))
                .is_err()
        );

        Ok(())
    }

    #[test]
    fn windows_respect_the_filter_limit() -> anyhow::Result<()> {
        let db = Db::open_memory()?;
        let mut filter = AuditFilter::for_org("clinic-1");
        filter.limit = Some(2);
        let subscriber = db.subscribe_audit(filter)?;

        let _ = subscriber.recv_timeout(Duration::from_millis(200))?;

        for i in 0..3 {
            db.put_document(
                "clinic-1",
                "therapist-7",
                "button",
                &format!("btn-{}", i),
                &json!({"label": i}),
            )?;
            std::thread::sleep(Duration::from_millis(2));
        }

        let mut last = Vec::new();
        while let Ok(window) = subscriber.recv_timeout(Duration::from_millis(300)) {
            last = window;
        }
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].document_id, "btn-2");

        Ok(())
    }

    #[test]
    fn unsubscribe_stops_delivery() -> anyhow::Result<()> {
        let db = Db::open_memory()?;
        let subscriber = db.subscribe_audit(AuditFilter::for_org("clinic-1"))?;
        let _ = subscriber.recv_timeout(Duration::from_millis(200))?;
        assert_eq!(db.subscription_count()?, 1);

        subscriber.unsubscribe();
        assert_eq!(db.subscription_count()?, 0);

        db.put_document(
            "clinic-1",
            "therapist-7",
            "button",
            "btn-1",
            &json!({"label": "agua"}),
        )?;
        assert!(
            subscriber
                .recv_timeout(Duration::from_millis(150))
                .is_err()
        );

        Ok(())
    }

    #[test]
    fn dropping_a_subscriber_cleans_up() -> anyhow::Result<()> {
        let db = Db::open_memory()?;

        {
            let _subscriber = db.subscribe_audit(AuditFilter::for_org("clinic-1"))?;
            assert_eq!(db.subscription_count()?, 1);
        } // subscriber drops here

        assert_eq!(db.subscription_count()?, 0);

        Ok(())
    }

    #[test]
    fn observer_callback_sees_initial_and_updated_windows() -> anyhow::Result<()> {
        let db = Db::open_memory()?;

        let windows = std::sync::Arc::new(std::sync::Mutex::new(Vec::<usize>::new()));
        let windows_clone = windows.clone();

        let _observer = db.observe_audit(AuditFilter::for_org("clinic-1"), move |window| {
            if let Ok(mut w) = windows_clone.lock() {
                w.push(window.len());
            }
        })?;

        // Give the observer thread time to start
        std::thread::sleep(Duration::from_millis(10));

        db.put_document(
            "clinic-1",
            "therapist-7",
            "button",
            "btn-1",
            &json!({"label": "agua"}),
        )?;

        std::thread::sleep(Duration::from_millis(100));

        let w = windows.lock().unwrap();
        assert_eq!(*w, vec![0, 1]);

        Ok(())
    }

    #[test]
    fn dropping_an_observer_cleans_up() -> anyhow::Result<()> {
        let db = Db::open_memory()?;

        {
            let _observer = db.observe_audit(AuditFilter::for_org("clinic-1"), |_| {})?;
            assert_eq!(db.subscription_count()?, 1);
        } // observer drops here

        assert_eq!(db.subscription_count()?, 0);

        Ok(())
    }
}
