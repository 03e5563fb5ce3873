use std::{
    sync::{
        Arc, RwLock,
        mpsc::{Receiver, Sender, channel},
    },
    thread,
};

/// Fan-out broadcast used to deliver subscription notifications. Every
/// observer gets its own channel; senders whose receiver has been dropped
/// are pruned on the next notify.
#[derive(Clone)]
pub struct Notifier<Event: Send + Sync + Clone + 'static> {
    senders: Arc<RwLock<Vec<Sender<Event>>>>,
}

impl<Event: Send + Sync + Clone + 'static> Notifier<Event> {
    pub fn new() -> Self {
        Self {
            senders: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn notify(&self, event: Event) {
        let mut senders = self.senders.write().unwrap();
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn observer(&self) -> Receiver<Event> {
        let (tx, rx) = channel();
        self.senders.write().unwrap().push(tx);
        rx
    }

    /// Spawns a thread that feeds every future event to the callback. The
    /// thread exits when the notifier side hangs up.
    pub fn observe(&self, mut callback: impl FnMut(Event) + Send + 'static) {
        let rx = self.observer();
        thread::spawn(move || {
            rx.iter().for_each(|e| callback(e));
        });
    }

    pub fn observer_count(&self) -> usize {
        self.senders.read().unwrap().len()
    }
}

impl<Event: Send + Sync + Clone + 'static> Default for Notifier<Event> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Notifier;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn delivers_to_single_observer() {
        let notifier = Notifier::<String>::new();
        let rx = notifier.observer();

        notifier.notify("button saved".to_string());
        let received = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(received, "button saved");
    }

    #[test]
    fn delivers_to_every_observer() {
        let notifier = Notifier::<i64>::new();
        let rx1 = notifier.observer();
        let rx2 = notifier.observer();

        notifier.notify(7);

        assert_eq!(rx1.recv_timeout(Duration::from_millis(100)).unwrap(), 7);
        assert_eq!(rx2.recv_timeout(Duration::from_millis(100)).unwrap(), 7);
    }

    #[test]
    fn callback_observer_sees_all_events() {
        let notifier = Notifier::<String>::new();
        let received = Arc::new(Mutex::new(Vec::<String>::new()));
        let received_clone = received.clone();

        notifier.observe(move |event| {
            received_clone.lock().unwrap().push(event);
        });

        // Give the observer thread time to start
        std::thread::sleep(Duration::from_millis(10));

        notifier.notify("first".to_string());
        notifier.notify("second".to_string());

        std::thread::sleep(Duration::from_millis(50));

        let events = received.lock().unwrap();
        assert_eq!(*events, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn prunes_dropped_observers() {
        let notifier = Notifier::<String>::new();

        {
            let _rx = notifier.observer();
        } // receiver dropped here
        assert_eq!(notifier.observer_count(), 1);

        let rx_live = notifier.observer();
        notifier.notify("still here".to_string());

        assert_eq!(
            rx_live.recv_timeout(Duration::from_millis(100)).unwrap(),
            "still here"
        );
        assert_eq!(notifier.observer_count(), 1);
    }

    #[test]
    fn notify_without_observers_is_a_no_op() {
        let notifier = Notifier::<String>::new();
        notifier.notify("nobody listening".to_string());
    }

    #[test]
    fn clones_share_observers() {
        let notifier = Notifier::<String>::new();
        let other = notifier.clone();

        let rx = notifier.observer();
        other.notify("shared".to_string());

        assert_eq!(
            rx.recv_timeout(Duration::from_millis(100)).unwrap(),
            "shared"
        );
    }
}
