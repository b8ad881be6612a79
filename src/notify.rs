use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-worker broadcast of applied events, backing `LISTEN worker_<id>`.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a worker's changes. Creates the channel if needed.
    pub fn subscribe(&self, worker_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(worker_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, worker_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&worker_id) {
            let _ = sender.send(event.clone());
        }
        if let Event::WorkerRemoved { id } = event {
            self.channels.remove(id);
        }
    }

    pub fn listeners(&self, worker_id: &Ulid) -> usize {
        self.channels
            .get(worker_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let wid = Ulid::new();
        let mut rx = hub.subscribe(wid);

        let event = Event::AppointmentCancelled {
            id: Ulid::new(),
            worker_id: wid,
        };
        hub.send(wid, &event);

        assert_eq!(rx.recv().await.unwrap(), event);
        assert_eq!(hub.listeners(&wid), 1);
    }

    #[tokio::test]
    async fn other_workers_are_not_notified() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(Ulid::new());
        let other = Ulid::new();
        hub.send(other, &Event::WorkerAdded { id: other, name: "Bo".into() });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn removing_a_worker_closes_its_channel() {
        let hub = NotifyHub::new();
        let wid = Ulid::new();
        let mut rx = hub.subscribe(wid);
        hub.send(wid, &Event::WorkerRemoved { id: wid });
        assert_eq!(rx.recv().await.unwrap(), Event::WorkerRemoved { id: wid });
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert_eq!(hub.listeners(&wid), 0);
    }
}
