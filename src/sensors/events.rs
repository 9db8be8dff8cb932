//! Fan-out of sensor events to any number of subscribers.

use crossbeam::channel::{self, Receiver, Sender};
use tokio::sync::Mutex;

use crate::sensors::types::SensorEvent;

/// Delivers every published event to each live subscriber.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<SensorEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and return its receiving end.
    pub async fn subscribe(&self) -> Receiver<SensorEvent> {
        let (tx, rx) = crossbeam::channel::unbounded();
        self.subscribers.lock().await.push(tx);
        rx
    }

    /// Send an event to every subscriber, dropping those that hung up.
    pub async fn publish(&self, event: SensorEvent) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

/// Hand every event to `handler` until `stop` fires or all publishers are gone.
///
/// `stop` fires when its sender is dropped. Events already queued at that
/// point are still delivered. Blocks the calling thread.
pub fn forward_until_stopped<F>(events: &Receiver<SensorEvent>, stop: &Receiver<()>, mut handler: F)
where
    F: FnMut(SensorEvent),
{
    loop {
        channel::select! {
            recv(events) -> event => match event {
                Ok(event) => handler(event),
                Err(_) => return,
            },
            recv(stop) -> _ => {
                events.try_iter().for_each(&mut handler);
                return;
            }
        }
    }
}
