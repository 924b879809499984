// Change notifications for the UI layer
// Every store publishes here right after its mutation has committed

use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    PlaybackStateChanged,
    PlaybackProgressChanged { position: f64, duration: f64 },
    PlaylistsChanged,
    FavoritesChanged,
    SleepTimerChanged { active: bool },
}

/// Fan-out of `CoreEvent`s to any number of subscribers.
///
/// `emit` is synchronous: by the time it returns, the event sits in every
/// live subscriber's channel. Subscribers that dropped their receiver are
/// pruned on the next emit.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<CoreEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CoreEvent> {
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        self.lock().push(event_sender);
        event_receiver
    }

    pub fn emit(&self, event: CoreEvent) {
        let mut subscribers = self.lock();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<CoreEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
