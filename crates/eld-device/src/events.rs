//! # Link Event Bus
//!
//! Fan-out of vendor link events to every interested listener.
//!
//! ```text
//!                        ┌──► Subscription (connect attempt)
//! DeviceLink ─ publish ──┼──► Subscription (scan session)
//!                        └──► Subscription (notify pump)
//! ```
//!
//! Each [`Subscription`] decrements the live listener count when dropped, so
//! leaked listeners are observable through [`EventBus::listener_count`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use eld_core::DeviceIdentity;

/// Named signals emitted by a device link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    DeviceScanned(DeviceIdentity),
    Connected,
    Disconnected,
    ConnectFailure { status: i32, message: String },
    AuthenticationPassed,
    NotifyReceived(Vec<u8>),
    PasswordStateChecked { is_set: bool },
    PasswordVerifyResult { success: bool },
    PasswordSetResult { is_success: bool },
}

const DEFAULT_CAPACITY: usize = 256;

/// Broadcast bus owned by a link implementation.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LinkEvent>,
    active: Arc<AtomicUsize>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBus {
            tx,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publishes an event. Events with no listeners are discarded.
    pub fn publish(&self, event: LinkEvent) {
        let _ = self.tx.send(event);
    }

    /// Registers a listener. Only events published after this call are seen.
    pub fn subscribe(&self) -> Subscription {
        self.active.fetch_add(1, Ordering::SeqCst);
        Subscription {
            rx: self.tx.subscribe(),
            active: Arc::clone(&self.active),
        }
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// A live listener on an [`EventBus`]. Unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<LinkEvent>,
    active: Arc<AtomicUsize>,
}

impl Subscription {
    /// Waits for the next event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Link event listener lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscription_counts_and_delivery() {
        let bus = EventBus::default();
        assert_eq!(bus.listener_count(), 0);

        let mut a = bus.subscribe();
        let b = bus.subscribe();
        assert_eq!(bus.listener_count(), 2);

        bus.publish(LinkEvent::Connected);
        assert_eq!(a.recv().await, Some(LinkEvent::Connected));

        drop(b);
        assert_eq!(bus.listener_count(), 1);
        drop(a);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::default();
        bus.publish(LinkEvent::Connected);

        let mut sub = bus.subscribe();
        bus.publish(LinkEvent::AuthenticationPassed);
        assert_eq!(sub.recv().await, Some(LinkEvent::AuthenticationPassed));
    }
}
