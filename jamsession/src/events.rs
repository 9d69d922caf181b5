use tokio::sync::broadcast;

use crate::model::SessionEvent;

/// Capacity of the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast bus for session-level events.
///
/// Cloning the bus clones the sender side; every clone broadcasts into the
/// same channel. Receivers that fall behind lose events instead of blocking
/// the controller.
#[derive(Clone)]
pub struct SessionEventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionEventBus {
    pub fn new() -> Self {
        SessionEventBus {
            tx: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn broadcast(&self, event: SessionEvent) {
        // An error only means nobody is subscribed right now.
        let _ = self.tx.send(event);
    }
}

impl Default for SessionEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionId;

    #[tokio::test]
    async fn subscribers_receive_broadcasts() {
        let bus = SessionEventBus::new();
        let mut rx = bus.subscribe();

        bus.broadcast(SessionEvent::SessionClosed {
            id: SessionId::new("s1"),
        });

        match rx.try_recv().unwrap() {
            SessionEvent::SessionClosed { id } => assert_eq!(id, SessionId::new("s1")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_fine() {
        let bus = SessionEventBus::new();
        bus.broadcast(SessionEvent::SessionClosed {
            id: SessionId::new("s1"),
        });
    }
}
