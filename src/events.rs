//! Typed change notifications from the identity service.

use tokio::sync::broadcast;
use tracing::debug;

use crate::types::IdentityBytes;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    /// The set of owned identities changed.
    OwnedIdentitiesChanged,
    OwnedIdentityChanged(IdentityBytes),
    ContactsChanged(IdentityBytes),
    GroupsChanged(IdentityBytes),
}

impl IdentityEvent {
    /// The owned identity the event is scoped to, `None` for every owner.
    pub fn owner(&self) -> Option<&IdentityBytes> {
        match self {
            Self::OwnedIdentitiesChanged => None,
            Self::OwnedIdentityChanged(owner)
            | Self::ContactsChanged(owner)
            | Self::GroupsChanged(owner) => Some(owner),
        }
    }
}

/// Publish/subscribe channel carrying [`IdentityEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<IdentityEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns the number of subscribers that will see the event.
    pub fn publish(&self, event: IdentityEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                debug!(?event, "No subscriber for identity event");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(IdentityEvent::OwnedIdentitiesChanged), 0);

        let mut receiver = bus.subscribe();
        let owner = IdentityBytes(vec![1]);
        assert_eq!(bus.publish(IdentityEvent::ContactsChanged(owner.clone())), 1);

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.owner(), Some(&owner));
    }
}
