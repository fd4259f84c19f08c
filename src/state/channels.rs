use std::fmt;

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dto::sse::ServerEvent;

/// Logical audience of a session. Each variant is its own routing-table
/// entry, so leaving one never affects subscribers of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Shared big-screen display.
    Display(Uuid),
    /// Host controller.
    Controller(Uuid),
    /// Every participant of the session.
    Participants(Uuid),
    /// One participant.
    Participant {
        session_id: Uuid,
        participant_id: Uuid,
    },
}

impl Channel {
    /// Session the channel belongs to.
    pub fn session_id(&self) -> Uuid {
        match *self {
            Channel::Display(session_id)
            | Channel::Controller(session_id)
            | Channel::Participants(session_id)
            | Channel::Participant { session_id, .. } => session_id,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Display(session_id) => write!(f, "session:{session_id}:display"),
            Channel::Controller(session_id) => write!(f, "session:{session_id}:controller"),
            Channel::Participants(session_id) => write!(f, "session:{session_id}:participants"),
            Channel::Participant {
                session_id,
                participant_id,
            } => write!(f, "session:{session_id}:participant:{participant_id}"),
        }
    }
}

/// Simple broadcast hub wrapper; every subscriber owns an independent receiver.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, returning how many received it.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Routing table from channel to hub, created lazily on first use.
pub struct ChannelRegistry {
    hubs: DashMap<Channel, SseHub>,
    capacity: usize,
}

impl ChannelRegistry {
    /// Build an empty registry whose hubs buffer `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            hubs: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Join a channel.
    pub fn subscribe(&self, channel: Channel) -> broadcast::Receiver<ServerEvent> {
        self.hubs
            .entry(channel)
            .or_insert_with(|| SseHub::new(self.capacity))
            .subscribe()
    }

    /// Publish to a channel; returns the number of subscribers reached.
    pub fn publish(&self, channel: Channel, event: ServerEvent) -> usize {
        match self.hubs.get(&channel) {
            Some(hub) => hub.broadcast(event),
            None => 0,
        }
    }

    /// Participant channels currently routed for a session.
    pub fn participant_channels(&self, session_id: Uuid) -> Vec<Channel> {
        self.hubs
            .iter()
            .map(|entry| *entry.key())
            .filter(|channel| {
                matches!(channel, Channel::Participant { session_id: id, .. } if *id == session_id)
            })
            .collect()
    }

    /// Drop every hub of a session, closing its subscriber streams.
    pub fn close_session(&self, session_id: Uuid) {
        self.hubs.retain(|channel, _| channel.session_id() != session_id);
    }

    /// Subscribers of one channel.
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.hubs
            .get(&channel)
            .map(|hub| hub.receiver_count())
            .unwrap_or(0)
    }

    /// Subscribers across every channel.
    pub fn total_subscribers(&self) -> usize {
        self.hubs.iter().map(|hub| hub.receiver_count()).sum()
    }

    /// Sessions that currently have at least one routed channel.
    pub fn active_sessions(&self) -> Vec<Uuid> {
        let mut sessions: Vec<Uuid> = self
            .hubs
            .iter()
            .map(|entry| entry.key().session_id())
            .collect();
        sessions.sort();
        sessions.dedup();
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str) -> ServerEvent {
        ServerEvent::new(Some(name.to_string()), "{}".to_string())
    }

    #[tokio::test]
    async fn dropping_one_participant_keeps_others_subscribed() {
        let registry = ChannelRegistry::new(8);
        let session_id = Uuid::new_v4();
        let first = Channel::Participant {
            session_id,
            participant_id: Uuid::new_v4(),
        };
        let second = Channel::Participant {
            session_id,
            participant_id: Uuid::new_v4(),
        };

        let dropped = registry.subscribe(first);
        let mut kept = registry.subscribe(second);
        let mut all_a = registry.subscribe(Channel::Participants(session_id));
        let mut all_b = registry.subscribe(Channel::Participants(session_id));
        drop(dropped);

        assert_eq!(registry.publish(second, event("answer_result")), 1);
        assert_eq!(registry.publish(Channel::Participants(session_id), event("x")), 2);
        assert_eq!(kept.recv().await.unwrap().event.as_deref(), Some("answer_result"));
        assert!(all_a.recv().await.is_ok());
        assert!(all_b.recv().await.is_ok());
        assert_eq!(registry.subscriber_count(first), 0);
    }

    #[test]
    fn publishing_to_unknown_channel_reaches_nobody() {
        let registry = ChannelRegistry::new(8);
        assert_eq!(registry.publish(Channel::Display(Uuid::new_v4()), event("x")), 0);
    }

    #[test]
    fn close_session_only_drops_that_session() {
        let registry = ChannelRegistry::new(8);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let _ra = registry.subscribe(Channel::Display(a));
        let _rb = registry.subscribe(Channel::Controller(b));
        registry.close_session(a);
        assert_eq!(registry.active_sessions(), vec![b]);
    }

    #[test]
    fn channel_names_are_stable() {
        let session_id = Uuid::nil();
        assert_eq!(
            Channel::Controller(session_id).to_string(),
            format!("session:{session_id}:controller")
        );
    }
}
