//! Subscription bookkeeping and fan-out.
//!
//! Each connection owns a bounded outbound queue. Publishing never waits on
//! a receiver: a full queue drops the event for that connection only, so a
//! slow client cannot hold up delivery to anyone else. Events from one
//! publisher are queued in call order, which gives per-sender ordering.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::events::{Role, ServerEvent};

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Role(Role),
    /// Connections that joined a vehicle (its driver and riders).
    Bus(String),
    /// Connections tracking a vehicle without riding it.
    BusWatch(String),
}

impl Topic {
    /// Topics whose members receive every event about `bus_id`.
    pub fn for_vehicle(bus_id: &str) -> [Topic; 3] {
        [
            Topic::Bus(bus_id.to_string()),
            Topic::BusWatch(bus_id.to_string()),
            Topic::Role(Role::Admin),
        ]
    }
}

/// Result of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub dropped: usize,
}

struct Connection {
    sender: mpsc::Sender<Arc<ServerEvent>>,
    topics: HashSet<Topic>,
}

#[derive(Default)]
struct Inner {
    topics: HashMap<Topic, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, Connection>,
}

pub struct TopicRouter {
    inner: RwLock<Inner>,
    buffer: usize,
}

impl TopicRouter {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            buffer: buffer.max(1),
        }
    }

    /// Registers a new connection and hands back the receiving end of its
    /// outbound queue.
    pub async fn register(&self) -> (ConnectionId, mpsc::Receiver<Arc<ServerEvent>>) {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(self.buffer);
        self.inner.write().await.connections.insert(
            id,
            Connection {
                sender,
                topics: HashSet::new(),
            },
        );
        debug!(connection = %id, "Connection registered");
        (id, receiver)
    }

    pub async fn join_role(&self, conn: ConnectionId, role: Role) -> bool {
        self.join(conn, Topic::Role(role)).await
    }

    pub async fn join_vehicle(&self, conn: ConnectionId, bus_id: &str) -> bool {
        self.join(conn, Topic::Bus(bus_id.to_string())).await
    }

    pub async fn subscribe_vehicle(&self, conn: ConnectionId, bus_id: &str) -> bool {
        self.join(conn, Topic::BusWatch(bus_id.to_string())).await
    }

    pub async fn unsubscribe_vehicle(&self, conn: ConnectionId, bus_id: &str) {
        let topic = Topic::BusWatch(bus_id.to_string());
        let mut inner = self.inner.write().await;
        if let Some(connection) = inner.connections.get_mut(&conn) {
            connection.topics.remove(&topic);
        }
        remove_member(&mut inner.topics, &topic, conn);
    }

    /// Returns `false` when the connection is unknown (already gone).
    async fn join(&self, conn: ConnectionId, topic: Topic) -> bool {
        let mut inner = self.inner.write().await;
        match inner.connections.get_mut(&conn) {
            Some(connection) => {
                connection.topics.insert(topic.clone());
            }
            None => return false,
        }
        debug!(connection = %conn, ?topic, "Joined topic");
        inner.topics.entry(topic).or_default().insert(conn);
        true
    }

    /// Tears down every membership of the connection.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let mut inner = self.inner.write().await;
        if let Some(connection) = inner.connections.remove(&conn) {
            for topic in &connection.topics {
                remove_member(&mut inner.topics, topic, conn);
            }
        }
        debug!(connection = %conn, "Connection removed");
    }

    /// Every connection that should see an event about `bus_id`.
    pub async fn recipients_for_vehicle(&self, bus_id: &str) -> HashSet<ConnectionId> {
        let inner = self.inner.read().await;
        collect(&inner, &Topic::for_vehicle(bus_id))
    }

    pub async fn publish_to_vehicle(&self, bus_id: &str, event: ServerEvent) -> FanOut {
        self.publish(&Topic::for_vehicle(bus_id), event).await
    }

    pub async fn publish_to_role(&self, role: Role, event: ServerEvent) -> FanOut {
        self.publish(&[Topic::Role(role)], event).await
    }

    /// Delivers `event` once to each connection that is a member of any of
    /// `topics`, however many of them it holds.
    pub async fn publish(&self, topics: &[Topic], event: ServerEvent) -> FanOut {
        let inner = self.inner.read().await;
        let recipients = collect(&inner, topics);
        let event = Arc::new(event);
        let mut fan_out = FanOut::default();
        for id in recipients {
            if let Some(connection) = inner.connections.get(&id) {
                if deliver(id, connection, &event) {
                    fan_out.delivered += 1;
                } else {
                    fan_out.dropped += 1;
                }
            }
        }
        debug!(event = event.name(), delivered = fan_out.delivered, dropped = fan_out.dropped, "Published");
        fan_out
    }

    /// Sends a reply to a single connection.
    pub async fn send_to(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        let inner = self.inner.read().await;
        match inner.connections.get(&conn) {
            Some(connection) => deliver(conn, connection, &Arc::new(event)),
            None => false,
        }
    }

    pub async fn topics_of(&self, conn: ConnectionId) -> HashSet<Topic> {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(&conn)
            .map(|c| c.topics.clone())
            .unwrap_or_default()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}

fn collect(inner: &Inner, topics: &[Topic]) -> HashSet<ConnectionId> {
    topics
        .iter()
        .filter_map(|topic| inner.topics.get(topic))
        .flatten()
        .copied()
        .collect()
}

fn remove_member(topics: &mut HashMap<Topic, HashSet<ConnectionId>>, topic: &Topic, conn: ConnectionId) {
    if let Some(members) = topics.get_mut(topic) {
        members.remove(&conn);
        if members.is_empty() {
            topics.remove(topic);
        }
    }
}

fn deliver(id: ConnectionId, connection: &Connection, event: &Arc<ServerEvent>) -> bool {
    match connection.sender.try_send(event.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(connection = %id, event = event.name(), "Outbound queue full, dropping event");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}
