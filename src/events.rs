//! Server-pushed events and their fan-out.
//!
//! A connection owns one broadcast channel. Every EVENT frame (stream id
//! -1) is published to it; each subscriber created through
//! [`Connection::register`](crate::Connection::register) receives every
//! event from the moment it subscribed. The channel is lag-bound: a
//! subscriber that falls behind the configured capacity loses its oldest
//! events and the stream resumes, so a slow consumer never blocks
//! request/response traffic.

use std::{
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use log::warn;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

/// Event classes a connection can subscribe to with REGISTER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Nodes joining or leaving the cluster.
    TopologyChange,
    /// Nodes transitioning between up and down.
    StatusChange,
    /// Schema objects created, updated or dropped.
    SchemaChange,
}

impl EventType {
    pub(crate) fn as_protocol_str(self) -> &'static str {
        match self {
            EventType::TopologyChange => "TOPOLOGY_CHANGE",
            EventType::StatusChange => "STATUS_CHANGE",
            EventType::SchemaChange => "SCHEMA_CHANGE",
        }
    }
}

/// Direction of a cluster membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeChange {
    NewNode,
    RemovedNode,
}

/// Liveness transition of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Up,
    Down,
}

/// What kind of schema alteration happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaChangeKind {
    Created,
    Updated,
    Dropped,
}

/// The schema object an alteration applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaTarget {
    Keyspace {
        keyspace: String,
    },
    Table {
        keyspace: String,
        name: String,
    },
    Type {
        keyspace: String,
        name: String,
    },
    Function {
        keyspace: String,
        name: String,
        arguments: Vec<String>,
    },
    Aggregate {
        keyspace: String,
        name: String,
        arguments: Vec<String>,
    },
}

/// A schema change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    pub change: SchemaChangeKind,
    pub target: SchemaTarget,
}

/// An unsolicited server-initiated notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A node joined or left the cluster.
    TopologyChange {
        change: NodeChange,
        node: SocketAddr,
    },
    /// A node went up or down.
    StatusChange {
        status: NodeStatus,
        node: SocketAddr,
    },
    /// A schema object changed.
    SchemaChange(SchemaChange),
}

/// Subscriber handle for server events.
///
/// Obtained from [`Connection::register`](crate::Connection::register).
/// Yields events for the connection's lifetime; ends when the connection
/// stops.
#[derive(Debug)]
pub struct EventStream {
    inner: BroadcastStream<Event>,
}

impl EventStream {
    pub(crate) fn new(rx: broadcast::Receiver<Event>) -> Self {
        Self {
            inner: BroadcastStream::new(rx),
        }
    }

    /// Receive the next event, skipping over any interval this subscriber
    /// lagged through. Returns `None` once the connection has stopped.
    pub async fn recv(&mut self) -> Option<Event> {
        use futures::StreamExt;
        self.next().await
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(event)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(missed)))) => {
                    warn!("event subscriber lagged; {missed} events dropped");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn sample_event(n: u16) -> Event {
        Event::StatusChange {
            status: NodeStatus::Up,
            node: SocketAddr::from(([10, 0, 0, 1], n)),
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let (tx, _) = broadcast::channel(8);
        let mut first = EventStream::new(tx.subscribe());
        let mut second = EventStream::new(tx.subscribe());

        tx.send(sample_event(1)).unwrap();
        tx.send(sample_event(2)).unwrap();

        assert_eq!(first.recv().await, Some(sample_event(1)));
        assert_eq!(first.recv().await, Some(sample_event(2)));
        assert_eq!(second.recv().await, Some(sample_event(1)));
        assert_eq!(second.recv().await, Some(sample_event(2)));
    }

    #[tokio::test]
    async fn lagged_subscriber_resumes_with_newest_events() {
        let (tx, _) = broadcast::channel(2);
        let mut stream = EventStream::new(tx.subscribe());

        for n in 1..=4 {
            tx.send(sample_event(n)).unwrap();
        }

        // The two oldest events were overwritten; the stream skips the
        // lag marker and yields what is left.
        assert_eq!(stream.next().await, Some(sample_event(3)));
        assert_eq!(stream.next().await, Some(sample_event(4)));
    }

    #[tokio::test]
    async fn stream_ends_when_sender_drops() {
        let (tx, rx) = broadcast::channel(2);
        let mut stream = EventStream::new(rx);
        drop(tx);
        assert_eq!(stream.recv().await, None);
    }
}
