//! Stream-id allocation and the in-flight request table.

use std::collections::HashMap;

use log::warn;
use tokio::{
    sync::{mpsc, oneshot},
    time::{self, Duration},
};

use crate::{
    codec::{Request, Row},
    connection::CallReply,
    error::ConnectionError,
};

/// Stream id carried by server-initiated EVENT frames.
pub(crate) const EVENT_STREAM: i16 = -1;
/// Stream id for frames whose reply nobody waits for (STARTUP).
pub(crate) const FIRE_AND_FORGET_STREAM: i16 = 0;
/// Stream id reserved for the implicit `USE` after a (re)connect.
pub(crate) const KEYSPACE_STREAM: i16 = 1;

const FIRST_USER_STREAM: i16 = 2;
const LAST_USER_STREAM: i16 = i16::MAX;

/// Bound on delivering a terminal error into a full row channel. A
/// consumer that has not freed a slot for this long is treated as gone.
const STREAM_FAIL_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a reply should go.
pub(crate) enum Replier {
    /// An ordinary call: one terminal reply.
    Single(oneshot::Sender<Result<CallReply, ConnectionError>>),
    /// A paged query whose first page already produced a row channel.
    Stream(mpsc::Sender<Result<Row, ConnectionError>>),
}

impl Replier {
    /// Deliver a terminal value. Meaningful only for single-reply
    /// callers; a streaming request never receives a plain value, so the
    /// channel is simply dropped (closing the stream) with a log entry.
    pub(crate) fn resolve(self, reply: CallReply) {
        match self {
            Replier::Single(tx) => {
                let _ = tx.send(Ok(reply));
            }
            Replier::Stream(_) => {
                warn!("terminal reply for a streaming request; closing the row stream");
            }
        }
    }

    /// Deliver a terminal error.
    pub(crate) async fn fail(self, error: ConnectionError) {
        match self {
            Replier::Single(tx) => {
                let _ = tx.send(Err(error));
            }
            Replier::Stream(tx) => {
                // The channel may still hold undelivered rows; wait for
                // the consumer to free a slot so the error is not lost.
                // A send into a dropped stream returns immediately.
                if time::timeout(STREAM_FAIL_TIMEOUT, tx.send(Err(error)))
                    .await
                    .is_err()
                {
                    warn!("row stream consumer stalled; dropping terminal error");
                }
                // Dropping the sender closes the stream either way.
            }
        }
    }
}

/// A request that has been written to the socket and not yet answered.
pub(crate) struct PendingRequest {
    /// The original request, kept so paging follow-ups and reconnect
    /// reissues can be derived from it.
    pub(crate) request: Request,
    pub(crate) replier: Replier,
}

/// Maps in-flight stream ids to their pending requests.
///
/// User ids live in `2..=32767`, allocated by monotonic increment with
/// wrap-around back to 2. An id is released the moment its reply is
/// dispatched; a wrap-around collision with a still-pending id is
/// reported to the submitter as `Busy`.
pub(crate) struct StreamTable {
    last_id: i16,
    pending: HashMap<i16, PendingRequest>,
}

impl StreamTable {
    pub(crate) fn new() -> Self {
        Self {
            last_id: KEYSPACE_STREAM,
            pending: HashMap::new(),
        }
    }

    fn next_id(&self) -> i16 {
        if self.last_id >= LAST_USER_STREAM {
            FIRST_USER_STREAM
        } else {
            self.last_id + 1
        }
    }

    /// Claim the next stream id, or `None` when it is still in flight.
    pub(crate) fn allocate(&mut self) -> Option<i16> {
        let id = self.next_id();
        if self.pending.contains_key(&id) {
            return None;
        }
        self.last_id = id;
        Some(id)
    }

    /// Record a request after its frame has been written to the socket.
    pub(crate) fn register(&mut self, id: i16, pending: PendingRequest) {
        self.pending.insert(id, pending);
    }

    /// Take the pending request a reply belongs to, freeing its id.
    pub(crate) fn complete(&mut self, id: i16) -> Option<PendingRequest> {
        self.pending.remove(&id)
    }

    /// Empty the table for a disconnect, returning every pending request
    /// and rewinding the id counter.
    pub(crate) fn reset(&mut self) -> Vec<PendingRequest> {
        self.last_id = KEYSPACE_STREAM;
        self.pending.drain().map(|(_, pending)| pending).collect()
    }

    pub(crate) fn len(&self) -> usize { self.pending.len() }

    #[cfg(test)]
    pub(crate) fn set_last_id(&mut self, id: i16) { self.last_id = id; }
}
