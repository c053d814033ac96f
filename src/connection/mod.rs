//! Connection handle and the actor behind it.
//!
//! A [`Connection`] is a cheap-to-clone handle over a command channel.
//! All socket and routing state lives in a single actor task that
//! multiplexes every caller onto one TCP connection via protocol stream
//! ids, and transparently reconnects with backoff when the transport
//! fails. In-flight and queued requests survive a reconnect; they are
//! re-issued on the new socket, so callers that cannot tolerate
//! re-execution should bound their calls with
//! [`tokio::time::timeout`] and treat a timeout as unknown outcome.

mod actor;
mod backoff;
mod stream_table;

use std::collections::HashMap;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    codec::{Prepared, QueryParams, Request, Row},
    config::ConnectionConfig,
    error::ConnectionError,
    events::{Event, EventStream, EventType},
    streaming::RowStream,
};

use actor::ConnectionActor;

/// Messages from handles to the actor.
pub(crate) enum Command {
    Call {
        request: Request,
        reply: oneshot::Sender<Result<CallReply, ConnectionError>>,
    },
    UseKeyspace {
        keyspace: String,
        enqueued: oneshot::Sender<()>,
    },
    Stop,
}

/// Terminal replies the actor routes back to a single-reply caller.
pub(crate) enum CallReply {
    /// RESULT Void.
    Done,
    /// READY, answering REGISTER.
    Ready,
    /// A complete, non-paged rows result.
    Rows(Vec<Row>),
    /// The first page of a paged result, already streaming.
    RowStream(RowStream),
    Prepared(Prepared),
    Supported(HashMap<String, Vec<String>>),
    SetKeyspace(String),
    SchemaChange(crate::events::SchemaChange),
}

/// Outcome of a `query` or `execute` call.
#[derive(Debug)]
pub enum QueryResult {
    /// The statement produced no result set.
    Void,
    /// A result set that fit in one page.
    Rows(Vec<Row>),
    /// A paged result; rows arrive lazily on the stream.
    Stream(RowStream),
    /// A `USE` statement switched the keyspace.
    SetKeyspace(String),
    /// A DDL statement altered the schema.
    SchemaChange(crate::events::SchemaChange),
}

/// Handle to a single-node CQL connection.
///
/// Every method submits through the actor and resolves when the server's
/// reply is routed back. None of them time out on their own; wrap a call
/// in [`tokio::time::timeout`] to bound it. A timed-out caller simply
/// drops its reply slot and the eventual reply is discarded.
///
/// # Examples
///
/// ```no_run
/// use cqlwire::{Connection, ConnectionConfig, QueryParams, QueryResult};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), cqlwire::ConnectionError> {
/// let config = ConnectionConfig::builder()
///     .keyspace("metrics")
///     .build()
///     .expect("valid configuration");
/// let connection = Connection::open(config);
/// let result = connection
///     .query("SELECT name FROM samples", QueryParams::default())
///     .await?;
/// if let QueryResult::Rows(rows) = result {
///     println!("{} rows", rows.len());
/// }
/// connection.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Connection {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<Event>,
}

impl Connection {
    /// Spawn the connection actor and return a handle to it.
    ///
    /// The actor starts disconnected and establishes the TCP session in
    /// the background; requests submitted before it is ready are queued
    /// and dispatched once the handshake completes. Must be called from
    /// within a tokio runtime.
    #[must_use]
    pub fn open(config: ConnectionConfig) -> Self {
        let (commands, command_rx) = mpsc::channel(config.command_buffer);
        let (events, _) = broadcast::channel(config.event_buffer);
        let actor = ConnectionActor::new(config, command_rx, events.clone());
        tokio::spawn(actor.run());
        Self { commands, events }
    }

    async fn call(&self, request: Request) -> Result<CallReply, ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Call { request, reply })
            .await
            .map_err(|_| ConnectionError::Stopped)?;
        rx.await.map_err(|_| ConnectionError::Stopped)?
    }

    /// Ask the server which startup options it supports.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the server rejects the request or
    /// the connection has stopped.
    pub async fn options(&self) -> Result<HashMap<String, Vec<String>>, ConnectionError> {
        match self.call(Request::Options).await? {
            CallReply::Supported(options) => Ok(options),
            _ => Err(ConnectionError::UnexpectedResponse {
                operation: "options",
            }),
        }
    }

    /// Select the default keyspace for this connection.
    ///
    /// The keyspace is also re-applied after every reconnect. The call
    /// resolves as soon as the `USE` frame is enqueued; the server's
    /// acknowledgement is logged rather than routed.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Stopped`] if the actor has shut down.
    pub async fn use_keyspace(
        &self,
        keyspace: impl Into<String>,
    ) -> Result<(), ConnectionError> {
        let (enqueued, rx) = oneshot::channel();
        self.commands
            .send(Command::UseKeyspace {
                keyspace: keyspace.into(),
                enqueued,
            })
            .await
            .map_err(|_| ConnectionError::Stopped)?;
        rx.await.map_err(|_| ConnectionError::Stopped)
    }

    /// Run a CQL statement.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Server`] when the server rejects the
    /// statement, [`ConnectionError::Busy`] when no stream id is free,
    /// and [`ConnectionError::Stopped`] after shutdown.
    pub async fn query(
        &self,
        cql: impl Into<String>,
        params: QueryParams,
    ) -> Result<QueryResult, ConnectionError> {
        let request = Request::Query {
            cql: cql.into(),
            params,
        };
        query_result("query", self.call(request).await?)
    }

    /// Prepare a statement for repeated execution.
    ///
    /// # Errors
    ///
    /// Same classes as [`Connection::query`].
    pub async fn prepare(&self, cql: impl Into<String>) -> Result<Prepared, ConnectionError> {
        match self.call(Request::Prepare { cql: cql.into() }).await? {
            CallReply::Prepared(prepared) => Ok(prepared),
            _ => Err(ConnectionError::UnexpectedResponse {
                operation: "prepare",
            }),
        }
    }

    /// Execute a prepared statement.
    ///
    /// # Errors
    ///
    /// Same classes as [`Connection::query`].
    pub async fn execute(
        &self,
        prepared: &Prepared,
        params: QueryParams,
    ) -> Result<QueryResult, ConnectionError> {
        let request = Request::Execute {
            id: prepared.id.clone(),
            params,
        };
        query_result("execute", self.call(request).await?)
    }

    /// Subscribe to server-pushed events.
    ///
    /// The returned stream yields every event published for the rest of
    /// the connection's lifetime. Multiple subscribers each receive
    /// every event.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the server rejects the REGISTER
    /// request or the connection has stopped.
    pub async fn register(
        &self,
        types: &[EventType],
    ) -> Result<EventStream, ConnectionError> {
        let request = Request::Register {
            types: types.to_vec(),
        };
        match self.call(request).await? {
            CallReply::Ready => Ok(EventStream::new(self.events.subscribe())),
            _ => Err(ConnectionError::UnexpectedResponse {
                operation: "register",
            }),
        }
    }

    /// Shut the connection down.
    ///
    /// Every pending and queued request resolves to
    /// [`ConnectionError::Stopped`]; later calls on any handle fail the
    /// same way. Idempotent.
    pub async fn stop(&self) { let _ = self.commands.send(Command::Stop).await; }
}

fn query_result(
    operation: &'static str,
    reply: CallReply,
) -> Result<QueryResult, ConnectionError> {
    match reply {
        CallReply::Done => Ok(QueryResult::Void),
        CallReply::Rows(rows) => Ok(QueryResult::Rows(rows)),
        CallReply::RowStream(stream) => Ok(QueryResult::Stream(stream)),
        CallReply::SetKeyspace(keyspace) => Ok(QueryResult::SetKeyspace(keyspace)),
        CallReply::SchemaChange(change) => Ok(QueryResult::SchemaChange(change)),
        _ => Err(ConnectionError::UnexpectedResponse { operation }),
    }
}
