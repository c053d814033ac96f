//! The connection actor.
//!
//! One task owns the socket, the stream table, the waiting queue and the
//! backoff state; callers interact purely by message. The loop awaits
//! whichever of the command channel or the framed socket is ready, so
//! every state mutation is serialized without locks. While disconnected
//! the same loop sleeps out the backoff delay, still accepting commands
//! into the waiting queue.

use std::collections::VecDeque;

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc},
    time::{self, Duration},
};
use tokio_util::codec::Framed;

use crate::{
    codec::{
        CodecError, CqlCodec, Frame, OutboundFrame, QueryParams, Request, Response, ResultBody,
        RowsPage,
    },
    config::ConnectionConfig,
    error::ConnectionError,
    events::Event,
    streaming::RowStream,
};

use super::{
    backoff::ReconnectBackoff,
    stream_table::{
        PendingRequest, Replier, StreamTable, EVENT_STREAM, FIRE_AND_FORGET_STREAM,
        KEYSPACE_STREAM,
    },
    CallReply, Command,
};

type Transport = Framed<TcpStream, CqlCodec>;

/// One iteration's worth of input for the connected loop.
enum Tick {
    Command(Option<Command>),
    Inbound(Option<Result<Frame, CodecError>>),
}

/// Why a connect attempt did not produce a session.
enum ConnectFailure {
    /// Worth retrying after a backoff delay.
    Transient(String),
    /// The server refused the handshake; retrying cannot help.
    Rejected(String),
}

impl ConnectFailure {
    fn transient(detail: impl ToString) -> Self { Self::Transient(detail.to_string()) }
}

/// Outcome of the disconnected phase.
enum Established {
    Connected,
    /// Handshake-fatal or stop requested; the actor must shut down.
    Terminal,
}

pub(crate) struct ConnectionActor {
    config: ConnectionConfig,
    commands: mpsc::Receiver<Command>,
    transport: Option<Transport>,
    streams: StreamTable,
    /// Requests submitted while no socket exists; non-empty only when
    /// disconnected.
    waiting: VecDeque<PendingRequest>,
    backoff: ReconnectBackoff,
    keyspace: Option<String>,
    events: broadcast::Sender<Event>,
}

impl ConnectionActor {
    pub(crate) fn new(
        config: ConnectionConfig,
        commands: mpsc::Receiver<Command>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        let keyspace = config.keyspace.clone();
        Self {
            config,
            commands,
            transport: None,
            streams: StreamTable::new(),
            waiting: VecDeque::new(),
            backoff: ReconnectBackoff::new(),
            keyspace,
            events,
        }
    }

    /// Drive the connection until it is stopped.
    pub(crate) async fn run(mut self) {
        info!(
            "connection actor for {}:{} started",
            self.config.host, self.config.port
        );
        loop {
            if self.transport.is_none() {
                match self.establish().await {
                    Established::Connected => {}
                    Established::Terminal => break,
                }
            }
            match self.next_tick().await {
                Tick::Command(None) => break,
                Tick::Command(Some(command)) => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Tick::Inbound(None) => self.disconnect("server closed the connection"),
                Tick::Inbound(Some(Err(err))) => {
                    self.disconnect(&format!("frame decoding failed: {err}"));
                }
                Tick::Inbound(Some(Ok(frame))) => self.dispatch(frame).await,
            }
        }
        self.shut_down().await;
    }

    /// Await the next command or inbound frame.
    async fn next_tick(&mut self) -> Tick {
        let Some(socket) = self.transport.as_mut() else {
            // Transport vanished mid-iteration (write failure during a
            // paging follow-up); report it as a closed source so the run
            // loop falls back into the reconnect phase.
            return Tick::Inbound(None);
        };
        tokio::select! {
            command = self.commands.recv() => Tick::Command(command),
            frame = socket.next() => Tick::Inbound(frame),
        }
    }

    /// Reconnect loop: attempt, back off, repeat. Commands arriving
    /// during the backoff sleep are processed (and queued) so callers
    /// never block on a dead socket.
    async fn establish(&mut self) -> Established {
        loop {
            match self.try_connect().await {
                Ok(()) => return Established::Connected,
                Err(ConnectFailure::Rejected(detail)) => {
                    error!(
                        "{}:{} rejected the handshake: {detail}; stopping",
                        self.config.host, self.config.port
                    );
                    return Established::Terminal;
                }
                Err(ConnectFailure::Transient(detail)) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        "connect to {}:{} failed: {detail}; retrying in {}ms",
                        self.config.host,
                        self.config.port,
                        delay.as_millis()
                    );
                    if !self.sleep_accepting_commands(delay).await {
                        return Established::Terminal;
                    }
                }
            }
        }
    }

    async fn sleep_accepting_commands(&mut self, delay: Duration) -> bool {
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            let command = tokio::select! {
                () = &mut sleep => return true,
                command = self.commands.recv() => command,
            };
            match command {
                None => return false,
                Some(command) => {
                    if !self.handle_command(command).await {
                        return false;
                    }
                }
            }
        }
    }

    /// One TCP connect plus protocol handshake.
    async fn try_connect(&mut self) -> Result<(), ConnectFailure> {
        let address = (self.config.host.as_str(), self.config.port);
        let stream = time::timeout(self.config.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ConnectFailure::transient("connect timed out"))?
            .map_err(ConnectFailure::transient)?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!("could not set TCP_NODELAY: {err}");
        }

        let mut socket = Framed::new(stream, CqlCodec::new());
        socket
            .send(OutboundFrame {
                stream: FIRE_AND_FORGET_STREAM,
                request: Request::Startup,
            })
            .await
            .map_err(ConnectFailure::transient)?;

        // The handshake reply is read synchronously, bounded by the
        // connect timeout; only afterwards does the socket join the
        // select loop.
        let frame = match time::timeout(self.config.connect_timeout, socket.next()).await {
            Err(_) => return Err(ConnectFailure::transient("startup reply timed out")),
            Ok(None) => return Err(ConnectFailure::transient("closed during startup")),
            Ok(Some(Err(err))) => return Err(ConnectFailure::transient(err)),
            Ok(Some(Ok(frame))) => frame,
        };
        match frame.body {
            Response::Ready => {}
            Response::Error { code, message } => {
                return Err(ConnectFailure::Rejected(format!(
                    "error {code:#06x}: {message}"
                )));
            }
            Response::Authenticate(authenticator) => {
                return Err(ConnectFailure::Rejected(format!(
                    "authentication via {authenticator} required but not supported"
                )));
            }
            other => {
                return Err(ConnectFailure::Rejected(format!(
                    "unexpected startup reply {other:?}"
                )));
            }
        }

        info!("connected to {}:{}", self.config.host, self.config.port);
        self.transport = Some(socket);
        if let Some(keyspace) = self.keyspace.clone() {
            self.send_use_keyspace(&keyspace).await;
        }
        let waiting = std::mem::take(&mut self.waiting);
        for pending in waiting {
            // A write failure here re-queues the remainder via submit's
            // disconnected path.
            self.submit(pending.request, pending.replier).await;
        }
        self.backoff.reset();
        Ok(())
    }

    /// Returns `false` when the actor must stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Call { request, reply } => {
                self.submit(request, Replier::Single(reply)).await;
                true
            }
            Command::UseKeyspace { keyspace, enqueued } => {
                self.keyspace = Some(keyspace.clone());
                self.send_use_keyspace(&keyspace).await;
                let _ = enqueued.send(());
                true
            }
            Command::Stop => false,
        }
    }

    /// Admit a request: queue it while disconnected, otherwise assign a
    /// stream id, write the frame, and record the pending entry.
    async fn submit(&mut self, request: Request, replier: Replier) {
        if self.transport.is_none() {
            self.waiting.push_back(PendingRequest { request, replier });
            return;
        }
        let Some(id) = self.streams.allocate() else {
            warn!("stream id wrapped into an unanswered request; rejecting submission");
            replier.fail(ConnectionError::Busy).await;
            return;
        };
        let frame = OutboundFrame {
            stream: id,
            request: request.clone(),
        };
        if self.write_frame(frame).await {
            self.streams.register(id, PendingRequest { request, replier });
        } else {
            // write_frame already tore the session down and moved the
            // table into the waiting queue; join it.
            self.waiting.push_back(PendingRequest { request, replier });
        }
    }

    /// The implicit `USE`, sent on its reserved stream id. Its reply is
    /// logged by the dispatcher, never routed.
    async fn send_use_keyspace(&mut self, keyspace: &str) {
        if self.transport.is_none() {
            return;
        }
        let frame = OutboundFrame {
            stream: KEYSPACE_STREAM,
            request: Request::Query {
                cql: format!("USE \"{keyspace}\""),
                params: QueryParams::default(),
            },
        };
        self.write_frame(frame).await;
    }

    /// Write one frame; on failure, disconnect. Returns whether the
    /// session is still up.
    async fn write_frame(&mut self, frame: OutboundFrame) -> bool {
        let Some(socket) = self.transport.as_mut() else {
            return false;
        };
        match socket.send(frame).await {
            Ok(()) => true,
            Err(err) => {
                self.disconnect(&format!("write failed: {err}"));
                false
            }
        }
    }

    /// Tear down the session, preserving all in-flight work: every
    /// pending request moves to the waiting queue for reissue on the
    /// next connect. The receive buffer dies with the framed socket and
    /// the stream id counter rewinds.
    fn disconnect(&mut self, reason: &str) {
        if self.transport.take().is_some() {
            warn!(
                "connection to {}:{} lost: {reason}; {} in-flight requests re-queued",
                self.config.host,
                self.config.port,
                self.streams.len()
            );
        }
        for pending in self.streams.reset() {
            self.waiting.push_back(pending);
        }
    }

    /// Route one decoded frame by its stream id.
    async fn dispatch(&mut self, frame: Frame) {
        match frame.stream {
            EVENT_STREAM => match frame.body {
                Response::Event(event) => {
                    if self.events.send(event).is_err() {
                        debug!("server event dropped; no subscribers");
                    }
                }
                other => warn!("non-event frame on the event stream id: {other:?}"),
            },
            FIRE_AND_FORGET_STREAM => {
                debug!("discarding server frame on the fire-and-forget stream id");
            }
            KEYSPACE_STREAM => match frame.body {
                Response::Error { code, message } => {
                    error!("keyspace selection failed ({code:#06x}): {message}");
                }
                Response::Result(ResultBody::SetKeyspace(keyspace)) => {
                    info!("keyspace set to {keyspace}");
                }
                other => info!("keyspace selection acknowledged: {other:?}"),
            },
            id => match self.streams.complete(id) {
                None => warn!("reply for unknown stream id {id}; dropping"),
                Some(pending) => self.deliver(pending, frame.body).await,
            },
        }
    }

    /// Reply to the caller according to the body kind.
    async fn deliver(&mut self, pending: PendingRequest, body: Response) {
        match body {
            Response::Result(ResultBody::Rows(page)) => self.deliver_rows(pending, page).await,
            Response::Result(ResultBody::Void) => pending.replier.resolve(CallReply::Done),
            Response::Result(ResultBody::Prepared(prepared)) => {
                pending.replier.resolve(CallReply::Prepared(prepared));
            }
            Response::Result(ResultBody::SetKeyspace(keyspace)) => {
                pending.replier.resolve(CallReply::SetKeyspace(keyspace));
            }
            Response::Result(ResultBody::SchemaChange(change)) => {
                pending.replier.resolve(CallReply::SchemaChange(change));
            }
            Response::Ready => pending.replier.resolve(CallReply::Ready),
            Response::Supported(options) => {
                pending.replier.resolve(CallReply::Supported(options));
            }
            Response::Error { code, message } => {
                pending
                    .replier
                    .fail(ConnectionError::Server { code, message })
                    .await;
            }
            Response::Authenticate(_) | Response::Event(_) => {
                warn!("out-of-place response body on a user stream id");
                pending
                    .replier
                    .fail(ConnectionError::UnexpectedResponse {
                        operation: "request",
                    })
                    .await;
            }
        }
    }

    /// Handle a rows page: terminal pages resolve or close, pages with a
    /// continuation token stream their rows and trigger the follow-up.
    async fn deliver_rows(&mut self, pending: PendingRequest, page: RowsPage) {
        let PendingRequest { request, replier } = pending;
        match page.paging_state {
            None => match replier {
                Replier::Single(tx) => {
                    let _ = tx.send(Ok(CallReply::Rows(page.rows)));
                }
                Replier::Stream(row_tx) => {
                    for row in page.rows {
                        if row_tx.send(Ok(row)).await.is_err() {
                            break;
                        }
                    }
                    // Dropping the sender closes the stream: end of result.
                }
            },
            Some(state) => {
                let row_tx = match replier {
                    Replier::Single(tx) => {
                        let (row_tx, row_rx) = mpsc::channel(self.config.row_buffer);
                        let _ = tx.send(Ok(CallReply::RowStream(RowStream::new(row_rx))));
                        row_tx
                    }
                    Replier::Stream(row_tx) => row_tx,
                };
                for row in page.rows {
                    if row_tx.send(Ok(row)).await.is_err() {
                        // Consumer went away; skip the remaining pages.
                        debug!("row stream dropped by consumer; abandoning paging");
                        return;
                    }
                }
                let follow_up = request.with_paging_state(state);
                self.submit(follow_up, Replier::Stream(row_tx)).await;
            }
        }
    }

    /// Final teardown: every pending and waiting caller learns the
    /// connection stopped.
    async fn shut_down(&mut self) {
        self.transport = None;
        for pending in self.streams.reset() {
            pending.replier.fail(ConnectionError::Stopped).await;
        }
        for pending in self.waiting.drain(..) {
            pending.replier.fail(ConnectionError::Stopped).await;
        }
        // Callers whose commands are still sitting in the channel see
        // their reply slots close when the receiver drops.
        self.commands.close();
        info!(
            "connection actor for {}:{} stopped",
            self.config.host, self.config.port
        );
    }
}
