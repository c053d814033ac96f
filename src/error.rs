//! User-visible errors for connection operations.
//!
//! Transport failures are deliberately absent: a broken socket triggers an
//! internal reconnect and the affected requests are re-issued, so callers
//! only ever observe the variants below (or their own timeout).

/// Errors surfaced to callers of [`Connection`](crate::Connection) methods.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The server answered the request with an ERROR frame.
    #[error("server error {code:#06x}: {message}")]
    Server {
        /// Protocol error code reported by the server.
        code: i32,
        /// Human-readable message reported by the server.
        message: String,
    },
    /// The connection actor has shut down, either through
    /// [`Connection::stop`](crate::Connection::stop) or a fatal handshake
    /// failure. Pending and queued requests all resolve to this error.
    #[error("connection stopped")]
    Stopped,
    /// The next stream id is still awaiting a reply. With ~32k ids in
    /// flight this indicates the connection is saturated.
    #[error("no free stream id; connection is busy")]
    Busy,
    /// The server replied with a frame that does not match the operation,
    /// e.g. a RESULT frame in response to OPTIONS.
    #[error("unexpected response to {operation}")]
    UnexpectedResponse {
        /// Name of the operation whose reply was malformed.
        operation: &'static str,
    },
}
