//! Client-side connection to a CQL-speaking database node.
//!
//! One TCP socket carries many logically concurrent requests: each
//! request is stamped with a protocol stream id, responses are routed
//! back to their callers by that id, server-pushed events fan out on a
//! separate broadcast channel, and paged results stream their rows
//! lazily. Transport failures are absorbed by an exponential-backoff
//! reconnect that re-issues in-flight and queued work, so callers only
//! ever see server errors, shutdown, or their own timeout.
//!
//! ```no_run
//! use cqlwire::{Connection, ConnectionConfig, QueryParams, QueryResult};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), cqlwire::ConnectionError> {
//! let config = ConnectionConfig::builder().host("10.0.0.5").build().unwrap();
//! let connection = Connection::open(config);
//! match connection.query("SELECT id FROM users", QueryParams::default()).await? {
//!     QueryResult::Rows(rows) => println!("{} users", rows.len()),
//!     QueryResult::Stream(mut rows) => {
//!         while let Some(row) = rows.next_row().await {
//!             let _row = row?;
//!         }
//!     }
//!     _ => {}
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod streaming;

pub use codec::{Consistency, Prepared, QueryParams, Row, Value};
pub use config::{ConfigError, ConnectionConfig};
pub use connection::{Connection, QueryResult};
pub use error::ConnectionError;
pub use events::{
    Event, EventStream, EventType, NodeChange, NodeStatus, SchemaChange, SchemaChangeKind,
    SchemaTarget,
};
pub use streaming::RowStream;
