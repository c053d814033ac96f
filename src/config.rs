//! Connection configuration.
//!
//! [`ConnectionConfig`] collects the target endpoint and buffer sizing
//! knobs through a builder, validating capacities before the connection
//! actor is spawned.

use std::time::Duration;

use thiserror::Error;

/// Default node hostname.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default CQL native-protocol port.
pub const DEFAULT_PORT: u16 = 9042;
/// Default TCP connect and handshake-read timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

const DEFAULT_COMMAND_BUFFER: usize = 128;
const DEFAULT_ROW_BUFFER: usize = 512;
const DEFAULT_EVENT_BUFFER: usize = 128;

/// Error returned when a builder is given an unusable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A channel capacity was zero.
    #[error("{name} capacity must be non-zero")]
    ZeroCapacity {
        /// Which buffer was misconfigured.
        name: &'static str,
    },
}

/// Settings for a single-node CQL connection.
///
/// # Examples
///
/// ```
/// use cqlwire::ConnectionConfig;
///
/// let config = ConnectionConfig::builder()
///     .host("db.example.com")
///     .port(9142)
///     .keyspace("metrics")
///     .build()
///     .expect("valid configuration");
/// assert_eq!(config.port, 9142);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Hostname or address of the target node.
    pub host: String,
    /// TCP port of the native protocol listener.
    pub port: u16,
    /// Bounds both the TCP connect and the synchronous handshake read.
    pub connect_timeout: Duration,
    /// Keyspace selected with an implicit `USE` after every (re)connect.
    pub keyspace: Option<String>,
    /// Capacity of the caller-to-actor command channel.
    pub command_buffer: usize,
    /// Capacity of each paged-result row channel.
    pub row_buffer: usize,
    /// Capacity of the server-event broadcast channel; subscribers that
    /// fall further behind than this lose the oldest events.
    pub event_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keyspace: None,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            row_buffer: DEFAULT_ROW_BUFFER,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ConnectionConfig {
    /// Start building a configuration from the defaults.
    #[must_use]
    pub fn builder() -> ConnectionConfigBuilder { ConnectionConfigBuilder::default() }
}

/// Builder for [`ConnectionConfig`].
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Set the target hostname.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the target port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the connect/handshake timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Select a default keyspace, applied after every (re)connect.
    #[must_use]
    pub fn keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.config.keyspace = Some(keyspace.into());
        self
    }

    /// Set the command channel capacity.
    #[must_use]
    pub fn command_buffer(mut self, capacity: usize) -> Self {
        self.config.command_buffer = capacity;
        self
    }

    /// Set the per-stream row channel capacity.
    #[must_use]
    pub fn row_buffer(mut self, capacity: usize) -> Self {
        self.config.row_buffer = capacity;
        self
    }

    /// Set the event broadcast capacity.
    #[must_use]
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.config.event_buffer = capacity;
        self
    }

    /// Validate and produce the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroCapacity`] if any buffer capacity is zero.
    pub fn build(self) -> Result<ConnectionConfig, ConfigError> {
        let checks = [
            ("command", self.config.command_buffer),
            ("row", self.config.row_buffer),
            ("event", self.config.event_buffer),
        ];
        for (name, capacity) in checks {
            if capacity == 0 {
                return Err(ConfigError::ZeroCapacity { name });
            }
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_match_protocol_conventions() {
        let config = ConnectionConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9042);
        assert_eq!(config.connect_timeout, Duration::from_millis(5000));
        assert!(config.keyspace.is_none());
    }

    #[rstest]
    #[case::command(|b: ConnectionConfigBuilder| b.command_buffer(0), "command")]
    #[case::row(|b: ConnectionConfigBuilder| b.row_buffer(0), "row")]
    #[case::event(|b: ConnectionConfigBuilder| b.event_buffer(0), "event")]
    fn zero_capacities_are_rejected(
        #[case] apply: fn(ConnectionConfigBuilder) -> ConnectionConfigBuilder,
        #[case] name: &'static str,
    ) {
        let err = apply(ConnectionConfig::builder()).build().unwrap_err();
        assert_eq!(err, ConfigError::ZeroCapacity { name });
    }
}
