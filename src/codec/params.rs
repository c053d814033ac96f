//! Query parameters and bound values.

use bytes::{BufMut, Bytes, BytesMut};

use super::{error::CodecError, primitives};

/// Default result page size requested from the server.
pub const DEFAULT_PAGE_SIZE: i32 = 100;

const FLAG_VALUES: u8 = 0x01;
const FLAG_SKIP_METADATA: u8 = 0x02;
const FLAG_PAGE_SIZE: u8 = 0x04;
const FLAG_WITH_PAGING_STATE: u8 = 0x08;
const FLAG_WITH_SERIAL_CONSISTENCY: u8 = 0x10;
const FLAG_WITH_DEFAULT_TIMESTAMP: u8 = 0x20;

/// Consistency level for a request, carrying its protocol code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Consistency {
    Any = 0x0000,
    One = 0x0001,
    Two = 0x0002,
    Three = 0x0003,
    Quorum = 0x0004,
    All = 0x0005,
    LocalQuorum = 0x0006,
    EachQuorum = 0x0007,
    Serial = 0x0008,
    LocalSerial = 0x0009,
    LocalOne = 0x000A,
}

/// A value bound to a query placeholder.
///
/// Cells travel as protocol `[value]`s; richer type-level serialization
/// is out of scope, so anything beyond the common primitives goes through
/// [`Value::Blob`] with pre-serialized bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// SQL NULL, encoded as a negative length.
    Null,
    Boolean(bool),
    Int(i32),
    BigInt(i64),
    Text(String),
    Blob(Bytes),
}

impl Value {
    fn encode(&self, dst: &mut BytesMut) -> Result<(), CodecError> {
        match self {
            Value::Null => {
                dst.put_i32(-1);
                Ok(())
            }
            Value::Boolean(value) => {
                primitives::put_bytes(dst, &[u8::from(*value)])
            }
            Value::Int(value) => primitives::put_bytes(dst, &value.to_be_bytes()),
            Value::BigInt(value) => primitives::put_bytes(dst, &value.to_be_bytes()),
            Value::Text(value) => primitives::put_bytes(dst, value.as_bytes()),
            Value::Blob(value) => primitives::put_bytes(dst, value),
        }
    }
}

/// Options accompanying a QUERY or EXECUTE request.
///
/// This is the complete recognized set; the closed struct means an
/// unknown option cannot reach the wire at all.
///
/// # Examples
///
/// ```
/// use cqlwire::{Consistency, QueryParams, Value};
///
/// let params = QueryParams {
///     consistency: Consistency::Quorum,
///     values: vec![Value::Int(42)],
///     ..QueryParams::default()
/// };
/// assert_eq!(params.page_size, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParams {
    /// Consistency level; defaults to `One`.
    pub consistency: Consistency,
    /// Ask the server to omit result metadata it already sent for the
    /// prepared statement.
    pub skip_metadata: bool,
    /// Maximum rows per result page.
    pub page_size: i32,
    /// Continuation token from a previous page.
    pub paging_state: Option<Bytes>,
    /// Consistency for the serial phase of lightweight transactions.
    pub serial_consistency: Option<Consistency>,
    /// Client-supplied write timestamp in microseconds.
    pub timestamp: Option<i64>,
    /// Positional bound values.
    pub values: Vec<Value>,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            consistency: Consistency::One,
            skip_metadata: false,
            page_size: DEFAULT_PAGE_SIZE,
            paging_state: None,
            serial_consistency: None,
            timestamp: None,
            values: Vec::new(),
        }
    }
}

impl QueryParams {
    pub(crate) fn encode(&self, dst: &mut BytesMut) -> Result<(), CodecError> {
        dst.put_u16(self.consistency as u16);

        let mut flags = FLAG_PAGE_SIZE;
        if !self.values.is_empty() {
            flags |= FLAG_VALUES;
        }
        if self.skip_metadata {
            flags |= FLAG_SKIP_METADATA;
        }
        if self.paging_state.is_some() {
            flags |= FLAG_WITH_PAGING_STATE;
        }
        if self.serial_consistency.is_some() {
            flags |= FLAG_WITH_SERIAL_CONSISTENCY;
        }
        if self.timestamp.is_some() {
            flags |= FLAG_WITH_DEFAULT_TIMESTAMP;
        }
        dst.put_u8(flags);

        if !self.values.is_empty() {
            let count = u16::try_from(self.values.len())
                .map_err(|_| CodecError::malformed("values", "more than 65535 bound values"))?;
            dst.put_u16(count);
            for value in &self.values {
                value.encode(dst)?;
            }
        }
        dst.put_i32(self.page_size);
        if let Some(state) = &self.paging_state {
            primitives::put_bytes(dst, state)?;
        }
        if let Some(serial) = self.serial_consistency {
            dst.put_u16(serial as u16);
        }
        if let Some(timestamp) = self.timestamp {
            dst.put_i64(timestamp);
        }
        Ok(())
    }
}
