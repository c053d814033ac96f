//! Request bodies sent by the client.

use bytes::{Bytes, BytesMut};

use super::{error::CodecError, params::QueryParams, primitives, Opcode};
use crate::events::EventType;

/// CQL version announced in STARTUP.
const CQL_VERSION: &str = "3.0.0";

/// A client request, retained alongside its stream id so paging
/// follow-ups and reconnect reissues can be built from the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Protocol handshake; always the first frame on a connection.
    Startup,
    /// Ask the server which options it supports.
    Options,
    /// An unprepared CQL statement.
    Query {
        cql: String,
        params: QueryParams,
    },
    /// Prepare a statement for later execution.
    Prepare {
        cql: String,
    },
    /// Execute a previously prepared statement.
    Execute {
        id: Bytes,
        params: QueryParams,
    },
    /// Subscribe this connection to server event classes.
    Register {
        types: Vec<EventType>,
    },
}

impl Request {
    pub(crate) fn opcode(&self) -> Opcode {
        match self {
            Request::Startup => Opcode::Startup,
            Request::Options => Opcode::Options,
            Request::Query { .. } => Opcode::Query,
            Request::Prepare { .. } => Opcode::Prepare,
            Request::Execute { .. } => Opcode::Execute,
            Request::Register { .. } => Opcode::Register,
        }
    }

    pub(crate) fn encode_body(&self, dst: &mut BytesMut) -> Result<(), CodecError> {
        match self {
            Request::Startup => primitives::put_string_map(dst, &[("CQL_VERSION", CQL_VERSION)]),
            Request::Options => Ok(()),
            Request::Query { cql, params } => {
                primitives::put_long_string(dst, cql)?;
                params.encode(dst)
            }
            Request::Prepare { cql } => primitives::put_long_string(dst, cql),
            Request::Execute { id, params } => {
                primitives::put_short_bytes(dst, id)?;
                params.encode(dst)
            }
            Request::Register { types } => {
                let names: Vec<&str> = types.iter().map(|t| t.as_protocol_str()).collect();
                primitives::put_string_list(dst, &names)
            }
        }
    }

    /// Clone this request as the follow-up for the next result page.
    ///
    /// Only QUERY and EXECUTE carry paging state; other variants are
    /// returned unchanged (they can never produce a paged result).
    pub(crate) fn with_paging_state(mut self, state: Bytes) -> Self {
        if let Request::Query { params, .. } | Request::Execute { params, .. } = &mut self {
            params.paging_state = Some(state);
        }
        self
    }
}
