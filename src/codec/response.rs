//! Response bodies received from the server.
//!
//! Row cells stay as raw bytes; interpreting them against the column
//! types is left to the caller. Column metadata is still parsed in full
//! (including nested collection and UDT types) because it sits between
//! the header and the row data on the wire.

use bytes::Bytes;

use super::{error::CodecError, primitives, Opcode};
use crate::events::{
    Event, NodeChange, NodeStatus, SchemaChange, SchemaChangeKind, SchemaTarget,
};

const RESULT_KIND_VOID: i32 = 0x0001;
const RESULT_KIND_ROWS: i32 = 0x0002;
const RESULT_KIND_SET_KEYSPACE: i32 = 0x0003;
const RESULT_KIND_PREPARED: i32 = 0x0004;
const RESULT_KIND_SCHEMA_CHANGE: i32 = 0x0005;

const ROWS_FLAG_GLOBAL_TABLES_SPEC: i32 = 0x0001;
const ROWS_FLAG_HAS_MORE_PAGES: i32 = 0x0002;
const ROWS_FLAG_NO_METADATA: i32 = 0x0004;

/// A decoded response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The server is ready for requests.
    Ready,
    /// The server demands authentication; this client does not negotiate
    /// it, so the handshake treats this as fatal.
    Authenticate(String),
    /// Supported startup options, keyed by option name.
    Supported(std::collections::HashMap<String, Vec<String>>),
    /// Outcome of a QUERY, PREPARE or EXECUTE.
    Result(ResultBody),
    /// An unsolicited server event.
    Event(Event),
    /// The request failed server-side.
    Error {
        code: i32,
        message: String,
    },
}

/// The kinds of RESULT body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultBody {
    Void,
    Rows(RowsPage),
    SetKeyspace(String),
    Prepared(Prepared),
    SchemaChange(SchemaChange),
}

/// One page of a rows result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowsPage {
    /// Column metadata, absent when the server skipped it.
    pub specs: Option<Vec<ColumnSpec>>,
    /// The rows of this page.
    pub rows: Vec<Row>,
    /// Continuation token; present exactly when more pages exist.
    pub paging_state: Option<Bytes>,
}

/// A single result row of raw cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// One entry per selected column; `None` is a database NULL.
    pub columns: Vec<Option<Bytes>>,
}

/// Metadata for one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub keyspace: String,
    pub table: String,
    pub name: String,
    pub column_type: ColumnType,
}

/// The type of a result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Custom(String),
    Ascii,
    Bigint,
    Blob,
    Boolean,
    Counter,
    Decimal,
    Double,
    Float,
    Int,
    Timestamp,
    Uuid,
    Varchar,
    Varint,
    Timeuuid,
    Inet,
    Date,
    Time,
    Smallint,
    Tinyint,
    List(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    Set(Box<ColumnType>),
    Udt {
        keyspace: String,
        name: String,
        fields: Vec<(String, ColumnType)>,
    },
    Tuple(Vec<ColumnType>),
}

/// Handle to a statement prepared on this connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    /// Server-assigned statement id, echoed back in EXECUTE.
    pub id: Bytes,
}

impl Response {
    /// Parse a body according to its opcode.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when the body is truncated or contains a
    /// value outside the protocol's vocabulary.
    pub fn parse(opcode: Opcode, mut body: Bytes) -> Result<Self, CodecError> {
        match opcode {
            Opcode::Ready => Ok(Response::Ready),
            Opcode::Authenticate => {
                let authenticator = primitives::get_string(&mut body, "AUTHENTICATE body")?;
                Ok(Response::Authenticate(authenticator))
            }
            Opcode::Supported => {
                let options = primitives::get_string_multimap(&mut body, "SUPPORTED body")?;
                Ok(Response::Supported(options))
            }
            Opcode::Result => parse_result(&mut body).map(Response::Result),
            Opcode::Event => parse_event(&mut body).map(Response::Event),
            Opcode::Error => {
                let code = primitives::get_int(&mut body, "ERROR code")?;
                let message = primitives::get_string(&mut body, "ERROR message")?;
                // Some error codes append extra detail; it is not needed
                // for routing and is ignored.
                Ok(Response::Error { code, message })
            }
            other => Err(CodecError::malformed(
                "response opcode",
                format!("{other:?} is not a response"),
            )),
        }
    }
}

fn parse_result(body: &mut Bytes) -> Result<ResultBody, CodecError> {
    let kind = primitives::get_int(body, "RESULT kind")?;
    match kind {
        RESULT_KIND_VOID => Ok(ResultBody::Void),
        RESULT_KIND_ROWS => parse_rows(body).map(ResultBody::Rows),
        RESULT_KIND_SET_KEYSPACE => {
            let keyspace = primitives::get_string(body, "RESULT keyspace")?;
            Ok(ResultBody::SetKeyspace(keyspace))
        }
        RESULT_KIND_PREPARED => {
            let id = primitives::get_short_bytes(body, "RESULT prepared id")?;
            // The prepared and result metadata that follow are not needed
            // to execute the statement; cells arrive as raw bytes anyway.
            Ok(ResultBody::Prepared(Prepared { id }))
        }
        RESULT_KIND_SCHEMA_CHANGE => parse_schema_change(body).map(ResultBody::SchemaChange),
        other => Err(CodecError::malformed(
            "RESULT kind",
            format!("unknown kind {other}"),
        )),
    }
}

fn parse_rows(body: &mut Bytes) -> Result<RowsPage, CodecError> {
    let flags = primitives::get_int(body, "ROWS metadata flags")?;
    let columns_count = primitives::get_int(body, "ROWS column count")?;
    let columns_count = usize::try_from(columns_count)
        .map_err(|_| CodecError::malformed("ROWS column count", columns_count.to_string()))?;

    let paging_state = if flags & ROWS_FLAG_HAS_MORE_PAGES != 0 {
        primitives::get_bytes(body, "ROWS paging state")?
    } else {
        None
    };

    let specs = if flags & ROWS_FLAG_NO_METADATA != 0 {
        None
    } else {
        let global = if flags & ROWS_FLAG_GLOBAL_TABLES_SPEC != 0 {
            let keyspace = primitives::get_string(body, "ROWS global keyspace")?;
            let table = primitives::get_string(body, "ROWS global table")?;
            Some((keyspace, table))
        } else {
            None
        };
        let mut specs = Vec::with_capacity(columns_count);
        for _ in 0..columns_count {
            let (keyspace, table) = match &global {
                Some((keyspace, table)) => (keyspace.clone(), table.clone()),
                None => (
                    primitives::get_string(body, "ROWS column keyspace")?,
                    primitives::get_string(body, "ROWS column table")?,
                ),
            };
            let name = primitives::get_string(body, "ROWS column name")?;
            let column_type = parse_type(body)?;
            specs.push(ColumnSpec {
                keyspace,
                table,
                name,
                column_type,
            });
        }
        Some(specs)
    };

    let rows_count = primitives::get_int(body, "ROWS row count")?;
    let rows_count = usize::try_from(rows_count)
        .map_err(|_| CodecError::malformed("ROWS row count", rows_count.to_string()))?;
    let mut rows = Vec::with_capacity(rows_count);
    for _ in 0..rows_count {
        let mut columns = Vec::with_capacity(columns_count);
        for _ in 0..columns_count {
            columns.push(primitives::get_bytes(body, "ROWS cell")?);
        }
        rows.push(Row { columns });
    }

    Ok(RowsPage {
        specs,
        rows,
        paging_state,
    })
}

fn parse_type(body: &mut Bytes) -> Result<ColumnType, CodecError> {
    let id = primitives::get_short(body, "column type id")?;
    let parsed = match id {
        0x0000 => ColumnType::Custom(primitives::get_string(body, "custom type name")?),
        0x0001 => ColumnType::Ascii,
        0x0002 => ColumnType::Bigint,
        0x0003 => ColumnType::Blob,
        0x0004 => ColumnType::Boolean,
        0x0005 => ColumnType::Counter,
        0x0006 => ColumnType::Decimal,
        0x0007 => ColumnType::Double,
        0x0008 => ColumnType::Float,
        0x0009 => ColumnType::Int,
        0x000B => ColumnType::Timestamp,
        0x000C => ColumnType::Uuid,
        0x000D => ColumnType::Varchar,
        0x000E => ColumnType::Varint,
        0x000F => ColumnType::Timeuuid,
        0x0010 => ColumnType::Inet,
        0x0011 => ColumnType::Date,
        0x0012 => ColumnType::Time,
        0x0013 => ColumnType::Smallint,
        0x0014 => ColumnType::Tinyint,
        0x0020 => ColumnType::List(Box::new(parse_type(body)?)),
        0x0021 => {
            let key = parse_type(body)?;
            let value = parse_type(body)?;
            ColumnType::Map(Box::new(key), Box::new(value))
        }
        0x0022 => ColumnType::Set(Box::new(parse_type(body)?)),
        0x0030 => {
            let keyspace = primitives::get_string(body, "UDT keyspace")?;
            let name = primitives::get_string(body, "UDT name")?;
            let count = usize::from(primitives::get_short(body, "UDT field count")?);
            let mut fields = Vec::with_capacity(count);
            for _ in 0..count {
                let field_name = primitives::get_string(body, "UDT field name")?;
                fields.push((field_name, parse_type(body)?));
            }
            ColumnType::Udt {
                keyspace,
                name,
                fields,
            }
        }
        0x0031 => {
            let count = usize::from(primitives::get_short(body, "tuple arity")?);
            let mut elements = Vec::with_capacity(count);
            for _ in 0..count {
                elements.push(parse_type(body)?);
            }
            ColumnType::Tuple(elements)
        }
        other => {
            return Err(CodecError::malformed(
                "column type id",
                format!("{other:#06x}"),
            ))
        }
    };
    Ok(parsed)
}

fn parse_schema_change(body: &mut Bytes) -> Result<SchemaChange, CodecError> {
    let change = match primitives::get_string(body, "SCHEMA_CHANGE kind")?.as_str() {
        "CREATED" => SchemaChangeKind::Created,
        "UPDATED" => SchemaChangeKind::Updated,
        "DROPPED" => SchemaChangeKind::Dropped,
        other => {
            return Err(CodecError::malformed(
                "SCHEMA_CHANGE kind",
                other.to_owned(),
            ))
        }
    };
    let target_kind = primitives::get_string(body, "SCHEMA_CHANGE target")?;
    let keyspace = primitives::get_string(body, "SCHEMA_CHANGE keyspace")?;
    let target = match target_kind.as_str() {
        "KEYSPACE" => SchemaTarget::Keyspace { keyspace },
        "TABLE" => SchemaTarget::Table {
            keyspace,
            name: primitives::get_string(body, "SCHEMA_CHANGE name")?,
        },
        "TYPE" => SchemaTarget::Type {
            keyspace,
            name: primitives::get_string(body, "SCHEMA_CHANGE name")?,
        },
        "FUNCTION" => SchemaTarget::Function {
            keyspace,
            name: primitives::get_string(body, "SCHEMA_CHANGE name")?,
            arguments: primitives::get_string_list(body, "SCHEMA_CHANGE arguments")?,
        },
        "AGGREGATE" => SchemaTarget::Aggregate {
            keyspace,
            name: primitives::get_string(body, "SCHEMA_CHANGE name")?,
            arguments: primitives::get_string_list(body, "SCHEMA_CHANGE arguments")?,
        },
        other => {
            return Err(CodecError::malformed(
                "SCHEMA_CHANGE target",
                other.to_owned(),
            ))
        }
    };
    Ok(SchemaChange { change, target })
}

fn parse_event(body: &mut Bytes) -> Result<Event, CodecError> {
    let event_type = primitives::get_string(body, "EVENT type")?;
    match event_type.as_str() {
        "TOPOLOGY_CHANGE" => {
            let change = match primitives::get_string(body, "TOPOLOGY_CHANGE kind")?.as_str() {
                "NEW_NODE" => NodeChange::NewNode,
                "REMOVED_NODE" => NodeChange::RemovedNode,
                other => {
                    return Err(CodecError::malformed(
                        "TOPOLOGY_CHANGE kind",
                        other.to_owned(),
                    ))
                }
            };
            let node = primitives::get_inet(body, "TOPOLOGY_CHANGE node")?;
            Ok(Event::TopologyChange { change, node })
        }
        "STATUS_CHANGE" => {
            let status = match primitives::get_string(body, "STATUS_CHANGE kind")?.as_str() {
                "UP" => NodeStatus::Up,
                "DOWN" => NodeStatus::Down,
                other => {
                    return Err(CodecError::malformed(
                        "STATUS_CHANGE kind",
                        other.to_owned(),
                    ))
                }
            };
            let node = primitives::get_inet(body, "STATUS_CHANGE node")?;
            Ok(Event::StatusChange { status, node })
        }
        "SCHEMA_CHANGE" => parse_schema_change(body).map(Event::SchemaChange),
        other => Err(CodecError::malformed("EVENT type", other.to_owned())),
    }
}
