//! CQL binary protocol v4 frame layer.
//!
//! [`CqlCodec`] plugs into `tokio_util`'s framing: the decoder slices
//! complete response frames out of the rolling receive buffer (keeping
//! partial bytes until more arrive) and the encoder wraps an outbound
//! request with its assigned stream id. Frames split across any number
//! of TCP segments, and multiple frames per segment, decode identically.

use bytes::{BufMut, BytesMut};
use log::warn;
use tokio_util::codec::{Decoder, Encoder};

mod error;
mod params;
mod primitives;
mod request;
mod response;

pub use error::CodecError;
pub use params::{Consistency, QueryParams, Value, DEFAULT_PAGE_SIZE};
pub use request::Request;
pub use response::{
    ColumnSpec, ColumnType, Prepared, Response, ResultBody, Row, RowsPage,
};

/// Version byte of a protocol v4 request frame.
pub const REQUEST_VERSION: u8 = 0x04;
/// Version byte of a protocol v4 response frame.
pub const RESPONSE_VERSION: u8 = 0x84;
/// Fixed frame header length.
pub const HEADER_LEN: usize = 9;

/// Hard cap on body length, from the protocol specification.
const MAX_BODY_LEN: usize = 256 * 1024 * 1024;

const FLAG_COMPRESSED: u8 = 0x01;
const FLAG_TRACING: u8 = 0x02;
const FLAG_WARNING: u8 = 0x08;

/// Frame opcodes of protocol v4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Error = 0x00,
    Startup = 0x01,
    Ready = 0x02,
    Authenticate = 0x03,
    Options = 0x05,
    Supported = 0x06,
    Query = 0x07,
    Result = 0x08,
    Prepare = 0x09,
    Execute = 0x0A,
    Register = 0x0B,
    Event = 0x0C,
}

impl TryFrom<u8> for Opcode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        let opcode = match value {
            0x00 => Opcode::Error,
            0x01 => Opcode::Startup,
            0x02 => Opcode::Ready,
            0x03 => Opcode::Authenticate,
            0x05 => Opcode::Options,
            0x06 => Opcode::Supported,
            0x07 => Opcode::Query,
            0x08 => Opcode::Result,
            0x09 => Opcode::Prepare,
            0x0A => Opcode::Execute,
            0x0B => Opcode::Register,
            0x0C => Opcode::Event,
            other => return Err(CodecError::UnknownOpcode(other)),
        };
        Ok(opcode)
    }
}

/// A decoded inbound frame: the stream id it answers plus its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Stream id from the header; `-1` marks a server-initiated event.
    pub stream: i16,
    /// The parsed body.
    pub body: Response,
}

/// An outbound frame: a request paired with its assigned stream id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Stream id stamped into the header.
    pub stream: i16,
    /// The request to encode.
    pub request: Request,
}

/// Codec for client-side CQL framing.
#[derive(Debug, Clone, Copy, Default)]
pub struct CqlCodec;

impl CqlCodec {
    /// Create a codec instance.
    #[must_use]
    pub fn new() -> Self { Self }
}

impl Decoder for CqlCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let body_len = u32::from_be_bytes([src[5], src[6], src[7], src[8]]) as usize;
        if body_len > MAX_BODY_LEN {
            return Err(CodecError::BodyTooLarge(body_len));
        }
        let frame_len = HEADER_LEN + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let header = src.split_to(HEADER_LEN);
        let version = header[0];
        if version != RESPONSE_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let flags = header[1];
        if flags & FLAG_COMPRESSED != 0 || flags & FLAG_TRACING != 0 {
            // Neither compression nor tracing is ever requested, so a
            // server setting these flags is off-protocol.
            return Err(CodecError::UnsupportedFlags(flags));
        }
        let stream = i16::from_be_bytes([header[2], header[3]]);
        let opcode = Opcode::try_from(header[4])?;

        let mut body = src.split_to(body_len).freeze();
        if flags & FLAG_WARNING != 0 {
            for warning in primitives::get_string_list(&mut body, "frame warnings")? {
                warn!("server warning: {warning}");
            }
        }
        let body = Response::parse(opcode, body)?;
        Ok(Some(Frame { stream, body }))
    }
}

impl Encoder<OutboundFrame> for CqlCodec {
    type Error = CodecError;

    fn encode(&mut self, item: OutboundFrame, dst: &mut BytesMut) -> Result<(), CodecError> {
        dst.put_u8(REQUEST_VERSION);
        dst.put_u8(0);
        dst.put_i16(item.stream);
        dst.put_u8(item.request.opcode() as u8);

        let length_at = dst.len();
        dst.put_u32(0);
        let body_start = dst.len();
        item.request.encode_body(dst)?;
        let body_len = u32::try_from(dst.len() - body_start)
            .map_err(|_| CodecError::BodyTooLarge(dst.len() - body_start))?;
        dst[length_at..length_at + 4].copy_from_slice(&body_len.to_be_bytes());
        Ok(())
    }
}
