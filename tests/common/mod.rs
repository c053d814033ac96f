//! In-process mock CQL node for integration tests.
//!
//! The mock speaks raw protocol v4 frames over a loopback listener:
//! request frames are parsed with a small hand-rolled reader (the crate
//! codec only decodes responses) and response frames are built byte by
//! byte, so the tests exercise the client against real wire traffic.

#![allow(dead_code)]

use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use cqlwire::ConnectionConfig;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

pub const OPCODE_ERROR: u8 = 0x00;
pub const OPCODE_STARTUP: u8 = 0x01;
pub const OPCODE_READY: u8 = 0x02;
pub const OPCODE_AUTHENTICATE: u8 = 0x03;
pub const OPCODE_OPTIONS: u8 = 0x05;
pub const OPCODE_SUPPORTED: u8 = 0x06;
pub const OPCODE_QUERY: u8 = 0x07;
pub const OPCODE_RESULT: u8 = 0x08;
pub const OPCODE_PREPARE: u8 = 0x09;
pub const OPCODE_EXECUTE: u8 = 0x0A;
pub const OPCODE_REGISTER: u8 = 0x0B;
pub const OPCODE_EVENT: u8 = 0x0C;

/// Bound on any single await in a test; well past the first backoff
/// delay but short enough to fail fast on a hang.
pub async fn within<T, F: std::future::Future<Output = T>>(future: F) -> T {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("test step timed out")
}

pub struct MockNode {
    listener: TcpListener,
    pub port: u16,
}

impl MockNode {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self { listener, port }
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::builder()
            .host("127.0.0.1")
            .port(self.port)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    pub async fn accept(&self) -> MockPeer {
        let (socket, _) = within(self.listener.accept()).await.unwrap();
        MockPeer {
            socket,
            buf: BytesMut::new(),
        }
    }
}

/// A request frame as seen by the server.
pub struct RawRequest {
    pub stream: i16,
    pub opcode: u8,
    pub body: Bytes,
}

pub struct MockPeer {
    socket: TcpStream,
    buf: BytesMut,
}

impl MockPeer {
    pub async fn read_request(&mut self) -> RawRequest {
        loop {
            if self.buf.len() >= 9 {
                let body_len =
                    u32::from_be_bytes([self.buf[5], self.buf[6], self.buf[7], self.buf[8]])
                        as usize;
                if self.buf.len() >= 9 + body_len {
                    let header = self.buf.split_to(9);
                    assert_eq!(header[0], 0x04, "request version byte");
                    let stream = i16::from_be_bytes([header[2], header[3]]);
                    let opcode = header[4];
                    let body = self.buf.split_to(body_len).freeze();
                    return RawRequest {
                        stream,
                        opcode,
                        body,
                    };
                }
            }
            let n = within(self.socket.read_buf(&mut self.buf)).await.unwrap();
            assert!(n > 0, "client closed while a request was expected");
        }
    }

    /// Consume the STARTUP frame and answer READY.
    pub async fn handshake(&mut self) {
        let startup = self.read_request().await;
        assert_eq!(startup.opcode, OPCODE_STARTUP);
        assert_eq!(startup.stream, 0);
        self.write_frame(0, OPCODE_READY, &[]).await;
    }

    pub async fn write_raw(&mut self, raw: &[u8]) {
        self.socket.write_all(raw).await.unwrap();
        self.socket.flush().await.unwrap();
    }

    pub async fn write_frame(&mut self, stream: i16, opcode: u8, body: &[u8]) {
        let raw = frame_bytes(stream, opcode, body);
        self.write_raw(&raw).await;
    }

    pub async fn write_ready(&mut self, stream: i16) {
        self.write_frame(stream, OPCODE_READY, &[]).await;
    }

    pub async fn write_void(&mut self, stream: i16) {
        self.write_frame(stream, OPCODE_RESULT, &1i32.to_be_bytes()).await;
    }

    pub async fn write_error(&mut self, stream: i16, code: i32, message: &str) {
        let mut body = Vec::new();
        body.extend_from_slice(&code.to_be_bytes());
        put_string(&mut body, message);
        self.write_frame(stream, OPCODE_ERROR, &body).await;
    }

    pub async fn write_rows(&mut self, stream: i16, rows: &[Vec<String>], paging: Option<&[u8]>) {
        let body = rows_body(rows, paging);
        self.write_frame(stream, OPCODE_RESULT, &body).await;
    }

    pub async fn write_supported(&mut self, stream: i16) {
        let mut body = Vec::new();
        body.extend_from_slice(&2u16.to_be_bytes());
        put_string(&mut body, "CQL_VERSION");
        body.extend_from_slice(&1u16.to_be_bytes());
        put_string(&mut body, "3.0.0");
        put_string(&mut body, "COMPRESSION");
        body.extend_from_slice(&0u16.to_be_bytes());
        self.write_frame(stream, OPCODE_SUPPORTED, &body).await;
    }

    pub async fn write_prepared(&mut self, stream: i16, id: &[u8]) {
        let mut body = Vec::new();
        body.extend_from_slice(&4i32.to_be_bytes()); // RESULT Prepared
        body.extend_from_slice(&u16::try_from(id.len()).unwrap().to_be_bytes());
        body.extend_from_slice(id);
        self.write_frame(stream, OPCODE_RESULT, &body).await;
    }

    pub async fn write_set_keyspace(&mut self, stream: i16, keyspace: &str) {
        let mut body = Vec::new();
        body.extend_from_slice(&3i32.to_be_bytes()); // RESULT SetKeyspace
        put_string(&mut body, keyspace);
        self.write_frame(stream, OPCODE_RESULT, &body).await;
    }

    pub async fn write_topology_event(&mut self, kind: &str, octets: [u8; 4], port: u16) {
        let mut body = Vec::new();
        put_string(&mut body, "TOPOLOGY_CHANGE");
        put_string(&mut body, kind);
        body.push(4);
        body.extend_from_slice(&octets);
        body.extend_from_slice(&i32::from(port).to_be_bytes());
        self.write_frame(-1, OPCODE_EVENT, &body).await;
    }
}

pub fn frame_bytes(stream: i16, opcode: u8, body: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(9 + body.len());
    raw.push(0x84);
    raw.push(0);
    raw.extend_from_slice(&stream.to_be_bytes());
    raw.push(opcode);
    raw.extend_from_slice(&u32::try_from(body.len()).unwrap().to_be_bytes());
    raw.extend_from_slice(body);
    raw
}

fn put_string(dst: &mut Vec<u8>, value: &str) {
    dst.extend_from_slice(&u16::try_from(value.len()).unwrap().to_be_bytes());
    dst.extend_from_slice(value.as_bytes());
}

/// Build a ROWS result body: global table spec, varchar columns named
/// `c0..`, cells taken from `rows`.
pub fn rows_body(rows: &[Vec<String>], paging: Option<&[u8]>) -> Vec<u8> {
    let columns = rows.first().map_or(1, Vec::len);
    let mut body = Vec::new();
    body.extend_from_slice(&2i32.to_be_bytes()); // RESULT Rows
    let mut flags = 0x0001i32; // global table spec
    if paging.is_some() {
        flags |= 0x0002; // has more pages
    }
    body.extend_from_slice(&flags.to_be_bytes());
    body.extend_from_slice(&i32::try_from(columns).unwrap().to_be_bytes());
    if let Some(state) = paging {
        body.extend_from_slice(&i32::try_from(state.len()).unwrap().to_be_bytes());
        body.extend_from_slice(state);
    }
    put_string(&mut body, "ks");
    put_string(&mut body, "t");
    for n in 0..columns {
        put_string(&mut body, &format!("c{n}"));
        body.extend_from_slice(&0x000Du16.to_be_bytes()); // varchar
    }
    body.extend_from_slice(&i32::try_from(rows.len()).unwrap().to_be_bytes());
    for row in rows {
        for cell in row {
            body.extend_from_slice(&i32::try_from(cell.len()).unwrap().to_be_bytes());
            body.extend_from_slice(cell.as_bytes());
        }
    }
    body
}

/// The parts of a QUERY body the tests assert on.
pub struct ParsedQuery {
    pub cql: String,
    pub flags: u8,
    pub page_size: Option<i32>,
    pub paging_state: Option<Vec<u8>>,
}

pub fn parse_query_body(mut body: Bytes) -> ParsedQuery {
    let len = usize::try_from(body.get_i32()).unwrap();
    let cql = String::from_utf8(body.split_to(len).to_vec()).unwrap();
    let _consistency = body.get_u16();
    let flags = body.get_u8();
    if flags & 0x01 != 0 {
        let values = body.get_u16();
        for _ in 0..values {
            let len = body.get_i32();
            if len > 0 {
                body.advance(usize::try_from(len).unwrap());
            }
        }
    }
    let page_size = (flags & 0x04 != 0).then(|| body.get_i32());
    let paging_state = if flags & 0x08 != 0 {
        let len = body.get_i32();
        (len >= 0).then(|| body.split_to(usize::try_from(len).unwrap()).to_vec())
    } else {
        None
    };
    ParsedQuery {
        cql,
        flags,
        page_size,
        paging_state,
    }
}

/// Generate `rows` single-column rows labelled `r<start>..`.
pub fn labelled_rows(start: usize, count: usize) -> Vec<Vec<String>> {
    (start..start + count).map(|n| vec![format!("r{n}")]).collect()
}

pub fn cell_text(row: &cqlwire::Row, column: usize) -> String {
    String::from_utf8(row.columns[column].as_ref().unwrap().to_vec()).unwrap()
}
