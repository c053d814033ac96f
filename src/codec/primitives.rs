//! Readers and writers for the CQL wire notation.
//!
//! The protocol spells its body layouts in a small vocabulary of
//! notations ([short], [int], [string], [bytes], [inet], ...). Readers
//! operate on a `Bytes` cursor and fail with
//! [`CodecError::Truncated`] instead of panicking when the body is
//! shorter than the notation requires.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::CodecError;

pub(crate) fn get_u8(buf: &mut Bytes, what: &'static str) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::Truncated(what));
    }
    Ok(buf.get_u8())
}

pub(crate) fn get_short(buf: &mut Bytes, what: &'static str) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::Truncated(what));
    }
    Ok(buf.get_u16())
}

pub(crate) fn get_int(buf: &mut Bytes, what: &'static str) -> Result<i32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated(what));
    }
    Ok(buf.get_i32())
}

/// Read `[string]`: a UTF-8 string prefixed with a `[short]` length.
pub(crate) fn get_string(buf: &mut Bytes, what: &'static str) -> Result<String, CodecError> {
    let len = usize::from(get_short(buf, what)?);
    if buf.remaining() < len {
        return Err(CodecError::Truncated(what));
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|err| CodecError::malformed(what, err.to_string()))
}

/// Read `[bytes]`: an `[int]` length followed by that many bytes, where a
/// negative length denotes absence.
pub(crate) fn get_bytes(buf: &mut Bytes, what: &'static str) -> Result<Option<Bytes>, CodecError> {
    let len = get_int(buf, what)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(CodecError::Truncated(what));
    }
    Ok(Some(buf.split_to(len)))
}

/// Read `[short bytes]`: a `[short]` length followed by that many bytes.
pub(crate) fn get_short_bytes(buf: &mut Bytes, what: &'static str) -> Result<Bytes, CodecError> {
    let len = usize::from(get_short(buf, what)?);
    if buf.remaining() < len {
        return Err(CodecError::Truncated(what));
    }
    Ok(buf.split_to(len))
}

/// Read `[string list]`: a `[short]` count of `[string]`s.
pub(crate) fn get_string_list(
    buf: &mut Bytes,
    what: &'static str,
) -> Result<Vec<String>, CodecError> {
    let count = usize::from(get_short(buf, what)?);
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(get_string(buf, what)?);
    }
    Ok(items)
}

/// Read `[string multimap]`: a `[short]` count of `[string]` keys each
/// followed by a `[string list]`.
pub(crate) fn get_string_multimap(
    buf: &mut Bytes,
    what: &'static str,
) -> Result<HashMap<String, Vec<String>>, CodecError> {
    let count = usize::from(get_short(buf, what)?);
    let mut map = HashMap::with_capacity(count);
    for _ in 0..count {
        let key = get_string(buf, what)?;
        let values = get_string_list(buf, what)?;
        map.insert(key, values);
    }
    Ok(map)
}

/// Read `[inet]`: one byte of address length (4 or 16), the address, and
/// an `[int]` port.
pub(crate) fn get_inet(buf: &mut Bytes, what: &'static str) -> Result<SocketAddr, CodecError> {
    let len = get_u8(buf, what)?;
    let ip = match len {
        4 => {
            if buf.remaining() < 4 {
                return Err(CodecError::Truncated(what));
            }
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        16 => {
            if buf.remaining() < 16 {
                return Err(CodecError::Truncated(what));
            }
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => {
            return Err(CodecError::malformed(
                what,
                format!("inet address length {other}"),
            ))
        }
    };
    let port = get_int(buf, what)?;
    let port = u16::try_from(port)
        .map_err(|_| CodecError::malformed(what, format!("inet port {port}")))?;
    Ok(SocketAddr::new(ip, port))
}

pub(crate) fn put_string(dst: &mut BytesMut, value: &str) -> Result<(), CodecError> {
    let len = u16::try_from(value.len())
        .map_err(|_| CodecError::malformed("[string]", "value longer than 65535 bytes"))?;
    dst.put_u16(len);
    dst.put_slice(value.as_bytes());
    Ok(())
}

pub(crate) fn put_long_string(dst: &mut BytesMut, value: &str) -> Result<(), CodecError> {
    let len = i32::try_from(value.len())
        .map_err(|_| CodecError::malformed("[long string]", "value longer than i32::MAX bytes"))?;
    dst.put_i32(len);
    dst.put_slice(value.as_bytes());
    Ok(())
}

pub(crate) fn put_short_bytes(dst: &mut BytesMut, value: &[u8]) -> Result<(), CodecError> {
    let len = u16::try_from(value.len())
        .map_err(|_| CodecError::malformed("[short bytes]", "value longer than 65535 bytes"))?;
    dst.put_u16(len);
    dst.put_slice(value);
    Ok(())
}

pub(crate) fn put_bytes(dst: &mut BytesMut, value: &[u8]) -> Result<(), CodecError> {
    let len = i32::try_from(value.len())
        .map_err(|_| CodecError::malformed("[bytes]", "value longer than i32::MAX bytes"))?;
    dst.put_i32(len);
    dst.put_slice(value);
    Ok(())
}

pub(crate) fn put_string_map(
    dst: &mut BytesMut,
    entries: &[(&str, &str)],
) -> Result<(), CodecError> {
    let count = u16::try_from(entries.len())
        .map_err(|_| CodecError::malformed("[string map]", "more than 65535 entries"))?;
    dst.put_u16(count);
    for (key, value) in entries {
        put_string(dst, key)?;
        put_string(dst, value)?;
    }
    Ok(())
}

pub(crate) fn put_string_list(dst: &mut BytesMut, items: &[&str]) -> Result<(), CodecError> {
    let count = u16::try_from(items.len())
        .map_err(|_| CodecError::malformed("[string list]", "more than 65535 entries"))?;
    dst.put_u16(count);
    for item in items {
        put_string(dst, item)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn bytes_of(raw: &[u8]) -> Bytes { Bytes::copy_from_slice(raw) }

    #[test]
    fn string_round_trip() {
        let mut dst = BytesMut::new();
        put_string(&mut dst, "keyspace1").unwrap();
        let mut buf = dst.freeze();
        assert_eq!(get_string(&mut buf, "test").unwrap(), "keyspace1");
        assert!(buf.is_empty());
    }

    #[test]
    fn negative_bytes_length_means_absent() {
        let mut buf = bytes_of(&[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(get_bytes(&mut buf, "test").unwrap(), None);
    }

    #[rstest]
    #[case::missing_short(&[0x00])]
    #[case::short_body(&[0x00, 0x05, b'a', b'b'])]
    fn truncated_string_is_reported(#[case] raw: &[u8]) {
        let mut buf = bytes_of(raw);
        assert!(matches!(
            get_string(&mut buf, "test"),
            Err(CodecError::Truncated("test"))
        ));
    }

    #[test]
    fn inet_v4_parses_address_and_port() {
        let mut buf = bytes_of(&[4, 127, 0, 0, 1, 0x00, 0x00, 0x23, 0x52]);
        let addr = get_inet(&mut buf, "test").unwrap();
        assert_eq!(addr, "127.0.0.1:9042".parse().unwrap());
    }

    #[test]
    fn inet_rejects_bogus_length() {
        let mut buf = bytes_of(&[7, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            get_inet(&mut buf, "test"),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn multimap_collects_all_values() {
        let mut dst = BytesMut::new();
        dst.put_u16(1);
        put_string(&mut dst, "CQL_VERSION").unwrap();
        put_string_list(&mut dst, &["3.0.0", "3.4.4"]).unwrap();
        let map = get_string_multimap(&mut dst.freeze(), "test").unwrap();
        assert_eq!(map["CQL_VERSION"], vec!["3.0.0", "3.4.4"]);
    }
}
