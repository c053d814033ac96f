//! Error taxonomy for the frame codec.

use std::io;

/// Failures while encoding or decoding CQL frames.
///
/// Any decode-side variant is transport-fatal: the connection drops the
/// socket and reconnects, because a malformed header leaves no way to
/// resynchronise on frame boundaries.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The version byte did not announce a protocol v4 frame in the
    /// expected direction.
    #[error("unsupported protocol version byte {0:#04x}")]
    UnsupportedVersion(u8),
    /// The frame flags requested a feature this codec does not speak,
    /// such as compression.
    #[error("unsupported frame flags {0:#04x}")]
    UnsupportedFlags(u8),
    /// The opcode is not part of protocol v4.
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    /// The header announced a body larger than the protocol's 256 MiB cap.
    #[error("frame body of {0} bytes exceeds the protocol limit")]
    BodyTooLarge(usize),
    /// The body ended before a value it promised.
    #[error("truncated frame body while reading {0}")]
    Truncated(&'static str),
    /// The body contained a value that cannot be interpreted.
    #[error("malformed {context}: {detail}")]
    Malformed {
        /// What was being parsed.
        context: &'static str,
        /// Why it failed.
        detail: String,
    },
    /// Underlying transport error, surfaced through the framed stream.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CodecError {
    pub(crate) fn malformed(context: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            context,
            detail: detail.into(),
        }
    }
}
