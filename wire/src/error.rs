//! Errors raised by the wire codec and type codec.
//!
//! These are framing/encoding-level errors only; SQLSTATE assignment and
//! session recovery policy live in `proxy-session`, which wraps these.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message length: {0}")]
    BadLength(i32),

    #[error("connection closed before a complete message was read")]
    Eof,

    #[error("unsupported startup protocol version: {0:#x}")]
    UnsupportedVersion(i32),

    #[error("unknown message tag: {0:?}")]
    UnknownTag(u8),

    #[error("string field is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("invalid data for {oid_name}: {detail}")]
    BadValue { oid_name: &'static str, detail: String },
}
