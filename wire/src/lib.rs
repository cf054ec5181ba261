//! PostgreSQL frontend/backend wire protocol.
//!
//! Two layers, no I/O shared between them:
//!
//! - [`message`] + [`codec`]: byte-level framing. `codec` reads/writes the
//!   length-prefixed messages defined in `message` over any
//!   `AsyncRead + AsyncWrite` stream. No interpretation of payload contents
//!   beyond what's needed to frame the next message.
//! - [`value`] + [`oid`]: the per-OID type codec. Pure functions, no I/O.
//!
//! This crate knows nothing about sessions, statements, or backends — it's
//! the part of the proxy that has to be bit-compatible with every
//! PostgreSQL client library, and nothing else.

pub mod codec;
pub mod error;
pub mod message;
pub mod oid;
pub mod value;

pub use error::WireError;
pub use message::{BackendMessage, ErrorFields, FieldDescription, FrontendMessage, TransactionStatus};
pub use value::PgValue;
