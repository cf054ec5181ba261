//! Session-level error taxonomy and the single SQLSTATE mapping table.
//!
//! Every error kind the state machine can hit funnels through
//! [`as_error_response`] so the `(SQLSTATE, severity, fatal)` triple lives in
//! one auditable place instead of being decided ad hoc at each call site.

use proxy_translate::TranslateError;
use proxy_wire::{ErrorFields, WireError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error("duplicate prepared statement {0:?}")]
    DuplicatePreparedStatement(String),

    #[error("unknown prepared statement {0:?}")]
    UnknownPreparedStatement(String),

    #[error("unknown portal {0:?}")]
    UnknownPortal(String),

    #[error("parameter count mismatch: parse declared {declared}, bind supplied {supplied}")]
    ParameterCountMismatch { declared: usize, supplied: usize },

    #[error("query canceled")]
    Canceled,

    #[error("server is shutting down")]
    ShuttingDown,

    #[error("invalid text-format parameter value: {0}")]
    TextCodec(String),

    #[error("invalid binary-format parameter value: {0}")]
    BinaryCodec(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the opaque backend SQL client (§4.7).
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{message}")]
    Sql { sqlstate: Option<String>, message: String },

    #[error("backend connection unavailable: {0}")]
    Unavailable(String),

    #[error("operation canceled")]
    Canceled,
}

/// Severity tag for an `ErrorResponse`/`NoticeResponse`'s `S` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Fatal,
}

impl Severity {
    fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

/// Maps a [`SessionError`] to the wire-level fields plus whether the session
/// must close afterward, per §7's error table.
pub fn as_error_response(err: &SessionError) -> (ErrorFields, bool) {
    let (sqlstate, severity, fatal, message) = match err {
        SessionError::Protocol(msg) => ("08P01", Severity::Error, false, msg.clone()),
        SessionError::AuthFailed => ("28P01", Severity::Fatal, true, "password authentication failed".to_string()),
        SessionError::Backend(BackendError::Sql { sqlstate, message }) => {
            return (
                ErrorFields::new(Severity::Error.as_str(), sqlstate.as_deref().unwrap_or("42000"), message.clone()),
                false,
            )
        }
        SessionError::Backend(BackendError::Unavailable(msg)) => ("58000", Severity::Fatal, true, msg.clone()),
        SessionError::Backend(BackendError::Canceled) => ("57014", Severity::Error, false, "query canceled".to_string()),
        SessionError::Wire(WireError::InvalidUtf8(_)) => {
            ("22021", Severity::Error, false, "invalid byte sequence for encoding \"UTF8\"".to_string())
        }
        SessionError::Wire(e) => ("08P01", Severity::Fatal, true, e.to_string()),
        SessionError::Translate(e) => ("XX000", Severity::Error, false, e.to_string()),
        SessionError::DuplicatePreparedStatement(name) => {
            ("42P05", Severity::Error, false, format!("prepared statement {name:?} already exists"))
        }
        SessionError::UnknownPreparedStatement(name) => {
            ("08P01", Severity::Error, false, format!("prepared statement {name:?} does not exist"))
        }
        SessionError::UnknownPortal(name) => {
            ("08P01", Severity::Error, false, format!("portal {name:?} does not exist"))
        }
        SessionError::ParameterCountMismatch { declared, supplied } => (
            "08P01",
            Severity::Error,
            false,
            format!("bind message supplies {supplied} parameters, but prepared statement requires {declared}"),
        ),
        SessionError::Canceled => ("57014", Severity::Error, false, "query canceled".to_string()),
        SessionError::ShuttingDown => (
            "57P01",
            Severity::Fatal,
            true,
            "terminating connection due to administrator command".to_string(),
        ),
        SessionError::TextCodec(detail) => ("22P02", Severity::Error, false, detail.clone()),
        SessionError::BinaryCodec(detail) => ("22P03", Severity::Error, false, detail.clone()),
        SessionError::Io(e) => ("08006", Severity::Fatal, true, e.to_string()),
    };
    (ErrorFields::new(severity.as_str(), sqlstate, message), fatal)
}

/// Type codec failures decoding a bound parameter: SQLSTATE depends on format (§7.4).
pub fn type_codec_error(binary: bool, detail: impl std::fmt::Display) -> SessionError {
    if binary {
        SessionError::BinaryCodec(detail.to_string())
    } else {
        SessionError::TextCodec(detail.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failure_is_fatal_with_correct_sqlstate() {
        let (fields, fatal) = as_error_response(&SessionError::AuthFailed);
        assert_eq!(fields.sqlstate, "28P01");
        assert!(fatal);
    }

    #[test]
    fn duplicate_prepared_statement_is_non_fatal() {
        let err = SessionError::DuplicatePreparedStatement("s1".to_string());
        let (fields, fatal) = as_error_response(&err);
        assert_eq!(fields.sqlstate, "42P05");
        assert!(!fatal);
    }

    #[test]
    fn backend_sql_error_passes_through_sqlstate() {
        let err = SessionError::Backend(BackendError::Sql {
            sqlstate: Some("23505".to_string()),
            message: "duplicate key".to_string(),
        });
        let (fields, fatal) = as_error_response(&err);
        assert_eq!(fields.sqlstate, "23505");
        assert!(!fatal);
    }

    #[test]
    fn backend_sql_error_defaults_sqlstate_when_absent() {
        let err = SessionError::Backend(BackendError::Sql { sqlstate: None, message: "oops".to_string() });
        let (fields, _) = as_error_response(&err);
        assert_eq!(fields.sqlstate, "42000");
    }

    #[test]
    fn text_format_codec_error_uses_22p02() {
        let err = type_codec_error(false, "invalid input syntax for type bigint");
        let (fields, _) = as_error_response(&err);
        assert_eq!(fields.sqlstate, "22P02");
    }

    #[test]
    fn binary_format_codec_error_uses_22p03() {
        let err = type_codec_error(true, "wrong byte length");
        let (fields, _) = as_error_response(&err);
        assert_eq!(fields.sqlstate, "22P03");
    }

    #[test]
    fn shutdown_is_fatal_with_57p01() {
        let (fields, fatal) = as_error_response(&SessionError::ShuttingDown);
        assert_eq!(fields.sqlstate, "57P01");
        assert!(fatal);
    }
}
