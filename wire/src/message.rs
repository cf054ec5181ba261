//! PostgreSQL frontend/backend message definitions and payload (de)serialization.
//!
//! Framing (the length prefix, the startup special case) lives in
//! [`crate::codec`]; this module only knows how to turn an already-sliced
//! payload into a typed message and back.
//!
//! Reference: <https://www.postgresql.org/docs/current/protocol-message-formats.html>

use crate::error::WireError;
use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

/// Messages a client sends to this proxy.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    /// No type byte on the wire; framed specially by [`crate::codec::read_startup`].
    Startup { user: String, database: String, params: HashMap<String, String> },
    SslRequest,
    GssEncRequest,
    CancelRequest { process_id: i32, secret_key: i32 },
    PasswordMessage(String),
    Query(String),
    Parse { name: String, sql: String, param_types: Vec<u32> },
    Bind {
        portal: String,
        statement: String,
        param_formats: Vec<i16>,
        params: Vec<Option<Vec<u8>>>,
        result_formats: Vec<i16>,
    },
    Describe { kind: DescribeKind, name: String },
    Execute { portal: String, max_rows: i32 },
    Sync,
    Flush,
    Close { kind: DescribeKind, name: String },
    Terminate,
    /// Any tag this proxy doesn't implement (Function, CopyData/Done/Fail, replication, …).
    Unsupported(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeKind {
    Statement,
    Portal,
}

impl DescribeKind {
    fn from_byte(b: u8) -> Result<Self, WireError> {
        match b {
            b'S' => Ok(Self::Statement),
            b'P' => Ok(Self::Portal),
            other => Err(WireError::BadValue {
                oid_name: "describe/close target",
                detail: format!("expected 'S' or 'P', got {:#x}", other),
            }),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Self::Statement => b'S',
            Self::Portal => b'P',
        }
    }
}

/// Messages this proxy sends to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    AuthenticationOk,
    AuthenticationCleartextPassword,
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },
    ReadyForQuery(TransactionStatus),
    RowDescription(Vec<FieldDescription>),
    DataRow(Vec<Option<Vec<u8>>>),
    CommandComplete(String),
    EmptyQueryResponse,
    ErrorResponse(ErrorFields),
    NoticeResponse(ErrorFields),
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    ParameterDescription(Vec<u32>),
    PortalSuspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    InTransaction,
    Failed,
}

impl TransactionStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Idle => b'I',
            Self::InTransaction => b'T',
            Self::Failed => b'E',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: u32,
    pub column_attr: i16,
    pub type_oid: u32,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: i16,
}

/// Fields of an `ErrorResponse`/`NoticeResponse`, per §6.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    pub severity: String,
    pub sqlstate: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub position: Option<String>,
    pub where_: Option<String>,
}

impl ErrorFields {
    pub fn new(severity: &str, sqlstate: &str, message: impl Into<String>) -> Self {
        Self {
            severity: severity.to_string(),
            sqlstate: sqlstate.to_string(),
            message: message.into(),
            ..Default::default()
        }
    }
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn take_cstr(buf: &[u8], pos: &mut usize) -> Result<String, WireError> {
    let start = *pos;
    let nul = buf[start..]
        .iter()
        .position(|&b| b == 0)
        .ok_or(WireError::Eof)?;
    let s = std::str::from_utf8(&buf[start..start + nul])?.to_string();
    *pos = start + nul + 1;
    Ok(s)
}

fn take_i16(buf: &[u8], pos: &mut usize) -> Result<i16, WireError> {
    if buf.len() < *pos + 2 {
        return Err(WireError::Eof);
    }
    let v = i16::from_be_bytes([buf[*pos], buf[*pos + 1]]);
    *pos += 2;
    Ok(v)
}

fn take_i32(buf: &[u8], pos: &mut usize) -> Result<i32, WireError> {
    if buf.len() < *pos + 4 {
        return Err(WireError::Eof);
    }
    let v = i32::from_be_bytes([buf[*pos], buf[*pos + 1], buf[*pos + 2], buf[*pos + 3]]);
    *pos += 4;
    Ok(v)
}

fn take_u32(buf: &[u8], pos: &mut usize) -> Result<u32, WireError> {
    take_i32(buf, pos).map(|v| v as u32)
}

fn take_u8(buf: &[u8], pos: &mut usize) -> Result<u8, WireError> {
    if buf.len() < *pos + 1 {
        return Err(WireError::Eof);
    }
    let v = buf[*pos];
    *pos += 1;
    Ok(v)
}

/// Decode a length-prefixed parameter/bytea value: -1 means SQL NULL.
fn take_sized(buf: &[u8], pos: &mut usize) -> Result<Option<Vec<u8>>, WireError> {
    let len = take_i32(buf, pos)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if buf.len() < *pos + len {
        return Err(WireError::Eof);
    }
    let v = buf[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(Some(v))
}

fn put_sized(buf: &mut BytesMut, v: &Option<Vec<u8>>) {
    match v {
        None => buf.put_i32(-1),
        Some(bytes) => {
            buf.put_i32(bytes.len() as i32);
            buf.put_slice(bytes);
        }
    }
}

/// Decode a `FrontendMessage` from an already-tagged, already-length-sliced payload.
pub fn decode_frontend(tag: u8, payload: &[u8]) -> Result<FrontendMessage, WireError> {
    let mut pos = 0usize;
    Ok(match tag {
        b'p' => FrontendMessage::PasswordMessage(std::str::from_utf8(
            payload.strip_suffix(&[0]).unwrap_or(payload),
        )?.to_string()),
        b'Q' => FrontendMessage::Query(
            std::str::from_utf8(payload.strip_suffix(&[0]).unwrap_or(payload))?.to_string(),
        ),
        b'P' => {
            let name = take_cstr(payload, &mut pos)?;
            let sql = take_cstr(payload, &mut pos)?;
            let nparams = take_i16(payload, &mut pos)? as usize;
            let mut param_types = Vec::with_capacity(nparams);
            for _ in 0..nparams {
                param_types.push(take_u32(payload, &mut pos)?);
            }
            FrontendMessage::Parse { name, sql, param_types }
        }
        b'B' => {
            let portal = take_cstr(payload, &mut pos)?;
            let statement = take_cstr(payload, &mut pos)?;
            let nformats = take_i16(payload, &mut pos)? as usize;
            let mut param_formats = Vec::with_capacity(nformats);
            for _ in 0..nformats {
                param_formats.push(take_i16(payload, &mut pos)?);
            }
            let nparams = take_i16(payload, &mut pos)? as usize;
            let mut params = Vec::with_capacity(nparams);
            for _ in 0..nparams {
                params.push(take_sized(payload, &mut pos)?);
            }
            let nresults = take_i16(payload, &mut pos)? as usize;
            let mut result_formats = Vec::with_capacity(nresults);
            for _ in 0..nresults {
                result_formats.push(take_i16(payload, &mut pos)?);
            }
            FrontendMessage::Bind { portal, statement, param_formats, params, result_formats }
        }
        b'D' => {
            let kind = DescribeKind::from_byte(take_u8(payload, &mut pos)?)?;
            let name = take_cstr(payload, &mut pos)?;
            FrontendMessage::Describe { kind, name }
        }
        b'E' => {
            let portal = take_cstr(payload, &mut pos)?;
            let max_rows = take_i32(payload, &mut pos)?;
            FrontendMessage::Execute { portal, max_rows }
        }
        b'S' => FrontendMessage::Sync,
        b'H' => FrontendMessage::Flush,
        b'C' => {
            let kind = DescribeKind::from_byte(take_u8(payload, &mut pos)?)?;
            let name = take_cstr(payload, &mut pos)?;
            FrontendMessage::Close { kind, name }
        }
        b'X' => FrontendMessage::Terminate,
        other => FrontendMessage::Unsupported(other),
    })
}

/// Encode a `FrontendMessage` payload (without tag byte or length prefix).
/// Used by tests exercising the round-trip law and by any harness that
/// impersonates a client.
pub fn encode_frontend_payload(msg: &FrontendMessage) -> BytesMut {
    let mut buf = BytesMut::new();
    match msg {
        FrontendMessage::PasswordMessage(s) | FrontendMessage::Query(s) => put_cstr(&mut buf, s),
        FrontendMessage::Parse { name, sql, param_types } => {
            put_cstr(&mut buf, name);
            put_cstr(&mut buf, sql);
            buf.put_i16(param_types.len() as i16);
            for oid in param_types {
                buf.put_u32(*oid);
            }
        }
        FrontendMessage::Bind { portal, statement, param_formats, params, result_formats } => {
            put_cstr(&mut buf, portal);
            put_cstr(&mut buf, statement);
            buf.put_i16(param_formats.len() as i16);
            for f in param_formats {
                buf.put_i16(*f);
            }
            buf.put_i16(params.len() as i16);
            for p in params {
                put_sized(&mut buf, p);
            }
            buf.put_i16(result_formats.len() as i16);
            for f in result_formats {
                buf.put_i16(*f);
            }
        }
        FrontendMessage::Describe { kind, name } | FrontendMessage::Close { kind, name } => {
            buf.put_u8(kind.to_byte());
            put_cstr(&mut buf, name);
        }
        FrontendMessage::Execute { portal, max_rows } => {
            put_cstr(&mut buf, portal);
            buf.put_i32(*max_rows);
        }
        FrontendMessage::Sync
        | FrontendMessage::Flush
        | FrontendMessage::Terminate
        | FrontendMessage::SslRequest
        | FrontendMessage::GssEncRequest
        | FrontendMessage::CancelRequest { .. }
        | FrontendMessage::Startup { .. }
        | FrontendMessage::Unsupported(_) => {}
    }
    buf
}

/// Wire tag byte for a `FrontendMessage`, or `None` for the untagged special cases.
pub fn frontend_tag(msg: &FrontendMessage) -> Option<u8> {
    match msg {
        FrontendMessage::PasswordMessage(_) => Some(b'p'),
        FrontendMessage::Query(_) => Some(b'Q'),
        FrontendMessage::Parse { .. } => Some(b'P'),
        FrontendMessage::Bind { .. } => Some(b'B'),
        FrontendMessage::Describe { .. } => Some(b'D'),
        FrontendMessage::Execute { .. } => Some(b'E'),
        FrontendMessage::Sync => Some(b'S'),
        FrontendMessage::Flush => Some(b'H'),
        FrontendMessage::Close { .. } => Some(b'C'),
        FrontendMessage::Terminate => Some(b'X'),
        FrontendMessage::Unsupported(tag) => Some(*tag),
        FrontendMessage::Startup { .. }
        | FrontendMessage::SslRequest
        | FrontendMessage::GssEncRequest
        | FrontendMessage::CancelRequest { .. } => None,
    }
}

fn error_fields_payload(fields: &ErrorFields) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(b'S');
    put_cstr(&mut buf, &fields.severity);
    buf.put_u8(b'C');
    put_cstr(&mut buf, &fields.sqlstate);
    buf.put_u8(b'M');
    put_cstr(&mut buf, &fields.message);
    if let Some(d) = &fields.detail {
        buf.put_u8(b'D');
        put_cstr(&mut buf, d);
    }
    if let Some(h) = &fields.hint {
        buf.put_u8(b'H');
        put_cstr(&mut buf, h);
    }
    if let Some(p) = &fields.position {
        buf.put_u8(b'P');
        put_cstr(&mut buf, p);
    }
    if let Some(w) = &fields.where_ {
        buf.put_u8(b'W');
        put_cstr(&mut buf, w);
    }
    buf.put_u8(0);
    buf
}

fn take_error_fields(payload: &[u8]) -> Result<ErrorFields, WireError> {
    let mut fields = ErrorFields::default();
    let mut pos = 0usize;
    loop {
        if pos >= payload.len() {
            return Err(WireError::Eof);
        }
        let code = payload[pos];
        pos += 1;
        if code == 0 {
            break;
        }
        let value = take_cstr(payload, &mut pos)?;
        match code {
            b'S' => fields.severity = value,
            b'C' => fields.sqlstate = value,
            b'M' => fields.message = value,
            b'D' => fields.detail = Some(value),
            b'H' => fields.hint = Some(value),
            b'P' => fields.position = Some(value),
            b'W' => fields.where_ = Some(value),
            _ => {}
        }
    }
    Ok(fields)
}

/// Encode a `BackendMessage` to (tag, payload) for [`crate::codec`] to frame.
pub fn encode_backend(msg: &BackendMessage) -> (u8, BytesMut) {
    let mut buf = BytesMut::new();
    let tag = match msg {
        BackendMessage::AuthenticationOk => {
            buf.put_i32(0);
            b'R'
        }
        BackendMessage::AuthenticationCleartextPassword => {
            buf.put_i32(3);
            b'R'
        }
        BackendMessage::ParameterStatus { name, value } => {
            put_cstr(&mut buf, name);
            put_cstr(&mut buf, value);
            b'S'
        }
        BackendMessage::BackendKeyData { process_id, secret_key } => {
            buf.put_i32(*process_id);
            buf.put_i32(*secret_key);
            b'K'
        }
        BackendMessage::ReadyForQuery(status) => {
            buf.put_u8(status.as_byte());
            b'Z'
        }
        BackendMessage::RowDescription(fields) => {
            buf.put_i16(fields.len() as i16);
            for f in fields {
                put_cstr(&mut buf, &f.name);
                buf.put_u32(f.table_oid);
                buf.put_i16(f.column_attr);
                buf.put_u32(f.type_oid);
                buf.put_i16(f.type_size);
                buf.put_i32(f.type_modifier);
                buf.put_i16(f.format);
            }
            b'T'
        }
        BackendMessage::DataRow(columns) => {
            buf.put_i16(columns.len() as i16);
            for c in columns {
                put_sized(&mut buf, c);
            }
            b'D'
        }
        BackendMessage::CommandComplete(tag_str) => {
            put_cstr(&mut buf, tag_str);
            b'C'
        }
        BackendMessage::EmptyQueryResponse => b'I',
        BackendMessage::ErrorResponse(fields) => {
            buf.extend_from_slice(&error_fields_payload(fields));
            b'E'
        }
        BackendMessage::NoticeResponse(fields) => {
            buf.extend_from_slice(&error_fields_payload(fields));
            b'N'
        }
        BackendMessage::ParseComplete => b'1',
        BackendMessage::BindComplete => b'2',
        BackendMessage::CloseComplete => b'3',
        BackendMessage::NoData => b'n',
        BackendMessage::ParameterDescription(oids) => {
            buf.put_i16(oids.len() as i16);
            for oid in oids {
                buf.put_u32(*oid);
            }
            b't'
        }
        BackendMessage::PortalSuspended => b's',
    };
    (tag, buf)
}

/// Decode a `BackendMessage` from an already-tagged, already-length-sliced
/// payload. Exercised by the P2 round-trip tests; production code never
/// reads real `BackendMessage`s off a socket (the backend is the opaque
/// `BackendClient`, not another PostgreSQL wire peer).
pub fn decode_backend(tag: u8, payload: &[u8]) -> Result<BackendMessage, WireError> {
    let mut pos = 0usize;
    Ok(match tag {
        b'R' => {
            let code = take_i32(payload, &mut pos)?;
            match code {
                0 => BackendMessage::AuthenticationOk,
                3 => BackendMessage::AuthenticationCleartextPassword,
                other => {
                    return Err(WireError::BadValue {
                        oid_name: "authentication request",
                        detail: format!("unsupported auth code {other}"),
                    })
                }
            }
        }
        b'S' => {
            let name = take_cstr(payload, &mut pos)?;
            let value = take_cstr(payload, &mut pos)?;
            BackendMessage::ParameterStatus { name, value }
        }
        b'K' => {
            let process_id = take_i32(payload, &mut pos)?;
            let secret_key = take_i32(payload, &mut pos)?;
            BackendMessage::BackendKeyData { process_id, secret_key }
        }
        b'Z' => {
            let status = match payload[0] {
                b'I' => TransactionStatus::Idle,
                b'T' => TransactionStatus::InTransaction,
                b'E' => TransactionStatus::Failed,
                other => {
                    return Err(WireError::BadValue {
                        oid_name: "transaction status",
                        detail: format!("unknown status byte {other:#x}"),
                    })
                }
            };
            BackendMessage::ReadyForQuery(status)
        }
        b'T' => {
            let n = take_i16(payload, &mut pos)? as usize;
            let mut fields = Vec::with_capacity(n);
            for _ in 0..n {
                let name = take_cstr(payload, &mut pos)?;
                let table_oid = take_u32(payload, &mut pos)?;
                let column_attr = take_i16(payload, &mut pos)?;
                let type_oid = take_u32(payload, &mut pos)?;
                let type_size = take_i16(payload, &mut pos)?;
                let type_modifier = take_i32(payload, &mut pos)?;
                let format = take_i16(payload, &mut pos)?;
                fields.push(FieldDescription {
                    name,
                    table_oid,
                    column_attr,
                    type_oid,
                    type_size,
                    type_modifier,
                    format,
                });
            }
            BackendMessage::RowDescription(fields)
        }
        b'D' => {
            let n = take_i16(payload, &mut pos)? as usize;
            let mut columns = Vec::with_capacity(n);
            for _ in 0..n {
                columns.push(take_sized(payload, &mut pos)?);
            }
            BackendMessage::DataRow(columns)
        }
        b'C' => BackendMessage::CommandComplete(take_cstr(payload, &mut pos)?),
        b'I' => BackendMessage::EmptyQueryResponse,
        b'E' => BackendMessage::ErrorResponse(take_error_fields(payload)?),
        b'N' => BackendMessage::NoticeResponse(take_error_fields(payload)?),
        b'1' => BackendMessage::ParseComplete,
        b'2' => BackendMessage::BindComplete,
        b'3' => BackendMessage::CloseComplete,
        b'n' => BackendMessage::NoData,
        b't' => {
            let n = take_i16(payload, &mut pos)? as usize;
            let mut oids = Vec::with_capacity(n);
            for _ in 0..n {
                oids.push(take_u32(payload, &mut pos)?);
            }
            BackendMessage::ParameterDescription(oids)
        }
        b's' => BackendMessage::PortalSuspended,
        other => return Err(WireError::UnknownTag(other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_frontend(msg: FrontendMessage) {
        let payload = encode_frontend_payload(&msg);
        let tag = frontend_tag(&msg).expect("tagged message");
        let decoded = decode_frontend(tag, &payload).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn query_roundtrips() {
        roundtrip_frontend(FrontendMessage::Query("select 1".to_string()));
    }

    #[test]
    fn parse_roundtrips_with_param_oids() {
        roundtrip_frontend(FrontendMessage::Parse {
            name: "s1".to_string(),
            sql: "select $1::int8".to_string(),
            param_types: vec![20],
        });
    }

    #[test]
    fn bind_roundtrips_with_null_param() {
        roundtrip_frontend(FrontendMessage::Bind {
            portal: String::new(),
            statement: "s1".to_string(),
            param_formats: vec![1],
            params: vec![None, Some(vec![0, 0, 0, 42])],
            result_formats: vec![1],
        });
    }

    #[test]
    fn describe_and_close_roundtrip() {
        roundtrip_frontend(FrontendMessage::Describe { kind: DescribeKind::Statement, name: "s1".to_string() });
        roundtrip_frontend(FrontendMessage::Close { kind: DescribeKind::Portal, name: String::new() });
    }

    #[test]
    fn describe_and_close_reject_empty_payload() {
        assert!(matches!(decode_frontend(b'D', &[]), Err(WireError::Eof)));
        assert!(matches!(decode_frontend(b'C', &[]), Err(WireError::Eof)));
    }

    fn roundtrip_backend(msg: BackendMessage) {
        let (tag, payload) = encode_backend(&msg);
        let decoded = decode_backend(tag, &payload).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn row_description_and_data_row_roundtrip() {
        roundtrip_backend(BackendMessage::RowDescription(vec![FieldDescription {
            name: "?column?".to_string(),
            table_oid: 0,
            column_attr: 0,
            type_oid: crate::oid::INT8,
            type_size: 8,
            type_modifier: -1,
            format: 0,
        }]));
        roundtrip_backend(BackendMessage::DataRow(vec![Some(b"1".to_vec()), None]));
    }

    #[test]
    fn error_response_roundtrips_with_optional_fields() {
        let mut fields = ErrorFields::new("ERROR", "08P01", "protocol violation");
        fields.detail = Some("bad parameter count".to_string());
        roundtrip_backend(BackendMessage::ErrorResponse(fields));
    }

    #[test]
    fn ready_for_query_roundtrips_all_states() {
        for status in [TransactionStatus::Idle, TransactionStatus::InTransaction, TransactionStatus::Failed] {
            roundtrip_backend(BackendMessage::ReadyForQuery(status));
        }
    }
}
