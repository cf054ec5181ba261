//! The per-client session state machine (§4.5): startup, authentication, then
//! the message loop dispatching simple- and extended-query flows.

use crate::backend::{BackendClient, ColumnDescriptor, ExecResult};
use crate::error::{as_error_response, BackendError, SessionError};
use crate::statement::{PortalCursor, Portal, PreparedStatement, StatementTable};
use proxy_translate::Translator;
use proxy_wire::codec;
use proxy_wire::message::{BackendMessage, DescribeKind, ErrorFields, FieldDescription, FrontendMessage};
use proxy_wire::{PgValue, TransactionStatus, WireError};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;

/// Resolved per-session policy, supplied by the server from [`crate::server`]'s
/// configuration (§4.8 lives one layer up, in `proxy-daemon`).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub authenticate: bool,
    pub expected_password: Option<String>,
    pub force_binary: bool,
    pub server_version: String,
}

struct RowBuffer {
    rows: VecDeque<Vec<Option<PgValue>>>,
    total: usize,
}

/// One client connection's entire lifecycle, from authentication to close.
pub struct Session<S> {
    stream: S,
    process_id: i32,
    secret_key: i32,
    user: String,
    database: String,
    config: SessionConfig,
    backend: Arc<dyn BackendClient>,
    translator: Arc<Translator>,
    cancel: Arc<Notify>,
    shutdown: Arc<Notify>,
    statements: StatementTable,
    pending: Vec<BackendMessage>,
    /// "skip until Sync" substate per §4.5/§9.
    extended_error: bool,
    row_buffers: HashMap<String, RowBuffer>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: S,
        process_id: i32,
        secret_key: i32,
        user: String,
        database: String,
        config: SessionConfig,
        backend: Arc<dyn BackendClient>,
        translator: Arc<Translator>,
        cancel: Arc<Notify>,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            stream,
            process_id,
            secret_key,
            user,
            database,
            config,
            backend,
            translator,
            cancel,
            shutdown,
            statements: StatementTable::new(),
            pending: Vec::new(),
            extended_error: false,
            row_buffers: HashMap::new(),
        }
    }

    /// Runs authentication then the message loop until the client disconnects
    /// or a fatal error closes the session.
    pub async fn run(mut self) -> Result<(), SessionError> {
        if let Err(err) = self.authenticate().await {
            let (fields, _) = as_error_response(&err);
            let _ = codec::write_message(&mut self.stream, &BackendMessage::ErrorResponse(fields)).await;
            return Err(err);
        }
        loop {
            let msg = match codec::read_message(&mut self.stream).await {
                Ok(m) => m,
                Err(WireError::Eof) => return Ok(()),
                Err(e) => return Err(SessionError::Wire(e)),
            };
            match msg {
                FrontendMessage::Terminate => return Ok(()),
                FrontendMessage::Query(sql) => self.handle_simple_query(&sql).await?,
                FrontendMessage::Parse { name, sql, param_types } => {
                    self.handle_parse(name, sql, param_types).await
                }
                FrontendMessage::Bind { portal, statement, param_formats, params, result_formats } => {
                    self.handle_bind(portal, statement, param_formats, params, result_formats)
                }
                FrontendMessage::Describe { kind, name } => self.handle_describe(kind, &name).await,
                FrontendMessage::Execute { portal, max_rows } => {
                    self.handle_execute(&portal, max_rows).await
                }
                FrontendMessage::Close { kind, name } => self.handle_close(kind, &name),
                FrontendMessage::Sync => self.handle_sync().await?,
                FrontendMessage::Flush => self.flush().await?,
                FrontendMessage::Unsupported(tag) => self.handle_unsupported(tag),
                FrontendMessage::PasswordMessage(_) => {
                    self.record_error(SessionError::Protocol(
                        "PasswordMessage not expected outside authentication".to_string(),
                    ))
                }
                FrontendMessage::Startup { .. }
                | FrontendMessage::SslRequest
                | FrontendMessage::GssEncRequest
                | FrontendMessage::CancelRequest { .. } => {
                    return Err(SessionError::Protocol("unexpected startup message mid-session".to_string()))
                }
            }
        }
    }

    async fn authenticate(&mut self) -> Result<(), SessionError> {
        tracing::info!(user = %self.user, database = %self.database, "session starting");
        if self.config.authenticate {
            codec::write_message(&mut self.stream, &BackendMessage::AuthenticationCleartextPassword).await?;
            let msg = codec::read_message(&mut self.stream).await?;
            let FrontendMessage::PasswordMessage(password) = msg else {
                return Err(SessionError::Protocol("expected PasswordMessage".to_string()));
            };
            if Some(&password) != self.config.expected_password.as_ref() {
                tracing::warn!(user = %self.user, "authentication failed");
                crate::metrics::record_auth_failure();
                return Err(SessionError::AuthFailed);
            }
        }
        codec::write_message(&mut self.stream, &BackendMessage::AuthenticationOk).await?;
        for (name, value) in [
            ("server_version", self.config.server_version.clone()),
            ("client_encoding", "UTF8".to_string()),
            ("DateStyle", "ISO, MDY".to_string()),
            ("IntervalStyle", "iso_8601".to_string()),
            ("TimeZone", "UTC".to_string()),
        ] {
            codec::write_message(
                &mut self.stream,
                &BackendMessage::ParameterStatus { name: name.to_string(), value },
            )
            .await?;
        }
        codec::write_message(
            &mut self.stream,
            &BackendMessage::BackendKeyData { process_id: self.process_id, secret_key: self.secret_key },
        )
        .await?;
        codec::write_message(&mut self.stream, &BackendMessage::ReadyForQuery(TransactionStatus::Idle)).await?;
        tracing::info!(user = %self.user, "session ready");
        Ok(())
    }

    /// Races a backend call against this session's cancel signal and the
    /// server-wide shutdown signal (§5).
    async fn race_backend<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, BackendError>>,
    ) -> Result<T, SessionError> {
        tokio::select! {
            _ = self.cancel.notified() => {
                crate::metrics::record_cancel();
                Err(SessionError::Canceled)
            }
            _ = self.shutdown.notified() => Err(SessionError::ShuttingDown),
            res = fut => res.map_err(SessionError::Backend),
        }
    }

    fn queue(&mut self, msg: BackendMessage) {
        self.pending.push(msg);
    }

    async fn flush(&mut self) -> Result<(), SessionError> {
        for msg in self.pending.drain(..) {
            codec::write_message(&mut self.stream, &msg).await?;
        }
        Ok(())
    }

    /// Records one error into the pending queue and enters the skip-until-Sync
    /// substate, unless already in it (§4.5, §9): only the first error in a
    /// batch produces an `ErrorResponse`.
    fn record_error(&mut self, err: SessionError) {
        if self.extended_error {
            return;
        }
        let (fields, _fatal) = as_error_response(&err);
        tracing::debug!(sqlstate = %fields.sqlstate, "extended-query error, entering skip-until-sync");
        self.queue(BackendMessage::ErrorResponse(fields));
        self.extended_error = true;
    }

    async fn handle_simple_query(&mut self, sql: &str) -> Result<(), SessionError> {
        let statements: Vec<&str> = sql.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
        if statements.is_empty() {
            codec::write_message(&mut self.stream, &BackendMessage::EmptyQueryResponse).await?;
        } else {
            for stmt in statements {
                if let Err(err) = self.run_one_simple_statement(stmt).await {
                    let (fields, _) = as_error_response(&err);
                    codec::write_message(&mut self.stream, &BackendMessage::ErrorResponse(fields)).await?;
                    break;
                }
            }
        }
        let status = self.backend.transaction_status().await;
        codec::write_message(&mut self.stream, &BackendMessage::ReadyForQuery(status)).await?;
        Ok(())
    }

    async fn run_one_simple_statement(&mut self, sql: &str) -> Result<(), SessionError> {
        let (translated, classification) = self.translator.translate(sql, None);
        tracing::debug!(?classification, "translated simple-query statement");
        let timer = crate::metrics::QueryTimer::start(format!("{classification:?}"));
        let result = self.run_one_simple_statement_inner(&translated).await;
        timer.finish(result.is_ok());
        result
    }

    async fn run_one_simple_statement_inner(&mut self, translated: &str) -> Result<(), SessionError> {
        let handle = self.race_backend(self.backend.prepare(translated, &[])).await?;
        match self.race_backend(self.backend.execute(&handle, &[])).await? {
            ExecResult::Rows { columns, rows } => {
                let fields = field_descriptions(&columns, |_| 0);
                codec::write_message(&mut self.stream, &BackendMessage::RowDescription(fields)).await?;
                let row_count = rows.len();
                for row in rows {
                    let values = row.iter().map(|v| v.as_ref().and_then(PgValue::encode_text)).collect();
                    codec::write_message(&mut self.stream, &BackendMessage::DataRow(values)).await?;
                }
                codec::write_message(
                    &mut self.stream,
                    &BackendMessage::CommandComplete(format!("SELECT {row_count}")),
                )
                .await?;
            }
            ExecResult::Command { tag } => {
                codec::write_message(&mut self.stream, &BackendMessage::CommandComplete(tag)).await?;
            }
        }
        Ok(())
    }

    async fn handle_parse(&mut self, name: String, sql: String, param_types: Vec<u32>) {
        if self.extended_error {
            return;
        }
        let (translated, classification) = self.translator.translate(&sql, None);
        let handle = match self.race_backend(self.backend.prepare(&translated, &param_types)).await {
            Ok(h) => h,
            Err(e) => return self.record_error(e),
        };
        let stmt = PreparedStatement {
            name: name.clone(),
            original_sql: sql,
            translated_sql: translated,
            classification,
            param_oids: param_types,
            handle,
        };
        if let Err(dup_name) = self.statements.insert_statement(stmt) {
            return self.record_error(SessionError::DuplicatePreparedStatement(dup_name));
        }
        self.queue(BackendMessage::ParseComplete);
    }

    fn handle_bind(
        &mut self,
        portal: String,
        statement: String,
        param_formats: Vec<i16>,
        raw_params: Vec<Option<Vec<u8>>>,
        result_formats: Vec<i16>,
    ) {
        if self.extended_error {
            return;
        }
        let Some(stmt) = self.statements.statement(&statement) else {
            return self.record_error(SessionError::UnknownPreparedStatement(statement));
        };
        if !stmt.param_oids.is_empty() && stmt.param_oids.len() != raw_params.len() {
            return self.record_error(SessionError::ParameterCountMismatch {
                declared: stmt.param_oids.len(),
                supplied: raw_params.len(),
            });
        }
        let mut params = Vec::with_capacity(raw_params.len());
        for (i, raw) in raw_params.into_iter().enumerate() {
            let oid = stmt.param_oids.get(i).copied().unwrap_or(0);
            let binary = format_for(&param_formats, i) == 1;
            let decoded = match raw {
                None => None,
                Some(bytes) if oid == 0 || oid == proxy_wire::oid::UNKNOWN => {
                    match std::str::from_utf8(&bytes) {
                        Ok(s) => Some(PgValue::Text(s.to_string())),
                        Err(_) => return self.record_error(crate::error::type_codec_error(binary, "invalid UTF-8 parameter")),
                    }
                }
                Some(bytes) => {
                    let result =
                        if binary { PgValue::decode_binary(oid, &bytes) } else { PgValue::decode_text(oid, &bytes) };
                    match result {
                        Ok(v) => Some(v),
                        Err(e) => return self.record_error(crate::error::type_codec_error(binary, e)),
                    }
                }
            };
            params.push(decoded);
        }
        let result_formats = if result_formats.is_empty() && self.config.force_binary {
            vec![1]
        } else {
            result_formats
        };
        self.statements.insert_portal(Portal {
            name: portal,
            statement_name: statement,
            params,
            result_formats,
            cursor: PortalCursor::Open,
        });
        self.queue(BackendMessage::BindComplete);
    }

    async fn handle_describe(&mut self, kind: DescribeKind, name: &str) {
        if self.extended_error {
            return;
        }
        match kind {
            DescribeKind::Statement => {
                let Some(stmt) = self.statements.statement(name) else {
                    return self.record_error(SessionError::UnknownPreparedStatement(name.to_string()));
                };
                let param_oids = stmt.param_oids.clone();
                let handle = stmt.handle.clone();
                self.queue(BackendMessage::ParameterDescription(param_oids));
                match self.race_backend(self.backend.describe(&handle)).await {
                    Ok(columns) if columns.is_empty() => self.queue(BackendMessage::NoData),
                    Ok(columns) => {
                        self.queue(BackendMessage::RowDescription(field_descriptions(&columns, |_| 0)))
                    }
                    Err(e) => self.record_error(e),
                }
            }
            DescribeKind::Portal => {
                let Some(portal) = self.statements.portal(name).cloned() else {
                    return self.record_error(SessionError::UnknownPortal(name.to_string()));
                };
                let Some(stmt) = self.statements.statement(&portal.statement_name) else {
                    return self.record_error(SessionError::UnknownPreparedStatement(portal.statement_name));
                };
                let handle = stmt.handle.clone();
                match self.race_backend(self.backend.describe(&handle)).await {
                    Ok(columns) if columns.is_empty() => self.queue(BackendMessage::NoData),
                    Ok(columns) => {
                        let fields = field_descriptions(&columns, |i| portal.format_for_column(i));
                        self.queue(BackendMessage::RowDescription(fields));
                    }
                    Err(e) => self.record_error(e),
                }
            }
        }
    }

    async fn handle_execute(&mut self, portal_name: &str, max_rows: i32) {
        if self.extended_error {
            return;
        }
        let Some(portal) = self.statements.portal(portal_name).cloned() else {
            return self.record_error(SessionError::UnknownPortal(portal_name.to_string()));
        };
        let Some(stmt) = self.statements.statement(&portal.statement_name) else {
            return self.record_error(SessionError::UnknownPreparedStatement(portal.statement_name));
        };
        let handle = stmt.handle.clone();

        if !self.row_buffers.contains_key(portal_name) {
            let params = portal.params.clone();
            match self.race_backend(self.backend.execute(&handle, &params)).await {
                Ok(ExecResult::Command { tag }) => {
                    self.queue(BackendMessage::CommandComplete(tag));
                    return;
                }
                Ok(ExecResult::Rows { rows, .. }) => {
                    let total = rows.len();
                    self.row_buffers.insert(portal_name.to_string(), RowBuffer { rows: rows.into(), total });
                }
                Err(e) => return self.record_error(e),
            }
        }

        let buffer = self.row_buffers.get_mut(portal_name).expect("just inserted or already present");
        let take = if max_rows <= 0 { buffer.rows.len() } else { (max_rows as usize).min(buffer.rows.len()) };
        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            out.push(buffer.rows.pop_front().expect("take bounded by len"));
        }
        let drained = buffer.rows.is_empty();
        let total = buffer.total;
        if drained {
            self.row_buffers.remove(portal_name);
        }
        for row in out {
            let values: Vec<Option<Vec<u8>>> = row
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    v.as_ref().and_then(|pv| {
                        if portal.format_for_column(i) == 1 { pv.encode_binary() } else { pv.encode_text() }
                    })
                })
                .collect();
            self.queue(BackendMessage::DataRow(values));
        }
        if drained {
            self.queue(BackendMessage::CommandComplete(format!("SELECT {total}")));
            if let Some(p) = self.statements.portal_mut(portal_name) {
                p.cursor = PortalCursor::Drained;
            }
        } else {
            self.queue(BackendMessage::PortalSuspended);
        }
    }

    fn handle_close(&mut self, kind: DescribeKind, name: &str) {
        if self.extended_error {
            return;
        }
        match kind {
            DescribeKind::Statement => self.statements.close_statement(name),
            DescribeKind::Portal => {
                self.statements.close_portal(name);
                self.row_buffers.remove(name);
            }
        }
        self.queue(BackendMessage::CloseComplete);
    }

    async fn handle_sync(&mut self) -> Result<(), SessionError> {
        let status = self.backend.transaction_status().await;
        self.flush().await?;
        codec::write_message(&mut self.stream, &BackendMessage::ReadyForQuery(status)).await?;
        self.extended_error = false;
        Ok(())
    }

    fn handle_unsupported(&mut self, tag: u8) {
        tracing::debug!(tag = %tag, "unsupported message tag");
        self.queue(BackendMessage::ErrorResponse(ErrorFields::new(
            "ERROR",
            "0A000",
            format!("message type {:#x} is not supported", tag),
        )));
    }
}

fn format_for(formats: &[i16], index: usize) -> i16 {
    match formats.len() {
        0 => 0,
        1 => formats[0],
        _ => formats.get(index).copied().unwrap_or(0),
    }
}

fn field_descriptions(columns: &[ColumnDescriptor], format_for_index: impl Fn(usize) -> i16) -> Vec<FieldDescription> {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| FieldDescription {
            name: c.name.clone(),
            table_oid: 0,
            column_attr: (i + 1) as i16,
            type_oid: c.backend_type.wire_oid(),
            type_size: -1,
            type_modifier: -1,
            format: format_for_index(i),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendType, MockBackendClient, MockTable};
    use proxy_translate::Translator;
    use proxy_wire::message;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config() -> SessionConfig {
        SessionConfig {
            authenticate: false,
            expected_password: None,
            force_binary: false,
            server_version: "14.0".to_string(),
        }
    }

    async fn read_backend_message<S: AsyncRead + Unpin>(stream: &mut S) -> BackendMessage {
        let mut tag = [0u8; 1];
        stream.read_exact(&mut tag).await.unwrap();
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let len = i32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len - 4];
        stream.read_exact(&mut payload).await.unwrap();
        message::decode_backend(tag[0], &payload).unwrap()
    }

    async fn write_frontend_message<S: AsyncWrite + Unpin>(stream: &mut S, msg: &FrontendMessage) {
        let payload = message::encode_frontend_payload(msg);
        let tag = message::frontend_tag(msg).expect("regular message has a tag byte");
        let mut framed = Vec::with_capacity(5 + payload.len());
        framed.push(tag);
        framed.extend_from_slice(&((payload.len() + 4) as i32).to_be_bytes());
        framed.extend_from_slice(&payload);
        stream.write_all(&framed).await.unwrap();
    }

    #[tokio::test]
    async fn simple_select_round_trips_through_mock_backend() {
        let backend = Arc::new(MockBackendClient::new());
        backend.seed_table(
            "users",
            MockTable {
                columns: vec![ColumnDescriptor { name: "id".to_string(), backend_type: BackendType::Integer }],
                rows: vec![vec![Some(PgValue::Int8(1))]],
            },
        );
        let (mut client, server) = tokio::io::duplex(8192);
        let session = Session::new(
            server,
            1,
            42,
            "alice".to_string(),
            "proxydb".to_string(),
            test_config(),
            backend,
            Arc::new(Translator::empty()),
            Arc::new(Notify::new()),
            Arc::new(Notify::new()),
        );
        let handle = tokio::spawn(session.run());

        // AuthenticationOk, 5x ParameterStatus, BackendKeyData, ReadyForQuery.
        for _ in 0..8 {
            read_backend_message(&mut client).await;
        }

        write_frontend_message(&mut client, &FrontendMessage::Query("SELECT * FROM users".to_string())).await;

        match read_backend_message(&mut client).await {
            BackendMessage::RowDescription(fields) => assert_eq!(fields.len(), 1),
            other => panic!("expected RowDescription, got {other:?}"),
        }
        match read_backend_message(&mut client).await {
            BackendMessage::DataRow(values) => assert_eq!(values.len(), 1),
            other => panic!("expected DataRow, got {other:?}"),
        }
        match read_backend_message(&mut client).await {
            BackendMessage::CommandComplete(tag) => assert_eq!(tag, "SELECT 1"),
            other => panic!("expected CommandComplete, got {other:?}"),
        }
        match read_backend_message(&mut client).await {
            BackendMessage::ReadyForQuery(_) => {}
            other => panic!("expected ReadyForQuery, got {other:?}"),
        }

        write_frontend_message(&mut client, &FrontendMessage::Terminate).await;
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn extended_query_pipeline_round_trips_through_mock_backend() {
        let backend = Arc::new(MockBackendClient::new());
        backend.seed_table(
            "users",
            MockTable {
                columns: vec![ColumnDescriptor { name: "id".to_string(), backend_type: BackendType::Integer }],
                rows: vec![vec![Some(PgValue::Int8(7))]],
            },
        );
        let (mut client, server) = tokio::io::duplex(8192);
        let session = Session::new(
            server,
            1,
            42,
            "alice".to_string(),
            "proxydb".to_string(),
            test_config(),
            backend,
            Arc::new(Translator::empty()),
            Arc::new(Notify::new()),
            Arc::new(Notify::new()),
        );
        let handle = tokio::spawn(session.run());
        for _ in 0..8 {
            read_backend_message(&mut client).await;
        }

        write_frontend_message(
            &mut client,
            &FrontendMessage::Parse { name: "s1".to_string(), sql: "SELECT * FROM users".to_string(), param_types: vec![] },
        )
        .await;
        write_frontend_message(
            &mut client,
            &FrontendMessage::Bind {
                portal: String::new(),
                statement: "s1".to_string(),
                param_formats: vec![],
                params: vec![],
                result_formats: vec![],
            },
        )
        .await;
        write_frontend_message(
            &mut client,
            &FrontendMessage::Execute { portal: String::new(), max_rows: 0 },
        )
        .await;
        write_frontend_message(&mut client, &FrontendMessage::Sync).await;

        assert_eq!(read_backend_message(&mut client).await, BackendMessage::ParseComplete);
        assert_eq!(read_backend_message(&mut client).await, BackendMessage::BindComplete);
        match read_backend_message(&mut client).await {
            BackendMessage::DataRow(values) => assert_eq!(values.len(), 1),
            other => panic!("expected DataRow, got {other:?}"),
        }
        match read_backend_message(&mut client).await {
            BackendMessage::CommandComplete(tag) => assert_eq!(tag, "SELECT 1"),
            other => panic!("expected CommandComplete, got {other:?}"),
        }
        match read_backend_message(&mut client).await {
            BackendMessage::ReadyForQuery(_) => {}
            other => panic!("expected ReadyForQuery, got {other:?}"),
        }

        write_frontend_message(&mut client, &FrontendMessage::Terminate).await;
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn protocol_error_in_extended_batch_skips_to_sync() {
        let backend = Arc::new(MockBackendClient::new());
        let (mut client, server) = tokio::io::duplex(8192);
        let session = Session::new(
            server,
            1,
            42,
            "alice".to_string(),
            "proxydb".to_string(),
            test_config(),
            backend,
            Arc::new(Translator::empty()),
            Arc::new(Notify::new()),
            Arc::new(Notify::new()),
        );
        let handle = tokio::spawn(session.run());
        for _ in 0..8 {
            read_backend_message(&mut client).await;
        }

        // Bind against a statement that was never Parsed.
        write_frontend_message(
            &mut client,
            &FrontendMessage::Bind {
                portal: String::new(),
                statement: "missing".to_string(),
                param_formats: vec![],
                params: vec![],
                result_formats: vec![],
            },
        )
        .await;
        write_frontend_message(&mut client, &FrontendMessage::Execute { portal: String::new(), max_rows: 0 }).await;
        write_frontend_message(&mut client, &FrontendMessage::Sync).await;

        match read_backend_message(&mut client).await {
            BackendMessage::ErrorResponse(fields) => assert_eq!(fields.sqlstate, "08P01"),
            other => panic!("expected ErrorResponse, got {other:?}"),
        }
        match read_backend_message(&mut client).await {
            BackendMessage::ReadyForQuery(_) => {}
            other => panic!("expected ReadyForQuery, got {other:?}"),
        }

        write_frontend_message(&mut client, &FrontendMessage::Terminate).await;
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bind_with_uninferred_param_types_is_accepted() {
        let backend = Arc::new(MockBackendClient::new());
        let (mut client, server) = tokio::io::duplex(8192);
        let session = Session::new(
            server,
            1,
            42,
            "alice".to_string(),
            "proxydb".to_string(),
            test_config(),
            backend,
            Arc::new(Translator::empty()),
            Arc::new(Notify::new()),
            Arc::new(Notify::new()),
        );
        let handle = tokio::spawn(session.run());
        for _ in 0..8 {
            read_backend_message(&mut client).await;
        }

        // Parse declares no OIDs (type inference); Bind still supplies a value.
        write_frontend_message(
            &mut client,
            &FrontendMessage::Parse { name: "s1".to_string(), sql: "SELECT $1".to_string(), param_types: vec![] },
        )
        .await;
        write_frontend_message(
            &mut client,
            &FrontendMessage::Bind {
                portal: String::new(),
                statement: "s1".to_string(),
                param_formats: vec![],
                params: vec![Some(b"1".to_vec())],
                result_formats: vec![],
            },
        )
        .await;
        write_frontend_message(&mut client, &FrontendMessage::Sync).await;

        assert_eq!(read_backend_message(&mut client).await, BackendMessage::ParseComplete);
        assert_eq!(read_backend_message(&mut client).await, BackendMessage::BindComplete);
        match read_backend_message(&mut client).await {
            BackendMessage::ReadyForQuery(_) => {}
            other => panic!("expected ReadyForQuery, got {other:?}"),
        }

        write_frontend_message(&mut client, &FrontendMessage::Terminate).await;
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bind_with_too_few_params_is_rejected() {
        let backend = Arc::new(MockBackendClient::new());
        let (mut client, server) = tokio::io::duplex(8192);
        let session = Session::new(
            server,
            1,
            42,
            "alice".to_string(),
            "proxydb".to_string(),
            test_config(),
            backend,
            Arc::new(Translator::empty()),
            Arc::new(Notify::new()),
            Arc::new(Notify::new()),
        );
        let handle = tokio::spawn(session.run());
        for _ in 0..8 {
            read_backend_message(&mut client).await;
        }

        write_frontend_message(
            &mut client,
            &FrontendMessage::Parse {
                name: "s1".to_string(),
                sql: "SELECT $1, $2".to_string(),
                param_types: vec![proxy_wire::oid::INT8, proxy_wire::oid::INT8],
            },
        )
        .await;
        write_frontend_message(
            &mut client,
            &FrontendMessage::Bind {
                portal: String::new(),
                statement: "s1".to_string(),
                param_formats: vec![],
                params: vec![],
                result_formats: vec![],
            },
        )
        .await;
        write_frontend_message(&mut client, &FrontendMessage::Execute { portal: String::new(), max_rows: 0 }).await;
        write_frontend_message(&mut client, &FrontendMessage::Sync).await;

        assert_eq!(read_backend_message(&mut client).await, BackendMessage::ParseComplete);
        match read_backend_message(&mut client).await {
            BackendMessage::ErrorResponse(fields) => assert_eq!(fields.sqlstate, "08P01"),
            other => panic!("expected ErrorResponse, got {other:?}"),
        }
        match read_backend_message(&mut client).await {
            BackendMessage::ReadyForQuery(_) => {}
            other => panic!("expected ReadyForQuery, got {other:?}"),
        }

        write_frontend_message(&mut client, &FrontendMessage::Terminate).await;
        handle.await.unwrap().unwrap();
    }
}
