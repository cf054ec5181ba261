//! The backend SQL client boundary (§4.7) — the opaque "SQL client"
//! collaborator described in §1, concretized as a trait this crate can call
//! through, plus an in-memory double for tests and `--backend mock`.

use crate::error::BackendError;
use proxy_wire::{PgValue, TransactionStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Opaque handle to a statement the backend has prepared. This crate never
/// inspects it; it only carries it from `prepare` to `execute`/`describe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedHandle(String);

impl PreparedHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// The backend's own column-type enum. Deliberately small and closed: adding
/// a backend type the mapping in [`BackendType::wire_oid`] doesn't cover is a
/// compile error, not a silent `text` fallback (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Integer,
    Numeric,
    Float,
    Boolean,
    StringType,
    Bytes,
    Date,
    Timestamp,
}

impl BackendType {
    pub fn wire_oid(self) -> u32 {
        match self {
            BackendType::Integer => proxy_wire::oid::INT8,
            BackendType::Numeric => proxy_wire::oid::NUMERIC,
            BackendType::Float => proxy_wire::oid::FLOAT8,
            BackendType::Boolean => proxy_wire::oid::BOOL,
            BackendType::StringType => proxy_wire::oid::TEXT,
            BackendType::Bytes => proxy_wire::oid::BYTEA,
            BackendType::Date => proxy_wire::oid::DATE,
            BackendType::Timestamp => proxy_wire::oid::TIMESTAMPTZ,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub name: String,
    pub backend_type: BackendType,
}

/// Result of executing a statement: either rows, or a command tag for DML/DDL.
#[derive(Debug, Clone)]
pub enum ExecResult {
    Rows { columns: Vec<ColumnDescriptor>, rows: Vec<Vec<Option<PgValue>>> },
    Command { tag: String },
}

/// Identifies a session to a separate cancel-request connection (§4.5, §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelToken {
    pub process_id: i32,
    pub secret_key: i32,
}

/// The interface a real Spanner/BigQuery JDBC-style driver would implement.
/// Building that driver is out of scope (§1); this trait is the seam.
#[async_trait::async_trait]
pub trait BackendClient: Send + Sync {
    async fn prepare(&self, sql: &str, param_oids: &[u32]) -> Result<PreparedHandle, BackendError>;
    async fn execute(
        &self,
        handle: &PreparedHandle,
        params: &[Option<PgValue>],
    ) -> Result<ExecResult, BackendError>;
    async fn describe(&self, handle: &PreparedHandle) -> Result<Vec<ColumnDescriptor>, BackendError>;
    async fn cancel(&self, token: CancelToken);
    async fn transaction_status(&self) -> TransactionStatus;
}

/// In-memory `BackendClient` double. Tables are seeded by the test or by
/// `proxy-daemon --backend mock`; it never touches the network.
pub struct MockBackendClient {
    next_handle: AtomicU64,
    prepared: Mutex<HashMap<String, MockPreparedStatement>>,
    tables: Mutex<HashMap<String, MockTable>>,
}

struct MockPreparedStatement {
    sql: String,
}

#[derive(Clone)]
pub struct MockTable {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<Option<PgValue>>>,
}

impl Default for MockBackendClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackendClient {
    pub fn new() -> Self {
        Self { next_handle: AtomicU64::new(1), prepared: Mutex::new(HashMap::new()), tables: Mutex::new(HashMap::new()) }
    }

    /// Seeds a table this mock can answer `SELECT * FROM <name>` against.
    pub fn seed_table(&self, name: impl Into<String>, table: MockTable) {
        self.tables.lock().unwrap().insert(name.into(), table);
    }

    fn table_for_sql(&self, sql: &str) -> Option<MockTable> {
        let lower = sql.to_lowercase();
        self.tables
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _)| lower.contains(name.as_str()))
            .map(|(_, t)| t.clone())
    }
}

#[async_trait::async_trait]
impl BackendClient for MockBackendClient {
    async fn prepare(&self, sql: &str, _param_oids: &[u32]) -> Result<PreparedHandle, BackendError> {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let handle = PreparedHandle::new(format!("mock-{id}"));
        self.prepared
            .lock()
            .unwrap()
            .insert(handle.0.clone(), MockPreparedStatement { sql: sql.to_string() });
        Ok(handle)
    }

    async fn execute(
        &self,
        handle: &PreparedHandle,
        _params: &[Option<PgValue>],
    ) -> Result<ExecResult, BackendError> {
        let sql = {
            let prepared = self.prepared.lock().unwrap();
            prepared
                .get(&handle.0)
                .map(|s| s.sql.clone())
                .ok_or_else(|| BackendError::Unavailable(format!("unknown prepared handle {:?}", handle.0)))?
        };
        let trimmed = sql.trim_start().to_lowercase();
        if trimmed.starts_with("select") {
            match self.table_for_sql(&sql) {
                Some(table) => Ok(ExecResult::Rows { columns: table.columns, rows: table.rows }),
                None => Ok(ExecResult::Rows { columns: vec![], rows: vec![] }),
            }
        } else {
            let tag = trimmed.split_whitespace().next().unwrap_or("OK").to_uppercase();
            Ok(ExecResult::Command { tag })
        }
    }

    async fn describe(&self, handle: &PreparedHandle) -> Result<Vec<ColumnDescriptor>, BackendError> {
        let sql = {
            let prepared = self.prepared.lock().unwrap();
            prepared
                .get(&handle.0)
                .map(|s| s.sql.clone())
                .ok_or_else(|| BackendError::Unavailable(format!("unknown prepared handle {:?}", handle.0)))?
        };
        Ok(self.table_for_sql(&sql).map(|t| t.columns).unwrap_or_default())
    }

    async fn cancel(&self, _token: CancelToken) {}

    async fn transaction_status(&self) -> TransactionStatus {
        TransactionStatus::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_executes_select_against_seeded_table() {
        let client = MockBackendClient::new();
        client.seed_table(
            "users",
            MockTable {
                columns: vec![ColumnDescriptor { name: "id".to_string(), backend_type: BackendType::Integer }],
                rows: vec![vec![Some(PgValue::Int8(1))]],
            },
        );
        let handle = client.prepare("SELECT id FROM users", &[]).await.unwrap();
        let result = client.execute(&handle, &[]).await.unwrap();
        match result {
            ExecResult::Rows { rows, .. } => assert_eq!(rows.len(), 1),
            ExecResult::Command { .. } => panic!("expected rows"),
        }
    }

    #[tokio::test]
    async fn mock_returns_command_tag_for_dml() {
        let client = MockBackendClient::new();
        let handle = client.prepare("INSERT INTO users VALUES (1)", &[]).await.unwrap();
        let result = client.execute(&handle, &[]).await.unwrap();
        match result {
            ExecResult::Command { tag } => assert_eq!(tag, "INSERT"),
            ExecResult::Rows { .. } => panic!("expected a command tag"),
        }
    }

    #[test]
    fn backend_type_maps_to_expected_oid() {
        assert_eq!(BackendType::Integer.wire_oid(), proxy_wire::oid::INT8);
        assert_eq!(BackendType::StringType.wire_oid(), proxy_wire::oid::TEXT);
    }
}
