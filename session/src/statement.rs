//! Prepared statements and portals, scoped to one session (§3, §4.4).

use crate::backend::PreparedHandle;
use proxy_translate::Classification;
use proxy_wire::PgValue;
use std::collections::HashMap;

/// A statement created by `Parse`. The empty name denotes the unnamed statement.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub name: String,
    pub original_sql: String,
    pub translated_sql: String,
    pub classification: Classification,
    /// Declared parameter OIDs; `0` means "let the backend decide".
    pub param_oids: Vec<u32>,
    pub handle: PreparedHandle,
}

/// A bound, partially-executable instance of a [`PreparedStatement`].
#[derive(Debug, Clone)]
pub struct Portal {
    pub name: String,
    pub statement_name: String,
    pub params: Vec<Option<PgValue>>,
    pub result_formats: Vec<i16>,
    pub cursor: PortalCursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalCursor {
    Open,
    Drained,
}

impl Portal {
    /// Resolves the format code to use for `column_index`, per invariant I4.
    pub fn format_for_column(&self, column_index: usize) -> i16 {
        match self.result_formats.len() {
            0 => 0,
            1 => self.result_formats[0],
            _ => self.result_formats.get(column_index).copied().unwrap_or(0),
        }
    }
}

/// The session-scoped maps of live prepared statements and portals.
///
/// Plain `HashMap`s per §9's decision — no cross-session sharing, so there's
/// no reason for a concurrent map.
#[derive(Debug, Default)]
pub struct StatementTable {
    statements: HashMap<String, PreparedStatement>,
    portals: HashMap<String, Portal>,
}

impl StatementTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a statement per Parse semantics (§9): the unnamed statement is
    /// always overwritten; a named statement that already exists is a
    /// duplicate-prepared-statement error unless the caller already removed it.
    pub fn insert_statement(&mut self, stmt: PreparedStatement) -> Result<(), String> {
        if !stmt.name.is_empty() && self.statements.contains_key(&stmt.name) {
            return Err(stmt.name);
        }
        // Overwriting (always true for the unnamed statement) drops portals
        // that referenced the old statement under this name (invariant I2).
        self.portals.retain(|_, p| p.statement_name != stmt.name);
        self.statements.insert(stmt.name.clone(), stmt);
        Ok(())
    }

    pub fn statement(&self, name: &str) -> Option<&PreparedStatement> {
        self.statements.get(name)
    }

    pub fn insert_portal(&mut self, portal: Portal) {
        self.portals.insert(portal.name.clone(), portal);
    }

    pub fn portal(&self, name: &str) -> Option<&Portal> {
        self.portals.get(name)
    }

    pub fn portal_mut(&mut self, name: &str) -> Option<&mut Portal> {
        self.portals.get_mut(name)
    }

    pub fn close_statement(&mut self, name: &str) {
        self.statements.remove(name);
        self.portals.retain(|_, p| p.statement_name != name);
    }

    pub fn close_portal(&mut self, name: &str) {
        self.portals.remove(name);
    }
}
