//! SQL translation: psql-style meta-command matching and regex query rewrites.
//!
//! A pure function from SQL text to SQL text — no parsing, no AST, no
//! knowledge of the wire protocol or the session that calls it. Rule tables
//! are loaded once at startup and never change for the life of the process.

pub mod error;
pub mod meta;
pub mod rewrite;
pub mod translator;

pub use error::TranslateError;
pub use meta::MetaCommandTable;
pub use rewrite::QueryRewriteTable;
pub use translator::{BackendLookup, Classification, Translator};
