//! Pure composition of meta-command matching and query rewrites.

use crate::meta::MetaCommandTable;
use crate::rewrite::QueryRewriteTable;

/// How a statement was translated, surfaced for logging (§4.9) and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    MetaCommandHit,
    Rewritten,
    Identity,
}

/// A lazy backend-side lookup a winning meta-command's output template may need
/// (e.g. resolving `information_schema`). Modeled as a plain closure rather than
/// the session layer's `BackendClient` trait: `proxy-translate` sits below
/// `proxy-session` in the dependency graph and can't borrow its trait without a
/// cycle, and the lookup itself is a single string-in/string-out call, so a
/// closure is all the seam needs.
pub type BackendLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

pub struct Translator {
    meta_commands: MetaCommandTable,
    rewrites: QueryRewriteTable,
}

impl Translator {
    pub fn new(meta_commands: MetaCommandTable, rewrites: QueryRewriteTable) -> Self {
        Self { meta_commands, rewrites }
    }

    pub fn empty() -> Self {
        Self { meta_commands: MetaCommandTable::empty(), rewrites: QueryRewriteTable::empty() }
    }

    /// Translates `sql`, per §4.3: meta-command match first, then rewrites, then identity.
    ///
    /// `lookup` is consulted only when the winning meta-command's output still
    /// contains the `%%backend%%` placeholder after positional substitution;
    /// most matchers never reference it and `lookup` is never called.
    pub fn translate(&self, sql: &str, lookup: Option<BackendLookup<'_>>) -> (String, Classification) {
        if let Some(mut output) = self.meta_commands.apply(sql) {
            if output.contains("%%backend%%") {
                if let Some(lookup) = lookup {
                    if let Some(resolved) = lookup(&output) {
                        output = output.replace("%%backend%%", &resolved);
                    }
                }
            }
            return (output, Classification::MetaCommandHit);
        }
        let rewritten = self.rewrites.apply(sql);
        if rewritten != sql {
            (rewritten, Classification::Rewritten)
        } else {
            (sql.to_string(), Classification::Identity)
        }
    }
}
