//! Regex-driven query rewrites, applied in declared order when no meta-command matched.

use crate::error::{TranslateError, TranslateResult};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RawRewrite {
    input_pattern: String,
    output_pattern: String,
}

/// One compiled `(input_regex, replacement)` rewrite rule.
pub struct QueryRewrite {
    pub input_regex: Regex,
    pub replacement: String,
}

impl QueryRewrite {
    fn compile(raw: RawRewrite) -> TranslateResult<Self> {
        let input_regex =
            Regex::new(&raw.input_pattern).map_err(|source| TranslateError::BadPattern {
                pattern: raw.input_pattern,
                source,
            })?;
        Ok(Self { input_regex, replacement: raw.output_pattern })
    }
}

/// An ordered list of rewrite rules, composed left-to-right.
pub struct QueryRewriteTable {
    rules: Vec<QueryRewrite>,
}

impl QueryRewriteTable {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn load(path: &Path) -> TranslateResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| TranslateError::ManifestIo {
            path: path.display().to_string(),
            source,
        })?;
        let raw: Vec<RawRewrite> =
            serde_json::from_str(&text).map_err(|source| TranslateError::ManifestJson {
                path: path.display().to_string(),
                source,
            })?;
        let rules = raw
            .into_iter()
            .map(QueryRewrite::compile)
            .collect::<TranslateResult<Vec<_>>>()?;
        tracing::info!(count = rules.len(), path = %path.display(), "loaded query rewrites");
        Ok(Self { rules })
    }

    /// Applies every rule in order, each against the previous rule's output.
    pub fn apply(&self, sql: &str) -> String {
        self.rules.iter().fold(sql.to_string(), |acc, rule| {
            rule.input_regex.replace_all(&acc, rule.replacement.as_str()).into_owned()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_compose_left_to_right() {
        let table = QueryRewriteTable {
            rules: vec![
                QueryRewrite::compile(RawRewrite {
                    input_pattern: "SERIAL".to_string(),
                    output_pattern: "INT64".to_string(),
                })
                .unwrap(),
                QueryRewrite::compile(RawRewrite {
                    input_pattern: r"(?i)now\(\)".to_string(),
                    output_pattern: "CURRENT_TIMESTAMP()".to_string(),
                })
                .unwrap(),
            ],
        };
        let out = table.apply("CREATE TABLE t (id SERIAL, created_at TIMESTAMP DEFAULT now())");
        assert_eq!(out, "CREATE TABLE t (id INT64, created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP())");
    }

    #[test]
    fn empty_table_is_identity() {
        let table = QueryRewriteTable::empty();
        assert_eq!(table.apply("SELECT 1"), "SELECT 1");
    }
}
