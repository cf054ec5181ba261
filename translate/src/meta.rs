//! Meta-command matching: psql `\d`-style shortcuts rewritten into backend queries.

use crate::error::{TranslateError, TranslateResult};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// One `{"input_pattern", "output_pattern", "matcher_array"}` entry as loaded from JSON.
#[derive(Debug, Deserialize)]
struct RawCommand {
    input_pattern: String,
    output_pattern: String,
    matcher_array: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    commands: Vec<RawCommand>,
}

/// A compiled meta-command matcher: `(input_regex, output_template, group order)`.
pub struct MetaCommand {
    pub input_regex: Regex,
    pub output_template: String,
    pub group_order: Vec<usize>,
}

impl MetaCommand {
    fn compile(raw: RawCommand) -> TranslateResult<Self> {
        let input_regex =
            Regex::new(&raw.input_pattern).map_err(|source| TranslateError::BadPattern {
                pattern: raw.input_pattern.clone(),
                source,
            })?;
        let available = input_regex.captures_len().saturating_sub(1);
        let group_order = raw
            .matcher_array
            .iter()
            .map(|s| s.parse::<usize>().unwrap_or(0))
            .collect::<Vec<_>>();
        for &group in &group_order {
            if group == 0 || group > available {
                return Err(TranslateError::MissingCaptureGroup {
                    pattern: raw.input_pattern.clone(),
                    group,
                    available,
                });
            }
        }
        Ok(Self { input_regex, output_template: raw.output_pattern, group_order })
    }

    /// Matches `sql` (trimmed) in full against this command's pattern, returning
    /// the substituted output on a match.
    fn try_apply(&self, sql: &str) -> Option<String> {
        let caps = self.input_regex.captures(sql.trim())?;
        if caps.get(0).map(|m| m.as_str()) != Some(sql.trim()) {
            return None;
        }
        let mut output = self.output_template.clone();
        for &group in &self.group_order {
            let value = caps.get(group).map(|m| m.as_str()).unwrap_or("");
            output = output.replacen("%s", value, 1);
        }
        Some(output)
    }
}

/// An ordered list of meta-command matchers, tried in order; the first match wins.
pub struct MetaCommandTable {
    commands: Vec<MetaCommand>,
}

impl MetaCommandTable {
    pub fn empty() -> Self {
        Self { commands: Vec::new() }
    }

    pub fn load(path: &Path) -> TranslateResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| TranslateError::ManifestIo {
            path: path.display().to_string(),
            source,
        })?;
        let raw: RawManifest =
            serde_json::from_str(&text).map_err(|source| TranslateError::ManifestJson {
                path: path.display().to_string(),
                source,
            })?;
        let commands = raw
            .commands
            .into_iter()
            .map(MetaCommand::compile)
            .collect::<TranslateResult<Vec<_>>>()?;
        tracing::info!(count = commands.len(), path = %path.display(), "loaded meta-command matchers");
        Ok(Self { commands })
    }

    /// Returns the output of the first matcher whose pattern matches `sql` in full.
    pub fn apply(&self, sql: &str) -> Option<String> {
        self.commands.iter().find_map(|c| c.try_apply(sql))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(input: &str, output: &str, groups: &[&str]) -> MetaCommandTable {
        let raw = RawCommand {
            input_pattern: input.to_string(),
            output_pattern: output.to_string(),
            matcher_array: groups.iter().map(|s| s.to_string()).collect(),
        };
        MetaCommandTable { commands: vec![MetaCommand::compile(raw).unwrap()] }
    }

    #[test]
    fn describe_table_rewrite() {
        let table = table_with(
            r"^\\d (.+)$",
            "SELECT * FROM information_schema.columns WHERE table_name='%s'",
            &["1"],
        );
        let out = table.apply(r"\d users").unwrap();
        assert_eq!(out, "SELECT * FROM information_schema.columns WHERE table_name='users'");
    }

    #[test]
    fn non_matching_sql_falls_through() {
        let table = table_with(r"^\\d (.+)$", "SELECT ... WHERE table_name='%s'", &["1"]);
        assert!(table.apply("SELECT 1").is_none());
    }

    #[test]
    fn compile_rejects_out_of_range_group() {
        let raw = RawCommand {
            input_pattern: r"^\\d (.+)$".to_string(),
            output_pattern: "%s %s".to_string(),
            matcher_array: vec!["1".to_string(), "2".to_string()],
        };
        assert!(matches!(
            MetaCommand::compile(raw),
            Err(TranslateError::MissingCaptureGroup { group: 2, available: 1, .. })
        ));
    }
}
