//! JSON-lines ingestion adapter.
//!
//! Each line is one record tagged by `kind`:
//! `{"kind": "entity", "name": ...}` or
//! `{"kind": "relationship", "source_name": ..., "target_name": ..., "type": ...}`.
//! Records without a `source_system` inherit the source's name.

use anyhow::{anyhow, Context, Result};
use kgrecon_core::{RawEntity, RawRelationship, SourceBatch, SourceInput};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum InputLine {
    Entity(RawEntity),
    Relationship(RawRelationship),
}

/// Parses a `NAME=PATH` source argument.
pub fn parse_source_arg(value: &str) -> Result<(String, String), String> {
    let (name, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got `{value}`"))?;
    let name = name.trim();
    if name.is_empty() || path.trim().is_empty() {
        return Err(format!("expected NAME=PATH, got `{value}`"));
    }
    Ok((name.to_string(), path.trim().to_string()))
}

/// Loads one source file. A file that does not exist becomes a missing
/// source; a file that exists but does not parse is an error.
pub fn load_source(name: &str, path: &Path, is_base: bool) -> Result<SourceInput> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Ok(SourceInput::Missing {
                source_system: name.to_string(),
                reason: format!("{} not found", path.display()),
            });
        }
        Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
    };
    let batch = parse_batch(name, &text, is_base)
        .with_context(|| format!("parsing source `{name}` from {}", path.display()))?;
    Ok(SourceInput::Available(batch))
}

pub fn parse_batch(name: &str, text: &str, is_base: bool) -> Result<SourceBatch> {
    let mut batch = SourceBatch {
        source_system: name.to_string(),
        is_base,
        ..SourceBatch::default()
    };
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut value: Value =
            serde_json::from_str(line).with_context(|| format!("line {}", number + 1))?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| anyhow!("line {}: expected a JSON object", number + 1))?;
        object
            .entry("source_system")
            .or_insert_with(|| Value::String(name.to_string()));
        match serde_json::from_value::<InputLine>(value).with_context(|| format!("line {}", number + 1))? {
            InputLine::Entity(entity) => batch.entities.push(entity),
            InputLine::Relationship(relationship) => batch.relationships.push(relationship),
        }
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::{load_source, parse_batch, parse_source_arg};
    use kgrecon_core::SourceInput;

    #[test]
    fn lines_inherit_the_source_name() {
        let text = r#"
# comment
{"kind": "entity", "name": "Ghislaine Maxwell", "category": "associate"}
{"kind": "relationship", "source_name": "A", "target_name": "B", "type": "flew_with", "source_system": "logs"}
"#;
        let batch = parse_batch("registry", text, true).unwrap();
        assert!(batch.is_base);
        assert_eq!(batch.entities.len(), 1);
        assert_eq!(batch.entities[0].source_system, "registry");
        assert_eq!(batch.relationships[0].source_system, "logs");
        assert_eq!(batch.relationships[0].relationship_type, "flew_with");
    }

    #[test]
    fn malformed_lines_are_errors() {
        assert!(parse_batch("x", "{\"kind\": \"entity\"}", false).is_err());
        assert!(parse_batch("x", "[1, 2]", false).is_err());
    }

    #[test]
    fn absent_files_become_missing_sources() {
        let dir = tempfile::tempdir().unwrap();
        let input = load_source("docs", &dir.path().join("absent.jsonl"), false).unwrap();
        assert!(matches!(input, SourceInput::Missing { ref source_system, .. } if source_system == "docs"));
    }

    #[test]
    fn source_args_need_both_halves() {
        assert_eq!(
            parse_source_arg("docs=data/docs.jsonl").unwrap(),
            ("docs".to_string(), "data/docs.jsonl".to_string())
        );
        assert!(parse_source_arg("docs").is_err());
        assert!(parse_source_arg("=x").is_err());
    }
}
