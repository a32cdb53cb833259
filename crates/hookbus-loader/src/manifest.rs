//! `HOOK.md` manifest parser.
//!
//! A manifest starts with a front-matter block of `key: value` lines
//! bounded by `---`. The `metadata` value is JSON and may continue over
//! several lines until its braces balance. Everything after the closing
//! `---` is free-form documentation.
//!
//! ```markdown
//! ---
//! name: command-logger
//! description: Log every command event
//! metadata: {"hookbus": {"events": ["command"], "priority": 10}}
//! ---
//!
//! # Command logger
//! ```

use std::path::Path;

use serde_json::Value;

use hookbus_types::HookMetadata;

/// Manifest file name inside each hook directory.
pub const MANIFEST_FILE: &str = "HOOK.md";

/// Namespace key that may wrap the metadata object.
const METADATA_NAMESPACE: &str = "hookbus";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest has no front-matter block")]
    MissingFrontmatter,
    #[error("front-matter block is not closed by `---`")]
    UnterminatedFrontmatter,
    #[error("metadata block has unbalanced braces")]
    UnbalancedMetadata,
    #[error("invalid metadata: {0}")]
    InvalidMetadata(#[from] serde_json::Error),
}

/// Parsed manifest contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    /// Empty when the manifest does not declare one.
    pub name: String,
    pub description: String,
    /// Default enablement; config overrides take precedence.
    pub enabled: bool,
    pub metadata: HookMetadata,
    pub body: String,
}

pub fn read_manifest(path: &Path) -> Result<Manifest, ManifestError> {
    let content = std::fs::read_to_string(path)?;
    parse_manifest(&content)
}

pub fn parse_manifest(content: &str) -> Result<Manifest, ManifestError> {
    let trimmed = content.trim_start();
    let Some(after_first) = trimmed.strip_prefix("---") else {
        return Err(ManifestError::MissingFrontmatter);
    };
    let Some(end_pos) = after_first.find("\n---") else {
        return Err(ManifestError::UnterminatedFrontmatter);
    };

    let block = &after_first[..end_pos];
    let body = after_first[end_pos + 4..]
        .trim_start_matches(['-', '\r'])
        .trim_start_matches('\n')
        .to_string();

    let mut manifest = Manifest {
        enabled: true,
        body,
        ..Default::default()
    };

    let mut lines = block.lines();
    while let Some(line) = lines.next() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "name" => manifest.name = unquote(value).to_string(),
            "description" => manifest.description = unquote(value).to_string(),
            "enabled" => manifest.enabled = !matches!(unquote(value), "false" | "no" | "off" | "0"),
            "metadata" => {
                let mut json = value.to_string();
                while brace_depth(&json) > 0 {
                    let Some(next) = lines.next() else {
                        return Err(ManifestError::UnbalancedMetadata);
                    };
                    json.push('\n');
                    json.push_str(next);
                }
                if brace_depth(&json) != 0 {
                    return Err(ManifestError::UnbalancedMetadata);
                }
                manifest.metadata = parse_metadata(&json)?;
            }
            _ => {}
        }
    }

    Ok(manifest)
}

/// Parse a metadata JSON object, unwrapping the `hookbus` namespace.
pub fn parse_metadata(json: &str) -> Result<HookMetadata, ManifestError> {
    if json.trim().is_empty() {
        return Ok(HookMetadata::default());
    }
    let mut value: Value = serde_json::from_str(json)?;
    if let Some(inner) = value
        .as_object_mut()
        .and_then(|o| o.remove(METADATA_NAMESPACE))
        .filter(Value::is_object)
    {
        value = inner;
    }
    Ok(serde_json::from_value(value)?)
}

/// Net `{` minus `}` outside of JSON strings.
fn brace_depth(s: &str) -> i32 {
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;
    for c in s.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
    }
    depth
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_line_metadata() {
        let content = r#"---
name: command-logger
description: "Log every command event"
metadata: {"hookbus": {"events": ["command", "command:new"], "priority": 10, "requires": {"bins": ["sh"]}}}
---

# Command logger
"#;
        let manifest = parse_manifest(content).unwrap();
        assert_eq!(manifest.name, "command-logger");
        assert_eq!(manifest.description, "Log every command event");
        assert!(manifest.enabled);
        assert_eq!(manifest.metadata.events, vec!["command", "command:new"]);
        assert_eq!(manifest.metadata.priority, 10);
        assert_eq!(manifest.metadata.requires.bins, vec!["sh"]);
        assert_eq!(manifest.metadata.export, "default");
        assert!(manifest.body.starts_with("# Command logger"));
    }

    #[test]
    fn test_parse_multiline_metadata_without_namespace() {
        let content = r#"---
name: session-memory
enabled: false
metadata: {
  "events": ["session:end"],
  "export": "onSessionEnd",
  "timeout": 5,
  "requires": {"anyBins": ["git", "hg"], "env": ["HOME"]},
  "note": "braces } inside strings are ignored"
}
---
"#;
        let manifest = parse_manifest(content).unwrap();
        assert!(!manifest.enabled);
        assert_eq!(manifest.metadata.events, vec!["session:end"]);
        assert_eq!(manifest.metadata.export, "onSessionEnd");
        assert_eq!(manifest.metadata.timeout, Some(5));
        assert_eq!(manifest.metadata.requires.any_bins, vec!["git", "hg"]);
    }

    #[test]
    fn test_missing_frontmatter() {
        assert!(matches!(
            parse_manifest("# Just markdown"),
            Err(ManifestError::MissingFrontmatter)
        ));
        assert!(matches!(
            parse_manifest("---\nname: x\n"),
            Err(ManifestError::UnterminatedFrontmatter)
        ));
    }

    #[test]
    fn test_invalid_metadata() {
        let unbalanced = "---\nname: x\nmetadata: {\"events\": [\"command\"]\n---\n";
        assert!(matches!(
            parse_manifest(unbalanced),
            Err(ManifestError::UnbalancedMetadata)
        ));

        let bad_json = "---\nname: x\nmetadata: {events: nope}\n---\n";
        assert!(matches!(
            parse_manifest(bad_json),
            Err(ManifestError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_name_optional() {
        let manifest = parse_manifest("---\ndescription: anonymous\n---\n").unwrap();
        assert!(manifest.name.is_empty());
        assert_eq!(manifest.metadata, HookMetadata::default());
    }
}
