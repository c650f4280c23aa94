//! Code unit manifests
//!
//! A code unit is UTF-8 text, one directive per line:
//!
//! ```text
//! # comment
//! library app
//! library util
//! root app
//! ```
//!
//! `library` links a catalog library into the isolate; `root` selects the
//! library entrypoints resolve against when none is named. Without a `root`
//! directive the first unit's first library becomes the root.

use skein_engine::RuntimeError;

/// Parsed directives of one code unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitManifest {
    /// Libraries to link, in order
    pub libraries: Vec<String>,
    /// Explicit root library
    pub root: Option<String>,
}

impl UnitManifest {
    /// Parse a unit. Errors are compile-time errors naming the unit and line.
    pub fn parse(unit: &str, bytes: &[u8]) -> Result<Self, RuntimeError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| RuntimeError::compile(format!("{unit}: not valid UTF-8 ({e})")))?;

        let mut manifest = UnitManifest::default();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut words = line.split_whitespace();
            let directive = words.next().unwrap_or_default();
            let name = match (words.next(), words.next()) {
                (Some(name), None) => name,
                _ => {
                    return Err(RuntimeError::compile(format!(
                        "{unit}:{}: expected `{directive} <name>`, found `{line}`",
                        index + 1
                    )))
                }
            };

            match directive {
                "library" => {
                    if !manifest.libraries.iter().any(|l| l == name) {
                        manifest.libraries.push(name.to_string());
                    }
                }
                "root" => {
                    if manifest.root.is_some() {
                        return Err(RuntimeError::compile(format!(
                            "{unit}:{}: root library declared twice",
                            index + 1
                        )));
                    }
                    manifest.root = Some(name.to_string());
                }
                other => {
                    return Err(RuntimeError::compile(format!(
                        "{unit}:{}: unknown directive `{other}`",
                        index + 1
                    )))
                }
            }
        }

        if manifest.libraries.is_empty() && manifest.root.is_none() {
            return Err(RuntimeError::compile(format!("{unit}: unit is empty")));
        }
        Ok(manifest)
    }
}
