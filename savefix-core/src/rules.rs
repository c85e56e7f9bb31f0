use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::{Result, SaveFixError};

/// One locate-and-patch rule.
///
/// A rule names a textual marker to scan for, a sentinel byte run to
/// anchor on behind each marker hit, and a signed distance from the
/// sentinel start to the flag byte. Rules are read-only once built;
/// catalog order only affects the order of diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRule {
    /// Identifier used in diagnostics.
    pub name: String,
    /// Text scanned for in the decompressed payload.
    pub marker: String,
    /// Maximum distance backward from a marker hit within which the
    /// sentinel may start.
    pub search_back_bytes: usize,
    /// Anchor byte run; the flag byte sits at a fixed distance from
    /// where this run starts.
    pub sentinel: Vec<u8>,
    /// Signed distance from the sentinel start to the flag byte.
    pub sentinel_offset: i64,
}

impl PatchRule {
    fn validate(&self) -> Result<()> {
        if self.marker.is_empty() {
            return Err(SaveFixError::Rule {
                name: self.name.clone(),
                reason: "marker must not be empty",
            });
        }
        if self.sentinel.is_empty() {
            return Err(SaveFixError::Rule {
                name: self.name.clone(),
                reason: "sentinel must not be empty",
            });
        }
        Ok(())
    }
}

/// `prefix` followed by `run_len` bytes of 0xFF.
fn prefixed_ff_run(prefix: u8, run_len: usize) -> Vec<u8> {
    let mut seq = Vec::with_capacity(run_len + 1);
    seq.push(prefix);
    seq.resize(run_len + 1, 0xFF);
    seq
}

/// The built-in catalog.
///
/// The `editor-will-disable` and `command-ran` offsets are best-effort
/// and have not been confirmed against a wide sample of saves. They are
/// kept exactly as originally captured rather than adjusted; the 0x01
/// guard in the engine means a wrong offset skips instead of corrupting.
pub fn builtin_rules() -> Vec<PatchRule> {
    vec![
        PatchRule {
            name: "cheat-will-disable".to_string(),
            marker: "cheat-will-disable".to_string(),
            search_back_bytes: 100,
            sentinel: vec![0xFF; 16],
            sentinel_offset: -3,
        },
        PatchRule {
            name: "editor-will-disable".to_string(),
            marker: "editor".to_string(),
            search_back_bytes: 300,
            sentinel: prefixed_ff_run(0x01, 8),
            sentinel_offset: -1,
        },
        PatchRule {
            name: "command-ran".to_string(),
            marker: "command-ran".to_string(),
            search_back_bytes: 300,
            sentinel: prefixed_ff_run(0x01, 8),
            sentinel_offset: 0,
        },
    ]
}

/// Parse a JSON rule catalog (an array of rules, sentinels as byte
/// arrays).
pub fn parse_rules(json: &str) -> Result<Vec<PatchRule>> {
    let rules: Vec<PatchRule> = serde_json::from_str(json)?;
    if rules.is_empty() {
        return Err(SaveFixError::Config("rule catalog is empty".to_string()));
    }
    for rule in &rules {
        rule.validate()?;
    }
    Ok(rules)
}

/// Load a rule catalog supplied as data instead of the built-ins.
pub fn load_rules(path: &Path) -> Result<Vec<PatchRule>> {
    let json = fs::read_to_string(path)?;
    parse_rules(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_matches_reference_values() {
        let rules = builtin_rules();
        assert_eq!(rules.len(), 3);

        assert_eq!(rules[0].name, "cheat-will-disable");
        assert_eq!(rules[0].marker, "cheat-will-disable");
        assert_eq!(rules[0].search_back_bytes, 100);
        assert_eq!(rules[0].sentinel, vec![0xFF; 16]);
        assert_eq!(rules[0].sentinel_offset, -3);

        assert_eq!(rules[1].name, "editor-will-disable");
        assert_eq!(rules[1].marker, "editor");
        assert_eq!(rules[1].search_back_bytes, 300);
        assert_eq!(rules[1].sentinel[0], 0x01);
        assert_eq!(&rules[1].sentinel[1..], &[0xFF; 8]);
        assert_eq!(rules[1].sentinel_offset, -1);

        assert_eq!(rules[2].name, "command-ran");
        assert_eq!(rules[2].marker, "command-ran");
        assert_eq!(rules[2].search_back_bytes, 300);
        assert_eq!(rules[2].sentinel, rules[1].sentinel);
        assert_eq!(rules[2].sentinel_offset, 0);
    }

    #[test]
    fn parses_custom_catalog() {
        let json = r#"[
            {
                "name": "example",
                "marker": "some-text",
                "search_back_bytes": 50,
                "sentinel": [255, 255, 255, 255],
                "sentinel_offset": -2
            }
        ]"#;
        let rules = parse_rules(json).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].marker, "some-text");
        assert_eq!(rules[0].sentinel, vec![0xFF; 4]);
        assert_eq!(rules[0].sentinel_offset, -2);
    }

    #[test]
    fn rejects_empty_catalog() {
        assert!(parse_rules("[]").is_err());
    }

    #[test]
    fn rejects_empty_marker() {
        let json = r#"[{"name": "bad", "marker": "", "search_back_bytes": 10, "sentinel": [255], "sentinel_offset": 0}]"#;
        let err = parse_rules(json).unwrap_err();
        assert!(matches!(err, SaveFixError::Rule { .. }));
    }

    #[test]
    fn rejects_empty_sentinel() {
        let json = r#"[{"name": "bad", "marker": "x", "search_back_bytes": 10, "sentinel": [], "sentinel_offset": 0}]"#;
        let err = parse_rules(json).unwrap_err();
        assert!(matches!(err, SaveFixError::Rule { .. }));
    }
}
