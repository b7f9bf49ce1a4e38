//! Effect parameter defaults.
//!
//! One file per effect, `<effect>.ini`:
//!
//! ```text
//! [Config]
//! speed=2.5
//! tint=1.0,0.5,0.25
//! ```
//!
//! Blank lines and lines starting with `;` or `#` are skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{RenderError, Result};

const SECTION: &str = "[Config]";

/// Raw `name=value` pairs of one effect, with the line each came from.
#[derive(Debug, Clone, Default)]
pub struct EffectConfig {
    path: PathBuf,
    values: HashMap<String, (String, usize)>,
}

impl EffectConfig {
    /// Read and parse a config file. A missing file is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| RenderError::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let error = |line: usize, reason: String| RenderError::EffectConfig {
            path: path.to_path_buf(),
            line,
            reason,
        };

        let mut config = Self {
            path: path.to_path_buf(),
            values: HashMap::new(),
        };
        let mut in_section = false;

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') {
                if line != SECTION || in_section {
                    return Err(error(line_no, format!("unexpected section {line}")));
                }
                in_section = true;
                continue;
            }
            if !in_section {
                return Err(error(line_no, format!("expected {SECTION} before values")));
            }

            let Some((name, value)) = line.split_once('=') else {
                return Err(error(line_no, format!("expected name=value, got {line:?}")));
            };
            let name = name.trim();
            if name.is_empty() {
                return Err(error(line_no, "empty parameter name".to_string()));
            }
            if let Some((_, first)) = config.values.insert(name.to_string(), (value.trim().to_string(), line_no)) {
                log::warn!("{}:{line_no}: {name} overrides line {first}", path.display());
            }
        }

        if !in_section {
            return Err(error(1, format!("missing {SECTION} header")));
        }
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value text and source line of `name`.
    pub fn get(&self, name: &str) -> Option<(&str, usize)> {
        self.values.get(name).map(|(value, line)| (value.as_str(), *line))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(text: &str) -> Result<EffectConfig> {
        EffectConfig::parse(text, Path::new("test.ini"))
    }

    // ============================================================
    // Parsing
    // ============================================================

    #[test]
    fn test_parse_values() {
        let config = parse("[Config]\nspeed=2.5\ntint = 1.0, 0.5, 0.25\n").unwrap();
        assert_eq!(config.len(), 2);
        assert_eq!(config.get("speed"), Some(("2.5", 2)));
        assert_eq!(config.get("tint"), Some(("1.0, 0.5, 0.25", 3)));
        assert_eq!(config.get("missing"), None);
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let config = parse("; vignette\n\n[Config]\n# radius of the dark ring\nradius=0.75\n\n").unwrap();
        assert_eq!(config.get("radius"), Some(("0.75", 5)));
    }

    #[test]
    fn test_empty_section_is_valid() {
        assert!(parse("[Config]\n").unwrap().is_empty());
    }

    #[test]
    fn test_missing_header() {
        let err = parse("speed=1\n").unwrap_err();
        assert!(matches!(err, RenderError::EffectConfig { line: 1, .. }));
        assert!(parse("").is_err());
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let err = parse("[Config]\nspeed=1\nbroken\n").unwrap_err();
        match err {
            RenderError::EffectConfig { line, reason, .. } => {
                assert_eq!(line, 3);
                assert!(reason.contains("name=value"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_other_sections_rejected() {
        assert!(parse("[Config]\na=1\n[Other]\nb=2\n").is_err());
        assert!(parse("[Config]\n=2\n").is_err());
    }

    #[test]
    fn test_later_duplicate_wins() {
        let config = parse("[Config]\nstrength=1\nstrength=3\n").unwrap();
        assert_eq!(config.get("strength"), Some(("3", 3)));
    }

    // ============================================================
    // Files
    // ============================================================

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[Config]").unwrap();
        writeln!(file, "exposure=1.5").unwrap();
        let config = EffectConfig::load(file.path()).unwrap();
        assert_eq!(config.get("exposure"), Some(("1.5", 2)));
        assert_eq!(config.path(), file.path());
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = EffectConfig::load(&dir.path().join("vignette.ini")).unwrap_err();
        assert!(matches!(err, RenderError::FileNotFound { .. }));
    }
}
