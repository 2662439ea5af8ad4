//! Dot-delimited JSON paths (`attachment.connection_info.device_path`)

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("invalid path {path:?}: segments must be non-empty")]
    Invalid { path: String },

    #[error("{path} not found")]
    NotFound { path: String },

    #[error("{path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// A parsed, non-empty path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    segments: Vec<String>,
}

impl JsonPath {
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(PathError::Invalid {
                path: path.to_string(),
            });
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment and the segments leading to it
    pub fn split_last(&self) -> (&str, &[String]) {
        // parse() rejects empty paths, so there is always a last segment
        match self.segments.split_last() {
            Some((last, parents)) => (last.as_str(), parents),
            None => ("", &self.segments[..]),
        }
    }

    /// The first `depth` segments joined back together, `$` for the root
    pub fn prefix(&self, depth: usize) -> String {
        if depth == 0 {
            "$".to_string()
        } else {
            self.segments[..depth].join(".")
        }
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_segments() {
        let path = JsonPath::parse("attachment.connection_info.device_path").unwrap();
        assert_eq!(
            path.segments(),
            &["attachment", "connection_info", "device_path"]
        );
        assert_eq!(path.to_string(), "attachment.connection_info.device_path");
    }

    #[test]
    fn test_parse_single_segment() {
        let path = JsonPath::parse("attachment").unwrap();
        let (last, parents) = path.split_last();
        assert_eq!(last, "attachment");
        assert!(parents.is_empty());
    }

    #[test]
    fn test_parse_rejects_empty_segments() {
        for bad in ["", ".", "a..b", ".a", "a."] {
            assert!(
                matches!(JsonPath::parse(bad), Err(PathError::Invalid { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_prefix() {
        let path = JsonPath::parse("a.b.c").unwrap();
        assert_eq!(path.prefix(0), "$");
        assert_eq!(path.prefix(1), "a");
        assert_eq!(path.prefix(2), "a.b");
    }

    #[test]
    fn test_path_error_display() {
        let err = PathError::TypeMismatch {
            path: "attachment.volume_id".to_string(),
            expected: "string",
            found: "number",
        };
        assert_eq!(
            err.to_string(),
            "attachment.volume_id: expected string, found number"
        );
    }
}
