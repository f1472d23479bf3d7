//! Error types for text protocol reading.

use std::io;

/// Result type alias for text protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Longest line quoted verbatim in a malformed header error.
const PREVIEW_LIMIT: usize = 100;

/// Bytes kept from each end of a longer line.
const PREVIEW_EDGE: usize = 50;

/// Text protocol error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A header line could not be parsed.
    #[error("malformed MIME header {context}: {preview}")]
    MalformedHeader {
        /// Which rule was violated (`"initial line"` or `"line"`).
        context: &'static str,
        /// The offending line, shortened when longer than 100 bytes.
        preview: String,
    },

    /// The stream ended inside a block that requires a terminator.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// I/O error from the underlying reader.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Creates a malformed header error quoting `line`.
    #[must_use]
    pub fn malformed(context: &'static str, line: &[u8]) -> Self {
        Self::MalformedHeader {
            context,
            preview: preview(line),
        }
    }

    /// Returns the quoted line of a malformed header error.
    #[must_use]
    pub fn preview(&self) -> Option<&str> {
        match self {
            Self::MalformedHeader { preview, .. } => Some(preview),
            _ => None,
        }
    }
}

/// Shortens `line` to its first and last 50 bytes when it is longer than 100.
#[must_use]
pub fn preview(line: &[u8]) -> String {
    if line.len() > PREVIEW_LIMIT {
        let head = String::from_utf8_lossy(&line[..PREVIEW_EDGE]);
        let tail = String::from_utf8_lossy(&line[line.len() - PREVIEW_EDGE..]);
        format!("{head}...{tail}")
    } else {
        String::from_utf8_lossy(line).into_owned()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_short_line() {
        assert_eq!(preview(b"no colon here"), "no colon here");
    }

    #[test]
    fn test_preview_exactly_limit() {
        let line = vec![b'x'; 100];
        assert_eq!(preview(&line).len(), 100);
    }

    #[test]
    fn test_preview_long_line() {
        let mut line = vec![b'a'; 50];
        line.extend(vec![b'm'; 30]);
        line.extend(vec![b'z'; 50]);

        let shown = preview(&line);
        assert_eq!(shown.len(), 103);
        assert!(shown.starts_with(&"a".repeat(50)));
        assert!(shown.ends_with(&"z".repeat(50)));
        assert_eq!(&shown[50..53], "...");
        assert!(!shown.contains('m'));
    }

    #[test]
    fn test_malformed_display() {
        let err = Error::malformed("line", b"garbage");
        assert_eq!(err.to_string(), "malformed MIME header line: garbage");
        assert_eq!(err.preview(), Some("garbage"));
        assert_eq!(Error::UnexpectedEof.preview(), None);
    }
}
