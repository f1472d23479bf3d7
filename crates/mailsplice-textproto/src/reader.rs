//! Line and MIME header reading.

use std::io::BufRead;

use crate::dot::DotState;
use crate::error::{Error, Result};
use crate::header::{Headers, canonical_mime_header_key};

/// One line read from the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Line {
    /// Line content with the terminator removed. For continued lines this
    /// is the unfolded value.
    pub text: Vec<u8>,
    /// Exact bytes consumed from the stream, terminators included.
    pub raw: Vec<u8>,
}

/// A header block together with the bytes it was read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawHeader {
    /// Parsed fields.
    pub headers: Headers,
    /// Every byte consumed, including the blank line ending the block.
    pub raw: Vec<u8>,
}

/// Reader for line-oriented text protocols.
///
/// Wraps a [`BufRead`] and keeps the original bytes of everything it
/// parses, so a header block can be written back exactly as it arrived.
#[derive(Debug)]
pub struct TextReader<R> {
    pub(crate) inner: R,
    pub(crate) dot: Option<DotState>,
}

impl<R: BufRead> TextReader<R> {
    /// Creates a new reader.
    #[must_use]
    pub const fn new(inner: R) -> Self {
        Self { inner, dot: None }
    }

    /// Returns a reference to the underlying reader.
    #[must_use]
    pub const fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Consumes the reader, returning the underlying reader positioned
    /// after the last byte read.
    #[must_use]
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Reads a single line, eliding the final `\n` or `\r\n` from `text`.
    ///
    /// Returns `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    pub fn read_line(&mut self) -> Result<Option<Line>> {
        self.close_dot();
        self.next_line()
    }

    pub(crate) fn next_line(&mut self) -> Result<Option<Line>> {
        let mut raw = Vec::new();
        if self.inner.read_until(b'\n', &mut raw)? == 0 {
            return Ok(None);
        }
        let text = strip_line_ending(&raw).to_vec();
        Ok(Some(Line { text, raw }))
    }

    fn peek_byte(&mut self) -> Result<Option<u8>> {
        Ok(self.inner.fill_buf()?.first().copied())
    }

    /// Reads a logical header line, joining folded continuation lines.
    ///
    /// Continuation lines start with a space or tab. Each physical line is
    /// trimmed of surrounding spaces and tabs and the pieces are joined with
    /// a single space. `raw` holds every physical line verbatim.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    pub fn read_continued_line(&mut self) -> Result<Option<Line>> {
        let Some(first) = self.read_line()? else {
            return Ok(None);
        };
        if first.text.is_empty() {
            return Ok(Some(first));
        }

        let mut text = trim(&first.text).to_vec();
        let mut raw = first.raw;

        while matches!(self.peek_byte()?, Some(b' ' | b'\t')) {
            let Some(next) = self.next_line()? else {
                break;
            };
            text.push(b' ');
            text.extend_from_slice(trim(&next.text));
            raw.extend_from_slice(&next.raw);
        }

        Ok(Some(Line { text, raw }))
    }

    /// Reads a MIME-style header block.
    ///
    /// The block is a sequence of possibly folded `Key: Value` lines ending
    /// at a blank line or at end of stream. Keys are canonicalized and
    /// repeated keys collect their values in encounter order. Each value
    /// keeps the raw bytes of its field (see [`Headers::raw_field`]), so
    /// names and values that are not UTF-8 can be written back unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedHeader`] if the first line starts with a
    /// space or tab, or if a line has no colon. Read failures are returned
    /// as [`Error::Io`].
    pub fn read_mime_header(&mut self) -> Result<RawHeader> {
        self.close_dot();

        // The first line cannot start with a leading space.
        if matches!(self.peek_byte()?, Some(b' ' | b'\t')) {
            let line = self.next_line()?.unwrap_or_default();
            return Err(Error::malformed("initial line", &line.text));
        }

        let mut headers = Headers::new();
        let mut raw = Vec::new();

        while let Some(line) = self.read_continued_line()? {
            raw.extend_from_slice(&line.raw);
            if line.text.is_empty() {
                break;
            }

            let kv = line.text.as_slice();
            let Some(colon) = kv.iter().position(|&b| b == b':') else {
                return Err(Error::malformed("line", kv));
            };

            // Trailing spaces before the colon violate the RFC but occur
            // in the wild.
            let mut end_key = colon;
            while end_key > 0 && kv[end_key - 1] == b' ' {
                end_key -= 1;
            }
            let key = canonical_mime_header_key(&String::from_utf8_lossy(&kv[..end_key]));
            if key.is_empty() {
                tracing::trace!("skipping header field with empty name");
                continue;
            }

            let mut start = colon + 1;
            while start < kv.len() && matches!(kv[start], b' ' | b'\t') {
                start += 1;
            }
            headers.add_raw(
                key,
                String::from_utf8_lossy(&kv[start..]),
                strip_line_ending(&line.raw),
            );
        }

        Ok(RawHeader { headers, raw })
    }
}

/// Removes a trailing `\n` or `\r\n`.
#[must_use]
pub fn strip_line_ending(line: &[u8]) -> &[u8] {
    match line.strip_suffix(b"\n") {
        Some(line) => line.strip_suffix(b"\r").unwrap_or(line),
        None => line,
    }
}

/// Removes leading and trailing spaces and tabs.
fn trim(s: &[u8]) -> &[u8] {
    let start = s
        .iter()
        .position(|&b| b != b' ' && b != b'\t')
        .unwrap_or(s.len());
    let end = s
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map_or(start, |i| i + 1);
    &s[start..end]
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

    fn reader(input: &[u8]) -> TextReader<&[u8]> {
        TextReader::new(input)
    }

    #[test]
    fn test_read_line_crlf_and_lf() {
        let mut r = reader(b"one\r\ntwo\nthree");

        let line = r.read_line().unwrap().unwrap();
        assert_eq!(line.text, b"one");
        assert_eq!(line.raw, b"one\r\n");

        let line = r.read_line().unwrap().unwrap();
        assert_eq!(line.text, b"two");
        assert_eq!(line.raw, b"two\n");

        let line = r.read_line().unwrap().unwrap();
        assert_eq!(line.text, b"three");
        assert_eq!(line.raw, b"three");

        assert!(r.read_line().unwrap().is_none());
    }

    #[test]
    fn test_read_continued_line() {
        let mut r = reader(b"Subject: hello\r\n  folded \r\n\tagain\r\nNext: x\r\n");

        let line = r.read_continued_line().unwrap().unwrap();
        assert_eq!(line.text, b"Subject: hello folded again");
        assert_eq!(line.raw, b"Subject: hello\r\n  folded \r\n\tagain\r\n");

        let line = r.read_continued_line().unwrap().unwrap();
        assert_eq!(line.text, b"Next: x");
    }

    #[test]
    fn test_read_continued_line_blank() {
        let mut r = reader(b"\r\n body");
        let line = r.read_continued_line().unwrap().unwrap();
        assert!(line.text.is_empty());
        assert_eq!(line.raw, b"\r\n");
    }

    #[test]
    fn test_read_mime_header() {
        let input = concat!(
            "My-Key: Value 1\r\n",
            "Long-Key: Even\r\n",
            "       Longer Value\r\n",
            "my-key: Value 2\r\n",
            "\r\n",
            "body"
        );
        let mut r = reader(input.as_bytes());
        let header = r.read_mime_header().unwrap();

        assert_eq!(header.headers.get_all("My-Key"), ["Value 1", "Value 2"]);
        assert_eq!(header.headers.get("Long-Key"), Some("Even Longer Value"));
        assert_eq!(
            header.raw,
            &input.as_bytes()[..input.len() - "body".len()]
        );
        assert_eq!(r.into_inner(), b"body");
    }

    #[test]
    fn test_read_mime_header_keeps_raw_casing_and_spacing() {
        let input = b"SUBJECT :   spaced\nx-custom:\tv\n\n";
        let mut r = reader(input);
        let header = r.read_mime_header().unwrap();

        assert_eq!(header.headers.get("Subject"), Some("spaced"));
        assert_eq!(header.headers.get("X-Custom"), Some("v"));
        assert_eq!(header.raw, input);
    }

    #[test]
    fn test_read_mime_header_raw_field_bytes() {
        let input = b"Subject: Caf\xe9\r\n \xe9t\xe9\r\nX-\xff: v\r\n\r\n";
        let mut r = reader(input);
        let header = r.read_mime_header().unwrap();

        assert_eq!(header.headers.get("Subject"), Some("Caf\u{fffd} \u{fffd}t\u{fffd}"));
        assert_eq!(
            header.headers.raw_field("Subject", 0),
            Some(&b"Subject: Caf\xe9\r\n \xe9t\xe9"[..])
        );
        assert_eq!(header.headers.raw_field("X-\u{fffd}", 0), Some(&b"X-\xff: v"[..]));
    }

    #[test]
    fn test_read_mime_header_eof_without_blank_line() {
        let mut r = reader(b"A: 1\r\nB: 2");
        let header = r.read_mime_header().unwrap();
        assert_eq!(header.headers.get("A"), Some("1"));
        assert_eq!(header.headers.get("B"), Some("2"));
        assert_eq!(header.raw, b"A: 1\r\nB: 2");
    }

    #[test]
    fn test_read_mime_header_empty_input() {
        let mut r = reader(b"");
        let header = r.read_mime_header().unwrap();
        assert!(header.headers.is_empty());
        assert!(header.raw.is_empty());
    }

    #[test]
    fn test_read_mime_header_skips_empty_key() {
        let mut r = reader(b": orphan\r\nA: 1\r\n\r\n");
        let header = r.read_mime_header().unwrap();
        assert_eq!(header.headers.len(), 1);
        assert_eq!(header.headers.get("A"), Some("1"));
    }

    #[test]
    fn test_read_mime_header_leading_space() {
        let mut r = reader(b"\tFrom: someone\r\n\r\n");
        let err = r.read_mime_header().unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedHeader {
                context: "initial line",
                ..
            }
        ));
        assert_eq!(err.preview(), Some("\tFrom: someone"));
    }

    #[test]
    fn test_read_mime_header_missing_colon() {
        let mut r = reader(b"A: 1\r\nthis line has no colon\r\n\r\n");
        let err = r.read_mime_header().unwrap_err();
        assert!(matches!(err, Error::MalformedHeader { context: "line", .. }));
        assert_eq!(err.preview(), Some("this line has no colon"));
    }

    #[test]
    fn test_read_mime_header_long_line_preview() {
        let mut input = b" ".to_vec();
        input.extend(vec![b'x'; 200]);
        input.extend_from_slice(b"\r\n\r\n");
        let mut r = reader(&input);

        let err = r.read_mime_header().unwrap_err();
        let preview = err.preview().unwrap();
        assert_eq!(preview.len(), 103);
        assert!(preview.starts_with(" xxx"));
        assert!(preview.contains("..."));
    }

    #[test]
    fn test_trim() {
        assert_eq!(trim(b" \t a b \t"), b"a b");
        assert_eq!(trim(b"   "), b"");
        assert_eq!(trim(b""), b"");
    }

    #[test]
    fn test_strip_line_ending() {
        assert_eq!(strip_line_ending(b"x\r\n"), b"x");
        assert_eq!(strip_line_ending(b"x\n"), b"x");
        assert_eq!(strip_line_ending(b"x\r"), b"x\r");
        assert_eq!(strip_line_ending(b"x"), b"x");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn field_line() -> impl Strategy<Value = String> {
            (
                "[A-Za-z][A-Za-z0-9-]{0,12}",
                "[!-~][ -~]{0,20}",
                proptest::option::of("[ \t][!-~]{1,10}"),
                prop_oneof![Just("\r\n"), Just("\n")],
            )
                .prop_map(|(name, value, fold, nl)| match fold {
                    Some(fold) => format!("{name}: {value}{nl}{fold}{nl}"),
                    None => format!("{name}: {value}{nl}"),
                })
        }

        proptest! {
            #[test]
            fn prop_read_line_raw_reassembles_input(input in proptest::collection::vec(any::<u8>(), 0..256)) {
                let mut r = reader(&input);
                let mut joined = Vec::new();
                while let Some(line) = r.read_line().unwrap() {
                    joined.extend_from_slice(&line.raw);
                }
                prop_assert_eq!(joined, input);
            }

            #[test]
            fn prop_mime_header_raw_is_exact(
                lines in proptest::collection::vec(field_line(), 0..8),
                body in proptest::collection::vec(any::<u8>(), 0..64),
            ) {
                let mut block = lines.concat().into_bytes();
                block.extend_from_slice(b"\r\n");
                let mut input = block.clone();
                input.extend_from_slice(&body);

                let mut r = reader(&input);
                let header = r.read_mime_header().unwrap();
                prop_assert_eq!(header.raw, block);
                prop_assert_eq!(r.into_inner(), body.as_slice());
                prop_assert!(header.headers.len() <= lines.len());
            }
        }
    }
}
