//! Multipart body scanning.
//!
//! Splits a multipart body held in memory into its parts without copying
//! part bodies. The line break before each delimiter belongs to the
//! delimiter (RFC 2046), so part bodies never end with it.

use mailsplice_textproto::{Headers, TextReader};
use memchr::memmem;

use crate::error::{Error, Result};

/// One part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPart<'a> {
    /// Parsed part headers.
    pub headers: Headers,
    /// Exact bytes of the part's header block, blank line included.
    pub raw_header: Vec<u8>,
    /// Part body, up to the line break before the next delimiter.
    pub body: &'a [u8],
    /// The delimiter follows the header block directly, so the block's
    /// closing blank line is also the delimiter's line break.
    pub shares_line_break: bool,
}

/// Iterator-like reader over the parts of a multipart body.
#[derive(Debug)]
pub struct MultipartReader<'a> {
    data: &'a [u8],
    pos: usize,
    dash_boundary: Vec<u8>,
    nl_dash_boundary: Vec<u8>,
    parts_read: usize,
    preamble: &'a [u8],
    epilogue: Option<&'a [u8]>,
}

impl<'a> MultipartReader<'a> {
    /// Creates a reader over `data` split on `boundary`.
    #[must_use]
    pub fn new(data: &'a [u8], boundary: &str) -> Self {
        let dash_boundary = format!("--{boundary}").into_bytes();
        let mut nl_dash_boundary = Vec::with_capacity(dash_boundary.len() + 1);
        nl_dash_boundary.push(b'\n');
        nl_dash_boundary.extend_from_slice(&dash_boundary);

        Self {
            data,
            pos: 0,
            dash_boundary,
            nl_dash_boundary,
            parts_read: 0,
            preamble: &[],
            epilogue: None,
        }
    }

    /// Returns the bytes before the first delimiter line.
    #[must_use]
    pub const fn preamble(&self) -> &'a [u8] {
        self.preamble
    }

    /// Returns the bytes after the `--boundary--` marker, once reached.
    ///
    /// The rest of the closing line, including its line break, is part of
    /// the epilogue.
    #[must_use]
    pub const fn epilogue(&self) -> Option<&'a [u8]> {
        self.epilogue
    }

    /// Returns the number of parts read so far.
    #[must_use]
    pub const fn parts_read(&self) -> usize {
        self.parts_read
    }

    /// Reads the next part.
    ///
    /// Returns `None` once the closing delimiter has been read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMultipart`] if the data ends before the
    /// closing delimiter or holds unexpected text between parts, and
    /// [`Error::Protocol`] if a part header is malformed.
    pub fn next_part(&mut self) -> Result<Option<RawPart<'a>>> {
        if self.epilogue.is_some() {
            return Ok(None);
        }

        let mut expect_new_part = false;
        loop {
            let Some(next) = self.line_end(self.pos) else {
                return Err(Error::InvalidMultipart(
                    "unexpected end of data before closing delimiter".to_string(),
                ));
            };
            let line = &self.data[self.pos..next];

            if let Some(after_marker) = self.final_boundary(line) {
                if self.parts_read == 0 {
                    self.preamble = &self.data[..self.pos];
                }
                self.epilogue = Some(&self.data[self.pos + after_marker..]);
                tracing::trace!(parts = self.parts_read, "closing delimiter reached");
                return Ok(None);
            }

            if self.is_delimiter(line) {
                if self.parts_read == 0 {
                    self.preamble = &self.data[..self.pos];
                }
                self.pos = next;
                return self.read_part().map(Some);
            }

            if self.parts_read == 0 {
                // Preamble line
                self.pos = next;
                continue;
            }

            if !expect_new_part && matches!(line, b"\r\n" | b"\n") {
                expect_new_part = true;
                self.pos = next;
                continue;
            }

            return Err(Error::InvalidMultipart(format!(
                "unexpected line after part {}: {}",
                self.parts_read,
                mailsplice_textproto::preview(line)
            )));
        }
    }

    fn read_part(&mut self) -> Result<RawPart<'a>> {
        let mut reader = TextReader::new(&self.data[self.pos..]);
        let header = reader.read_mime_header()?;
        let body_start = self.data.len() - reader.into_inner().len();

        let body_end = self.body_end(body_start).ok_or_else(|| {
            Error::InvalidMultipart(format!(
                "part {} is not followed by a delimiter",
                self.parts_read + 1
            ))
        })?;

        let shares_line_break = body_end == body_start
            && !header.raw.is_empty()
            && self.data[body_start..].starts_with(&self.dash_boundary);

        self.pos = body_end;
        self.parts_read += 1;

        Ok(RawPart {
            headers: header.headers,
            raw_header: header.raw,
            body: &self.data[body_start..body_end],
            shares_line_break,
        })
    }

    /// Finds where the body starting at `start` ends.
    fn body_end(&self, start: usize) -> Option<usize> {
        let rest = &self.data[start..];
        if rest
            .strip_prefix(self.dash_boundary.as_slice())
            .is_some_and(ends_delimiter)
        {
            return Some(start);
        }

        let finder = memmem::Finder::new(&self.nl_dash_boundary);
        let mut search = start;
        while let Some(found) = finder.find(&self.data[search..]) {
            let newline = search + found;
            let after = &self.data[newline + self.nl_dash_boundary.len()..];
            if ends_delimiter(after) {
                let end = if newline > start && self.data[newline - 1] == b'\r' {
                    newline - 1
                } else {
                    newline
                };
                return Some(end);
            }
            search = newline + 1;
        }
        None
    }

    /// Returns the end of the line starting at `pos`, terminator included.
    fn line_end(&self, pos: usize) -> Option<usize> {
        if pos >= self.data.len() {
            return None;
        }
        let end = memchr::memchr(b'\n', &self.data[pos..])
            .map_or(self.data.len(), |i| pos + i + 1);
        Some(end)
    }

    fn is_delimiter(&self, line: &[u8]) -> bool {
        line.strip_prefix(self.dash_boundary.as_slice())
            .is_some_and(|rest| matches!(skip_lwsp(rest), b"\r\n" | b"\n"))
    }

    /// Returns the length of `--boundary--` if `line` is the closing line.
    fn final_boundary(&self, line: &[u8]) -> Option<usize> {
        let rest = line
            .strip_prefix(self.dash_boundary.as_slice())?
            .strip_prefix(b"--")?;
        matches!(skip_lwsp(rest), b"" | b"\r\n" | b"\n")
            .then_some(self.dash_boundary.len() + 2)
    }
}

/// Returns true if `rest`, the bytes after a boundary, can end a delimiter.
fn ends_delimiter(rest: &[u8]) -> bool {
    match rest.first() {
        None | Some(b' ' | b'\t' | b'\r' | b'\n') => true,
        Some(b'-') => rest.get(1) == Some(&b'-'),
        Some(_) => false,
    }
}

fn skip_lwsp(s: &[u8]) -> &[u8] {
    let start = s
        .iter()
        .position(|&b| b != b' ' && b != b'\t')
        .unwrap_or(s.len());
    &s[start..]
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

    fn collect<'a>(reader: &mut MultipartReader<'a>) -> Vec<RawPart<'a>> {
        let mut parts = Vec::new();
        while let Some(part) = reader.next_part().unwrap() {
            parts.push(part);
        }
        parts
    }

    #[test]
    fn test_two_parts() {
        let body = concat!(
            "This is the preamble.\r\n",
            "--abc\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "first\r\n",
            "--abc\r\n",
            "\r\n",
            "second\r\n",
            "line\r\n",
            "--abc--\r\n",
            "epilogue\r\n",
        );
        let mut reader = MultipartReader::new(body.as_bytes(), "abc");
        let parts = collect(&mut reader);

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(parts[0].raw_header, b"Content-Type: text/plain\r\n\r\n");
        assert_eq!(parts[0].body, b"first");
        assert!(parts[1].headers.is_empty());
        assert_eq!(parts[1].raw_header, b"\r\n");
        assert_eq!(parts[1].body, b"second\r\nline");

        assert_eq!(reader.preamble(), b"This is the preamble.\r\n");
        assert_eq!(reader.epilogue(), Some(&b"\r\nepilogue\r\n"[..]));
        assert_eq!(reader.parts_read(), 2);
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn test_lf_line_endings() {
        let body = b"--b\nA: 1\n\none\n--b\nB: 2\n\ntwo\n--b--";
        let mut reader = MultipartReader::new(body, "b");
        let parts = collect(&mut reader);

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].body, b"one");
        assert_eq!(parts[1].headers.get("B"), Some("2"));
        assert_eq!(parts[1].body, b"two");
        assert_eq!(reader.epilogue(), Some(&b""[..]));
    }

    #[test]
    fn test_boundary_prefix_inside_body_is_not_delimiter() {
        let body = b"--b\r\n\r\ntext\r\n--bx not a delimiter\r\n--b\t\r\n\r\nnext\r\n--b--  \r\n";
        let mut reader = MultipartReader::new(body, "b");
        let parts = collect(&mut reader);

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].body, b"text\r\n--bx not a delimiter");
        assert_eq!(parts[1].body, b"next");
        assert_eq!(reader.epilogue(), Some(&b"  \r\n"[..]));
    }

    #[test]
    fn test_empty_body_directly_before_delimiter() {
        let body = b"--b\r\n\r\n--b\r\nX: y\r\n\r\n\r\n--b--\r\n";
        let mut reader = MultipartReader::new(body, "b");
        let parts = collect(&mut reader);

        assert_eq!(parts.len(), 2);
        assert!(parts[0].body.is_empty());
        assert_eq!(parts[1].headers.get("X"), Some("y"));
        assert!(parts[1].body.is_empty());

        assert!(parts[0].shares_line_break);
        assert!(!parts[1].shares_line_break);
    }

    #[test]
    fn test_close_without_parts() {
        let body = b"only preamble\r\n--b--\r\n";
        let mut reader = MultipartReader::new(body, "b");
        assert!(reader.next_part().unwrap().is_none());
        assert_eq!(reader.preamble(), b"only preamble\r\n");
    }

    #[test]
    fn test_missing_close_delimiter() {
        let body = b"--b\r\n\r\nunterminated body\r\n";
        let mut reader = MultipartReader::new(body, "b");
        let err = reader.next_part().unwrap_err();
        assert!(matches!(err, Error::InvalidMultipart(_)));
    }

    #[test]
    fn test_no_delimiter_at_all() {
        let mut reader = MultipartReader::new(b"just text\r\n", "b");
        assert!(matches!(
            reader.next_part(),
            Err(Error::InvalidMultipart(_))
        ));
    }

    #[test]
    fn test_unexpected_line_between_parts() {
        let body = b"--b\r\n\r\none\r\n--b-- \r\n";
        let mut reader = MultipartReader::new(body, "b");
        assert_eq!(reader.next_part().unwrap().unwrap().body, b"one");
        assert!(reader.next_part().unwrap().is_none());

        // Starts like a delimiter but carries trailing text.
        let body = b"--b\r\n\r\none\r\n--b  junk\r\n--b--\r\n";
        let mut reader = MultipartReader::new(body, "b");
        reader.next_part().unwrap();
        assert!(matches!(
            reader.next_part(),
            Err(Error::InvalidMultipart(_))
        ));
    }

    #[test]
    fn test_malformed_part_header() {
        let body = b"--b\r\nno colon here\r\n\r\nx\r\n--b--\r\n";
        let mut reader = MultipartReader::new(body, "b");
        let err = reader.next_part().unwrap_err();
        assert!(err.is_malformed_header());
    }

    #[test]
    fn test_ends_delimiter() {
        assert!(ends_delimiter(b""));
        assert!(ends_delimiter(b"\r\n"));
        assert!(ends_delimiter(b" "));
        assert!(ends_delimiter(b"--"));
        assert!(!ends_delimiter(b"-"));
        assert!(!ends_delimiter(b"x"));
    }
}
