//! Dot-encoded block decoding.
//!
//! Dot encoding frames data blocks in text protocols such as SMTP and NNTP.
//! The block is a sequence of lines ending at a line holding just a dot.
//! Lines starting with a dot carry an extra escaping dot.

use std::io::{self, BufRead, Read};

use crate::error::{Error, Result};
use crate::reader::TextReader;

/// Position of the decoder within the current line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DotState {
    /// Beginning of a line.
    BeginLine,
    /// Read `.` at the beginning of a line.
    Dot,
    /// Read `.\r` at the beginning of a line.
    DotCr,
    /// Read `\r`, possibly at the end of a line.
    Cr,
    /// Inside line data.
    Data,
    /// Consumed the terminating `.` line.
    Eof,
}

/// Reader over the decoded contents of a dot-encoded block.
///
/// Decoding rewrites `\r\n` line endings to `\n`, removes escaping leading
/// dots and returns end of stream after consuming the terminating line.
/// Dropping the reader early leaves the rest of the block pending; the next
/// line read on the parent [`TextReader`] discards it first.
#[derive(Debug)]
pub struct DotReader<'a, R> {
    reader: &'a mut TextReader<R>,
}

impl<R: BufRead> Read for DotReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read_dot(buf)
    }
}

impl<R: BufRead> TextReader<R> {
    /// Returns a reader over the next dot-encoded block.
    pub fn dot_reader(&mut self) -> DotReader<'_, R> {
        self.close_dot();
        self.dot = Some(DotState::BeginLine);
        DotReader { reader: self }
    }

    /// Reads a dot-encoded block and returns the decoded bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedEof`] if the stream ends before the
    /// terminating line.
    pub fn read_dot_bytes(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.dot_reader()
            .read_to_end(&mut data)
            .map_err(from_io)?;
        Ok(data)
    }

    /// Reads a dot-encoded block and returns its lines without terminators.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedEof`] if the stream ends before the
    /// terminating line.
    pub fn read_dot_lines(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let Some(line) = self.read_line()? else {
                return Err(Error::UnexpectedEof);
            };

            let mut text = line.text.as_slice();
            if let Some(rest) = text.strip_prefix(b".") {
                if rest.is_empty() {
                    return Ok(lines);
                }
                text = rest;
            }
            lines.push(String::from_utf8_lossy(text).into_owned());
        }
    }

    /// Drains the pending dot block, if any, up to its terminating line.
    pub(crate) fn close_dot(&mut self) {
        let mut buf = [0u8; 128];
        while matches!(self.dot, Some(state) if state != DotState::Eof) {
            // A failed drain leaves nothing to resume; the error shows up
            // again on the next read.
            if self.read_dot(&mut buf).is_err() {
                break;
            }
        }
        self.dot = None;
    }

    pub(crate) fn read_dot(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(mut state) = self.dot else {
            return Ok(0);
        };

        let mut n = 0;
        while n < buf.len() && state != DotState::Eof {
            let available = match self.inner.fill_buf() {
                Ok(available) => available,
                Err(err) if n > 0 => {
                    tracing::trace!(?err, "dot block read interrupted");
                    break;
                }
                Err(err) => {
                    self.dot = None;
                    return Err(err);
                }
            };
            let Some(&c) = available.first() else {
                if n > 0 {
                    break;
                }
                self.dot = None;
                return Err(io::ErrorKind::UnexpectedEof.into());
            };

            let mut consume = true;
            let emit = match state {
                DotState::BeginLine => match c {
                    b'.' => {
                        state = DotState::Dot;
                        None
                    }
                    b'\r' => {
                        state = DotState::Cr;
                        None
                    }
                    _ => {
                        state = DotState::Data;
                        Some(c)
                    }
                },
                DotState::Dot => match c {
                    b'\r' => {
                        state = DotState::DotCr;
                        None
                    }
                    b'\n' => {
                        state = DotState::Eof;
                        None
                    }
                    _ => {
                        state = DotState::Data;
                        Some(c)
                    }
                },
                DotState::DotCr => {
                    if c == b'\n' {
                        state = DotState::Eof;
                        None
                    } else {
                        // Not part of `.\r\n`: drop the dot, keep the `\r`.
                        consume = false;
                        state = DotState::Data;
                        Some(b'\r')
                    }
                }
                DotState::Cr => {
                    if c == b'\n' {
                        state = DotState::BeginLine;
                        Some(b'\n')
                    } else {
                        consume = false;
                        state = DotState::Data;
                        Some(b'\r')
                    }
                }
                DotState::Data => match c {
                    b'\r' => {
                        state = DotState::Cr;
                        None
                    }
                    b'\n' => {
                        state = DotState::BeginLine;
                        Some(c)
                    }
                    _ => Some(c),
                },
                DotState::Eof => break,
            };

            if consume {
                self.inner.consume(1);
            }
            if let Some(b) = emit {
                buf[n] = b;
                n += 1;
            }
        }

        self.dot = Some(state);
        Ok(n)
    }
}

fn from_io(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::UnexpectedEof
    } else {
        Error::Io(err)
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
    fn test_read_dot_bytes() {
        let mut r = TextReader::new(&b"dotlines\r\n.foo\r\n..bar\n...baz\nquux\r\n\r\n.\r\nanother\n"[..]);
        let data = r.read_dot_bytes().unwrap();
        assert_eq!(data, b"dotlines\nfoo\n.bar\n..baz\nquux\n\n");

        let next = r.read_line().unwrap().unwrap();
        assert_eq!(next.text, b"another");
    }

    #[test]
    fn test_read_dot_bytes_lone_cr_kept() {
        let mut r = TextReader::new(&b"a\rb\r\n.\rc\r\n.\n"[..]);
        let data = r.read_dot_bytes().unwrap();
        assert_eq!(data, b"a\rb\n\rc\n");
    }

    #[test]
    fn test_read_dot_bytes_unexpected_eof() {
        let mut r = TextReader::new(&b"no terminator\r\n"[..]);
        let err = r.read_dot_bytes().unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof));
    }

    #[test]
    fn test_read_dot_lines() {
        let mut r = TextReader::new(&b"dotlines\r\n.foo\r\n..bar\n...baz\nquux\r\n\r\n.\r\nanother\n"[..]);
        let lines = r.read_dot_lines().unwrap();
        assert_eq!(lines, ["dotlines", "foo", ".bar", "..baz", "quux", ""]);

        let next = r.read_line().unwrap().unwrap();
        assert_eq!(next.text, b"another");
    }

    #[test]
    fn test_read_dot_lines_unexpected_eof() {
        let mut r = TextReader::new(&b"line\r\n"[..]);
        assert!(matches!(r.read_dot_lines(), Err(Error::UnexpectedEof)));
    }

    #[test]
    fn test_eof_after_terminator() {
        let mut r = TextReader::new(&b"x\r\n.\r\ntail"[..]);
        let mut dot = r.dot_reader();
        let mut buf = [0u8; 16];
        let n = dot.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"x\n");
        assert_eq!(dot.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_partial_block_drained_before_next_line() {
        let mut r = TextReader::new(&b"first\r\nsecond\r\n.\r\nafter\r\n"[..]);
        {
            let mut dot = r.dot_reader();
            let mut buf = [0u8; 3];
            dot.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"fir");
        }
        let next = r.read_line().unwrap().unwrap();
        assert_eq!(next.text, b"after");
    }
}
