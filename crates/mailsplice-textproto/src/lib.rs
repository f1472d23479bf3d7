//! # mailsplice-textproto
//!
//! Reader for line-oriented text protocols that keeps the original bytes.
//!
//! ## Features
//!
//! - **Lines**: `\n` and `\r\n` terminated lines, with the consumed bytes
//! - **MIME headers**: folded `Key: Value` blocks parsed into [`Headers`]
//!   while the exact header bytes are kept for rewriting
//! - **Dot blocks**: decoding of the dot-stuffed framing used by SMTP/NNTP
//!
//! ## Quick Start
//!
//! ```
//! use mailsplice_textproto::TextReader;
//!
//! let raw = b"Subject: Hello\r\n  World\r\nFROM: a@example.com\r\n\r\nbody";
//! let mut reader = TextReader::new(&raw[..]);
//!
//! let header = reader.read_mime_header()?;
//! assert_eq!(header.headers.get("Subject"), Some("Hello World"));
//! assert_eq!(header.headers.get("From"), Some("a@example.com"));
//! assert_eq!(header.raw, &raw[..raw.len() - 4]);
//! assert_eq!(reader.into_inner(), b"body");
//! # Ok::<(), mailsplice_textproto::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod dot;
mod error;
mod header;
mod reader;

pub use dot::DotReader;
pub use error::{Error, Result, preview};
pub use header::{Headers, canonical_mime_header_key, is_token_byte};
pub use reader::{Line, RawHeader, TextReader, strip_line_ending};
