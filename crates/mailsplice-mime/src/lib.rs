//! # mailsplice-mime
//!
//! Decompose, edit and rebuild MIME messages without disturbing the bytes
//! you did not touch.
//!
//! ## Features
//!
//! - **Decomposition**: split a raw message into a [`Message`] tree of
//!   headers, bodies, multipart parts and embedded `message/rfc822`
//!   messages
//! - **Exact rebuild**: unchanged header blocks, preambles and epilogues
//!   are written back byte for byte
//! - **Surgical edits**: [`Message::set_header_field`] patches one field in
//!   the raw header and leaves its neighbours alone
//! - **Encoding/Decoding**: Base64 and Quoted-Printable transfer encodings
//!
//! ## Quick Start
//!
//! ```
//! use mailsplice_mime::{Decomposer, MessageBuilder};
//!
//! let raw = b"From: a@example.com\r\n\
//!             Content-Type: multipart/mixed; boundary=b\r\n\
//!             \r\n\
//!             --b\r\n\
//!             Content-Type: text/plain\r\n\
//!             \r\n\
//!             Hello\r\n\
//!             --b--\r\n";
//!
//! let mut message = Decomposer::new().decompose(raw, "")?;
//! assert_eq!(message.parts()[0].body(), b"Hello");
//!
//! let builder = MessageBuilder::new();
//! assert_eq!(builder.build(&mut message), raw);
//!
//! builder.set_header_field(&mut message, "From", "b@example.com");
//! let rebuilt = builder.build(&mut message);
//! assert!(rebuilt.starts_with(b"From: b@example.com\r\nContent-Type"));
//! # Ok::<(), mailsplice_mime::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod builder;
mod config;
mod content_type;
mod decompose;
mod error;
mod message;
mod multipart;
mod path;

pub mod encoding;

pub use builder::MessageBuilder;
pub use config::{Config, ConfigBuilder, DEFAULT_MAX_PART_DEPTH, LineEnding};
pub use content_type::ContentType;
pub use decompose::{Decomposer, MAX_RFC822_DEPTH};
pub use encoding::TransferEncoding;
pub use error::{Error, Result};
pub use mailsplice_textproto::Headers;
pub use message::Message;
pub use multipart::{MultipartReader, RawPart};
pub use path::{PartPath, PathStep};
