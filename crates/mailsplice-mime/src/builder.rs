//! Serializing [`Message`] trees back to bytes.

use std::collections::HashMap;

use mailsplice_textproto::canonical_mime_header_key;
use tracing::debug;

use crate::config::{Config, LineEnding};
use crate::content_type::ContentType;
use crate::encoding::{encode_by_content_encoding, random_boundary};
use crate::message::{Message, trim_line_endings};

/// Writes message trees as RFC 5322 / MIME bytes.
///
/// Headers that were not changed since decomposition are written back
/// verbatim, and multipart bodies keep their preamble and epilogue, so an
/// unedited tree reproduces its input.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageBuilder {
    config: Config,
}

impl MessageBuilder {
    /// Creates a builder with the default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    /// Creates a builder with the given configuration.
    #[must_use]
    pub const fn with_config(config: Config) -> Self {
        Self { config }
    }

    /// Returns the line terminator used for generated lines.
    #[must_use]
    pub const fn line_ending(&self) -> LineEnding {
        self.config.line_ending
    }

    /// Builds the complete message.
    ///
    /// A multipart message without a boundary gets a random one, and its
    /// `Content-Type` is updated to carry it.
    #[must_use]
    pub fn build(&self, message: &mut Message) -> Vec<u8> {
        self.ensure_boundary(message);

        let body = self.build_body(message);
        let encoding = message.transfer_encoding();
        let body = if message.is_decoded && encoding.is_transforming() {
            encode_by_content_encoding(&body, encoding, self.line_ending()).into_owned()
        } else {
            body
        };

        let nl = self.line_ending().as_bytes();
        let mut out = self.build_header(message);
        let mut separators = if out.is_empty() { 1 } else { 2 };
        if message.shares_line_break && body.is_empty() {
            // The following delimiter supplies the last line break.
            separators -= 1;
        }
        for _ in 0..separators {
            out.extend_from_slice(nl);
        }
        out.extend_from_slice(&body);
        out
    }

    /// Builds the header block without its final line terminator.
    ///
    /// The raw header is reused unless the header was changed. Otherwise the
    /// fields are written in their original order, one line per original
    /// occurrence, followed by the remaining non-empty values. Values that
    /// were read from a message and not replaced since are written as their
    /// original field bytes.
    #[must_use]
    pub fn build_header(&self, message: &Message) -> Vec<u8> {
        if !message.raw_original_header.is_empty() && !message.header_changed {
            return trim_line_endings(&message.raw_original_header).to_vec();
        }

        let headers = &message.headers;
        let mut lines: Vec<Vec<u8>> = Vec::new();
        let mut used: HashMap<String, usize> = HashMap::new();

        for name in &message.header_order {
            let key = canonical_mime_header_key(name);
            let index = used.get(&key).copied().unwrap_or_default();
            if let Some(value) = headers.get_all(&key).get(index) {
                lines.push(field_line(headers.raw_field(&key, index), name, value));
                used.insert(key, index + 1);
            }
        }

        for key in headers.keys() {
            let skip = used.get(key).copied().unwrap_or_default();
            for (index, value) in headers.get_all(key).iter().enumerate().skip(skip) {
                if !value.is_empty() {
                    lines.push(field_line(headers.raw_field(key, index), key, value));
                }
            }
        }

        lines.join(self.line_ending().as_bytes())
    }

    /// Builds the body: the embedded message, the plain body, and the
    /// parts between boundary lines.
    #[must_use]
    pub fn build_body(&self, message: &mut Message) -> Vec<u8> {
        let mut out = match message.body_message.as_deref_mut() {
            Some(nested) => self.build(nested),
            None => message.body.clone(),
        };

        if !message.is_multipart() {
            return out;
        }

        self.ensure_boundary(message);
        let nl = self.line_ending().as_bytes();
        let delimiter = format!("--{}", message.boundary).into_bytes();

        out.extend_from_slice(&message.preamble);
        for (i, part) in message.parts.iter_mut().enumerate() {
            if i > 0 {
                out.extend_from_slice(nl);
            }
            out.extend_from_slice(&delimiter);
            out.extend_from_slice(nl);
            out.extend_from_slice(&self.build(part));
        }

        out.extend_from_slice(nl);
        out.extend_from_slice(&delimiter);
        out.extend_from_slice(b"--");
        match &message.epilogue {
            Some(epilogue) => out.extend_from_slice(epilogue),
            None => out.extend_from_slice(nl),
        }
        out
    }

    /// Sets a header field and patches the raw header with this builder's
    /// line terminator.
    pub fn set_header_field(&self, message: &mut Message, field: &str, value: &str) {
        message.set_header_field(field, value, self.line_ending());
    }

    /// Gives a multipart message a boundary and makes `Content-Type`
    /// declare it.
    fn ensure_boundary(&self, message: &mut Message) {
        if !message.is_multipart() {
            return;
        }

        if message.boundary.is_empty() {
            message.boundary = random_boundary();
            debug!(idx = %message.idx, boundary = %message.boundary, "generated multipart boundary");
        }

        let content_type = message.content_type().ok().flatten();
        if content_type.as_ref().and_then(ContentType::boundary) == Some(message.boundary.as_str()) {
            return;
        }

        let content_type = match content_type {
            Some(mut content_type) if content_type.is_multipart() => {
                content_type.set_parameter("boundary", message.boundary.clone());
                content_type
            }
            _ => ContentType::multipart_mixed(message.boundary.clone()),
        };
        debug!(idx = %message.idx, %content_type, "rewriting Content-Type boundary");
        self.set_header_field(message, "Content-Type", &content_type.to_string());
    }
}

/// Returns the original field bytes, or `name: value` when there are none.
fn field_line(raw: Option<&[u8]>, name: &str, value: &str) -> Vec<u8> {
    raw.map_or_else(|| format!("{name}: {value}").into_bytes(), <[u8]>::to_vec)
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
    use crate::Decomposer;
    use crate::encoding::TransferEncoding;

    fn leaf(body: &str) -> Message {
        let mut message = Message::new();
        message.set_body(body);
        message
    }

    fn round_trip(raw: &[u8]) -> Vec<u8> {
        let mut message = Decomposer::new().decompose(raw, "").unwrap();
        MessageBuilder::new().build(&mut message)
    }

    #[test]
    fn test_build_unchanged_header_verbatim() {
        let raw = b"SUBJECT:  odd  spacing\r\nx-lower: v\r\n\r\nbody";
        assert_eq!(round_trip(raw), raw);
    }

    #[test]
    fn test_build_header_from_order() {
        let mut message = Decomposer::new()
            .decompose(b"To: a\r\nReceived: one\r\nReceived: two\r\nSubject: s\r\n\r\nx", "")
            .unwrap();
        message.headers_mut().add("X-New", "added");

        let header = MessageBuilder::new().build_header(&message);
        assert_eq!(
            header,
            b"To: a\r\nReceived: one\r\nReceived: two\r\nSubject: s\r\nX-New: added"
        );
    }

    #[test]
    fn test_build_header_skips_empty_extra_values() {
        let mut message = Message::new();
        message.headers_mut().add("A", "1");
        message.headers_mut().add("Empty", "");
        message.headers_mut().add("B", "2");

        let header = MessageBuilder::with_config(Config::builder().line_ending(LineEnding::Lf).build())
            .build_header(&message);
        assert_eq!(header, b"A: 1\nB: 2");
    }

    #[test]
    fn test_build_header_removed_field_not_emitted() {
        let mut message = Decomposer::new()
            .decompose(b"A: 1\r\nB: 2\r\n\r\n", "")
            .unwrap();
        message.headers_mut().remove("A");

        assert_eq!(MessageBuilder::new().build_header(&message), b"B: 2");
    }

    #[test]
    fn test_build_header_keeps_raw_field_bytes() {
        let mut message = Decomposer::new()
            .decompose(b"Subject: Caf\xe9\r\n  au lait\r\nX-\xff: 1\r\nTo: a\r\n\r\nx", "")
            .unwrap();
        message.headers_mut().set("To", "b");

        assert_eq!(
            MessageBuilder::new().build_header(&message),
            b"Subject: Caf\xe9\r\n  au lait\r\nX-\xff: 1\r\nTo: b"
        );
    }

    #[test]
    fn test_build_part_sharing_delimiter_line_break() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\r\n\r\n--b\r\n\r\n--b\r\nX: 1\r\n\r\n--b--\r\n";
        let mut message = Decomposer::new().decompose(raw, "").unwrap();
        assert!(message.parts()[0].shares_line_break);
        assert!(message.parts()[1].shares_line_break);
        assert_eq!(MessageBuilder::new().build(&mut message), raw);

        message.part_mut(1).unwrap().set_body("filled");
        let built = MessageBuilder::new().build(&mut message);
        assert!(built.ends_with(b"--b\r\nX: 1\r\n\r\nfilled\r\n--b--\r\n"));
    }

    #[test]
    fn test_build_empty_header_single_separator() {
        let mut message = leaf("just body");
        assert_eq!(MessageBuilder::new().build(&mut message), b"\r\njust body");
    }

    #[test]
    fn test_build_synthetic_multipart() {
        let mut message = Message::new();
        message.headers_mut().add("Subject", "parts");
        message.add_part(leaf("one"));
        message.add_part(leaf("two"));
        message.set_boundary("xyz");

        let built = MessageBuilder::new().build(&mut message);
        let expected = concat!(
            "Subject: parts\r\n",
            "Content-Type: multipart/mixed; boundary=xyz\r\n",
            "\r\n",
            "--xyz\r\n",
            "\r\n",
            "one\r\n",
            "--xyz\r\n",
            "\r\n",
            "two\r\n",
            "--xyz--\r\n",
        );
        assert_eq!(String::from_utf8(built).unwrap(), expected);
    }

    #[test]
    fn test_build_generates_boundary() {
        let mut message = Message::new();
        message
            .headers_mut()
            .add("Content-Type", "multipart/alternative; charset=x");
        message.add_part(leaf("a"));

        let built = MessageBuilder::new().build(&mut message);

        let boundary = message.boundary().to_string();
        assert_eq!(boundary.len(), 60);
        assert_eq!(
            message.headers().get("Content-Type").unwrap(),
            format!("multipart/alternative; charset=x; boundary={boundary}")
        );

        let reparsed = Decomposer::new().decompose(&built, "").unwrap();
        assert_eq!(reparsed.boundary(), boundary);
        assert_eq!(reparsed.parts()[0].body(), b"a");
    }

    #[test]
    fn test_changed_boundary_patches_raw_header() {
        let raw = concat!(
            "Subject: s\r\n",
            "Content-Type: multipart/mixed;\r\n",
            "\tboundary=\"old\"\r\n",
            "X-After: kept\r\n",
            "\r\n",
            "--old\r\n",
            "\r\n",
            "body\r\n",
            "--old--\r\n",
        );
        let mut message = Decomposer::new().decompose(raw.as_bytes(), "").unwrap();
        message.set_boundary("new");

        let built = MessageBuilder::new().build(&mut message);
        let expected = concat!(
            "Subject: s\r\n",
            "Content-Type: multipart/mixed; boundary=new\r\n",
            "X-After: kept\r\n",
            "\r\n",
            "--new\r\n",
            "\r\n",
            "body\r\n",
            "--new--\r\n",
        );
        assert_eq!(String::from_utf8(built).unwrap(), expected);
    }

    #[test]
    fn test_build_reencodes_decoded_body() {
        let mut inner = Message::new();
        inner.headers_mut().add("Subject", "inner");
        inner.set_body("hi");

        let mut message = Message::new();
        message.headers_mut().add("Content-Type", "message/rfc822");
        message
            .headers_mut()
            .add("Content-Transfer-Encoding", "base64");
        message.set_body_message(inner);
        message.set_decoded(true);
        assert_eq!(message.transfer_encoding(), TransferEncoding::Base64);

        let built = MessageBuilder::new().build(&mut message);
        let expected = format!(
            "Content-Type: message/rfc822\r\nContent-Transfer-Encoding: base64\r\n\r\n{}",
            crate::encoding::encode_base64(b"Subject: inner\r\n\r\nhi")
        );
        assert_eq!(String::from_utf8(built).unwrap(), expected);
    }

    #[test]
    fn test_set_header_field_uses_line_ending() {
        let mut message = Decomposer::new().decompose(b"A: 1\n\nbody", "").unwrap();
        let builder = MessageBuilder::with_config(Config::builder().line_ending(LineEnding::Lf).build());
        builder.set_header_field(&mut message, "B", "2");

        assert_eq!(builder.build(&mut message), b"A: 1\nB: 2\n\nbody");
    }
}
