//! Splitting raw messages into [`Message`] trees.

use std::path::Path;

use mailsplice_textproto::{Headers, TextReader};
use tracing::{debug, trace};

use crate::config::Config;
use crate::content_type::ContentType;
use crate::encoding::decode_by_content_encoding;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::multipart::MultipartReader;
use crate::path::{PartPath, PathStep};

/// Number of nested `message/rfc822` levels unwrapped into messages.
/// Deeper embedded messages are kept as opaque bodies.
pub const MAX_RFC822_DEPTH: usize = 5;

/// Splits raw messages into trees of headers, bodies and parts.
///
/// Every node keeps the exact bytes of its header block, so a tree built
/// back with [`MessageBuilder`](crate::MessageBuilder) reproduces the
/// input wherever it was not edited.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decomposer {
    config: Config,
}

impl Decomposer {
    /// Creates a decomposer with the default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    /// Creates a decomposer with the given configuration.
    #[must_use]
    pub const fn with_config(config: Config) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Decomposes a raw message.
    ///
    /// `idx` becomes the index of the root; parts are numbered below it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if a header block is malformed,
    /// [`Error::InvalidMultipart`] if a multipart body cannot be split and
    /// [`Error::NestingTooDeep`] if parts nest deeper than the configured
    /// limit. Embedded `message/rfc822` bodies that cannot be decoded or
    /// parsed are kept as plain bodies instead.
    pub fn decompose(&self, raw: &[u8], idx: &str) -> Result<Message> {
        self.decompose_at(raw, idx, 0)
    }

    /// Reads a file and decomposes its contents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, otherwise the
    /// errors of [`Decomposer::decompose`].
    pub fn decompose_file(&self, path: impl AsRef<Path>) -> Result<Message> {
        let raw = std::fs::read(path)?;
        self.decompose(&raw, "")
    }

    /// Returns the multipart boundary declared by `Content-Type`.
    ///
    /// A missing header, a missing parameter or an empty boundary yield
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContentType`] if the header cannot be parsed.
    pub fn extract_boundary(headers: &Headers) -> Result<Option<String>> {
        let Some(value) = headers.get("Content-Type") else {
            return Ok(None);
        };
        let content_type = ContentType::parse(value)?;
        Ok(content_type
            .boundary()
            .filter(|boundary| !boundary.is_empty())
            .map(String::from))
    }

    fn decompose_at(&self, raw: &[u8], idx: &str, rfc822_depth: usize) -> Result<Message> {
        let mut reader = TextReader::new(raw);
        let header = reader.read_mime_header()?;
        let body = reader.into_inner();

        let mut message = Message::with_headers(header.headers);
        message.set_original_header(&header.raw);
        message.idx = idx.to_string();
        message.rfc822_depth = rfc822_depth;

        self.extract_parts(&mut message, body)?;
        Ok(message)
    }

    /// Walks the multipart structure below `root` with an explicit stack.
    fn extract_parts(&self, root: &mut Message, body: &[u8]) -> Result<()> {
        let mut pending = vec![(PartPath::root(), body)];

        while let Some((path, body)) = pending.pop() {
            if path.part_depth() > self.config.max_part_depth {
                return Err(Error::NestingTooDeep {
                    depth: self.config.max_part_depth,
                });
            }

            let node = root.resolve_mut(&path).ok_or_else(|| {
                Error::InvalidMultipart(format!("part {path} vanished while decomposing"))
            })?;

            let boundary = match Self::extract_boundary(&node.headers) {
                Ok(boundary) => boundary,
                Err(err) => {
                    trace!(idx = %node.idx, %err, "unparsable Content-Type, reading as single part");
                    None
                }
            };

            let Some(boundary) = boundary else {
                self.extract_body(node, body);
                continue;
            };

            let children = split_multipart(node, &boundary, body)?;
            pending.extend(children.into_iter().rev());
        }

        Ok(())
    }

    /// Sets the body of a single part, unwrapping embedded messages.
    fn extract_body(&self, node: &mut Message, body: &[u8]) {
        if node.rfc822_depth < MAX_RFC822_DEPTH && is_rfc822(&node.headers) && !body.is_empty() {
            match self.unwrap_rfc822(node, body) {
                Ok((nested, decoded)) => {
                    node.set_body_message(nested);
                    node.is_decoded = decoded;
                    return;
                }
                Err(err) => debug!(
                    idx = %node.idx,
                    encoding = %node.transfer_encoding(),
                    %err,
                    "keeping message/rfc822 body opaque"
                ),
            }
        }
        node.body = body.to_vec();
    }

    fn unwrap_rfc822(&self, node: &Message, body: &[u8]) -> Result<(Message, bool)> {
        let (decoded, transformed) = decode_by_content_encoding(body, node.transfer_encoding())?;
        let idx = format!("{}-0", node.idx);
        let nested = self.decompose_at(&decoded, &idx, node.rfc822_depth + 1)?;
        Ok((nested, transformed))
    }
}

/// Reads the parts of a multipart body into `node`.
///
/// Returns the position and body of each new child for further descent.
fn split_multipart<'a>(
    node: &mut Message,
    boundary: &str,
    body: &'a [u8],
) -> Result<Vec<(PartPath, &'a [u8])>> {
    let mut reader = MultipartReader::new(body, boundary);
    let mut children = Vec::new();

    while let Some(part) = reader.next_part()? {
        let n = reader.parts_read();
        let mut child = Message::with_headers(part.headers);
        child.set_original_header(&part.raw_header);
        child.idx = if node.idx.is_empty() {
            n.to_string()
        } else {
            format!("{}-{n}", node.idx)
        };
        child.rfc822_depth = node.rfc822_depth;
        child.shares_line_break = part.shares_line_break;

        node.add_part(child);
        children.push((node.path.child(PathStep::Part(n - 1)), part.body));
    }

    if children.is_empty() {
        // Nothing between the delimiters; keep the text as it was.
        trace!(idx = %node.idx, "multipart body without parts");
        node.body = body.to_vec();
        return Ok(children);
    }

    node.boundary = boundary.to_string();
    node.preamble = reader.preamble().to_vec();
    node.epilogue = reader.epilogue().map(<[u8]>::to_vec);
    trace!(idx = %node.idx, parts = children.len(), "split multipart body");

    Ok(children)
}

/// Literal, case-sensitive prefix match on the trimmed `Content-Type`.
fn is_rfc822(headers: &Headers) -> bool {
    headers
        .get("Content-Type")
        .is_some_and(|value| value.trim_matches([' ', '\t']).starts_with("message/rfc822"))
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
    use crate::encoding::encode_base64;

    const SIMPLE: &str = concat!(
        "From: a@example.com\r\n",
        "Subject: Hi\r\n",
        "\r\n",
        "Hello\r\n",
    );

    #[test]
    fn test_decompose_simple() {
        let message = Decomposer::new().decompose(SIMPLE.as_bytes(), "").unwrap();

        assert_eq!(message.headers().get("Subject"), Some("Hi"));
        assert_eq!(message.header_order(), ["From", "Subject"]);
        assert_eq!(
            message.raw_original_header(),
            b"From: a@example.com\r\nSubject: Hi"
        );
        assert_eq!(message.body(), b"Hello\r\n");
        assert_eq!(message.idx(), "");
        assert!(!message.is_multipart());
        assert!(!message.is_rfc822());
    }

    #[test]
    fn test_decompose_header_error() {
        let err = Decomposer::new()
            .decompose(b" Leading: space\r\n\r\n", "")
            .unwrap_err();
        assert!(err.is_malformed_header());
    }

    #[test]
    fn test_extract_boundary() {
        let mut headers = Headers::new();
        assert_eq!(Decomposer::extract_boundary(&headers).unwrap(), None);

        headers.set("Content-Type", "text/plain; charset=utf-8");
        assert_eq!(Decomposer::extract_boundary(&headers).unwrap(), None);

        headers.set("Content-Type", "multipart/mixed; boundary=\"a b\"");
        assert_eq!(
            Decomposer::extract_boundary(&headers).unwrap().as_deref(),
            Some("a b")
        );

        headers.set("Content-Type", "multipart/mixed; boundary=\"\"");
        assert_eq!(Decomposer::extract_boundary(&headers).unwrap(), None);

        headers.set("Content-Type", "nonsense");
        assert!(Decomposer::extract_boundary(&headers).is_err());
    }

    #[test]
    fn test_unparsable_content_type_is_single_part() {
        let raw = b"Content-Type: ;;;\r\n\r\n--x\r\n\r\nbody\r\n--x--\r\n";
        let message = Decomposer::new().decompose(raw, "").unwrap();
        assert!(!message.is_multipart());
        assert_eq!(message.body(), b"--x\r\n\r\nbody\r\n--x--\r\n");
    }

    #[test]
    fn test_decompose_nested_multipart_indexes() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=outer\r\n",
            "\r\n",
            "--outer\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "one\r\n",
            "--outer\r\n",
            "Content-Type: multipart/alternative; boundary=inner\r\n",
            "\r\n",
            "--inner\r\n",
            "\r\n",
            "two-a\r\n",
            "--inner\r\n",
            "\r\n",
            "two-b\r\n",
            "--inner--\r\n",
            "--outer--\r\n",
        );
        let message = Decomposer::new().decompose(raw.as_bytes(), "").unwrap();

        assert_eq!(message.boundary(), "outer");
        assert_eq!(message.parts().len(), 2);
        assert_eq!(message.parts()[0].idx(), "1");
        assert_eq!(message.parts()[0].body(), b"one");

        let nested = &message.parts()[1];
        assert_eq!(nested.idx(), "2");
        assert_eq!(nested.boundary(), "inner");
        assert_eq!(nested.epilogue(), Some(&b""[..]));
        assert_eq!(nested.parts()[0].idx(), "2-1");
        assert_eq!(nested.parts()[1].idx(), "2-2");
        assert_eq!(nested.parts()[1].body(), b"two-b");

        let deepest = PartPath::from(vec![PathStep::Part(1), PathStep::Part(1)]);
        assert_eq!(nested.parts()[1].path(), &deepest);
        assert_eq!(nested.parts()[1].parent().unwrap(), *nested.path());
    }

    #[test]
    fn test_decompose_idx_prefix() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\r\n\r\n--b\r\n\r\nx\r\n--b--\r\n";
        let message = Decomposer::new().decompose(raw, "3").unwrap();
        assert_eq!(message.idx(), "3");
        assert_eq!(message.parts()[0].idx(), "3-1");
    }

    #[test]
    fn test_decompose_scanner_error_aborts() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\r\n\r\n--b\r\n\r\nno close\r\n";
        let err = Decomposer::new().decompose(raw, "").unwrap_err();
        assert!(matches!(err, Error::InvalidMultipart(_)));
    }

    #[test]
    fn test_decompose_multipart_without_parts_keeps_body() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\r\n\r\nnothing\r\n--b--\r\n";
        let message = Decomposer::new().decompose(raw, "").unwrap();
        assert!(!message.is_multipart());
        assert_eq!(message.body(), b"nothing\r\n--b--\r\n");
    }

    #[test]
    fn test_decompose_rfc822_base64() {
        let inner = "Subject: inner\r\n\r\ninner body";
        let raw = format!(
            "Content-Type: message/rfc822\r\nContent-Transfer-Encoding: base64\r\n\r\n{}",
            encode_base64(inner.as_bytes())
        );
        let message = Decomposer::new().decompose(raw.as_bytes(), "1").unwrap();

        assert!(message.is_rfc822());
        assert!(message.is_decoded());
        assert!(message.body().is_empty());

        let nested = message.body_message().unwrap();
        assert_eq!(nested.headers().get("Subject"), Some("inner"));
        assert_eq!(nested.body(), b"inner body");
        assert_eq!(nested.idx(), "1-0");
        assert_eq!(nested.rfc822_depth(), 1);
        assert_eq!(nested.path().steps(), [PathStep::Embedded]);
    }

    #[test]
    fn test_decompose_rfc822_plain() {
        let raw = b"Content-Type:  message/rfc822; x=y\r\n\r\nSubject: s\r\n\r\nb";
        let message = Decomposer::new().decompose(raw, "").unwrap();
        assert!(message.is_rfc822());
        assert!(!message.is_decoded());
    }

    #[test]
    fn test_rfc822_match_is_case_sensitive() {
        let raw = b"Content-Type: Message/RFC822\r\n\r\nSubject: s\r\n\r\nb";
        let message = Decomposer::new().decompose(raw, "").unwrap();
        assert!(!message.is_rfc822());
        assert_eq!(message.body(), b"Subject: s\r\n\r\nb");
    }

    #[test]
    fn test_rfc822_failures_fall_back_to_body() {
        let raw = b"Content-Type: message/rfc822\r\nContent-Transfer-Encoding: base64\r\n\r\n!!!";
        let message = Decomposer::new().decompose(raw, "").unwrap();
        assert!(!message.is_rfc822());
        assert_eq!(message.body(), b"!!!");

        let raw = b"Content-Type: message/rfc822\r\n\r\n\tnot a header block";
        let message = Decomposer::new().decompose(raw, "").unwrap();
        assert!(!message.is_rfc822());
        assert_eq!(message.body(), b"\tnot a header block");
    }

    #[test]
    fn test_max_part_depth() {
        let mut raw = String::new();
        for level in 0..4 {
            raw.push_str(&format!(
                "Content-Type: multipart/mixed; boundary=b{level}\r\n\r\n--b{level}\r\n"
            ));
        }
        raw.push_str("\r\nleaf\r\n");
        for level in (0..4).rev() {
            raw.push_str(&format!("--b{level}--\r\n"));
        }

        let decomposer = Decomposer::with_config(Config::builder().max_part_depth(3).build());
        let err = decomposer.decompose(raw.as_bytes(), "").unwrap_err();
        assert!(matches!(err, Error::NestingTooDeep { depth: 3 }));

        let decomposer = Decomposer::with_config(Config::builder().max_part_depth(4).build());
        assert!(decomposer.decompose(raw.as_bytes(), "").is_ok());
    }

    #[test]
    fn test_decompose_file() {
        let path = std::env::temp_dir().join(format!(
            "mailsplice-decompose-{}.eml",
            std::process::id()
        ));
        std::fs::write(&path, SIMPLE).unwrap();
        let message = Decomposer::new().decompose_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(message.headers().get("From"), Some("a@example.com"));

        let err = Decomposer::new()
            .decompose_file(path.with_extension("missing"))
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
