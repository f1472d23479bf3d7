//! MIME message tree.

use std::fmt::Write as _;

use mailsplice_textproto::Headers;

use crate::config::LineEnding;
use crate::content_type::ContentType;
use crate::encoding::TransferEncoding;
use crate::error::Result;
use crate::path::{PartPath, PathStep};

/// Indentation added per nesting level in [`Message::structure`].
const STRUCTURE_INDENT: &str = "     ";

/// One message or MIME part.
///
/// A node holds at most one payload: child parts, a plain body, or an
/// embedded `message/rfc822` message. Nodes produced by
/// [`Decomposer`](crate::Decomposer) also keep the exact bytes of their
/// header block so [`MessageBuilder`](crate::MessageBuilder) can write
/// unchanged headers back verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub(crate) headers: Headers,
    pub(crate) header_changed: bool,
    pub(crate) raw_original_header: Vec<u8>,
    pub(crate) header_order: Vec<String>,
    pub(crate) body: Vec<u8>,
    pub(crate) parts: Vec<Message>,
    pub(crate) body_message: Option<Box<Message>>,
    pub(crate) boundary: String,
    pub(crate) preamble: Vec<u8>,
    pub(crate) epilogue: Option<Vec<u8>>,
    /// The header block's closing blank line doubled as the line break of
    /// the delimiter after this part; the part body was empty.
    pub(crate) shares_line_break: bool,
    pub(crate) idx: String,
    pub(crate) is_decoded: bool,
    pub(crate) rfc822_depth: usize,
    pub(crate) path: PartPath,
}

impl Message {
    /// Creates an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a message with the given headers and no raw header bytes.
    #[must_use]
    pub fn with_headers(headers: Headers) -> Self {
        Self {
            headers,
            ..Self::default()
        }
    }

    /// Returns the header fields.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the header fields for editing.
    ///
    /// The raw header no longer describes the fields once they can be
    /// edited directly, so the header is marked as changed.
    pub fn headers_mut(&mut self) -> &mut Headers {
        self.header_changed = true;
        &mut self.headers
    }

    /// Returns true if the header must be rebuilt from the field map.
    #[must_use]
    pub const fn header_changed(&self) -> bool {
        self.header_changed
    }

    /// Marks whether the header must be rebuilt from the field map.
    pub const fn set_header_changed(&mut self, changed: bool) {
        self.header_changed = changed;
    }

    /// Returns the header block as read, trailing line terminators removed.
    #[must_use]
    pub fn raw_original_header(&self) -> &[u8] {
        &self.raw_original_header
    }

    /// Returns the field names in the order they appear in the raw header.
    #[must_use]
    pub fn header_order(&self) -> &[String] {
        &self.header_order
    }

    /// Replaces the raw header block and re-derives the field order from it.
    pub fn set_original_header(&mut self, raw: &[u8]) {
        self.raw_original_header = trim_line_endings(raw).to_vec();
        self.header_order = scan_field_names(&self.raw_original_header);
    }

    /// Returns the body of a leaf part.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Sets the body, dropping any parts or embedded message.
    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.parts.clear();
        self.preamble.clear();
        self.epilogue = None;
        self.body_message = None;
        self.is_decoded = false;
        self.body = body.into();
    }

    /// Returns the child parts.
    #[must_use]
    pub fn parts(&self) -> &[Self] {
        &self.parts
    }

    /// Returns a child part for editing.
    pub fn part_mut(&mut self, index: usize) -> Option<&mut Self> {
        self.parts.get_mut(index)
    }

    /// Appends a child part, dropping any body or embedded message.
    pub fn add_part(&mut self, mut part: Self) {
        self.body.clear();
        self.body_message = None;
        self.is_decoded = false;

        part.rebase(self.path.child(PathStep::Part(self.parts.len())));
        self.parts.push(part);
    }

    /// Returns true if the message has child parts.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        !self.parts.is_empty()
    }

    /// Returns the embedded `message/rfc822` message.
    #[must_use]
    pub fn body_message(&self) -> Option<&Self> {
        self.body_message.as_deref()
    }

    /// Returns the embedded message for editing.
    pub fn body_message_mut(&mut self) -> Option<&mut Self> {
        self.body_message.as_deref_mut()
    }

    /// Embeds a message as the body, dropping any body or parts.
    pub fn set_body_message(&mut self, mut message: Self) {
        self.body.clear();
        self.parts.clear();
        self.preamble.clear();
        self.epilogue = None;

        message.rebase(self.path.child(PathStep::Embedded));
        self.body_message = Some(Box::new(message));
    }

    /// Returns true if the body is an embedded message.
    #[must_use]
    pub const fn is_rfc822(&self) -> bool {
        self.body_message.is_some()
    }

    /// Returns the multipart boundary, empty if none is set.
    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Sets the multipart boundary.
    pub fn set_boundary(&mut self, boundary: impl Into<String>) {
        self.boundary = boundary.into();
    }

    /// Returns the bytes before the first boundary of a multipart body.
    #[must_use]
    pub fn preamble(&self) -> &[u8] {
        &self.preamble
    }

    /// Returns the bytes after the `--boundary--` marker of a decomposed
    /// multipart body, starting with the rest of the closing line.
    ///
    /// `None` for multipart bodies built in memory; the builder then ends
    /// the closing line with a line break of its own.
    #[must_use]
    pub fn epilogue(&self) -> Option<&[u8]> {
        self.epilogue.as_deref()
    }

    /// Returns the dotted part index, e.g. `2-1`.
    #[must_use]
    pub fn idx(&self) -> &str {
        &self.idx
    }

    /// Returns true if the embedded message was transfer-decoded.
    #[must_use]
    pub const fn is_decoded(&self) -> bool {
        self.is_decoded
    }

    /// Sets whether the embedded message must be transfer-encoded on build.
    pub const fn set_decoded(&mut self, decoded: bool) {
        self.is_decoded = decoded;
    }

    /// Returns how many `message/rfc822` levels enclose this node.
    #[must_use]
    pub const fn rfc822_depth(&self) -> usize {
        self.rfc822_depth
    }

    /// Returns the position of this node in its tree.
    #[must_use]
    pub const fn path(&self) -> &PartPath {
        &self.path
    }

    /// Returns the position of the enclosing node, or `None` for a root.
    #[must_use]
    pub fn parent(&self) -> Option<PartPath> {
        self.path.parent()
    }

    /// Finds the node at `path`, with `self` as the root.
    #[must_use]
    pub fn resolve(&self, path: &PartPath) -> Option<&Self> {
        let mut current = self;
        for step in path.steps() {
            current = match step {
                PathStep::Part(n) => current.parts.get(*n)?,
                PathStep::Embedded => current.body_message.as_deref()?,
            };
        }
        Some(current)
    }

    /// Finds the node at `path` for editing, with `self` as the root.
    pub fn resolve_mut(&mut self, path: &PartPath) -> Option<&mut Self> {
        let mut current = self;
        for step in path.steps() {
            current = match step {
                PathStep::Part(n) => current.parts.get_mut(*n)?,
                PathStep::Embedded => current.body_message.as_deref_mut()?,
            };
        }
        Some(current)
    }

    /// Parses the `Content-Type` header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is present but invalid.
    pub fn content_type(&self) -> Result<Option<ContentType>> {
        self.headers
            .get("Content-Type")
            .map(ContentType::parse)
            .transpose()
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("Content-Transfer-Encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Sets a header field, replacing its values, and patches the raw
    /// header in place so unrelated fields keep their original bytes.
    ///
    /// The first top-level line naming `field` is replaced together with its
    /// continuation lines. If no line names it, the field is appended.
    pub fn set_header_field(&mut self, field: &str, value: &str, line_ending: LineEnding) {
        self.headers.set(field, value);
        if self.raw_original_header.is_empty() {
            return;
        }

        let patched = patch_raw_header(&self.raw_original_header, field, value, line_ending);
        self.set_original_header(&patched);
    }

    /// Takes the payload of `other` and overlays its header values.
    ///
    /// For every field of `other`, a non-empty first value replaces the
    /// field here and an empty one removes it. Body, parts, embedded
    /// message and boundary are taken from `other` and the header is
    /// marked as changed.
    pub fn merge(&mut self, other: Self) {
        for key in other.headers.keys() {
            match other.headers.get(key) {
                Some(value) if !value.is_empty() => self.headers.set(key, value),
                _ => self.headers.remove(key),
            }
        }

        self.body = other.body;
        self.body_message = other.body_message;
        self.boundary = other.boundary;
        self.parts = other.parts;
        self.preamble = other.preamble;
        self.epilogue = other.epilogue;
        self.shares_line_break = other.shares_line_break;
        self.is_decoded = other.is_decoded;
        self.header_changed = true;

        let path = self.path.clone();
        self.rebase(path);
    }

    /// Describes the tree layout for debugging.
    ///
    /// Each node lists its index, content type, and whether it is multipart
    /// or an embedded message; children are indented below their parent.
    #[must_use]
    pub fn structure(&self) -> String {
        let mut out = String::new();
        self.write_structure(&mut out, "");
        out
    }

    fn write_structure(&self, out: &mut String, prefix: &str) {
        let content_type = self.headers.get("Content-Type").unwrap_or_default();
        let _ = writeln!(out, "{prefix}IDX: {}", self.idx);
        let _ = writeln!(out, "{prefix}Content-Type: {content_type}");
        let _ = writeln!(out, "{prefix}Is Multipart: {}", self.is_multipart());
        let _ = writeln!(out, "{prefix}Is RFC822: {}", self.is_rfc822());

        let mut prefix = prefix.to_string();
        if let Some(nested) = &self.body_message {
            prefix.push_str(STRUCTURE_INDENT);
            nested.write_structure(out, &prefix);
        }

        let _ = writeln!(out, "{prefix}Parts: {}", self.parts.len());
        if !self.parts.is_empty() {
            prefix.push_str(STRUCTURE_INDENT);
            for part in &self.parts {
                part.write_structure(out, &prefix);
            }
        }
    }

    /// Moves this subtree to `path`, updating every descendant's position.
    pub(crate) fn rebase(&mut self, path: PartPath) {
        let mut stack = vec![(self, path)];
        while let Some((node, path)) = stack.pop() {
            let Self {
                parts,
                body_message,
                path: slot,
                ..
            } = node;

            for (n, part) in parts.iter_mut().enumerate() {
                stack.push((part, path.child(PathStep::Part(n))));
            }
            if let Some(nested) = body_message {
                stack.push((&mut **nested, path.child(PathStep::Embedded)));
            }
            *slot = path;
        }
    }
}

/// Replaces or appends `field: value` in a raw header block.
///
/// The replaced run starts at the first top-level line whose name matches
/// `field` case-insensitively and ends at the start of the next line that
/// is not a continuation. Text after the run is kept after a line break.
/// If no line matches, the pair is appended after the block with its
/// trailing line terminators removed.
pub(crate) fn patch_raw_header(
    raw: &[u8],
    field: &str,
    value: &str,
    line_ending: LineEnding,
) -> Vec<u8> {
    let pair = format!("{field}: {value}");

    let Some((start, end)) = find_field(raw, field) else {
        let kept = trim_line_endings(raw);
        let mut out = Vec::with_capacity(kept.len() + pair.len() + 2);
        out.extend_from_slice(kept);
        if !kept.is_empty() {
            out.extend_from_slice(line_ending.as_bytes());
        }
        out.extend_from_slice(pair.as_bytes());
        return out;
    };

    let suffix = &raw[end..];
    let mut out = Vec::with_capacity(raw.len() + pair.len());
    out.extend_from_slice(&raw[..start]);
    out.extend_from_slice(pair.as_bytes());
    if !suffix.is_empty() {
        out.extend_from_slice(line_ending.as_bytes());
        out.extend_from_slice(suffix);
    }
    out
}

/// Locates the byte range of a field and its continuation lines.
fn find_field(raw: &[u8], field: &str) -> Option<(usize, usize)> {
    let mut start = None;
    let mut offset = 0;

    for line in raw.split_inclusive(|&b| b == b'\n') {
        let is_continuation = matches!(line.first(), Some(b' ' | b'\t'));
        if let Some(start) = start {
            if !is_continuation {
                return Some((start, offset));
            }
        } else if !is_continuation {
            let text = mailsplice_textproto::strip_line_ending(line);
            if text.is_empty() {
                return None;
            }
            if field_name(text).eq_ignore_ascii_case(field.as_bytes()) {
                start = Some(offset);
            }
        }
        offset += line.len();
    }

    start.map(|start| (start, raw.len()))
}

/// Returns the field names of the top-level lines of a raw header.
pub(crate) fn scan_field_names(raw: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    for line in raw.split_inclusive(|&b| b == b'\n') {
        let text = mailsplice_textproto::strip_line_ending(line);
        if text.is_empty() {
            break;
        }
        if matches!(text[0], b' ' | b'\t') {
            continue;
        }
        names.push(String::from_utf8_lossy(field_name(text)).into_owned());
    }
    names
}

/// Text before the first colon, trailing spaces and tabs removed.
fn field_name(line: &[u8]) -> &[u8] {
    let name = line
        .iter()
        .position(|&b| b == b':')
        .map_or(line, |colon| &line[..colon]);
    let end = name
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map_or(0, |i| i + 1);
    &name[..end]
}

pub(crate) fn trim_line_endings(raw: &[u8]) -> &[u8] {
    let end = raw
        .iter()
        .rposition(|&b| b != b'\r' && b != b'\n')
        .map_or(0, |i| i + 1);
    &raw[..end]
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

    fn leaf(body: &str) -> Message {
        let mut message = Message::new();
        message.set_body(body);
        message
    }

    #[test]
    fn test_new_message_is_empty_leaf() {
        let message = Message::new();
        assert!(!message.is_multipart());
        assert!(!message.is_rfc822());
        assert!(message.body().is_empty());
        assert!(message.path().is_root());
        assert!(message.parent().is_none());
    }

    #[test]
    fn test_scan_field_names() {
        let raw = b"From: a\r\nX-Folded: one\r\n two\r\nSubject : hi\r\nno colon\r\n\r\nBody: x";
        assert_eq!(
            scan_field_names(raw),
            ["From", "X-Folded", "Subject", "no colon"]
        );
    }

    #[test]
    fn test_set_original_header_trims_terminators() {
        let mut message = Message::new();
        message.set_original_header(b"To: x\r\ncc: y\r\n\r\n");
        assert_eq!(message.raw_original_header(), b"To: x\r\ncc: y");
        assert_eq!(message.header_order(), ["To", "cc"]);
    }

    #[test]
    fn test_patch_first_field() {
        let patched = patch_raw_header(b"A: 1\r\nB: 2\r\n", "A", "9", LineEnding::Crlf);
        assert_eq!(patched, b"A: 9\r\nB: 2\r\n");
    }

    #[test]
    fn test_patch_last_field_with_terminator() {
        let patched = patch_raw_header(b"A: 1\r\nB: 2\r\n", "B", "3", LineEnding::Crlf);
        assert_eq!(patched, b"A: 1\r\nB: 3");
    }

    #[test]
    fn test_patch_last_field_without_terminator() {
        let patched = patch_raw_header(b"A: 1\r\nB: 2", "B", "3", LineEnding::Crlf);
        assert_eq!(patched, b"A: 1\r\nB: 3");
    }

    #[test]
    fn test_patch_folded_field() {
        let raw = b"Subject: a\r\n  folded\r\n\tagain\r\nTo: x";
        let patched = patch_raw_header(raw, "subject", "new", LineEnding::Crlf);
        assert_eq!(patched, b"subject: new\r\nTo: x");
    }

    #[test]
    fn test_patch_matches_whole_field_name() {
        let raw = b"X-Original-To: a\r\nReply: To: b\r\nTo: c";
        let patched = patch_raw_header(raw, "To", "d", LineEnding::Crlf);
        assert_eq!(patched, b"X-Original-To: a\r\nReply: To: b\r\nTo: d");
    }

    #[test]
    fn test_patch_missing_field_appends() {
        let patched = patch_raw_header(b"A: 1\r\nB: 2\r\n", "C", "3", LineEnding::Lf);
        assert_eq!(patched, b"A: 1\r\nB: 2\nC: 3");

        let patched = patch_raw_header(b"", "C", "3", LineEnding::Lf);
        assert_eq!(patched, b"C: 3");
    }

    #[test]
    fn test_patch_append_drops_blank_line() {
        let patched = patch_raw_header(b"A: 1\r\n\r\n", "B", "3", LineEnding::Crlf);
        assert_eq!(patched, b"A: 1\r\nB: 3");
    }

    #[test]
    fn test_set_header_field_updates_map_and_raw() {
        let mut message = Message::new();
        message.headers.add("A", "1");
        message.headers.add("B", "2");
        message.set_original_header(b"A: 1\r\nB: 2\r\n");

        message.set_header_field("A", "9", LineEnding::Crlf);

        assert_eq!(message.headers().get("A"), Some("9"));
        assert_eq!(message.headers().get("B"), Some("2"));
        assert_eq!(message.raw_original_header(), b"A: 9\r\nB: 2");
        assert_eq!(message.header_order(), ["A", "B"]);
        assert!(!message.header_changed());
    }

    #[test]
    fn test_set_header_field_without_raw_header() {
        let mut message = Message::new();
        message.set_header_field("Subject", "hi", LineEnding::Crlf);
        assert_eq!(message.headers().get("Subject"), Some("hi"));
        assert!(message.raw_original_header().is_empty());
    }

    #[test]
    fn test_headers_mut_marks_changed() {
        let mut message = Message::new();
        message.headers_mut().add("X", "1");
        assert!(message.header_changed());
    }

    #[test]
    fn test_payload_setters_are_exclusive() {
        let mut message = Message::new();
        message.add_part(leaf("one"));
        assert!(message.is_multipart());

        message.set_body("plain");
        assert!(!message.is_multipart());
        assert_eq!(message.body(), b"plain");

        message.set_body_message(leaf("inner"));
        assert!(message.is_rfc822());
        assert!(message.body().is_empty());

        message.add_part(leaf("two"));
        assert!(!message.is_rfc822());
        assert_eq!(message.parts().len(), 1);
    }

    #[test]
    fn test_paths_and_resolve() {
        let mut inner = Message::new();
        inner.add_part(leaf("a"));
        inner.add_part(leaf("b"));

        let mut wrapper = Message::new();
        wrapper.set_body_message(inner);

        let mut root = Message::new();
        root.add_part(leaf("first"));
        root.add_part(wrapper);

        let target = PartPath::from(vec![
            PathStep::Part(1),
            PathStep::Embedded,
            PathStep::Part(1),
        ]);
        let node = root.resolve(&target).unwrap();
        assert_eq!(node.body(), b"b");
        assert_eq!(node.path(), &target);

        let parent = root.resolve(&node.parent().unwrap()).unwrap();
        assert_eq!(parent.parts().len(), 2);
        assert_eq!(parent.path().steps(), [PathStep::Part(1), PathStep::Embedded]);

        assert!(root.resolve(&PartPath::from(vec![PathStep::Part(5)])).is_none());
        assert!(root.resolve(&PartPath::from(vec![PathStep::Embedded])).is_none());

        root.resolve_mut(&target).unwrap().set_body("changed");
        assert_eq!(root.resolve(&target).unwrap().body(), b"changed");
    }

    #[test]
    fn test_merge() {
        let mut target = Message::new();
        target.headers.add("Subject", "old");
        target.headers.add("X-Drop", "gone");
        target.headers.add("X-Keep", "kept");
        target.set_body("old body");
        target.add_part(leaf("p"));

        let mut source = Message::new();
        source.headers.add("Subject", "new");
        source.headers.add("X-Drop", "");
        let mut child = Message::new();
        child.add_part(leaf("deep"));
        source.add_part(leaf("one"));
        source.add_part(child);
        source.set_boundary("b2");

        target.merge(source);

        assert_eq!(target.headers().get("Subject"), Some("new"));
        assert!(!target.headers().contains("X-Drop"));
        assert_eq!(target.headers().get("X-Keep"), Some("kept"));
        assert_eq!(target.boundary(), "b2");
        assert_eq!(target.parts().len(), 2);
        assert!(target.header_changed());

        let deep = PartPath::from(vec![PathStep::Part(1), PathStep::Part(0)]);
        assert_eq!(target.resolve(&deep).unwrap().path(), &deep);
    }

    #[test]
    fn test_structure() {
        let mut inner = Message::new();
        inner.headers.add("Content-Type", "text/plain");
        inner.idx = "1-0".to_string();

        let mut part = Message::new();
        part.headers.add("Content-Type", "message/rfc822");
        part.idx = "1".to_string();
        part.set_body_message(inner);

        let mut root = Message::new();
        root.headers.add("Content-Type", "multipart/mixed; boundary=x");
        root.add_part(part);

        let expected = concat!(
            "IDX: \n",
            "Content-Type: multipart/mixed; boundary=x\n",
            "Is Multipart: true\n",
            "Is RFC822: false\n",
            "Parts: 1\n",
            "     IDX: 1\n",
            "     Content-Type: message/rfc822\n",
            "     Is Multipart: false\n",
            "     Is RFC822: true\n",
            "          IDX: 1-0\n",
            "          Content-Type: text/plain\n",
            "          Is Multipart: false\n",
            "          Is RFC822: false\n",
            "          Parts: 0\n",
            "          Parts: 0\n",
        );
        assert_eq!(root.structure(), expected);
    }

    #[test]
    fn test_content_type_and_encoding() {
        let mut message = Message::new();
        assert!(message.content_type().unwrap().is_none());
        assert_eq!(message.transfer_encoding(), TransferEncoding::SevenBit);

        message.headers.add("Content-Type", "multipart/mixed; boundary=q");
        message.headers.add("Content-Transfer-Encoding", "Base64");
        assert_eq!(
            message.content_type().unwrap().unwrap().boundary(),
            Some("q")
        );
        assert_eq!(message.transfer_encoding(), TransferEncoding::Base64);

        message.headers.set("Content-Type", "broken");
        assert!(message.content_type().is_err());
    }

    #[test]
    fn test_trim_line_endings() {
        assert_eq!(trim_line_endings(b"a\r\n\r\n"), b"a");
        assert_eq!(trim_line_endings(b"\r\n"), b"");
        assert_eq!(trim_line_endings(b"a b"), b"a b");
    }
}
