//! MIME header map and field-name canonicalization.

use std::collections::HashMap;

/// Collection of header fields keyed by canonical name.
///
/// Values for the same name keep the order they were added in, and the
/// names themselves keep first-insertion order so iteration is
/// deterministic. Values read from a message also keep the exact bytes of
/// the field they came from; equality only compares names and values.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    values: HashMap<String, Vec<String>>,
    lines: HashMap<String, Vec<Option<Vec<u8>>>>,
    order: Vec<String>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header value after any existing values for the same name.
    pub fn add(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.push(canonical_mime_header_key(name.as_ref()), value.into(), None);
    }

    /// Adds a value read from a message together with the raw bytes of its
    /// field: name, colon, value and any folded continuation lines, without
    /// the final line terminator.
    pub fn add_raw(&mut self, name: impl AsRef<str>, value: impl Into<String>, raw: &[u8]) {
        self.push(
            canonical_mime_header_key(name.as_ref()),
            value.into(),
            Some(raw.to_vec()),
        );
    }

    fn push(&mut self, key: String, value: String, raw: Option<Vec<u8>>) {
        if !self.values.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.lines.entry(key.clone()).or_default().push(raw);
        self.values.entry(key).or_default().push(value);
    }

    /// Sets a header value, replacing any existing values.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let key = canonical_mime_header_key(name.as_ref());
        if !self.values.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.lines.insert(key.clone(), vec![None]);
        self.values.insert(key, vec![value.into()]);
    }

    /// Returns the raw field bytes behind the `index`-th value of a header.
    ///
    /// Values added through [`Headers::add`] or [`Headers::set`] have none.
    #[must_use]
    pub fn raw_field(&self, name: &str, index: usize) -> Option<&[u8]> {
        self.lines
            .get(&canonical_mime_header_key(name))?
            .get(index)?
            .as_deref()
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&canonical_mime_header_key(name))
            .and_then(|v| v.first().map(String::as_str))
    }

    /// Gets all values for a header, in the order they were added.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.values
            .get(&canonical_mime_header_key(name))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns true if at least one value exists for the header.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&canonical_mime_header_key(name))
    }

    /// Removes all values for a header.
    pub fn remove(&mut self, name: &str) {
        let key = canonical_mime_header_key(name);
        self.lines.remove(&key);
        if self.values.remove(&key).is_some() {
            self.order.retain(|k| *k != key);
        }
    }

    /// Returns the canonical names in first-insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Returns an iterator over all `(name, value)` pairs.
    ///
    /// Names come in first-insertion order; values of one name stay together.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order.iter().flat_map(move |name| {
            self.values
                .get(name)
                .into_iter()
                .flatten()
                .map(move |v| (name.as_str(), v.as_str()))
        })
    }

    /// Returns the number of distinct header names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl PartialEq for Headers {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order && self.values == other.values
    }
}

impl Eq for Headers {}

/// Returns the canonical form of a MIME header field name.
///
/// The first letter and any letter following a hyphen are upper-cased, the
/// rest lower-cased (`content-type` becomes `Content-Type`). A name holding
/// a space or any byte that is not a header token byte is returned as is.
#[must_use]
pub fn canonical_mime_header_key(name: &str) -> String {
    if !name.bytes().all(is_token_byte) {
        return name.to_string();
    }

    let mut upper = true;
    name.bytes()
        .map(|b| {
            let c = if upper {
                b.to_ascii_uppercase()
            } else {
                b.to_ascii_lowercase()
            };
            upper = c == b'-';
            char::from(c)
        })
        .collect()
}

/// Reports whether `b` may appear in a header field name (RFC 7230 `tchar`).
#[must_use]
pub const fn is_token_byte(b: u8) -> bool {
    matches!(
        b,
        b'!' | b'#'
            | b'$'
            | b'%'
            | b'&'
            | b'\''
            | b'*'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~'
            | b'0'..=b'9'
            | b'A'..=b'Z'
            | b'a'..=b'z'
    )
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
    fn test_canonical_key() {
        assert_eq!(canonical_mime_header_key("content-type"), "Content-Type");
        assert_eq!(canonical_mime_header_key("MESSAGE-ID"), "Message-Id");
        assert_eq!(canonical_mime_header_key("x-mailer"), "X-Mailer");
        assert_eq!(canonical_mime_header_key("Subject"), "Subject");
        assert_eq!(canonical_mime_header_key("dkim--sig"), "Dkim--Sig");
    }

    #[test]
    fn test_canonical_key_invalid_bytes_untouched() {
        assert_eq!(canonical_mime_header_key("bad key"), "bad key");
        assert_eq!(canonical_mime_header_key("x-ü-header"), "x-ü-header");
        assert_eq!(canonical_mime_header_key("a(b)"), "a(b)");
    }

    #[test]
    fn test_canonical_key_empty() {
        assert_eq!(canonical_mime_header_key(""), "");
    }

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert!(headers.contains("CONTENT-TYPE"));
    }

    #[test]
    fn test_headers_set() {
        let mut headers = Headers::new();
        headers.add("To", "alice@example.com");
        headers.add("To", "bob@example.com");
        assert_eq!(headers.get_all("To").len(), 2);

        headers.set("To", "charlie@example.com");
        assert_eq!(headers.get_all("To"), ["charlie@example.com"]);
    }

    #[test]
    fn test_headers_remove() {
        let mut headers = Headers::new();
        headers.add("Subject", "Test");
        headers.add("From", "a@example.com");

        headers.remove("subject");
        assert!(headers.get("Subject").is_none());
        assert_eq!(headers.keys().collect::<Vec<_>>(), ["From"]);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_headers_iter_insertion_order() {
        let mut headers = Headers::new();
        headers.add("received", "one");
        headers.add("From", "a@example.com");
        headers.add("Received", "two");
        headers.add("Subject", "Hi");

        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(
            pairs,
            [
                ("Received", "one"),
                ("Received", "two"),
                ("From", "a@example.com"),
                ("Subject", "Hi"),
            ]
        );
    }

    #[test]
    fn test_headers_get_all_missing() {
        let headers = Headers::new();
        assert!(headers.get_all("X-Missing").is_empty());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_headers_raw_field() {
        let mut headers = Headers::new();
        headers.add_raw("subject", "Caf\u{fffd}", b"subject:  Caf\xe9");
        headers.add("Subject", "second");

        assert_eq!(headers.raw_field("Subject", 0), Some(&b"subject:  Caf\xe9"[..]));
        assert_eq!(headers.raw_field("Subject", 1), None);
        assert_eq!(headers.raw_field("Subject", 2), None);

        headers.set("Subject", "edited");
        assert_eq!(headers.raw_field("Subject", 0), None);
        assert_eq!(headers.get("Subject"), Some("edited"));
    }

    #[test]
    fn test_headers_eq_ignores_raw_bytes() {
        let mut parsed = Headers::new();
        parsed.add_raw("To", "a", b"TO:a");
        let mut built = Headers::new();
        built.add("To", "a");

        assert_eq!(parsed, built);

        parsed.remove("to");
        assert_eq!(parsed.raw_field("To", 0), None);
        assert!(parsed.is_empty());
    }
}
