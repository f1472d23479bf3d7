//! MIME content type handling.

use std::fmt;

use crate::error::{Error, Result};

/// Characters that force a parameter value into a quoted string.
const TSPECIALS: &str = "()<>@,;:\\\"/[]?=";

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "jpeg").
    pub sub_type: String,
    /// Parameters in the order they appeared, names lower-cased.
    pub parameters: Vec<(String, String)>,
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: Vec::new(),
        }
    }

    /// Creates a multipart/mixed content type with boundary.
    #[must_use]
    pub fn multipart_mixed(boundary: impl Into<String>) -> Self {
        Self::new("multipart", "mixed").with_parameter("boundary", boundary)
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_parameter(key, value);
        self
    }

    /// Sets a parameter, replacing an existing one with the same name in
    /// place.
    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().to_lowercase();
        let value = value.into();
        match self.parameters.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.parameters.push((key, value)),
        }
    }

    /// Returns a parameter value by case-insensitive name.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameter("boundary")
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("multipart")
    }

    /// Parses a content type string.
    ///
    /// Format: `type/subtype; param1=value1; param2="quoted; value"`
    ///
    /// # Errors
    ///
    /// Returns an error if the value is empty, has no subtype, or carries a
    /// parameter that is not `name=value`.
    pub fn parse(s: &str) -> Result<Self> {
        let (media, mut rest) = s.split_once(';').unwrap_or((s, ""));
        let media = media.trim();
        if media.is_empty() {
            return Err(Error::InvalidContentType("Empty content type".to_string()));
        }

        let (main_type, sub_type) = media
            .split_once('/')
            .ok_or_else(|| Error::InvalidContentType(format!("Missing subtype: {media}")))?;
        let (main_type, sub_type) = (main_type.trim(), sub_type.trim());
        if main_type.is_empty() || sub_type.is_empty() {
            return Err(Error::InvalidContentType(format!(
                "Incomplete media type: {media}"
            )));
        }

        let mut content_type = Self::new(main_type.to_lowercase(), sub_type.to_lowercase());

        loop {
            rest = rest.trim_start_matches(|c: char| c == ';' || c.is_whitespace());
            if rest.is_empty() {
                break;
            }

            let (key, after) = rest.split_once('=').ok_or_else(|| {
                Error::InvalidContentType(format!("Parameter without value: {rest}"))
            })?;
            let key = key.trim();
            if key.is_empty() || key.contains(';') {
                return Err(Error::InvalidContentType(format!(
                    "Malformed parameter: {rest}"
                )));
            }

            let after = after.trim_start();
            let (value, remaining) = if after.starts_with('"') {
                parse_quoted(after)?
            } else {
                let end = after.find(';').unwrap_or(after.len());
                (after[..end].trim_end().to_string(), &after[end..])
            };
            if value.is_empty() && !after.starts_with('"') {
                return Err(Error::InvalidContentType(format!(
                    "Empty value for parameter {key}"
                )));
            }

            content_type.parameters.push((key.to_lowercase(), value));
            rest = remaining;
        }

        Ok(content_type)
    }
}

/// Parses a quoted string starting at the opening quote.
///
/// Returns the unescaped value and the text after the closing quote.
fn parse_quoted(s: &str) -> Result<(String, &str)> {
    let mut value = String::new();
    let mut chars = s.char_indices().skip(1);

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((value, &s[i + 1..])),
            '\\' => match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => break,
            },
            _ => value.push(c),
        }
    }

    Err(Error::InvalidContentType(format!(
        "Unterminated quoted string: {s}"
    )))
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let main = &self.main_type;
        let sub = &self.sub_type;
        write!(f, "{main}/{sub}")?;

        for (key, value) in &self.parameters {
            if value.is_empty()
                || value.contains(|c: char| c.is_whitespace() || TSPECIALS.contains(c))
            {
                let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "; {key}=\"{escaped}\"")?;
            } else {
                write!(f, "; {key}={value}")?;
            }
        }

        Ok(())
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
    fn test_content_type_new() {
        let ct = ContentType::new("text", "plain");
        assert_eq!(ct.main_type, "text");
        assert_eq!(ct.sub_type, "plain");
        assert!(ct.parameters.is_empty());
    }

    #[test]
    fn test_multipart_mixed() {
        let ct = ContentType::multipart_mixed("boundary123");
        assert_eq!(ct.main_type, "multipart");
        assert_eq!(ct.sub_type, "mixed");
        assert_eq!(ct.boundary(), Some("boundary123"));
        assert!(ct.is_multipart());
    }

    #[test]
    fn test_content_type_parse() {
        let ct = ContentType::parse("Text/Plain; Charset=utf-8").unwrap();
        assert_eq!(ct.main_type, "text");
        assert_eq!(ct.sub_type, "plain");
        assert_eq!(ct.parameter("CHARSET"), Some("utf-8"));
        assert_eq!(ct.parameters[0].0, "charset");
    }

    #[test]
    fn test_content_type_parse_quoted() {
        let ct = ContentType::parse("multipart/mixed; boundary=\"----=_Part_123\"").unwrap();
        assert_eq!(ct.main_type, "multipart");
        assert_eq!(ct.sub_type, "mixed");
        assert_eq!(ct.boundary(), Some("----=_Part_123"));
    }

    #[test]
    fn test_content_type_parse_quoted_special_chars() {
        let ct = ContentType::parse(
            r#"application/octet-stream; name="a; \"b\".txt"; size=42"#,
        )
        .unwrap();
        assert_eq!(ct.parameter("name"), Some("a; \"b\".txt"));
        assert_eq!(ct.parameter("size"), Some("42"));
    }

    #[test]
    fn test_content_type_parse_keeps_parameter_order() {
        let ct = ContentType::parse("multipart/related; type=text/html; boundary=b1; start=x").unwrap();
        let names: Vec<&str> = ct.parameters.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, ["type", "boundary", "start"]);
        assert_eq!(ct.parameter("type"), Some("text/html"));
    }

    #[test]
    fn test_content_type_parse_folded_whitespace() {
        let ct = ContentType::parse("multipart/alternative;  boundary=abc ;").unwrap();
        assert_eq!(ct.boundary(), Some("abc"));
    }

    #[test]
    fn test_content_type_parse_errors() {
        assert!(ContentType::parse("").is_err());
        assert!(ContentType::parse("   ").is_err());
        assert!(ContentType::parse("text").is_err());
        assert!(ContentType::parse("text/").is_err());
        assert!(ContentType::parse("text/plain; charset").is_err());
        assert!(ContentType::parse("text/plain; charset=").is_err());
        assert!(ContentType::parse("text/plain; name=\"open").is_err());
    }

    #[test]
    fn test_set_parameter_replaces_in_place() {
        let mut ct = ContentType::parse("multipart/mixed; boundary=old; charset=x").unwrap();
        ct.set_parameter("Boundary", "new");
        assert_eq!(ct.to_string(), "multipart/mixed; boundary=new; charset=x");
    }

    #[test]
    fn test_content_type_display_quotes() {
        let ct = ContentType::new("application", "x")
            .with_parameter("name", "two words")
            .with_parameter("q", "say \"hi\"");
        assert_eq!(
            ct.to_string(),
            r#"application/x; name="two words"; q="say \"hi\"""#
        );

        let reparsed = ContentType::parse(&ct.to_string()).unwrap();
        assert_eq!(reparsed, ct);
    }
}
