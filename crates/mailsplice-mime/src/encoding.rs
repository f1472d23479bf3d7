//! Content transfer encoding utilities.
//!
//! Supports Base64 and Quoted-Printable, plus the random boundaries used
//! when a multipart body is generated.

use std::borrow::Cow;
use std::fmt::{self, Write as _};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;

use crate::config::LineEnding;
use crate::error::{Error, Result};

/// Maximum encoded line length (RFC 2045).
const MAX_LINE_LENGTH: usize = 76;

/// Number of random bytes in a generated boundary.
const BOUNDARY_BYTES: usize = 30;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit, // Default (includes "7bit")
        }
    }

    /// Returns true if bodies in this encoding differ from their content.
    #[must_use]
    pub const fn is_transforming(self) -> bool {
        matches!(self, Self::Base64 | Self::QuotedPrintable)
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// Encodes a body for the given transfer encoding.
///
/// Base64 output is wrapped at 76 columns; encodings that do not transform
/// the body return it unchanged.
#[must_use]
pub fn encode_by_content_encoding(
    body: &[u8],
    encoding: TransferEncoding,
    line_ending: LineEnding,
) -> Cow<'_, [u8]> {
    match encoding {
        TransferEncoding::Base64 => Cow::Owned(break_lines(
            encode_base64(body).as_bytes(),
            MAX_LINE_LENGTH,
            line_ending.as_bytes(),
        )),
        TransferEncoding::QuotedPrintable => {
            Cow::Owned(encode_quoted_printable(body, line_ending))
        }
        _ => Cow::Borrowed(body),
    }
}

/// Decodes a body in the given transfer encoding.
///
/// Returns the decoded bytes and whether a transformation was applied.
/// Encodings that do not transform the body return it borrowed with
/// `false`.
///
/// # Errors
///
/// Returns an error if the body is not valid for its encoding.
pub fn decode_by_content_encoding(
    body: &[u8],
    encoding: TransferEncoding,
) -> Result<(Cow<'_, [u8]>, bool)> {
    match encoding {
        TransferEncoding::Base64 => Ok((Cow::Owned(decode_base64(body)?), true)),
        TransferEncoding::QuotedPrintable => {
            Ok((Cow::Owned(decode_quoted_printable(body)?), true))
        }
        _ => Ok((Cow::Borrowed(body), false)),
    }
}

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes Base64 data, ignoring whitespace and line breaks.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Encodes bytes using Quoted-Printable encoding (RFC 2045).
///
/// Line breaks in the input are kept as hard line breaks. Whitespace before
/// a line break or at the end of the input, lone `\r` and every byte that
/// is not printable ASCII are escaped. Lines are kept within 76 columns
/// with soft line breaks.
#[must_use]
pub fn encode_quoted_printable(data: &[u8], line_ending: LineEnding) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len() + data.len() / 4);
    let mut line_length = 0;
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        let crlf = byte == b'\r' && data.get(i + 1) == Some(&b'\n');

        if byte == b'\n' || crlf {
            let width = if crlf { 2 } else { 1 };
            result.extend_from_slice(&data[i..i + width]);
            line_length = 0;
            i += width;
            continue;
        }

        let at_line_end = match data.get(i + 1) {
            None | Some(b'\n') => true,
            Some(b'\r') => data.get(i + 2) == Some(&b'\n'),
            Some(_) => false,
        };
        let literal = match byte {
            // Printable ASCII except '='
            b'!'..=b'<' | b'>'..=b'~' => true,
            // Trailing whitespace would be stripped by decoders
            b' ' | b'\t' => !at_line_end,
            _ => false,
        };
        let width = if literal { 1 } else { 3 };

        // Leave room for the '=' of a soft line break
        if line_length + width > MAX_LINE_LENGTH - 1 {
            result.push(b'=');
            result.extend_from_slice(line_ending.as_bytes());
            line_length = 0;
        }

        if literal {
            result.push(byte);
        } else {
            let mut escaped = String::with_capacity(3);
            let _ = write!(escaped, "={byte:02X}");
            result.extend_from_slice(escaped.as_bytes());
        }
        line_length += width;
        i += 1;
    }

    result
}

/// Decodes Quoted-Printable data (RFC 2045).
///
/// Soft line breaks are removed, hard line breaks are kept as they appear
/// and whitespace at the end of an encoded line is ignored.
///
/// # Errors
///
/// Returns an error if the input contains invalid escape sequences.
pub fn decode_quoted_printable(data: &[u8]) -> Result<Vec<u8>> {
    let mut result = Vec::with_capacity(data.len());

    for line in data.split_inclusive(|&b| b == b'\n') {
        let content = mailsplice_textproto::strip_line_ending(line);
        let ending = &line[content.len()..];

        let end = content
            .iter()
            .rposition(|&b| b != b' ' && b != b'\t')
            .map_or(0, |i| i + 1);
        let content = &content[..end];

        match content.strip_suffix(b"=") {
            Some(soft) => decode_qp_segment(soft, &mut result)?,
            None => {
                decode_qp_segment(content, &mut result)?;
                result.extend_from_slice(ending);
            }
        }
    }

    Ok(result)
}

fn decode_qp_segment(segment: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let mut bytes = segment.iter().copied();

    while let Some(byte) = bytes.next() {
        if byte != b'=' {
            out.push(byte);
            continue;
        }

        // Hex encoded byte
        match (bytes.next(), bytes.next()) {
            (Some(hi), Some(lo)) => match (hex_value(hi), hex_value(lo)) {
                (Some(hi), Some(lo)) => out.push((hi << 4) | lo),
                _ => {
                    return Err(Error::InvalidEncoding(format!(
                        "Invalid hex: ={}{}",
                        char::from(hi),
                        char::from(lo)
                    )));
                }
            },
            _ => {
                return Err(Error::InvalidEncoding(
                    "Incomplete escape sequence".to_string(),
                ));
            }
        }
    }

    Ok(())
}

const fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// Splits `data` into lines of at most `width` bytes joined by `separator`.
#[must_use]
pub fn break_lines(data: &[u8], width: usize, separator: &[u8]) -> Vec<u8> {
    if width == 0 {
        return data.to_vec();
    }
    data.chunks(width).collect::<Vec<_>>().join(separator)
}

/// Generates a random multipart boundary.
///
/// The boundary is 30 bytes from the thread-local CSPRNG rendered as 60
/// lowercase hex characters.
#[must_use]
pub fn random_boundary() -> String {
    let mut buf = [0u8; BOUNDARY_BYTES];
    rand::thread_rng().fill(&mut buf);

    let mut boundary = String::with_capacity(BOUNDARY_BYTES * 2);
    for byte in buf {
        let _ = write!(boundary, "{byte:02x}");
    }
    boundary
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
    use proptest::prelude::*;

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse(" Base64 "), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::parse(""), TransferEncoding::SevenBit);
        assert!(TransferEncoding::Base64.is_transforming());
        assert!(!TransferEncoding::EightBit.is_transforming());
    }

    #[test]
    fn test_base64_encode_decode() {
        let data = b"Hello, World!";
        let encoded = encode_base64(data);
        assert_eq!(encoded, "SGVsbG8sIFdvcmxkIQ==");

        let decoded = decode_base64(encoded.as_bytes()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_base64_decode_wrapped() {
        let decoded = decode_base64(b"\r\n\tSGVsbG8s\r\nIFdvcmxkIQ==\r\n").unwrap();
        assert_eq!(decoded, b"Hello, World!");
    }

    #[test]
    fn test_base64_decode_invalid() {
        let err = decode_base64(b"not base64!").unwrap_err();
        assert!(err.is_transfer_decode());
    }

    #[test]
    fn test_base64_encoding_wraps_at_76() {
        let data = vec![0xABu8; 120];
        let encoded = encode_by_content_encoding(&data, TransferEncoding::Base64, LineEnding::Lf);
        let lines: Vec<&[u8]> = encoded.split(|&b| b == b'\n').collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), 76);
        assert_eq!(lines[1].len(), 76);
        assert_eq!(lines[2].len(), 8);
    }

    #[test]
    fn test_quoted_printable_encode() {
        let encoded = encode_quoted_printable(b"Hello, World!", LineEnding::Crlf);
        assert_eq!(encoded, b"Hello, World!");

        let encoded = encode_quoted_printable("Héllo = Wørld".as_bytes(), LineEnding::Crlf);
        assert_eq!(encoded, b"H=C3=A9llo =3D W=C3=B8rld");
    }

    #[test]
    fn test_quoted_printable_trailing_whitespace() {
        let encoded = encode_quoted_printable(b"end \r\nline\t\nlast ", LineEnding::Crlf);
        assert_eq!(encoded, b"end=20\r\nline=09\nlast=20");
    }

    #[test]
    fn test_quoted_printable_soft_breaks() {
        let data = vec![b'a'; 200];
        let encoded = encode_quoted_printable(&data, LineEnding::Crlf);
        for line in encoded.split(|&b| b == b'\n') {
            assert!(line.len() <= 77); // 76 plus the '\r'
        }
        assert_eq!(decode_quoted_printable(&encoded).unwrap(), data);
    }

    #[test]
    fn test_quoted_printable_escape_not_split() {
        let data = vec![0xFFu8; 40];
        let encoded = encode_quoted_printable(&data, LineEnding::Lf);
        for line in encoded.split(|&b| b == b'\n') {
            let body = line.strip_suffix(b"=").unwrap_or(line);
            assert_eq!(body.len() % 3, 0);
        }
    }

    #[test]
    fn test_quoted_printable_decode() {
        let decoded = decode_quoted_printable(b"Hello, World!").unwrap();
        assert_eq!(decoded, b"Hello, World!");

        let decoded = decode_quoted_printable(b"H=C3=A9llo").unwrap();
        assert_eq!(decoded, "Héllo".as_bytes());

        let decoded = decode_quoted_printable(b"lower=c3=a9").unwrap();
        assert_eq!(decoded, "loweré".as_bytes());
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        let decoded = decode_quoted_printable(b"Hello=\r\nWorld").unwrap();
        assert_eq!(decoded, b"HelloWorld");

        let decoded = decode_quoted_printable(b"Hello=  \nWorld\r\n").unwrap();
        assert_eq!(decoded, b"HelloWorld\r\n");
    }

    #[test]
    fn test_quoted_printable_decode_invalid() {
        assert!(decode_quoted_printable(b"bad=ZZ").is_err());
        assert!(decode_quoted_printable(b"short=A").is_err());
    }

    #[test]
    fn test_decode_passthrough() {
        let (data, transformed) =
            decode_by_content_encoding(b"plain", TransferEncoding::SevenBit).unwrap();
        assert!(!transformed);
        assert!(matches!(data, Cow::Borrowed(_)));
        assert_eq!(&*data, b"plain");
    }

    #[test]
    fn test_encode_passthrough() {
        let data = encode_by_content_encoding(b"raw", TransferEncoding::Binary, LineEnding::Crlf);
        assert_eq!(&*data, b"raw");
    }

    #[test]
    fn test_break_lines() {
        assert_eq!(break_lines(b"abcdefg", 3, b"\n"), b"abc\ndef\ng");
        assert_eq!(break_lines(b"abcdef", 3, b"\r\n"), b"abc\r\ndef");
        assert_eq!(break_lines(b"", 3, b"\n"), b"");
    }

    #[test]
    fn test_random_boundary() {
        let boundary = random_boundary();
        assert_eq!(boundary.len(), 60);
        assert!(
            boundary
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        );
        assert_ne!(boundary, random_boundary());
    }

    proptest! {
        #[test]
        fn prop_base64_round_trip(data in proptest::collection::vec(any::<u8>(), 0..600)) {
            for line_ending in [LineEnding::Crlf, LineEnding::Lf] {
                let encoded = encode_by_content_encoding(&data, TransferEncoding::Base64, line_ending);
                let (decoded, transformed) =
                    decode_by_content_encoding(&encoded, TransferEncoding::Base64).unwrap();
                prop_assert!(transformed);
                prop_assert_eq!(&*decoded, data.as_slice());
            }
        }

        #[test]
        fn prop_quoted_printable_round_trip(data in proptest::collection::vec(any::<u8>(), 0..600)) {
            for line_ending in [LineEnding::Crlf, LineEnding::Lf] {
                let encoded =
                    encode_by_content_encoding(&data, TransferEncoding::QuotedPrintable, line_ending);
                let (decoded, transformed) =
                    decode_by_content_encoding(&encoded, TransferEncoding::QuotedPrintable).unwrap();
                prop_assert!(transformed);
                prop_assert_eq!(&*decoded, data.as_slice());
            }
        }

        #[test]
        fn prop_quoted_printable_text_round_trip(text in "[ -~\t\r\n]{0,300}") {
            let encoded = encode_quoted_printable(text.as_bytes(), LineEnding::Crlf);
            let decoded = decode_quoted_printable(&encoded).unwrap();
            prop_assert_eq!(decoded, text.as_bytes());
        }
    }
}
