//! Error types for MIME operations.

use std::io;

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Header block could not be read.
    #[error(transparent)]
    Protocol(#[from] mailsplice_textproto::Error),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Invalid transfer encoding payload.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Invalid content type.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// Invalid multipart structure.
    #[error("Invalid multipart structure: {0}")]
    InvalidMultipart(String),

    /// Multipart parts nested deeper than the configured limit.
    #[error("Multipart nesting exceeds depth {depth}")]
    NestingTooDeep {
        /// The configured limit.
        depth: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns true if this error comes from a malformed header line.
    #[must_use]
    pub const fn is_malformed_header(&self) -> bool {
        matches!(
            self,
            Self::Protocol(mailsplice_textproto::Error::MalformedHeader { .. })
        )
    }

    /// Returns true if this error comes from an invalid transfer encoding.
    #[must_use]
    pub const fn is_transfer_decode(&self) -> bool {
        matches!(self, Self::Base64Decode(_) | Self::InvalidEncoding(_))
    }
}
