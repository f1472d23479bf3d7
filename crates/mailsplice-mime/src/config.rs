//! Decomposer and builder configuration.

/// Default limit on multipart nesting within one message.
pub const DEFAULT_MAX_PART_DEPTH: usize = 64;

/// Line terminator used for generated header lines and boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnding {
    /// `\r\n`, as used on the wire.
    #[default]
    Crlf,
    /// `\n`, as used for local storage.
    Lf,
}

impl LineEnding {
    /// Returns the terminator as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Crlf => "\r\n",
            Self::Lf => "\n",
        }
    }

    /// Returns the terminator as bytes.
    #[must_use]
    pub const fn as_bytes(self) -> &'static [u8] {
        self.as_str().as_bytes()
    }
}

/// Configuration shared by [`Decomposer`](crate::Decomposer) and
/// [`MessageBuilder`](crate::MessageBuilder).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Terminator for reconstructed header lines and multipart delimiters.
    pub line_ending: LineEnding,
    /// Deepest multipart nesting accepted while decomposing.
    pub max_part_depth: usize,
}

impl Config {
    /// Creates the default configuration: `\r\n` and a part depth of 64.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            line_ending: LineEnding::Crlf,
            max_part_depth: DEFAULT_MAX_PART_DEPTH,
        }
    }

    /// Creates a configuration builder.
    #[must_use]
    pub const fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Creates a new builder holding the defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    /// Sets the line terminator.
    #[must_use]
    pub const fn line_ending(mut self, line_ending: LineEnding) -> Self {
        self.config.line_ending = line_ending;
        self
    }

    /// Sets the multipart nesting limit.
    #[must_use]
    pub const fn max_part_depth(mut self, depth: usize) -> Self {
        self.config.max_part_depth = depth;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub const fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
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
    fn test_line_ending_str() {
        assert_eq!(LineEnding::Crlf.as_str(), "\r\n");
        assert_eq!(LineEnding::Lf.as_bytes(), b"\n");
        assert_eq!(LineEnding::default(), LineEnding::Crlf);
    }

    #[test]
    fn test_config_new() {
        let config = Config::new();
        assert_eq!(config.line_ending, LineEnding::Crlf);
        assert_eq!(config.max_part_depth, DEFAULT_MAX_PART_DEPTH);
        assert_eq!(Config::default(), config);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .line_ending(LineEnding::Lf)
            .max_part_depth(8)
            .build();

        assert_eq!(config.line_ending, LineEnding::Lf);
        assert_eq!(config.max_part_depth, 8);
    }
}
