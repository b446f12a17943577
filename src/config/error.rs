use anyerror::AnyError;

/// Error variants related to configuration.
#[derive(Debug, thiserror::Error)]
#[derive(PartialEq, Eq)]
pub enum ConfigError {
    /// Failed to parse configuration from command-line arguments.
    #[error("ParseError: {source} while parsing ({args:?})")]
    ParseError {
        /// The underlying parse error.
        source: AnyError,
        /// The arguments that failed to parse.
        args: Vec<String>,
    },

    /// The renewal interval is too small to derive a usable lease duration.
    #[error("renewal_interval({renewal_interval} ms) must be >= {min} ms")]
    RenewalIntervalTooSmall {
        /// The rejected interval, in milliseconds.
        renewal_interval: u64,
        /// The minimum accepted interval, in milliseconds.
        min: u64,
    },

    /// Invalid informational-log level string.
    #[error("log level string is invalid: '{invalid}' expect: 'log|debug'")]
    InvalidLogLevel {
        /// The invalid level string provided.
        invalid: String,
    },
}
