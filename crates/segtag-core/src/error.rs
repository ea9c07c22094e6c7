use thiserror::Error;

/// Errors that can occur while building, running or persisting a segtag model.
#[derive(Debug, Error)]
pub enum SegtagError {
    /// A vocabulary or embedding table that must be loaded before `initial` is empty.
    #[error("missing vocabulary: {table} must be populated before initialisation")]
    MissingVocabulary {
        /// Name of the empty table.
        table: String,
    },

    /// Derived hyperparameters were used before the parameter store derived them.
    #[error("hyperparameters have not been derived from a parameter store")]
    NotDerived,

    /// A weight block was requested before the parameter store allocated it.
    #[error("parameter block {0} has not been allocated")]
    Unallocated(&'static str),

    /// The sentence does not fit in the graph's pre-allocated token buffers.
    #[error("sentence of {len} tokens exceeds the graph capacity of {max}")]
    SentenceTooLong {
        /// Number of tokens in the rejected sentence.
        len: usize,
        /// Configured maximum sentence length.
        max: usize,
    },

    /// A feature id does not address a row of its table.
    #[error("id {id} is out of range for {table} (size {size})")]
    IdOutOfRange {
        /// Name of the table that was indexed.
        table: String,
        /// The offending id.
        id: u32,
        /// Number of rows in the table.
        size: usize,
    },

    /// A string has no id in its alphabet and the alphabet has no unknown entry.
    #[error("unknown key {key:?} in {table}")]
    UnknownKey {
        /// Name of the alphabet.
        table: String,
        /// The string that could not be mapped.
        key: String,
    },

    /// Gold labels do not line up with the score matrix.
    #[error("invalid labels: {0}")]
    InvalidLabels(String),

    /// A checkpoint stream is malformed.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// A checkpoint section appeared where another one was expected.
    #[error("checkpoint section mismatch: expected {expected:?}, found {found:?}")]
    CheckpointMismatch {
        /// Section the reader expected next.
        expected: String,
        /// Section header actually present in the stream.
        found: String,
    },

    /// Invalid model options.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle tensor engine error.
    #[error("tensor engine error: {0}")]
    Candle(String),
}

impl From<candle_core::Error> for SegtagError {
    fn from(err: candle_core::Error) -> Self {
        SegtagError::Candle(err.to_string())
    }
}

/// Result type alias for segtag operations.
pub type Result<T> = std::result::Result<T, SegtagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = SegtagError::NotDerived;
        assert_eq!(
            err.to_string(),
            "hyperparameters have not been derived from a parameter store"
        );

        let err = SegtagError::SentenceTooLong { len: 300, max: 256 };
        assert!(err.to_string().contains("300"));
        assert!(err.to_string().contains("256"));

        let err = SegtagError::MissingVocabulary {
            table: "word table".into(),
        };
        assert!(err.to_string().contains("word table"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SegtagError>();
    }
}
