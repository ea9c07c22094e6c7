//! # Model Options
//!
//! Externally supplied settings for a segmentation model. These are the
//! "must assign" values; everything else in [`HyperParameters`] is derived
//! from the parameter tables.
//!
//! [`HyperParameters`]: crate::hyper::HyperParameters

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegtagError};

/// Default cap on tokens per sentence.
pub const DEFAULT_MAX_SENTENCE_LENGTH: usize = 256;

/// Default cap on characters pooled per token.
pub const DEFAULT_MAX_CHAR_LENGTH: usize = 5;

/// Structural variant of the tagging model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelVariant {
    /// Word and type embeddings, window, projection, BiLSTM, CRF.
    Neural,
    /// [`ModelVariant::Neural`] plus max/min/avg pooled character embeddings.
    CharNeural,
    /// [`ModelVariant::CharNeural`] scores summed with sparse feature scores.
    CharSparse,
    /// Sparse indicator features straight into the CRF.
    Sparse,
}

impl ModelVariant {
    /// Whether the variant runs the dense embedding / recurrent pipeline.
    pub fn has_dense(&self) -> bool {
        !matches!(self, ModelVariant::Sparse)
    }

    /// Whether character pooling contributes to the fused token vector.
    pub fn has_chars(&self) -> bool {
        matches!(self, ModelVariant::CharNeural | ModelVariant::CharSparse)
    }

    /// Whether sparse feature scores contribute to the output.
    pub fn has_sparse(&self) -> bool {
        matches!(self, ModelVariant::CharSparse | ModelVariant::Sparse)
    }

    /// All variants in a stable order.
    pub fn all() -> &'static [ModelVariant] {
        &[
            ModelVariant::Neural,
            ModelVariant::CharNeural,
            ModelVariant::CharSparse,
            ModelVariant::Sparse,
        ]
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelVariant::Neural => write!(f, "neural"),
            ModelVariant::CharNeural => write!(f, "char-neural"),
            ModelVariant::CharSparse => write!(f, "char-sparse"),
            ModelVariant::Sparse => write!(f, "sparse"),
        }
    }
}

impl FromStr for ModelVariant {
    type Err = SegtagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "neural" => Ok(ModelVariant::Neural),
            "char-neural" => Ok(ModelVariant::CharNeural),
            "char-sparse" => Ok(ModelVariant::CharSparse),
            "sparse" => Ok(ModelVariant::Sparse),
            other => Err(SegtagError::Config(format!("unknown model variant {other:?}"))),
        }
    }
}

/// Options read from the command line or a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    /// Structural variant to build.
    pub variant: ModelVariant,
    /// Tokens of context on each side of the centre token.
    pub word_context: usize,
    /// Width of the feed-forward hidden layers.
    pub hidden_size: usize,
    /// Width of each directional recurrent state.
    pub rnn_hidden_size: usize,
    /// Dropout probability applied in training mode.
    pub dropout: f32,
    /// L2 regularisation weight.
    pub regularization: f64,
    /// AdaGrad step size.
    pub ada_alpha: f64,
    /// AdaGrad epsilon.
    pub ada_eps: f64,
    /// Token capacity of a sequence graph.
    pub max_sentence_length: usize,
    /// Characters pooled per token; longer lists are truncated.
    pub max_char_length: usize,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            variant: ModelVariant::CharNeural,
            word_context: 2,
            hidden_size: 200,
            rnn_hidden_size: 100,
            dropout: 0.25,
            regularization: 1e-8,
            ada_alpha: 0.01,
            ada_eps: 1e-6,
            max_sentence_length: DEFAULT_MAX_SENTENCE_LENGTH,
            max_char_length: DEFAULT_MAX_CHAR_LENGTH,
        }
    }
}

impl ModelOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read options from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let options: ModelOptions = serde_json::from_str(&text)
            .map_err(|e| SegtagError::Config(format!("failed to parse options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Reject settings no model can be built from.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(SegtagError::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.variant.has_dense() && (self.hidden_size == 0 || self.rnn_hidden_size == 0) {
            return Err(SegtagError::Config(
                "hidden sizes must be positive for dense variants".into(),
            ));
        }
        if self.max_sentence_length == 0 {
            return Err(SegtagError::Config(
                "max_sentence_length must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Set the model variant.
    pub fn with_variant(mut self, variant: ModelVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Set the context window (tokens on each side).
    pub fn with_word_context(mut self, context: usize) -> Self {
        self.word_context = context;
        self
    }

    /// Set the feed-forward and recurrent hidden sizes.
    pub fn with_hidden_sizes(mut self, hidden: usize, rnn_hidden: usize) -> Self {
        self.hidden_size = hidden;
        self.rnn_hidden_size = rnn_hidden;
        self
    }

    /// Set the dropout probability.
    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout.clamp(0.0, 0.99);
        self
    }

    /// Set the graph capacity.
    pub fn with_capacity(mut self, max_sentence_length: usize, max_char_length: usize) -> Self {
        self.max_sentence_length = max_sentence_length;
        self.max_char_length = max_char_length;
        self
    }
}
