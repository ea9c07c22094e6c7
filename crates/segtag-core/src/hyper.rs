//! # Hyperparameters
//!
//! The required scalars copied from [`ModelOptions`] plus the widths derived
//! from the parameter tables. Derived widths are only meaningful after
//! [`HyperParameters::derive_from`] ran; consumers call
//! [`HyperParameters::ensure_derived`] before building anything from them.

use std::io::{BufRead, Write};

use tracing::debug;

use crate::checkpoint::{CheckpointReader, CheckpointWriter};
use crate::config::ModelOptions;
use crate::error::{Result, SegtagError};

/// Magic word of a hyperparameter stream.
pub const HYPER_KIND: &str = "hyperparameters";

/// Current hyperparameter stream version.
pub const HYPER_VERSION: u32 = 1;

/// Number of pooled character vectors (max, min, avg) in a fused token.
pub const CHAR_POOLINGS: usize = 3;

/// Table shapes a [`ParameterStore`](crate::params::ParameterStore) reports for derivation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterShapes {
    /// Width of the word embedding table.
    pub word_dim: usize,
    /// Width of the character embedding table, 0 without one.
    pub char_dim: usize,
    /// Width of each type embedding table, in slot order.
    pub type_dims: Vec<usize>,
    /// Number of entries in the label alphabet.
    pub label_count: usize,
    /// Whether pooled characters are part of the fused token vector.
    pub pool_chars: bool,
}

/// Required and derived model dimensions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HyperParameters {
    // required
    /// Tokens of context on each side of the centre token.
    pub word_context: usize,
    /// Width of the window projection and the hidden projection.
    pub hidden_size: usize,
    /// Width of each directional recurrent state.
    pub rnn_hidden_size: usize,
    /// Dropout probability in training mode.
    pub dropout: f32,
    /// L2 regularisation weight.
    pub regularization: f64,
    /// AdaGrad step size.
    pub ada_alpha: f64,
    /// AdaGrad epsilon.
    pub ada_eps: f64,

    // derived
    /// Tokens in one window, `2 * word_context + 1`.
    pub word_window: usize,
    /// Word embedding width.
    pub word_dim: usize,
    /// Type embedding widths, in slot order.
    pub type_dims: Vec<usize>,
    /// Character embedding width.
    pub char_dim: usize,
    /// Width of one fused token vector.
    pub unit_size: usize,
    /// Width of a windowed input, `word_window * unit_size`.
    pub input_size: usize,
    /// Number of labels scored per token.
    pub label_size: usize,

    derived: bool,
}

impl HyperParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the externally supplied scalars. Derived fields become invalid.
    pub fn set_required(&mut self, options: &ModelOptions) {
        self.word_context = options.word_context;
        self.hidden_size = options.hidden_size;
        self.rnn_hidden_size = options.rnn_hidden_size;
        self.dropout = options.dropout;
        self.regularization = options.regularization;
        self.ada_alpha = options.ada_alpha;
        self.ada_eps = options.ada_eps;
        self.derived = false;
    }

    /// Build from options in one step.
    pub fn from_options(options: &ModelOptions) -> Self {
        let mut hyper = Self::new();
        hyper.set_required(options);
        hyper
    }

    /// Compute every derived width from the table shapes and mark the record valid.
    pub fn derive_from(&mut self, shapes: &ParameterShapes) {
        self.word_window = 2 * self.word_context + 1;
        self.word_dim = shapes.word_dim;
        self.char_dim = shapes.char_dim;
        self.type_dims = shapes.type_dims.clone();
        self.unit_size = self.word_dim + self.type_dims.iter().sum::<usize>();
        if shapes.pool_chars {
            self.unit_size += CHAR_POOLINGS * self.char_dim;
        }
        self.input_size = self.word_window * self.unit_size;
        self.label_size = shapes.label_count;
        self.derived = true;

        debug!(
            unit_size = self.unit_size,
            input_size = self.input_size,
            label_size = self.label_size,
            "derived hyperparameters"
        );
    }

    /// Forget the derived fields.
    pub fn clear(&mut self) {
        self.derived = false;
    }

    pub fn is_valid(&self) -> bool {
        self.derived
    }

    /// Fail unless the derived fields are usable.
    pub fn ensure_derived(&self) -> Result<()> {
        if self.derived {
            Ok(())
        } else {
            Err(SegtagError::NotDerived)
        }
    }

    /// Write every field in fixed order.
    pub fn save<W: Write>(&self, out: W) -> Result<W> {
        let mut w = CheckpointWriter::new(out);
        w.header(HYPER_KIND, HYPER_VERSION)?;
        w.scalar("word-context", self.word_context)?;
        w.scalar("hidden-size", self.hidden_size)?;
        w.scalar("rnn-hidden-size", self.rnn_hidden_size)?;
        w.scalar("dropout", self.dropout)?;
        w.scalar("regularization", self.regularization)?;
        w.scalar("ada-alpha", self.ada_alpha)?;
        w.scalar("ada-eps", self.ada_eps)?;
        w.scalar("word-window", self.word_window)?;
        w.scalar("word-dim", self.word_dim)?;
        w.list("type-dims", &self.type_dims)?;
        w.scalar("char-dim", self.char_dim)?;
        w.scalar("unit-size", self.unit_size)?;
        w.scalar("input-size", self.input_size)?;
        w.scalar("label-size", self.label_size)?;
        w.finish()
    }

    /// Read a stream written by [`HyperParameters::save`]. The result is valid.
    pub fn load<R: BufRead>(input: R) -> Result<Self> {
        let mut r = CheckpointReader::new(input);
        r.header(HYPER_KIND, HYPER_VERSION)?;
        Ok(Self {
            word_context: r.scalar("word-context")?,
            hidden_size: r.scalar("hidden-size")?,
            rnn_hidden_size: r.scalar("rnn-hidden-size")?,
            dropout: r.scalar("dropout")?,
            regularization: r.scalar("regularization")?,
            ada_alpha: r.scalar("ada-alpha")?,
            ada_eps: r.scalar("ada-eps")?,
            word_window: r.scalar("word-window")?,
            word_dim: r.scalar("word-dim")?,
            type_dims: r.list("type-dims")?,
            char_dim: r.scalar("char-dim")?,
            unit_size: r.scalar("unit-size")?,
            input_size: r.scalar("input-size")?,
            label_size: r.scalar("label-size")?,
            derived: true,
        })
    }
}
