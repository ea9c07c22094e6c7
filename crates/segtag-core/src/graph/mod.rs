//! # Sequence Graph
//!
//! Builds the per-sentence computation that turns [`FeatureRecord`]s into a
//! `(tokens, labels)` score matrix for the CRF layer. A graph borrows its
//! weights from a [`ParameterStore`], checks them against derived
//! [`HyperParameters`] once in [`SequenceGraph::initial`], and reuses its
//! [`TokenBuffers`] for every sentence that fits the configured caps.

pub mod buffers;
pub mod dense;
pub mod feature;
pub mod pooling;
pub mod sparse;

pub use buffers::{GraphCapacity, TokenBuffers, VocabSizes};
pub use dense::DenseEncoder;
pub use feature::{FeatureRecord, RawFeature, RawSentence};
pub use pooling::Pooling;

use candle_core::{DType, Device, Tensor};
use tracing::debug;

use crate::error::{Result, SegtagError};
use crate::hyper::HyperParameters;
use crate::params::{LookupTable, ParameterStore, SparseParams};

/// Whether the graph runs for training (dropout on) or decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Decode,
}

/// Sentence-scoped graph over a parameter store.
pub struct SequenceGraph<'a> {
    dense: Option<DenseEncoder<'a>>,
    sparse: Option<&'a SparseParams>,
    label_count: usize,
    buffers: TokenBuffers,
    device: Device,
}

fn mismatch(what: &str, expected: usize, found: usize) -> SegtagError {
    SegtagError::Config(format!(
        "{what} is {found} in the parameter store but {expected} in the hyperparameters"
    ))
}

impl<'a> SequenceGraph<'a> {
    /// Bind the store's blocks and allocate token buffers for `capacity`.
    pub fn initial(
        params: &'a ParameterStore,
        hyper: &HyperParameters,
        capacity: GraphCapacity,
    ) -> Result<Self> {
        hyper.ensure_derived()?;
        let variant = params.variant;
        let loss = params.loss.as_ref().ok_or(SegtagError::Unallocated("crf"))?;
        if loss.label_count != hyper.label_size {
            return Err(mismatch("label count", hyper.label_size, loss.label_count));
        }

        let dense = if variant.has_dense() {
            let words = params.words.as_ref().ok_or(SegtagError::Unallocated("words"))?;
            let blocks = params.dense.as_ref().ok_or(SegtagError::Unallocated("dense"))?;
            let chars = if variant.has_chars() {
                Some(params.chars.as_ref().ok_or(SegtagError::Unallocated("chars"))?)
            } else {
                None
            };
            let encoder = DenseEncoder {
                words,
                types: &params.types,
                chars,
                params: blocks,
                word_context: hyper.word_context,
                dropout: hyper.dropout,
            };
            if encoder.unit_size() != hyper.unit_size {
                return Err(mismatch("fused token width", hyper.unit_size, encoder.unit_size()));
            }
            let input = blocks.input_projection.in_dim();
            if input != hyper.input_size {
                return Err(mismatch("window width", hyper.input_size, input));
            }
            let output = blocks.output_layer.out_dim();
            if output != hyper.label_size {
                return Err(mismatch("output width", hyper.label_size, output));
            }
            Some(encoder)
        } else {
            None
        };

        let sparse = if variant.has_sparse() {
            let sparse = params.sparse.as_ref().ok_or(SegtagError::Unallocated("sparse"))?;
            if sparse.label_count() != hyper.label_size {
                return Err(mismatch("sparse label count", hyper.label_size, sparse.label_count()));
            }
            Some(sparse)
        } else {
            None
        };

        let vocab = VocabSizes {
            words: dense.map_or(0, |d| d.words.vocab_size()),
            types: dense.map_or_else(Vec::new, |d| {
                d.types.iter().map(LookupTable::vocab_size).collect()
            }),
            chars: dense.and_then(|d| d.chars).map_or(0, LookupTable::vocab_size),
            sparse: sparse.map_or(0, SparseParams::feature_count),
            has_dense: dense.is_some(),
            has_chars: dense.and_then(|d| d.chars).is_some(),
            has_sparse: sparse.is_some(),
        };
        debug!(
            variant = %variant,
            max_sentence_length = capacity.max_sentence_length,
            max_char_length = capacity.max_char_length,
            "sequence graph initialised"
        );
        Ok(Self {
            dense,
            sparse,
            label_count: hyper.label_size,
            buffers: TokenBuffers::new(capacity, vocab),
            device: loss.transitions.device().clone(),
        })
    }

    pub fn capacity(&self) -> GraphCapacity {
        self.buffers.capacity()
    }

    /// Change the token and character caps.
    pub fn resize(&mut self, capacity: GraphCapacity) {
        self.buffers.resize(capacity);
    }

    /// Clear the ids of the previous sentence.
    pub fn reset(&mut self) {
        self.buffers.reset();
    }

    pub fn buffers(&self) -> &TokenBuffers {
        &self.buffers
    }

    pub fn label_count(&self) -> usize {
        self.label_count
    }

    /// Score every token of a sentence. An empty sentence yields a `(0, labels)`
    /// matrix; a sentence longer than the capacity is rejected.
    pub fn forward(&mut self, features: &[FeatureRecord], phase: Phase) -> Result<Tensor> {
        self.buffers.fill(features)?;
        if self.buffers.is_empty() {
            return Ok(Tensor::zeros((0, self.label_count), DType::F32, &self.device)?);
        }

        let dense = match &self.dense {
            Some(encoder) => Some(encoder.forward(&self.buffers, phase)?),
            None => None,
        };
        let sparse = match self.sparse {
            Some(params) => Some(sparse::sparse_scores(params, &self.buffers)?),
            None => None,
        };
        match (dense, sparse) {
            (Some(dense), Some(sparse)) => Ok((dense + sparse)?),
            (Some(scores), None) | (None, Some(scores)) => Ok(scores),
            (None, None) => Err(SegtagError::Unallocated("scoring blocks")),
        }
    }
}
