//! # Dense Pipeline
//!
//! Embedding lookup, character pooling, token fusion, windowing, the window
//! projection, the bidirectional recurrent encoder and the output layers.

use candle_core::{DType, Tensor};

use crate::error::Result;
use crate::graph::buffers::TokenBuffers;
use crate::graph::pooling::pool_chars;
use crate::graph::Phase;
use crate::params::{DenseParams, Direction, LookupTable};

/// Dropout in training, identity when decoding.
fn dropout(xs: Tensor, p: f32, phase: Phase) -> Result<Tensor> {
    match phase {
        Phase::Train if p > 0.0 => Ok(candle_nn::ops::dropout(&xs, p)?),
        _ => Ok(xs),
    }
}

/// Dense blocks of one store bound to the widths they were derived with.
#[derive(Debug, Clone, Copy)]
pub struct DenseEncoder<'a> {
    pub words: &'a LookupTable,
    pub types: &'a [LookupTable],
    /// Pooled only by character-aware variants.
    pub chars: Option<&'a LookupTable>,
    pub params: &'a DenseParams,
    pub word_context: usize,
    pub dropout: f32,
}

impl DenseEncoder<'_> {
    /// Width of one fused token vector.
    pub fn unit_size(&self) -> usize {
        let types: usize = self.types.iter().map(LookupTable::dim).sum();
        let chars = self.chars.map_or(0, |c| 3 * c.dim());
        self.words.dim() + types + chars
    }

    /// Fused `(tokens, unit)` representation: word embedding, every type
    /// embedding (zeros where the token lacks the type) and the pooled
    /// character vector.
    pub fn token_vectors(&self, buffers: &TokenBuffers) -> Result<Tensor> {
        let n = buffers.len();
        let device = self.words.embeddings.device();

        let word_ids = Tensor::new(buffers.words(), device)?;
        let mut parts = vec![self.words.lookup(&word_ids)?];

        for (k, table) in self.types.iter().enumerate() {
            let (ids, mask) = buffers.type_column(k);
            let ids = Tensor::new(ids.as_slice(), device)?;
            let mask = Tensor::from_vec(mask, (n, 1), device)?;
            parts.push(table.lookup(&ids)?.broadcast_mul(&mask)?);
        }

        if let Some(chars) = self.chars {
            let dim = chars.dim();
            let pooled = (0..n)
                .map(|i| {
                    let ids = buffers.chars(i);
                    let embeddings = if ids.is_empty() {
                        Tensor::zeros((0, dim), DType::F32, device)?
                    } else {
                        chars.lookup(&Tensor::new(ids, device)?)?
                    };
                    pool_chars(&embeddings, dim, device)
                })
                .collect::<Result<Vec<_>>>()?;
            parts.push(Tensor::stack(&pooled, 0)?);
        }

        Ok(Tensor::cat(&parts, 1)?)
    }

    /// Concatenate the `2c + 1` fused vectors centred on every position;
    /// positions outside the sentence contribute zeros.
    pub fn window(&self, fused: &Tensor) -> Result<Tensor> {
        let c = self.word_context;
        if c == 0 {
            return Ok(fused.clone());
        }
        let (n, unit) = fused.dims2()?;
        let pad = Tensor::zeros((c, unit), DType::F32, fused.device())?;
        let padded = Tensor::cat(&[&pad, fused, &pad], 0)?;
        let columns = (0..2 * c + 1)
            .map(|offset| padded.narrow(0, offset, n))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Tensor::cat(&columns, 1)?)
    }

    /// `(tokens, labels)` scores for a filled, non-empty buffer.
    pub fn forward(&self, buffers: &TokenBuffers, phase: Phase) -> Result<Tensor> {
        let fused = dropout(self.token_vectors(buffers)?, self.dropout, phase)?;
        let windowed = self.window(&fused)?;

        let hidden = self.params.input_projection.forward(&windowed)?;
        let hidden = dropout(hidden, self.dropout, phase)?;

        let left = self.params.left_rnn.encode(&hidden, Direction::LeftToRight)?;
        let left = dropout(left, self.dropout, phase)?;
        let right = self.params.right_rnn.encode(&hidden, Direction::RightToLeft)?;
        let right = dropout(right, self.dropout, phase)?;

        let merged = self.params.fusion_projection.forward(&left, &right)?;
        let merged = dropout(merged, self.dropout, phase)?;
        let top = self.params.hidden_projection.forward(&merged)?;
        self.params.output_layer.forward(&top)
    }
}
