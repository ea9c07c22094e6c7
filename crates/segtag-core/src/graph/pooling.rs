//! Character pooling: reduces a token's character embeddings to one vector.

use candle_core::{DType, Device, Tensor};

use crate::error::Result;

/// Elementwise reduction over the character axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pooling {
    Max,
    Min,
    Avg,
}

impl Pooling {
    /// Reductions concatenated into a token's character sub-vector, in order.
    pub const ALL: [Pooling; 3] = [Pooling::Max, Pooling::Min, Pooling::Avg];

    /// Reduce `(chars, dim)` to `(dim,)`.
    pub fn apply(&self, xs: &Tensor) -> Result<Tensor> {
        let pooled = match self {
            Pooling::Max => xs.max(0)?,
            Pooling::Min => xs.min(0)?,
            Pooling::Avg => xs.mean(0)?,
        };
        Ok(pooled)
    }
}

/// Max, min and average pooling of `(chars, dim)` concatenated to `(3 * dim,)`.
/// A token without characters pools to zeros.
pub fn pool_chars(embeddings: &Tensor, dim: usize, device: &Device) -> Result<Tensor> {
    if embeddings.dim(0)? == 0 {
        return Ok(Tensor::zeros(Pooling::ALL.len() * dim, DType::F32, device)?);
    }
    let pooled = Pooling::ALL
        .iter()
        .map(|pooling| pooling.apply(embeddings))
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::cat(&pooled, 0)?)
}
