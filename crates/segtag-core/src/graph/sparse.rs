//! Sparse scoring: one weight row per active feature, summed with the bias.

use candle_core::Tensor;

use crate::error::Result;
use crate::graph::buffers::TokenBuffers;
use crate::params::SparseParams;

/// `(tokens, labels)` scores straight from the sparse table.
pub fn sparse_scores(params: &SparseParams, buffers: &TokenBuffers) -> Result<Tensor> {
    let rows = (0..buffers.len())
        .map(|i| params.score(buffers.sparse(i)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::stack(&rows, 0)?)
}
