//! # Embedding Tables

use std::io::{BufRead, Write};

use candle_core::{Tensor, Var};

use crate::checkpoint::{CheckpointReader, CheckpointWriter};
use crate::error::{Result, SegtagError};
use crate::params::{read_var, write_var, ParamArena};

/// Trainable `vocab x dim` embedding table.
#[derive(Debug, Clone)]
pub struct LookupTable {
    pub embeddings: Var,
}

impl LookupTable {
    /// Randomly initialised table, uniform in `±sqrt(3 / dim)`.
    pub fn random(arena: &mut ParamArena, name: &str, vocab: usize, dim: usize) -> Result<Self> {
        let bound = (3.0 / dim.max(1) as f32).sqrt();
        let embeddings = arena.uniform(name, (vocab, dim), bound)?;
        Ok(Self { embeddings })
    }

    /// Table with explicit rows, e.g. pretrained vectors.
    pub fn from_rows(arena: &mut ParamArena, name: &str, rows: &[Vec<f32>]) -> Result<Self> {
        let dim = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().position(|row| row.len() != dim) {
            return Err(SegtagError::Config(format!(
                "{name}: row {bad} has {} values, expected {dim}",
                rows[bad].len()
            )));
        }
        let data: Vec<f32> = rows.iter().flatten().copied().collect();
        let tensor = Tensor::from_vec(data, (rows.len(), dim), arena.device())?;
        let embeddings = arena.adopt(name, &tensor)?;
        Ok(Self { embeddings })
    }

    pub fn vocab_size(&self) -> usize {
        self.embeddings.dims()[0]
    }

    pub fn dim(&self) -> usize {
        self.embeddings.dims()[1]
    }

    pub fn is_empty(&self) -> bool {
        self.vocab_size() == 0
    }

    /// Rows for a rank-1 `u32` id tensor; returns `(ids, dim)`.
    pub fn lookup(&self, ids: &Tensor) -> Result<Tensor> {
        Ok(self.embeddings.index_select(ids, 0)?)
    }

    pub fn save<W: Write>(&self, w: &mut CheckpointWriter<W>, section: &str) -> Result<()> {
        write_var(w, section, &self.embeddings)
    }

    pub fn load<R: BufRead>(
        r: &mut CheckpointReader<R>,
        arena: &mut ParamArena,
        section: &str,
        name: &str,
    ) -> Result<Option<Self>> {
        Ok(read_var(r, arena, section, name, false)?.map(|embeddings| Self { embeddings }))
    }
}
