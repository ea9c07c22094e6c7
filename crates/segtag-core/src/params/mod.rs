//! Learnable parameter blocks and the store that owns them.

pub mod arena;
pub mod layers;
pub mod lookup;
pub mod store;

pub use arena::ParamArena;
pub use layers::{Activation, BiProjection, Direction, Projection, RecurrentParams, SparseParams};
pub use lookup::LookupTable;
pub use store::{DenseParams, ParameterStore};

use std::io::{BufRead, Write};

use candle_core::{Tensor, Var};

use crate::checkpoint::{CheckpointReader, CheckpointWriter};
use crate::error::{Result, SegtagError};

/// Write a rank-1 or rank-2 variable as a matrix section.
pub(crate) fn write_var<W: Write>(
    w: &mut CheckpointWriter<W>,
    section: &str,
    var: &Var,
) -> Result<()> {
    let (rows, cols) = match var.dims() {
        [n] => (1, *n),
        [r, c] => (*r, *c),
        dims => {
            return Err(SegtagError::Checkpoint(format!(
                "{section}: cannot store a tensor of shape {dims:?}"
            )));
        }
    };
    let data = var.flatten_all()?.to_vec1::<f32>()?;
    w.matrix(section, rows, cols, &data)
}

/// Write a variable section, or an absent marker.
pub(crate) fn write_opt_var<W: Write>(
    w: &mut CheckpointWriter<W>,
    section: &str,
    var: Option<&Var>,
) -> Result<()> {
    match var {
        Some(var) => write_var(w, section, var),
        None => w.absent(section),
    }
}

/// Read a matrix section into the arena. `vector` sections are stored as `1 x n`
/// and come back with shape `(n,)`.
pub(crate) fn read_var<R: BufRead>(
    r: &mut CheckpointReader<R>,
    arena: &mut ParamArena,
    section: &str,
    name: &str,
    vector: bool,
) -> Result<Option<Var>> {
    let Some(matrix) = r.matrix(section)? else {
        return Ok(None);
    };
    let tensor = if vector {
        if matrix.rows != 1 {
            return Err(SegtagError::Checkpoint(format!(
                "{section}: expected a single row, found {}",
                matrix.rows
            )));
        }
        Tensor::from_vec(matrix.data, matrix.cols, arena.device())?
    } else {
        Tensor::from_vec(matrix.data, (matrix.rows, matrix.cols), arena.device())?
    };
    arena.adopt(name, &tensor).map(Some)
}

/// Read a section that must be present.
pub(crate) fn read_required_var<R: BufRead>(
    r: &mut CheckpointReader<R>,
    arena: &mut ParamArena,
    section: &str,
    name: &str,
    vector: bool,
) -> Result<Var> {
    read_var(r, arena, section, name, vector)?
        .ok_or_else(|| SegtagError::Checkpoint(format!("required block {section} is absent")))
}
