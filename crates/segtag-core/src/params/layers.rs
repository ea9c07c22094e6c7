//! # Weight Blocks
//!
//! Projection, fusion, recurrent and sparse blocks. Each block owns its
//! variables, knows its shapes, runs its own forward step on candle tensors
//! and reads/writes itself as a group of checkpoint sections.

use std::io::{BufRead, Write};

use candle_core::{DType, Module, Tensor, Var};
use candle_nn::ops::sigmoid;
use candle_nn::Linear;

use crate::checkpoint::{CheckpointReader, CheckpointWriter};
use crate::error::{Result, SegtagError};
use crate::params::{read_required_var, read_var, write_opt_var, write_var, ParamArena};

/// Nonlinearity applied after an affine map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Tanh,
    Identity,
}

impl Activation {
    fn apply(&self, xs: Tensor) -> Result<Tensor> {
        match self {
            Activation::Tanh => Ok(xs.tanh()?),
            Activation::Identity => Ok(xs),
        }
    }
}

/// `f(x Wᵀ + b)` over a `(tokens, in_dim)` matrix.
#[derive(Debug, Clone)]
pub struct Projection {
    pub weight: Var,
    pub bias: Option<Var>,
    pub activation: Activation,
}

impl Projection {
    pub fn allocate(
        arena: &mut ParamArena,
        name: &str,
        out_dim: usize,
        in_dim: usize,
        with_bias: bool,
        activation: Activation,
    ) -> Result<Self> {
        let weight = arena.xavier(&format!("{name}.W"), out_dim, in_dim)?;
        let bias = if with_bias {
            Some(arena.zeros(&format!("{name}.b"), out_dim)?)
        } else {
            None
        };
        Ok(Self {
            weight,
            bias,
            activation,
        })
    }

    pub fn in_dim(&self) -> usize {
        self.weight.dims()[1]
    }

    pub fn out_dim(&self) -> usize {
        self.weight.dims()[0]
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let linear = Linear::new(
            self.weight.as_tensor().clone(),
            self.bias.as_ref().map(|b| b.as_tensor().clone()),
        );
        self.activation.apply(linear.forward(xs)?)
    }

    pub fn vars(&self) -> Vec<(&'static str, &Var)> {
        let mut vars = vec![("W", &self.weight)];
        if let Some(bias) = &self.bias {
            vars.push(("b", bias));
        }
        vars
    }

    pub fn save<W: Write>(&self, w: &mut CheckpointWriter<W>, prefix: &str) -> Result<()> {
        write_var(w, &format!("{prefix}.W"), &self.weight)?;
        write_opt_var(w, &format!("{prefix}.b"), self.bias.as_ref())
    }

    pub fn save_absent<W: Write>(w: &mut CheckpointWriter<W>, prefix: &str) -> Result<()> {
        w.absent(&format!("{prefix}.W"))?;
        w.absent(&format!("{prefix}.b"))
    }

    pub fn load<R: BufRead>(
        r: &mut CheckpointReader<R>,
        arena: &mut ParamArena,
        prefix: &str,
        name: &str,
        activation: Activation,
    ) -> Result<Option<Self>> {
        let weight = read_var(r, arena, &format!("{prefix}.W"), &format!("{name}.W"), false)?;
        let bias = read_var(r, arena, &format!("{prefix}.b"), &format!("{name}.b"), true)?;
        Ok(weight.map(|weight| Self {
            weight,
            bias,
            activation,
        }))
    }
}

/// `tanh(x1 W1ᵀ + x2 W2ᵀ + b)`: merges the two recurrent directions.
#[derive(Debug, Clone)]
pub struct BiProjection {
    pub weight_left: Var,
    pub weight_right: Var,
    pub bias: Var,
}

impl BiProjection {
    pub fn allocate(
        arena: &mut ParamArena,
        name: &str,
        out_dim: usize,
        left_dim: usize,
        right_dim: usize,
    ) -> Result<Self> {
        Ok(Self {
            weight_left: arena.xavier(&format!("{name}.W1"), out_dim, left_dim)?,
            weight_right: arena.xavier(&format!("{name}.W2"), out_dim, right_dim)?,
            bias: arena.zeros(&format!("{name}.b"), out_dim)?,
        })
    }

    pub fn out_dim(&self) -> usize {
        self.bias.dims()[0]
    }

    pub fn forward(&self, left: &Tensor, right: &Tensor) -> Result<Tensor> {
        let merged = (left.matmul(&self.weight_left.t()?)? + right.matmul(&self.weight_right.t()?)?)?;
        Ok(merged.broadcast_add(&self.bias)?.tanh()?)
    }

    pub fn vars(&self) -> Vec<(&'static str, &Var)> {
        vec![
            ("W1", &self.weight_left),
            ("W2", &self.weight_right),
            ("b", &self.bias),
        ]
    }

    pub fn save<W: Write>(&self, w: &mut CheckpointWriter<W>, prefix: &str) -> Result<()> {
        write_var(w, &format!("{prefix}.W1"), &self.weight_left)?;
        write_var(w, &format!("{prefix}.W2"), &self.weight_right)?;
        write_var(w, &format!("{prefix}.b"), &self.bias)
    }

    pub fn save_absent<W: Write>(w: &mut CheckpointWriter<W>, prefix: &str) -> Result<()> {
        for suffix in ["W1", "W2", "b"] {
            w.absent(&format!("{prefix}.{suffix}"))?;
        }
        Ok(())
    }

    pub fn load<R: BufRead>(
        r: &mut CheckpointReader<R>,
        arena: &mut ParamArena,
        prefix: &str,
        name: &str,
    ) -> Result<Option<Self>> {
        let Some(weight_left) =
            read_var(r, arena, &format!("{prefix}.W1"), &format!("{name}.W1"), false)?
        else {
            r.matrix(&format!("{prefix}.W2"))?;
            r.matrix(&format!("{prefix}.b"))?;
            return Ok(None);
        };
        Ok(Some(Self {
            weight_left,
            weight_right: read_required_var(
                r,
                arena,
                &format!("{prefix}.W2"),
                &format!("{name}.W2"),
                false,
            )?,
            bias: read_required_var(r, arena, &format!("{prefix}.b"), &format!("{name}.b"), true)?,
        }))
    }
}

/// Scan direction of a recurrent encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LeftToRight,
    RightToLeft,
}

/// Single-layer LSTM weights: gates ordered input, forget, cell, output.
#[derive(Debug, Clone)]
pub struct RecurrentParams {
    /// `(4 * hidden, input)`
    pub weight_input: Var,
    /// `(4 * hidden, hidden)`
    pub weight_hidden: Var,
    /// `(4 * hidden,)`
    pub bias: Var,
}

impl RecurrentParams {
    pub fn allocate(
        arena: &mut ParamArena,
        name: &str,
        hidden: usize,
        input: usize,
    ) -> Result<Self> {
        let weight_input = arena.xavier(&format!("{name}.Wx"), 4 * hidden, input)?;
        let weight_hidden = arena.xavier(&format!("{name}.Wh"), 4 * hidden, hidden)?;
        // forget gate starts open
        let mut bias = vec![0f32; 4 * hidden];
        bias[hidden..2 * hidden].fill(1.0);
        let bias = Tensor::from_vec(bias, 4 * hidden, arena.device())?;
        let bias = arena.adopt(&format!("{name}.b"), &bias)?;
        Ok(Self {
            weight_input,
            weight_hidden,
            bias,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.weight_hidden.dims()[1]
    }

    pub fn input_size(&self) -> usize {
        self.weight_input.dims()[1]
    }

    /// Run over the rows of `xs` (`(tokens, input)`) and return one hidden
    /// state per row, `(tokens, hidden)`, aligned with the input positions.
    pub fn encode(&self, xs: &Tensor, direction: Direction) -> Result<Tensor> {
        let (len, _) = xs.dims2()?;
        let hidden = self.hidden_size();
        let device = xs.device();
        if len == 0 {
            return Ok(Tensor::zeros((0, hidden), DType::F32, device)?);
        }

        let input_gates = xs
            .matmul(&self.weight_input.t()?)?
            .broadcast_add(&self.bias)?;
        let weight_hidden = self.weight_hidden.t()?;
        let mut h = Tensor::zeros((1, hidden), DType::F32, device)?;
        let mut c = Tensor::zeros((1, hidden), DType::F32, device)?;

        let positions: Vec<usize> = match direction {
            Direction::LeftToRight => (0..len).collect(),
            Direction::RightToLeft => (0..len).rev().collect(),
        };
        let mut states = Vec::with_capacity(len);
        for pos in positions {
            let gates = (input_gates.narrow(0, pos, 1)? + h.matmul(&weight_hidden)?)?;
            let gates = gates.chunk(4, 1)?;
            let i = sigmoid(&gates[0])?;
            let f = sigmoid(&gates[1])?;
            let g = gates[2].tanh()?;
            let o = sigmoid(&gates[3])?;
            c = ((f * &c)? + (i * g)?)?;
            h = (o * c.tanh()?)?;
            states.push(h.clone());
        }
        if direction == Direction::RightToLeft {
            states.reverse();
        }
        Ok(Tensor::cat(&states, 0)?)
    }

    pub fn vars(&self) -> Vec<(&'static str, &Var)> {
        vec![
            ("Wx", &self.weight_input),
            ("Wh", &self.weight_hidden),
            ("b", &self.bias),
        ]
    }

    pub fn save<W: Write>(&self, w: &mut CheckpointWriter<W>, prefix: &str) -> Result<()> {
        write_var(w, &format!("{prefix}.Wx"), &self.weight_input)?;
        write_var(w, &format!("{prefix}.Wh"), &self.weight_hidden)?;
        write_var(w, &format!("{prefix}.b"), &self.bias)
    }

    pub fn save_absent<W: Write>(w: &mut CheckpointWriter<W>, prefix: &str) -> Result<()> {
        for suffix in ["Wx", "Wh", "b"] {
            w.absent(&format!("{prefix}.{suffix}"))?;
        }
        Ok(())
    }

    pub fn load<R: BufRead>(
        r: &mut CheckpointReader<R>,
        arena: &mut ParamArena,
        prefix: &str,
        name: &str,
    ) -> Result<Option<Self>> {
        let Some(weight_input) =
            read_var(r, arena, &format!("{prefix}.Wx"), &format!("{name}.Wx"), false)?
        else {
            r.matrix(&format!("{prefix}.Wh"))?;
            r.matrix(&format!("{prefix}.b"))?;
            return Ok(None);
        };
        Ok(Some(Self {
            weight_input,
            weight_hidden: read_required_var(
                r,
                arena,
                &format!("{prefix}.Wh"),
                &format!("{name}.Wh"),
                false,
            )?,
            bias: read_required_var(r, arena, &format!("{prefix}.b"), &format!("{name}.b"), true)?,
        }))
    }
}

/// Per-feature label weights: `(features, labels)` plus a label bias.
#[derive(Debug, Clone)]
pub struct SparseParams {
    pub weights: Var,
    pub bias: Var,
}

impl SparseParams {
    pub fn allocate(
        arena: &mut ParamArena,
        name: &str,
        features: usize,
        labels: usize,
    ) -> Result<Self> {
        Ok(Self {
            weights: arena.zeros(&format!("{name}.W"), (features, labels))?,
            bias: arena.zeros(&format!("{name}.b"), labels)?,
        })
    }

    pub fn feature_count(&self) -> usize {
        self.weights.dims()[0]
    }

    pub fn label_count(&self) -> usize {
        self.bias.dims()[0]
    }

    /// Sum of the weight rows of the active features plus the bias, `(labels,)`.
    pub fn score(&self, ids: &[u32]) -> Result<Tensor> {
        if ids.is_empty() {
            return Ok(self.bias.as_tensor().clone());
        }
        let ids = Tensor::new(ids, self.weights.device())?;
        let rows = self.weights.index_select(&ids, 0)?;
        Ok(rows.sum(0)?.add(&self.bias)?)
    }

    pub fn vars(&self) -> Vec<(&'static str, &Var)> {
        vec![("W", &self.weights), ("b", &self.bias)]
    }

    pub fn save<W: Write>(&self, w: &mut CheckpointWriter<W>, prefix: &str) -> Result<()> {
        write_var(w, &format!("{prefix}.W"), &self.weights)?;
        write_var(w, &format!("{prefix}.b"), &self.bias)
    }

    pub fn save_absent<W: Write>(w: &mut CheckpointWriter<W>, prefix: &str) -> Result<()> {
        w.absent(&format!("{prefix}.W"))?;
        w.absent(&format!("{prefix}.b"))
    }

    pub fn load<R: BufRead>(
        r: &mut CheckpointReader<R>,
        arena: &mut ParamArena,
        prefix: &str,
        name: &str,
    ) -> Result<Option<Self>> {
        let Some(weights) =
            read_var(r, arena, &format!("{prefix}.W"), &format!("{name}.W"), false)?
        else {
            r.matrix(&format!("{prefix}.b"))?;
            return Ok(None);
        };
        let bias = read_required_var(r, arena, &format!("{prefix}.b"), &format!("{name}.b"), true)?;
        if bias.dims()[0] != weights.dims()[1] {
            return Err(SegtagError::Checkpoint(format!(
                "{prefix}: bias width {} does not match {} labels",
                bias.dims()[0],
                weights.dims()[1]
            )));
        }
        Ok(Some(Self { weights, bias }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(t: &Tensor) -> Vec<Vec<f32>> {
        t.to_vec2::<f32>().unwrap()
    }

    #[test]
    fn test_projection_shapes() {
        let mut arena = ParamArena::new();
        let proj = Projection::allocate(&mut arena, "p", 3, 5, true, Activation::Tanh).unwrap();
        assert_eq!((proj.out_dim(), proj.in_dim()), (3, 5));

        let xs = Tensor::ones((2, 5), DType::F32, arena.device()).unwrap();
        let ys = proj.forward(&xs).unwrap();
        assert_eq!(ys.dims(), &[2, 3]);
        assert!(rows(&ys).iter().flatten().all(|v| v.abs() < 1.0));
    }

    #[test]
    fn test_linear_projection_without_bias() {
        let mut arena = ParamArena::new();
        let mut proj =
            Projection::allocate(&mut arena, "o", 2, 2, false, Activation::Identity).unwrap();
        proj.weight = arena
            .adopt(
                "o.W",
                &Tensor::new(&[[1f32, 2.0], [0.0, -1.0]], arena.device()).unwrap(),
            )
            .unwrap();
        let xs = Tensor::new(&[[1f32, 1.0]], arena.device()).unwrap();
        assert_eq!(rows(&proj.forward(&xs).unwrap()), vec![vec![3.0, -1.0]]);
        assert_eq!(proj.vars().len(), 1);
    }

    #[test]
    fn test_recurrent_output_aligned_with_input() {
        let mut arena = ParamArena::new();
        let rnn = RecurrentParams::allocate(&mut arena, "rnn", 3, 2).unwrap();
        let xs = Tensor::new(&[[0.5f32, -0.5], [1.0, 0.0], [0.0, 1.0]], arena.device()).unwrap();

        let left = rnn.encode(&xs, Direction::LeftToRight).unwrap();
        let right = rnn.encode(&xs, Direction::RightToLeft).unwrap();
        assert_eq!(left.dims(), &[3, 3]);
        assert_eq!(right.dims(), &[3, 3]);

        // the last right-to-left state has only seen the last token, like the
        // first left-to-right state of the reversed sequence
        let reversed = Tensor::new(&[[0.0f32, 1.0], [1.0, 0.0], [0.5, -0.5]], arena.device())
            .unwrap();
        let forward_on_reversed = rnn.encode(&reversed, Direction::LeftToRight).unwrap();
        let close = |a: &[f32], b: &[f32]| a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-6);
        assert!(close(&rows(&right)[2], &rows(&forward_on_reversed)[0]));
        assert!(close(&rows(&right)[0], &rows(&forward_on_reversed)[2]));
    }

    #[test]
    fn test_sparse_score_sums_rows() {
        let mut arena = ParamArena::new();
        let mut sparse = SparseParams::allocate(&mut arena, "sparse", 3, 2).unwrap();
        sparse.weights = arena
            .adopt(
                "sparse.W",
                &Tensor::new(&[[1f32, 0.0], [0.0, 2.0], [3.0, 3.0]], arena.device()).unwrap(),
            )
            .unwrap();
        let scores = sparse.score(&[0, 2]).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(scores, vec![4.0, 3.0]);
        let bias_only = sparse.score(&[]).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(bias_only, vec![0.0, 0.0]);
    }
}
