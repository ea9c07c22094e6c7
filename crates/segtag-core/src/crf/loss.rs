//! # CRF Maximum-Likelihood Loss
//!
//! Negative log-likelihood of a gold label path under emission scores and a
//! learned transition matrix, Viterbi decoding, and posterior marginals.

use std::io::{BufRead, Write};

use candle_core::{DType, Tensor, Var};
use tracing::debug;

use crate::checkpoint::{CheckpointReader, CheckpointWriter};
use crate::crf::labels::TransitionMask;
use crate::crf::viterbi::ViterbiDecoder;
use crate::error::{Result, SegtagError};
use crate::params::{read_var, write_opt_var, ParamArena};

/// Default probability floor for marginals.
pub const DEFAULT_EPS: f64 = 1e-12;

/// Linear-chain CRF output layer.
#[derive(Debug, Clone)]
pub struct CrfLoss {
    /// `(labels, labels)`, indexed `[from][to]`.
    pub transitions: Var,
    pub label_count: usize,
    /// Score of each label at the first position.
    pub buffer: Vec<f32>,
    /// Floor applied to marginal probabilities.
    pub eps: f64,
}

/// `log Σ exp(xs)` along `dim`, with `dim` removed.
fn log_sum_exp(xs: &Tensor, dim: usize) -> candle_core::Result<Tensor> {
    let max = xs.max_keepdim(dim)?;
    let sum = xs.broadcast_sub(&max)?.exp()?.sum_keepdim(dim)?.log()?;
    (sum + max)?.squeeze(dim)
}

impl CrfLoss {
    /// Allocate a zero transition matrix for `label_count` labels.
    pub fn initial(arena: &mut ParamArena, label_count: usize) -> Result<Self> {
        let transitions = arena.zeros("crf.T", (label_count, label_count))?;
        Ok(Self {
            transitions,
            label_count,
            buffer: vec![0.0; label_count],
            eps: DEFAULT_EPS,
        })
    }

    fn check_scores(&self, scores: &Tensor) -> Result<usize> {
        let (len, labels) = scores.dims2()?;
        if labels != self.label_count {
            return Err(SegtagError::InvalidLabels(format!(
                "score matrix has {labels} columns, CRF has {} labels",
                self.label_count
            )));
        }
        Ok(len)
    }

    /// Negative log-likelihood of `gold` given `(tokens, labels)` scores, as a
    /// scalar tensor connected to the scores and the transition matrix.
    pub fn loss(&self, scores: &Tensor, gold: &[usize]) -> Result<Tensor> {
        let len = self.check_scores(scores)?;
        let device = scores.device();
        if gold.len() != len {
            return Err(SegtagError::InvalidLabels(format!(
                "{} gold labels for {len} tokens",
                gold.len()
            )));
        }
        if let Some(&bad) = gold.iter().find(|&&y| y >= self.label_count) {
            return Err(SegtagError::InvalidLabels(format!(
                "gold label {bad} outside {} labels",
                self.label_count
            )));
        }
        if len == 0 {
            return Ok(Tensor::zeros((), DType::F32, device)?);
        }

        let labels = self.label_count;
        let transitions = self.transitions.as_tensor();
        let start = Tensor::from_slice(&self.buffer, labels, device)?;

        // log partition by the forward algorithm
        let mut alpha = (scores.get(0)? + &start)?;
        for t in 1..len {
            let expanded = alpha.unsqueeze(1)?.broadcast_add(transitions)?;
            alpha = (log_sum_exp(&expanded, 0)? + scores.get(t)?)?;
        }
        let log_z = log_sum_exp(&alpha, 0)?;

        // gold path score
        let emit_ids: Vec<u32> = gold
            .iter()
            .enumerate()
            .map(|(t, &y)| (t * labels + y) as u32)
            .collect();
        let emit_ids = Tensor::new(emit_ids.as_slice(), device)?;
        let mut gold_score = scores.flatten_all()?.index_select(&emit_ids, 0)?.sum_all()?;
        if len > 1 {
            let trans_ids: Vec<u32> = gold
                .windows(2)
                .map(|pair| (pair[0] * labels + pair[1]) as u32)
                .collect();
            let trans_ids = Tensor::new(trans_ids.as_slice(), device)?;
            let trans_score = transitions
                .flatten_all()?
                .index_select(&trans_ids, 0)?
                .sum_all()?;
            gold_score = (gold_score + trans_score)?;
        }
        let gold_score = gold_score.affine(1.0, self.buffer[gold[0]] as f64)?;

        Ok((log_z - gold_score)?)
    }

    /// Transition matrix as nested rows.
    pub fn transition_rows(&self) -> Result<Vec<Vec<f32>>> {
        Ok(self.transitions.to_vec2::<f32>()?)
    }

    /// Highest-scoring label path. With a mask, forbidden transitions and
    /// boundary labels are excluded.
    pub fn decode(&self, scores: &Tensor, mask: Option<&TransitionMask>) -> Result<Vec<usize>> {
        let len = self.check_scores(scores)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        let emissions = scores.to_vec2::<f32>()?;
        let transitions = self.transition_rows()?;
        let decoder = ViterbiDecoder::new(self.label_count);
        match mask {
            Some(mask) => decoder.decode_constrained(&emissions, &transitions, &self.buffer, mask),
            None => decoder.decode(&emissions, &transitions, &self.buffer),
        }
    }

    /// Posterior probability of every label at every position (forward-backward),
    /// floored at `eps`.
    pub fn marginals(&self, scores: &Tensor) -> Result<Vec<Vec<f32>>> {
        let len = self.check_scores(scores)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        let emissions = scores.to_vec2::<f32>()?;
        let trans = self.transition_rows()?;
        let labels = self.label_count;

        let lse = |values: &mut dyn Iterator<Item = f32>| -> f32 {
            let values: Vec<f32> = values.collect();
            let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            if max == f32::NEG_INFINITY {
                return max;
            }
            max + values.iter().map(|v| (v - max).exp()).sum::<f32>().ln()
        };

        let mut alpha = vec![vec![0f32; labels]; len];
        let mut beta = vec![vec![0f32; labels]; len];
        for y in 0..labels {
            alpha[0][y] = self.buffer[y] + emissions[0][y];
        }
        for t in 1..len {
            let prev = &alpha[t - 1];
            let row: Vec<f32> = (0..labels)
                .map(|y| lse(&mut (0..labels).map(|p| prev[p] + trans[p][y])) + emissions[t][y])
                .collect();
            alpha[t] = row;
        }
        for t in (0..len - 1).rev() {
            let next = &beta[t + 1];
            let row: Vec<f32> = (0..labels)
                .map(|y| lse(&mut (0..labels).map(|n| trans[y][n] + emissions[t + 1][n] + next[n])))
                .collect();
            beta[t] = row;
        }
        let log_z = lse(&mut alpha[len - 1].iter().copied());

        let floor = self.eps as f32;
        Ok((0..len)
            .map(|t| {
                (0..labels)
                    .map(|y| (alpha[t][y] + beta[t][y] - log_z).exp().max(floor))
                    .collect()
            })
            .collect())
    }

    /// Write transition matrix, label count, buffer and epsilon in order.
    pub fn save<W: Write>(loss: Option<&Self>, w: &mut CheckpointWriter<W>) -> Result<()> {
        write_opt_var(w, "crf-transitions", loss.map(|l| &l.transitions))?;
        w.scalar("crf-label-count", loss.map_or(0, |l| l.label_count))?;
        w.list("crf-buffer", loss.map_or(&[][..], |l| l.buffer.as_slice()))?;
        w.scalar("crf-epsilon", loss.map_or(DEFAULT_EPS, |l| l.eps))
    }

    /// Read the sections written by [`CrfLoss::save`].
    pub fn load<R: BufRead>(
        r: &mut CheckpointReader<R>,
        arena: &mut ParamArena,
    ) -> Result<Option<Self>> {
        let transitions = read_var(r, arena, "crf-transitions", "crf.T", false)?;
        let label_count: usize = r.scalar("crf-label-count")?;
        let buffer: Vec<f32> = r.list("crf-buffer")?;
        let eps: f64 = r.scalar("crf-epsilon")?;

        let Some(transitions) = transitions else {
            return Ok(None);
        };
        if transitions.dims() != [label_count, label_count] || buffer.len() != label_count {
            return Err(SegtagError::Checkpoint(format!(
                "CRF block inconsistent: transitions {:?}, {label_count} labels, buffer of {}",
                transitions.dims(),
                buffer.len()
            )));
        }
        debug!(label_count, "loaded CRF transitions");
        Ok(Some(Self {
            transitions,
            label_count,
            buffer,
            eps,
        }))
    }
}
