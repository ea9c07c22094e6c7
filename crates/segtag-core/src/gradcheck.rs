//! # Numeric Gradient Verification
//!
//! Compares the gradient produced by `Tensor::backward` against a central
//! finite difference at one sampled element of every registered block.

use candle_core::{Tensor, Var};
use oorandom::Rand32;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Default finite-difference step.
pub const DEFAULT_DELTA: f64 = 1e-3;

/// Receiver of labelled blocks to verify.
pub trait GradCheckSink {
    fn add(&mut self, label: &str, var: &Var);
}

/// One sampled comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct GradCheckEntry {
    pub label: String,
    /// Flat index of the sampled element.
    pub index: usize,
    pub analytic: f32,
    pub numeric: f32,
}

impl GradCheckEntry {
    pub fn abs_diff(&self) -> f32 {
        (self.analytic - self.numeric).abs()
    }

    /// Difference relative to the larger magnitude, floored at one.
    pub fn rel_diff(&self) -> f32 {
        self.abs_diff() / self.analytic.abs().max(self.numeric.abs()).max(1.0)
    }
}

/// Result of a gradient check run.
#[derive(Debug, Clone, Default)]
pub struct GradReport {
    pub entries: Vec<GradCheckEntry>,
}

impl GradReport {
    pub fn max_rel_diff(&self) -> f32 {
        self.entries
            .iter()
            .map(GradCheckEntry::rel_diff)
            .fold(0.0, f32::max)
    }

    pub fn passed(&self, tolerance: f32) -> bool {
        self.max_rel_diff() <= tolerance
    }
}

/// Finite-difference gradient checker.
pub struct GradientCheck {
    blocks: Vec<(String, Var)>,
    rng: Rand32,
    delta: f64,
    tolerance: f32,
}

impl GradCheckSink for GradientCheck {
    fn add(&mut self, label: &str, var: &Var) {
        self.blocks.push((label.to_string(), var.clone()));
    }
}

impl GradientCheck {
    pub fn new(seed: u64) -> Self {
        Self {
            blocks: Vec::new(),
            rng: Rand32::new(seed),
            delta: DEFAULT_DELTA,
            tolerance: 1e-2,
        }
    }

    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = delta;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|(label, _)| label.as_str())
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Run the check. `loss_fn` must rebuild the loss from the current
    /// variable values on every call, deterministically.
    pub fn check<F>(&mut self, mut loss_fn: F) -> Result<GradReport>
    where
        F: FnMut() -> Result<Tensor>,
    {
        let grads = loss_fn()?.backward()?;
        let mut report = GradReport::default();

        for (label, var) in &self.blocks {
            let count = var.elem_count();
            if count == 0 {
                continue;
            }
            let index = self.rng.rand_range(0..count as u32) as usize;
            let analytic = match grads.get(var) {
                Some(grad) => grad.flatten_all()?.to_vec1::<f32>()?[index],
                None => 0.0,
            };

            let original = var.flatten_all()?.to_vec1::<f32>()?;
            let nudged = |offset: f64| -> Result<Tensor> {
                let mut values = original.clone();
                values[index] += offset as f32;
                Ok(Tensor::from_vec(values, var.dims(), var.device())?)
            };
            let mut evaluate = |offset: f64| -> Result<f32> {
                var.set(&nudged(offset)?)?;
                Ok(loss_fn()?.to_scalar::<f32>()?)
            };
            let plus_minus = match evaluate(self.delta) {
                Ok(plus) => evaluate(-self.delta).map(|minus| (plus, minus)),
                Err(e) => Err(e),
            };
            // restored on every path, including a failed evaluation
            var.set(&nudged(0.0)?)?;
            let (plus, minus) = plus_minus?;

            let numeric = ((plus - minus) as f64 / (2.0 * self.delta)) as f32;
            let entry = GradCheckEntry {
                label: label.clone(),
                index,
                analytic,
                numeric,
            };
            if entry.rel_diff() > self.tolerance {
                warn!(
                    block = %label,
                    index,
                    analytic,
                    numeric,
                    "gradient mismatch"
                );
            } else {
                debug!(block = %label, index, analytic, numeric, "gradient ok");
            }
            report.entries.push(entry);
        }

        info!(
            blocks = report.entries.len(),
            max_rel_diff = report.max_rel_diff(),
            "gradient check finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SegtagError;
    use candle_core::Device;

    #[test]
    fn test_quadratic_gradient_matches() {
        let w = Var::new(&[0.5f32, -1.0, 2.0], &Device::Cpu).unwrap();
        let mut check = GradientCheck::new(3);
        check.add("w", &w);
        assert_eq!(check.labels().collect::<Vec<_>>(), vec!["w"]);

        let report = check.check(|| Ok(w.sqr()?.sum_all()?)).unwrap();
        assert_eq!(report.entries.len(), 1);
        let entry = &report.entries[0];
        let expected = 2.0 * [0.5f32, -1.0, 2.0][entry.index];
        assert!((entry.analytic - expected).abs() < 1e-5);
        assert!(report.passed(1e-2), "{report:?}");
    }

    #[test]
    fn test_values_are_restored() {
        let w = Var::new(&[1.0f32, 2.0], &Device::Cpu).unwrap();
        let mut check = GradientCheck::new(1);
        check.add("w", &w);
        check.check(|| Ok(w.sum_all()?)).unwrap();
        assert_eq!(w.to_vec1::<f32>().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_values_are_restored_when_loss_fails() {
        let w = Var::new(&[1.0f32, 2.0], &Device::Cpu).unwrap();
        let mut check = GradientCheck::new(1);
        check.add("w", &w);
        let mut calls = 0;
        let result = check.check(|| {
            calls += 1;
            if calls == 2 {
                return Err(SegtagError::Config("loss unavailable".into()));
            }
            Ok(w.sum_all()?)
        });
        assert!(matches!(result, Err(SegtagError::Config(_))));
        assert_eq!(w.to_vec1::<f32>().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_unused_block_has_zero_gradient() {
        let used = Var::new(&[1.0f32], &Device::Cpu).unwrap();
        let unused = Var::new(&[4.0f32], &Device::Cpu).unwrap();
        let mut check = GradientCheck::new(1);
        check.add("used", &used);
        check.add("unused", &unused);
        let report = check.check(|| Ok(used.affine(3.0, 0.0)?.sum_all()?)).unwrap();
        assert_eq!(report.entries[1].analytic, 0.0);
        assert!(report.entries[1].numeric.abs() < 1e-6);
    }
}
