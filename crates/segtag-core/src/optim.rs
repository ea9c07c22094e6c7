//! # Parameter Export and AdaGrad
//!
//! A [`ParameterStore`](crate::params::ParameterStore) registers every block
//! it owns with a [`ParameterSink`]; [`ParameterRegistry`] collects them and
//! turns them into an [`AdaGrad`] optimizer.

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::Optimizer;

use crate::error::Result;

/// Receiver of trainable blocks.
pub trait ParameterSink {
    fn register(&mut self, name: &str, var: &Var);
}

/// Named list of registered blocks.
#[derive(Debug, Default)]
pub struct ParameterRegistry {
    entries: Vec<(String, Var)>,
}

impl ParameterSink for ParameterRegistry {
    fn register(&mut self, name: &str, var: &Var) {
        self.entries.push((name.to_string(), var.clone()));
    }
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Total number of scalar weights.
    pub fn weight_count(&self) -> usize {
        self.entries.iter().map(|(_, var)| var.elem_count()).sum()
    }

    pub fn vars(&self) -> Vec<Var> {
        self.entries.iter().map(|(_, var)| var.clone()).collect()
    }

    /// Build an AdaGrad optimizer over every registered block.
    pub fn into_optimizer(self, config: AdaGradConfig) -> Result<AdaGrad> {
        let vars = self.entries.into_iter().map(|(_, var)| var).collect();
        Ok(AdaGrad::new(vars, config)?)
    }
}

/// AdaGrad settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaGradConfig {
    /// Step size.
    pub alpha: f64,
    /// Added to the accumulated squared gradient before the square root.
    pub eps: f64,
    /// L2 weight folded into every gradient.
    pub regularization: f64,
}

impl Default for AdaGradConfig {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            eps: 1e-6,
            regularization: 1e-8,
        }
    }
}

#[derive(Debug)]
struct Accumulator {
    var: Var,
    sum_sq: Tensor,
}

/// AdaGrad with L2 regularisation.
#[derive(Debug)]
pub struct AdaGrad {
    accumulators: Vec<Accumulator>,
    config: AdaGradConfig,
}

impl Optimizer for AdaGrad {
    type Config = AdaGradConfig;

    fn new(vars: Vec<Var>, config: AdaGradConfig) -> candle_core::Result<Self> {
        let accumulators = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| {
                let sum_sq = var.zeros_like()?;
                Ok(Accumulator { var, sum_sq })
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self {
            accumulators,
            config,
        })
    }

    fn learning_rate(&self) -> f64 {
        self.config.alpha
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.config.alpha = lr;
    }

    fn step(&mut self, grads: &GradStore) -> candle_core::Result<()> {
        let AdaGradConfig {
            alpha,
            eps,
            regularization,
        } = self.config;
        for acc in self.accumulators.iter_mut() {
            let Some(grad) = grads.get(&acc.var) else {
                continue;
            };
            let grad = (grad + acc.var.affine(regularization, 0.0)?)?;
            acc.sum_sq = (&acc.sum_sq + grad.sqr()?)?;
            let scale = acc.sum_sq.affine(1.0, eps)?.sqrt()?;
            let update = (grad / scale)?.affine(alpha, 0.0)?;
            acc.var.set(&acc.var.sub(&update)?)?;
        }
        Ok(())
    }
}

impl AdaGrad {
    pub fn config(&self) -> &AdaGradConfig {
        &self.config
    }

    /// Number of blocks under optimisation.
    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }
}
