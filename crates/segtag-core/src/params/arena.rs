//! Model-lifetime allocator for every learnable block.

use candle_core::{DType, Device, Shape, Tensor, Var};
use candle_nn::{Init, VarMap};
use oorandom::Rand32;

use crate::error::{Result, SegtagError};

/// Default seed for weight initialisation.
pub const DEFAULT_SEED: u64 = 0x5e97a9;

/// Arena owning the variables of one model.
///
/// Blocks are registered in a candle [`VarMap`] under unique names; allocating
/// an existing name replaces the previous variable, which is what a checkpoint
/// reload needs.
pub struct ParamArena {
    vars: VarMap,
    device: Device,
    rng: Rand32,
}

impl ParamArena {
    /// CPU arena with the default seed.
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            vars: VarMap::new(),
            device: Device::Cpu,
            rng: Rand32::new(seed),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Allocate a block initialised uniformly in `[-bound, bound)`.
    pub fn uniform<S: Into<Shape>>(&mut self, name: &str, shape: S, bound: f32) -> Result<Var> {
        let shape = shape.into();
        let values: Vec<f32> = (0..shape.elem_count())
            .map(|_| (2.0 * self.rng.rand_float() - 1.0) * bound)
            .collect();
        let tensor = Tensor::from_vec(values, shape, &self.device)?;
        self.adopt(name, &tensor)
    }

    /// Allocate a block with Glorot-style bounds for a `rows x cols` weight.
    pub fn xavier(&mut self, name: &str, rows: usize, cols: usize) -> Result<Var> {
        let bound = (6.0 / (rows + cols).max(1) as f32).sqrt();
        self.uniform(name, (rows, cols), bound)
    }

    /// Allocate a zero-filled block.
    pub fn zeros<S: Into<Shape>>(&mut self, name: &str, shape: S) -> Result<Var> {
        let var = Init::Const(0.0).var(shape, DType::F32, &self.device)?;
        self.insert(name, var.clone())?;
        Ok(var)
    }

    /// Register a copy of `tensor` as a variable.
    pub fn adopt(&mut self, name: &str, tensor: &Tensor) -> Result<Var> {
        let tensor = tensor.to_dtype(DType::F32)?.to_device(&self.device)?;
        let var = Var::from_tensor(&tensor)?;
        self.insert(name, var.clone())?;
        Ok(var)
    }

    fn insert(&self, name: &str, var: Var) -> Result<()> {
        let mut data = self
            .vars
            .data()
            .lock()
            .map_err(|_| SegtagError::Candle("parameter arena lock poisoned".into()))?;
        data.insert(name.to_string(), var);
        Ok(())
    }

    /// Number of live blocks.
    pub fn len(&self) -> usize {
        self.vars.all_vars().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every live block.
    pub fn all_vars(&self) -> Vec<Var> {
        self.vars.all_vars()
    }

    pub fn var_map(&self) -> &VarMap {
        &self.vars
    }
}

impl Default for ParamArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_respects_bound() {
        let mut arena = ParamArena::new();
        let var = arena.uniform("w", (4, 8), 0.5).unwrap();
        let values = var.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(values.len(), 32);
        assert!(values.iter().all(|v| (-0.5..0.5).contains(v)));
    }

    #[test]
    fn test_same_seed_same_weights() {
        let mut a = ParamArena::with_seed(7);
        let mut b = ParamArena::with_seed(7);
        let wa = a.xavier("w", 3, 3).unwrap();
        let wb = b.xavier("w", 3, 3).unwrap();
        assert_eq!(
            wa.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            wb.flatten_all().unwrap().to_vec1::<f32>().unwrap()
        );
    }

    #[test]
    fn test_reallocating_a_name_replaces_it() {
        let mut arena = ParamArena::new();
        arena.zeros("b", 4).unwrap();
        arena.zeros("b", 6).unwrap();
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.all_vars()[0].dims(), &[6]);
    }
}
