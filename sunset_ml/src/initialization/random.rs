use std::{cell::RefCell, rc::Rc};

use rand::Rng;
use rand_distr::{Distribution, Uniform};

use super::{ParamGen, RandErr};

/// A parameter generator that samples from a probabilistic distribution.
///
/// Generators of different tensors share one random number generator, so the values a
/// seed produces depend only on the layout order.
pub struct RandParamGen<R: Rng, D: Distribution<f32>> {
    rng: Rc<RefCell<R>>,
    distribution: D,
}

impl<R: Rng, D: Distribution<f32>> RandParamGen<R, D> {
    pub fn new(rng: Rc<RefCell<R>>, distribution: D) -> Self {
        Self { rng, distribution }
    }
}

impl<R: Rng> RandParamGen<R, Uniform<f32>> {
    /// Creates a new `RandParamGen` sampling from `U(low, high)`.
    ///
    /// # Returns
    /// An error if the range is invalid (low >= high).
    pub fn uniform(rng: Rc<RefCell<R>>, low: f32, high: f32) -> Result<Self, RandErr> {
        Ok(Self::new(rng, Uniform::new(low, high)?))
    }

    /// Creates a new `RandParamGen` sampling from `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`,
    /// used for convolution and dense weights and biases.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    /// * `fan_in` - The number of inputs contributing to each output unit.
    ///
    /// # Returns
    /// An error if `fan_in` is zero.
    pub fn fan_in_uniform(rng: Rc<RefCell<R>>, fan_in: usize) -> Result<Self, RandErr> {
        if fan_in == 0 {
            return Err(RandErr::new("fan_in must be greater than zero"));
        }

        let bound = 1. / (fan_in as f32).sqrt();
        Self::uniform(rng, -bound, bound)
    }
}

impl<R: Rng, D: Distribution<f32>> ParamGen for RandParamGen<R, D> {
    fn fill(&mut self, out: &mut [f32]) {
        let mut rng = self.rng.borrow_mut();
        out.iter_mut()
            .for_each(|v| *v = self.distribution.sample(&mut *rng));
    }
}
