use ndarray::ArrayD;
use rand::distr::{Bernoulli, Distribution};

use crate::{MlErr, Result, arch::Mode};

/// Zeroes each activation with probability `p` in training mode and scales the survivors
/// by `1 / (1 - p)`. The identity in evaluation mode.
#[derive(Debug, Clone)]
pub struct Dropout {
    p: f32,
}

impl Dropout {
    /// Creates a new `Dropout`.
    ///
    /// # Returns
    /// An error if `p` is not within `[0, 1]`.
    pub fn new(p: f32) -> Result<Self> {
        if !(0. ..=1.).contains(&p) {
            return Err(MlErr::InvalidConfig(format!(
                "dropout probability must be in [0, 1], got {p}"
            )));
        }

        Ok(Self { p })
    }

    pub fn p(&self) -> f32 {
        self.p
    }

    pub fn forward(&self, x: ArrayD<f32>, mode: &mut Mode<'_>) -> Result<ArrayD<f32>> {
        let Mode::Train { rng } = mode else {
            return Ok(x);
        };

        if self.p >= 1. {
            return Ok(x.mapv_into(|_| 0.));
        }

        let keep = Bernoulli::new(1. - self.p as f64)
            .map_err(|e| MlErr::InvalidConfig(e.to_string()))?;
        let scale = 1. / (1. - self.p);

        Ok(x.mapv_into(|v| if keep.sample(&mut **rng) { v * scale } else { 0. }))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn eval_is_identity() {
        let x = Array::from_shape_fn((4, 8), |(i, j)| (i * 8 + j) as f32).into_dyn();
        let y = Dropout::new(0.4)
            .unwrap()
            .forward(x.clone(), &mut Mode::Eval)
            .unwrap();

        assert_eq!(x, y);
    }

    #[test]
    fn train_zeroes_and_rescales() {
        let dropout = Dropout::new(0.4).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let x = Array::from_elem(10_000, 1.0_f32).into_dyn();

        let y = dropout.forward(x, &mut Mode::train(&mut rng)).unwrap();

        let zeros = y.iter().filter(|&&v| v == 0.).count();
        assert!(y.iter().all(|&v| v == 0. || (v - 1. / 0.6).abs() < 1e-6));
        assert!((3_500..4_500).contains(&zeros), "dropped {zeros}");
    }

    #[test]
    fn zero_probability_keeps_everything() {
        let mut rng = StdRng::seed_from_u64(7);
        let x = Array::from_elem(64, 3.0_f32).into_dyn();

        let y = Dropout::new(0.)
            .unwrap()
            .forward(x.clone(), &mut Mode::train(&mut rng))
            .unwrap();
        assert_eq!(x, y);
    }

    #[test]
    fn rejects_invalid_probability() {
        assert!(Dropout::new(-0.1).is_err());
        assert!(Dropout::new(1.5).is_err());
    }
}
