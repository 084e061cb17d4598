use ndarray::ArrayD;

use crate::{MlErr, Result};

/// Reshapes `(N, d1, d2, ...)` into `(N, d1 * d2 * ...)`. Values keep their row-major
/// order within each sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flatten;

impl Flatten {
    pub fn new() -> Self {
        Self
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match input.split_first() {
            Some((&n, rest)) => Ok(vec![n, rest.iter().product()]),
            None => Err(MlErr::ShapeMismatch {
                what: "flatten input rank",
                got: vec![0],
                expected: vec![2],
            }),
        }
    }

    pub fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let shape = self.output_shape(x.shape())?;
        let x = if x.is_standard_layout() {
            x
        } else {
            x.as_standard_layout().into_owned()
        };

        Ok(x.into_shape_with_order((shape[0], shape[1]))?.into_dyn())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array, Axis};

    use super::*;

    #[test]
    fn keeps_per_sample_order() {
        let x = Array::from_shape_fn((2, 3, 2, 2), |(n, c, i, j)| {
            (n * 100 + c * 10 + i * 2 + j) as f32
        });

        let y = Flatten::new().forward(x.clone().into_dyn()).unwrap();

        assert_eq!(y.shape(), &[2, 12]);
        for (sample, row) in x.outer_iter().zip(y.outer_iter()) {
            assert_eq!(sample.iter().collect::<Vec<_>>(), row.iter().collect::<Vec<_>>());
        }
    }

    #[test]
    fn handles_non_standard_layout() {
        let mut x = Array::from_shape_fn((2, 2, 3), |(n, i, j)| (n * 6 + i * 3 + j) as f32);
        x.swap_axes(1, 2);

        let y = Flatten::new().forward(x.clone().into_dyn()).unwrap();

        assert_eq!(y.shape(), &[2, 6]);
        assert_eq!(
            y.index_axis(Axis(0), 0).iter().copied().collect::<Vec<_>>(),
            [0., 3., 1., 4., 2., 5.]
        );
    }
}
