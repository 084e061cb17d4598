use ndarray::{Array4, ArrayD, Zip, s};

use super::into_nchw;
use crate::{MlErr, Result};

/// Spatial max pooling over `(N, C, H, W)` inputs with square windows. Trailing rows and
/// columns that do not fill a whole window are dropped.
#[derive(Debug, Clone)]
pub struct MaxPool2d {
    kernel: usize,
    stride: usize,
}

impl MaxPool2d {
    /// Creates a new `MaxPool2d`.
    ///
    /// # Arguments
    /// * `kernel` - The side of the pooling window.
    /// * `stride` - The distance between consecutive windows.
    ///
    /// # Returns
    /// An error if either size is zero.
    pub fn new(kernel: usize, stride: usize) -> Result<Self> {
        if kernel == 0 || stride == 0 {
            return Err(MlErr::InvalidConfig(format!(
                "max pool sizes must be non-zero, got kernel {kernel} and stride {stride}"
            )));
        }

        Ok(Self { kernel, stride })
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let &[n, c, h, w] = input else {
            return Err(MlErr::ShapeMismatch {
                what: "max pool input rank",
                got: vec![input.len()],
                expected: vec![4],
            });
        };

        let (oh, ow) = self.output_hw(h, w)?;
        Ok(vec![n, c, oh, ow])
    }

    pub fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = into_nchw(x, "max pool input rank")?;
        let (n, c, h, w) = x.dim();
        let (oh, ow) = self.output_hw(h, w)?;
        let (k, st) = (self.kernel, self.stride);

        let mut out = Array4::<f32>::zeros((n, c, oh, ow));
        Zip::indexed(&mut out).par_for_each(|(b, ch, oy, ox), o| {
            let window = x.slice(s![b, ch, oy * st..oy * st + k, ox * st..ox * st + k]);
            *o = window.fold(f32::NEG_INFINITY, |m, &v| {
                if v > m || v.is_nan() { v } else { m }
            });
        });

        Ok(out.into_dyn())
    }

    /// Whether the windows cover every row and column of a `(N, C, H, W)` input, so
    /// that nothing is dropped by flooring.
    pub fn tiles(&self, input: &[usize]) -> bool {
        let fits = |side: usize| side >= self.kernel && (side - self.kernel) % self.stride == 0;

        match *input {
            [_, _, h, w] => fits(h) && fits(w),
            _ => false,
        }
    }

    fn output_hw(&self, h: usize, w: usize) -> Result<(usize, usize)> {
        if h < self.kernel || w < self.kernel {
            return Err(MlErr::ShapeMismatch {
                what: "max pool spatial size",
                got: vec![h, w],
                expected: vec![self.kernel, self.kernel],
            });
        }

        Ok((
            (h - self.kernel) / self.stride + 1,
            (w - self.kernel) / self.stride + 1,
        ))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array, Ix4};

    use super::*;

    #[test]
    fn keeps_window_maximum() {
        let pool = MaxPool2d::new(2, 2).unwrap();
        let x = Array::from_shape_fn((1, 1, 4, 4), |(_, _, i, j)| (i * 4 + j) as f32);

        let y = pool
            .forward(x.into_dyn())
            .unwrap()
            .into_dimensionality::<Ix4>()
            .unwrap();

        assert_eq!(y.shape(), &[1, 1, 2, 2]);
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), [5., 7., 13., 15.]);
    }

    #[test]
    fn floors_odd_sizes() {
        let pool = MaxPool2d::new(2, 2).unwrap();

        assert_eq!(pool.output_shape(&[3, 8, 5, 7]).unwrap(), [3, 8, 2, 3]);
        let y = pool.forward(Array::zeros((3, 8, 5, 7)).into_dyn()).unwrap();
        assert_eq!(y.shape(), &[3, 8, 2, 3]);
    }

    #[test]
    fn handles_negative_values() {
        let pool = MaxPool2d::new(2, 2).unwrap();
        let x = Array::from_elem((1, 1, 2, 2), -3.0_f32);

        let y = pool.forward(x.into_dyn()).unwrap();
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), [-3.]);
    }

    #[test]
    fn propagates_nan() {
        let pool = MaxPool2d::new(2, 2).unwrap();
        let x = Array::from_shape_vec((1, 1, 2, 2), vec![f32::NAN, 1., 2., 3.]).unwrap();
        let y = pool.forward(x.into_dyn()).unwrap();
        assert!(y.iter().all(|v| v.is_nan()));

        let x = Array::from_shape_vec((1, 1, 2, 2), vec![1., 2., f32::NAN, 0.]).unwrap();
        let y = pool.forward(x.into_dyn()).unwrap();
        assert!(y.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn tiling_needs_whole_windows() {
        let pool = MaxPool2d::new(2, 2).unwrap();

        assert!(pool.tiles(&[1, 3, 64, 64]));
        assert!(pool.tiles(&[1, 3, 128, 32]));
        assert!(!pool.tiles(&[1, 3, 64, 65]));
        assert!(!pool.tiles(&[1, 3, 1, 4]));
        assert!(!pool.tiles(&[64, 64]));
    }

    #[test]
    fn rejects_too_small_input() {
        let pool = MaxPool2d::new(2, 2).unwrap();
        assert!(matches!(
            pool.forward(Array::zeros((1, 1, 1, 4)).into_dyn()),
            Err(MlErr::ShapeMismatch { .. })
        ));
    }
}
