use ndarray::{Array2, ArrayD, ArrayView1, ArrayView2, linalg};

use super::into_rows;
use crate::{
    MlErr, Result,
    params::{ParamKind, ParamSpec},
};

/// A fully connected layer, `z = x · W + b`.
///
/// The parameters are the weights `(in, out)` followed by the biases `(out)`.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    size: usize,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The `(input, output)` widths.
    ///
    /// # Returns
    /// An error if either width is zero.
    pub fn new(dim: (usize, usize)) -> Result<Self> {
        if dim.0 == 0 || dim.1 == 0 {
            return Err(MlErr::InvalidConfig(format!(
                "dense widths must be non-zero, got {dim:?}"
            )));
        }

        Ok(Self {
            dim,
            size: (dim.0 + 1) * dim.1,
        })
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn param_specs(&self) -> Vec<ParamSpec> {
        let (fan_in, out) = self.dim;

        vec![
            ParamSpec::new(ParamKind::Weight, vec![fan_in, out], Some(fan_in)),
            ParamSpec::new(ParamKind::Bias, vec![out], Some(fan_in)),
        ]
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match *input {
            [n, width] if width == self.dim.0 => Ok(vec![n, self.dim.1]),
            _ => Err(MlErr::ShapeMismatch {
                what: "dense input",
                got: input.to_vec(),
                expected: vec![input.first().copied().unwrap_or(1), self.dim.0],
            }),
        }
    }

    pub fn forward(&self, params: &[f32], x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = into_rows(x, "dense input rank")?;
        self.output_shape(x.shape())?;

        let (w, b) = self.view_params(params)?;
        let mut z = Array2::<f32>::zeros((x.nrows(), self.dim.1));
        z.assign(&b);
        linalg::general_mat_mul(1.0, &x, &w, 1.0, &mut z);

        Ok(z.into_dyn())
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        if params.len() != self.size {
            return Err(MlErr::SizeMismatch {
                what: "dense parameters",
                got: params.len(),
                expected: self.size,
            });
        }

        let w_size = self.size - self.dim.1;
        let weights = ArrayView2::from_shape(self.dim, &params[..w_size])?;
        let biases = ArrayView1::from_shape(self.dim.1, &params[w_size..])?;
        Ok((weights, biases))
    }
}
