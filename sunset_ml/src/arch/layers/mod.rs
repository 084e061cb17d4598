mod batch_norm;
mod conv2d;
mod dense;
mod dropout;
mod flatten;
mod layer;
mod max_pool;
mod relu;

pub use batch_norm::BatchNorm2d;
pub use conv2d::Conv2d;
pub use dense::Dense;
pub use dropout::Dropout;
pub use flatten::Flatten;
pub use layer::{Layer, LayerOutput};
pub use max_pool::MaxPool2d;
pub use relu::Relu;

use ndarray::{Array2, Array4, ArrayD, Ix2, Ix4};

use crate::{MlErr, Result};

/// Converts `x` into an `(N, C, H, W)` array. A rank mismatch is reported as the
/// shape `[rank]` of the offending input.
fn into_nchw(x: ArrayD<f32>, what: &'static str) -> Result<Array4<f32>> {
    if x.ndim() != 4 {
        return Err(MlErr::ShapeMismatch {
            what,
            got: vec![x.ndim()],
            expected: vec![4],
        });
    }

    Ok(x.into_dimensionality::<Ix4>()?)
}

/// Converts `x` into an `(N, F)` array.
fn into_rows(x: ArrayD<f32>, what: &'static str) -> Result<Array2<f32>> {
    if x.ndim() != 2 {
        return Err(MlErr::ShapeMismatch {
            what,
            got: vec![x.ndim()],
            expected: vec![2],
        });
    }

    Ok(x.into_dimensionality::<Ix2>()?)
}

/// Checks that a 4D input shape has `channels` channels and returns it as an array.
fn check_nchw(input: &[usize], channels: usize, what: &'static str) -> Result<[usize; 4]> {
    match *input {
        [n, c, h, w] if c == channels => Ok([n, c, h, w]),
        [n, _, h, w] => Err(MlErr::ShapeMismatch {
            what,
            got: input.to_vec(),
            expected: vec![n, channels, h, w],
        }),
        _ => Err(MlErr::ShapeMismatch {
            what,
            got: vec![input.len()],
            expected: vec![4],
        }),
    }
}
