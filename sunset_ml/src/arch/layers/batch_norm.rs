use ndarray::{Array1, ArrayD, ArrayView1, ArrayViewD, Axis};

use super::{check_nchw, into_nchw};
use crate::{
    MlErr, Result,
    arch::Mode,
    params::{ParamKind, ParamSpec, StateUpdate},
};

/// Per-channel batch normalization over `(N, C, H, W)` inputs.
///
/// The layer's slice of the parameter buffer holds, in order, the scale, the shift, the
/// running mean and the running variance, `C` values each. The last two are buffers: a
/// training-mode pass returns their new values as a `StateUpdate` instead of writing them.
#[derive(Debug, Clone)]
pub struct BatchNorm2d {
    channels: usize,
    eps: f32,
    momentum: f32,
}

impl BatchNorm2d {
    pub const DEFAULT_EPS: f32 = 1e-5;
    pub const DEFAULT_MOMENTUM: f32 = 0.1;

    pub fn new(channels: usize) -> Result<Self> {
        Self::with_hyper(channels, Self::DEFAULT_EPS, Self::DEFAULT_MOMENTUM)
    }

    /// Creates a new `BatchNorm2d`.
    ///
    /// # Arguments
    /// * `channels` - The amount of channels to normalize.
    /// * `eps` - Added to the variance before taking its square root.
    /// * `momentum` - The weight of the batch statistics when updating the running ones.
    ///
    /// # Returns
    /// An error if `channels` is zero, `eps` is not positive or `momentum` is outside `[0, 1]`.
    pub fn with_hyper(channels: usize, eps: f32, momentum: f32) -> Result<Self> {
        if channels == 0 || !(eps > 0.) || !(0. ..=1.).contains(&momentum) {
            return Err(MlErr::InvalidConfig(format!(
                "batch norm needs channels > 0, eps > 0 and momentum in [0, 1], got {channels}, {eps}, {momentum}"
            )));
        }

        Ok(Self {
            channels,
            eps,
            momentum,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Returns the amount of scalars this layer owns, buffers included.
    pub fn size(&self) -> usize {
        4 * self.channels
    }

    pub fn param_specs(&self) -> Vec<ParamSpec> {
        [
            ParamKind::Weight,
            ParamKind::Bias,
            ParamKind::RunningMean,
            ParamKind::RunningVar,
        ]
        .into_iter()
        .map(|kind| ParamSpec::new(kind, vec![self.channels], None))
        .collect()
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        check_nchw(input, self.channels, "batch norm input")?;
        Ok(input.to_vec())
    }

    pub fn forward(
        &self,
        params: &[f32],
        x: ArrayD<f32>,
        mode: &Mode<'_>,
    ) -> Result<(ArrayD<f32>, Option<StateUpdate>)> {
        let mut x = into_nchw(x, "batch norm input rank")?;
        check_nchw(x.shape(), self.channels, "batch norm input")?;

        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "batch norm parameters",
                got: params.len(),
                expected: self.size(),
            });
        }

        let [gamma, beta, running_mean, running_var] = self.view_params(params);

        let (mean, var, update) = if mode.is_train() {
            let (mean, var, count) = self.batch_stats(x.view().into_dyn());
            if count == 0 {
                return Err(MlErr::ShapeMismatch {
                    what: "batch norm batch size",
                    got: x.shape().to_vec(),
                    expected: vec![1, self.channels, 1, 1],
                });
            }

            let update = self.running_update(running_mean, running_var, &mean, &var, count);
            (mean, var, Some(update))
        } else {
            (running_mean.to_owned(), running_var.to_owned(), None)
        };

        for (c, mut plane) in x.axis_iter_mut(Axis(1)).enumerate() {
            let scale = gamma[c] / (var[c] + self.eps).sqrt();
            let (shift, m) = (beta[c], mean[c]);
            plane.mapv_inplace(|v| (v - m) * scale + shift);
        }

        Ok((x.into_dyn(), update))
    }

    /// Computes the per-channel mean and biased variance over the batch and spatial axes.
    fn batch_stats(&self, x: ArrayViewD<f32>) -> (Array1<f32>, Array1<f32>, usize) {
        let count = x.len() / self.channels;
        let mut mean = Array1::zeros(self.channels);
        let mut var = Array1::zeros(self.channels);

        if count == 0 {
            return (mean, var, count);
        }

        for (c, plane) in x.axis_iter(Axis(1)).enumerate() {
            let m = plane.sum() / count as f32;
            mean[c] = m;
            var[c] = plane.fold(0., |acc, &v| acc + (v - m).powi(2)) / count as f32;
        }

        (mean, var, count)
    }

    /// Blends the batch statistics into the running ones. The running variance tracks the
    /// unbiased estimate.
    fn running_update(
        &self,
        running_mean: ArrayView1<f32>,
        running_var: ArrayView1<f32>,
        mean: &Array1<f32>,
        var: &Array1<f32>,
        count: usize,
    ) -> StateUpdate {
        let m = self.momentum;
        let correction = if count > 1 {
            count as f32 / (count - 1) as f32
        } else {
            1.
        };

        let new_mean = running_mean
            .iter()
            .zip(mean)
            .map(|(&r, &b)| (1. - m) * r + m * b);
        let new_var = running_var
            .iter()
            .zip(var)
            .map(|(&r, &b)| (1. - m) * r + m * b * correction);

        StateUpdate::new(2 * self.channels, new_mean.chain(new_var).collect())
    }

    fn view_params<'a>(&self, params: &'a [f32]) -> [ArrayView1<'a, f32>; 4] {
        let c = self.channels;
        [0, 1, 2, 3].map(move |i| ArrayView1::from(&params[i * c..(i + 1) * c]))
    }
}
