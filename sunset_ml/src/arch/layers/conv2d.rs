use ndarray::{Array2, Array3, ArrayD, ArrayView1, ArrayView2, ArrayView3, Axis, linalg};
use rayon::prelude::*;

use super::{check_nchw, into_nchw};
use crate::{
    MlErr, Result,
    params::{ParamKind, ParamSpec},
};

/// A 2D convolution with square kernels over `(N, C, H, W)` inputs.
///
/// The parameters are the weights `(out, in, k, k)` followed by the biases `(out)`. Each
/// sample is unfolded into an `(in * k * k, oh * ow)` patch matrix and multiplied by the
/// weights, samples run in parallel.
#[derive(Debug, Clone)]
pub struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
}

impl Conv2d {
    /// Creates a new `Conv2d` with stride 1 and no padding.
    ///
    /// # Arguments
    /// * `in_channels` - The channels of the input.
    /// * `out_channels` - The channels of the output, one filter each.
    /// * `kernel` - The side of the square kernel.
    ///
    /// # Returns
    /// An error if any of the sizes is zero.
    pub fn new(in_channels: usize, out_channels: usize, kernel: usize) -> Result<Self> {
        if in_channels == 0 || out_channels == 0 || kernel == 0 {
            return Err(MlErr::InvalidConfig(format!(
                "conv2d sizes must be non-zero, got {in_channels}->{out_channels} with kernel {kernel}"
            )));
        }

        Ok(Self {
            in_channels,
            out_channels,
            kernel,
            stride: 1,
            padding: 0,
        })
    }

    /// Sets the stride. A zero stride is treated as 1.
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride.max(1);
        self
    }

    /// Sets the zero padding added to every side of the input.
    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        (self.patch_len() + 1) * self.out_channels
    }

    pub fn param_specs(&self) -> Vec<ParamSpec> {
        let (k, fan_in) = (self.kernel, self.patch_len());

        vec![
            ParamSpec::new(
                ParamKind::Weight,
                vec![self.out_channels, self.in_channels, k, k],
                Some(fan_in),
            ),
            ParamSpec::new(ParamKind::Bias, vec![self.out_channels], Some(fan_in)),
        ]
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let [n, _, h, w] = check_nchw(input, self.in_channels, "conv2d input")?;
        let (oh, ow) = self.output_hw(h, w)?;
        Ok(vec![n, self.out_channels, oh, ow])
    }

    pub fn forward(&self, params: &[f32], x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = into_nchw(x, "conv2d input rank")?;
        let [n, _, h, w] = check_nchw(x.shape(), self.in_channels, "conv2d input")?;
        let (oh, ow) = self.output_hw(h, w)?;

        let (weights, biases) = self.view_params(params)?;
        let biases = biases.insert_axis(Axis(1));

        let mut out = Array3::<f32>::zeros((n, self.out_channels, oh * ow));
        out.axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(x.axis_iter(Axis(0)).into_par_iter())
            .for_each(|(mut o, sample)| {
                let patches = self.im2col(sample, oh, ow);
                o.assign(&biases);
                linalg::general_mat_mul(1.0, &weights, &patches, 1.0, &mut o);
            });

        Ok(out
            .into_shape_with_order((n, self.out_channels, oh, ow))?
            .into_dyn())
    }

    fn patch_len(&self) -> usize {
        self.in_channels * self.kernel * self.kernel
    }

    fn output_hw(&self, h: usize, w: usize) -> Result<(usize, usize)> {
        let k = self.kernel;
        let (ph, pw) = (h + 2 * self.padding, w + 2 * self.padding);

        if ph < k || pw < k {
            let min = k.saturating_sub(2 * self.padding);
            return Err(MlErr::ShapeMismatch {
                what: "conv2d spatial size",
                got: vec![h, w],
                expected: vec![min, min],
            });
        }

        Ok(((ph - k) / self.stride + 1, (pw - k) / self.stride + 1))
    }

    /// Unfolds one `(C, H, W)` sample into a matrix with a row per `(channel, ki, kj)`
    /// and a column per output position. Padded positions stay zero.
    fn im2col(&self, x: ArrayView3<f32>, oh: usize, ow: usize) -> Array2<f32> {
        let (channels, h, w) = x.dim();
        let k = self.kernel;
        let mut patches = Array2::zeros((self.patch_len(), oh * ow));

        for c in 0..channels {
            for ki in 0..k {
                for kj in 0..k {
                    let mut row = patches.row_mut((c * k + ki) * k + kj);

                    for oy in 0..oh {
                        let Some(iy) = (oy * self.stride + ki)
                            .checked_sub(self.padding)
                            .filter(|&iy| iy < h)
                        else {
                            continue;
                        };

                        for ox in 0..ow {
                            let Some(ix) = (ox * self.stride + kj)
                                .checked_sub(self.padding)
                                .filter(|&ix| ix < w)
                            else {
                                continue;
                            };

                            row[oy * ow + ox] = x[[c, iy, ix]];
                        }
                    }
                }
            }
        }

        patches
    }

    /// Gives a view of the raw parameter slice as the `(out, in * k * k)` weight matrix
    /// and the biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "conv2d parameters",
                got: params.len(),
                expected: self.size(),
            });
        }

        let (w_raw, b_raw) = params.split_at(self.patch_len() * self.out_channels);
        let weights = ArrayView2::from_shape((self.out_channels, self.patch_len()), w_raw)?;
        let biases = ArrayView1::from_shape(self.out_channels, b_raw)?;
        Ok((weights, biases))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array, Array4, Ix4};

    use super::*;

    #[test]
    fn centered_kernel_with_padding_is_identity_plus_bias() {
        let conv = Conv2d::new(1, 1, 3).unwrap().with_padding(1);
        let mut params = vec![0.; conv.size()];
        params[4] = 1.;
        params[9] = 0.5;

        let x = Array::from_shape_fn((1, 1, 4, 4), |(_, _, i, j)| (i * 4 + j) as f32);
        let y = conv.forward(&params, x.clone().into_dyn()).unwrap();

        assert_eq!(y.shape(), &[1, 1, 4, 4]);
        assert_eq!(y, (x + 0.5).into_dyn());
    }

    #[test]
    fn sums_window_without_padding() {
        let conv = Conv2d::new(1, 1, 2).unwrap();
        let params = [1., 1., 1., 1., 0.];
        let x = Array4::from_shape_vec((1, 1, 2, 2), vec![1., 2., 3., 4.]).unwrap();

        let y = conv.forward(&params, x.into_dyn()).unwrap();

        assert_eq!(y.shape(), &[1, 1, 1, 1]);
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), [10.]);
    }

    #[test]
    fn mixes_input_channels_per_filter() {
        let conv = Conv2d::new(2, 2, 1).unwrap();
        // filter 0: 2a + 3b, filter 1: -a + b + 1
        let params = [2., 3., -1., 1., 0., 1.];
        let x = Array4::from_shape_vec((1, 2, 1, 2), vec![1., 2., 10., 20.]).unwrap();

        let y = conv
            .forward(&params, x.into_dyn())
            .unwrap()
            .into_dimensionality::<Ix4>()
            .unwrap();

        assert_eq!(y[[0, 0, 0, 0]], 32.);
        assert_eq!(y[[0, 0, 0, 1]], 64.);
        assert_eq!(y[[0, 1, 0, 0]], 10.);
        assert_eq!(y[[0, 1, 0, 1]], 19.);
    }

    #[test]
    fn same_padding_keeps_spatial_size() {
        let conv = Conv2d::new(3, 24, 3).unwrap().with_padding(1);

        assert_eq!(conv.size(), 24 * 3 * 9 + 24);
        assert_eq!(conv.output_shape(&[2, 3, 8, 8]).unwrap(), [2, 24, 8, 8]);

        let y = conv
            .forward(&vec![0.01; conv.size()], Array4::zeros((2, 3, 8, 8)).into_dyn())
            .unwrap();
        assert_eq!(y.shape(), &[2, 24, 8, 8]);
    }

    #[test]
    fn stride_skips_positions() {
        let conv = Conv2d::new(1, 1, 2).unwrap().with_stride(2);
        let params = [1., 1., 1., 1., 0.];
        let x = Array::from_shape_fn((1, 1, 4, 4), |(_, _, i, j)| (i * 4 + j) as f32);

        let y = conv.forward(&params, x.into_dyn()).unwrap();

        assert_eq!(y.shape(), &[1, 1, 2, 2]);
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), [10., 18., 42., 50.]);
    }

    #[test]
    fn stride_with_padding_shape() {
        let conv = Conv2d::new(2, 3, 3).unwrap().with_padding(1).with_stride(2);

        assert_eq!(conv.output_shape(&[1, 2, 5, 5]).unwrap(), [1, 3, 3, 3]);
        let y = conv
            .forward(&vec![0.; conv.size()], Array4::zeros((1, 2, 5, 5)).into_dyn())
            .unwrap();
        assert_eq!(y.shape(), &[1, 3, 3, 3]);
    }

    #[test]
    fn rejects_wrong_channels() {
        let conv = Conv2d::new(3, 4, 3).unwrap();
        let err = conv
            .forward(&vec![0.; conv.size()], Array4::zeros((1, 2, 5, 5)).into_dyn())
            .unwrap_err();

        assert!(matches!(err, MlErr::ShapeMismatch { .. }));
    }

    #[test]
    fn rejects_too_small_input() {
        let conv = Conv2d::new(1, 1, 3).unwrap();
        assert!(matches!(
            conv.output_shape(&[1, 1, 2, 2]),
            Err(MlErr::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_wrong_param_len() {
        let conv = Conv2d::new(1, 1, 3).unwrap();
        let err = conv
            .forward(&[0.; 3], Array4::zeros((1, 1, 3, 3)).into_dyn())
            .unwrap_err();

        assert!(matches!(err, MlErr::SizeMismatch { .. }));
    }
}
