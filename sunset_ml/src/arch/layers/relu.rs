use ndarray::ArrayD;

/// Rectified linear activation, clamps negative values to zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct Relu;

impl Relu {
    pub fn new() -> Self {
        Self
    }

    pub fn forward(&self, x: ArrayD<f32>) -> ArrayD<f32> {
        x.mapv_into(|v| v.max(0.))
    }
}
