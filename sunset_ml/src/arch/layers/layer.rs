use ndarray::ArrayD;

use crate::{
    Result,
    arch::Mode,
    params::{ParamSpec, StateUpdate},
};

/// The result of running a single layer.
#[derive(Debug)]
pub struct LayerOutput {
    pub x: ArrayD<f32>,
    /// New values for the layer's buffers, relative to the start of its parameter slice.
    pub update: Option<StateUpdate>,
}

impl From<ArrayD<f32>> for LayerOutput {
    fn from(x: ArrayD<f32>) -> Self {
        Self { x, update: None }
    }
}

/// Every layer a `Sequential` can hold.
#[derive(Debug, Clone)]
pub enum Layer {
    Conv2d(super::Conv2d),
    BatchNorm2d(super::BatchNorm2d),
    MaxPool2d(super::MaxPool2d),
    Relu(super::Relu),
    Dropout(super::Dropout),
    Flatten(super::Flatten),
    Dense(super::Dense),
}
use Layer::*;

impl Layer {
    /// A convolution with stride 1 and the given zero padding.
    pub fn conv2d(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        padding: usize,
    ) -> Result<Self> {
        Ok(Self::Conv2d(
            super::Conv2d::new(in_channels, out_channels, kernel)?.with_padding(padding),
        ))
    }

    pub fn batch_norm2d(channels: usize, eps: f32, momentum: f32) -> Result<Self> {
        Ok(Self::BatchNorm2d(super::BatchNorm2d::with_hyper(
            channels, eps, momentum,
        )?))
    }

    pub fn max_pool2d(kernel: usize, stride: usize) -> Result<Self> {
        Ok(Self::MaxPool2d(super::MaxPool2d::new(kernel, stride)?))
    }

    pub fn relu() -> Self {
        Self::Relu(super::Relu::new())
    }

    pub fn dropout(p: f32) -> Result<Self> {
        Ok(Self::Dropout(super::Dropout::new(p)?))
    }

    pub fn flatten() -> Self {
        Self::Flatten(super::Flatten::new())
    }

    pub fn dense(dim: (usize, usize)) -> Result<Self> {
        Ok(Self::Dense(super::Dense::new(dim)?))
    }

    /// Returns the amount of scalars this layer reads from the parameter buffer.
    pub fn size(&self) -> usize {
        match self {
            Conv2d(l) => l.size(),
            BatchNorm2d(l) => l.size(),
            Dense(l) => l.size(),
            MaxPool2d(_) | Relu(_) | Dropout(_) | Flatten(_) => 0,
        }
    }

    /// Describes the tensors in this layer's parameter slice, in order.
    pub fn param_specs(&self) -> Vec<ParamSpec> {
        match self {
            Conv2d(l) => l.param_specs(),
            BatchNorm2d(l) => l.param_specs(),
            Dense(l) => l.param_specs(),
            MaxPool2d(_) | Relu(_) | Dropout(_) | Flatten(_) => Vec::new(),
        }
    }

    /// Computes the output shape for `input` without touching any data.
    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match self {
            Conv2d(l) => l.output_shape(input),
            BatchNorm2d(l) => l.output_shape(input),
            MaxPool2d(l) => l.output_shape(input),
            Flatten(l) => l.output_shape(input),
            Dense(l) => l.output_shape(input),
            Relu(_) | Dropout(_) => Ok(input.to_vec()),
        }
    }

    pub fn forward(
        &self,
        params: &[f32],
        x: ArrayD<f32>,
        mode: &mut Mode<'_>,
    ) -> Result<LayerOutput> {
        let output = match self {
            Conv2d(l) => l.forward(params, x)?.into(),
            BatchNorm2d(l) => {
                let (x, update) = l.forward(params, x, mode)?;
                LayerOutput { x, update }
            }
            MaxPool2d(l) => l.forward(x)?.into(),
            Relu(l) => l.forward(x).into(),
            Dropout(l) => l.forward(x, mode)?.into(),
            Flatten(l) => l.forward(x)?.into(),
            Dense(l) => l.forward(params, x)?.into(),
        };

        Ok(output)
    }

    /// A short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Conv2d(_) => "conv2d",
            BatchNorm2d(_) => "batch_norm2d",
            MaxPool2d(_) => "max_pool2d",
            Relu(_) => "relu",
            Dropout(_) => "dropout",
            Flatten(_) => "flatten",
            Dense(_) => "dense",
        }
    }
}
