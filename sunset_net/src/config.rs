use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use sunset_ml::{
    MlErr,
    arch::{Sequential, layers::Layer},
};

use crate::Result;

/// The hyper parameters of the sunset architecture.
///
/// The defaults describe the fixed network: two conv stages of 24 and 48 channels over
/// 64x64 RGB inputs and a regressor of two 1024-wide hidden layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchConfig {
    pub in_channels: usize,
    /// Reference `[height, width]`, used to check `flat_features` at construction. Other
    /// sizes are accepted when pooling tiles them and they flatten to the same width.
    pub input_size: [usize; 2],
    /// Output channels of every conv stage.
    pub channels: Vec<usize>,
    pub kernel_size: usize,
    pub padding: usize,
    /// Side and stride of the max pooling window closing every stage.
    pub pool: usize,
    /// Input width of the regressor. Must match the flattened extractor output.
    pub flat_features: usize,
    pub hidden: usize,
    pub dropout: f32,
    pub bn_eps: f32,
    pub bn_momentum: f32,
    /// Seed for the initial parameters, drawn from the OS when absent.
    pub seed: Option<u64>,
}

impl Default for ArchConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            input_size: [64, 64],
            channels: vec![24, 48],
            kernel_size: 3,
            padding: 1,
            pool: 2,
            flat_features: 12288,
            hidden: 1024,
            dropout: 0.4,
            bn_eps: 1e-5,
            bn_momentum: 0.1,
            seed: None,
        }
    }
}

impl ArchConfig {
    /// Parses a JSON document, missing fields take their default value.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Checks the values that no layer constructor would catch.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(MlErr::InvalidConfig(msg).into()) };

        if self.channels.is_empty() {
            return invalid("at least one conv stage is required".into());
        }
        if self.input_size.contains(&0) {
            return invalid(format!("input size must be non-zero, got {:?}", self.input_size));
        }
        if !(0. ..1.).contains(&self.dropout) {
            return invalid(format!("dropout must be in [0, 1), got {}", self.dropout));
        }

        Ok(())
    }

    /// Whether both configurations build the same network, regardless of their seeds.
    pub fn same_topology(&self, other: &ArchConfig) -> bool {
        Self {
            seed: None,
            ..self.clone()
        } == Self {
            seed: None,
            ..other.clone()
        }
    }

    /// The shape of a batch of `batch` inputs.
    pub fn input_shape(&self, batch: usize) -> [usize; 4] {
        let [h, w] = self.input_size;
        [batch, self.in_channels, h, w]
    }

    /// Builds the convolutional stages: conv, ReLU, batch norm and max pooling each.
    pub fn features(&self) -> sunset_ml::Result<Sequential> {
        let mut layers = Vec::with_capacity(4 * self.channels.len());
        let mut in_channels = self.in_channels;

        for &out_channels in &self.channels {
            layers.push(Layer::conv2d(
                in_channels,
                out_channels,
                self.kernel_size,
                self.padding,
            )?);
            layers.push(Layer::relu());
            layers.push(Layer::batch_norm2d(
                out_channels,
                self.bn_eps,
                self.bn_momentum,
            )?);
            layers.push(Layer::max_pool2d(self.pool, self.pool)?);
            in_channels = out_channels;
        }

        Ok(Sequential::new(layers))
    }

    /// Builds the fully connected head ending in a single output.
    pub fn regressor(&self) -> sunset_ml::Result<Sequential> {
        let (flat, hidden) = (self.flat_features, self.hidden);

        Ok(Sequential::new([
            Layer::dense((flat, hidden))?,
            Layer::dropout(self.dropout)?,
            Layer::relu(),
            Layer::dense((hidden, hidden))?,
            Layer::dropout(self.dropout)?,
            Layer::relu(),
            Layer::dense((hidden, 1))?,
        ]))
    }
}
