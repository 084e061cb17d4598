use std::{
    cell::RefCell,
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

use log::{debug, info};
use ndarray::{Array2, Array4, ArrayD, ArrayView4, Dimension, Ix2, Ix4};
use rand::{Rng, RngCore, SeedableRng, rngs::StdRng};
use sunset_ml::{
    MlErr,
    arch::{
        Mode, ModeKind, Sequential,
        layers::{Flatten, Layer},
    },
    initialization,
    params::{ParameterLayout, Params, StateUpdate},
};

use crate::{ArchConfig, NetErr, Result, Weather, checkpoint::Checkpoint};

/// The sunset regressor: a conv feature extractor, a flattener and a dense regressor
/// producing one score per image.
///
/// Every weather variant has the same topology. The weather only decides which
/// checkpoint file the model reads and writes.
#[derive(Debug, Clone)]
pub struct SunsetNet {
    weather: Weather,
    config: ArchConfig,
    features: Sequential,
    regressor: Sequential,
    params: Params,
}

impl SunsetNet {
    /// Creates the default architecture with freshly initialized parameters.
    pub fn new(weather: Weather) -> Result<Self> {
        Self::with_config(weather, ArchConfig::default())
    }

    /// Creates a model for `config`, seeded from `config.seed` when present.
    pub fn with_config(weather: Weather, config: ArchConfig) -> Result<Self> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self::with_rng(weather, config, rng)
    }

    /// Creates a new `SunsetNet`.
    ///
    /// # Arguments
    /// * `weather` - The weather this parameter set belongs to.
    /// * `config` - The architecture.
    /// * `rng` - The source of the initial parameters.
    ///
    /// # Returns
    /// A new model, or a `ShapeMismatch` if the feature extractor's output for the
    /// configured input size does not flatten to `config.flat_features`.
    pub fn with_rng<R: Rng + 'static>(
        weather: Weather,
        config: ArchConfig,
        rng: R,
    ) -> Result<Self> {
        let (features, regressor, layout) = Self::build(&config)?;
        let values = initialization::init_layout(&layout, Rc::new(RefCell::new(rng)))?;
        let params = Params::new(layout, values)?;

        info!(weather = weather.as_str(), params = params.len(); "sunset model initialized");

        Ok(Self {
            weather,
            config,
            features,
            regressor,
            params,
        })
    }

    /// Loads the checkpoint for `weather` from `dir`, building the architecture it was
    /// saved with.
    pub fn from_dir<P: AsRef<Path>>(weather: Weather, dir: P) -> Result<Self> {
        let checkpoint = Checkpoint::open(Checkpoint::path_in(dir.as_ref(), weather))?;
        let header = checkpoint.header()?;

        if header.weather != weather {
            return Err(NetErr::WeatherMismatch {
                expected: weather,
                got: header.weather,
            });
        }

        let (features, regressor, layout) = Self::build(&header.config)?;
        let total = layout.total();
        let mut params = Params::new(layout, vec![0.; total])?;
        checkpoint.restore(&mut params)?;

        info!(
            weather = weather.as_str(), params = params.len();
            "loaded {}", checkpoint.path().display()
        );

        Ok(Self {
            weather,
            config: header.config,
            features,
            regressor,
            params,
        })
    }

    /// Builds both stacks and checks they fit together for the configured input size.
    fn build(config: &ArchConfig) -> Result<(Sequential, Sequential, ParameterLayout)> {
        config.validate()?;
        let features = config.features()?;
        let regressor = config.regressor()?;

        let feature_map = features.output_shape(&config.input_shape(1))?;
        let flat = Flatten::new().output_shape(&feature_map)?;
        if flat != [1, config.flat_features] {
            return Err(MlErr::ShapeMismatch {
                what: "flattened features",
                got: flat,
                expected: vec![1, config.flat_features],
            }
            .into());
        }
        regressor.output_shape(&flat)?;

        debug!("feature map {feature_map:?} flattens to {flat:?}");

        let specs = features
            .param_specs("features")
            .into_iter()
            .chain(regressor.param_specs("regressor"));
        let layout = ParameterLayout::new(specs)?;

        Ok((features, regressor, layout))
    }

    pub fn weather(&self) -> Weather {
        self.weather
    }

    pub fn config(&self) -> &ArchConfig {
        &self.config
    }

    pub fn features(&self) -> &Sequential {
        &self.features
    }

    pub fn regressor(&self) -> &Sequential {
        &self.regressor
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Mutable access for trainers and optimizers.
    pub fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }

    /// The amount of trainable scalars, batch norm buffers excluded.
    pub fn num_params(&self) -> usize {
        self.params.num_trainable()
    }

    /// Predicts one score per image in evaluation mode.
    ///
    /// # Arguments
    /// * `batch` - Images shaped `(B, C, H, W)` matching the configured input.
    ///
    /// # Returns
    /// The `(B, 1)` predictions.
    pub fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>> {
        let (prediction, _) = self.run(batch, &mut Mode::Eval)?;
        Ok(prediction)
    }

    /// Makes a forward pass in the given mode. In training mode the batch norm running
    /// statistics are updated once the pass succeeds.
    pub fn forward(
        &mut self,
        batch: ArrayView4<'_, f32>,
        mode: &mut Mode<'_>,
    ) -> Result<Array2<f32>> {
        let (prediction, updates) = self.run(batch, mode)?;

        if !updates.is_empty() {
            debug!("committing {} buffer updates", updates.len());
            self.params.apply(&updates)?;
        }

        Ok(prediction)
    }

    /// Makes a forward pass in the mode named `mode`, as read from a run configuration.
    ///
    /// # Returns
    /// An `InvalidMode` error if the name is not recognised. A missing name runs in
    /// evaluation mode and leaves `rng` untouched.
    pub fn forward_named(
        &mut self,
        batch: ArrayView4<'_, f32>,
        mode: Option<&str>,
        rng: &mut dyn RngCore,
    ) -> Result<Array2<f32>> {
        let kind = ModeKind::resolve(mode)?;
        self.forward(batch, &mut kind.with_rng(rng))
    }

    /// The forward pass as a function of the input, the parameters and the mode. The
    /// buffer writes a training-mode pass produces are returned instead of applied.
    pub fn run(
        &self,
        batch: ArrayView4<'_, f32>,
        mode: &mut Mode<'_>,
    ) -> Result<(Array2<f32>, Vec<StateUpdate>)> {
        self.check_input(batch.shape())?;
        let (feature_params, regressor_params) = self.split_params()?;

        let features = self
            .features
            .forward(feature_params, batch.to_owned().into_dyn(), mode)?;
        debug!("{} feature map {:?}", mode.kind(), features.output.shape());

        let flat = Flatten::new().forward(features.output)?;
        let out = self.regressor.forward(regressor_params, flat, mode)?;

        let offset = self.features.size();
        let updates = features
            .updates
            .into_iter()
            .chain(out.updates.into_iter().map(|update| update.shifted(offset)))
            .collect();

        Ok((into_fixed::<Ix2>(out.output)?, updates))
    }

    /// Runs only the convolutional stages, in evaluation mode.
    pub fn extract_features(&self, batch: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        self.check_input(batch.shape())?;
        let (feature_params, _) = self.split_params()?;

        let features = self
            .features
            .forward(feature_params, batch.to_owned().into_dyn(), &mut Mode::Eval)?;

        into_fixed::<Ix4>(features.output)
    }

    /// Reshapes a feature map from `extract_features` into one row per sample.
    ///
    /// # Returns
    /// A `ShapeMismatch` unless the map has the extractor's output channels and flattens
    /// to the regressor's input width.
    pub fn flatten(&self, feature_map: ArrayView4<'_, f32>) -> Result<Array2<f32>> {
        let shape = feature_map.shape();
        let (batch, channels) = (shape[0], shape[1]);
        let flat = Flatten::new().output_shape(shape)?;

        if batch == 0
            || Some(&channels) != self.config.channels.last()
            || flat != [batch, self.config.flat_features]
        {
            return Err(MlErr::ShapeMismatch {
                what: "feature map",
                got: shape.to_vec(),
                expected: self
                    .features
                    .output_shape(&self.config.input_shape(batch.max(1)))?,
            }
            .into());
        }

        let flat = Flatten::new().forward(feature_map.to_owned().into_dyn())?;
        into_fixed::<Ix2>(flat)
    }

    /// The path this model saves to inside `dir`.
    pub fn checkpoint_path<P: AsRef<Path>>(&self, dir: P) -> PathBuf {
        Checkpoint::path_in(dir.as_ref(), self.weather)
    }

    /// Writes the parameters to `<dir>/sunset_<weather>.safetensors`, creating `dir` if
    /// needed.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        fs::create_dir_all(dir.as_ref())?;
        let path = self.checkpoint_path(dir);

        Checkpoint::write(&path, self.weather, &self.config, &self.params)?;
        info!(weather = self.weather.as_str(); "saved {}", path.display());

        Ok(path)
    }

    /// Replaces the parameters with the ones saved for this model's weather in `dir`.
    ///
    /// # Returns
    /// A `WeatherMismatch` if the file was written for another weather and an
    /// `InvalidCheckpoint` if it describes a different architecture.
    pub fn load<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        let checkpoint = Checkpoint::open(self.checkpoint_path(dir))?;
        let header = checkpoint.header()?;

        if header.weather != self.weather {
            return Err(NetErr::WeatherMismatch {
                expected: self.weather,
                got: header.weather,
            });
        }

        if !header.config.same_topology(&self.config) {
            return Err(NetErr::InvalidCheckpoint(format!(
                "{} was saved for a different architecture",
                checkpoint.path().display()
            )));
        }

        checkpoint.restore(&mut self.params)?;
        info!(weather = self.weather.as_str(); "loaded {}", checkpoint.path().display());

        Ok(())
    }

    /// Checks a batch before any computation: at least one sample, the configured input
    /// channels, and a spatial size the pooling windows tile exactly and that flattens to
    /// `flat_features`. Any such size is accepted, not only `input_size`.
    fn check_input(&self, shape: &[usize]) -> Result<()> {
        let batch = shape.first().copied().unwrap_or(0);
        let mismatch = || -> NetErr {
            MlErr::ShapeMismatch {
                what: "input batch",
                got: shape.to_vec(),
                expected: self.config.input_shape(batch.max(1)).to_vec(),
            }
            .into()
        };

        if batch == 0 || shape.get(1) != Some(&self.config.in_channels) {
            return Err(mismatch());
        }

        let mut map = shape.to_vec();
        for layer in self.features.layers() {
            if let Layer::MaxPool2d(pool) = layer {
                if !pool.tiles(&map) {
                    return Err(mismatch());
                }
            }
            map = layer.output_shape(&map)?;
        }

        if Flatten::new().output_shape(&map)? != [batch, self.config.flat_features] {
            return Err(mismatch());
        }

        Ok(())
    }

    fn split_params(&self) -> Result<(&[f32], &[f32])> {
        let params = self.params.as_slice();
        let split = self.features.size();

        params.split_at_checked(split).ok_or_else(|| {
            MlErr::SizeMismatch {
                what: "model parameters",
                got: params.len(),
                expected: split,
            }
            .into()
        })
    }
}

fn into_fixed<D: Dimension>(x: ArrayD<f32>) -> Result<ndarray::Array<f32, D>> {
    Ok(x.into_dimensionality::<D>().map_err(MlErr::from)?)
}

#[cfg(test)]
mod tests {
    use ndarray::{Array, Axis};

    use super::*;
    use crate::ParamKind;

    fn tiny() -> ArchConfig {
        ArchConfig {
            input_size: [8, 8],
            channels: vec![2, 4],
            flat_features: 16,
            hidden: 8,
            seed: Some(42),
            ..Default::default()
        }
    }

    fn images(batch: usize) -> Array4<f32> {
        Array::from_shape_fn((batch, 3, 8, 8), |(n, c, i, j)| {
            ((n * 7 + c * 5 + i * 3 + j) % 11) as f32 / 11.
        })
    }

    #[test]
    fn predicts_one_value_per_sample() {
        let net = SunsetNet::with_config(Weather::Sunny, tiny()).unwrap();

        for batch in 1..=4 {
            let y = net.predict(images(batch).view()).unwrap();
            assert_eq!(y.dim(), (batch, 1));
        }
    }

    #[test]
    fn empty_batch_is_rejected() {
        let net = SunsetNet::with_config(Weather::Sunny, tiny()).unwrap();
        let err = net.predict(Array4::zeros((0, 3, 8, 8)).view()).unwrap_err();

        assert!(matches!(err, NetErr::Ml(MlErr::ShapeMismatch { .. })));
    }

    #[test]
    fn any_size_with_the_same_flat_width_is_accepted() {
        let net = SunsetNet::with_config(Weather::Sunny, tiny()).unwrap();
        let tall = Array::from_shape_fn((2, 3, 16, 4), |(n, _, i, j)| (n + i + j) as f32);

        assert_eq!(net.predict(tall.view()).unwrap().dim(), (2, 1));
        let map = net.extract_features(tall.view()).unwrap();
        assert_eq!(net.flatten(map.view()).unwrap().dim(), (2, 16));

        for (h, w) in [(8, 9), (4, 4)] {
            assert!(matches!(
                net.predict(Array4::zeros((1, 3, h, w)).view()),
                Err(NetErr::Ml(MlErr::ShapeMismatch { what: "input batch", .. }))
            ));
        }
    }

    #[test]
    fn named_modes_drive_the_pass() {
        let mut net = SunsetNet::with_config(Weather::Cloudy, tiny()).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let x = images(2);

        let expected = net.predict(x.view()).unwrap();
        let before = net.params().as_slice().to_vec();
        assert_eq!(net.forward_named(x.view(), None, &mut rng).unwrap(), expected);
        assert_eq!(net.forward_named(x.view(), Some("eval"), &mut rng).unwrap(), expected);
        assert_eq!(net.params().as_slice(), before.as_slice());

        assert!(matches!(
            net.forward_named(x.view(), Some("bogus"), &mut rng),
            Err(NetErr::Ml(MlErr::InvalidMode(_)))
        ));
        assert_eq!(net.params().as_slice(), before.as_slice());

        let y = net.forward_named(x.view(), Some("train"), &mut rng).unwrap();
        assert_eq!(y.dim(), (2, 1));
        assert_ne!(net.params().as_slice(), before.as_slice());
    }

    #[test]
    fn wrong_flat_width_fails_at_construction() {
        let config = ArchConfig {
            flat_features: 32,
            ..tiny()
        };

        assert!(matches!(
            SunsetNet::with_config(Weather::Cloudy, config),
            Err(NetErr::Ml(MlErr::ShapeMismatch {
                what: "flattened features",
                ..
            }))
        ));
    }

    #[test]
    fn pipeline_stages_compose() {
        let net = SunsetNet::with_config(Weather::Overcast, tiny()).unwrap();
        let x = images(2);

        let map = net.extract_features(x.view()).unwrap();
        assert_eq!(map.dim(), (2, 4, 2, 2));

        let flat = net.flatten(map.view()).unwrap();
        assert_eq!(flat.dim(), (2, 16));
        let second: Vec<f32> = map.index_axis(Axis(0), 1).iter().copied().collect();
        assert_eq!(flat.row(1).to_vec(), second);

        assert!(matches!(
            net.flatten(Array4::zeros((2, 4, 3, 3)).view()),
            Err(NetErr::Ml(MlErr::ShapeMismatch { .. }))
        ));
    }

    #[test]
    fn run_returns_updates_without_applying_them() {
        let net = SunsetNet::with_config(Weather::Sunny, tiny()).unwrap();
        let before = net.params().as_slice().to_vec();
        let mut rng = StdRng::seed_from_u64(1);

        let (_, updates) = net.run(images(3).view(), &mut Mode::train(&mut rng)).unwrap();

        assert_eq!(updates.len(), 2);
        assert_eq!(net.params().as_slice(), before.as_slice());

        let running_mean = net.params().layout().get("features.6.running_mean").unwrap();
        assert_eq!(updates[1].offset, running_mean.range.start);
    }

    #[test]
    fn buffers_are_not_trainable() {
        let net = SunsetNet::with_config(Weather::Sunny, tiny()).unwrap();
        let buffers: usize = net
            .params()
            .layout()
            .iter()
            .filter(|entry| matches!(entry.kind, ParamKind::RunningMean | ParamKind::RunningVar))
            .map(|entry| entry.len())
            .sum();

        assert_eq!(buffers, 2 * (2 + 4));
        assert_eq!(net.num_params() + buffers, net.params().len());
    }
}
