use std::{
    borrow::Cow,
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use log::warn;
use safetensors::{Dtype, SafeTensorError, SafeTensors, View};
use sunset_ml::{MlErr, params::Params};

use crate::{ArchConfig, NetErr, Result, Weather};

const WEATHER_KEY: &str = "weather";
const ARCH_KEY: &str = "arch";

/// What a checkpoint says about the model that wrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub weather: Weather,
    pub config: ArchConfig,
}

/// A safetensors file holding one parameter set.
///
/// Tensors are stored under their parameter names as little-endian `F32`. The weather tag
/// and the JSON architecture travel in the file's metadata.
#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl Checkpoint {
    /// The path of the checkpoint for `weather` inside `dir`.
    pub fn path_in(dir: &Path, weather: Weather) -> PathBuf {
        dir.join(weather.file_name())
    }

    /// Reads the whole file into memory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bytes = fs::read(&path)?;
        Ok(Self { path, bytes })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> Result<Header> {
        let (_, metadata) = SafeTensors::read_metadata(&self.bytes)?;
        let info = metadata
            .metadata()
            .as_ref()
            .ok_or_else(|| NetErr::InvalidCheckpoint("missing metadata".into()))?;

        let field = |key: &str| {
            info.get(key)
                .ok_or_else(|| NetErr::InvalidCheckpoint(format!("missing '{key}' metadata")))
        };

        Ok(Header {
            weather: field(WEATHER_KEY)?.parse()?,
            config: serde_json::from_str(field(ARCH_KEY)?)?,
        })
    }

    /// Copies every tensor of `params`' layout from the checkpoint.
    ///
    /// # Returns
    /// An error if a tensor is missing or has the wrong dtype or shape. `params` is left
    /// untouched on error.
    pub fn restore(&self, params: &mut Params) -> Result<()> {
        let tensors = SafeTensors::deserialize(&self.bytes)?;
        let layout = params.layout();
        let mut values = vec![0.; layout.total()];

        for entry in layout.iter() {
            let view = tensors.tensor(&entry.name).map_err(|e| match e {
                SafeTensorError::TensorNotFound(_) => NetErr::MissingTensor(entry.name.clone()),
                e => e.into(),
            })?;

            if view.dtype() != Dtype::F32 {
                return Err(NetErr::InvalidCheckpoint(format!(
                    "tensor '{}' is {:?}, expected F32",
                    entry.name,
                    view.dtype()
                )));
            }

            if view.shape() != entry.shape.as_slice() {
                return Err(MlErr::ShapeMismatch {
                    what: "checkpoint tensor",
                    got: view.shape().to_vec(),
                    expected: entry.shape.clone(),
                }
                .into());
            }

            let dst = &mut values[entry.range.clone()];
            for (v, bytes) in dst.iter_mut().zip(view.data().chunks_exact(4)) {
                *v = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
        }

        for name in tensors.names() {
            if layout.get(name).is_none() {
                warn!("ignoring unknown tensor '{name}' in {}", self.path.display());
            }
        }

        params.as_mut_slice().copy_from_slice(&values);
        Ok(())
    }

    /// Writes `params` and its header to `path`, replacing any previous file.
    pub fn write(
        path: &Path,
        weather: Weather,
        config: &ArchConfig,
        params: &Params,
    ) -> Result<()> {
        let metadata = HashMap::from([
            (WEATHER_KEY.to_string(), weather.to_string()),
            (ARCH_KEY.to_string(), config.to_json()?),
        ]);

        let tensors = params.named().map(|(entry, values)| {
            (
                entry.name.as_str(),
                F32Tensor {
                    shape: &entry.shape,
                    values,
                },
            )
        });

        safetensors::serialize_to_file(tensors, &Some(metadata), path)?;
        Ok(())
    }
}

/// A borrowed `f32` tensor encoded on demand.
struct F32Tensor<'a> {
    shape: &'a [usize],
    values: &'a [f32],
}

impl View for F32Tensor<'_> {
    fn dtype(&self) -> Dtype {
        Dtype::F32
    }

    fn shape(&self) -> &[usize] {
        self.shape
    }

    fn data(&self) -> Cow<'_, [u8]> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn data_len(&self) -> usize {
        self.values.len() * size_of::<f32>()
    }
}
