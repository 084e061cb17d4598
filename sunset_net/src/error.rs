use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use safetensors::SafeTensorError;
use sunset_ml::MlErr;

use crate::Weather;

/// The result type used across the sunset model crate.
pub type Result<T> = std::result::Result<T, NetErr>;

/// The sunset model's error type.
#[derive(Debug)]
pub enum NetErr {
    Ml(MlErr),
    Io(io::Error),
    Checkpoint(SafeTensorError),
    Config(serde_json::Error),
    MissingTensor(String),
    /// A checkpoint was written for a different weather than the model expects.
    WeatherMismatch {
        expected: Weather,
        got: Weather,
    },
    UnknownWeather(String),
    InvalidCheckpoint(String),
}

impl Display for NetErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetErr::Ml(e) => write!(f, "{e}"),
            NetErr::Io(e) => write!(f, "io error: {e}"),
            NetErr::Checkpoint(e) => write!(f, "checkpoint error: {e}"),
            NetErr::Config(e) => write!(f, "invalid config file: {e}"),
            NetErr::MissingTensor(name) => write!(f, "checkpoint has no tensor '{name}'"),
            NetErr::WeatherMismatch { expected, got } => write!(
                f,
                "checkpoint weather mismatch, got {got} and expected {expected}"
            ),
            NetErr::UnknownWeather(name) => write!(
                f,
                "unknown weather '{name}', expected 'sunny', 'cloudy' or 'overcast'"
            ),
            NetErr::InvalidCheckpoint(msg) => write!(f, "invalid checkpoint: {msg}"),
        }
    }
}

impl Error for NetErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NetErr::Ml(e) => Some(e),
            NetErr::Io(e) => Some(e),
            NetErr::Checkpoint(e) => Some(e),
            NetErr::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlErr> for NetErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<io::Error> for NetErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SafeTensorError> for NetErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Checkpoint(value)
    }
}

impl From<serde_json::Error> for NetErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Config(value)
    }
}
