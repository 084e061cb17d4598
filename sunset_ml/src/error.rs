use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;

use crate::initialization::RandErr;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    /// A tensor reached a layer with the wrong rank, channel count or spatial size.
    ShapeMismatch {
        what: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    /// A flat buffer or slice does not have the length its owner expects.
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    InvalidMode(String),
    UnknownParam(String),
    InvalidConfig(String),
    Init(RandErr),
    Layout(ShapeError),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch in {what}, got {got:?} and expected {expected:?}"
            ),
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::InvalidMode(mode) => {
                write!(f, "invalid mode '{mode}', expected 'train' or 'eval'")
            }
            MlErr::UnknownParam(name) => write!(f, "unknown parameter '{name}'"),
            MlErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            MlErr::Init(e) => write!(f, "parameter initialization failed: {e}"),
            MlErr::Layout(e) => write!(f, "array layout error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Init(e) => Some(e),
            MlErr::Layout(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RandErr> for MlErr {
    fn from(value: RandErr) -> Self {
        Self::Init(value)
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Layout(value)
    }
}
