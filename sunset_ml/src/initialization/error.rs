use std::{
    error::Error,
    fmt::{self, Display},
};

use rand_distr::uniform::Error as UniformError;

/// Error returned by the `RandParamGen` constructors whenever the requested distribution
/// cannot be built from the given arguments.
#[derive(Debug)]
pub struct RandErr(String);

impl RandErr {
    pub(super) fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<UniformError> for RandErr {
    fn from(value: UniformError) -> Self {
        Self(value.to_string())
    }
}

impl Display for RandErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for RandErr {}
