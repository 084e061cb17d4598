use std::{fmt, str::FromStr};

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

/// Selects how dropout and batch normalization behave during a forward pass.
///
/// The mode is an explicit argument of every forward pass instead of state stored in
/// the layers. Training mode carries the random number generator dropout draws from.
#[derive(Default)]
pub enum Mode<'r> {
    /// Dropout is the identity and batch normalization uses its running statistics.
    #[default]
    Eval,
    /// Dropout zeroes activations at random and batch normalization uses the statistics
    /// of the current batch.
    Train { rng: &'r mut dyn RngCore },
}

impl<'r> Mode<'r> {
    pub fn train(rng: &'r mut dyn RngCore) -> Self {
        Self::Train { rng }
    }

    pub fn is_train(&self) -> bool {
        matches!(self, Mode::Train { .. })
    }

    pub fn kind(&self) -> ModeKind {
        match self {
            Mode::Eval => ModeKind::Eval,
            Mode::Train { .. } => ModeKind::Train,
        }
    }
}

impl fmt::Debug for Mode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mode::{:?}", self.kind())
    }
}

/// The name of a mode, as it appears in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    Train,
    #[default]
    Eval,
}

impl ModeKind {
    /// Resolves an optional mode name. A missing name means evaluation, so an inference
    /// call that forgets to pick a mode never applies dropout.
    ///
    /// # Returns
    /// An `InvalidMode` error if the name is present but not recognised.
    pub fn resolve(name: Option<&str>) -> Result<Self> {
        match name {
            Some(name) => name.parse(),
            None => {
                log::debug!("no mode given, defaulting to eval");
                Ok(Self::Eval)
            }
        }
    }
}

impl ModeKind {
    /// Builds the mode, handing `rng` to training passes.
    pub fn with_rng<'r>(self, rng: &'r mut dyn RngCore) -> Mode<'r> {
        match self {
            ModeKind::Train => Mode::train(rng),
            ModeKind::Eval => Mode::Eval,
        }
    }
}

impl FromStr for ModeKind {
    type Err = MlErr;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "train" | "training" => Ok(Self::Train),
            "eval" | "evaluation" | "inference" => Ok(Self::Eval),
            _ => Err(MlErr::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeKind::Train => f.write_str("train"),
            ModeKind::Eval => f.write_str("eval"),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn default_is_eval() {
        let _ = env_logger::builder().is_test(true).try_init();

        assert!(!Mode::default().is_train());
        assert_eq!(ModeKind::default(), ModeKind::Eval);
        assert_eq!(ModeKind::resolve(None).unwrap(), ModeKind::Eval);
    }

    #[test]
    fn parses_names() {
        assert_eq!(ModeKind::resolve(Some("Train")).unwrap(), ModeKind::Train);
        assert_eq!("inference".parse::<ModeKind>().unwrap(), ModeKind::Eval);
        assert!(matches!(
            ModeKind::resolve(Some("sometimes")),
            Err(MlErr::InvalidMode(_))
        ));
    }

    #[test]
    fn kind_builds_matching_mode() {
        let mut rng = StdRng::seed_from_u64(0);

        assert!(ModeKind::Train.with_rng(&mut rng).is_train());
        assert!(!ModeKind::Eval.with_rng(&mut rng).is_train());
    }

    #[test]
    fn train_mode_reports_kind() {
        let mut rng = StdRng::seed_from_u64(0);
        let mode = Mode::train(&mut rng);

        assert!(mode.is_train());
        assert_eq!(mode.kind(), ModeKind::Train);
        assert_eq!(mode.kind().to_string(), "train");
    }
}
