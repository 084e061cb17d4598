pub mod checkpoint;
pub mod config;
pub mod error;
pub mod model;
pub mod shared;
pub mod weather;

pub use config::ArchConfig;
pub use error::{NetErr, Result};
pub use model::SunsetNet;
pub use shared::SharedSunsetNet;
pub use sunset_ml::{
    arch::{Mode, ModeKind},
    params::{ParamEntry, ParamKind, Params, StateUpdate},
};
pub use weather::Weather;
