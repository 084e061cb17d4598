pub mod layers;
mod mode;
mod sequential;

pub use mode::{Mode, ModeKind};
pub use sequential::{Forward, Sequential};
