//! Shared data model.

mod artifact;
mod diagnosis;
mod distro;
mod enrollment;
mod history;
mod identity;
mod signing;
mod trust;
mod verification;

pub use artifact::*;
pub use diagnosis::*;
pub use distro::*;
pub use enrollment::*;
pub use history::*;
pub use identity::*;
pub use signing::*;
pub use trust::*;
pub use verification::*;
