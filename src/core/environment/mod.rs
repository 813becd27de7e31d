//! Named validator startup configurations.

mod registry;
mod types;

pub use registry::{validate_name, EnvironmentRegistry, DEFAULT_ENVIRONMENT, RESERVED_NAMES};
pub use types::{
    CloneOptions, Environment, EnvironmentOptions, EnvironmentPatch, EnvironmentSummary,
    ProgramSpec,
};
