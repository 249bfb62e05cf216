//! Configuration for the migration workspace.
//!
//! Holds the runtime [`environment::Environment`], the hierarchical loader in [`load`] and the
//! shared configuration types consumed by the migration engine and the runner binary.

pub mod environment;
mod load;
pub mod shared;

pub use load::{Config, LoadConfigError, load_config, load_config_from};
