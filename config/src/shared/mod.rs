//! Shared configuration types for migration runs.

mod base;
mod batch;
mod checkpoint_store;
mod connection;
mod diagnostics;
mod migration;
mod retry;
mod runner;
mod sink;
mod source;

pub use base::{SecretString, ValidationError};
pub use batch::BatchConfig;
pub use checkpoint_store::CheckpointStoreConfig;
pub use connection::{IntoConnectOptions, MySqlConnectionConfig, PgConnectionConfig, TlsConfig};
pub use diagnostics::DiagnosticsConfig;
pub use migration::MigrationConfig;
pub use retry::RetryConfig;
pub use runner::RunnerConfig;
pub use sink::SinkConfig;
pub use source::SourceConfig;
