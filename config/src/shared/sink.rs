use serde::Deserialize;

use crate::shared::{PgConnectionConfig, ValidationError};

const fn default_max_connections() -> u32 {
    SinkConfig::DEFAULT_MAX_CONNECTIONS
}

/// Configuration of the relational store the migration writes to.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkConfig {
    /// Keeps written rows in memory. Useful for dry runs.
    Memory,
    /// Writes rows to a Postgres database.
    Postgres {
        connection: PgConnectionConfig,
        /// Schema holding the target tables.
        #[serde(default = "default_schema")]
        schema: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_schema() -> String {
    SinkConfig::DEFAULT_SCHEMA.to_string()
}

impl SinkConfig {
    pub const DEFAULT_SCHEMA: &'static str = "public";

    pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            SinkConfig::Memory => Ok(()),
            SinkConfig::Postgres {
                connection,
                schema,
                max_connections,
            } => {
                connection.validate()?;

                if schema.is_empty() {
                    return Err(ValidationError::invalid("sink.schema", "must not be empty"));
                }

                if *max_connections == 0 {
                    return Err(ValidationError::invalid(
                        "sink.max_connections",
                        "must be greater than 0",
                    ));
                }

                Ok(())
            }
        }
    }
}
