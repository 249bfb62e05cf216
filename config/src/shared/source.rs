use serde::Deserialize;

use crate::shared::{MySqlConnectionConfig, ValidationError};

const fn default_max_connections() -> u32 {
    SourceConfig::DEFAULT_MAX_CONNECTIONS
}

fn default_table_prefix() -> String {
    SourceConfig::DEFAULT_TABLE_PREFIX.to_string()
}

/// Configuration of the legacy content store the migration reads from.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceConfig {
    /// A WordPress database accessed over MySQL.
    #[serde(rename = "wordpress")]
    WordPress {
        connection: MySqlConnectionConfig,
        /// Prefix of the WordPress tables, `wp_` unless the site was installed with a custom one.
        #[serde(default = "default_table_prefix")]
        table_prefix: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

impl SourceConfig {
    pub const DEFAULT_TABLE_PREFIX: &'static str = "wp_";

    pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            SourceConfig::WordPress {
                connection,
                table_prefix,
                max_connections,
            } => {
                connection.validate()?;

                if !table_prefix
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    return Err(ValidationError::invalid(
                        "source.table_prefix",
                        "must only contain ASCII letters, digits and underscores",
                    ));
                }

                if *max_connections == 0 {
                    return Err(ValidationError::invalid(
                        "source.max_connections",
                        "must be greater than 0",
                    ));
                }

                Ok(())
            }
        }
    }
}
