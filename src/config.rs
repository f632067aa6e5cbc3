use crate::error::ConfigError;
use config::{Config, Environment};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default timeout for store connection and lock waits
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 10;

/// Metaserver configuration loaded from the file given on the command line
#[derive(Debug, Clone, Deserialize)]
pub struct MetaConfig {
    /// Store driver identifier (e.g. `sqlite`)
    pub db_driver: String,

    /// Store host; for SQLite, the database file path or `:memory:`
    pub db_host: String,

    pub db_user: String,

    pub db_password: String,

    /// Upper bound for connecting and waiting on store locks
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
}

fn default_store_timeout_secs() -> u64 {
    DEFAULT_STORE_TIMEOUT_SECS
}

#[cfg(test)]
const EXAMPLE_CONFIG: &str = r#"### metaserver configuration file

### backing store
db_driver = "sqlite"
db_host = "/var/lib/metaserver/catalog.sqlite3"
db_user = "meta"
db_password = ""

### seconds to wait for the store before giving up
# store_timeout_secs = 10
"#;

impl MetaConfig {
    /// Load the configuration file at `path`
    ///
    /// Settings from the environment with a `METASERVER` prefix override the
    /// file, e.g. `METASERVER_DB_HOST=/tmp/catalog.db`.
    pub fn new(path: &str) -> Result<MetaConfig, ConfigError> {
        Self::load(path, Environment::with_prefix("METASERVER"))
    }

    fn load(path: &str, env: Environment) -> Result<MetaConfig, ConfigError> {
        let file = Path::new(path);
        if !file.is_file() {
            return Err(ConfigError::NotFound(path.to_string()));
        }

        let settings = Config::builder()
            .add_source(config::File::from(file).format(config::FileFormat::Toml))
            .add_source(env)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to read {}: {}", path, e)))?;

        settings
            .try_deserialize::<MetaConfig>()
            .map_err(|e| ConfigError::Invalid(format!("{}: {}", path, e)))
    }

    /// Store timeout as Duration
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs.max(1))
    }

    /// One-line summary with the password redacted
    pub fn summary(&self) -> String {
        format!(
            "driver={} host={} user={} password={} store_timeout={}s",
            self.db_driver,
            self.db_host,
            self.db_user,
            if self.db_password.is_empty() {
                "<empty>"
            } else {
                "<redacted>"
            },
            self.store_timeout_secs
        )
    }
}
