mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{HousekeeperSettings, LogSettings, Settings, StoreSettings};

const DEFAULT_FILE: &str = "config/default";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(DEFAULT_FILE)
}

/// Like [`load_config`], reading the optional file at `path` (extension may
/// be omitted). Environment variables look like
/// `RELAYSTORE_STORE__CAPACITY=500` and win over the file.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("RELAYSTORE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();
    let store = partial.store;
    let housekeeper = partial.housekeeper;
    let log = partial.log;

    Ok(Settings {
        store: StoreSettings {
            data_dir: store
                .as_ref()
                .and_then(|s| s.data_dir.clone())
                .unwrap_or(default.store.data_dir),
            capacity: store
                .as_ref()
                .and_then(|s| s.capacity)
                .unwrap_or(default.store.capacity),
            sync_writes: store
                .as_ref()
                .and_then(|s| s.sync_writes)
                .unwrap_or(default.store.sync_writes),
        },
        housekeeper: HousekeeperSettings {
            interval_secs: housekeeper
                .as_ref()
                .and_then(|h| h.interval_secs)
                .unwrap_or(default.housekeeper.interval_secs),
            purge_age_secs: housekeeper
                .as_ref()
                .and_then(|h| h.purge_age_secs)
                .unwrap_or(default.housekeeper.purge_age_secs),
        },
        log: LogSettings {
            level: log
                .and_then(|l| l.level)
                .unwrap_or(default.log.level),
        },
    })
}

#[cfg(test)]
mod tests;
