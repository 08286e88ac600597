use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the message store, the housekeeper and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub store: StoreSettings,
    pub housekeeper: HousekeeperSettings,
    pub log: LogSettings,
}

/// Configuration settings for the message store.
///
/// `capacity` is the maximum number of records kept per store.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreSettings {
    pub data_dir: String,
    pub capacity: usize,
    /// Flush to disk before every mutating call returns.
    pub sync_writes: bool,
}

/// Configuration settings for the periodic purge of completed records.
#[derive(Debug, Deserialize, Clone)]
pub struct HousekeeperSettings {
    pub interval_secs: u64,
    pub purge_age_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub store: Option<PartialStoreSettings>,
    pub housekeeper: Option<PartialHousekeeperSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialStoreSettings {
    pub data_dir: Option<String>,
    pub capacity: Option<usize>,
    pub sync_writes: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PartialHousekeeperSettings {
    pub interval_secs: Option<u64>,
    pub purge_age_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            store: StoreSettings {
                data_dir: "relaystore_db".to_string(),
                capacity: 10_000,
                sync_writes: true,
            },
            housekeeper: HousekeeperSettings {
                interval_secs: 900,
                purge_age_secs: 60,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
