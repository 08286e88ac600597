use super::settings::Settings;
use super::load_config_from;
use serial_test::serial;
use std::fs;
use tempfile::TempDir;

const ENV_VARS: [&str; 3] = [
    "RELAYSTORE_STORE__CAPACITY",
    "RELAYSTORE_STORE__DATA_DIR",
    "RELAYSTORE_HOUSEKEEPER__PURGE_AGE_SECS",
];

fn without_env<F: FnOnce()>(f: F) {
    temp_env::with_vars_unset(ENV_VARS, f);
}

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.store.data_dir, "relaystore_db");
    assert_eq!(settings.store.capacity, 10_000);
    assert!(settings.store.sync_writes);
    assert_eq!(settings.housekeeper.interval_secs, 900);
    assert_eq!(settings.housekeeper.purge_age_secs, 60);
    assert_eq!(settings.log.level, "info");
}

#[test]
#[serial]
fn missing_file_yields_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("absent");

    without_env(|| {
        let cfg = load_config_from(path.to_str().unwrap()).expect("load_config failed");
        assert_eq!(cfg.store.capacity, 10_000);
        assert_eq!(cfg.housekeeper.purge_age_secs, 60);
    });
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("default.toml");
    let toml = r#"
        [store]
        data_dir = "/var/lib/relaystore"
        capacity = 250

        [housekeeper]
        interval_secs = 30

        [log]
        level = "debug"
    "#;
    fs::write(&path, toml).expect("write config file");

    without_env(|| {
        let cfg = load_config_from(path.to_str().unwrap()).expect("load_config failed");
        assert_eq!(cfg.store.data_dir, "/var/lib/relaystore");
        assert_eq!(cfg.store.capacity, 250);
        assert!(cfg.store.sync_writes);
        assert_eq!(cfg.housekeeper.interval_secs, 30);
        assert_eq!(cfg.housekeeper.purge_age_secs, 60);
        assert_eq!(cfg.log.level, "debug");
    });
}

#[test]
#[serial]
fn environment_overrides_file() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("default.toml");
    fs::write(&path, "[store]\ncapacity = 250\n").expect("write config file");

    temp_env::with_vars(
        [
            ("RELAYSTORE_STORE__CAPACITY", Some("500")),
            ("RELAYSTORE_STORE__DATA_DIR", Some("/tmp/outbox")),
            ("RELAYSTORE_HOUSEKEEPER__PURGE_AGE_SECS", Some("5")),
        ],
        || {
            let cfg = load_config_from(path.to_str().unwrap()).expect("load_config failed");
            assert_eq!(cfg.store.capacity, 500);
            assert_eq!(cfg.store.data_dir, "/tmp/outbox");
            assert_eq!(cfg.housekeeper.purge_age_secs, 5);
        },
    );
}
