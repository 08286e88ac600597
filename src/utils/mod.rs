//! The `utils` module provides definitions shared across the `relaystore`
//! crate: the error taxonomy and the logging bootstrap.

pub mod error;
pub mod logging;

pub use error::{Result, StoreError};

#[cfg(test)]
mod tests {
    use super::StoreError;
    use super::logging;
    use serial_test::serial;
    use tracing::level_filters::LevelFilter;

    #[test]
    #[serial]
    fn test_filter_scopes_level_to_crate() {
        temp_env::with_var_unset("RUST_LOG", || {
            let debug = logging::filter("debug");
            assert!(debug.to_string().to_lowercase().contains("relaystore=debug"));
            assert_eq!(debug.max_level_hint(), Some(LevelFilter::DEBUG));

            assert!(logging::filter("WARNING").to_string().to_lowercase().contains("relaystore=warn"));
            assert!(logging::filter("loud").to_string().to_lowercase().contains("relaystore=info"));
        });
    }

    #[test]
    #[serial]
    fn test_rust_log_overrides_configured_level() {
        temp_env::with_var("RUST_LOG", Some("sled=trace"), || {
            let filter = logging::filter("error");
            assert!(!filter.to_string().contains("relaystore"));
            assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
        });
    }

    #[tokio::test]
    async fn test_failed_task_is_not_reported_as_corruption() {
        let joined =
            tokio::task::spawn_blocking(|| -> super::Result<usize> { panic!("sweep blew up") }).await;
        let err = StoreError::from(joined.unwrap_err());
        assert!(matches!(err, StoreError::Task(_)));
        assert!(err.to_string().starts_with("store task failed"));
    }
}
