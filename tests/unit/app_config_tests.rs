/*!
 * Tests for application configuration functionality
 */

use anyhow::Result;
use subrelay::app_config::{Config, LogLevel, TranslationProvider};

use crate::common;

/// Test default configuration values
#[test]
fn test_default_config_withNoParameters_shouldHaveCorrectDefaults() {
    let config = Config::default();

    assert_eq!(config.source_language, "en");
    assert_eq!(config.target_language, "nl");
    assert_eq!(config.translation.provider, TranslationProvider::Gemini);
    assert_eq!(config.translation.common.retry_count, 3);
    assert_eq!(config.translation.common.retry_backoff_ms, 1000);

    assert_eq!(config.batching.starting_batch_count, 5);
    assert_eq!(config.batching.priority_window, 30);
    assert_eq!(config.batching.context_window, 100);
    assert_eq!(config.batching.max_entries_per_batch, 100);

    assert_eq!(config.pipeline.max_concurrent_jobs, 1);
    assert_eq!(config.pipeline.in_flight_batches, 1);
    assert_eq!(config.pipeline.staleness_threshold_secs, 300);

    assert_eq!(config.cache.ttl_secs, 24 * 3600);
    assert_eq!(config.cache.stale_while_revalidate_secs, 4 * 3600);
    assert_eq!(config.cache.stale_if_error_secs, 7 * 24 * 3600);
    assert_eq!(config.log_level, LogLevel::Info);
}

/// Test configuration validation
#[test]
fn test_config_validation_withVariousConfigs_shouldValidateCorrectly() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let mut config = common::test_config(dir.path());
    assert!(config.validate().is_ok());

    config.source_language = "xyz".to_string();
    assert!(config.validate().is_err());
    config.source_language = "eng".to_string();
    assert!(config.validate().is_ok());

    config.batching.context_window = 10;
    assert!(config.validate().is_err());
    config.batching.context_window = 100;

    config.pipeline.in_flight_batches = 0;
    assert!(config.validate().is_err());
    config.pipeline.in_flight_batches = 2;

    config.translation.mock.failure_rate = 1.5;
    assert!(config.validate().is_err());
    config.translation.mock.failure_rate = 0.1;

    config.translation.provider = TranslationProvider::Gemini;
    assert!(config.validate().is_err());
    if let Some(gemini) = config
        .translation
        .available_providers
        .iter_mut()
        .find(|p| p.provider_type == "gemini")
    {
        gemini.api_key = "test-key".to_string();
    }
    assert!(config.validate().is_ok());
    Ok(())
}

/// Test loading a config file written by hand
#[test]
fn test_loadOrCreate_withExistingFile_shouldMergeDefaults() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let json = r#"{
        "target_language": "fr",
        "translation": { "provider": "mock", "common": { "retry_count": 5 } },
        "rate_limits": { "requests_per_minute": 60 },
        "log_level": "debug"
    }"#;
    let path = common::create_test_file(dir.path(), "conf.json", json)?;

    let (config, created) = Config::load_or_create(&path)?;

    assert!(!created);
    assert_eq!(config.target_language, "fr");
    assert_eq!(config.translation.provider, TranslationProvider::Mock);
    assert_eq!(config.translation.common.retry_count, 5);
    assert_eq!(config.translation.common.retry_backoff_ms, 1000);
    assert_eq!(config.rate_limits.requests_per_minute, 60);
    assert_eq!(config.rate_limits.requests_per_day, 1500);
    assert_eq!(config.log_level, LogLevel::Debug);
    Ok(())
}

#[test]
fn test_loadOrCreate_withBrokenJson_shouldFail() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let path = common::create_test_file(dir.path(), "conf.json", "{ not json")?;
    assert!(Config::load_or_create(&path).is_err());
    Ok(())
}

#[test]
fn test_resolveDataDir_withExplicitDir_shouldUseIt() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let config = common::test_config(dir.path());
    assert_eq!(config.storage.resolve_data_dir()?, dir.path());
    Ok(())
}
