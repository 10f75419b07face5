/*!
 * Tests for configuration loading and validation
 */

use anyhow::Result;
use std::path::PathBuf;

use crate::common;
use epubtrans::app_config::{Config, TranslationProvider};

/// Test that a config written to disk reads back with the same values
#[test]
fn test_fromFile_withSerializedDefault_shouldRoundTrip() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let mut config = Config::default();
    config.target_language = "de".to_string();
    config.translation.common.batch_max_segments = 3;
    config.storage.use_memory = false;

    let path = common::create_test_file(temp_dir.path(), "conf.json", &serde_json::to_string_pretty(&config)?)?;
    let loaded = Config::from_file(&path)?;

    assert_eq!(loaded.target_language, "de");
    assert_eq!(loaded.translation.common.batch_max_segments, 3);
    assert!(!loaded.storage.use_memory);
    assert_eq!(loaded.translation.available_providers.len(), 2);
    Ok(())
}

/// Test that malformed JSON is reported with the file name
#[test]
fn test_fromFile_withMalformedJson_shouldFail() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = common::create_test_file(temp_dir.path(), "conf.json", "{ \"source_language\": ")?;

    let error = Config::from_file(&path).unwrap_err();
    assert!(format!("{:#}", error).contains("conf.json"));
    Ok(())
}

/// Test that a run needs distinct input and output documents
#[test]
fn test_validatePaths_shouldRequireDistinctDocuments() {
    let mut config = Config::default();
    assert!(config.validate_paths().is_err());

    config.document.input_path = PathBuf::from("book.epub");
    config.document.output_path = PathBuf::from("book.epub");
    assert!(config.validate_paths().is_err());

    config.document.output_path = PathBuf::from("book.pl.epub");
    assert!(config.validate_paths().is_ok());
}

/// Test that out-of-range thresholds are rejected
#[test]
fn test_validate_withOutOfRangeThreshold_shouldFail() {
    let mut config = Config::default();
    config.translation.common.tm_fuzzy_threshold = 1.5;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.translation.common.batch_max_segments = 0;
    assert!(config.validate().is_err());
}

/// Test that a Gemini config with a key and custom endpoint validates
#[test]
fn test_validate_withGeminiKey_shouldPass() -> Result<()> {
    let json = r#"{
        "translation": {
            "provider": "gemini",
            "available_providers": [
                { "type": "gemini", "api_key": "secret", "endpoint": "http://127.0.0.1:8080", "model": "gemini-test" }
            ]
        }
    }"#;
    let config: Config = serde_json::from_str(json)?;
    assert_eq!(config.translation.provider, TranslationProvider::Gemini);
    assert_eq!(config.translation.get_api_key(), "secret");
    assert!(config.translation.provider.is_remote());
    config.validate()?;
    Ok(())
}
