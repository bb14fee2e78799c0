//! Tests for error types

use climate_regrid::Error;
use std::time::Duration;

#[test]
fn test_not_found_error() {
    let error = Error::NotFound("Dataset folder does not exist: /data/avg/X".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Not found"));
    assert!(error_str.contains("/data/avg/X"));
    assert_eq!(error.kind(), "NotFoundError");
}

#[test]
fn test_config_error() {
    let error = Error::Config("A period is required for climatology products".to_string());
    assert!(format!("{error}").starts_with("Configuration error"));
    assert_eq!(error.kind(), "ConfigError");
}

#[test]
fn test_unsupported_mode_error() {
    let error = Error::UnsupportedMode("station_series on a raster grid".to_string());
    assert!(format!("{error}").contains("Unsupported mode"));
    assert_eq!(error.kind(), "UnsupportedModeError");
}

#[test]
fn test_inconsistent_ensemble_error() {
    let error = Error::InconsistentEnsemble("Member 'Ctrl-B' has 20 samples".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Ctrl-B"));
    assert!(error_str.contains("All members must share"));
    assert_eq!(error.kind(), "InconsistentEnsembleError");
}

#[test]
fn test_deadline_error() {
    let error = Error::DeadlineExceeded {
        elapsed: Duration::from_secs(12),
        deadline: Duration::from_secs(10),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("12s"));
    assert!(error_str.contains("10s"));
    assert_eq!(error.kind(), "DeadlineExceeded");
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
    let error: Error = io.into();
    assert!(matches!(error, Error::Io(_)));
    assert!(format!("{error}").contains("read-only"));
    assert_eq!(error.kind(), "IoError");
}

#[test]
fn test_serialization_error_conversion() {
    let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = parse.into();
    assert_eq!(error.kind(), "SerializationError");
}

#[test]
fn test_batch_fatal_classes() {
    assert!(Error::NotFound(String::new()).is_batch_fatal());
    assert!(Error::Config(String::new()).is_batch_fatal());
    assert!(Error::UnsupportedMode(String::new()).is_batch_fatal());
    assert!(!Error::InconsistentEnsemble(String::new()).is_batch_fatal());
    assert!(!Error::Other(String::new()).is_batch_fatal());
}

#[test]
fn test_other_error_is_job_failure() {
    let error = Error::Other("processing unit crashed".to_string());
    assert_eq!(format!("{error}"), "processing unit crashed");
    assert_eq!(error.kind(), "JobFailure");
}
