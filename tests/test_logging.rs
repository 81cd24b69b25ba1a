//! Tests for logging configuration and format parsing
//!
//! Covers the pure functions that turn environment values into logging
//! settings.

use task_aggregator::observability::logging::{parse_level, LogFormat, LogSettings};
use tracing::Level;

#[test]
fn test_log_format_parse_is_case_insensitive() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("Compact"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    // Invalid formats default to JSON for production safety
    for input in ["invalid", "", "xml", "yaml", "123", "  pretty  "] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input: {input:?}");
    }
}

#[test]
fn test_level_parsing() {
    let cases = [
        ("ERROR", Level::ERROR),
        ("warn", Level::WARN),
        ("Info", Level::INFO),
        (" DEBUG ", Level::DEBUG),
        ("trace", Level::TRACE),
        ("verbose", Level::INFO),
        ("", Level::INFO),
    ];

    for (input, expected) in cases {
        assert_eq!(parse_level(input), expected, "input: {input:?}");
    }
}

#[test]
fn test_settings_are_plain_data() {
    let settings = LogSettings {
        level: Level::DEBUG,
        format: LogFormat::Compact,
        include_spans: true,
        filter_override: Some("task_aggregator=trace".to_string()),
    };

    let mut adjusted = settings.clone();
    adjusted.level = Level::TRACE;
    assert_ne!(settings, adjusted);
    assert_eq!(settings.format, adjusted.format);
}
