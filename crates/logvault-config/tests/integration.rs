use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use logvault_config::{ConfigError, PolicyOverrides, load_policy, load_policy_file};
use tempfile::TempDir;

#[test]
fn policy_file_fields_merge_with_defaults_and_overrides() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("policy.json");
    fs::write(
        &path,
        r#"{
            "input_root": "/srv/tenhou/raw",
            "output_root": "/srv/tenhou/archive",
            "compression_level": 9,
            "offline_markers": ["BYE", "disconnected"],
            "include": ["**/*.json"]
        }"#,
    )?;

    let policy = load_policy(
        Some(&path),
        PolicyOverrides {
            workers: Some(3),
            dry_run: Some(true),
            ..PolicyOverrides::default()
        },
    )?;

    assert_eq!(policy.input_root, PathBuf::from("/srv/tenhou/raw"));
    assert_eq!(policy.compression_level, 9);
    assert_eq!(policy.workers, 3);
    assert!(policy.dry_run);
    assert!(policy.verify_after_write);
    assert_eq!(policy.offline_markers, vec!["BYE", "disconnected"]);
    assert_eq!(policy.include, vec!["**/*.json"]);
    Ok(())
}

#[test]
fn unknown_fields_are_parse_errors() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("policy.json");
    fs::write(&path, r#"{ "compresion_level": 3 }"#)?;

    let err = load_policy_file(&path).err();
    assert!(matches!(err, Some(ConfigError::Parse { .. })));
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let err = load_policy_file(&PathBuf::from("/nonexistent/logvault/policy.json")).err();
    assert!(matches!(
        err,
        Some(ConfigError::Io {
            operation: "policy.read",
            ..
        })
    ));
}

#[test]
fn overrides_alone_must_produce_a_valid_policy() {
    let err = load_policy(None, PolicyOverrides::default()).err();
    assert!(matches!(
        err,
        Some(ConfigError::InvalidField {
            field: "input_root",
            ..
        })
    ));

    let policy = load_policy(
        None,
        PolicyOverrides {
            input_root: Some("/in".into()),
            output_root: Some("/out".into()),
            compression_level: Some(12),
            ..PolicyOverrides::default()
        },
    )
    .err();
    assert!(matches!(
        policy,
        Some(ConfigError::InvalidField {
            field: "compression_level",
            ..
        })
    ));
}
