// Integration tests for the metadata-annotations command and manifest round trips

use anyhow::Result;
use bundle_patcher::commands::{self, RunOptions, RunStatus};
use bundle_patcher::config::load_settings;
use bundle_patcher::manifest::{self, Manifest};
use bundle_patcher::models::NoMatchPolicy;
use bundle_patcher::patch::{apply_patches, Locator};
use bundle_patcher::patchsets::metadata::{CHANNELS_KEY, DEFAULT_CHANNEL_KEY, PACKAGE_KEY};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const ANNOTATIONS_FIXTURE: &str = include_str!("fixtures/annotations.yaml");
const CSV_FIXTURE: &str = include_str!("fixtures/quay-operator.clusterserviceversion.yaml");

fn env_for(target: &Path) -> HashMap<String, String> {
    HashMap::from([(
        "TARGET_METADATA_ANNOTATIONS_FILE".to_string(),
        target.display().to_string(),
    )])
}

fn annotation(key: &str) -> Locator {
    Locator::path("annotations").key(key)
}

#[test]
fn test_metadata_command_sets_package_and_channels() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let target = temp_dir.path().join("annotations.yaml");
    fs::write(&target, ANNOTATIONS_FIXTURE)?;

    let status = commands::update_metadata(&env_for(&target), &RunOptions::default())?;
    assert!(matches!(status, RunStatus::Patched(ref r) if r.applied() == 3));

    let patched = manifest::load(&target)?.expect("yaml target");
    assert_eq!(patched.get_str(&annotation(PACKAGE_KEY)), Some("quay-operator"));
    assert_eq!(patched.get_str(&annotation(DEFAULT_CHANNEL_KEY)), Some("stable-3.14"));
    assert_eq!(patched.get_str(&annotation(CHANNELS_KEY)), Some("stable-3.14"));
    assert_eq!(
        patched.get_str(&annotation("operators.operatorframework.io.bundle.mediatype.v1")),
        Some("registry+v1")
    );

    Ok(())
}

#[test]
fn test_metadata_channel_from_settings_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let target = temp_dir.path().join("annotations.yaml");
    fs::write(&target, ANNOTATIONS_FIXTURE)?;
    let settings_path = temp_dir.path().join("patcher.toml");
    fs::write(&settings_path, "channel = \"stable-3.15\"\n")?;

    let options = RunOptions {
        settings: load_settings(Some(&settings_path))?,
        ..RunOptions::default()
    };
    commands::update_metadata(&env_for(&target), &options)?;

    let patched = manifest::load(&target)?.expect("yaml target");
    assert_eq!(patched.get_str(&annotation(CHANNELS_KEY)), Some("stable-3.15"));
    assert_eq!(patched.get_str(&annotation(PACKAGE_KEY)), Some("quay-operator"));

    Ok(())
}

#[test]
fn test_metadata_requires_target_variable() {
    let empty: HashMap<String, String> = HashMap::new();
    let err = commands::update_metadata(&empty, &RunOptions::default()).unwrap_err();
    assert!(format!("{:#}", err).contains("TARGET_METADATA_ANNOTATIONS_FILE"));
    assert_eq!(commands::exit_code(&err), 1);
}

#[test]
fn test_missing_annotations_file_exit_code() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let target = temp_dir.path().join("metadata").join("annotations.yaml");

    let err = commands::update_metadata(&env_for(&target), &RunOptions::default()).unwrap_err();
    assert_eq!(commands::exit_code(&err), 2);
    assert!(format!("{}", err).contains("can not be found"));

    Ok(())
}

#[test]
fn test_unparsable_manifest_is_unreadable_input() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let target = temp_dir.path().join("annotations.yaml");
    fs::write(&target, "annotations: [unclosed\n")?;

    let err = commands::update_metadata(&env_for(&target), &RunOptions::default()).unwrap_err();
    assert_eq!(commands::exit_code(&err), 2);

    Ok(())
}

#[test]
fn test_round_trip_without_patches() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let target = temp_dir.path().join("csv.yaml");
    fs::write(&target, CSV_FIXTURE)?;

    let mut loaded = manifest::load(&target)?.expect("yaml target");
    let report = apply_patches(&mut loaded, &[], NoMatchPolicy::Fail)?;
    assert!(report.records.is_empty());
    manifest::dump(&target, &loaded)?;

    let dumped = fs::read_to_string(&target)?;
    assert_eq!(dumped, CSV_FIXTURE);
    let original = Manifest::from_yaml_str(CSV_FIXTURE)?;
    let reloaded = Manifest::from_yaml_str(&dumped)?;
    assert_eq!(original, reloaded);

    // top-level and nested key order survive the dump
    let top: Vec<&str> = dumped
        .lines()
        .filter(|l| !l.starts_with(' ') && !l.starts_with('-') && !l.starts_with('#'))
        .map(|l| l.split(':').next().unwrap_or_default())
        .collect();
    assert_eq!(top, vec!["apiVersion", "kind", "metadata", "spec"]);
    let capabilities = dumped.find("capabilities:").expect("capabilities");
    let repository = dumped.find("repository:").expect("repository");
    assert!(capabilities < repository);

    Ok(())
}
