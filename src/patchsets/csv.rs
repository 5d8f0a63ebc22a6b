//! ClusterServiceVersion patch set
//!
//! Rebrands the upstream CSV for a downstream release: name, version,
//! upgrade graph (`replaces`, `olm.skipRange`), operator image and the
//! related images handed to the operator through its container env.

use crate::config::{ConfigError, CsvInputs, Settings};
use crate::patch::{Locator, PatchOp, Selector};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

/// Long-form `spec.description`, written as a literal block
pub const DESCRIPTION: &str = include_str!("description.md");

pub const ICON_MEDIATYPE: &str = "image/svg+xml";

const CREATED_AT_FORMAT: &str = "%d %b %Y, %H:%M";

/// `<operator>.v<current version>`
pub fn csv_name(settings: &Settings, inputs: &CsvInputs) -> String {
    format!("{}.v{}", settings.operator_name, inputs.current_version)
}

/// `>=X.(Y-3).x <current`
pub fn skip_range(inputs: &CsvInputs) -> String {
    format!(
        ">={} <{}",
        inputs.version.skip_range_floor(),
        inputs.current_version
    )
}

fn annotation(key: &str) -> Locator {
    Locator::path("metadata.annotations").key(key)
}

/// First deployment whose name contains the operator name
pub fn operator_deployment(settings: &Settings) -> Locator {
    Locator::path("spec.install.spec.deployments")
        .find(Selector::contains("name", &settings.operator_name))
}

/// First container of the operator deployment whose name contains the operator name
pub fn operator_container(settings: &Settings) -> Locator {
    operator_deployment(settings)
        .key("spec")
        .key("template")
        .key("spec")
        .key("containers")
        .find(Selector::contains("name", &settings.operator_name))
}

/// Container env var name -> value for the downstream images
pub fn related_images(settings: &Settings, inputs: &CsvInputs) -> BTreeMap<String, String> {
    let images = &inputs.images;
    [
        ("QUAY_DEFAULT_BRANDING", &settings.branding),
        ("RELATED_IMAGE_COMPONENT_QUAY", &images.quay),
        ("RELATED_IMAGE_COMPONENT_CLAIR", &images.clair),
        ("RELATED_IMAGE_COMPONENT_BUILDER", &images.builder),
        ("RELATED_IMAGE_COMPONENT_BUILDER_QEMU", &images.builder_qemu),
        ("RELATED_IMAGE_COMPONENT_POSTGRES", &images.postgres),
        ("RELATED_IMAGE_COMPONENT_POSTGRES_PREVIOUS", &images.postgres_previous),
        ("RELATED_IMAGE_COMPONENT_CLAIRPOSTGRES", &images.clair_postgres),
        (
            "RELATED_IMAGE_COMPONENT_CLAIRPOSTGRES_PREVIOUS",
            &images.clair_postgres_previous,
        ),
        ("RELATED_IMAGE_COMPONENT_REDIS", &images.redis),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value.clone()))
    .collect()
}

fn maintainers(settings: &Settings) -> Value {
    let mut maintainer = Mapping::new();
    maintainer.insert("email".into(), settings.maintainer.email.as_str().into());
    maintainer.insert("name".into(), settings.maintainer.name.as_str().into());
    Value::Sequence(vec![Value::Mapping(maintainer)])
}

/// `["A", "B"]`, the list syntax OperatorHub expects in the annotation
fn subscription_list(settings: &Settings) -> String {
    let quoted: Vec<String> = settings
        .valid_subscriptions
        .iter()
        .map(|s| serde_json::Value::String(s.clone()).to_string())
        .collect();
    format!("[{}]", quoted.join(", "))
}

fn created_at(timestamp: i64) -> Result<String, ConfigError> {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|at| at.format(CREATED_AT_FORMAT).to_string())
        .ok_or(ConfigError::InvalidTimestamp(timestamp))
}

/// Build the ordered CSV operations
pub fn csv_patch_set(inputs: &CsvInputs, settings: &Settings) -> Result<Vec<PatchOp>, ConfigError> {
    let name = csv_name(settings, inputs);
    let version = inputs.version;
    let mut ops = vec![PatchOp::set(Locator::path("metadata.name"), name.as_str())];

    if settings.stamp_created_at {
        let timestamp = inputs
            .timestamp
            .ok_or_else(|| ConfigError::MissingVar("EPOC_TIMESTAMP".to_string()))?;
        ops.push(PatchOp::set(annotation("createdAt"), created_at(timestamp)?));
    }

    ops.extend([
        PatchOp::set(Locator::path("spec.maintainers"), maintainers(settings)),
        PatchOp::set(
            Locator::path("spec.icon").index(0).key("mediatype"),
            ICON_MEDIATYPE,
        ),
        PatchOp::set(Locator::path("spec.description"), DESCRIPTION),
        PatchOp::set(Locator::path("spec.displayName"), settings.display_name.as_str()),
        PatchOp::set(Locator::path("spec.version"), inputs.current_version.as_str()),
    ]);

    // Y-stream releases start a new upgrade line and replace nothing
    match version.previous() {
        None => ops.push(PatchOp::remove(Locator::path("spec.replaces"))),
        Some(previous) => ops.push(PatchOp::set(
            Locator::path("spec.replaces"),
            format!("{}.v{}", settings.operator_name, previous),
        )),
    }

    ops.extend([
        PatchOp::set(annotation("olm.skipRange"), skip_range(inputs)),
        PatchOp::set(annotation("containerImage"), inputs.operator_image.as_str()),
        PatchOp::set(annotation("quay-version"), inputs.full_version.as_str()),
        PatchOp::replace(annotation("description"), "Quay", "Red Hat"),
        PatchOp::set(
            annotation("operators.openshift.io/valid-subscription"),
            subscription_list(settings),
        ),
        PatchOp::set(operator_deployment(settings).key("name"), name.as_str()),
        PatchOp::set(
            operator_container(settings).key("image"),
            inputs.operator_image.as_str(),
        ),
        PatchOp::set_entries(
            operator_container(settings).key("env"),
            "name",
            "value",
            related_images(settings, inputs),
        ),
    ]);

    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelatedImages;
    use crate::models::ReleaseVersion;
    use std::path::PathBuf;

    fn inputs(major: u32, minor: u32, patch: u32) -> CsvInputs {
        let current = format!("{}.{}.{}", major, minor, patch);
        CsvInputs {
            target_file: PathBuf::from("csv.yaml"),
            version: ReleaseVersion::new(major, minor, patch),
            full_version: format!("v{}", current),
            operator_image: format!("quay/operator:v{}", current),
            images: RelatedImages {
                quay: "quay/quay:tag".to_string(),
                clair: "quay/clair:tag".to_string(),
                builder: "quay/builder:tag".to_string(),
                builder_qemu: "quay/qemu:tag".to_string(),
                postgres: "pg:15".to_string(),
                postgres_previous: "pg:13".to_string(),
                clair_postgres: "pg:15".to_string(),
                clair_postgres_previous: "pg:13".to_string(),
                redis: "redis:6".to_string(),
            },
            timestamp: None,
            current_version: current,
        }
    }

    #[test]
    fn test_skip_range() {
        assert_eq!(skip_range(&inputs(3, 14, 2)), ">=3.11.x <3.14.2");
        assert_eq!(skip_range(&inputs(3, 1, 0)), ">=3.0.x <3.1.0");
    }

    #[test]
    fn test_y_stream_removes_replaces() {
        let settings = Settings::default();
        let ops = csv_patch_set(&inputs(3, 14, 0), &settings).unwrap();
        let replaces = Locator::path("spec.replaces");
        let op = ops.iter().find(|op| op.target == replaces).unwrap();
        assert_eq!(op.action, crate::patch::Action::Remove);
    }

    #[test]
    fn test_z_stream_replaces_previous_patch() {
        let settings = Settings::default();
        let ops = csv_patch_set(&inputs(3, 14, 2), &settings).unwrap();
        let replaces = Locator::path("spec.replaces");
        let op = ops.iter().find(|op| op.target == replaces).unwrap();
        assert_eq!(
            op.action,
            crate::patch::Action::Set(Value::from("quay-operator.v3.14.1"))
        );
    }

    #[test]
    fn test_related_images_cover_branding() {
        let map = related_images(&Settings::default(), &inputs(3, 14, 2));
        assert_eq!(map.len(), 10);
        assert_eq!(map["QUAY_DEFAULT_BRANDING"], "redhat");
        assert_eq!(map["RELATED_IMAGE_COMPONENT_REDIS"], "redis:6");
    }

    #[test]
    fn test_subscription_list_format() {
        assert_eq!(
            subscription_list(&Settings::default()),
            r#"["OpenShift Platform Plus", "Red Hat Quay"]"#
        );
    }

    #[test]
    fn test_created_at_requires_timestamp() {
        let settings = Settings {
            stamp_created_at: true,
            ..Settings::default()
        };
        let err = csv_patch_set(&inputs(3, 14, 2), &settings).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref name) if name == "EPOC_TIMESTAMP"));

        let mut stamped = inputs(3, 14, 2);
        stamped.timestamp = Some(0);
        let ops = csv_patch_set(&stamped, &settings).unwrap();
        assert_eq!(
            ops[1],
            PatchOp::set(annotation("createdAt"), "01 Jan 1970, 00:00")
        );
    }

    #[test]
    fn test_description_is_multiline() {
        assert!(DESCRIPTION.starts_with("The Red Hat Quay Operator"));
        assert!(DESCRIPTION.contains("## Operator Features"));
        assert!(DESCRIPTION.ends_with('\n'));
    }
}
