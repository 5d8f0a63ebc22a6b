//! Configuration for bundle-patcher
//!
//! Two sources feed a run:
//! - `Settings`: optional TOML file with the branding constants of the
//!   bundle (operator name, channel, maintainer, ...). Every field has a
//!   default so an absent file means the stock Red Hat Quay bundle.
//! - Environment inputs: the build pipeline exports the target file and
//!   version/image values. They are read once, up front, through an
//!   [`EnvSource`] so nothing touches the process environment mid-patch.

use crate::models::{NoMatchPolicy, ReleaseVersion};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Required environment variable {0} is not set")]
    MissingVar(String),

    #[error("Environment variable {name}={value:?} is not a valid integer")]
    InvalidNumber {
        name: String,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("EPOC_TIMESTAMP {0} is outside the supported date range")]
    InvalidTimestamp(i64),

    #[error("Failed to read settings from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings from {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Bundle maintainer written to `spec.maintainers`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Maintainer {
    pub name: String,
    pub email: String,
}

impl Default for Maintainer {
    fn default() -> Self {
        Self {
            name: "Red Hat".to_string(),
            email: "support@redhat.com".to_string(),
        }
    }
}

/// Patcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Substring used to find the operator deployment and container, and
    /// the prefix of the CSV name
    pub operator_name: String,
    pub display_name: String,
    /// Default channel and channel list of the bundle
    pub channel: String,
    /// Value of `QUAY_DEFAULT_BRANDING` in the operator container
    pub branding: String,
    pub on_missing: NoMatchPolicy,
    /// Write `metadata.annotations.createdAt` from `EPOC_TIMESTAMP`.
    /// Off by default: the timestamp changes on every build.
    pub stamp_created_at: bool,
    pub valid_subscriptions: Vec<String>,
    pub maintainer: Maintainer,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            operator_name: "quay-operator".to_string(),
            display_name: "Red Hat Quay".to_string(),
            channel: "stable-3.14".to_string(),
            branding: "redhat".to_string(),
            on_missing: NoMatchPolicy::default(),
            stamp_created_at: false,
            valid_subscriptions: vec![
                "OpenShift Platform Plus".to_string(),
                "Red Hat Quay".to_string(),
            ],
            maintainer: Maintainer::default(),
        }
    }
}

/// Load settings from a TOML file, or defaults when no path is given
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Read-only view of environment variables
pub trait EnvSource {
    fn var(&self, name: &str) -> Option<String>;

    fn required(&self, name: &str) -> Result<String, ConfigError> {
        self.var(name)
            .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
    }

    fn required_u32(&self, name: &str) -> Result<u32, ConfigError> {
        parse_number(name, self.required(name)?)
    }

    fn optional_i64(&self, name: &str) -> Result<Option<i64>, ConfigError> {
        self.var(name).map(|value| parse_number(name, value)).transpose()
    }
}

fn parse_number<T>(name: &str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    value
        .trim()
        .parse()
        .map_err(|source| ConfigError::InvalidNumber {
            name: name.to_string(),
            value,
            source,
        })
}

/// The real process environment
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Image references injected into the operator container environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedImages {
    pub quay: String,
    pub clair: String,
    pub builder: String,
    pub builder_qemu: String,
    pub postgres: String,
    pub postgres_previous: String,
    pub clair_postgres: String,
    pub clair_postgres_previous: String,
    pub redis: String,
}

/// Inputs of the CSV patch set
#[derive(Debug, Clone)]
pub struct CsvInputs {
    pub target_file: PathBuf,
    pub version: ReleaseVersion,
    /// `CI_VERSION_SANITIZED`, the semver used in names and `spec.version`
    pub current_version: String,
    /// `CI_VERSION`, the tag appended to image repositories
    pub full_version: String,
    pub operator_image: String,
    pub images: RelatedImages,
    pub timestamp: Option<i64>,
}

impl CsvInputs {
    /// Collect every CSV input; the first missing or malformed one aborts
    pub fn from_env(env: &impl EnvSource) -> Result<Self, ConfigError> {
        let full_version = env.required("CI_VERSION")?;
        let tagged = |name: &str| -> Result<String, ConfigError> {
            Ok(format!("{}{}", env.required(name)?, full_version))
        };

        Ok(Self {
            target_file: PathBuf::from(env.required("TARGET_CSV_FILE")?),
            version: ReleaseVersion::new(
                env.required_u32("X_VERSION")?,
                env.required_u32("Y_VERSION")?,
                env.required_u32("Z_VERSION")?,
            ),
            current_version: env.required("CI_VERSION_SANITIZED")?,
            operator_image: tagged("OPERATOR_IMAGE")?,
            images: RelatedImages {
                quay: tagged("QUAY_IMAGE")?,
                clair: tagged("CLAIR_IMAGE")?,
                builder: tagged("QUAY_BUILDER_IMAGE")?,
                builder_qemu: tagged("QUAY_BUILDER_QEMU_IMAGE")?,
                postgres: env.required("POSTGRES_IMAGE")?,
                postgres_previous: env.required("POSTGRES_IMAGE_PREVIOUS")?,
                clair_postgres: env.required("CLAIR_POSTGRES_IMAGE")?,
                clair_postgres_previous: env.required("CLAIR_POSTGRES_IMAGE_PREVIOUS")?,
                redis: env.required("REDIS_IMAGE")?,
            },
            timestamp: env.optional_i64("EPOC_TIMESTAMP")?,
            full_version,
        })
    }
}

/// Inputs of the metadata-annotations patch set
#[derive(Debug, Clone)]
pub struct MetadataInputs {
    pub target_file: PathBuf,
}

impl MetadataInputs {
    pub fn from_env(env: &impl EnvSource) -> Result<Self, ConfigError> {
        Ok(Self {
            target_file: PathBuf::from(env.required("TARGET_METADATA_ANNOTATIONS_FILE")?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv_env() -> HashMap<String, String> {
        [
            ("TARGET_CSV_FILE", "bundle/manifests/quay-operator.clusterserviceversion.yaml"),
            ("X_VERSION", "3"),
            ("Y_VERSION", "14"),
            ("Z_VERSION", "2"),
            ("CI_VERSION_SANITIZED", "3.14.2"),
            ("CI_VERSION", "v3.14.2"),
            ("OPERATOR_IMAGE", "registry.example.com/quay/quay-operator-rhel9:"),
            ("QUAY_IMAGE", "registry.example.com/quay/quay-rhel9:"),
            ("CLAIR_IMAGE", "registry.example.com/quay/clair-rhel9:"),
            ("QUAY_BUILDER_IMAGE", "registry.example.com/quay/quay-builder-rhel9:"),
            ("QUAY_BUILDER_QEMU_IMAGE", "registry.example.com/quay/quay-builder-qemu-rhcos-rhel9:"),
            ("POSTGRES_IMAGE", "registry.example.com/rhel9/postgresql-15:latest"),
            ("POSTGRES_IMAGE_PREVIOUS", "registry.example.com/rhel8/postgresql-13:latest"),
            ("CLAIR_POSTGRES_IMAGE", "registry.example.com/rhel9/postgresql-15:latest"),
            ("CLAIR_POSTGRES_IMAGE_PREVIOUS", "registry.example.com/rhel8/postgresql-13:latest"),
            ("REDIS_IMAGE", "registry.example.com/rhel9/redis-6:latest"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_csv_inputs_from_env() {
        let inputs = CsvInputs::from_env(&csv_env()).unwrap();
        assert_eq!(inputs.version, ReleaseVersion::new(3, 14, 2));
        assert_eq!(inputs.operator_image, "registry.example.com/quay/quay-operator-rhel9:v3.14.2");
        assert_eq!(inputs.images.clair, "registry.example.com/quay/clair-rhel9:v3.14.2");
        assert_eq!(inputs.images.redis, "registry.example.com/rhel9/redis-6:latest");
        assert_eq!(inputs.timestamp, None);
    }

    #[test]
    fn test_missing_variable_is_named() {
        let mut env = csv_env();
        env.remove("CLAIR_IMAGE");
        let err = CsvInputs::from_env(&env).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref name) if name == "CLAIR_IMAGE"));
    }

    #[test]
    fn test_non_integer_patch_version() {
        let mut env = csv_env();
        env.insert("Z_VERSION".to_string(), "2-rc1".to_string());
        let err = CsvInputs::from_env(&env).unwrap_err();
        assert!(err.to_string().contains("Z_VERSION"));
    }

    #[test]
    fn test_timestamp_is_parsed_when_present() {
        let mut env = csv_env();
        env.insert("EPOC_TIMESTAMP".to_string(), "1700000000".to_string());
        assert_eq!(CsvInputs::from_env(&env).unwrap().timestamp, Some(1_700_000_000));

        env.insert("EPOC_TIMESTAMP".to_string(), "yesterday".to_string());
        assert!(CsvInputs::from_env(&env).is_err());
    }

    #[test]
    fn test_settings_defaults_and_partial_toml() {
        let defaults = Settings::default();
        assert_eq!(defaults.operator_name, "quay-operator");
        assert_eq!(defaults.channel, "stable-3.14");
        assert_eq!(defaults.on_missing, NoMatchPolicy::Ignore);

        let parsed: Settings = toml::from_str(
            "channel = \"stable-3.15\"\non_missing = \"fail\"\n\n[maintainer]\nname = \"Quay Team\"\nemail = \"quay@example.com\"\n",
        )
        .unwrap();
        assert_eq!(parsed.channel, "stable-3.15");
        assert_eq!(parsed.on_missing, NoMatchPolicy::Fail);
        assert_eq!(parsed.maintainer.name, "Quay Team");
        assert_eq!(parsed.operator_name, "quay-operator");
    }

    #[test]
    fn test_load_settings_without_path() {
        let settings = load_settings(None).unwrap();
        assert_eq!(settings.display_name, "Red Hat Quay");
    }
}
