//! Data models shared by the patch engine and the command layer
//!
//! Release versions, the locator no-match policy, and the per-run patch report

use serde::{Deserialize, Serialize};

/// What to do when a locator does not resolve against the manifest
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NoMatchPolicy {
    /// Log the miss, record it in the report and carry on
    #[default]
    Ignore,
    /// Abort patching on the first miss
    Fail,
}

impl std::fmt::Display for NoMatchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoMatchPolicy::Ignore => write!(f, "ignore"),
            NoMatchPolicy::Fail => write!(f, "fail"),
        }
    }
}

impl std::str::FromStr for NoMatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ignore" => Ok(NoMatchPolicy::Ignore),
            "fail" => Ok(NoMatchPolicy::Fail),
            _ => Err(format!("Invalid no-match policy: {}. Use: ignore, fail", s)),
        }
    }
}

/// X.Y.Z release triple taken from the build environment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ReleaseVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// The release this one replaces; `None` for the first release of a
    /// Y-stream (patch zero)
    pub fn previous(&self) -> Option<ReleaseVersion> {
        self.patch
            .checked_sub(1)
            .map(|patch| ReleaseVersion::new(self.major, self.minor, patch))
    }

    /// Lower bound of the OLM skip range: three minors back, clamped at zero
    pub fn skip_range_floor(&self) -> String {
        format!("{}.{}.x", self.major, self.minor.saturating_sub(3))
    }
}

impl std::fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// How a single patch operation ended
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatchOutcome {
    Applied,
    /// Guard evaluated to false
    Skipped,
    /// Locator did not resolve and the policy was `Ignore`
    Missed,
}

impl std::fmt::Display for PatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchOutcome::Applied => write!(f, "applied"),
            PatchOutcome::Skipped => write!(f, "skipped"),
            PatchOutcome::Missed => write!(f, "missed"),
        }
    }
}

/// Report entry for one operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchRecord {
    pub path: String,
    pub op: String,
    pub outcome: PatchOutcome,
}

/// Everything that happened during one `apply_patches` call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatchReport {
    #[serde(default)]
    pub records: Vec<PatchRecord>,
}

impl PatchReport {
    pub fn push(&mut self, path: String, op: &str, outcome: PatchOutcome) {
        self.records.push(PatchRecord {
            path,
            op: op.to_string(),
            outcome,
        });
    }

    pub fn count(&self, outcome: &PatchOutcome) -> usize {
        self.records.iter().filter(|r| &r.outcome == outcome).count()
    }

    pub fn applied(&self) -> usize {
        self.count(&PatchOutcome::Applied)
    }

    pub fn skipped(&self) -> usize {
        self.count(&PatchOutcome::Skipped)
    }

    pub fn missed(&self) -> usize {
        self.count(&PatchOutcome::Missed)
    }

    /// Locators that did not resolve
    pub fn missed_paths(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.outcome == PatchOutcome::Missed)
            .map(|r| r.path.as_str())
            .collect()
    }
}
