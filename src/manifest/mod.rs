//! Manifest loading and dumping
//!
//! A manifest is one YAML document held as a `serde_yaml::Value` tree.
//! Mapping key order survives a load/dump cycle and multi-line strings are
//! written back as literal block scalars. A manifest parsed from text keeps
//! that text, and dumping it copies every untouched region verbatim so
//! comments, quoting and flow collections outside patched nodes survive.

mod layout;

use crate::patch::{resolve, Locator};
use serde_yaml::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Exit code used when the input manifest cannot be read
pub const EXIT_UNREADABLE: i32 = 2;

/// File suffixes treated as YAML manifests
const YAML_SUFFIXES: &[&str] = &[".yaml", ".yml"];

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("File can not be found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to serialize manifest: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ManifestError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ManifestError::NotFound { .. }
            | ManifestError::Read { .. }
            | ManifestError::Parse { .. } => EXIT_UNREADABLE,
            ManifestError::Serialize(_) | ManifestError::Write { .. } => 1,
        }
    }
}

/// Text a manifest was parsed from, with the tree it parsed to
#[derive(Debug, Clone)]
struct Source {
    text: String,
    tree: Value,
}

/// An in-memory YAML manifest
#[derive(Debug, Clone)]
pub struct Manifest {
    root: Value,
    source: Option<Source>,
}

impl PartialEq for Manifest {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Manifest {
    pub fn new(root: Value) -> Self {
        Self { root, source: None }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        let root: Value = serde_yaml::from_str(content)?;
        Ok(Self {
            source: Some(Source {
                text: content.to_string(),
                tree: root.clone(),
            }),
            root,
        })
    }

    /// Serialize the manifest, reusing the source layout where possible
    pub fn to_yaml_string(&self) -> Result<String, serde_yaml::Error> {
        if let Some(source) = &self.source {
            // keep the layout only if it reads back as the current tree
            let preserved = layout::render(&source.text, &source.tree, &self.root).filter(|out| {
                serde_yaml::from_str::<Value>(out).map_or(false, |tree| tree == self.root)
            });
            match preserved {
                Some(out) => return Ok(out),
                None => tracing::debug!("Source layout not reusable, re-emitting whole manifest"),
            }
        }
        serde_yaml::to_string(&self.root)
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Value {
        &mut self.root
    }

    /// Look up the node a locator points at
    pub fn get(&self, locator: &Locator) -> Option<&Value> {
        resolve(&self.root, locator.segments())
    }

    /// Convenience for string scalars
    pub fn get_str(&self, locator: &Locator) -> Option<&str> {
        self.get(locator).and_then(Value::as_str)
    }
}

/// True when the path carries a YAML suffix
pub fn is_yaml_path(path: &Path) -> bool {
    let name = path.to_string_lossy();
    YAML_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Load a manifest from disk
///
/// Returns `Ok(None)` when the path is not a YAML file; the caller decides
/// what "not applicable" means.
pub fn load(path: &Path) -> Result<Option<Manifest>, ManifestError> {
    if !is_yaml_path(path) {
        return Ok(None);
    }

    let content = fs::read_to_string(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound => ManifestError::NotFound {
            path: path.to_path_buf(),
        },
        _ => ManifestError::Read {
            path: path.to_path_buf(),
            source,
        },
    })?;

    let manifest = Manifest::from_yaml_str(&content).map_err(|source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!("Loaded manifest {}", path.display());
    Ok(Some(manifest))
}

/// Write a manifest back to disk, replacing the file
///
/// The document is fully serialized before the file is opened.
pub fn dump(path: &Path, manifest: &Manifest) -> Result<(), ManifestError> {
    let content = manifest.to_yaml_string().map_err(ManifestError::Serialize)?;
    fs::write(path, content).map_err(|source| ManifestError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!("Wrote manifest {}", path.display());
    Ok(())
}
