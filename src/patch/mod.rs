//! Declarative patch engine for YAML manifests
//!
//! A patch is an ordered list of [`PatchOp`]s. Each operation names its
//! target with a [`Locator`] (keys, indices and "first element whose field
//! matches" lookups), an [`Action`] to perform there, and an optional
//! [`Guard`]. Operations run in order against the live tree, so a later
//! locator sees whatever earlier operations wrote.

use crate::manifest::Manifest;
use crate::models::{NoMatchPolicy, PatchOutcome, PatchReport};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

/// Patch application error
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("Locator did not resolve: {0}")]
    LocatorMiss(String),

    #[error("Type mismatch at {path}: expected {expected}")]
    TypeMismatch { path: String, expected: &'static str },

    #[error("Patch operation has an empty locator")]
    EmptyLocator,
}

/// Condition on a sequence element's field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    Contains(String),
    Equals(String),
}

/// Picks the first sequence element whose `field` satisfies `matcher`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub field: String,
    pub matcher: Matcher,
}

impl Selector {
    pub fn contains(field: &str, needle: &str) -> Self {
        Self {
            field: field.to_string(),
            matcher: Matcher::Contains(needle.to_string()),
        }
    }

    pub fn equals(field: &str, value: &str) -> Self {
        Self {
            field: field.to_string(),
            matcher: Matcher::Equals(value.to_string()),
        }
    }

    pub fn matches(&self, element: &Value) -> bool {
        let Some(actual) = element.get(self.field.as_str()).and_then(Value::as_str) else {
            return false;
        };
        match &self.matcher {
            Matcher::Contains(needle) => actual.contains(needle.as_str()),
            Matcher::Equals(expected) => actual == expected,
        }
    }
}

/// One step of a locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
    Find(Selector),
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Key(key) if is_plain_key(key) => write!(f, ".{}", key),
            Segment::Key(key) => write!(f, "[{:?}]", key),
            Segment::Index(index) => write!(f, "[{}]", index),
            Segment::Find(Selector {
                field,
                matcher: Matcher::Contains(needle),
            }) => write!(f, "[{}~={:?}]", field, needle),
            Segment::Find(Selector {
                field,
                matcher: Matcher::Equals(value),
            }) => write!(f, "[{}=={:?}]", field, value),
        }
    }
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Path into a manifest, built with a small fluent API:
///
/// ```
/// use bundle_patcher::patch::{Locator, Selector};
///
/// let image = Locator::root()
///     .key("spec")
///     .key("install")
///     .key("spec")
///     .key("deployments")
///     .find(Selector::contains("name", "quay-operator"))
///     .key("name");
/// assert_eq!(
///     image.to_string(),
///     r#"spec.install.spec.deployments[name~="quay-operator"].name"#
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locator {
    segments: Vec<Segment>,
}

impl Locator {
    pub fn root() -> Self {
        Self::default()
    }

    /// Dotted key path; keys containing dots must use [`Locator::key`]
    pub fn path(dotted: &str) -> Self {
        dotted
            .split('.')
            .filter(|k| !k.is_empty())
            .fold(Self::root(), |loc, k| loc.key(k))
    }

    pub fn key(mut self, key: &str) -> Self {
        self.segments.push(Segment::Key(key.to_string()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(Segment::Index(index));
        self
    }

    pub fn find(mut self, selector: Selector) -> Self {
        self.segments.push(Segment::Find(selector));
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn split_last(&self) -> Option<(&Segment, &[Segment])> {
        self.segments.split_last()
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.segments.is_empty() {
            return write!(f, ".");
        }
        let rendered: String = self.segments.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", rendered.strip_prefix('.').unwrap_or(rendered.as_str()))
    }
}

/// Follow `segments` from `node`
pub fn resolve<'a>(node: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments.iter().try_fold(node, step)
}

fn step<'a>(node: &'a Value, segment: &Segment) -> Option<&'a Value> {
    match segment {
        Segment::Key(key) => node.as_mapping()?.get(key.as_str()),
        Segment::Index(index) => node.as_sequence()?.get(*index),
        Segment::Find(selector) => node.as_sequence()?.iter().find(|e| selector.matches(e)),
    }
}

/// Mutable counterpart of [`resolve`]
pub fn resolve_mut<'a>(mut node: &'a mut Value, segments: &[Segment]) -> Option<&'a mut Value> {
    for segment in segments {
        node = match segment {
            Segment::Key(key) => node.as_mapping_mut()?.get_mut(key.as_str())?,
            Segment::Index(index) => node.as_sequence_mut()?.get_mut(*index)?,
            Segment::Find(selector) => node
                .as_sequence_mut()?
                .iter_mut()
                .find(|e| selector.matches(e))?,
        };
    }
    Some(node)
}

/// Mutation applied at a locator
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Insert or overwrite
    Set(Value),
    /// Drop the key or element; absent targets are left alone
    Remove,
    /// Replace every occurrence of `from` in a string scalar
    ReplaceSubstring { from: String, to: String },
    /// In a sequence of mappings, set `value_field` on each element whose
    /// `key_field` is one of the keys of `values`
    SetEntries {
        key_field: String,
        value_field: String,
        values: BTreeMap<String, String>,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Set(_) => "set",
            Action::Remove => "remove",
            Action::ReplaceSubstring { .. } => "replace",
            Action::SetEntries { .. } => "set_entries",
        }
    }
}

/// Precondition for running an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// Condition decided by the caller when building the patch set
    When(bool),
    /// Only when the target does not exist yet
    IfAbsent,
    /// Only when the target already exists
    IfPresent,
}

/// A single patch operation
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOp {
    pub target: Locator,
    pub action: Action,
    pub guard: Option<Guard>,
}

impl PatchOp {
    pub fn set(target: Locator, value: impl Into<Value>) -> Self {
        Self {
            target,
            action: Action::Set(value.into()),
            guard: None,
        }
    }

    pub fn remove(target: Locator) -> Self {
        Self {
            target,
            action: Action::Remove,
            guard: None,
        }
    }

    pub fn replace(target: Locator, from: &str, to: &str) -> Self {
        Self {
            target,
            action: Action::ReplaceSubstring {
                from: from.to_string(),
                to: to.to_string(),
            },
            guard: None,
        }
    }

    pub fn set_entries(
        target: Locator,
        key_field: &str,
        value_field: &str,
        values: BTreeMap<String, String>,
    ) -> Self {
        Self {
            target,
            action: Action::SetEntries {
                key_field: key_field.to_string(),
                value_field: value_field.to_string(),
                values,
            },
            guard: None,
        }
    }

    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn when(self, condition: bool) -> Self {
        self.with_guard(Guard::When(condition))
    }
}

/// Result of applying one operation, before policy is taken into account
enum Applied {
    Done,
    Miss,
}

/// Apply `ops` to `manifest` in order
///
/// Under [`NoMatchPolicy::Ignore`] an unresolved locator is logged and
/// recorded as missed; under [`NoMatchPolicy::Fail`] it aborts with
/// [`PatchError::LocatorMiss`]. Type mismatches always abort.
pub fn apply_patches(
    manifest: &mut Manifest,
    ops: &[PatchOp],
    policy: NoMatchPolicy,
) -> Result<PatchReport, PatchError> {
    let mut report = PatchReport::default();

    for op in ops {
        let path = op.target.to_string();

        if !guard_allows(manifest.root(), op) {
            tracing::debug!("skip {} {}", op.action.name(), path);
            report.push(path, op.action.name(), PatchOutcome::Skipped);
            continue;
        }

        match apply_one(manifest.root_mut(), op)? {
            Applied::Done => {
                tracing::debug!("{} {}", op.action.name(), path);
                report.push(path, op.action.name(), PatchOutcome::Applied);
            }
            Applied::Miss => match policy {
                NoMatchPolicy::Fail => return Err(PatchError::LocatorMiss(path)),
                NoMatchPolicy::Ignore => {
                    tracing::warn!("No match for {}, leaving manifest unchanged", path);
                    report.push(path, op.action.name(), PatchOutcome::Missed);
                }
            },
        }
    }

    Ok(report)
}

fn guard_allows(root: &Value, op: &PatchOp) -> bool {
    match op.guard {
        None => true,
        Some(Guard::When(condition)) => condition,
        Some(Guard::IfAbsent) => resolve(root, op.target.segments()).is_none(),
        Some(Guard::IfPresent) => resolve(root, op.target.segments()).is_some(),
    }
}

fn apply_one(root: &mut Value, op: &PatchOp) -> Result<Applied, PatchError> {
    let (last, parent_segments) = op.target.split_last().ok_or(PatchError::EmptyLocator)?;
    let Some(parent) = resolve_mut(root, parent_segments) else {
        return Ok(Applied::Miss);
    };

    match &op.action {
        Action::Set(value) => set_child(parent, last, value.clone(), &op.target),
        Action::Remove => remove_child(parent, last, &op.target),
        Action::ReplaceSubstring { from, to } => {
            let Some(node) = resolve_mut(parent, std::slice::from_ref(last)) else {
                return Ok(Applied::Miss);
            };
            let current = node.as_str().ok_or_else(|| PatchError::TypeMismatch {
                path: op.target.to_string(),
                expected: "string",
            })?;
            let replaced = current.replace(from.as_str(), to);
            *node = Value::String(replaced);
            Ok(Applied::Done)
        }
        Action::SetEntries {
            key_field,
            value_field,
            values,
        } => {
            let Some(node) = resolve_mut(parent, std::slice::from_ref(last)) else {
                return Ok(Applied::Miss);
            };
            let entries = node.as_sequence_mut().ok_or_else(|| PatchError::TypeMismatch {
                path: op.target.to_string(),
                expected: "sequence",
            })?;
            for entry in entries.iter_mut() {
                let Some(name) = entry.get(key_field.as_str()).and_then(Value::as_str) else {
                    continue;
                };
                let Some(new_value) = values.get(name) else {
                    continue;
                };
                if let Some(fields) = entry.as_mapping_mut() {
                    fields.insert(
                        Value::String(value_field.clone()),
                        Value::String(new_value.clone()),
                    );
                }
            }
            Ok(Applied::Done)
        }
    }
}

fn set_child(
    parent: &mut Value,
    last: &Segment,
    value: Value,
    target: &Locator,
) -> Result<Applied, PatchError> {
    match last {
        Segment::Key(key) => {
            let fields = mapping_mut(parent, target)?;
            fields.insert(Value::String(key.clone()), value);
            Ok(Applied::Done)
        }
        Segment::Index(_) | Segment::Find(_) => {
            match resolve_mut(parent, std::slice::from_ref(last)) {
                Some(slot) => {
                    *slot = value;
                    Ok(Applied::Done)
                }
                None => Ok(Applied::Miss),
            }
        }
    }
}

fn remove_child(parent: &mut Value, last: &Segment, target: &Locator) -> Result<Applied, PatchError> {
    match last {
        Segment::Key(key) => {
            mapping_mut(parent, target)?.shift_remove(key.as_str());
        }
        Segment::Index(index) => {
            let items = sequence_mut(parent, target)?;
            if *index < items.len() {
                items.remove(*index);
            }
        }
        Segment::Find(selector) => {
            let items = sequence_mut(parent, target)?;
            if let Some(position) = items.iter().position(|e| selector.matches(e)) {
                items.remove(position);
            }
        }
    }
    Ok(Applied::Done)
}

fn mapping_mut<'a>(node: &'a mut Value, target: &Locator) -> Result<&'a mut Mapping, PatchError> {
    node.as_mapping_mut().ok_or_else(|| PatchError::TypeMismatch {
        path: target.to_string(),
        expected: "mapping",
    })
}

fn sequence_mut<'a>(
    node: &'a mut Value,
    target: &Locator,
) -> Result<&'a mut Vec<Value>, PatchError> {
    node.as_sequence_mut().ok_or_else(|| PatchError::TypeMismatch {
        path: target.to_string(),
        expected: "sequence",
    })
}
