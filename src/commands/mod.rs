//! CLI commands for bundle-patcher
//!
//! Each command reads its inputs from the environment, loads the target
//! manifest, applies its patch set and writes the file back in place.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::config::{CsvInputs, EnvSource, MetadataInputs, Settings};
use crate::manifest::{self, ManifestError};
use crate::models::{NoMatchPolicy, PatchReport};
use crate::patch::{apply_patches, PatchOp};
use crate::patchsets::{csv_patch_set, metadata_patch_set};

/// Output format for the patch report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Summary,
    Json,
}

/// Options shared by every command
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub settings: Settings,
    /// Overrides `settings.on_missing` when set
    pub policy: Option<NoMatchPolicy>,
    /// Print the patched document instead of writing it
    pub dry_run: bool,
    pub format: OutputFormat,
}

impl RunOptions {
    pub fn policy(&self) -> NoMatchPolicy {
        self.policy.unwrap_or(self.settings.on_missing)
    }
}

/// What a command did with its target
#[derive(Debug)]
pub enum RunStatus {
    Patched(PatchReport),
    /// Target is not a YAML file; nothing was read or written
    NotApplicable,
}

/// Patch the ClusterServiceVersion named by `TARGET_CSV_FILE`
pub fn update_csv(env: &impl EnvSource, options: &RunOptions) -> Result<RunStatus> {
    let inputs = CsvInputs::from_env(env).context("Invalid CSV build environment")?;
    let ops = csv_patch_set(&inputs, &options.settings)?;

    tracing::info!(
        "Patching CSV {} for release {}",
        inputs.target_file.display(),
        inputs.version
    );
    run_patch_set(&inputs.target_file, &ops, options)
}

/// Patch the bundle annotations named by `TARGET_METADATA_ANNOTATIONS_FILE`
pub fn update_metadata(env: &impl EnvSource, options: &RunOptions) -> Result<RunStatus> {
    let inputs = MetadataInputs::from_env(env).context("Invalid metadata build environment")?;
    let ops = metadata_patch_set(&options.settings);

    tracing::info!(
        "Patching bundle annotations {} for channel {}",
        inputs.target_file.display(),
        options.settings.channel
    );
    run_patch_set(&inputs.target_file, &ops, options)
}

fn run_patch_set(target: &Path, ops: &[PatchOp], options: &RunOptions) -> Result<RunStatus> {
    let Some(mut manifest) = manifest::load(target)? else {
        tracing::warn!("{} is not a YAML file, skipping", target.display());
        return Ok(RunStatus::NotApplicable);
    };

    tracing::debug!("Applying {} operations, on no match: {}", ops.len(), options.policy());
    let report = apply_patches(&mut manifest, ops, options.policy())
        .with_context(|| format!("Failed to patch {}", target.display()))?;

    let rendered = if options.dry_run {
        Some(manifest.to_yaml_string().map_err(ManifestError::Serialize)?)
    } else {
        manifest::dump(target, &manifest)?;
        None
    };

    print_report(target, &report, rendered.as_deref(), options)?;
    Ok(RunStatus::Patched(report))
}

/// JSON output: the report, plus the patched document on dry runs
#[derive(Serialize)]
struct JsonOutput<'a> {
    #[serde(flatten)]
    report: &'a PatchReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifest: Option<&'a str>,
}

fn print_report(
    target: &Path,
    report: &PatchReport,
    rendered: Option<&str>,
    options: &RunOptions,
) -> Result<()> {
    match options.format {
        OutputFormat::Json => {
            let output = JsonOutput {
                report,
                manifest: rendered,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Summary => {
            if let Some(rendered) = rendered {
                print!("{}", rendered);
            }
            let verb = if options.dry_run { "Dry run of" } else { "Patched" };
            println!(
                "✓ {} {}: {} applied, {} skipped, {} missed",
                verb,
                target.display(),
                report.applied(),
                report.skipped(),
                report.missed()
            );
            for path in report.missed_paths() {
                println!("  no match: {}", path);
            }
        }
    }
    Ok(())
}

/// Process exit code for a failed command
///
/// Unreadable input manifests get their own code; everything else is 1.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ManifestError>())
        .map(ManifestError::exit_code)
        .unwrap_or(1)
}
