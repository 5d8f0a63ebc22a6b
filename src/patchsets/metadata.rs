//! Bundle metadata-annotations patch set

use crate::config::Settings;
use crate::patch::{Locator, PatchOp};

pub const PACKAGE_KEY: &str = "operators.operatorframework.io.bundle.package.v1";
pub const DEFAULT_CHANNEL_KEY: &str = "operators.operatorframework.io.bundle.channel.default.v1";
pub const CHANNELS_KEY: &str = "operators.operatorframework.io.bundle.channels.v1";

fn annotation(key: &str) -> Locator {
    Locator::path("annotations").key(key)
}

/// Package name, default channel and channel list
pub fn metadata_patch_set(settings: &Settings) -> Vec<PatchOp> {
    vec![
        PatchOp::set(annotation(PACKAGE_KEY), settings.operator_name.as_str()),
        PatchOp::set(annotation(DEFAULT_CHANNEL_KEY), settings.channel.as_str()),
        PatchOp::set(annotation(CHANNELS_KEY), settings.channel.as_str()),
    ]
}
