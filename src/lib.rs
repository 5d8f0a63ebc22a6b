//! bundle-patcher - Patches OLM bundle manifests from build environment variables

pub mod commands;
pub mod config;
pub mod manifest;
pub mod models;
pub mod patch;
pub mod patchsets;
