//! Concrete patch sets for the two OLM bundle manifests

pub mod csv;
pub mod metadata;

pub use csv::csv_patch_set;
pub use metadata::metadata_patch_set;
