#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/accrete/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export main types from sub-crates
pub use accrete_data as data;
pub use accrete_factors as factors;

pub use accrete_data::{Bar, Column, EntitySelection, SqliteStore, TimeSeriesStore};
pub use accrete_factors::{ComputeReport, Factor, FactorConfig, FactorError, FactorRegistry};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_registry_reexported() {
        assert!(FactorRegistry::with_defaults().contains("zen"));
    }
}
