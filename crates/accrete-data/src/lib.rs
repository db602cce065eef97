#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/accrete/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod frame;
pub mod import;
pub mod model;
pub mod selection;
pub mod store;

pub use error::{DataError, Result};
pub use frame::{EntityGroup, FactorRecord};
pub use model::{Bar, Column, EntityId, TIMESTAMP_FORMAT};
pub use selection::{EntitySelection, EntityUniverse};
pub use store::{OnConflict, SqliteStore, StoreStats, TimeSeriesStore};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
