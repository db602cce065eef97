#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/accrete/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod accumulator;
pub mod algorithm;
pub mod error;
pub mod factor;
pub mod registry;
pub mod scorer;
pub mod signal;
pub mod technical;
pub mod transformer;
pub mod zen;

pub use accumulator::{Accumulation, Accumulator, FactorState, IncrementalAccumulator};
pub use error::{FactorError, Result};
pub use factor::{ComputeReport, Factor, FactorConfig, FactorPhase, FillMethod};
pub use registry::{FactorFactory, FactorInfo, FactorKind, FactorRegistry};
pub use scorer::{QuantileScorer, RankScorer, SCORE_RESULT, Scorer};
pub use signal::{FILTER_RESULT, Signal};
pub use transformer::Transformer;
