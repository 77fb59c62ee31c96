//! wirecheck analyzer
//!
//! Reads two recorded logs, groups `command` entries by correlation id,
//! strips volatile fields, and reports where the two runs diverge.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analyzer;
pub mod config;
pub mod normalize;
pub mod report;

pub use analyzer::{
    AnalyzeError, Analysis, Analyzer, CommandLog, DiffDetail, DiffKind, DiffRecord, Side,
};
pub use config::AnalyzerConfig;
pub use normalize::Normalizer;
pub use report::render;
