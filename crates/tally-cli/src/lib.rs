//! Tally CLI - runs stats over record files and converts configurations

#![allow(missing_docs)]

pub mod commands;
pub mod records;

pub use commands::{OutputFormat, RunSettings, StatReport};
pub use records::RecordsFile;
