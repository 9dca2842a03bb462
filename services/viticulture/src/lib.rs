//! VitiBrasil pipeline - shared library for the collector, parser and api services
//!
//! Stages, leaf-first:
//! - `fetch`: resilient GET against the Embrapa portal
//! - `extract`: HTML data tables and CSV downloads into a [`extract::Table`]
//! - `reshape`: wide (one column per year) to long (one row per year)
//! - `scrape`: per-category orchestration that writes the artifact files
//! - `classify`: section-aware classification into typed records
//! - `load` / `query`: transactional replace and paginated read-back
//! - `import`: the "import all" run over the five report categories
//! - `jobs`: persisted job runs for background scrapes

pub mod artifact;
pub mod category;
pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod import;
pub mod jobs;
pub mod load;
pub mod memory;
pub mod numeric;
pub mod query;
pub mod record;
pub mod reshape;
pub mod scrape;
pub mod store;
pub mod taxonomy;

pub use category::Category;
pub use config::Config;
pub use error::PipelineError;
pub use record::{Record, StoredRecord};
