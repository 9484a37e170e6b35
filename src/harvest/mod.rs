//! Catalog harvesting: paging, enrichment, checkpointing and reporting.

pub mod checkpoint;
pub mod cleanup;
pub mod collector;
pub mod config;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod stats;
pub mod stitcher;

pub use config::HarvestConfig;
pub use pipeline::{EnrichSummary, GamesSummary, Harvester};
