pub mod backfill;
pub mod details;
pub mod orchestrator;
pub mod report;
