//! IO modules - file ingest and egress
//!
//! - `samples` - JSONL position sample reader
//! - `egress` - stations.json and reports.jsonl writer

pub mod egress;
pub mod samples;

// Re-export commonly used types
pub use egress::Egress;
pub use samples::read_samples;
