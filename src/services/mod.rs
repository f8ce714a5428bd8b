//! Services - the analysis engine
//!
//! - `clustering` - k-means, silhouette score, percentile
//! - `inferencer` - Station inference with model-order selection
//! - `segmenter` - Position stream to visit sequence
//! - `interval_metrics` - Dwell, transitions, production time
//! - `analysis` - Workshop pipeline tying the three together

pub mod analysis;
pub mod clustering;
pub mod inferencer;
pub mod interval_metrics;
pub mod segmenter;

// Re-export commonly used types
pub use analysis::{AnalysisConfig, AnalysisMode, WorkshopAnalysis, WorkshopAnalyzer};
pub use inferencer::{InferenceConfig, StationInferencer, StationOrdering};
pub use interval_metrics::EntityReport;
pub use segmenter::{SegmentConfig, VisitSegmenter};
