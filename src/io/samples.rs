//! Position sample ingest - JSON Lines, one sample per line
//!
//! `{"entity_id":"w1_g2","x":3.1,"y":-0.4,"t":"2024-03-01T09:00:00Z"}`

use crate::domain::types::PositionSample;
use crate::error::{EngineError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// Read every sample of a JSONL file
///
/// Blank lines are skipped. A malformed line fails the whole read with its
/// 1-based line number.
pub fn read_samples<P: AsRef<Path>>(path: P) -> Result<Vec<PositionSample>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let samples = parse_samples(BufReader::new(file))?;
    info!(file = %path.display(), samples = samples.len(), "samples_loaded");
    Ok(samples)
}

/// Parse samples from any buffered reader
pub fn parse_samples<R: BufRead>(reader: R) -> Result<Vec<PositionSample>> {
    let mut samples = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let sample: PositionSample = serde_json::from_str(trimmed)
            .map_err(|source| EngineError::Json { line: index + 1, source })?;
        samples.push(sample);
    }
    Ok(samples)
}
