//! Analysis egress - writes station sets and entity reports to disk
//!
//! Output directory layout:
//! - `stations.json`: workshop → station set(s) and model-order evidence
//! - `reports.jsonl`: one entity report per line, appended

use crate::domain::station::{ModelSelection, StationSet};
use crate::domain::types::EntityId;
use crate::error::Result;
use crate::services::analysis::{AnalysisMode, EntityAnalysis, WorkshopAnalysis};
use crate::services::interval_metrics::EntityReport;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

pub const STATIONS_FILE: &str = "stations.json";
pub const REPORTS_FILE: &str = "reports.jsonl";

/// Key under which a workshop appears in `stations.json`
pub fn workshop_key(workshop: Option<u32>) -> String {
    match workshop {
        Some(w) => format!("w{}", w),
        None => "unscoped".to_string(),
    }
}

#[derive(Debug, Serialize)]
struct StationsRecord<'a> {
    run_id: &'a str,
    mode: AnalysisMode,
    selection: &'a ModelSelection,
    #[serde(skip_serializing_if = "Option::is_none")]
    stations: Option<&'a StationSet>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    entity_stations: BTreeMap<&'a EntityId, &'a StationSet>,
}

#[derive(Debug, Serialize)]
struct ReportLine<'a> {
    run_id: &'a str,
    workshop: Option<u32>,
    mode: AnalysisMode,
    #[serde(flatten)]
    report: &'a EntityReport,
}

/// Egress writer for analysis results
pub struct Egress {
    dir: PathBuf,
}

impl Egress {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        let dir = dir.into();
        info!(dir = %dir.display(), "egress_initialized");
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stations_path(&self) -> PathBuf {
        self.dir.join(STATIONS_FILE)
    }

    pub fn reports_path(&self) -> PathBuf {
        self.dir.join(REPORTS_FILE)
    }

    /// Write `stations.json` for every analyzed workshop, replacing any
    /// previous file
    pub fn write_stations(&self, analyses: &[&WorkshopAnalysis]) -> Result<PathBuf> {
        let records: BTreeMap<String, StationsRecord<'_>> = analyses
            .iter()
            .map(|a| {
                let entity_stations = a
                    .entities
                    .iter()
                    .filter_map(|e| e.stations.as_ref().map(|s| (&e.report.entity_id, s)))
                    .collect();
                let record = StationsRecord {
                    run_id: &a.run_id,
                    mode: a.mode,
                    selection: &a.selection,
                    stations: a.shared_stations.as_ref(),
                    entity_stations,
                };
                (workshop_key(a.workshop), record)
            })
            .collect();

        fs::create_dir_all(&self.dir)?;
        let path = self.stations_path();
        let json = serde_json::to_string_pretty(&records).map_err(std::io::Error::from)?;
        fs::write(&path, json)?;
        info!(file = %path.display(), workshops = records.len(), "stations_written");
        Ok(path)
    }

    /// Append one entity report
    /// Returns true if successful, false otherwise
    pub fn write_report(&self, analysis: &WorkshopAnalysis, entity: &EntityAnalysis) -> bool {
        let line = ReportLine {
            run_id: &analysis.run_id,
            workshop: analysis.workshop,
            mode: analysis.mode,
            report: &entity.report,
        };

        let result = serde_json::to_string(&line)
            .map_err(std::io::Error::from)
            .and_then(|json| self.append_line(&json));

        match result {
            Ok(()) => {
                debug!(
                    entity = %entity.report.entity_id,
                    visits = entity.report.visits.len(),
                    "report_egressed"
                );
                true
            }
            Err(e) => {
                error!(entity = %entity.report.entity_id, error = %e, "report_egress_failed");
                false
            }
        }
    }

    /// Append every entity report of a workshop, returns the number written
    pub fn write_reports(&self, analysis: &WorkshopAnalysis) -> usize {
        let written = analysis.entities.iter().filter(|e| self.write_report(analysis, e)).count();
        info!(
            workshop = %workshop_key(analysis.workshop),
            written,
            total = analysis.entities.len(),
            "reports_written"
        );
        written
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new().create(true).append(true).open(self.reports_path())?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}
