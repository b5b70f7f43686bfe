//! Run export
//!
//! Serializes the config and summary of a run to JSON for external
//! consumption (spreadsheets, plotting).

use std::path::Path;

use kpd_types::errors::SimulationError;
use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::metrics::SimulationSummary;

/// Everything needed to reproduce and inspect a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationExport {
    pub version: String,
    pub config: SimulationConfig,
    pub summary: SimulationSummary,
}

pub fn build_export(config: &SimulationConfig, summary: &SimulationSummary) -> SimulationExport {
    SimulationExport {
        version: crate::VERSION.to_string(),
        config: config.clone(),
        summary: summary.clone(),
    }
}

/// Export as pretty-printed JSON.
pub fn export_json(export: &SimulationExport) -> Result<String, SimulationError> {
    serde_json::to_string_pretty(export).map_err(|e| SimulationError::Io { reason: e.to_string() })
}

/// Write export to a file path.
pub fn write_to_file(export: &SimulationExport, path: &Path) -> Result<(), SimulationError> {
    let json = export_json(export)?;
    std::fs::write(path, json)?;
    Ok(())
}
