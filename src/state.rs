//! Last-run summary persisted after every apply

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use declarative::{ConvergenceReport, ConvergenceResult, ConvergenceSummary};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// What one `apply` did, as written to `engine.state_file`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LastRun {
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub success: bool,
    pub summary: ConvergenceSummary,
    /// Per resource, in apply order
    #[serde(default)]
    pub resources: Vec<ResourceRecord>,
    #[serde(default)]
    pub restarted: Vec<String>,
    /// Dry runs only
    #[serde(default)]
    pub pending_restarts: Vec<String>,
    /// The error that stopped the run, if any
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResourceRecord {
    pub id: String,
    pub result: ConvergenceResult,
}

impl LastRun {
    pub fn from_report(report: &ConvergenceReport, dry_run: bool, error: Option<String>) -> Self {
        Self {
            finished_at: Utc::now(),
            dry_run,
            success: error.is_none() && report.is_success(),
            summary: report.summary(),
            resources: report
                .results()
                .map(|(id, result)| ResourceRecord {
                    id: id.to_string(),
                    result: result.clone(),
                })
                .collect(),
            restarted: report.restarted.iter().map(ToString::to_string).collect(),
            pending_restarts: report
                .pending_restarts
                .iter()
                .map(ToString::to_string)
                .collect(),
            error,
        }
    }

    /// Load the summary at `path`; `None` if no run has been recorded
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            log::debug!("State file {} does not exist", path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let run = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;
        Ok(Some(run))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize last run summary")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;

        log::debug!("Saved last run to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> LastRun {
        LastRun {
            finished_at: Utc::now(),
            dry_run: false,
            success: false,
            summary: ConvergenceSummary {
                changed: 1,
                failed: 1,
                ..ConvergenceSummary::default()
            },
            resources: vec![
                ResourceRecord {
                    id: "Package[varnish]".to_string(),
                    result: ConvergenceResult::Changed,
                },
                ResourceRecord {
                    id: "Service[varnish]".to_string(),
                    result: ConvergenceResult::Failed {
                        reason: "service varnish start failed: boom".to_string(),
                    },
                },
            ],
            restarted: Vec::new(),
            pending_restarts: Vec::new(),
            error: Some("apply aborted at Service[varnish]".to_string()),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/last_run.json");

        sample().save(&path).unwrap();
        let loaded = LastRun::load(&path).unwrap().unwrap();

        assert!(!loaded.success);
        assert_eq!(loaded.summary.failed, 1);
        assert_eq!(loaded.resources.len(), 2);
        assert_eq!(loaded.resources[1].id, "Service[varnish]");
        assert!(loaded.error.is_some());
    }

    #[test]
    fn test_load_missing() {
        let dir = TempDir::new().unwrap();
        assert!(LastRun::load(&dir.path().join("none.json")).unwrap().is_none());
    }

    #[test]
    fn test_load_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_run.json");
        fs::write(&path, "{not json").unwrap();
        assert!(LastRun::load(&path).is_err());
    }
}
