//! Data-quality gate in front of the per-table soda checks.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::QualityConfig;
use crate::db::Catalog;
use crate::error::{PipelineError, Result};

pub const CONFIGURATION_FILE: &str = "configuration.yml";
pub const CHECKS_DIR: &str = "checks";
pub const REPORTS_DIR: &str = "reports";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "failure", content = "tables", rename_all = "snake_case")]
pub enum GateFailure {
    Unreachable,
    MissingTables(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum GateVerdict {
    Pass,
    Fail(GateFailure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Unknown,
    Checked(GateVerdict),
    Run,
    Skipped,
}

/// Connectivity and table-existence check guarding the quality suite.
pub struct DataQualityGate<'a> {
    catalog: &'a dyn Catalog,
    database: String,
    tables: Vec<String>,
    state: GateState,
    verdict: Option<GateVerdict>,
}

impl<'a> DataQualityGate<'a> {
    pub fn new(catalog: &'a dyn Catalog, database: impl Into<String>, tables: &[&str]) -> Self {
        Self {
            catalog,
            database: database.into(),
            tables: tables.iter().map(|table| table.to_string()).collect(),
            state: GateState::Unknown,
            verdict: None,
        }
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    /// Verdict of the most recent check, kept after the gate settles.
    pub fn verdict(&self) -> Option<&GateVerdict> {
        self.verdict.as_ref()
    }

    pub async fn check(&mut self) -> GateVerdict {
        let verdict = self.evaluate().await;
        self.state = GateState::Checked(verdict.clone());
        self.verdict = Some(verdict.clone());
        verdict
    }

    /// Settles the gate: `Run` after a passing check, `Skipped` otherwise.
    /// Checks first when the gate has not been evaluated yet.
    pub async fn resolve(&mut self) -> &GateState {
        let verdict = match self.state.clone() {
            GateState::Unknown => self.check().await,
            GateState::Checked(verdict) => verdict,
            GateState::Run | GateState::Skipped => return &self.state,
        };

        self.state = match verdict {
            GateVerdict::Pass => {
                info!(database = %self.database, "quality gate passed");
                GateState::Run
            }
            GateVerdict::Fail(failure) => {
                warn!(
                    database = %self.database,
                    ?failure,
                    "database or tables missing, skipping quality checks"
                );
                GateState::Skipped
            }
        };
        &self.state
    }

    async fn evaluate(&self) -> GateVerdict {
        if let Err(err) = self.catalog.ping(&self.database).await {
            error!(database = %self.database, error = %err, "mart database unreachable");
            return GateVerdict::Fail(GateFailure::Unreachable);
        }

        let mut missing = Vec::new();
        for table in &self.tables {
            match self.catalog.relation_exists(&self.database, table).await {
                Ok(true) => debug!(table, "table present"),
                Ok(false) => missing.push(table.clone()),
                Err(err) => {
                    error!(table, error = %err, "table lookup failed");
                    missing.push(table.clone());
                }
            }
        }

        if missing.is_empty() {
            GateVerdict::Pass
        } else {
            GateVerdict::Fail(GateFailure::MissingTables(missing))
        }
    }
}

/// Paths of the quality configuration, verified to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityFiles {
    pub configuration: PathBuf,
    pub reports_dir: PathBuf,
    pub checks: Vec<(String, PathBuf)>,
}

impl QualityFiles {
    pub fn check_file(soda_dir: &Path, table: &str) -> PathBuf {
        soda_dir.join(CHECKS_DIR).join(format!("{table}_check.yml"))
    }

    /// Fails listing every missing item when any is absent.
    pub fn verify(soda_dir: &Path, tables: &[&str]) -> Result<Self> {
        let configuration = soda_dir.join(CONFIGURATION_FILE);
        let checks_dir = soda_dir.join(CHECKS_DIR);
        let reports_dir = soda_dir.join(REPORTS_DIR);

        let mut missing = Vec::new();
        if !configuration.is_file() {
            missing.push(configuration.display().to_string());
        }
        if !checks_dir.is_dir() {
            missing.push(checks_dir.display().to_string());
        }
        if !reports_dir.is_dir() {
            missing.push(reports_dir.display().to_string());
        }

        let checks: Vec<(String, PathBuf)> = tables
            .iter()
            .map(|table| (table.to_string(), Self::check_file(soda_dir, table)))
            .collect();
        for (_, path) in &checks {
            if !path.is_file() {
                missing.push(path.display().to_string());
            }
        }

        if !missing.is_empty() {
            return Err(PipelineError::MissingQualityFiles(missing));
        }
        Ok(Self {
            configuration,
            reports_dir,
            checks,
        })
    }
}

/// Executes the external check tool; `Ok(false)` means the check ran and failed.
#[async_trait]
pub trait CheckRunner: Send + Sync {
    async fn test_connection(&self, configuration: &Path) -> Result<bool>;
    async fn scan(&self, configuration: &Path, check_file: &Path) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct SodaRunner {
    binary: String,
    datasource: String,
}

impl SodaRunner {
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            binary: config.soda_bin.clone(),
            datasource: config.datasource.clone(),
        }
    }

    async fn execute(&self, args: &[&OsStr]) -> Result<bool> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| PipelineError::QualityCommand(format!("{}: {err}", self.binary)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
            debug!(target: "soda", "{line}");
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, stderr = %stderr.trim(), "soda command failed");
        }
        Ok(output.status.success())
    }
}

#[async_trait]
impl CheckRunner for SodaRunner {
    async fn test_connection(&self, configuration: &Path) -> Result<bool> {
        self.execute(&[
            OsStr::new("test-connection"),
            OsStr::new("-d"),
            OsStr::new(&self.datasource),
            OsStr::new("-c"),
            configuration.as_os_str(),
        ])
        .await
    }

    async fn scan(&self, configuration: &Path, check_file: &Path) -> Result<bool> {
        self.execute(&[
            OsStr::new("scan"),
            OsStr::new("-d"),
            OsStr::new(&self.datasource),
            OsStr::new("-c"),
            configuration.as_os_str(),
            check_file.as_os_str(),
        ])
        .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCheck {
    pub table: String,
    pub status: CheckStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SuiteReport {
    Skipped { reason: GateFailure },
    Ran { connection_ok: bool, checks: Vec<TableCheck> },
}

impl SuiteReport {
    pub fn all_passed(&self) -> bool {
        match self {
            SuiteReport::Skipped { .. } => false,
            SuiteReport::Ran {
                connection_ok,
                checks,
            } => *connection_ok && checks.iter().all(|check| check.status == CheckStatus::Passed),
        }
    }
}

/// Runs the gate and, when it opens, the connection test plus one scan per table.
pub async fn run_suite(
    gate: &mut DataQualityGate<'_>,
    files: &QualityFiles,
    runner: &dyn CheckRunner,
) -> Result<SuiteReport> {
    let skipped = matches!(gate.resolve().await, GateState::Skipped);
    if skipped {
        let reason = match gate.verdict() {
            Some(GateVerdict::Fail(failure)) => failure.clone(),
            _ => GateFailure::Unreachable,
        };
        return Ok(SuiteReport::Skipped { reason });
    }

    let connection_ok = runner.test_connection(&files.configuration).await?;
    if !connection_ok {
        error!("soda connection test failed, table scans not attempted");
        let checks = files
            .checks
            .iter()
            .map(|(table, _)| TableCheck {
                table: table.clone(),
                status: CheckStatus::NotRun,
            })
            .collect();
        return Ok(SuiteReport::Ran {
            connection_ok,
            checks,
        });
    }

    let mut checks = Vec::with_capacity(files.checks.len());
    for (table, check_file) in &files.checks {
        let status = if runner.scan(&files.configuration, check_file).await? {
            info!(table, "quality scan passed");
            CheckStatus::Passed
        } else {
            warn!(table, "quality scan failed");
            CheckStatus::Failed
        };
        checks.push(TableCheck {
            table: table.clone(),
            status,
        });
    }

    Ok(SuiteReport::Ran {
        connection_ok,
        checks,
    })
}
