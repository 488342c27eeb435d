use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use yellowcab_core::db::MemoryServer;
use yellowcab_core::error::Result;
use yellowcab_core::mart::MART_TABLES;
use yellowcab_core::quality::{
    run_suite, CheckRunner, CheckStatus, DataQualityGate, GateFailure, GateState, GateVerdict,
    QualityFiles, SuiteReport,
};
use yellowcab_core::PipelineError;

const MART: &str = "nyc_datamart";

fn full_mart() -> MemoryServer {
    let server = MemoryServer::new();
    for table in MART_TABLES {
        server.create_table(MART, table);
    }
    server
}

fn soda_dir(tables: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("configuration.yml"), "data_source datamart: {}\n").unwrap();
    std::fs::create_dir(dir.path().join("checks")).unwrap();
    std::fs::create_dir(dir.path().join("reports")).unwrap();
    for table in tables {
        std::fs::write(QualityFiles::check_file(dir.path(), table), "checks: []\n").unwrap();
    }
    dir
}

/// Records scans and fails the ones listed in `failing`.
struct ScriptedRunner {
    connection_ok: bool,
    failing: Vec<&'static str>,
    scanned: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn new(connection_ok: bool, failing: Vec<&'static str>) -> Self {
        Self {
            connection_ok,
            failing,
            scanned: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CheckRunner for ScriptedRunner {
    async fn test_connection(&self, _configuration: &Path) -> Result<bool> {
        Ok(self.connection_ok)
    }

    async fn scan(&self, _configuration: &Path, check_file: &Path) -> Result<bool> {
        let name = check_file.file_name().unwrap().to_string_lossy().into_owned();
        self.scanned.lock().unwrap().push(name.clone());
        Ok(!self.failing.iter().any(|table| name.starts_with(table)))
    }
}

#[tokio::test]
async fn gate_runs_when_all_tables_resolve() {
    let server = full_mart();
    let mut gate = DataQualityGate::new(&server, MART, &MART_TABLES);
    assert_eq!(gate.state(), &GateState::Unknown);

    assert_eq!(gate.check().await, GateVerdict::Pass);
    assert_eq!(gate.state(), &GateState::Checked(GateVerdict::Pass));
    assert_eq!(gate.resolve().await, &GateState::Run);
}

#[tokio::test]
async fn gate_skips_when_any_table_is_missing() {
    let server = MemoryServer::new();
    for table in &MART_TABLES[..4] {
        server.create_table(MART, table);
    }
    let mut gate = DataQualityGate::new(&server, MART, &MART_TABLES);

    assert_eq!(
        gate.check().await,
        GateVerdict::Fail(GateFailure::MissingTables(vec!["fact_yellow_taxi".into()]))
    );
    assert_eq!(gate.resolve().await, &GateState::Skipped);
}

#[tokio::test]
async fn gate_skips_when_database_is_unreachable() {
    let server = full_mart();
    server.set_reachable(false);
    let mut gate = DataQualityGate::new(&server, MART, &MART_TABLES);

    assert_eq!(gate.resolve().await, &GateState::Skipped);
    assert_eq!(
        gate.verdict(),
        Some(&GateVerdict::Fail(GateFailure::Unreachable))
    );
}

#[test]
fn verification_lists_every_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("checks")).unwrap();

    let err = QualityFiles::verify(dir.path(), &MART_TABLES).unwrap_err();
    let PipelineError::MissingQualityFiles(missing) = err else {
        panic!("unexpected error: {err}");
    };

    // configuration.yml, reports/ and one check file per table
    assert_eq!(missing.len(), 2 + MART_TABLES.len());
    assert!(missing.iter().any(|path| path.ends_with("configuration.yml")));
    assert!(missing.iter().any(|path| path.ends_with("reports")));
    assert!(missing
        .iter()
        .any(|path| path.ends_with("fact_yellow_taxi_check.yml")));
}

#[tokio::test]
async fn suite_scans_every_table_independently() {
    let server = full_mart();
    let dir = soda_dir(&MART_TABLES);
    let files = QualityFiles::verify(dir.path(), &MART_TABLES).unwrap();
    let runner = ScriptedRunner::new(true, vec!["dimension_time"]);
    let mut gate = DataQualityGate::new(&server, MART, &MART_TABLES);

    let report = run_suite(&mut gate, &files, &runner).await.unwrap();

    assert_eq!(runner.scanned.lock().unwrap().len(), MART_TABLES.len());
    let SuiteReport::Ran { connection_ok, checks } = &report else {
        panic!("suite did not run: {report:?}");
    };
    assert!(connection_ok);
    let failed: Vec<&str> = checks
        .iter()
        .filter(|check| check.status == CheckStatus::Failed)
        .map(|check| check.table.as_str())
        .collect();
    assert_eq!(failed, ["dimension_time"]);
    assert!(!report.all_passed());
}

#[tokio::test]
async fn failed_connection_test_stops_the_scans() {
    let server = full_mart();
    let dir = soda_dir(&MART_TABLES);
    let files = QualityFiles::verify(dir.path(), &MART_TABLES).unwrap();
    let runner = ScriptedRunner::new(false, Vec::new());
    let mut gate = DataQualityGate::new(&server, MART, &MART_TABLES);

    let report = run_suite(&mut gate, &files, &runner).await.unwrap();

    assert!(runner.scanned.lock().unwrap().is_empty());
    match report {
        SuiteReport::Ran { connection_ok, checks } => {
            assert!(!connection_ok);
            assert!(checks.iter().all(|check| check.status == CheckStatus::NotRun));
        }
        other => panic!("unexpected report: {other:?}"),
    }
}

#[tokio::test]
async fn closed_gate_never_invokes_the_runner() {
    let server = MemoryServer::new();
    let dir = soda_dir(&MART_TABLES);
    let files = QualityFiles::verify(dir.path(), &MART_TABLES).unwrap();
    let runner = ScriptedRunner::new(true, Vec::new());
    let mut gate = DataQualityGate::new(&server, MART, &MART_TABLES);

    let report = run_suite(&mut gate, &files, &runner).await.unwrap();

    // The mart database itself does not exist, so the connectivity probe fails.
    assert_eq!(
        report,
        SuiteReport::Skipped {
            reason: GateFailure::Unreachable
        }
    );
    assert!(runner.scanned.lock().unwrap().is_empty());
}
