use yellowcab_core::db::MemoryServer;
use yellowcab_core::mart::{
    MartBuilder, MartScripts, CREATION_SCRIPT, INSERTION_SCRIPT, MART_TABLES,
};

const DATABASE: &str = "nyc_datamart";

fn builder(server: &MemoryServer) -> MartBuilder<'_> {
    MartBuilder::new(server, server, DATABASE, MartScripts::default())
}

#[tokio::test]
async fn default_build_creates_database_and_runs_only_the_schema() {
    let server = MemoryServer::new();

    let report = builder(&server).create(false).await.unwrap();

    assert_eq!(report.database, DATABASE);
    assert!(report.database_created);
    assert!(!report.seeded);
    assert!(server.has_database(DATABASE));
    assert_eq!(server.executed_scripts(), [CREATION_SCRIPT]);
    for table in MART_TABLES {
        assert!(server.column_names(DATABASE, table).is_some(), "{table} not created");
    }
}

#[tokio::test]
async fn seeded_build_runs_insertion_after_creation() {
    let server = MemoryServer::new();

    let report = builder(&server).create(true).await.unwrap();

    assert!(report.seeded);
    assert_eq!(server.executed_scripts(), [CREATION_SCRIPT, INSERTION_SCRIPT]);
}

#[tokio::test]
async fn existing_database_is_reused() {
    let server = MemoryServer::new();
    builder(&server).create(false).await.unwrap();

    let again = builder(&server).create(true).await.unwrap();

    assert!(!again.database_created);
    assert_eq!(
        server.executed_scripts(),
        [CREATION_SCRIPT, CREATION_SCRIPT, INSERTION_SCRIPT]
    );
}

#[tokio::test]
async fn failing_schema_script_stops_before_seeding() {
    let server = MemoryServer::new();
    server.set_fail_scripts(true);

    let result = builder(&server).create(true).await;

    assert!(result.is_err());
    assert!(server.executed_scripts().is_empty());
}

#[tokio::test]
async fn unreachable_server_fails_without_running_scripts() {
    let server = MemoryServer::new();
    server.set_reachable(false);

    let err = builder(&server).create(true).await.unwrap_err();

    assert!(err.is_transient());
    assert!(!server.has_database(DATABASE));
    assert!(server.executed_scripts().is_empty());
}
