mod common;

use common::{period, trips_frame};
use yellowcab_core::db::{MemoryServer, Provisioner};
use yellowcab_core::warehouse::{LoadMode, WarehouseLoader, DEFAULT_WINDOW_COLUMN};
use yellowcab_core::PipelineError;

const DATABASE: &str = "nyc_warehouse";
const TABLE: &str = "yellow_taxi";

#[tokio::test]
async fn first_load_creates_database_and_lowercases_columns() {
    let server = MemoryServer::new();
    let loader = WarehouseLoader::new(&server, &server, DATABASE);

    let report = loader
        .load(trips_frame(period(2024, 12), 3), TABLE, LoadMode::Append)
        .await
        .unwrap();

    assert!(report.database_created);
    assert_eq!(report.rows, 3);
    assert_eq!(
        server.column_names(DATABASE, TABLE).unwrap(),
        ["vendorid", "tpep_pickup_datetime", "total_amount", "store_and_fwd_flag"]
    );
}

#[tokio::test]
async fn append_twice_duplicates_rows() {
    let server = MemoryServer::new();
    let loader = WarehouseLoader::new(&server, &server, DATABASE);
    let frame = trips_frame(period(2024, 12), 4);

    loader.load(frame.clone(), TABLE, LoadMode::Append).await.unwrap();
    let second = loader.load(frame, TABLE, LoadMode::Append).await.unwrap();

    assert!(!second.database_created);
    assert_eq!(server.rows(DATABASE, TABLE).len(), 8);
}

#[tokio::test]
async fn replace_window_twice_keeps_a_single_copy() {
    let server = MemoryServer::new();
    let loader = WarehouseLoader::new(&server, &server, DATABASE);
    let mode = LoadMode::ReplaceWindow {
        column: DEFAULT_WINDOW_COLUMN.into(),
        period: period(2024, 12),
    };

    loader
        .load(trips_frame(period(2024, 11), 2), TABLE, LoadMode::Append)
        .await
        .unwrap();
    loader
        .load(trips_frame(period(2024, 12), 5), TABLE, mode.clone())
        .await
        .unwrap();
    loader
        .load(trips_frame(period(2024, 12), 5), TABLE, mode)
        .await
        .unwrap();

    // November rows sit outside the replaced window.
    assert_eq!(server.rows(DATABASE, TABLE).len(), 7);
}

#[tokio::test]
async fn failed_write_drops_the_database_it_created() {
    let server = MemoryServer::new();
    server.set_fail_writes(true);
    let loader = WarehouseLoader::new(&server, &server, DATABASE);

    let result = loader
        .load(trips_frame(period(2024, 12), 2), TABLE, LoadMode::Append)
        .await;

    assert!(result.is_err());
    assert!(!server.database_exists(DATABASE).await.unwrap());
}

#[tokio::test]
async fn failed_write_keeps_a_preexisting_database() {
    let server = MemoryServer::new();
    server.create_database(DATABASE).await.unwrap();
    server.set_fail_writes(true);
    let loader = WarehouseLoader::new(&server, &server, DATABASE);

    let result = loader
        .load(trips_frame(period(2024, 12), 2), TABLE, LoadMode::Append)
        .await;

    assert!(result.is_err());
    assert!(server.has_database(DATABASE));
}

#[tokio::test]
async fn unreachable_server_is_transient() {
    let server = MemoryServer::new();
    server.set_reachable(false);
    let loader = WarehouseLoader::new(&server, &server, DATABASE);

    let err = loader
        .load(trips_frame(period(2024, 12), 1), TABLE, LoadMode::Append)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Sqlx(_)));
    assert!(err.is_transient());
}
