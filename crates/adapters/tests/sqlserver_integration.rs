use std::sync::Arc;
use std::time::Duration;

use sqlnav_adapters::sqlserver::SqlServerDriver;
use sqlnav_core::introspection;
use sqlnav_core::object::ObjectKind;
use sqlnav_core::profiles::{ConnectionProfile, EngineKind};
use sqlnav_core::query_execution::{Interrupt, QueryExecution, QueryOutcome};
use sqlnav_core::session::Session;
use sqlnav_core::tabular::Cell;
use tokio_util::sync::CancellationToken;

fn sqlserver_integration_enabled() -> bool {
    matches!(
        std::env::var("SQLNAV_RUN_SQLSERVER_INTEGRATION").ok().as_deref(),
        Some("1")
    )
}

fn integration_profile() -> Arc<ConnectionProfile> {
    let host =
        std::env::var("SQLNAV_TEST_SQLSERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let user = std::env::var("SQLNAV_TEST_SQLSERVER_USER").unwrap_or_else(|_| "sa".to_string());
    let port = std::env::var("SQLNAV_TEST_SQLSERVER_PORT")
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(1433);

    let mut profile =
        ConnectionProfile::new(EngineKind::SqlServer, "adapters-integration", host, user);
    profile.port = port;
    profile.password = std::env::var("SQLNAV_TEST_SQLSERVER_PASSWORD").unwrap_or_default();
    Arc::new(profile)
}

fn interrupt() -> Interrupt {
    Interrupt::new(CancellationToken::new()).with_timeout(Duration::from_secs(30))
}

async fn run(session: &mut Session, sql: &str, params: Vec<String>) -> QueryOutcome {
    QueryExecution::new(sql, interrupt())
        .with_params(params)
        .run(session.connection_mut(), |_| {})
        .await
        .unwrap_or_else(|error| panic!("`{sql}` failed: {error}"))
}

#[tokio::test(flavor = "current_thread")]
async fn sqlserver_driver_lists_catalog_and_reads_rows() {
    if !sqlserver_integration_enabled() {
        return;
    }

    let profile = integration_profile();
    let admin = Session::open(&SqlServerDriver, profile.clone(), None, &interrupt())
        .await
        .expect("connect should succeed");
    let (admin, databases) = admin
        .list_databases(&interrupt(), |_| {})
        .await
        .expect("database listing should succeed");
    for system in ["master", "tempdb", "model", "msdb"] {
        assert!(!databases.iter().any(|name| name == system), "{system} listed");
    }
    admin.close().await;

    let mut session = Session::open(
        &SqlServerDriver,
        profile,
        Some("tempdb".to_string()),
        &interrupt(),
    )
    .await
    .expect("connect to tempdb should succeed");
    run(&mut session, "DROP TABLE IF EXISTS dbo.integration_notes", Vec::new()).await;
    run(
        &mut session,
        "CREATE TABLE dbo.integration_notes (\
         id BIGINT NOT NULL PRIMARY KEY,\
         note NVARCHAR(64) NULL,\
         payload VARBINARY(8) NULL\
         )",
        Vec::new(),
    )
    .await;
    run(
        &mut session,
        "INSERT INTO dbo.integration_notes (id, note, payload) VALUES \
         (1, N'', 0xDEAD), (2, NULL, NULL)",
        Vec::new(),
    )
    .await;

    let outcome = run(
        &mut session,
        "SELECT id, note, payload FROM dbo.integration_notes ORDER BY id",
        Vec::new(),
    )
    .await;
    let rows = outcome.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0].display(), "1");
    assert_eq!(rows[0][1], Cell::Text(String::new()));
    assert_eq!(rows[0][2].display(), "dead");
    assert_eq!(rows[1][1], Cell::Null);

    let columns = introspection::columns(EngineKind::SqlServer, "tempdb", "dbo.integration_notes");
    let outcome = run(&mut session, columns.sql, columns.params).await;
    let names: Vec<&str> = outcome.rows().iter().map(|row| row[0].display()).collect();
    assert_eq!(names, vec!["id", "note", "payload"]);

    let (mut session, objects) = session
        .list_objects("tempdb", &interrupt(), |_| {})
        .await
        .expect("object listing should succeed");
    assert_eq!(objects[0].kind, ObjectKind::AdHocSql);
    assert!(objects
        .iter()
        .any(|object| object.name == "dbo.integration_notes" && object.kind == ObjectKind::Table));

    run(&mut session, "DROP TABLE IF EXISTS dbo.integration_notes", Vec::new()).await;
    session.close().await;
}
