use std::sync::Arc;
use std::time::Duration;

use sqlnav_adapters::postgres::PostgresDriver;
use sqlnav_core::introspection;
use sqlnav_core::object::ObjectKind;
use sqlnav_core::profiles::{ConnectionProfile, EngineKind};
use sqlnav_core::query_execution::{Interrupt, QueryExecution, QueryOutcome};
use sqlnav_core::session::Session;
use sqlnav_core::tabular::Cell;
use tokio_util::sync::CancellationToken;


fn postgres_integration_enabled() -> bool {
    matches!(
        std::env::var("SQLNAV_RUN_POSTGRES_INTEGRATION").ok().as_deref(),
        Some("1")
    )
}

fn integration_profile() -> Arc<ConnectionProfile> {
    let host = std::env::var("SQLNAV_TEST_POSTGRES_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let user = std::env::var("SQLNAV_TEST_POSTGRES_USER").unwrap_or_else(|_| "postgres".to_string());
    let port = std::env::var("SQLNAV_TEST_POSTGRES_PORT")
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(5432);

    let mut profile = ConnectionProfile::new(EngineKind::Postgres, "adapters-integration", host, user);
    profile.port = port;
    profile.password = std::env::var("SQLNAV_TEST_POSTGRES_PASSWORD").unwrap_or_default();
    Arc::new(profile)
}

fn integration_database() -> String {
    std::env::var("SQLNAV_TEST_POSTGRES_DATABASE").unwrap_or_else(|_| "postgres".to_string())
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
async fn postgres_driver_lists_catalog_and_reads_rows() {
    if !postgres_integration_enabled() {
        return;
    }

    let profile = integration_profile();
    let database = integration_database();

    let admin = Session::open(&PostgresDriver, profile.clone(), None, &interrupt())
        .await
        .expect("connect should succeed");
    let (admin, databases) = admin
        .list_databases(&interrupt(), |_| {})
        .await
        .expect("database listing should succeed");
    assert!(databases.contains(&database));
    assert!(!databases.iter().any(|name| name.starts_with("template")));
    admin.close().await;

    let mut session = Session::open(
        &PostgresDriver,
        profile,
        Some(database.clone()),
        &interrupt(),
    )
    .await
    .expect("connect to database should succeed");
    run(&mut session, "DROP TABLE IF EXISTS integration_notes", Vec::new()).await;
    run(
        &mut session,
        "CREATE TABLE integration_notes (\
         id BIGINT NOT NULL PRIMARY KEY,\
         note TEXT NULL,\
         payload BYTEA NULL\
         )",
        Vec::new(),
    )
    .await;
    run(
        &mut session,
        "INSERT INTO integration_notes (id, note, payload) VALUES \
         (1, '', '\\xdead'), (2, NULL, NULL)",
        Vec::new(),
    )
    .await;

    let outcome = run(
        &mut session,
        "SELECT id, note, payload FROM integration_notes ORDER BY id",
        Vec::new(),
    )
    .await;
    let rows = outcome.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0].display(), "1");
    assert_eq!(rows[0][1], Cell::Text(String::new()));
    assert_eq!(rows[0][2].display(), "dead");
    assert_eq!(rows[1][1], Cell::Null);

    let columns = introspection::columns(
        EngineKind::Postgres,
        &database,
        "public.integration_notes",
    );
    let outcome = run(&mut session, columns.sql, columns.params).await;
    let names: Vec<&str> = outcome.rows().iter().map(|row| row[0].display()).collect();
    assert_eq!(names, vec!["id", "note", "payload"]);

    let (mut session, objects) = session
        .list_objects(&database, &interrupt(), |_| {})
        .await
        .expect("object listing should succeed");
    assert_eq!(objects[0].kind, ObjectKind::AdHocSql);
    assert!(objects
        .iter()
        .any(|object| object.name == "public.integration_notes"
            && object.kind == ObjectKind::Table));

    run(&mut session, "DROP TABLE IF EXISTS integration_notes", Vec::new()).await;
    session.close().await;
}
