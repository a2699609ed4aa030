use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sqlnav_core::logging::init_stderr_logging;
use sqlnav_core::object::ObjectKind;
use sqlnav_core::profiles::FileProfilesStore;
use sqlnav_core::query_execution::{Interrupt, QueryExecution, QueryOutcome};
use sqlnav_core::session::Session;
use sqlnav_core::tabular::Cell;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseOutcome {
    Config,
    HelpRequested,
}

#[derive(Debug, Clone)]
struct ProbeConfig {
    profiles_path: Option<PathBuf>,
    profile: Option<String>,
    database: Option<String>,
    sql: Option<String>,
    timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            profiles_path: None,
            profile: None,
            database: None,
            sql: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = parse_args()?;
    let _logging = init_stderr_logging(None);

    let store = match &config.profiles_path {
        Some(path) => FileProfilesStore::load_from_path(path.clone())?,
        None => FileProfilesStore::load_default()?,
    };
    let name = config
        .profile
        .as_deref()
        .ok_or_else(|| io_other("missing `--profile`"))?;
    let profile = store
        .profile(name)
        .cloned()
        .ok_or_else(|| io_other(format!("no profile named `{name}` in {}", store.path().display())))?;

    let drivers = sqlnav_adapters::default_drivers();
    let driver = drivers.driver(profile.engine).map_err(io_other)?;
    let interrupt = Interrupt::new(CancellationToken::new()).with_timeout(config.timeout);

    let session = Session::open(
        driver.as_ref(),
        Arc::new(profile),
        config.database.clone(),
        &interrupt,
    )
    .await
    .map_err(io_other)?;

    let output = match (&config.database, &config.sql) {
        (_, Some(sql)) => run_query(session, sql, interrupt).await?,
        (Some(database), None) => {
            let (session, objects) = session
                .list_objects(database, &interrupt, |_| {})
                .await
                .map_err(io_other)?;
            session.close().await;
            objects
                .iter()
                .filter(|object| object.kind != ObjectKind::AdHocSql)
                .map(|object| {
                    let kind = if object.is_view() { "view" } else { "table" };
                    format!("{kind}\t{}", object.name)
                })
                .collect()
        }
        (None, None) => {
            let (session, databases) = session
                .list_databases(&interrupt, |_| {})
                .await
                .map_err(io_other)?;
            session.close().await;
            databases
        }
    };

    for line in output {
        println!("{line}");
    }
    Ok(())
}

async fn run_query(mut session: Session, sql: &str, interrupt: Interrupt) -> io::Result<Vec<String>> {
    let outcome = QueryExecution::new(sql, interrupt)
        .run(session.connection_mut(), |elapsed| {
            tracing::info!(elapsed_secs = elapsed, "query still running");
        })
        .await;
    session.close().await;
    outcome.map(|outcome| render_outcome(&outcome)).map_err(io_other)
}

fn render_outcome(outcome: &QueryOutcome) -> Vec<String> {
    let header = outcome
        .columns()
        .iter()
        .map(|column| column.name.as_str())
        .collect::<Vec<_>>()
        .join("\t");
    let mut lines = vec![header];
    match outcome {
        QueryOutcome::EmptyResultSet { .. } => lines.push("(empty result set)".to_string()),
        QueryOutcome::Rows(_) => lines.extend(outcome.rows().iter().map(|row| {
            row.iter().map(Cell::display).collect::<Vec<_>>().join("\t")
        })),
    }
    lines
}

fn parse_args() -> io::Result<ProbeConfig> {
    let mut config = ProbeConfig::default();
    let outcome = parse_args_from(std::env::args().skip(1), &mut config)?;
    if outcome == ParseOutcome::HelpRequested {
        print_help();
        std::process::exit(0);
    }
    Ok(config)
}

fn parse_args_from(
    args: impl IntoIterator<Item = String>,
    config: &mut ProbeConfig,
) -> io::Result<ParseOutcome> {
    let mut args = args.into_iter();

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "-h" | "--help" => return Ok(ParseOutcome::HelpRequested),
            "--profiles" => config.profiles_path = Some(next_value(&mut args, "--profiles")?.into()),
            "--profile" => config.profile = Some(next_value(&mut args, "--profile")?),
            "--database" => config.database = Some(next_value(&mut args, "--database")?),
            "--sql" => config.sql = Some(next_value(&mut args, "--sql")?),
            "--timeout" => {
                let secs = next_value(&mut args, "--timeout")?
                    .parse::<u64>()
                    .map_err(|error| io_other(format!("invalid --timeout value: {error}")))?;
                config.timeout = Duration::from_secs(secs);
            }
            _ => {
                return Err(io_other(format!("unknown argument `{flag}`")));
            }
        }
    }

    Ok(ParseOutcome::Config)
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> io::Result<String> {
    args.next()
        .ok_or_else(|| io_other(format!("missing value for `{flag}`")))
}

fn print_help() {
    println!(
        "sqlnav connection probe\n\n\
Usage:\n  sqlnav-probe --profile <name> [OPTIONS]\n\n\
Without --database the server's databases are listed; with --database its\n\
tables and views; with --sql the query result as tab-separated rows.\n\n\
Options:\n  --profiles <path>    Profiles file (default: platform config dir)\n  --profile <name>     Connection profile to use\n  --database <name>    Database to connect to\n  --sql <query>        Query to run\n  --timeout <secs>     Per-operation timeout (default: 30)\n\n\
Environment:\n  SQLNAV_DB_PASSWORD is used when a profile reads its password from env.\n  SQLNAV_LOG overrides the log filter.\n"
    );
}

fn io_other(error: impl std::fmt::Display) -> io::Error {
    io::Error::other(error.to_string())
}
