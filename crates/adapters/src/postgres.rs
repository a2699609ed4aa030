use std::error::Error;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::StreamExt;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use rust_decimal::Decimal;
use sqlnav_core::driver::{
    ColumnMeta, Connector, Driver, DriverConnection, DriverError, RowCursor, ScanKind, SqlValue,
};
use sqlnav_core::profiles::{ConnectionProfile, EngineKind};
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{CancelToken, Client, Config, NoTls, Row, RowStream};

use crate::credentials::resolve_password;

const APPLICATION_NAME: &str = "sqlnav";

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

impl Driver for PostgresDriver {
    fn engine(&self) -> EngineKind {
        EngineKind::Postgres
    }

    fn connector(
        &self,
        profile: &ConnectionProfile,
        database: Option<&str>,
    ) -> Result<Box<dyn Connector>, DriverError> {
        if profile.host.trim().is_empty() {
            return Err(DriverError::new("postgres profile has no host"));
        }
        Ok(Box::new(PostgresConnector {
            config: config_from_profile(profile, database),
            profile: profile.clone(),
        }))
    }
}

struct PostgresConnector {
    config: Config,
    profile: ConnectionProfile,
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(&self) -> Result<Box<dyn DriverConnection>, DriverError> {
        let mut config = self.config.clone();
        if let Some(password) = resolve_password(&self.profile).await? {
            config.password(password);
        }

        let tls = self.profile.tls;
        let (client, task) = if tls {
            let (client, connection) = config
                .connect(tls_connector()?)
                .await
                .map_err(to_driver_error)?;
            (client, tokio::spawn(drive_connection(connection)))
        } else {
            let (client, connection) = config.connect(NoTls).await.map_err(to_driver_error)?;
            (client, tokio::spawn(drive_connection(connection)))
        };

        Ok(Box::new(PostgresConnection {
            cancel_token: client.cancel_token(),
            client,
            task,
            tls,
        }))
    }
}

fn tls_connector() -> Result<MakeTlsConnector, DriverError> {
    let tls = TlsConnector::builder()
        .build()
        .map_err(|error| DriverError::new(format!("building tls connector: {error}")))?;
    Ok(MakeTlsConnector::new(tls))
}

async fn drive_connection<F>(connection: F)
where
    F: std::future::Future<Output = Result<(), tokio_postgres::Error>>,
{
    if let Err(error) = connection.await {
        tracing::debug!(%error, "postgres connection closed with error");
    }
}

struct PostgresConnection {
    client: Client,
    task: JoinHandle<()>,
    cancel_token: CancelToken,
    tls: bool,
}

#[async_trait]
impl DriverConnection for PostgresConnection {
    async fn query<'a>(
        &'a mut self,
        sql: &str,
        params: &[String],
    ) -> Result<Box<dyn RowCursor + 'a>, DriverError> {
        let types = vec![Type::TEXT; params.len()];
        let statement = self
            .client
            .prepare_typed(sql, &types)
            .await
            .map_err(to_driver_error)?;
        let columns = statement
            .columns()
            .iter()
            .map(|column| column_meta(column.name(), column.type_()))
            .collect();

        let params = params.iter().map(|param| param as &(dyn ToSql + Sync));
        let stream = self
            .client
            .query_raw(&statement, params)
            .await
            .map_err(to_driver_error)?;

        Ok(Box::new(PostgresCursor {
            columns,
            stream: Some(Box::pin(stream)),
        }))
    }

    /// Sends a CancelRequest over a fresh socket; the backend then fails
    /// the running statement with `57014`.
    async fn cancel_query(&mut self) -> Result<(), DriverError> {
        if self.tls {
            self.cancel_token.cancel_query(tls_connector()?).await
        } else {
            self.cancel_token.cancel_query(NoTls).await
        }
        .map_err(to_driver_error)
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        let PostgresConnection { client, task, .. } = *self;
        drop(client);
        task.await
            .map_err(|error| DriverError::new(format!("postgres connection task: {error}")))
    }
}

struct PostgresCursor {
    columns: Vec<ColumnMeta>,
    stream: Option<Pin<Box<RowStream>>>,
}

#[async_trait]
impl RowCursor for PostgresCursor {
    async fn columns(&mut self) -> Result<Vec<ColumnMeta>, DriverError> {
        Ok(self.columns.clone())
    }

    async fn next_row(&mut self) -> Result<Option<Vec<SqlValue>>, DriverError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        match stream.next().await {
            Some(Ok(row)) => decode_row(&row).map(Some).map_err(to_driver_error),
            Some(Err(error)) => Err(to_driver_error(error)),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.stream = None;
        Ok(())
    }
}

fn config_from_profile(profile: &ConnectionProfile, database: Option<&str>) -> Config {
    let mut config = Config::new();
    config
        .host(&profile.host)
        .port(profile.effective_port())
        .application_name(APPLICATION_NAME)
        .ssl_mode(if profile.tls {
            SslMode::Require
        } else {
            SslMode::Disable
        });

    if !profile.user.is_empty() {
        config.user(&profile.user);
    }
    if let Some(database) = database.filter(|name| !name.is_empty()) {
        config.dbname(database);
    }

    config
}

fn column_meta(name: &str, ty: &Type) -> ColumnMeta {
    ColumnMeta::new(name, ty.name().to_uppercase(), scan_kind(ty))
}

fn scan_kind(ty: &Type) -> ScanKind {
    match *ty {
        Type::BOOL => ScanKind::Boolean,
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => ScanKind::Integer,
        Type::FLOAT4 | Type::FLOAT8 | Type::NUMERIC => ScanKind::Decimal,
        Type::BYTEA => ScanKind::Binary,
        Type::DATE | Type::TIME | Type::TIMESTAMP | Type::TIMESTAMPTZ => ScanKind::Temporal,
        _ if <String as FromSql>::accepts(ty) => ScanKind::Text,
        _ => ScanKind::Other,
    }
}

fn decode_row(row: &Row) -> Result<Vec<SqlValue>, tokio_postgres::Error> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(index, column)| decode_value(row, index, column.type_()))
        .collect()
}

fn decode_value(row: &Row, index: usize, ty: &Type) -> Result<SqlValue, tokio_postgres::Error> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(index)?.map(SqlValue::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(index)?
            .map(|value| SqlValue::Int(value.into())),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(index)?
            .map(|value| SqlValue::Int(value.into())),
        Type::INT8 => row.try_get::<_, Option<i64>>(index)?.map(SqlValue::Int),
        Type::OID => row
            .try_get::<_, Option<u32>>(index)?
            .map(|value| SqlValue::UInt(value.into())),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(index)?
            .map(|value| SqlValue::Float(value.into())),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(index)?.map(SqlValue::Float),
        Type::NUMERIC => numeric_value(row, index)?,
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(index)?.map(SqlValue::Bytes),
        Type::DATE => row
            .try_get::<_, Option<chrono::NaiveDate>>(index)?
            .map(|value| SqlValue::Text(value.to_string())),
        Type::TIME => row
            .try_get::<_, Option<chrono::NaiveTime>>(index)?
            .map(|value| SqlValue::Text(value.to_string())),
        Type::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(index)?
            .map(|value| SqlValue::Text(value.to_string())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(index)?
            .map(|value| SqlValue::Text(value.to_rfc3339())),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(index)?
            .map(|value| SqlValue::Text(value.to_string())),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(index)?
            .map(|value| SqlValue::Text(value.to_string())),
        _ if <String as FromSql>::accepts(ty) => {
            row.try_get::<_, Option<String>>(index)?.map(SqlValue::Text)
        }
        _ => row
            .try_get::<_, Option<RawValue>>(index)?
            .map(|value| SqlValue::Bytes(value.0)),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

/// Wire bytes of a type without a dedicated decoder.
struct RawValue(Vec<u8>);

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Self(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Sign words of the `NUMERIC` special values, which `Decimal` rejects.
fn numeric_special(raw: &[u8]) -> Option<&'static str> {
    match raw.get(4..6)? {
        [0xC0, 0x00] => Some("NaN"),
        [0xD0, 0x00] => Some("Infinity"),
        [0xF0, 0x00] => Some("-Infinity"),
        _ => None,
    }
}

fn numeric_value(row: &Row, index: usize) -> Result<Option<SqlValue>, tokio_postgres::Error> {
    let value = row.try_get::<_, Option<RawValue>>(index)?;
    Ok(value.map(|RawValue(raw)| numeric_from_wire(raw)))
}

/// Values outside `Decimal`'s 28 digits keep the wire bytes.
fn numeric_from_wire(raw: Vec<u8>) -> SqlValue {
    if let Some(special) = numeric_special(&raw) {
        return SqlValue::Text(special.to_string());
    }
    match Decimal::from_sql(&Type::NUMERIC, &raw) {
        Ok(value) => SqlValue::Text(value.to_string()),
        Err(_) => SqlValue::Bytes(raw),
    }
}

fn to_driver_error(error: tokio_postgres::Error) -> DriverError {
    match error.as_db_error() {
        Some(db_error) => DriverError::new(format!(
            "{}: {}",
            db_error.code().code(),
            db_error.message()
        )),
        None => DriverError::new(error.to_string()),
    }
}
