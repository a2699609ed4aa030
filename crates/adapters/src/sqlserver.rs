use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures_util::TryStreamExt;
use sqlnav_core::driver::{
    ColumnMeta, Connector, Driver, DriverConnection, DriverError, RowCursor, ScanKind, SqlValue,
};
use sqlnav_core::profiles::{ConnectionProfile, EngineKind};
use tiberius::{
    AuthMethod, Client, Column, ColumnData, ColumnType, Config, EncryptionLevel, FromSql,
    QueryItem, QueryStream, ToSql,
};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::credentials::resolve_password;

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDriver;

impl Driver for SqlServerDriver {
    fn engine(&self) -> EngineKind {
        EngineKind::SqlServer
    }

    fn connector(
        &self,
        profile: &ConnectionProfile,
        database: Option<&str>,
    ) -> Result<Box<dyn Connector>, DriverError> {
        if profile.host.trim().is_empty() {
            return Err(DriverError::new("sqlserver profile has no host"));
        }
        Ok(Box::new(SqlServerConnector {
            config: config_from_profile(profile, database),
            profile: profile.clone(),
        }))
    }
}

struct SqlServerConnector {
    config: Config,
    profile: ConnectionProfile,
}

#[async_trait]
impl Connector for SqlServerConnector {
    async fn connect(&self) -> Result<Box<dyn DriverConnection>, DriverError> {
        let password = resolve_password(&self.profile).await?;
        let mut config = self.config.clone();
        config.authentication(AuthMethod::sql_server(
            &self.profile.user,
            password.as_deref().unwrap_or(""),
        ));

        let client = open_client(&config).await?;
        Ok(Box::new(SqlServerConnection {
            client: Some(client),
            config,
        }))
    }
}

async fn open_client(config: &Config) -> Result<Client<Compat<TcpStream>>, DriverError> {
    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|error| DriverError::new(error.to_string()))?;
    tcp.set_nodelay(true)
        .map_err(|error| DriverError::new(error.to_string()))?;

    Client::connect(config.clone(), tcp.compat_write())
        .await
        .map_err(to_driver_error)
}

/// `client` is `None` after a cancel dropped the socket; the next query
/// reconnects with `config`.
struct SqlServerConnection {
    client: Option<Client<Compat<TcpStream>>>,
    config: Config,
}

#[async_trait]
impl DriverConnection for SqlServerConnection {
    async fn query<'a>(
        &'a mut self,
        sql: &str,
        params: &[String],
    ) -> Result<Box<dyn RowCursor + 'a>, DriverError> {
        if self.client.is_none() {
            tracing::debug!(addr = %self.config.get_addr(), "reconnecting after cancel");
            self.client = Some(open_client(&self.config).await?);
        }
        let Some(client) = self.client.as_mut() else {
            return Err(DriverError::new("sqlserver connection is closed"));
        };
        let params: Vec<&dyn ToSql> = params.iter().map(|param| param as &dyn ToSql).collect();
        let stream = client
            .query(sql.to_string(), &params)
            .await
            .map_err(to_driver_error)?;
        Ok(Box::new(SqlServerCursor {
            stream: Some(stream),
        }))
    }

    /// TDS attention is not exposed by the client, so the socket is
    /// dropped instead and the server aborts the batch on disconnect.
    async fn cancel_query(&mut self) -> Result<(), DriverError> {
        self.client = None;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        match self.client {
            Some(client) => client.close().await.map_err(to_driver_error),
            None => Ok(()),
        }
    }
}

struct SqlServerCursor<'a> {
    stream: Option<QueryStream<'a>>,
}

#[async_trait]
impl RowCursor for SqlServerCursor<'_> {
    async fn columns(&mut self) -> Result<Vec<ColumnMeta>, DriverError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(Vec::new());
        };
        let columns = stream.columns().await.map_err(to_driver_error)?;
        Ok(columns
            .map(|columns| columns.iter().map(column_meta).collect())
            .unwrap_or_default())
    }

    async fn next_row(&mut self) -> Result<Option<Vec<SqlValue>>, DriverError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        loop {
            match stream.try_next().await.map_err(to_driver_error)? {
                Some(QueryItem::Row(row)) => {
                    return Ok(Some(row.into_iter().map(column_value).collect()));
                }
                // Only the first result set is shown.
                Some(QueryItem::Metadata(metadata)) if metadata.result_index() > 0 => {
                    return Ok(None);
                }
                Some(QueryItem::Metadata(_)) => {}
                None => return Ok(None),
            }
        }
    }

    async fn finish(&mut self) -> Result<(), DriverError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        while stream.try_next().await.map_err(to_driver_error)?.is_some() {}
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.stream = None;
        Ok(())
    }
}

fn config_from_profile(profile: &ConnectionProfile, database: Option<&str>) -> Config {
    let mut config = Config::new();
    config.host(&profile.host);
    config.port(profile.effective_port());
    config.application_name("sqlnav");

    if let Some(database) = database.filter(|name| !name.is_empty()) {
        config.database(database);
    }

    if profile.tls {
        config.encryption(EncryptionLevel::Required);
    } else {
        config.encryption(EncryptionLevel::Off);
        config.trust_cert();
    }

    config
}

fn column_meta(column: &Column) -> ColumnMeta {
    let (database_type, scan) = type_name(column.column_type());
    ColumnMeta::new(column.name(), database_type, scan)
}

fn type_name(column_type: ColumnType) -> (&'static str, ScanKind) {
    match column_type {
        ColumnType::Bit | ColumnType::Bitn => ("BIT", ScanKind::Boolean),
        ColumnType::Int1 => ("TINYINT", ScanKind::Integer),
        ColumnType::Int2 => ("SMALLINT", ScanKind::Integer),
        ColumnType::Int4 | ColumnType::Intn => ("INT", ScanKind::Integer),
        ColumnType::Int8 => ("BIGINT", ScanKind::Integer),
        ColumnType::Float4 => ("REAL", ScanKind::Decimal),
        ColumnType::Float8 | ColumnType::Floatn => ("FLOAT", ScanKind::Decimal),
        ColumnType::Money | ColumnType::Money4 => ("MONEY", ScanKind::Decimal),
        ColumnType::Decimaln => ("DECIMAL", ScanKind::Decimal),
        ColumnType::Numericn => ("NUMERIC", ScanKind::Decimal),
        ColumnType::Datetime | ColumnType::Datetimen => ("DATETIME", ScanKind::Temporal),
        ColumnType::Datetime4 => ("SMALLDATETIME", ScanKind::Temporal),
        ColumnType::Daten => ("DATE", ScanKind::Temporal),
        ColumnType::Timen => ("TIME", ScanKind::Temporal),
        ColumnType::Datetime2 => ("DATETIME2", ScanKind::Temporal),
        ColumnType::DatetimeOffsetn => ("DATETIMEOFFSET", ScanKind::Temporal),
        ColumnType::Guid => ("UNIQUEIDENTIFIER", ScanKind::Text),
        ColumnType::BigVarBin => ("VARBINARY", ScanKind::Binary),
        ColumnType::BigBinary => ("BINARY", ScanKind::Binary),
        ColumnType::Image => ("IMAGE", ScanKind::Binary),
        ColumnType::BigVarChar => ("VARCHAR", ScanKind::Text),
        ColumnType::BigChar => ("CHAR", ScanKind::Text),
        ColumnType::NVarchar => ("NVARCHAR", ScanKind::Text),
        ColumnType::NChar => ("NCHAR", ScanKind::Text),
        ColumnType::Text => ("TEXT", ScanKind::Text),
        ColumnType::NText => ("NTEXT", ScanKind::Text),
        ColumnType::Xml => ("XML", ScanKind::Text),
        ColumnType::Null => ("NULL", ScanKind::Other),
        _ => ("SQL_VARIANT", ScanKind::Other),
    }
}

fn column_value(data: ColumnData<'static>) -> SqlValue {
    let value = match data {
        ColumnData::U8(value) => value.map(|value| SqlValue::UInt(value.into())),
        ColumnData::I16(value) => value.map(|value| SqlValue::Int(value.into())),
        ColumnData::I32(value) => value.map(|value| SqlValue::Int(value.into())),
        ColumnData::I64(value) => value.map(SqlValue::Int),
        ColumnData::F32(value) => value.map(|value| SqlValue::Float(value.into())),
        ColumnData::F64(value) => value.map(SqlValue::Float),
        ColumnData::Bit(value) => value.map(SqlValue::Bool),
        ColumnData::String(value) => value.map(|value| SqlValue::Text(value.into_owned())),
        ColumnData::Guid(value) => value.map(|value| SqlValue::Text(value.to_string())),
        ColumnData::Binary(value) => value.map(|value| SqlValue::Bytes(value.into_owned())),
        ColumnData::Numeric(value) => value.map(|value| SqlValue::Text(value.to_string())),
        ColumnData::Xml(value) => {
            value.map(|value| SqlValue::Text(value.into_owned().into_string()))
        }
        other => temporal_text(&other).map(SqlValue::Text),
    };
    value.unwrap_or(SqlValue::Null)
}

fn temporal_text(data: &ColumnData<'static>) -> Option<String> {
    match data {
        ColumnData::Date(_) => NaiveDate::from_sql(data).ok().flatten().map(|v| v.to_string()),
        ColumnData::Time(_) => NaiveTime::from_sql(data).ok().flatten().map(|v| v.to_string()),
        ColumnData::DateTimeOffset(_) => DateTime::<FixedOffset>::from_sql(data)
            .ok()
            .flatten()
            .map(|v| v.to_rfc3339()),
        _ => NaiveDateTime::from_sql(data)
            .ok()
            .flatten()
            .map(|v| v.to_string()),
    }
}

fn to_driver_error(error: tiberius::error::Error) -> DriverError {
    DriverError::new(error.to_string())
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use chrono::NaiveDate;
    use sqlnav_core::driver::{Driver, ScanKind, SqlValue};
    use sqlnav_core::profiles::{ConnectionProfile, EngineKind};
    use sqlnav_core::tabular::is_binary_type;
    use tiberius::{ColumnData, ColumnType, IntoSql};

    use super::{column_value, config_from_profile, type_name, SqlServerDriver};

    #[test]
    fn scalar_column_data_maps_to_driver_values() {
        assert_eq!(column_value(ColumnData::I32(None)), SqlValue::Null);
        assert_eq!(column_value(ColumnData::I32(Some(7))), SqlValue::Int(7));
        assert_eq!(column_value(ColumnData::U8(Some(255))), SqlValue::UInt(255));
        assert_eq!(column_value(ColumnData::Bit(Some(true))), SqlValue::Bool(true));
        assert_eq!(
            column_value(ColumnData::String(Some(Cow::Owned(String::new())))),
            SqlValue::Text(String::new())
        );
        assert_eq!(
            column_value(ColumnData::Binary(Some(Cow::Owned(vec![0xde, 0xad])))),
            SqlValue::Bytes(vec![0xde, 0xad])
        );
    }

    #[test]
    fn dates_render_as_iso_text() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).expect("valid date");
        assert_eq!(
            column_value(date.into_sql()),
            SqlValue::Text("2024-02-29".to_string())
        );
    }

    #[test]
    fn binary_types_are_hex_rendered() {
        for column_type in [ColumnType::BigVarBin, ColumnType::BigBinary, ColumnType::Image] {
            let (name, scan) = type_name(column_type);
            assert!(is_binary_type(name), "{name} should be binary");
            assert_eq!(scan, ScanKind::Binary);
        }
        assert!(!is_binary_type(type_name(ColumnType::NVarchar).0));
    }

    #[test]
    fn address_uses_profile_port() {
        let mut profile = ConnectionProfile::new(EngineKind::SqlServer, "local", "mssql", "sa");
        let config = config_from_profile(&profile, Some("shop"));
        assert_eq!(config.get_addr(), "mssql:1433");

        profile.port = 14330;
        assert_eq!(config_from_profile(&profile, None).get_addr(), "mssql:14330");
    }

    #[test]
    fn connector_requires_a_host() {
        let profile = ConnectionProfile::new(EngineKind::SqlServer, "local", "", "sa");
        assert!(SqlServerDriver.connector(&profile, None).is_err());
    }
}
