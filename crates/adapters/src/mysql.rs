use async_trait::async_trait;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::Queryable;
use mysql_async::{
    BinaryProtocol, Column, Conn, Opts, OptsBuilder, QueryResult, SslOpts, TextProtocol, Value,
};
use sqlnav_core::driver::{
    ColumnMeta, Connector, Driver, DriverConnection, DriverError, RowCursor, ScanKind, SqlValue,
};
use sqlnav_core::profiles::{ConnectionProfile, EngineKind};

use crate::credentials::resolve_password;

/// Collation id MySQL reports for binary strings.
const BINARY_CHARSET: u16 = 63;

#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDriver;

impl Driver for MysqlDriver {
    fn engine(&self) -> EngineKind {
        EngineKind::Mysql
    }

    fn connector(
        &self,
        profile: &ConnectionProfile,
        database: Option<&str>,
    ) -> Result<Box<dyn Connector>, DriverError> {
        if profile.host.trim().is_empty() {
            return Err(DriverError::new("mysql profile has no host"));
        }
        Ok(Box::new(MysqlConnector {
            builder: opts_from_profile(profile, database),
            profile: profile.clone(),
        }))
    }
}

#[derive(Debug)]
struct MysqlConnector {
    builder: OptsBuilder,
    profile: ConnectionProfile,
}

#[async_trait]
impl Connector for MysqlConnector {
    async fn connect(&self) -> Result<Box<dyn DriverConnection>, DriverError> {
        let mut builder = self.builder.clone();
        if let Some(password) = resolve_password(&self.profile).await? {
            builder = builder.pass(Some(password));
        }
        let opts = Opts::from(builder);
        let conn = Conn::new(opts.clone()).await.map_err(to_driver_error)?;
        Ok(Box::new(MysqlConnection { conn, opts }))
    }
}

struct MysqlConnection {
    conn: Conn,
    /// Used for the side connection that issues `KILL QUERY`.
    opts: Opts,
}

#[async_trait]
impl DriverConnection for MysqlConnection {
    async fn query<'a>(
        &'a mut self,
        sql: &str,
        params: &[String],
    ) -> Result<Box<dyn RowCursor + 'a>, DriverError> {
        let result = if params.is_empty() {
            MysqlResult::Text(
                self.conn
                    .query_iter(sql.to_string())
                    .await
                    .map_err(to_driver_error)?,
            )
        } else {
            let params: Vec<Value> = params.iter().cloned().map(Value::from).collect();
            MysqlResult::Binary(
                self.conn
                    .exec_iter(sql.to_string(), params)
                    .await
                    .map_err(to_driver_error)?,
            )
        };
        Ok(Box::new(MysqlCursor { result }))
    }

    async fn cancel_query(&mut self) -> Result<(), DriverError> {
        let mut killer = Conn::new(self.opts.clone()).await.map_err(to_driver_error)?;
        let killed = killer
            .query_drop(format!("KILL QUERY {}", self.conn.id()))
            .await;
        if let Err(error) = killer.disconnect().await {
            tracing::debug!(%error, "failed to close kill connection");
        }
        killed.map_err(to_driver_error)
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.conn.disconnect().await.map_err(to_driver_error)
    }
}

enum MysqlResult<'a> {
    Text(QueryResult<'a, 'static, TextProtocol>),
    Binary(QueryResult<'a, 'static, BinaryProtocol>),
    Closed,
}

struct MysqlCursor<'a> {
    result: MysqlResult<'a>,
}

#[async_trait]
impl RowCursor for MysqlCursor<'_> {
    async fn columns(&mut self) -> Result<Vec<ColumnMeta>, DriverError> {
        let columns = match &self.result {
            MysqlResult::Text(result) => result.columns_ref(),
            MysqlResult::Binary(result) => result.columns_ref(),
            MysqlResult::Closed => &[],
        };
        Ok(columns.iter().map(column_meta).collect())
    }

    async fn next_row(&mut self) -> Result<Option<Vec<SqlValue>>, DriverError> {
        let row = match &mut self.result {
            MysqlResult::Text(result) => result.next().await,
            MysqlResult::Binary(result) => result.next().await,
            MysqlResult::Closed => return Ok(None),
        }
        .map_err(to_driver_error)?;

        Ok(row.map(|row| row.unwrap().into_iter().map(mysql_value).collect()))
    }

    async fn finish(&mut self) -> Result<(), DriverError> {
        match std::mem::replace(&mut self.result, MysqlResult::Closed) {
            MysqlResult::Text(result) => result.drop_result().await,
            MysqlResult::Binary(result) => result.drop_result().await,
            MysqlResult::Closed => Ok(()),
        }
        .map_err(to_driver_error)
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.result = MysqlResult::Closed;
        Ok(())
    }
}

fn opts_from_profile(profile: &ConnectionProfile, database: Option<&str>) -> OptsBuilder {
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(profile.host.clone())
        .tcp_port(profile.effective_port());

    if !profile.user.is_empty() {
        builder = builder.user(Some(profile.user.clone()));
    }

    if let Some(database) = database.filter(|name| !name.is_empty()) {
        builder = builder.db_name(Some(database.to_string()));
    }

    if profile.tls {
        builder = builder.ssl_opts(SslOpts::default());
    } else {
        builder = builder.prefer_socket(false);
    }

    builder
}

fn column_meta(column: &Column) -> ColumnMeta {
    let binary = column.character_set() == BINARY_CHARSET;
    let (database_type, scan) = type_name(column.column_type(), binary);
    ColumnMeta::new(column.name_str().into_owned(), database_type, scan)
}

fn type_name(column_type: ColumnType, binary: bool) -> (&'static str, ScanKind) {
    match column_type {
        ColumnType::MYSQL_TYPE_TINY => ("TINYINT", ScanKind::Integer),
        ColumnType::MYSQL_TYPE_SHORT => ("SMALLINT", ScanKind::Integer),
        ColumnType::MYSQL_TYPE_INT24 => ("MEDIUMINT", ScanKind::Integer),
        ColumnType::MYSQL_TYPE_LONG => ("INT", ScanKind::Integer),
        ColumnType::MYSQL_TYPE_LONGLONG => ("BIGINT", ScanKind::Integer),
        ColumnType::MYSQL_TYPE_YEAR => ("YEAR", ScanKind::Integer),
        ColumnType::MYSQL_TYPE_FLOAT => ("FLOAT", ScanKind::Decimal),
        ColumnType::MYSQL_TYPE_DOUBLE => ("DOUBLE", ScanKind::Decimal),
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
            ("DECIMAL", ScanKind::Decimal)
        }
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => {
            ("DATE", ScanKind::Temporal)
        }
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => ("TIME", ScanKind::Temporal),
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_DATETIME2 => {
            ("DATETIME", ScanKind::Temporal)
        }
        ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_TIMESTAMP2 => {
            ("TIMESTAMP", ScanKind::Temporal)
        }
        ColumnType::MYSQL_TYPE_BIT => ("BIT", ScanKind::Binary),
        ColumnType::MYSQL_TYPE_JSON => ("JSON", ScanKind::Text),
        ColumnType::MYSQL_TYPE_ENUM => ("ENUM", ScanKind::Text),
        ColumnType::MYSQL_TYPE_SET => ("SET", ScanKind::Text),
        ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING if binary => {
            ("VARBINARY", ScanKind::Binary)
        }
        ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING => {
            ("VARCHAR", ScanKind::Text)
        }
        ColumnType::MYSQL_TYPE_STRING if binary => ("BINARY", ScanKind::Binary),
        ColumnType::MYSQL_TYPE_STRING => ("CHAR", ScanKind::Text),
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB
            if binary =>
        {
            ("BLOB", ScanKind::Binary)
        }
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB => ("TEXT", ScanKind::Text),
        ColumnType::MYSQL_TYPE_NULL => ("NULL", ScanKind::Other),
        _ => ("UNKNOWN", ScanKind::Other),
    }
}

fn mysql_value(value: Value) -> SqlValue {
    match value {
        Value::NULL => SqlValue::Null,
        Value::Bytes(bytes) => SqlValue::Bytes(bytes),
        Value::Int(value) => SqlValue::Int(value),
        Value::UInt(value) => SqlValue::UInt(value),
        Value::Float(value) => SqlValue::Float(f64::from(value)),
        Value::Double(value) => SqlValue::Float(value),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let mut text = format!("{year:04}-{month:02}-{day:02}");
            if hour != 0 || minute != 0 || second != 0 || micros != 0 {
                text.push_str(&format!(" {hour:02}:{minute:02}:{second:02}"));
            }
            if micros != 0 {
                text.push_str(&format!(".{micros:06}"));
            }
            SqlValue::Text(text)
        }
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            let hours = u32::from(hours) + days * 24;
            let mut text = format!("{sign}{hours:02}:{minutes:02}:{seconds:02}");
            if micros != 0 {
                text.push_str(&format!(".{micros:06}"));
            }
            SqlValue::Text(text)
        }
    }
}

fn to_driver_error(error: mysql_async::Error) -> DriverError {
    DriverError::new(error.to_string())
}
