use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::ControllerError;
use crate::profiles::{ConnectionProfile, EngineKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    message: String,
}

impl DriverError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A single value as decoded by a driver, before display rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// How a driver scans a column, used for display alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    Text,
    Integer,
    Decimal,
    Boolean,
    Binary,
    Temporal,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    /// Engine type name, upper-cased (`BYTEA`, `VARCHAR`, ...).
    pub database_type: String,
    pub scan: ScanKind,
}

impl ColumnMeta {
    #[must_use]
    pub fn new(name: impl Into<String>, database_type: impl Into<String>, scan: ScanKind) -> Self {
        Self {
            name: name.into(),
            database_type: database_type.into(),
            scan,
        }
    }
}

/// Engine entry point. `connector` validates the profile without touching
/// the network; the returned connector performs the actual connect.
pub trait Driver: Send + Sync {
    fn engine(&self) -> EngineKind;

    fn connector(
        &self,
        profile: &ConnectionProfile,
        database: Option<&str>,
    ) -> Result<Box<dyn Connector>, DriverError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DriverConnection>, DriverError>;
}

#[async_trait]
pub trait DriverConnection: Send {
    /// Starts a query. Parameters are bound positionally using the
    /// engine's placeholder style (`$1`, `?`, `@P1`).
    async fn query<'a>(
        &'a mut self,
        sql: &str,
        params: &[String],
    ) -> Result<Box<dyn RowCursor + 'a>, DriverError>;

    /// Asks the server to abort the statement left running by an
    /// interrupted query. Called after its cursor is dropped and before the
    /// connection is reused or closed.
    async fn cancel_query(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError>;
}

#[async_trait]
pub trait RowCursor: Send {
    async fn columns(&mut self) -> Result<Vec<ColumnMeta>, DriverError>;

    async fn next_row(&mut self) -> Result<Option<Vec<SqlValue>>, DriverError>;

    /// Surfaces errors reported after the last row.
    async fn finish(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Drivers available to the controllers, keyed by engine.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<EngineKind, Arc<dyn Driver>>,
}

impl DriverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.insert(driver.engine(), driver);
    }

    #[must_use]
    pub fn with(mut self, driver: Arc<dyn Driver>) -> Self {
        self.register(driver);
        self
    }

    pub fn driver(&self, engine: EngineKind) -> Result<Arc<dyn Driver>, ControllerError> {
        self.drivers
            .get(&engine)
            .cloned()
            .ok_or_else(|| ControllerError::connect(format!("no driver registered for `{engine}`")))
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut engines: Vec<&str> = self.drivers.keys().map(|engine| engine.as_str()).collect();
        engines.sort_unstable();
        f.debug_struct("DriverRegistry")
            .field("engines", &engines)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Connector, Driver, DriverError, DriverRegistry};
    use crate::error::ControllerError;
    use crate::profiles::{ConnectionProfile, EngineKind};

    struct RejectingDriver;

    impl Driver for RejectingDriver {
        fn engine(&self) -> EngineKind {
            EngineKind::Mysql
        }

        fn connector(
            &self,
            _profile: &ConnectionProfile,
            _database: Option<&str>,
        ) -> Result<Box<dyn Connector>, DriverError> {
            Err(DriverError::new("rejected"))
        }
    }

    #[test]
    fn registry_resolves_by_engine() {
        let registry = DriverRegistry::new().with(Arc::new(RejectingDriver));
        let driver = registry.driver(EngineKind::Mysql).expect("driver should exist");
        assert_eq!(driver.engine(), EngineKind::Mysql);
    }

    #[test]
    fn missing_driver_is_a_connect_error() {
        let registry = DriverRegistry::new().with(Arc::new(RejectingDriver));
        let error = registry
            .driver(EngineKind::SqlServer)
            .err()
            .expect("lookup should fail");
        assert_eq!(
            error,
            ControllerError::Connect {
                message: "no driver registered for `sqlserver`".to_string()
            }
        );
    }
}
