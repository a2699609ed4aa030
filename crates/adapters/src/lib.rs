//! Engine drivers for the sqlnav controllers.

use std::sync::Arc;

use sqlnav_core::driver::DriverRegistry;

pub mod credentials;
pub mod mysql;
pub mod postgres;
pub mod sqlserver;

/// Registry with every bundled engine.
#[must_use]
pub fn default_drivers() -> DriverRegistry {
    DriverRegistry::new()
        .with(Arc::new(postgres::PostgresDriver))
        .with(Arc::new(mysql::MysqlDriver))
        .with(Arc::new(sqlserver::SqlServerDriver))
}
