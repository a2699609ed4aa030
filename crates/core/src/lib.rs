//! Session controllers for browsing PostgreSQL, MySQL and SQL Server
//! databases, independent of any particular front-end.

pub mod adhoc;
pub mod context;
pub mod database;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod introspection;
pub mod logging;
pub mod object;
pub mod profiles;
pub mod query_execution;
pub mod script_cache;
pub mod session;
pub mod tabular;

#[cfg(test)]
pub(crate) mod testing;
