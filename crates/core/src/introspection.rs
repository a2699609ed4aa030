//! Engine-specific catalog queries.

use crate::profiles::EngineKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogQuery {
    pub sql: &'static str,
    pub params: Vec<String>,
}

impl CatalogQuery {
    fn new(sql: &'static str, params: Vec<String>) -> Self {
        Self { sql, params }
    }
}

/// One column of text: database names.
#[must_use]
pub fn list_databases(engine: EngineKind) -> CatalogQuery {
    let sql = match engine {
        EngineKind::Postgres => {
            "select datname from pg_database where not datistemplate order by datname asc"
        }
        EngineKind::Mysql => {
            "select schema_name from information_schema.schemata \
             order by schema_name in ('information_schema', 'performance_schema', 'sys', 'mysql') asc, schema_name asc"
        }
        EngineKind::SqlServer => {
            "select name from master.dbo.sysdatabases \
             where name not in ('master', 'tempdb', 'model', 'msdb') order by name asc"
        }
    };
    CatalogQuery::new(sql, Vec::new())
}

/// Two columns: is-view flag, object name.
#[must_use]
pub fn list_objects(engine: EngineKind, database: &str) -> CatalogQuery {
    match engine {
        EngineKind::Postgres => CatalogQuery::new(
            "select table_type = 'VIEW' as is_view, table_schema || '.' || table_name as name \
             from information_schema.tables \
             order by table_schema in ('pg_catalog', 'information_schema') asc, name asc",
            Vec::new(),
        ),
        EngineKind::Mysql => CatalogQuery::new(
            "select table_type like '%VIEW' as is_view, table_name as name \
             from information_schema.tables where table_schema = ? order by name asc",
            vec![database.to_string()],
        ),
        EngineKind::SqlServer => CatalogQuery::new(
            "select case table_type when 'VIEW' then 1 else 0 end as is_view, \
             concat(table_schema, '.', table_name) as name \
             from information_schema.tables order by name",
            Vec::new(),
        ),
    }
}

/// Four columns: name, declared type, default, nullable flag.
#[must_use]
pub fn columns(engine: EngineKind, database: &str, object: &str) -> CatalogQuery {
    match engine {
        EngineKind::Postgres => CatalogQuery::new(
            "select column_name, udt_name, column_default, is_nullable = 'YES' as is_nullable \
             from information_schema.columns \
             where table_schema || '.' || table_name = $1 order by ordinal_position",
            vec![object.to_string()],
        ),
        EngineKind::Mysql => CatalogQuery::new(
            "select column_name, data_type, column_default, is_nullable = 'YES' as is_nullable \
             from information_schema.columns \
             where table_schema = ? and table_name = ? order by ordinal_position",
            vec![database.to_string(), object.to_string()],
        ),
        EngineKind::SqlServer => CatalogQuery::new(
            "select column_name, data_type, column_default, \
             case is_nullable when 'YES' then 1 else 0 end as is_nullable \
             from information_schema.columns \
             where concat(table_schema, '.', table_name) = @P1 order by ordinal_position",
            vec![object.to_string()],
        ),
    }
}

/// One column: the view's definition text.
#[must_use]
pub fn view_definition(engine: EngineKind, database: &str, object: &str) -> CatalogQuery {
    match engine {
        EngineKind::Postgres => CatalogQuery::new(
            "select view_definition from information_schema.views \
             where table_schema || '.' || table_name = $1",
            vec![object.to_string()],
        ),
        EngineKind::Mysql => CatalogQuery::new(
            "select view_definition from information_schema.views \
             where table_schema = ? and table_name = ?",
            vec![database.to_string(), object.to_string()],
        ),
        EngineKind::SqlServer => CatalogQuery::new(
            "select view_definition from information_schema.views \
             where concat(table_schema, '.', table_name) = @P1",
            vec![object.to_string()],
        ),
    }
}

#[must_use]
pub fn select_all(object: &str) -> String {
    format!("select * from {object}")
}
