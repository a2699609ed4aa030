use crate::driver::{ColumnMeta, ScanKind, SqlValue};

/// Display text for SQL NULL.
pub const NULL_SENTINEL: &str = "NULL";

const BINARY_TYPES: &[&str] = &[
    "BYTEA",
    "BINARY",
    "VARBINARY",
    "BLOB",
    "TINYBLOB",
    "MEDIUMBLOB",
    "LONGBLOB",
    "IMAGE",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnHeader {
    pub name: String,
    pub database_type: String,
    pub alignment: Alignment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Null,
    Text(String),
}

impl Cell {
    #[must_use]
    pub fn display(&self) -> &str {
        match self {
            Self::Null => NULL_SENTINEL,
            Self::Text(text) => text,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Null => None,
            Self::Text(text) => Some(text),
        }
    }

    /// Interprets boolean-ish listing columns (`true`, `t`, `1`, `YES`).
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        self.as_text().is_some_and(|text| {
            matches!(
                text.trim().to_ascii_lowercase().as_str(),
                "true" | "t" | "1" | "yes" | "y"
            )
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabularResult {
    columns: Vec<ColumnHeader>,
    binary_columns: Vec<bool>,
    rows: Vec<Vec<Cell>>,
}

impl TabularResult {
    #[must_use]
    pub fn new(columns: &[ColumnMeta]) -> Self {
        let single_column = columns.len() == 1;
        let headers = columns
            .iter()
            .map(|column| ColumnHeader {
                name: column.name.clone(),
                database_type: column.database_type.clone(),
                alignment: if single_column || column.scan == ScanKind::Text {
                    Alignment::Left
                } else {
                    Alignment::Right
                },
            })
            .collect();
        let binary_columns = columns
            .iter()
            .map(|column| is_binary_type(&column.database_type))
            .collect();

        Self {
            columns: headers,
            binary_columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, values: Vec<SqlValue>) {
        let row = values
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                let binary = self.binary_columns.get(index).copied().unwrap_or(false);
                render_value(value, binary)
            })
            .collect();
        self.rows.push(row);
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnHeader] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn into_columns(self) -> Vec<ColumnHeader> {
        self.columns
    }
}

#[must_use]
pub fn is_binary_type(database_type: &str) -> bool {
    let upper = database_type.to_ascii_uppercase();
    BINARY_TYPES.contains(&upper.as_str())
}

#[must_use]
pub fn render_value(value: SqlValue, binary: bool) -> Cell {
    let text = match value {
        SqlValue::Null => return Cell::Null,
        SqlValue::Bool(value) => value.to_string(),
        SqlValue::Int(value) => value.to_string(),
        SqlValue::UInt(value) => value.to_string(),
        SqlValue::Float(value) => value.to_string(),
        SqlValue::Text(value) => value,
        SqlValue::Bytes(bytes) if binary => hex::encode(bytes),
        SqlValue::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
    };
    Cell::Text(text)
}
