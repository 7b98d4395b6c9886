//! Table schemas.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{ColumnType, Row, TableId, Value};
use crate::constants::{ROW_ID_COLUMN, SEQ_COLUMN};
use crate::error::{TandemError, TandemResult};

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column type.
    pub column_type: ColumnType,
    /// Whether NULL is allowed.
    pub nullable: bool,
}

impl ColumnDef {
    /// Creates a nullable column.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    /// Marks the column NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Schema of a table.
///
/// The row key is not a column: every row is addressed by its `RowId`,
/// which columnar scans expose as the `_row_id` pseudo column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table identifier.
    pub table_id: TableId,
    /// Table name.
    pub name: String,
    /// Ordered column definitions.
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Creates a schema, rejecting empty, duplicate or reserved column names.
    pub fn new(
        table_id: TableId,
        name: impl Into<String>,
        columns: Vec<ColumnDef>,
    ) -> TandemResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(TandemError::schema_mismatch("table name must not be empty"));
        }
        if columns.is_empty() {
            return Err(TandemError::schema_mismatch(format!(
                "table '{}' must have at least one column",
                name
            )));
        }
        if columns.len() > usize::from(u16::MAX) {
            return Err(TandemError::schema_mismatch("too many columns"));
        }
        let mut seen = HashSet::new();
        for column in &columns {
            if column.name.is_empty() {
                return Err(TandemError::schema_mismatch("column name must not be empty"));
            }
            if column.name == ROW_ID_COLUMN || column.name == SEQ_COLUMN {
                return Err(TandemError::schema_mismatch(format!(
                    "column name '{}' is reserved",
                    column.name
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(TandemError::schema_mismatch(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        Ok(Self {
            table_id,
            name,
            columns,
        })
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    /// Returns the index of a column by name.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Returns a column definition by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Checks arity, types and nullability of a row.
    pub fn validate_row(&self, values: &[Value]) -> TandemResult<()> {
        if values.len() != self.columns.len() {
            return Err(TandemError::schema_mismatch(format!(
                "table '{}' expects {} values, got {}",
                self.name,
                self.columns.len(),
                values.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(values) {
            if value.is_null() {
                if !column.nullable {
                    return Err(TandemError::schema_mismatch(format!(
                        "column '{}' is NOT NULL",
                        column.name
                    )));
                }
                continue;
            }
            if !column.column_type.accepts(value) {
                return Err(TandemError::schema_mismatch(format!(
                    "column '{}' has type {}, got {:?}",
                    column.name, column.column_type, value
                )));
            }
        }
        Ok(())
    }

    /// Validates a row and widens decimals to their column scale.
    pub fn conform_row(&self, values: Row) -> TandemResult<Row> {
        self.validate_row(&values)?;
        self.columns
            .iter()
            .zip(values)
            .map(|(column, value)| match (column.column_type, &value) {
                (_, Value::Null) => Ok(value),
                (ColumnType::Decimal { scale }, _) => value.rescale(scale).ok_or_else(|| {
                    TandemError::schema_mismatch(format!(
                        "value {} overflows column '{}'",
                        value, column.name
                    ))
                }),
                _ => Ok(value),
            })
            .collect()
    }
}
