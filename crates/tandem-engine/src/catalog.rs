//! Table catalog.
//!
//! Holds the schemas of all tables and assigns table ids. With a data
//! directory the catalog is kept in `catalog.toml` and rewritten on every
//! change, so recovery can recreate tables before replaying the change log.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tandem_common::types::{ColumnDef, TableId, TableSchema};
use tandem_common::{TandemError, TandemResult};

/// File name of the persisted catalog.
pub const CATALOG_FILE: &str = "catalog.toml";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    tables: Vec<TableSchema>,
}

/// Registry of table schemas.
#[derive(Debug)]
pub struct Catalog {
    path: Option<PathBuf>,
    tables: RwLock<BTreeMap<TableId, Arc<TableSchema>>>,
}

impl Catalog {
    /// Creates an empty catalog that is never persisted.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    /// Loads the catalog kept in `dir`, or starts an empty one.
    pub fn open(dir: &Path) -> TandemResult<Self> {
        let path = dir.join(CATALOG_FILE);
        let mut tables = BTreeMap::new();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let file: CatalogFile = toml::from_str(&content)
                .map_err(|e| TandemError::corruption(format!("{}: {}", path.display(), e)))?;
            for schema in file.tables {
                let schema = TableSchema::new(schema.table_id, schema.name, schema.columns)?;
                tables.insert(schema.table_id, Arc::new(schema));
            }
        }
        info!(path = %path.display(), tables = tables.len(), "Loaded catalog");
        Ok(Self {
            path: Some(path),
            tables: RwLock::new(tables),
        })
    }

    /// Registers a new table and returns its schema.
    pub fn create_table(&self, name: &str, columns: Vec<ColumnDef>) -> TandemResult<Arc<TableSchema>> {
        let mut tables = self.tables.write();
        if tables.values().any(|s| s.name == name) {
            return Err(TandemError::TableExists {
                table: name.to_string(),
            });
        }
        let next = tables.keys().next_back().map_or(1, |id| id.as_u64() + 1);
        let schema = Arc::new(TableSchema::new(TableId::new(next), name, columns)?);
        tables.insert(schema.table_id, Arc::clone(&schema));
        if let Err(err) = self.persist(&tables) {
            tables.remove(&schema.table_id);
            return Err(err);
        }
        debug!(table = %schema.name, id = %schema.table_id, "Registered table");
        Ok(schema)
    }

    fn persist(&self, tables: &BTreeMap<TableId, Arc<TableSchema>>) -> TandemResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = CatalogFile {
            tables: tables.values().map(|s| s.as_ref().clone()).collect(),
        };
        let content = toml::to_string_pretty(&file).map_err(|e| TandemError::internal(e.to_string()))?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Returns a schema by id.
    pub fn get(&self, table_id: TableId) -> TandemResult<Arc<TableSchema>> {
        self.tables
            .read()
            .get(&table_id)
            .cloned()
            .ok_or_else(|| TandemError::table_not_found(table_id))
    }

    /// Returns a schema by name.
    pub fn by_name(&self, name: &str) -> TandemResult<Arc<TableSchema>> {
        self.tables
            .read()
            .values()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| TandemError::table_not_found(name))
    }

    /// Returns all schemas ordered by id.
    #[must_use]
    pub fn tables(&self) -> Vec<Arc<TableSchema>> {
        self.tables.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_common::types::ColumnType;

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("amount", ColumnType::Decimal { scale: 2 }),
            ColumnDef::new("type", ColumnType::Text),
        ]
    }

    #[test]
    fn test_ids_are_assigned_in_order() {
        let catalog = Catalog::in_memory();
        let a = catalog.create_table("accounts", columns()).unwrap();
        let b = catalog.create_table("orders", columns()).unwrap();
        assert_eq!(a.table_id, TableId::new(1));
        assert_eq!(b.table_id, TableId::new(2));
        assert!(matches!(
            catalog.create_table("accounts", columns()),
            Err(TandemError::TableExists { .. })
        ));
        assert_eq!(catalog.by_name("orders").unwrap().table_id, b.table_id);
    }

    #[test]
    fn test_persisted_catalog_reloads() {
        let dir = tempfile::tempdir().unwrap();
        {
            let catalog = Catalog::open(dir.path()).unwrap();
            catalog.create_table("accounts", columns()).unwrap();
        }
        let catalog = Catalog::open(dir.path()).unwrap();
        let schema = catalog.get(TableId::new(1)).unwrap();
        assert_eq!(schema.name, "accounts");
        assert_eq!(schema.columns, columns());
    }
}
