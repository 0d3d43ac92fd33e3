//! Immutable snapshot groups.
//!
//! A [`Group`] is the table-set of one database at one committed version.
//! Snapshots are shared as `Arc<Group>`; a write transaction stages a deep
//! clone and the commit installs it as the next version.

use crate::error::{Result, StoreError};
use crate::schema::{is_reserved_type, ColumnDef};
use crate::value::{ColumnType, RowKey, Value};

/// One table within a [`Group`].
#[derive(Debug, Clone, Default)]
pub struct TableData {
    name: String,
    columns: Vec<ColumnDef>,
    /// Stable row keys, parallel to `rows`.
    keys: Vec<RowKey>,
    rows: Vec<Vec<Value>>,
    next_key: RowKey,
}

impl TableData {
    pub(crate) fn new(name: &str, columns: &[ColumnDef]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.to_vec(),
            keys: Vec::new(),
            rows: Vec::new(),
            next_key: 0,
        }
    }

    /// Object-type name of this table.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column definitions in declaration order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Index of the named column.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Value at `(row, col)`.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<&Value> {
        self.rows.get(row)?.get(col)
    }

    /// Stable key of the row at `row`.
    #[must_use]
    pub fn row_key(&self, row: usize) -> Option<RowKey> {
        self.keys.get(row).copied()
    }

    /// Current index of the row with the given stable key.
    #[must_use]
    pub fn index_of_key(&self, key: RowKey) -> Option<usize> {
        self.keys.iter().position(|k| *k == key)
    }

    /// Index of the first row whose string column equals `value`.
    #[must_use]
    pub fn find_first_string(&self, col: usize, value: &str) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.get(col).and_then(Value::as_str) == Some(value))
    }

    // -- staged mutation (write transactions only) --

    pub(crate) fn add_column(&mut self, def: ColumnDef) -> Result<usize> {
        if let Some(existing) = self.columns.iter().find(|c| c.name == def.name) {
            if existing.ty != def.ty {
                return Err(StoreError::SchemaMismatch(format!(
                    "column '{}.{}' already exists with a different type",
                    self.name, def.name
                )));
            }
            return Ok(self.column_index(&def.name).unwrap_or(0));
        }
        for row in &mut self.rows {
            row.push(Value::default_for(&def.ty));
        }
        self.columns.push(def);
        Ok(self.columns.len() - 1)
    }

    pub(crate) fn insert_row(&mut self) -> usize {
        let key = self.next_key;
        self.next_key += 1;
        self.keys.push(key);
        self.rows
            .push(self.columns.iter().map(|c| Value::default_for(&c.ty)).collect());
        self.rows.len() - 1
    }

    pub(crate) fn remove_row(&mut self, row: usize) -> Result<()> {
        if row >= self.rows.len() {
            return Err(StoreError::RowOutOfBounds(row));
        }
        self.keys.remove(row);
        self.rows.remove(row);
        Ok(())
    }

    pub(crate) fn set(&mut self, row: usize, col: usize, value: Value) -> Result<()> {
        let def = self
            .columns
            .get(col)
            .ok_or_else(|| StoreError::NoSuchColumn(format!("{}[{col}]", self.name)))?;
        if !value.matches(&def.ty) {
            return Err(StoreError::TypeMismatch(def.name.clone()));
        }
        let cell = self
            .rows
            .get_mut(row)
            .ok_or(StoreError::RowOutOfBounds(row))?
            .get_mut(col)
            .ok_or_else(|| StoreError::NoSuchColumn(format!("{}[{col}]", self.name)))?;
        *cell = value;
        Ok(())
    }

    pub(crate) fn add_link(&mut self, row: usize, col: usize, key: RowKey) -> Result<()> {
        let def = self
            .columns
            .get(col)
            .ok_or_else(|| StoreError::NoSuchColumn(format!("{}[{col}]", self.name)))?;
        if !matches!(def.ty, ColumnType::LinkList { .. }) {
            return Err(StoreError::TypeMismatch(def.name.clone()));
        }
        let cell = self
            .rows
            .get_mut(row)
            .ok_or(StoreError::RowOutOfBounds(row))?
            .get_mut(col)
            .ok_or_else(|| StoreError::NoSuchColumn(format!("{}[{col}]", self.name)))?;
        if let Value::LinkList(keys) = cell {
            keys.push(key);
        }
        Ok(())
    }
}

/// The table-set of one database at one committed version.
#[derive(Debug, Clone, Default)]
pub struct Group {
    tables: Vec<TableData>,
}

impl Group {
    /// Whether the group contains no tables at all.
    ///
    /// A freshly created database (schema never applied, nothing committed)
    /// is empty in this sense even though the file exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Number of tables.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Table at the given internal index.
    #[must_use]
    pub fn table_at(&self, index: usize) -> Option<&TableData> {
        self.tables.get(index)
    }

    /// Table with the given object-type name.
    #[must_use]
    pub fn table_by_name(&self, name: &str) -> Option<&TableData> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Internal index of the named table.
    #[must_use]
    pub fn table_index(&self, name: &str) -> Option<usize> {
        self.tables.iter().position(|t| t.name == name)
    }

    /// Logical object-type name for the table at `index`.
    ///
    /// Returns `None` for reserved tables (metadata types with the `__`
    /// prefix and the administrative `RealmFile` type), which are excluded
    /// from change notifications.
    #[must_use]
    pub fn object_type_at(&self, index: usize) -> Option<&str> {
        let table = self.tables.get(index)?;
        if is_reserved_type(&table.name) {
            None
        } else {
            Some(&table.name)
        }
    }

    pub(crate) fn tables(&self) -> &[TableData] {
        &self.tables
    }

    pub(crate) fn ensure_table(&mut self, name: &str, columns: &[ColumnDef]) -> Result<usize> {
        if let Some(idx) = self.table_index(name) {
            for col in columns {
                self.tables[idx].add_column(col.clone())?;
            }
            return Ok(idx);
        }
        self.tables.push(TableData::new(name, columns));
        Ok(self.tables.len() - 1)
    }

    pub(crate) fn table_mut(&mut self, name: &str) -> Result<&mut TableData> {
        self.tables
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| StoreError::NoSuchTable(name.to_string()))
    }
}
