//! Object schema definitions and additive reconciliation.
//!
//! Schema changes in this store are always *additive*: reconciliation may add
//! missing tables and missing columns but never removes or retypes anything.
//! A request that would require a destructive change fails with
//! [`StoreError::SchemaMismatch`].

use crate::error::{Result, StoreError};
use crate::value::ColumnType;

/// Reserved object-type prefix for metadata tables (e.g. `__ResultSets`).
const RESERVED_PREFIX: &str = "__";

/// The administrative object type enumerating managed database files.
const ADMIN_TYPE: &str = "RealmFile";

/// Whether an object-type name is reserved.
///
/// Reserved types are representable in a schema but excluded from
/// change-notification name resolution ([`Group::object_type_at`]): the
/// `__`-prefixed metadata types and the administrative `RealmFile` type.
///
/// [`Group::object_type_at`]: crate::Group::object_type_at
#[must_use]
pub fn is_reserved_type(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX) || name == ADMIN_TYPE
}

/// Definition of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name, unique within its table.
    pub name: String,
    /// Column type.
    pub ty: ColumnType,
}

impl ColumnDef {
    /// Creates a column definition.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Definition of one table (object type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    /// Object-type name.
    pub name: String,
    /// Ordered column definitions.
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Creates an empty table definition.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Adds a column, builder style.
    #[must_use]
    pub fn with_column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push(ColumnDef::new(name, ty));
        self
    }

    /// Returns the index of the named column.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// An ordered set of table definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    tables: Vec<TableDef>,
}

impl Schema {
    /// Creates a schema from table definitions.
    #[must_use]
    pub fn new(tables: Vec<TableDef>) -> Self {
        Self { tables }
    }

    /// Returns the table definitions in declaration order.
    #[must_use]
    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    /// Looks up a table definition by object-type name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Whether the schema declares the named object type.
    #[must_use]
    pub fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    /// Merges `desired` into `self` additively.
    ///
    /// Missing tables and missing columns are added; existing columns are
    /// left untouched. Returns `true` if anything was added.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SchemaMismatch`] if an existing column is
    /// declared with a different type in `desired`.
    pub fn merge_additive(&mut self, desired: &Schema) -> Result<bool> {
        let mut changed = false;
        for want in &desired.tables {
            match self.tables.iter_mut().find(|t| t.name == want.name) {
                None => {
                    self.tables.push(want.clone());
                    changed = true;
                }
                Some(have) => {
                    for col in &want.columns {
                        match have.columns.iter().find(|c| c.name == col.name) {
                            None => {
                                have.columns.push(col.clone());
                                changed = true;
                            }
                            Some(existing) if existing.ty != col.ty => {
                                return Err(StoreError::SchemaMismatch(format!(
                                    "column '{}.{}' already exists with a different type",
                                    want.name, col.name
                                )));
                            }
                            Some(_) => {}
                        }
                    }
                }
            }
        }
        Ok(changed)
    }
}
