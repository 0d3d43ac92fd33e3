//! Row values and column types.

/// Stable per-table row identity.
///
/// Row *indices* are positional and shift when earlier rows are deleted; row
/// keys are assigned once at insertion and never reused, which is what makes
/// change-set extraction between two snapshots deterministic.
pub type RowKey = u64;

/// Type of a table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// 64-bit signed integer.
    Int,
    /// UTF-8 string.
    String,
    /// Ordered list of links to rows of the target table.
    LinkList {
        /// Object type the links point at.
        target: String,
    },
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// 64-bit signed integer.
    Int(i64),
    /// UTF-8 string.
    String(String),
    /// Ordered list of row keys in the target table.
    LinkList(Vec<RowKey>),
}

impl Value {
    /// Default value for a freshly added column of the given type.
    pub(crate) fn default_for(ty: &ColumnType) -> Self {
        match ty {
            ColumnType::Int => Value::Int(0),
            ColumnType::String => Value::String(String::new()),
            ColumnType::LinkList { .. } => Value::LinkList(Vec::new()),
        }
    }

    /// Returns the integer payload, if this is an [`Value::Int`].
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string payload, if this is a [`Value::String`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the link-list payload, if this is a [`Value::LinkList`].
    #[must_use]
    pub fn as_link_list(&self) -> Option<&[RowKey]> {
        match self {
            Value::LinkList(keys) => Some(keys),
            _ => None,
        }
    }

    /// Whether the value matches the column type.
    pub(crate) fn matches(&self, ty: &ColumnType) -> bool {
        matches!(
            (self, ty),
            (Value::Int(_), ColumnType::Int)
                | (Value::String(_), ColumnType::String)
                | (Value::LinkList(_), ColumnType::LinkList { .. })
        )
    }
}
