//! Parsed actions and filter trees.
//!
//! The query-language parser lives outside this crate; what reaches
//! the collection manager is already structured. An [`Action`] is a
//! tagged request, a [`Filter`] a boolean expression tree over typed
//! field comparisons.

use std::str::FromStr;

use crate::errors::{CeresError, Result};
use crate::record::Record;
use crate::schema::CollectionSchema;

/// Sentinel id meaning "use the ambient id list" in PATCH and DELETE,
/// so a pipeline can mutate the result set of a preceding GET.
pub const AMBIENT_IDS: &str = "-";

/// A `database.collection` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub database: String,
    pub collection: String,
}

impl Target {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl FromStr for Target {
    type Err = CeresError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((database, collection))
                if !database.is_empty() && !collection.is_empty() =>
            {
                Ok(Self::new(database, collection))
            }
            _ => Err(CeresError::Parse(format!(
                "identifier '{s}' is not of the form database.collection"
            ))),
        }
    }
}

/// Comparison operator of a filter leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FromStr for CmpOp {
    type Err = CeresError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "=" => Ok(CmpOp::Eq),
            "!=" => Ok(CmpOp::Ne),
            "<" => Ok(CmpOp::Lt),
            "<=" => Ok(CmpOp::Le),
            ">" => Ok(CmpOp::Gt),
            ">=" => Ok(CmpOp::Ge),
            other => Err(CeresError::Parse(format!("unknown comparator '{other}'"))),
        }
    }
}

/// Binary boolean combinator over two id sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
    Xor,
}

/// A filter tree. Pure and downward-only: children are owned.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `field op literal`; the literal is coerced by the field's
    /// declared type at evaluation time.
    Cmp {
        op: CmpOp,
        field: String,
        literal: String,
    },
    Bool {
        op: BoolOp,
        left: Box<Filter>,
        right: Box<Filter>,
    },
    /// Complements its subtree against the collection's currently
    /// occupied ids.
    Not { inner: Box<Filter> },
}

impl Filter {
    pub fn cmp(field: impl Into<String>, op: CmpOp, literal: impl Into<String>) -> Self {
        Filter::Cmp {
            op,
            field: field.into(),
            literal: literal.into(),
        }
    }

    pub fn and(left: Filter, right: Filter) -> Self {
        Filter::Bool { op: BoolOp::And, left: Box::new(left), right: Box::new(right) }
    }

    pub fn or(left: Filter, right: Filter) -> Self {
        Filter::Bool { op: BoolOp::Or, left: Box::new(left), right: Box::new(right) }
    }

    pub fn xor(left: Filter, right: Filter) -> Self {
        Filter::Bool { op: BoolOp::Xor, left: Box::new(left), right: Box::new(right) }
    }

    pub fn not(inner: Filter) -> Self {
        Filter::Not { inner: Box::new(inner) }
    }
}

/// Sort direction of a GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDir {
    #[default]
    Asc,
    Dsc,
}

/// A request against the collection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Create a database.
    DbAdd { database: String },
    /// Remove a database and every collection in it.
    DbDel { database: String },
    /// Create a collection with its schema.
    ColAdd {
        target: Target,
        schema: CollectionSchema,
    },
    /// Remove a collection.
    ColDel { target: Target },
    /// Insert records; the reply carries the assigned ids.
    Post { target: Target, data: Vec<Record> },
    /// Scan, filter, order, project, and limit.
    Get {
        target: Target,
        filter: Option<Filter>,
        fields: Vec<String>,
        order: Option<String>,
        order_dir: OrderDir,
        limit: usize,
    },
    /// Overwrite records carrying their own `.id`.
    Put { target: Target, data: Vec<Record> },
    /// Shallow-merge one patch object over each targeted record.
    Patch {
        target: Target,
        ids: Vec<String>,
        patch: Record,
    },
    /// Remove records by id.
    Delete { target: Target, ids: Vec<String> },
}

impl Action {
    /// The action's wire tag, for logs and host dispatch tables.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::DbAdd { .. } => "DBADD",
            Action::DbDel { .. } => "DBDEL",
            Action::ColAdd { .. } => "COLADD",
            Action::ColDel { .. } => "COLDEL",
            Action::Post { .. } => "POST",
            Action::Get { .. } => "GET",
            Action::Put { .. } => "PUT",
            Action::Patch { .. } => "PATCH",
            Action::Delete { .. } => "DELETE",
        }
    }
}

/// What an action evaluates to.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResult {
    /// Lifecycle and mutation actions yield nothing.
    None,
    /// POST yields the assigned ids.
    Ids(Vec<String>),
    /// GET yields the matching records.
    Records(Vec<Record>),
}

impl ActionResult {
    pub fn into_records(self) -> Vec<Record> {
        match self {
            ActionResult::Records(records) => records,
            _ => Vec::new(),
        }
    }

    pub fn into_ids(self) -> Vec<String> {
        match self {
            ActionResult::Ids(ids) => ids,
            _ => Vec::new(),
        }
    }
}
