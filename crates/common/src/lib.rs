
use serde::{Deserialize, Serialize};
use std::{io, path::PathBuf};
use thiserror::Error;
use types::Value;

/// Identifier for a column within a table schema.
pub type ColumnId = u32;

/// Logical identifier for a page in the storage layer. `PageId(-1)` is never
/// constructed directly; use [`PageId::INVALID`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub i32);

impl PageId {
    pub const INVALID: PageId = PageId(-1);

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

/// Logical identifier for a table registered in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(pub u32);

/// Logical identifier for an index registered in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexId(pub u32);

/// Fully-qualified identifier for a tuple within a heap page.
///
/// `INVALID` (slot `u32::MAX`) terminates table-iterator traversal, mirroring
/// the source's `INVALID_ROWID`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u32,
}

impl RecordId {
    pub const INVALID: RecordId = RecordId {
        page_id: PageId::INVALID,
        slot: u32::MAX,
    };

    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

/// Positional row representation. Each field is independently nullable; a
/// `None` entry serializes as a set bit in the row's null bitmap and
/// contributes no bytes to the payload (§3 of the design).
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pub fields: Vec<Option<Value>>,
    rid: Option<RecordId>,
}

impl Row {
    pub fn new(fields: Vec<Option<Value>>) -> Self {
        Self { fields, rid: None }
    }

    pub fn with_rid(mut self, rid: RecordId) -> Self {
        self.rid = Some(rid);
        self
    }

    pub fn set_rid(&mut self, rid: Option<RecordId>) {
        self.rid = rid;
    }

    pub fn rid(&self) -> Option<RecordId> {
        self.rid
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

impl From<Vec<Option<Value>>> for Row {
    fn from(fields: Vec<Option<Value>>) -> Self {
        Row::new(fields)
    }
}

/// Canonical error type shared across the storage engine, closed per the
/// component boundary's result-code enumeration: one variant per non-success
/// code, each carrying a context string, plus a transparent I/O variant and a
/// unit `Quit` signal for callers that want a clean-shutdown request.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed: {0}")]
    Failed(String),
    #[error("already exists: {0}")]
    AlreadyExist(String),
    #[error("not exist: {0}")]
    NotExist(String),
    #[error("table already exists: {0}")]
    TableAlreadyExist(String),
    #[error("table not exist: {0}")]
    TableNotExist(String),
    #[error("index already exists: {0}")]
    IndexAlreadyExist(String),
    #[error("index not found: {0}")]
    IndexNotFound(String),
    #[error("column name not exist: {0}")]
    ColumnNameNotExist(String),
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("quit")]
    Quit,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for the storage engine. Page size is fixed at build
/// time (`storage::PAGE_SIZE`) rather than configurable here, since the
/// on-disk layout formulas are derived from it at compile time.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .db_file(PathBuf::from("./my_db.dat"))
///     .buffer_pool_pages(512)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Path to the single shared database file.
    #[builder(default = PathBuf::from("./db.dat"))]
    pub db_file: PathBuf,
    /// Number of frames the buffer pool keeps resident.
    #[builder(default = 256)]
    pub buffer_pool_pages: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_file: PathBuf::from("./db.dat"),
            buffer_pool_pages: 256,
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{Config, DbError, DbResult, PageId, RecordId, Row, TableId};
    pub use types::{SqlType, Value};
}
