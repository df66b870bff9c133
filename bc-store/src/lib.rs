//! A row/column table store layered over a pluggable flat KV `Storage`, with
//! a per-commit overlay that becomes durable only when a `TableFactory` is
//! flushed via `commit_db`.

mod storage;
mod table;

pub use storage::{MemoryStorage, SledStorage, Storage, StorageError, WriteBatch, WriteOp};
pub use table::{
    Condition, Entry, Op, StoreError, Table, TableFactory, WriteResult, ACCESS_TABLE, AUTH_DENIED,
};
