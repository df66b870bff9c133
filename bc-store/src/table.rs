use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bc_primitives::Address;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::storage::{Storage, StorageError, WriteBatch};

pub const ACCESS_TABLE: &str = "_sys_access_";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("table {0} already exists")]
    TableAlreadyExists(String),

    #[error("table {0} does not exist")]
    TableDoesNotExist(String),

    #[error("failed to decode persisted table {table}: {source}")]
    Decode {
        table: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("fatal: failed to open system table {0} during commit")]
    OpenSysTableFailed(String),
}

/// Either the number of rows an operation touched, or the auth-denied
/// sentinel (`-1`). Denials are returned, never raised as an error: a write
/// an origin is not entitled to make is an expected outcome, not a fault.
pub type WriteResult = Result<i64, StoreError>;

pub const AUTH_DENIED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// A row's value columns, keyed by column name. Stored as a `BTreeMap` so
/// iteration order (used by hashing) is always the same regardless of the
/// order fields were set in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry(BTreeMap<String, String>);

impl Entry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Conjunction of column predicates evaluated against `Entry` values.
/// Numeric comparisons parse both sides as `i128` (saturating any value
/// that overflows that range, since no external 256-bit integer type is
/// pulled in just for table conditions); equality/inequality on values
/// that don't both parse as numbers fall back to a bytewise string
/// comparison.
#[derive(Debug, Clone, Default)]
pub struct Condition {
    predicates: Vec<(String, Op, String)>,
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, field: impl Into<String>, op: Op, value: impl Into<String>) -> Self {
        self.predicates.push((field.into(), op, value.into()));
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(field, Op::Eq, value)
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(field, Op::Ne, value)
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(field, Op::Gt, value)
    }

    pub fn ge(self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(field, Op::Ge, value)
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(field, Op::Lt, value)
    }

    pub fn le(self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(field, Op::Le, value)
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        self.predicates.iter().all(|(field, op, rhs)| {
            let Some(lhs) = entry.get(field) else {
                return false;
            };
            eval(lhs, *op, rhs)
        })
    }
}

fn parse_i128_saturating(s: &str) -> Option<i128> {
    s.parse::<i128>().ok().or_else(|| {
        s.parse::<f64>().ok().map(|f| {
            if f > i128::MAX as f64 {
                i128::MAX
            } else if f < i128::MIN as f64 {
                i128::MIN
            } else {
                f as i128
            }
        })
    })
}

fn eval(lhs: &str, op: Op, rhs: &str) -> bool {
    let numeric = parse_i128_saturating(lhs).zip(parse_i128_saturating(rhs));
    match op {
        Op::Eq => numeric.map(|(a, b)| a == b).unwrap_or(lhs == rhs),
        Op::Ne => numeric.map(|(a, b)| a != b).unwrap_or(lhs != rhs),
        Op::Gt => numeric.is_some_and(|(a, b)| a > b),
        Op::Ge => numeric.is_some_and(|(a, b)| a >= b),
        Op::Lt => numeric.is_some_and(|(a, b)| a < b),
        Op::Le => numeric.is_some_and(|(a, b)| a <= b),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Row {
    key: String,
    entry: Entry,
    seq: u64,
}

#[derive(Default)]
struct TableOverlay {
    schema: Option<Schema>,
    rows: Vec<Row>,
    next_seq: u64,
}

#[derive(Clone)]
struct Schema {
    key_field: String,
    value_fields: Vec<String>,
    authorize: bool,
}

/// Instantiated once per commit attempt, bound to a `Storage` backend.
/// Every `open_table` within the same factory shares one overlay per
/// table name, so writes in one handle are visible to reads through any
/// other handle from the same factory (Invariant T1).
pub struct TableFactory {
    storage: Arc<dyn Storage>,
    overlays: RwLock<HashMap<String, Arc<Mutex<TableOverlay>>>>,
}

impl TableFactory {
    pub fn new(storage: Arc<dyn Storage>) -> Arc<Self> {
        Arc::new(Self { storage, overlays: RwLock::new(HashMap::new()) })
    }

    fn overlay_for(self: &Arc<Self>, name: &str) -> Result<Arc<Mutex<TableOverlay>>, StoreError> {
        if let Some(existing) = self.overlays.read().get(name) {
            return Ok(existing.clone());
        }
        let loaded = self.load_overlay(name)?;
        let mut guard = self.overlays.write();
        Ok(guard.entry(name.to_string()).or_insert_with(|| Arc::new(Mutex::new(loaded))).clone())
    }

    fn load_overlay(&self, name: &str) -> Result<TableOverlay, StoreError> {
        let storage_key = storage_key_for(name);
        match self.storage.get(&storage_key)? {
            Some(bytes) => {
                let rows: Vec<Row> = serde_json::from_slice(&bytes)
                    .map_err(|source| StoreError::Decode { table: name.to_string(), source })?;
                let next_seq = rows.iter().map(|r| r.seq + 1).max().unwrap_or(0);
                Ok(TableOverlay { schema: None, rows, next_seq })
            }
            None => Ok(TableOverlay::default()),
        }
    }

    /// Opens an existing or not-yet-created table. The overlay exists as
    /// soon as it is first touched in this factory, independent of whether
    /// `create_table` has run.
    pub fn open_table(self: &Arc<Self>, name: &str) -> Result<Table, StoreError> {
        let overlay = self.overlay_for(name)?;
        Ok(Table { factory: self.clone(), name: name.to_string(), overlay })
    }

    /// Declares a table's schema and, if `authorize`, records `origin` as
    /// the table's owner in `_sys_access_`.
    pub fn create_table(
        self: &Arc<Self>,
        name: &str,
        key_field: &str,
        value_fields: &[&str],
        authorize: bool,
        origin: Option<Address>,
    ) -> Result<Table, StoreError> {
        let overlay = self.overlay_for(name)?;
        {
            let mut guard = overlay.lock();
            guard.schema = Some(Schema {
                key_field: key_field.to_string(),
                value_fields: value_fields.iter().map(|s| s.to_string()).collect(),
                authorize,
            });
        }
        if authorize {
            if let Some(origin) = origin {
                let access = self.open_table(ACCESS_TABLE)?;
                let mut entry = Entry::new();
                entry.set("address", origin.to_string());
                access.insert_unchecked(name, entry)?;
            }
        }
        Ok(Table { factory: self.clone(), name: name.to_string(), overlay })
    }

    fn is_authorized(&self, table_name: &str, origin: &Address) -> Result<bool, StoreError> {
        if table_name == ACCESS_TABLE || table_name.starts_with("_sys_") {
            return Ok(true);
        }
        let overlay = self.overlay_for(ACCESS_TABLE)?;
        let guard = overlay.lock();
        let owns = guard
            .rows
            .iter()
            .filter(|row| row.key == table_name)
            .any(|row| row.entry.get("address") == Some(origin.to_string().as_str()));
        Ok(owns)
    }

    /// Flushes every touched overlay to the backend in one batch and
    /// returns the combined content hash (per-table hashes composed in
    /// table-name order).
    pub fn commit_db(&self, _block_hash: bc_primitives::Hash, _block_number: i64) -> Result<bc_primitives::Hash, StoreError> {
        let overlays = self.overlays.read();
        let mut names: Vec<&String> = overlays.keys().collect();
        names.sort();

        let mut batch = WriteBatch::new();
        let mut table_hashes = Vec::with_capacity(names.len());
        for name in &names {
            let overlay = overlays.get(*name).expect("name came from this map");
            let guard = overlay.lock();
            let bytes = serde_json::to_vec(&guard.rows)
                .expect("row set of a committed table must serialize");
            batch.put(storage_key_for(name), bytes);
            table_hashes.push(((*name).clone(), hash_rows(&guard.rows)));
        }
        self.storage.write(batch)?;
        Ok(compose_hash(&table_hashes))
    }
}

fn storage_key_for(table_name: &str) -> Vec<u8> {
    format!("tbl:{table_name}").into_bytes()
}

fn hash_rows(rows: &[Row]) -> bc_primitives::Hash {
    let mut sorted: Vec<&Row> = rows.iter().collect();
    sorted.sort_by(|a, b| a.key.cmp(&b.key).then(a.seq.cmp(&b.seq)));
    #[derive(Serialize)]
    struct HashableRow<'a> {
        key: &'a str,
        fields: Vec<(&'a str, &'a str)>,
    }
    let hashable: Vec<HashableRow> = sorted
        .iter()
        .map(|row| HashableRow { key: &row.key, fields: row.entry.fields().collect() })
        .collect();
    let bytes = serde_json::to_vec(&hashable).expect("row content must serialize for hashing");
    bc_primitives::Hash(bc_crypto::sha3(&bytes))
}

fn compose_hash(table_hashes: &[(String, bc_primitives::Hash)]) -> bc_primitives::Hash {
    let mut buf = Vec::new();
    for (name, hash) in table_hashes {
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(hash.as_bytes());
    }
    bc_primitives::Hash(bc_crypto::sha3(&buf))
}

/// A handle to one table's overlay within a `TableFactory`. Cheap to clone
/// (shares the same overlay); every handle observes every other handle's
/// uncommitted writes.
#[derive(Clone)]
pub struct Table {
    factory: Arc<TableFactory>,
    name: String,
    overlay: Arc<Mutex<TableOverlay>>,
}

impl Table {
    pub fn new_entry(&self) -> Entry {
        Entry::new()
    }

    pub fn new_condition(&self) -> Condition {
        Condition::new()
    }

    pub fn select(&self, key: &str, condition: &Condition) -> Vec<Entry> {
        let guard = self.overlay.lock();
        guard
            .rows
            .iter()
            .filter(|row| row.key == key && condition.matches(&row.entry))
            .map(|row| row.entry.clone())
            .collect()
    }

    pub fn insert(&self, key: &str, entry: Entry, origin: Option<Address>) -> WriteResult {
        if let Some(origin) = &origin {
            if !self.factory.is_authorized(&self.name, origin)? {
                return Ok(AUTH_DENIED);
            }
        }
        self.insert_unchecked(key, entry)
    }

    fn insert_unchecked(&self, key: &str, entry: Entry) -> WriteResult {
        let mut guard = self.overlay.lock();
        let seq = guard.next_seq;
        guard.next_seq += 1;
        guard.rows.push(Row { key: key.to_string(), entry, seq });
        Ok(1)
    }

    pub fn update(
        &self,
        key: &str,
        entry: Entry,
        condition: &Condition,
        origin: Option<Address>,
    ) -> WriteResult {
        if let Some(origin) = &origin {
            if !self.factory.is_authorized(&self.name, origin)? {
                return Ok(AUTH_DENIED);
            }
        }
        let mut guard = self.overlay.lock();
        let mut count = 0i64;
        for row in guard.rows.iter_mut() {
            if row.key == key && condition.matches(&row.entry) {
                for (field, value) in entry.fields() {
                    row.entry.set(field, value);
                }
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn remove(&self, key: &str, condition: &Condition, origin: Option<Address>) -> WriteResult {
        if let Some(origin) = &origin {
            if !self.factory.is_authorized(&self.name, origin)? {
                return Ok(AUTH_DENIED);
            }
        }
        let mut guard = self.overlay.lock();
        let before = guard.rows.len();
        guard.rows.retain(|row| !(row.key == key && condition.matches(&row.entry)));
        Ok((before - guard.rows.len()) as i64)
    }

    pub fn hash(&self) -> bc_primitives::Hash {
        let guard = self.overlay.lock();
        hash_rows(&guard.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn factory() -> Arc<TableFactory> {
        TableFactory::new(MemoryStorage::new())
    }

    #[test]
    fn writes_in_one_handle_are_visible_in_another() {
        let factory = factory();
        let a = factory.open_table("t").unwrap();
        let b = factory.open_table("t").unwrap();

        let mut entry = Entry::new();
        entry.set("value", "1");
        a.insert("k", entry, None).unwrap();

        assert_eq!(b.select("k", &Condition::new()).len(), 1);
    }

    #[test]
    fn condition_numeric_range_matches() {
        let factory = factory();
        let t = factory.open_table("t").unwrap();
        let mut e1 = Entry::new();
        e1.set("n", "5");
        t.insert("k", e1, None).unwrap();
        let mut e2 = Entry::new();
        e2.set("n", "15");
        t.insert("k", e2, None).unwrap();

        let gt10 = Condition::new().gt("n", "10");
        assert_eq!(t.select("k", &gt10).len(), 1);
    }

    #[test]
    fn unauthorized_write_returns_sentinel_not_error() {
        let factory = factory();
        let owner = Address([1u8; 20]);
        let table = factory.create_table("restricted", "key", &["value"], true, Some(owner)).unwrap();

        let stranger = Address([2u8; 20]);
        let result = table.insert("k", Entry::new(), Some(stranger)).unwrap();
        assert_eq!(result, AUTH_DENIED);

        let result = table.insert("k", Entry::new(), Some(owner)).unwrap();
        assert_eq!(result, 1);
    }

    #[test]
    fn commit_db_persists_rows_across_factories() {
        let storage = MemoryStorage::new();
        let factory = TableFactory::new(storage.clone());
        let t = factory.open_table("t").unwrap();
        let mut entry = Entry::new();
        entry.set("value", "1");
        t.insert("k", entry, None).unwrap();
        factory.commit_db(bc_primitives::Hash::zero(), 1).unwrap();

        let factory2 = TableFactory::new(storage);
        let t2 = factory2.open_table("t").unwrap();
        assert_eq!(t2.select("k", &Condition::new()).len(), 1);
    }

    #[test]
    fn hash_is_independent_of_row_construction_order() {
        let factory = factory();
        let t = factory.open_table("t").unwrap();
        let mut e1 = Entry::new();
        e1.set("value", "1");
        e1.set("other", "2");
        t.insert("k", e1, None).unwrap();

        let factory2 = factory();
        let t2 = factory2.open_table("t").unwrap();
        let mut e2 = Entry::new();
        e2.set("other", "2");
        e2.set("value", "1");
        t2.insert("k", e2, None).unwrap();

        assert_eq!(t.hash(), t2.hash());
    }
}
