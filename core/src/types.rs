//! Core types for ksync
//!
//! Defines the key/row model shared by both endpoints: scalar values, keys,
//! rows, table definitions, and the per-column key ordering.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;
use crate::traits::SyncResult;

/// 32-byte digest of a key range
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Hash(arr))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", &self.to_hex()[..16])
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash(0x{})", self.to_hex())
    }
}

/// A single column value as transmitted between endpoints.
///
/// Typed interpretation (integers, dates, ...) is left to the caller; the
/// protocol only ever carries text or an explicit null.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Null,
    Text(String),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Option<&str>> for Value {
    fn from(s: Option<&str>) -> Self {
        s.map(Value::from).unwrap_or(Value::Null)
    }
}

/// Primary key values in declared key-column order.
///
/// A key with no components is unbounded: as a lower bound it means "from
/// the start of the table", as an upper bound "to the end of the table".
/// This is distinct from a key whose first component is an empty string.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Key(pub Vec<Value>);

impl Key {
    pub fn new(values: Vec<Value>) -> Self {
        Key(values)
    }

    pub fn unbounded() -> Self {
        Key(Vec::new())
    }

    /// Build a key from text components
    pub fn from_texts(parts: &[&str]) -> Self {
        Key(parts.iter().map(|p| Value::from(*p)).collect())
    }

    pub fn is_unbounded(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            write!(f, "Key(*)")
        } else {
            write!(f, "Key{:?}", self.0)
        }
    }
}

impl From<Vec<Value>> for Key {
    fn from(values: Vec<Value>) -> Self {
        Key(values)
    }
}

/// Column values in declared column order
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row(values)
    }

    /// Build a row from optional text, `None` becoming null
    pub fn from_optional(parts: &[Option<&str>]) -> Self {
        Row(parts.iter().map(|p| Value::from(*p)).collect())
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row{:?}", self.0)
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row(values)
    }
}

/// Declared column type, which decides how key values are ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Text,
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Table definition: columns in physical order, key columns in key order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Indexes into `columns`, in key order
    pub primary_key_columns: Vec<usize>,
}

impl TableDef {
    /// Create a table definition, naming the key columns in key order
    pub fn new(
        name: impl Into<String>,
        columns: Vec<ColumnDef>,
        key_columns: &[&str],
    ) -> SyncResult<Self> {
        let name = name.into();
        let primary_key_columns = key_columns
            .iter()
            .map(|key| {
                columns
                    .iter()
                    .position(|c| c.name == *key)
                    .ok_or_else(|| {
                        SyncError::ConfigError(format!(
                            "table {} has no column {} for its primary key",
                            name, key
                        ))
                    })
            })
            .collect::<SyncResult<Vec<_>>>()?;

        let table = Self {
            name,
            columns,
            primary_key_columns,
        };
        table.validate()?;
        Ok(table)
    }

    /// Check the key column list is non-empty, in range, and free of repeats
    pub fn validate(&self) -> SyncResult<()> {
        if self.primary_key_columns.is_empty() {
            return Err(SyncError::ConfigError(format!(
                "table {} has no primary key",
                self.name
            )));
        }
        for (i, &index) in self.primary_key_columns.iter().enumerate() {
            if index >= self.columns.len() {
                return Err(SyncError::ConfigError(format!(
                    "table {} key column index {} out of range",
                    self.name, index
                )));
            }
            if self.primary_key_columns[..i].contains(&index) {
                return Err(SyncError::ConfigError(format!(
                    "table {} repeats key column {}",
                    self.name, self.columns[index].name
                )));
            }
        }
        Ok(())
    }

    /// Extract a row's key in key-column order
    pub fn key_of(&self, row: &Row) -> Key {
        Key(self
            .primary_key_columns
            .iter()
            .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
            .collect())
    }

    pub fn key_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.primary_key_columns
            .iter()
            .filter_map(move |&i| self.columns.get(i))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Reject rows and keys that don't match this table's shape
    pub fn check_row(&self, row: &Row) -> SyncResult<()> {
        if row.len() != self.columns.len() {
            return Err(SyncError::StorageError(format!(
                "row for {} has {} values, expected {}",
                self.name,
                row.len(),
                self.columns.len()
            )));
        }
        Ok(())
    }

    pub fn check_key(&self, key: &Key) -> SyncResult<()> {
        if !key.is_unbounded() && key.len() != self.primary_key_columns.len() {
            return Err(SyncError::InvalidRange(format!(
                "key {:?} has {} components, {} has {} key columns",
                key,
                key.len(),
                self.name,
                self.primary_key_columns.len()
            )));
        }
        Ok(())
    }
}

/// The set of tables an endpoint exposes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<TableDef>,
}

impl Schema {
    pub fn new(tables: Vec<TableDef>) -> Self {
        Self { tables }
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Per-column ordering of key values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collation {
    /// Byte-wise comparison of the UTF-8 text
    Binary,
    /// Numeric comparison of decimal integers of any width
    Integer,
}

impl Collation {
    pub fn for_type(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Integer => Collation::Integer,
            ColumnType::Text => Collation::Binary,
        }
    }

    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match (a, b) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, Value::Text(_)) => Ordering::Less,
            (Value::Text(_), Value::Null) => Ordering::Greater,
            (Value::Text(a), Value::Text(b)) => match self {
                Collation::Binary => a.as_bytes().cmp(b.as_bytes()),
                Collation::Integer => compare_integers(a, b),
            },
        }
    }
}

fn split_sign(s: &str) -> (bool, &str) {
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let magnitude = digits.trim_start_matches('0');
    // -0 is 0
    (negative && !magnitude.is_empty(), magnitude)
}

fn compare_magnitudes(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.as_bytes().cmp(b.as_bytes()))
}

fn is_integer(s: &str) -> bool {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Compare decimal integer strings without parsing them into a fixed width.
///
/// Values that aren't integers sort after every integer, in byte order among
/// themselves. Spellings of the same number ("7", "007", "+7") stay distinct
/// keys, ordered by their bytes.
fn compare_integers(a: &str, b: &str) -> Ordering {
    match (is_integer(a), is_integer(b)) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => return a.as_bytes().cmp(b.as_bytes()),
        (true, true) => {}
    }
    let (a_negative, a_magnitude) = split_sign(a);
    let (b_negative, b_magnitude) = split_sign(b);
    let numeric = match (a_negative, b_negative) {
        (false, true) => Ordering::Greater,
        (true, false) => Ordering::Less,
        (false, false) => compare_magnitudes(a_magnitude, b_magnitude),
        (true, true) => compare_magnitudes(b_magnitude, a_magnitude),
    };
    numeric.then_with(|| a.as_bytes().cmp(b.as_bytes()))
}

/// Orders keys of one table lexicographically by its key columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyComparator {
    collations: Vec<Collation>,
}

impl KeyComparator {
    pub fn new(collations: Vec<Collation>) -> Self {
        Self { collations }
    }

    pub fn for_table(table: &TableDef) -> Self {
        Self::new(
            table
                .key_columns()
                .map(|c| Collation::for_type(c.column_type))
                .collect(),
        )
    }

    /// Compare two bounded keys of equal arity
    pub fn compare(&self, a: &Key, b: &Key) -> Ordering {
        for (i, (x, y)) in a.values().iter().zip(b.values()).enumerate() {
            let collation = self.collations.get(i).copied().unwrap_or(Collation::Binary);
            match collation.compare(x, y) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        a.len().cmp(&b.len())
    }

    /// Whether `key` lies in the range `(prev_key, last_key]`, where an
    /// unbounded key leaves that side of the range open
    pub fn in_range(&self, key: &Key, prev_key: &Key, last_key: &Key) -> bool {
        (prev_key.is_unbounded() || self.compare(key, prev_key) == Ordering::Greater)
            && (last_key.is_unbounded() || self.compare(key, last_key) != Ordering::Greater)
    }
}

/// Digest algorithm used for range hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    #[default]
    Blake3,
    Sha256,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Blake3 => write!(f, "blake3"),
            HashAlgorithm::Sha256 => write!(f, "sha256"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blake3" => Ok(HashAlgorithm::Blake3),
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            other => Err(SyncError::ConfigError(format!(
                "unknown hash algorithm: {}",
                other
            ))),
        }
    }
}

/// Opaque handle naming an exported consistent view
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotToken(pub String);

impl SnapshotToken {
    pub fn new(token: impl Into<String>) -> Self {
        SnapshotToken(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
