use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bounds of the production shard layout.
const STANDARD_BOUNDS: [i64; 3] = [1500, 3100, 4700];

/// Numeric client identifier used to pick a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(i64);

impl PartitionKey {
    /// Wrap a raw key
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Raw key value
    pub fn value(&self) -> i64 {
        self.0
    }

    /// Parse a stored key leniently.
    ///
    /// Accepts leading whitespace, an optional sign and a run of decimal
    /// digits; anything after the digits is ignored ("3000abc" is 3000).
    /// Returns `None` when no digits are present or the value overflows.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim_start();
        let (negative, rest) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };

        let digits_end = rest
            .bytes()
            .position(|b| !b.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return None;
        }

        let magnitude: i64 = rest[..digits_end].parse().ok()?;
        Some(Self(if negative { -magnitude } else { magnitude }))
    }
}

impl From<i64> for PartitionKey {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of the shard table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardEntry {
    /// Inclusive upper bound; `None` marks the catch-all entry
    pub upper_bound: Option<i64>,
    /// Base URL of the backend instance
    pub endpoint: String,
}

impl ShardEntry {
    /// Entry owning every key up to and including `upper_bound`
    pub fn bounded(upper_bound: i64, endpoint: impl Into<String>) -> Self {
        Self {
            upper_bound: Some(upper_bound),
            endpoint: endpoint.into(),
        }
    }

    /// Catch-all entry
    pub fn catch_all(endpoint: impl Into<String>) -> Self {
        Self {
            upper_bound: None,
            endpoint: endpoint.into(),
        }
    }

    fn owns(&self, key: PartitionKey) -> bool {
        match self.upper_bound {
            None => true,
            Some(bound) => key.value() <= bound,
        }
    }
}

/// Ordered range-sharding table.
///
/// Entries are evaluated in order and the first whose bound is `>= key`
/// wins. Exactly one catch-all entry exists and it is always last, so
/// lookups are total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ShardEntry>", into = "Vec<ShardEntry>")]
pub struct ShardTable {
    entries: Vec<ShardEntry>,
}

impl ShardTable {
    /// Build a table, validating its invariants.
    pub fn new(entries: Vec<ShardEntry>) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::InvalidShardTable(
                "table must have at least one entry".to_string(),
            ));
        }

        let catch_alls = entries.iter().filter(|e| e.upper_bound.is_none()).count();
        if catch_alls != 1 {
            return Err(ConfigError::InvalidShardTable(format!(
                "table must have exactly one catch-all entry, found {}",
                catch_alls
            )));
        }

        if entries.last().and_then(|e| e.upper_bound).is_some() {
            return Err(ConfigError::InvalidShardTable(
                "catch-all entry must be last".to_string(),
            ));
        }

        let bounds: Vec<i64> = entries.iter().filter_map(|e| e.upper_bound).collect();
        if bounds.windows(2).any(|w| w[1] < w[0]) {
            return Err(ConfigError::InvalidShardTable(
                "upper bounds must be non-decreasing".to_string(),
            ));
        }

        if let Some(entry) = entries.iter().find(|e| e.endpoint.trim().is_empty()) {
            return Err(ConfigError::InvalidShardTable(format!(
                "entry with bound {:?} has an empty endpoint",
                entry.upper_bound
            )));
        }

        Ok(Self { entries })
    }

    /// The production three-shard layout.
    ///
    /// Keys up to 1500 go to `shard1`, up to 3100 to `shard2`, up to 4700
    /// to `shard3`; everything else (including unassigned clients) falls
    /// back to `shard1`.
    pub fn standard(
        shard1: impl Into<String>,
        shard2: impl Into<String>,
        shard3: impl Into<String>,
    ) -> Self {
        let shard1 = shard1.into();
        Self {
            entries: vec![
                ShardEntry::bounded(STANDARD_BOUNDS[0], shard1.clone()),
                ShardEntry::bounded(STANDARD_BOUNDS[1], shard2),
                ShardEntry::bounded(STANDARD_BOUNDS[2], shard3),
                ShardEntry::catch_all(shard1),
            ],
        }
    }

    /// All entries in evaluation order
    pub fn entries(&self) -> &[ShardEntry] {
        &self.entries
    }

    /// Index of the entry serving `key` (the catch-all when `key` is `None`)
    pub fn index_for(&self, key: Option<PartitionKey>) -> usize {
        let catch_all = self.entries.len() - 1;
        match key {
            None => catch_all,
            Some(key) => self
                .entries
                .iter()
                .position(|e| e.owns(key))
                .unwrap_or(catch_all),
        }
    }

    /// Entry serving `key`
    pub fn lookup(&self, key: Option<PartitionKey>) -> &ShardEntry {
        &self.entries[self.index_for(key)]
    }
}

impl TryFrom<Vec<ShardEntry>> for ShardTable {
    type Error = ConfigError;

    fn try_from(entries: Vec<ShardEntry>) -> Result<Self, Self::Error> {
        Self::new(entries)
    }
}

impl From<ShardTable> for Vec<ShardEntry> {
    fn from(table: ShardTable) -> Self {
        table.entries
    }
}

/// What an endpoint is being resolved for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Purpose {
    /// Authentication; always served by the fixed auth endpoint
    Auth,
    /// Everything else; routed by partition key
    #[default]
    Data,
}

/// Maps a partition key to the backend endpoint that owns it.
///
/// Holds no mutable state; resolution is a pure function of the inputs,
/// so reconnects after a transient failure land on the same shard.
#[derive(Debug, Clone)]
pub struct ShardRouter {
    table: ShardTable,
    auth_endpoint: String,
}

impl ShardRouter {
    /// Create a router over a validated table
    pub fn new(table: ShardTable, auth_endpoint: impl Into<String>) -> Self {
        Self {
            table,
            auth_endpoint: auth_endpoint.into(),
        }
    }

    /// Resolve the endpoint base URL for `purpose` and `key`.
    ///
    /// Never fails: a missing key resolves to the catch-all shard.
    pub fn resolve_endpoint(&self, purpose: Purpose, key: Option<PartitionKey>) -> &str {
        match purpose {
            Purpose::Auth => &self.auth_endpoint,
            Purpose::Data => &self.table.lookup(key).endpoint,
        }
    }

    /// Index of the shard serving `key`, for diagnostics
    pub fn shard_index(&self, key: Option<PartitionKey>) -> usize {
        self.table.index_for(key)
    }

    /// The underlying table
    pub fn table(&self) -> &ShardTable {
        &self.table
    }

    /// The fixed authentication endpoint
    pub fn auth_endpoint(&self) -> &str {
        &self.auth_endpoint
    }
}
