use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Sorted set: member → score. Ordering by (score, member) is computed on read.
pub type SortedSet = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq)]
pub enum EntryValue {
    Str(String),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
    ZSet(SortedSet),
    Hash(BTreeMap<String, String>),
}

impl EntryValue {
    /// Type name as reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::ZSet(_) => "zset",
            Self::Hash(_) => "hash",
        }
    }

    /// Collections disappear once their last element is removed.
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Self::Str(_) => false,
            Self::List(l) => l.is_empty(),
            Self::Set(s) => s.is_empty(),
            Self::ZSet(z) => z.is_empty(),
            Self::Hash(h) => h.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: EntryValue,
    pub expires_at: Option<Instant>,
}

impl Entry {
    pub fn new(value: EntryValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Remaining lifetime, `None` when the entry never expires.
    pub fn ttl(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }
}

/// One logical database of a store. Expired entries are dropped lazily when
/// touched.
#[derive(Debug, Clone, Default)]
pub struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, key: &str, now: Instant) -> Option<&Entry> {
        self.evict_if_expired(key, now);
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        self.evict_if_expired(key, now);
        self.entries.get_mut(key)
    }

    pub fn contains(&mut self, key: &str, now: Instant) -> bool {
        self.get(key, now).is_some()
    }

    /// Stores a value, clearing any previous TTL.
    pub fn insert(&mut self, key: impl Into<String>, value: EntryValue) {
        self.entries.insert(key.into(), Entry::new(value));
    }

    pub fn insert_entry(&mut self, key: impl Into<String>, entry: Entry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn remove(&mut self, key: &str, now: Instant) -> Option<Entry> {
        self.evict_if_expired(key, now);
        self.entries.remove(key)
    }

    /// Drops the key if it holds an emptied collection.
    pub fn prune(&mut self, key: &str) {
        if self
            .entries
            .get(key)
            .is_some_and(|e| e.value.is_empty_collection())
        {
            self.entries.remove(key);
        }
    }

    /// Live keys, sorted.
    pub fn keys(&mut self, now: Instant) -> Vec<String> {
        self.purge_expired(now);
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&mut self, now: Instant) -> usize {
        self.purge_expired(now);
        self.entries.len()
    }

    pub fn is_empty(&mut self, now: Instant) -> bool {
        self.len(now) == 0
    }

    pub fn expiring_count(&mut self, now: Instant) -> usize {
        self.purge_expired(now);
        self.entries
            .values()
            .filter(|e| e.expires_at.is_some())
            .count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_if_expired(&mut self, key: &str, now: Instant) {
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
    }

    fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|_, e| !e.is_expired(now));
    }
}
