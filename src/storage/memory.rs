use super::entry::{Entry, EntryValue, Keyspace, SortedSet};
use super::{StoreError, StoreResult};
use crate::core::Reply;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant, SystemTime};

/// In-memory single-node key-value store.
///
/// Executes the textual command set of a Redis-like server against numbered
/// logical databases. It is the reference backend behind
/// [`MemoryConnector`](crate::connection::MemoryConnector); the routing layer
/// never talks to it directly.
#[derive(Debug)]
pub struct MemoryStore {
    pub(super) databases: HashMap<u32, Keyspace>,
    started: SystemTime,
}

/// Positional access to the arguments of one command.
pub(super) struct Args<'a> {
    pub name: &'a str,
    pub items: &'a [String],
}

impl<'a> Args<'a> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn min(&self, n: usize) -> StoreResult<()> {
        if self.items.len() < n {
            return Err(StoreError::Arity(self.name.to_string()));
        }
        Ok(())
    }

    pub fn exact(&self, n: usize) -> StoreResult<()> {
        if self.items.len() != n {
            return Err(StoreError::Arity(self.name.to_string()));
        }
        Ok(())
    }

    pub fn str(&self, i: usize) -> &'a str {
        &self.items[i]
    }

    pub fn int(&self, i: usize) -> StoreResult<i64> {
        self.items[i].parse().map_err(|_| StoreError::NotInteger)
    }

    pub fn float(&self, i: usize) -> StoreResult<f64> {
        parse_float(&self.items[i])
    }

    pub fn rest(&self, from: usize) -> &'a [String] {
        &self.items[from..]
    }
}

pub(super) fn parse_float(raw: &str) -> StoreResult<f64> {
    let value: f64 = raw.trim().parse().map_err(|_| StoreError::NotFloat)?;
    if value.is_nan() {
        return Err(StoreError::NotFloat);
    }
    Ok(value)
}

/// Redis-style inclusive `start..=stop` with negative indexes from the end.
pub(super) fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

macro_rules! typed_accessor {
    ($name:ident, $variant:ident, $ty:ty) => {
        /// Typed access to a key; `create` materialises an empty value when missing.
        pub(super) fn $name<'a>(
            ks: &'a mut Keyspace,
            key: &str,
            now: Instant,
            create: bool,
        ) -> StoreResult<Option<&'a mut $ty>> {
            if create && !ks.contains(key, now) {
                ks.insert(key, EntryValue::$variant(Default::default()));
            }
            match ks.get_mut(key, now) {
                None => Ok(None),
                Some(Entry {
                    value: EntryValue::$variant(inner),
                    ..
                }) => Ok(Some(inner)),
                Some(_) => Err(StoreError::WrongType),
            }
        }
    };
}

typed_accessor!(string_mut, Str, String);
typed_accessor!(list_mut, List, VecDeque<String>);
typed_accessor!(set_mut, Set, BTreeSet<String>);
typed_accessor!(zset_mut, ZSet, SortedSet);
typed_accessor!(hash_mut, Hash, BTreeMap<String, String>);

/// Commands that modify the dataset; replicas refuse them.
pub fn is_write_command(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "set" | "setex" | "psetex" | "mset" | "msetnx" | "append" | "incr" | "incrby"
            | "decr" | "decrby" | "del" | "expire" | "pexpire" | "rename" | "renamenx"
            | "flushdb" | "flushall" | "lpush" | "rpush" | "lpushx" | "rpushx" | "lpop"
            | "rpop" | "rpoplpush" | "blpop" | "brpop" | "brpoplpush" | "sadd" | "srem"
            | "smove" | "sdiffstore" | "sinterstore" | "sunionstore" | "zadd" | "zrem"
            | "zinterstore" | "zunionstore" | "hset" | "hmset"
    )
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            databases: HashMap::new(),
            started: SystemTime::now(),
        }
    }

    pub fn keyspace(&mut self, db: u32) -> &mut Keyspace {
        self.databases.entry(db).or_default()
    }

    /// Executes one command against database `db`.
    pub fn execute(&mut self, db: u32, command: &str, args: &[String]) -> StoreResult<Reply> {
        self.execute_at(db, command, args, Instant::now())
    }

    /// Same as [`execute`](Self::execute) with an explicit clock, for expiry tests.
    pub fn execute_at(
        &mut self,
        db: u32,
        command: &str,
        args: &[String],
        now: Instant,
    ) -> StoreResult<Reply> {
        let name = command.to_ascii_lowercase();
        let a = Args {
            name: &name,
            items: args,
        };

        match name.as_str() {
            // server
            "ping" => Ok(match args.first() {
                Some(msg) => Reply::Bulk(msg.clone()),
                None => Reply::Status("PONG".into()),
            }),
            "auth" | "select" | "save" | "bgsave" | "bgrewriteaof" => Ok(Reply::ok()),
            "flushdb" => {
                self.keyspace(db).clear();
                Ok(Reply::ok())
            }
            "flushall" => {
                self.databases.clear();
                Ok(Reply::ok())
            }
            "dbsize" => Ok(Reply::Int(self.keyspace(db).len(now) as i64)),
            "info" => Ok(self.info(now)),

            // keys
            "del" => {
                a.min(1)?;
                let ks = self.keyspace(db);
                let removed = args.iter().filter(|k| ks.remove(k, now).is_some()).count();
                Ok(Reply::Int(removed as i64))
            }
            "exists" => {
                a.min(1)?;
                let ks = self.keyspace(db);
                let found = args.iter().filter(|k| ks.contains(k, now)).count();
                Ok(Reply::Int(found as i64))
            }
            "type" => {
                a.exact(1)?;
                let kind = self
                    .keyspace(db)
                    .get(a.str(0), now)
                    .map(|e| e.value.type_name())
                    .unwrap_or("none");
                Ok(Reply::Status(kind.to_string()))
            }
            "keys" => {
                let pattern = args.first().map(String::as_str).unwrap_or("*");
                let matcher = glob_to_regex(pattern)?;
                let keys: Vec<String> = self
                    .keyspace(db)
                    .keys(now)
                    .into_iter()
                    .filter(|k| matcher.is_match(k))
                    .collect();
                Ok(Reply::bulk_array(keys))
            }
            "expire" | "pexpire" => {
                a.exact(2)?;
                let amount = a.int(1)?;
                let ttl = if name == "expire" {
                    Duration::from_secs(amount.max(0) as u64)
                } else {
                    Duration::from_millis(amount.max(0) as u64)
                };
                Ok(self.set_expiry(db, a.str(0), amount <= 0, now + ttl, now))
            }
            "ttl" | "pttl" => {
                a.exact(1)?;
                let reply = match self.keyspace(db).get(a.str(0), now) {
                    None => -2,
                    Some(entry) => match entry.ttl(now) {
                        None => -1,
                        Some(left) if name == "ttl" => ((left.as_millis() + 500) / 1000) as i64,
                        Some(left) => left.as_millis() as i64,
                    },
                };
                Ok(Reply::Int(reply))
            }
            "rename" | "renamenx" => {
                a.exact(2)?;
                let ks = self.keyspace(db);
                let (src, dst) = (a.str(0), a.str(1));
                if !ks.contains(src, now) {
                    return Err(StoreError::NoSuchKey);
                }
                if name == "renamenx" && ks.contains(dst, now) {
                    return Ok(Reply::Int(0));
                }
                if src != dst
                    && let Some(entry) = ks.remove(src, now)
                {
                    ks.insert_entry(dst, entry);
                }
                Ok(if name == "renamenx" {
                    Reply::Int(1)
                } else {
                    Reply::ok()
                })
            }

            // strings
            "get" => {
                a.exact(1)?;
                let value = string_mut(self.keyspace(db), a.str(0), now, false)?.cloned();
                Ok(Reply::from(value))
            }
            "set" => self.set_command(db, &a, now),
            "setex" | "psetex" => {
                a.exact(3)?;
                let amount = a.int(1)?;
                if amount <= 0 {
                    return Err(StoreError::InvalidExpire(name.clone()));
                }
                let ttl = if name == "setex" {
                    Duration::from_secs(amount as u64)
                } else {
                    Duration::from_millis(amount as u64)
                };
                self.keyspace(db).insert_entry(
                    a.str(0),
                    Entry {
                        value: EntryValue::Str(a.str(2).to_string()),
                        expires_at: Some(now + ttl),
                    },
                );
                Ok(Reply::ok())
            }
            "mget" => {
                a.min(1)?;
                let ks = self.keyspace(db);
                let values = args
                    .iter()
                    .map(|k| match ks.get(k, now) {
                        Some(Entry {
                            value: EntryValue::Str(s),
                            ..
                        }) => Reply::Bulk(s.clone()),
                        _ => Reply::Nil,
                    })
                    .collect();
                Ok(Reply::Array(values))
            }
            "mset" | "msetnx" => {
                if args.is_empty() || args.len() % 2 != 0 {
                    return Err(StoreError::Arity(name.clone()));
                }
                let ks = self.keyspace(db);
                if name == "msetnx" && args.chunks(2).any(|kv| ks.contains(&kv[0], now)) {
                    return Ok(Reply::Int(0));
                }
                for kv in args.chunks(2) {
                    ks.insert(kv[0].as_str(), EntryValue::Str(kv[1].clone()));
                }
                Ok(if name == "msetnx" {
                    Reply::Int(1)
                } else {
                    Reply::ok()
                })
            }
            "append" => {
                a.exact(2)?;
                let value = string_mut(self.keyspace(db), a.str(0), now, true)?
                    .ok_or(StoreError::WrongType)?;
                value.push_str(a.str(1));
                Ok(Reply::Int(value.len() as i64))
            }
            "incr" | "decr" | "incrby" | "decrby" => {
                let delta = match name.as_str() {
                    "incr" => {
                        a.exact(1)?;
                        1
                    }
                    "decr" => {
                        a.exact(1)?;
                        -1
                    }
                    "incrby" => {
                        a.exact(2)?;
                        a.int(1)?
                    }
                    _ => {
                        a.exact(2)?;
                        a.int(1)?.checked_neg().ok_or(StoreError::NotInteger)?
                    }
                };
                let value = string_mut(self.keyspace(db), a.str(0), now, true)?
                    .ok_or(StoreError::WrongType)?;
                let current: i64 = if value.is_empty() {
                    0
                } else {
                    value.parse().map_err(|_| StoreError::NotInteger)?
                };
                let next = current.checked_add(delta).ok_or(StoreError::NotInteger)?;
                *value = next.to_string();
                Ok(Reply::Int(next))
            }

            _ => self.execute_collection(db, &a, now),
        }
    }

    fn set_command(&mut self, db: u32, a: &Args<'_>, now: Instant) -> StoreResult<Reply> {
        a.min(2)?;
        let mut expires_at = None;
        let mut only_missing = false;
        let mut only_existing = false;
        let mut i = 2;
        while i < a.len() {
            match a.str(i).to_ascii_lowercase().as_str() {
                "nx" => only_missing = true,
                "xx" => only_existing = true,
                flag @ ("ex" | "px") => {
                    if i + 1 >= a.len() {
                        return Err(StoreError::Syntax);
                    }
                    let amount = a.int(i + 1)?;
                    if amount <= 0 {
                        return Err(StoreError::InvalidExpire("set".into()));
                    }
                    let ttl = if flag == "ex" {
                        Duration::from_secs(amount as u64)
                    } else {
                        Duration::from_millis(amount as u64)
                    };
                    expires_at = Some(now + ttl);
                    i += 1;
                }
                _ => return Err(StoreError::Syntax),
            }
            i += 1;
        }

        let ks = self.keyspace(db);
        let exists = ks.contains(a.str(0), now);
        if (only_missing && exists) || (only_existing && !exists) {
            return Ok(Reply::Nil);
        }
        ks.insert_entry(
            a.str(0),
            Entry {
                value: EntryValue::Str(a.str(1).to_string()),
                expires_at,
            },
        );
        Ok(Reply::ok())
    }

    fn set_expiry(
        &mut self,
        db: u32,
        key: &str,
        already_due: bool,
        deadline: Instant,
        now: Instant,
    ) -> Reply {
        let ks = self.keyspace(db);
        if !ks.contains(key, now) {
            return Reply::Int(0);
        }
        if already_due {
            ks.remove(key, now);
        } else if let Some(entry) = ks.get_mut(key, now) {
            entry.expires_at = Some(deadline);
        }
        Reply::Int(1)
    }

    fn info(&mut self, now: Instant) -> Reply {
        let mut entries = vec![(
            "uptime_in_seconds".to_string(),
            Reply::Bulk(
                SystemTime::now()
                    .duration_since(self.started)
                    .unwrap_or_default()
                    .as_secs()
                    .to_string(),
            ),
        )];
        let mut dbs: Vec<u32> = self.databases.keys().copied().collect();
        dbs.sort();
        for db in dbs {
            let ks = self.keyspace(db);
            let keys = ks.len(now);
            if keys == 0 {
                continue;
            }
            let expires = ks.expiring_count(now);
            entries.push((
                format!("db{}", db),
                Reply::Bulk(format!("keys={},expires={}", keys, expires)),
            ));
        }
        Reply::Map(entries)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Translates a `KEYS`-style glob (`*`, `?`, `[...]`) into an anchored regex.
pub(super) fn glob_to_regex(pattern: &str) -> StoreResult<Regex> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('^');
                }
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    if inner == '\\' || inner == '[' {
                        out.push('\\');
                    }
                    out.push(inner);
                }
                out.push(']');
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|_| StoreError::Syntax)
}
