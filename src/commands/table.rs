use super::{Access, Aggregate, CommandCategory, CommandSpec, Emulation, KeySpec, SetOp};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Arc;

lazy_static! {
    static ref STANDARD_TABLE: Arc<CommandTable> = Arc::new(CommandTable::standard());
}

/// Case-insensitive registry of [`CommandSpec`]s.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    specs: HashMap<String, CommandSpec>,
}

const WRITES: &[&str] = &[
    "set", "setnx", "getset", "append", "setrange", "setbit", "incr", "incrby", "decr",
    "decrby", "incrbyfloat", "expire", "pexpire", "expireat", "pexpireat", "persist", "lpush",
    "rpush", "lpushx", "rpushx", "lpop", "rpop", "linsert", "lset", "lrem", "ltrim", "sadd",
    "srem", "spop", "zadd", "zrem", "zincrby", "zremrangebyrank", "zremrangebyscore", "hset",
    "hsetnx", "hmset", "hdel", "hincrby", "hincrbyfloat",
];

const READS: &[&str] = &[
    "get", "getbit", "getrange", "substr", "strlen", "bitcount", "type", "ttl", "pttl", "llen",
    "lrange", "lindex", "scard", "sismember", "smembers", "srandmember", "zcard", "zcount",
    "zrange", "zrevrange", "zrangebyscore", "zrevrangebyscore", "zrank", "zrevrank", "zscore",
    "hget", "hmget", "hexists", "hgetall", "hkeys", "hvals", "hlen",
];

const NO_HASH: &[&str] = &[
    "auth", "echo", "randomkey", "multi", "exec", "discard", "watch", "unwatch", "monitor",
    "quit", "shutdown", "slaveof", "replicaof", "debug", "sync", "publish", "subscribe",
    "unsubscribe", "psubscribe", "punsubscribe",
];

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide standard table, built on first use.
    pub fn global() -> Arc<CommandTable> {
        STANDARD_TABLE.clone()
    }

    /// The standard classification of Redis-like commands.
    pub fn standard() -> Self {
        use Access::{Read, Write};
        use CommandCategory::{Broadcast, NoHash, TagRequired};

        let mut table = Self::new();

        for name in WRITES {
            table.insert(CommandSpec::new(name, CommandCategory::Write, Write, KeySpec::FIRST));
        }
        // SETEX key seconds value / PSETEX key millis value
        table.insert(CommandSpec::new("setex", CommandCategory::Write, Write, KeySpec::FIRST));
        table.insert(CommandSpec::new("psetex", CommandCategory::Write, Write, KeySpec::FIRST));

        for name in READS {
            table.insert(CommandSpec::new(name, CommandCategory::Read, Read, KeySpec::FIRST));
        }
        // OBJECT subcommand key
        table.insert(CommandSpec::new("object", CommandCategory::Read, Read, KeySpec::range(1, 1, 1)));

        for name in NO_HASH {
            table.insert(CommandSpec::new(name, NoHash, Write, KeySpec::NONE));
        }

        let broadcasts = [
            ("ping", Read, Aggregate::PerNode),
            ("info", Read, Aggregate::PerNode),
            ("config", Read, Aggregate::PerNode),
            ("lastsave", Read, Aggregate::PerNode),
            ("time", Read, Aggregate::PerNode),
            ("select", Read, Aggregate::PerNode),
            ("role", Read, Aggregate::PerNode),
            ("keys", Read, Aggregate::UnionKeys),
            ("dbsize", Read, Aggregate::Sum),
            ("flushdb", Write, Aggregate::PerNode),
            ("flushall", Write, Aggregate::PerNode),
            ("save", Write, Aggregate::PerNode),
            ("bgsave", Write, Aggregate::PerNode),
            ("bgrewriteaof", Write, Aggregate::PerNode),
        ];
        for (name, access, aggregate) in broadcasts {
            table.insert(CommandSpec::new(name, Broadcast, access, KeySpec::NONE).aggregate(aggregate));
        }

        let emulated = [
            ("del", Write, KeySpec::ALL, Emulation::Del),
            ("exists", Read, KeySpec::ALL, Emulation::Exists),
            ("mget", Read, KeySpec::ALL, Emulation::MGet),
            ("mset", Write, KeySpec::range(0, -1, 2), Emulation::MSet),
            ("msetnx", Write, KeySpec::range(0, -1, 2), Emulation::MSetNx),
            ("sdiff", Read, KeySpec::ALL, Emulation::SetAlgebra(SetOp::Diff)),
            ("sinter", Read, KeySpec::ALL, Emulation::SetAlgebra(SetOp::Inter)),
            ("sunion", Read, KeySpec::ALL, Emulation::SetAlgebra(SetOp::Union)),
            ("sdiffstore", Write, KeySpec::ALL, Emulation::SetAlgebraStore(SetOp::Diff)),
            ("sinterstore", Write, KeySpec::ALL, Emulation::SetAlgebraStore(SetOp::Inter)),
            ("sunionstore", Write, KeySpec::ALL, Emulation::SetAlgebraStore(SetOp::Union)),
            ("smove", Write, KeySpec::range(0, 1, 1), Emulation::SMove),
            ("rpoplpush", Write, KeySpec::range(0, 1, 1), Emulation::RPopLPush),
            ("brpoplpush", Write, KeySpec::range(0, 1, 1), Emulation::BRPopLPush),
            ("rename", Write, KeySpec::range(0, 1, 1), Emulation::Rename),
            ("renamenx", Write, KeySpec::range(0, 1, 1), Emulation::RenameNx),
        ];
        for (name, access, keys, emulation) in emulated {
            table.insert(CommandSpec::new(name, TagRequired, access, keys).emulated_by(emulation));
        }

        // Multi-key commands with no client-side equivalent.
        table.insert(CommandSpec::new("zinterstore", TagRequired, Write, KeySpec::counted(0)));
        table.insert(CommandSpec::new("zunionstore", TagRequired, Write, KeySpec::counted(0)));
        table.insert(CommandSpec::new("bitop", TagRequired, Write, KeySpec::range(1, -1, 1)));
        table.insert(CommandSpec::new("sort", TagRequired, Write, KeySpec::FIRST));
        // Trailing timeout is not a key.
        table.insert(CommandSpec::new("blpop", TagRequired, Write, KeySpec::range(0, -2, 1)));
        table.insert(CommandSpec::new("brpop", TagRequired, Write, KeySpec::range(0, -2, 1)));

        table
    }

    /// Registers (or replaces) a spec.
    pub fn insert(&mut self, spec: CommandSpec) {
        self.specs.insert(spec.name.clone(), spec);
    }

    /// Looks a command up, ignoring case.
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        match self.specs.get(name) {
            Some(spec) => Some(spec),
            None => self.specs.get(&name.to_ascii_lowercase()),
        }
    }

    /// Looks a command up; unknown names get [`CommandSpec::unknown`].
    pub fn classify(&self, name: &str) -> CommandSpec {
        self.get(name)
            .cloned()
            .unwrap_or_else(|| CommandSpec::unknown(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.specs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
