//! Command classification.
//!
//! Every command the router knows is described by a [`CommandSpec`]: how it
//! is routed ([`CommandCategory`]), whether it needs a master
//! ([`Access`]), where its keys sit ([`KeySpec`]), how broadcast replies are
//! combined ([`Aggregate`]) and which client-side [`Emulation`] services it
//! when its keys are spread over several shards.

mod table;

pub use table::CommandTable;

use crate::core::Arg;

/// Routing category of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCategory {
    /// Mutates one key; runs on the shard master.
    Write,
    /// Observes one key; runs on a replica of the shard when one is reachable.
    Read,
    /// Has no key; runs on every node and the replies are aggregated.
    Broadcast,
    /// Session or administrative command; runs on the default node.
    NoHash,
    /// Touches several keys that must live on one shard.
    TagRequired,
}

/// Whether a command may be served by a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
}

/// Positions of the key arguments, Redis `COMMAND` style.
///
/// Keys sit at `first`, `first + step`, ... up to `last`; a negative `last`
/// counts from the end of the argument list. With `counted` set, the
/// argument after `first` holds how many keys follow it (`ZINTERSTORE dst 2 a
/// b`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeySpec {
    pub first: usize,
    pub last: isize,
    pub step: usize,
    pub counted: bool,
}

impl KeySpec {
    /// No key argument.
    pub const NONE: KeySpec = KeySpec::range(0, 0, 0);

    /// A single key in first position.
    pub const FIRST: KeySpec = KeySpec::range(0, 0, 1);

    /// Every argument is a key.
    pub const ALL: KeySpec = KeySpec::range(0, -1, 1);

    pub const fn range(first: usize, last: isize, step: usize) -> Self {
        Self {
            first,
            last,
            step,
            counted: false,
        }
    }

    /// Key at `first`, a key count right after it, then the counted keys.
    pub const fn counted(first: usize) -> Self {
        Self {
            first,
            last: 0,
            step: 1,
            counted: true,
        }
    }

    pub fn is_keyless(&self) -> bool {
        self.step == 0
    }

    /// Indexes into `args` holding keys.
    pub fn positions(&self, args: &[Arg]) -> Vec<usize> {
        let len = args.len();
        if self.is_keyless() || self.first >= len {
            return Vec::new();
        }

        if self.counted {
            let mut positions = vec![self.first];
            if let Some(count) = args.get(self.first + 1).and_then(Arg::as_i64) {
                let start = self.first + 2;
                let end = (start + count.max(0) as usize).min(len);
                positions.extend(start..end);
            }
            return positions;
        }

        let last = if self.last < 0 {
            len as isize + self.last
        } else {
            self.last.min(len as isize - 1)
        };
        if last < self.first as isize {
            return Vec::new();
        }
        (self.first..=last as usize).step_by(self.step).collect()
    }

    /// Key names in argument order; collection arguments contribute every
    /// member.
    pub fn keys<'a>(&self, args: &'a [Arg]) -> Vec<&'a str> {
        self.positions(args)
            .into_iter()
            .flat_map(|i| args[i].key_names())
            .collect()
    }
}

/// How the per-node replies of a broadcast are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregate {
    /// `alias → reply` map, one entry per node.
    PerNode,
    /// Flat de-duplicated union of array replies (`KEYS`).
    UnionKeys,
    /// Sum of integer replies over the masters (`DBSIZE`).
    Sum,
}

/// Set-algebra operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOp {
    Diff,
    Inter,
    Union,
}

/// Client-side reproduction of a multi-key command whose keys are spread
/// over several shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Emulation {
    /// One `DEL` per key; the counts are summed.
    Del,
    /// One `EXISTS` per key; the counts are summed.
    Exists,
    MGet,
    MSet,
    MSetNx,
    SetAlgebra(SetOp),
    SetAlgebraStore(SetOp),
    SMove,
    RPopLPush,
    BRPopLPush,
    Rename,
    RenameNx,
}

/// Immutable routing description of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub category: CommandCategory,
    pub access: Access,
    pub keys: KeySpec,
    pub aggregate: Aggregate,
    pub emulation: Option<Emulation>,
}

impl CommandSpec {
    pub fn new(name: &str, category: CommandCategory, access: Access, keys: KeySpec) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            category,
            access,
            keys,
            aggregate: Aggregate::PerNode,
            emulation: None,
        }
    }

    pub fn aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregate = aggregate;
        self
    }

    pub fn emulated_by(mut self, emulation: Emulation) -> Self {
        self.emulation = Some(emulation);
        self
    }

    /// Spec given to names missing from the table: default node, no keys.
    pub fn unknown(name: &str) -> Self {
        Self::new(name, CommandCategory::NoHash, Access::Write, KeySpec::NONE)
    }

    /// Broadcasts of writes and of summed counters only reach masters.
    pub fn masters_only_broadcast(&self) -> bool {
        self.access == Access::Write || self.aggregate == Aggregate::Sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(items: &[&str]) -> Vec<Arg> {
        items.iter().map(|s| Arg::from(*s)).collect()
    }

    #[test]
    fn test_key_positions() {
        let args = strs(&["a", "b", "c", "d"]);
        assert_eq!(KeySpec::FIRST.positions(&args), vec![0]);
        assert_eq!(KeySpec::ALL.positions(&args), vec![0, 1, 2, 3]);
        assert_eq!(KeySpec::range(0, -1, 2).positions(&args), vec![0, 2]);
        assert_eq!(KeySpec::range(0, -2, 1).positions(&args), vec![0, 1, 2]);
        assert_eq!(KeySpec::range(1, 1, 1).positions(&args), vec![1]);
        assert!(KeySpec::NONE.positions(&args).is_empty());
        assert!(KeySpec::FIRST.positions(&[]).is_empty());
    }

    #[test]
    fn test_counted_keys_skip_options() {
        let args = strs(&["dst{t}", "2", "a{t}", "b{t}", "WEIGHTS", "1", "2"]);
        assert_eq!(
            KeySpec::counted(0).keys(&args),
            vec!["dst{t}", "a{t}", "b{t}"]
        );

        let collected = vec![
            Arg::from("dst"),
            Arg::Int(2),
            Arg::Keys(vec!["a".into(), "b".into()]),
        ];
        assert_eq!(KeySpec::counted(0).keys(&collected), vec!["dst", "a", "b"]);
    }

    #[test]
    fn test_collections_contribute_members() {
        let args = vec![Arg::Pairs(vec![
            ("k1".into(), "v1".into()),
            ("k2".into(), "v2".into()),
        ])];
        assert_eq!(KeySpec::range(0, -1, 2).keys(&args), vec!["k1", "k2"]);
    }
}
