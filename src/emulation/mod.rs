//! Client-side reproduction of multi-key commands whose keys live on
//! different shards.
//!
//! Every emulation is a strictly ordered sequence of single-key steps, each
//! routed on its own. Steps are not atomic across shards and nothing is rolled
//! back: the first failing step aborts the sequence and the caller sees
//! `Nil`, with the steps already applied left in place.

use crate::commands::{CommandSpec, Emulation, SetOp};
use crate::core::{Arg, ClusterError, Reply, Result};
use crate::dispatch::Dispatcher;
use std::collections::BTreeSet;

/// Runs emulations through a [`Dispatcher`].
pub struct Emulator<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> Emulator<'a> {
    pub fn new(dispatcher: &'a Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn run(&self, emulation: Emulation, spec: &CommandSpec, args: &[Arg]) -> Result<Reply> {
        let keys: Vec<String> = spec.keys.keys(args).into_iter().map(str::to_string).collect();
        match emulation {
            Emulation::Del => self.count_per_key("DEL", &keys).await,
            Emulation::Exists => self.count_per_key("EXISTS", &keys).await,
            Emulation::MGet => self.mget(&keys).await,
            Emulation::MSet => self.mset(args).await,
            Emulation::MSetNx => self.msetnx(args).await,
            Emulation::SetAlgebra(op) => {
                let members = self.combine(op, &keys).await?;
                Ok(Reply::bulk_array(members))
            }
            Emulation::SetAlgebraStore(op) => {
                let (destination, sources) = split_first(&keys, spec)?;
                self.store_set(op, destination, sources).await
            }
            Emulation::SMove => {
                let [source, destination] = two_keys(&keys, spec)?;
                let member = scalar_at(args, 2, spec)?;
                self.smove(source, destination, member).await
            }
            Emulation::RPopLPush => {
                let [source, destination] = two_keys(&keys, spec)?;
                self.pop_push(source, destination, None).await
            }
            Emulation::BRPopLPush => {
                let [source, destination] = two_keys(&keys, spec)?;
                let timeout = args.get(2).cloned().unwrap_or(Arg::Int(0));
                self.pop_push(source, destination, Some(timeout)).await
            }
            Emulation::Rename => {
                let [source, destination] = two_keys(&keys, spec)?;
                self.rename(source, destination, false).await
            }
            Emulation::RenameNx => {
                let [source, destination] = two_keys(&keys, spec)?;
                self.rename(source, destination, true).await
            }
        }
    }

    async fn step(&self, command: &str, args: Vec<Arg>) -> Result<Reply> {
        self.dispatcher.step(command, &args).await
    }

    async fn count_per_key(&self, command: &str, keys: &[String]) -> Result<Reply> {
        let mut total = 0;
        for key in keys {
            total += self.step(command, vec![key.into()]).await?.as_i64().unwrap_or(0);
        }
        Ok(Reply::Int(total))
    }

    async fn mget(&self, keys: &[String]) -> Result<Reply> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.step("GET", vec![key.into()]).await?);
        }
        Ok(Reply::Array(values))
    }

    async fn mset(&self, args: &[Arg]) -> Result<Reply> {
        for (key, value) in pairs(args)? {
            self.step("SET", vec![key.into(), value.into()]).await?;
        }
        Ok(Reply::ok())
    }

    async fn msetnx(&self, args: &[Arg]) -> Result<Reply> {
        let pairs = pairs(args)?;
        for (key, _) in &pairs {
            let exists = self.step("EXISTS", vec![key.into()]).await?;
            if exists.as_i64().unwrap_or(0) > 0 {
                return Ok(Reply::Int(0));
            }
        }
        for (key, value) in pairs {
            self.step("SET", vec![key.into(), value.into()]).await?;
        }
        Ok(Reply::Int(1))
    }

    async fn members(&self, key: &str) -> Result<BTreeSet<String>> {
        let reply = self.step("SMEMBERS", vec![key.into()]).await?;
        match reply {
            Reply::Nil => Ok(BTreeSet::new()),
            other => other
                .into_strings()
                .map(|members| members.into_iter().collect())
                .ok_or_else(|| self.unexpected(key, "SMEMBERS")),
        }
    }

    async fn combine(&self, op: SetOp, keys: &[String]) -> Result<BTreeSet<String>> {
        let mut result: Option<BTreeSet<String>> = None;
        for key in keys {
            let members = self.members(key).await?;
            result = Some(match result {
                None => members,
                Some(acc) => match op {
                    SetOp::Diff => acc.difference(&members).cloned().collect(),
                    SetOp::Inter => acc.intersection(&members).cloned().collect(),
                    SetOp::Union => acc.union(&members).cloned().collect(),
                },
            });
        }
        Ok(result.unwrap_or_default())
    }

    async fn store_set(&self, op: SetOp, destination: &str, sources: &[String]) -> Result<Reply> {
        let members = self.combine(op, sources).await?;
        self.step("DEL", vec![destination.into()]).await?;
        for member in &members {
            self.step("SADD", vec![destination.into(), member.into()]).await?;
        }
        Ok(Reply::Int(members.len() as i64))
    }

    async fn smove(&self, source: &str, destination: &str, member: String) -> Result<Reply> {
        self.expect_type(destination, "set").await?;
        if self.same_stored_key(source, destination) {
            let present = self.step("SISMEMBER", vec![source.into(), member.into()]).await?;
            return Ok(Reply::Int(present.as_i64().unwrap_or(0)));
        }
        let removed = self.step("SREM", vec![source.into(), member.clone().into()]).await?;
        if removed.as_i64().unwrap_or(0) == 0 {
            return Ok(Reply::Int(0));
        }
        self.step("SADD", vec![destination.into(), member.into()]).await?;
        Ok(Reply::Int(1))
    }

    async fn pop_push(&self, source: &str, destination: &str, timeout: Option<Arg>) -> Result<Reply> {
        self.expect_type(destination, "list").await?;
        let value = match timeout {
            None => self.step("RPOP", vec![source.into()]).await?,
            // BRPOP answers [key, value]
            Some(timeout) => match self.step("BRPOP", vec![source.into(), timeout]).await? {
                Reply::Array(mut pair) if pair.len() == 2 => pair.swap_remove(1),
                _ => Reply::Nil,
            },
        };
        let Some(value) = value.into_string() else {
            return Ok(Reply::Nil);
        };
        self.step("LPUSH", vec![destination.into(), value.clone().into()]).await?;
        Ok(Reply::Bulk(value))
    }

    async fn rename(&self, source: &str, destination: &str, only_if_absent: bool) -> Result<Reply> {
        if only_if_absent {
            let exists = self.step("EXISTS", vec![destination.into()]).await?;
            if exists.as_i64().unwrap_or(0) > 0 {
                return Ok(Reply::Int(0));
            }
        }

        let kind = self.type_of(source).await?;
        if kind == "none" {
            return Ok(Reply::Nil);
        }
        // Distinct tags may strip to one stored key on one master.
        if self.same_stored_key(source, destination) {
            return Ok(if only_if_absent {
                Reply::Int(0)
            } else {
                Reply::ok()
            });
        }
        let ttl = self
            .step("PTTL", vec![source.into()])
            .await?
            .as_i64()
            .unwrap_or(-1);
        let contents = match kind.as_str() {
            "string" => self.step("GET", vec![source.into()]).await?,
            "list" => self.step("LRANGE", vec![source.into(), Arg::Int(0), Arg::Int(-1)]).await?,
            "set" => self.step("SMEMBERS", vec![source.into()]).await?,
            "hash" => self.step("HGETALL", vec![source.into()]).await?,
            "zset" => {
                self.step(
                    "ZRANGE",
                    vec![source.into(), Arg::Int(0), Arg::Int(-1), "WITHSCORES".into()],
                )
                .await?
            }
            other => {
                return Err(ClusterError::invocation(
                    self.node_of(source),
                    format!("cannot rename a value of type '{}'", other),
                ));
            }
        };

        self.step("DEL", vec![destination.into()]).await?;
        self.rebuild(destination, &kind, contents).await?;
        if ttl > 0 {
            self.step("PEXPIRE", vec![destination.into(), Arg::Int(ttl)]).await?;
        }
        self.step("DEL", vec![source.into()]).await?;

        Ok(if only_if_absent {
            Reply::Int(1)
        } else {
            Reply::ok()
        })
    }

    async fn rebuild(&self, destination: &str, kind: &str, contents: Reply) -> Result<()> {
        match (kind, contents) {
            ("string", value) => {
                let value = value
                    .into_string()
                    .ok_or_else(|| self.unexpected(destination, "GET"))?;
                self.step("SET", vec![destination.into(), value.into()]).await?;
            }
            ("list", items) => {
                let items = items
                    .into_strings()
                    .ok_or_else(|| self.unexpected(destination, "LRANGE"))?;
                for item in items {
                    self.step("RPUSH", vec![destination.into(), item.into()]).await?;
                }
            }
            ("set", members) => {
                let members = members
                    .into_strings()
                    .ok_or_else(|| self.unexpected(destination, "SMEMBERS"))?;
                for member in members {
                    self.step("SADD", vec![destination.into(), member.into()]).await?;
                }
            }
            ("hash", fields) => {
                for (field, value) in self.entries(destination, "HGETALL", fields)? {
                    let value = value
                        .into_string()
                        .ok_or_else(|| self.unexpected(destination, "HGETALL"))?;
                    self.step("HSET", vec![destination.into(), field.into(), value.into()])
                        .await?;
                }
            }
            ("zset", scored) => {
                for (member, score) in self.entries(destination, "ZRANGE", scored)? {
                    let score = score
                        .as_f64()
                        .ok_or_else(|| self.unexpected(destination, "ZRANGE"))?;
                    self.step("ZADD", vec![destination.into(), Arg::Float(score), member.into()])
                        .await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Field/value pairs from a map reply, or from a flat `[k, v, k, v]` array.
    fn entries(&self, key: &str, command: &str, reply: Reply) -> Result<Vec<(String, Reply)>> {
        match reply {
            Reply::Map(entries) => Ok(entries),
            Reply::Array(items) if items.len() % 2 == 0 => {
                let mut entries = Vec::with_capacity(items.len() / 2);
                let mut items = items.into_iter();
                while let (Some(field), Some(value)) = (items.next(), items.next()) {
                    let field = field
                        .into_string()
                        .ok_or_else(|| self.unexpected(key, command))?;
                    entries.push((field, value));
                }
                Ok(entries)
            }
            _ => Err(self.unexpected(key, command)),
        }
    }

    async fn type_of(&self, key: &str) -> Result<String> {
        let reply = self.step("TYPE", vec![key.into()]).await?;
        Ok(reply
            .into_string()
            .map(|kind| kind.to_ascii_lowercase())
            .unwrap_or_else(|| "none".to_string()))
    }

    /// Fails like the native command would when `key` holds another type.
    async fn expect_type(&self, key: &str, expected: &str) -> Result<()> {
        let kind = self.type_of(key).await?;
        if kind != "none" && kind != expected {
            return Err(ClusterError::invocation(
                self.node_of(key),
                "WRONGTYPE Operation against a key holding the wrong kind of value",
            ));
        }
        Ok(())
    }

    /// Both names reach the same stored key on the same master.
    fn same_stored_key(&self, a: &str, b: &str) -> bool {
        let router = self.dispatcher.router();
        router.master_for(a) == router.master_for(b) && router.stored_key(a) == router.stored_key(b)
    }

    fn node_of(&self, key: &str) -> &str {
        self.dispatcher.router().master_for(key)
    }

    fn unexpected(&self, key: &str, command: &str) -> ClusterError {
        ClusterError::invocation(
            self.node_of(key),
            format!("unexpected {} reply for '{}'", command, key),
        )
    }
}

/// Key/value pairs of a bulk set: `Pairs` collections or flat `k v k v`.
fn pairs(args: &[Arg]) -> Result<Vec<(String, String)>> {
    let flat = Arg::flatten(args);
    if flat.is_empty() || flat.len() % 2 != 0 {
        return Err(ClusterError::InvalidArguments(
            "bulk set expects key/value pairs".to_string(),
        ));
    }
    Ok(flat
        .chunks(2)
        .map(|kv| (kv[0].clone(), kv[1].clone()))
        .collect())
}

fn two_keys<'k>(keys: &'k [String], spec: &CommandSpec) -> Result<[&'k str; 2]> {
    match keys {
        [first, second, ..] => Ok([first.as_str(), second.as_str()]),
        _ => Err(ClusterError::InvalidArguments(format!(
            "'{}' expects a source and a destination key",
            spec.name
        ))),
    }
}

fn split_first<'k>(keys: &'k [String], spec: &CommandSpec) -> Result<(&'k str, &'k [String])> {
    match keys.split_first() {
        Some((destination, sources)) if !sources.is_empty() => Ok((destination.as_str(), sources)),
        _ => Err(ClusterError::InvalidArguments(format!(
            "'{}' expects a destination and at least one source key",
            spec.name
        ))),
    }
}

fn scalar_at(args: &[Arg], index: usize, spec: &CommandSpec) -> Result<String> {
    args.get(index).and_then(Arg::to_text).ok_or_else(|| {
        ClusterError::InvalidArguments(format!(
            "'{}' expects a scalar argument at position {}",
            spec.name, index
        ))
    })
}
