//! List, set, sorted-set and hash commands of [`MemoryStore`].

use super::entry::{EntryValue, Keyspace, SortedSet};
use super::memory::{
    Args, MemoryStore, hash_mut, list_mut, normalize_range, parse_float, set_mut, zset_mut,
};
use super::{StoreError, StoreResult};
use crate::core::Reply;
use std::collections::BTreeSet;
use std::time::Instant;

impl MemoryStore {
    pub(super) fn execute_collection(
        &mut self,
        db: u32,
        a: &Args<'_>,
        now: Instant,
    ) -> StoreResult<Reply> {
        let ks = self.keyspace(db);
        let reply = match a.name {
            // lists
            "lpush" | "rpush" | "lpushx" | "rpushx" => {
                a.min(2)?;
                let create = !a.name.ends_with('x');
                let Some(list) = list_mut(ks, a.str(0), now, create)? else {
                    return Ok(Reply::Int(0));
                };
                for value in a.rest(1) {
                    if a.name.starts_with('l') {
                        list.push_front(value.clone());
                    } else {
                        list.push_back(value.clone());
                    }
                }
                Reply::Int(list.len() as i64)
            }
            "lpop" | "rpop" => {
                a.exact(1)?;
                let popped = pop(ks, a.str(0), a.name == "lpop", now)?;
                Reply::from(popped)
            }
            "blpop" | "brpop" => {
                // Never blocks: the first non-empty list wins, otherwise nil.
                a.min(2)?;
                let keys = &a.items[..a.len() - 1];
                a.int(a.len() - 1)?;
                for key in keys {
                    if let Some(value) = pop(ks, key, a.name == "blpop", now)? {
                        return Ok(Reply::bulk_array([key.clone(), value]));
                    }
                }
                Reply::Nil
            }
            "rpoplpush" | "brpoplpush" => {
                if a.name == "brpoplpush" {
                    a.exact(3)?;
                    a.int(2)?;
                } else {
                    a.exact(2)?;
                }
                let (src, dst) = (a.str(0), a.str(1));
                if list_mut(ks, dst, now, false).is_err() {
                    return Err(StoreError::WrongType);
                }
                match pop(ks, src, false, now)? {
                    Some(value) => {
                        if let Some(list) = list_mut(ks, dst, now, true)? {
                            list.push_front(value.clone());
                        }
                        Reply::Bulk(value)
                    }
                    None => Reply::Nil,
                }
            }
            "llen" => {
                a.exact(1)?;
                let len = list_mut(ks, a.str(0), now, false)?.map_or(0, |l| l.len());
                Reply::Int(len as i64)
            }
            "lrange" => {
                a.exact(3)?;
                let (start, stop) = (a.int(1)?, a.int(2)?);
                let items = match list_mut(ks, a.str(0), now, false)? {
                    Some(list) => match normalize_range(start, stop, list.len()) {
                        Some((s, e)) => list.range(s..=e).cloned().collect(),
                        None => Vec::new(),
                    },
                    None => Vec::new(),
                };
                Reply::bulk_array(items)
            }
            // sets
            "sadd" => {
                a.min(2)?;
                let set = set_mut(ks, a.str(0), now, true)?.ok_or(StoreError::WrongType)?;
                let added = a.rest(1).iter().filter(|m| set.insert((*m).clone())).count();
                Reply::Int(added as i64)
            }
            "srem" => {
                a.min(2)?;
                let removed = match set_mut(ks, a.str(0), now, false)? {
                    Some(set) => a.rest(1).iter().filter(|m| set.remove(m.as_str())).count(),
                    None => 0,
                };
                ks.prune(a.str(0));
                Reply::Int(removed as i64)
            }
            "smembers" => {
                a.exact(1)?;
                Reply::bulk_array(members(ks, a.str(0), now)?)
            }
            "sismember" => {
                a.exact(2)?;
                let found = set_mut(ks, a.str(0), now, false)?
                    .is_some_and(|set| set.contains(a.str(1)));
                Reply::Int(found as i64)
            }
            "scard" => {
                a.exact(1)?;
                let card = set_mut(ks, a.str(0), now, false)?.map_or(0, |s| s.len());
                Reply::Int(card as i64)
            }
            "smove" => {
                a.exact(3)?;
                let (src, dst, member) = (a.str(0), a.str(1), a.str(2));
                if set_mut(ks, dst, now, false).is_err() {
                    return Err(StoreError::WrongType);
                }
                let moved = set_mut(ks, src, now, false)?.is_some_and(|set| set.remove(member));
                if !moved {
                    return Ok(Reply::Int(0));
                }
                ks.prune(src);
                if let Some(set) = set_mut(ks, dst, now, true)? {
                    set.insert(member.to_string());
                }
                Reply::Int(1)
            }
            "sdiff" | "sinter" | "sunion" => {
                a.min(1)?;
                Reply::bulk_array(combine(ks, a.name, a.items, now)?)
            }
            "sdiffstore" | "sinterstore" | "sunionstore" => {
                a.min(2)?;
                let op = a.name.trim_end_matches("store");
                let result = combine(ks, op, a.rest(1), now)?;
                let card = result.len();
                ks.remove(a.str(0), now);
                if card > 0 {
                    ks.insert(a.str(0), EntryValue::Set(result));
                }
                Reply::Int(card as i64)
            }

            // sorted sets
            "zadd" => {
                if a.len() < 3 || a.len() % 2 == 0 {
                    return Err(StoreError::Arity(a.name.to_string()));
                }
                let mut scored = Vec::with_capacity(a.len() / 2);
                for pair in a.rest(1).chunks(2) {
                    scored.push((parse_float(&pair[0])?, pair[1].clone()));
                }
                let zset = zset_mut(ks, a.str(0), now, true)?.ok_or(StoreError::WrongType)?;
                let added = scored
                    .into_iter()
                    .filter(|(score, member)| zset.insert(member.clone(), *score).is_none())
                    .count();
                Reply::Int(added as i64)
            }
            "zrem" => {
                a.min(2)?;
                let removed = match zset_mut(ks, a.str(0), now, false)? {
                    Some(zset) => a
                        .rest(1)
                        .iter()
                        .filter(|m| zset.remove(m.as_str()).is_some())
                        .count(),
                    None => 0,
                };
                ks.prune(a.str(0));
                Reply::Int(removed as i64)
            }
            "zscore" => {
                a.exact(2)?;
                match zset_mut(ks, a.str(0), now, false)?.and_then(|z| z.get(a.str(1)).copied()) {
                    Some(score) => Reply::Float(score),
                    None => Reply::Nil,
                }
            }
            "zcard" => {
                a.exact(1)?;
                let card = zset_mut(ks, a.str(0), now, false)?.map_or(0, |z| z.len());
                Reply::Int(card as i64)
            }
            "zrange" | "zrevrange" => {
                a.min(3)?;
                let (start, stop) = (a.int(1)?, a.int(2)?);
                let with_scores = match a.items.get(3) {
                    Some(flag) if flag.eq_ignore_ascii_case("withscores") => true,
                    Some(_) => return Err(StoreError::Syntax),
                    None => false,
                };
                let mut ordered = match zset_mut(ks, a.str(0), now, false)? {
                    Some(zset) => by_score(zset),
                    None => Vec::new(),
                };
                if a.name == "zrevrange" {
                    ordered.reverse();
                }
                let window: Vec<(String, f64)> = match normalize_range(start, stop, ordered.len()) {
                    Some((s, e)) => ordered.drain(s..=e).collect(),
                    None => Vec::new(),
                };
                scored_reply(window, with_scores)
            }
            "zinterstore" | "zunionstore" => {
                a.min(3)?;
                let numkeys = a.int(1)?;
                if numkeys < 1 || a.len() < 2 + numkeys as usize {
                    return Err(StoreError::Syntax);
                }
                let sources = &a.items[2..2 + numkeys as usize];
                let mut weights = vec![1.0; sources.len()];
                let mut aggregate = "sum".to_string();
                let mut i = 2 + sources.len();
                while i < a.len() {
                    match a.str(i).to_ascii_lowercase().as_str() {
                        "weights" if i + sources.len() < a.len() => {
                            for (w, slot) in weights.iter_mut().enumerate() {
                                *slot = a.float(i + 1 + w)?;
                            }
                            i += sources.len();
                        }
                        "aggregate" if i + 1 < a.len() => {
                            aggregate = a.str(i + 1).to_ascii_lowercase();
                            if !matches!(aggregate.as_str(), "sum" | "min" | "max") {
                                return Err(StoreError::Syntax);
                            }
                            i += 1;
                        }
                        _ => return Err(StoreError::Syntax),
                    }
                    i += 1;
                }
                let combined =
                    combine_scored(ks, a.name == "zinterstore", sources, &weights, &aggregate, now)?;
                let card = combined.len();
                ks.remove(a.str(0), now);
                if card > 0 {
                    ks.insert(a.str(0), EntryValue::ZSet(combined));
                }
                Reply::Int(card as i64)
            }

            // hashes
            "hset" | "hmset" => {
                if a.len() < 3 || a.len() % 2 == 0 {
                    return Err(StoreError::Arity(a.name.to_string()));
                }
                let hash = hash_mut(ks, a.str(0), now, true)?.ok_or(StoreError::WrongType)?;
                let added = a
                    .rest(1)
                    .chunks(2)
                    .filter(|fv| hash.insert(fv[0].clone(), fv[1].clone()).is_none())
                    .count();
                if a.name == "hmset" {
                    Reply::ok()
                } else {
                    Reply::Int(added as i64)
                }
            }
            "hget" => {
                a.exact(2)?;
                let value = hash_mut(ks, a.str(0), now, false)?.and_then(|h| h.get(a.str(1)).cloned());
                Reply::from(value)
            }
            "hgetall" | "hkeys" | "hvals" => {
                a.exact(1)?;
                let fields: Vec<(String, String)> = hash_mut(ks, a.str(0), now, false)?
                    .map(|h| h.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
                    .unwrap_or_default();
                match a.name {
                    "hgetall" => Reply::Map(
                        fields
                            .into_iter()
                            .map(|(f, v)| (f, Reply::Bulk(v)))
                            .collect(),
                    ),
                    "hkeys" => Reply::bulk_array(fields.into_iter().map(|(f, _)| f)),
                    _ => Reply::bulk_array(fields.into_iter().map(|(_, v)| v)),
                }
            }

            _ => return Err(StoreError::UnknownCommand(a.name.to_string())),
        };
        Ok(reply)
    }
}

fn pop(ks: &mut Keyspace, key: &str, front: bool, now: Instant) -> StoreResult<Option<String>> {
    let popped = match list_mut(ks, key, now, false)? {
        Some(list) if front => list.pop_front(),
        Some(list) => list.pop_back(),
        None => None,
    };
    ks.prune(key);
    Ok(popped)
}

fn members(ks: &mut Keyspace, key: &str, now: Instant) -> StoreResult<BTreeSet<String>> {
    Ok(set_mut(ks, key, now, false)?.cloned().unwrap_or_default())
}

fn combine(
    ks: &mut Keyspace,
    op: &str,
    keys: &[String],
    now: Instant,
) -> StoreResult<BTreeSet<String>> {
    let mut sets = Vec::with_capacity(keys.len());
    for key in keys {
        sets.push(members(ks, key, now)?);
    }
    let mut iter = sets.into_iter();
    let first = iter.next().unwrap_or_default();
    Ok(iter.fold(first, |acc, next| match op {
        "sdiff" => acc.difference(&next).cloned().collect(),
        "sinter" => acc.intersection(&next).cloned().collect(),
        _ => acc.union(&next).cloned().collect(),
    }))
}

fn scored_reply(window: impl IntoIterator<Item = (String, f64)>, with_scores: bool) -> Reply {
    if with_scores {
        Reply::Map(
            window
                .into_iter()
                .map(|(member, score)| (member, Reply::Float(score)))
                .collect(),
        )
    } else {
        Reply::bulk_array(window.into_iter().map(|(member, _)| member))
    }
}

fn combine_scored(
    ks: &mut Keyspace,
    intersect: bool,
    sources: &[String],
    weights: &[f64],
    aggregate: &str,
    now: Instant,
) -> StoreResult<SortedSet> {
    let mut inputs = Vec::with_capacity(sources.len());
    for key in sources {
        inputs.push(zset_mut(ks, key, now, false)?.cloned().unwrap_or_default());
    }

    let mut combined = SortedSet::new();
    for (input, weight) in inputs.iter().zip(weights) {
        for (member, score) in input {
            let weighted = score * weight;
            combined
                .entry(member.clone())
                .and_modify(|acc| {
                    *acc = match aggregate {
                        "min" => acc.min(weighted),
                        "max" => acc.max(weighted),
                        _ => *acc + weighted,
                    }
                })
                .or_insert(weighted);
        }
    }
    if intersect {
        combined.retain(|member, _| inputs.iter().all(|input| input.contains_key(member)));
    }
    Ok(combined)
}

/// Members ordered by (score, member).
fn by_score(zset: &SortedSet) -> Vec<(String, f64)> {
    let mut ordered: Vec<(String, f64)> = zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
    ordered.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    ordered
}
