//! Key placement.
//!
//! A key is placed by its *routing key*: the hash tag when it carries one,
//! the whole key otherwise. The routing key is hashed with CRC32 and reduced
//! modulo the number of masters, so placement is a pure function of the key
//! and the shard count.

mod router;

pub use router::{KeyRouter, Route};

/// Text between the rightmost `{` and the first `}` after it.
///
/// `{}` yields the empty tag; an unclosed `{` yields no tag.
pub fn hash_tag(key: &str) -> Option<&str> {
    let open = key.rfind('{')?;
    let rest = &key[open + 1..];
    let close = rest.find('}')?;
    Some(&rest[..close])
}

/// The part of a key that decides its shard.
pub fn routing_key(key: &str) -> &str {
    hash_tag(key).unwrap_or(key)
}

/// Removes the `{tag}` group from a key, keeping what surrounds it.
pub fn strip_hash_tag(key: &str) -> String {
    let Some(open) = key.rfind('{') else {
        return key.to_string();
    };
    match key[open + 1..].find('}') {
        Some(close) => {
            let mut stored = String::with_capacity(key.len());
            stored.push_str(&key[..open]);
            stored.push_str(&key[open + 1 + close + 1..]);
            stored
        }
        None => key.to_string(),
    }
}

/// `abs(crc32(routing_key) as i32) mod shard_count`.
pub fn shard_index(routing_key: &str, shard_count: usize) -> usize {
    if shard_count == 0 {
        return 0;
    }
    let signed = crc32fast::hash(routing_key.as_bytes()) as i32;
    signed.unsigned_abs() as usize % shard_count
}

/// True when the keys may run natively on one node: a single distinct key,
/// or every key carrying the same hash tag.
pub fn shares_hash_tag<S: AsRef<str>>(keys: &[S]) -> bool {
    let Some(first) = keys.first().map(AsRef::as_ref) else {
        return true;
    };
    if keys.iter().all(|k| k.as_ref() == first) {
        return true;
    }
    match hash_tag(first) {
        Some(tag) => keys.iter().all(|k| hash_tag(k.as_ref()) == Some(tag)),
        None => false,
    }
}
