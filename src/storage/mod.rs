//! Single-node in-memory key-value store used as the reference backend.

mod collections;
pub mod entry;
pub mod memory;

use thiserror::Error;

pub use entry::{Entry, EntryValue, Keyspace};
pub use memory::{MemoryStore, is_write_command};

/// Errors raised by a store while executing one command. They surface to the
/// routing layer as invocation failures carrying the rendered message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR wrong number of arguments for '{0}' command")]
    Arity(String),

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR value is not a valid float")]
    NotFloat,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpire(String),

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("READONLY You can't write against a read only replica.")]
    ReadOnly,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
