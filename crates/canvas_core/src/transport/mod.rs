//! Opaque request/response channel between the gateway and a server.
//!
//! # Responsibility
//! - Carry fetch requests and write-through pushes out.
//! - Carry fetch answers and server-initiated updates back.
//!
//! # Invariants
//! - `send` never blocks; answers arrive later through `poll_response`.
//! - Every fetch is answered exactly once. Missing ids are reported as
//!   `None` (single) or left out of `records` (batch).

use crate::db::DbError;
use crate::model::field::FieldId;
use crate::model::record::FieldRecord;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod memory;
mod sqlite;

pub use memory::MemoryTransport;
pub use sqlite::SqliteTransport;

/// Correlates a fetch with its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    FetchOne { ticket: Ticket, id: FieldId },
    FetchMany { ticket: Ticket, ids: Vec<FieldId> },
    Push(FieldRecord),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    One {
        ticket: Ticket,
        record: Option<FieldRecord>,
    },
    Many {
        ticket: Ticket,
        records: Vec<FieldRecord>,
    },
    /// Server-initiated change to a field.
    Update(FieldRecord),
}

pub trait Transport {
    fn send(&mut self, request: Request);

    fn poll_response(&mut self) -> Option<Response>;
}

#[derive(Debug)]
pub enum TransportError {
    Db(DbError),
    Codec(serde_json::Error),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Codec(err) => write!(f, "record codec: {err}"),
        }
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Codec(err) => Some(err),
        }
    }
}

impl From<DbError> for TransportError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for TransportError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value)
    }
}
