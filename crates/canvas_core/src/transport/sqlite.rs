//! Loopback server persisting records in SQLite.
//!
//! # Responsibility
//! - Store pushed records as JSON text keyed by field id.
//! - Answer fetches from the stored records.
//!
//! # Invariants
//! - Storage and decode failures are logged and answered as "no such field";
//!   they never reach graph readers.

use crate::db::{open_db, open_db_in_memory, DbResult};
use crate::model::field::FieldId;
use crate::model::record::FieldRecord;
use crate::transport::{Request, Response, Transport, TransportError};
use log::{debug, error};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::VecDeque;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

const UPSERT_SQL: &str = "INSERT INTO field_records (field_id, kind, record, updated_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(field_id) DO UPDATE SET
    kind = excluded.kind,
    record = excluded.record,
    updated_at = excluded.updated_at";

pub struct SqliteTransport {
    conn: Connection,
    outbox: VecDeque<Response>,
}

impl SqliteTransport {
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Ok(Self::from_connection(open_db(path)?))
    }

    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    /// Wraps a connection that already has migrations applied.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            outbox: VecDeque::new(),
        }
    }

    pub fn store(&self, record: &FieldRecord) -> Result<(), TransportError> {
        let json = serde_json::to_string(record)?;
        self.conn.execute(
            UPSERT_SQL,
            params![
                record.id.to_string(),
                record.kind().as_str(),
                json,
                now_ms()
            ],
        )?;
        Ok(())
    }

    pub fn load(&self, id: FieldId) -> Result<Option<FieldRecord>, TransportError> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT record FROM field_records WHERE field_id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn record_count(&self) -> Result<usize, TransportError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM field_records", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn load_or_log(&self, id: FieldId) -> Option<FieldRecord> {
        match self.load(id) {
            Ok(record) => record,
            Err(err) => {
                error!(
                    "event=fetch_response module=sqlite_transport status=error id={} error={}",
                    id, err
                );
                None
            }
        }
    }
}

impl Transport for SqliteTransport {
    fn send(&mut self, request: Request) {
        match request {
            Request::Push(record) => match self.store(&record) {
                Ok(()) => debug!(
                    "event=push module=sqlite_transport status=ok id={} kind={}",
                    record.id,
                    record.kind()
                ),
                Err(err) => error!(
                    "event=push module=sqlite_transport status=error id={} error={}",
                    record.id, err
                ),
            },
            Request::FetchOne { ticket, id } => {
                let record = self.load_or_log(id);
                self.outbox.push_back(Response::One { ticket, record });
            }
            Request::FetchMany { ticket, ids } => {
                let records = ids.iter().filter_map(|id| self.load_or_log(*id)).collect();
                self.outbox.push_back(Response::Many { ticket, records });
            }
        }
    }

    fn poll_response(&mut self) -> Option<Response> {
        self.outbox.pop_front()
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
