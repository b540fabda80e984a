//! Field cache and request coalescing.
//!
//! # Responsibility
//! - Own every locally resident field.
//! - Guarantee at most one outstanding fetch per field id.
//! - Write resident fields through to the transport.
//!
//! # Invariants
//! - A cache entry is absent, `Waiting`, or `Resolved`; only the gateway
//!   moves an entry between states.
//! - A `Waiting` entry is removed when the server reports the id missing,
//!   so a later request can retry.
//! - All waiters of one id observe the same resident field.

use crate::graph::DocGraph;
use crate::model::field::{Field, FieldId, FieldKind, Lookup};
use crate::model::record::FieldRecord;
use crate::transport::{Request, Response, Ticket, Transport};
use log::{debug, info};
use std::collections::HashMap;

/// Callback run once when a requested id settles; `None` means missing.
pub type Waiter = Box<dyn FnOnce(&mut DocGraph, Option<FieldId>)>;

pub enum CacheEntry {
    Waiting {
        waiters: Vec<Waiter>,
        /// Remote updates that arrived while the fetch was in flight.
        deferred: Vec<FieldRecord>,
    },
    Resolved(Field),
}

/// Cache state of one id, without borrowing the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Absent,
    Waiting,
    Resolved(FieldKind),
}

/// What a fetch ticket was issued for.
pub(crate) enum InFlight {
    Fetch(Vec<FieldId>),
    /// Cache-bypassing re-read of a resident field, with the list order at
    /// issue time.
    Refresh {
        id: FieldId,
        snapshot: Vec<FieldId>,
    },
}

/// Ids of a batch request split by cache state.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Partition {
    pub resolved: Vec<FieldId>,
    pub waiting: Vec<FieldId>,
    pub unrequested: Vec<FieldId>,
}

/// Settled waiters and deferred updates handed back to the graph.
pub(crate) struct Settled {
    pub waiters: Vec<Waiter>,
    pub deferred: Vec<FieldRecord>,
    pub resolved: bool,
}

/// Traffic counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GatewayStats {
    pub fetch_one: usize,
    pub fetch_many: usize,
    pub coalesced: usize,
    pub missing: usize,
    pub pushes: usize,
}

pub struct Gateway {
    entries: HashMap<FieldId, CacheEntry>,
    transport: Box<dyn Transport>,
    next_ticket: u64,
    in_flight: HashMap<Ticket, InFlight>,
    stats: GatewayStats,
}

impl Gateway {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::from_boxed(Box::new(transport))
    }

    pub fn from_boxed(transport: Box<dyn Transport>) -> Self {
        Self {
            entries: HashMap::new(),
            transport,
            next_ticket: 0,
            in_flight: HashMap::new(),
            stats: GatewayStats::default(),
        }
    }

    pub fn status(&self, id: FieldId) -> CacheStatus {
        match self.entries.get(&id) {
            None => CacheStatus::Absent,
            Some(CacheEntry::Waiting { .. }) => CacheStatus::Waiting,
            Some(CacheEntry::Resolved(field)) => CacheStatus::Resolved(field.kind()),
        }
    }

    pub fn field(&self, id: FieldId) -> Option<&Field> {
        match self.entries.get(&id) {
            Some(CacheEntry::Resolved(field)) => Some(field),
            _ => None,
        }
    }

    pub(crate) fn field_mut(&mut self, id: FieldId) -> Option<&mut Field> {
        match self.entries.get_mut(&id) {
            Some(CacheEntry::Resolved(field)) => Some(field),
            _ => None,
        }
    }

    pub fn is_resolved(&self, id: FieldId) -> bool {
        matches!(self.entries.get(&id), Some(CacheEntry::Resolved(_)))
    }

    pub fn resident_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry, CacheEntry::Resolved(_)))
            .count()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> GatewayStats {
        self.stats
    }

    /// Registers a locally constructed field as resolved.
    pub(crate) fn insert_local(&mut self, field: Field) -> FieldId {
        let id = field.id();
        self.entries.insert(id, CacheEntry::Resolved(field));
        id
    }

    /// Poll-style resolution. Issues a fetch only for ids never requested.
    ///
    /// Never returns `Absent`; a missing id is only known once answered.
    pub fn request(&mut self, id: FieldId) -> Lookup<FieldId> {
        match self.entries.get(&id) {
            Some(CacheEntry::Resolved(_)) => Lookup::Resolved(id),
            Some(CacheEntry::Waiting { .. }) => {
                self.stats.coalesced += 1;
                debug!("event=request_coalesced module=gateway status=ok id={id}");
                Lookup::Pending
            }
            None => {
                self.entries.insert(
                    id,
                    CacheEntry::Waiting {
                        waiters: Vec::new(),
                        deferred: Vec::new(),
                    },
                );
                let ticket = self.issue(InFlight::Fetch(vec![id]));
                self.stats.fetch_one += 1;
                info!("event=fetch_request module=gateway status=start mode=one id={id}");
                self.transport.send(Request::FetchOne { ticket, id });
                Lookup::Pending
            }
        }
    }

    /// Queues `waiter` on a waiting id. Hands it back when the id is not waiting.
    pub(crate) fn subscribe(&mut self, id: FieldId, waiter: Waiter) -> Result<(), Waiter> {
        match self.entries.get_mut(&id) {
            Some(CacheEntry::Waiting { waiters, .. }) => {
                waiters.push(waiter);
                Ok(())
            }
            _ => Err(waiter),
        }
    }

    pub fn partition(&self, ids: &[FieldId]) -> Partition {
        let mut partition = Partition::default();
        for id in ids {
            let bucket = match self.entries.get(id) {
                Some(CacheEntry::Resolved(_)) => &mut partition.resolved,
                Some(CacheEntry::Waiting { .. }) => &mut partition.waiting,
                None => &mut partition.unrequested,
            };
            if !bucket.contains(id) {
                bucket.push(*id);
            }
        }
        partition
    }

    /// Issues one batched fetch for ids with no cache entry.
    pub(crate) fn request_many(&mut self, ids: &[FieldId]) {
        let mut fresh = Vec::new();
        for id in ids {
            if self.entries.contains_key(id) {
                continue;
            }
            self.entries.insert(
                *id,
                CacheEntry::Waiting {
                    waiters: Vec::new(),
                    deferred: Vec::new(),
                },
            );
            fresh.push(*id);
        }
        if fresh.is_empty() {
            return;
        }
        let ticket = self.issue(InFlight::Fetch(fresh.clone()));
        self.stats.fetch_many += 1;
        info!(
            "event=fetch_request module=gateway status=start mode=many count={}",
            fresh.len()
        );
        self.transport.send(Request::FetchMany { ticket, ids: fresh });
    }

    /// Re-reads a resident field from the server, bypassing the cache.
    pub(crate) fn refresh(&mut self, id: FieldId, snapshot: Vec<FieldId>) -> bool {
        if !self.is_resolved(id) {
            return false;
        }
        let ticket = self.issue(InFlight::Refresh { id, snapshot });
        info!("event=fetch_request module=gateway status=start mode=refresh id={id}");
        self.transport.send(Request::FetchOne { ticket, id });
        true
    }

    /// Moves a waiting id to resolved (or drops it when `record` is `None`).
    pub(crate) fn settle(&mut self, id: FieldId, record: Option<FieldRecord>) -> Settled {
        let (waiters, deferred) = match self.entries.remove(&id) {
            Some(CacheEntry::Waiting { waiters, deferred }) => (waiters, deferred),
            Some(resolved) => {
                // Late duplicate answer; the resident field stays authoritative.
                self.entries.insert(id, resolved);
                return Settled {
                    waiters: Vec::new(),
                    deferred: Vec::new(),
                    resolved: true,
                };
            }
            None => (Vec::new(), Vec::new()),
        };

        match record {
            Some(mut record) => {
                record.id = id;
                let field = record.into_field();
                info!(
                    "event=fetch_response module=gateway status=ok id={} kind={} waiters={}",
                    id,
                    field.kind(),
                    waiters.len()
                );
                self.entries.insert(id, CacheEntry::Resolved(field));
                Settled {
                    waiters,
                    deferred,
                    resolved: true,
                }
            }
            None => {
                self.stats.missing += 1;
                info!(
                    "event=fetch_missing module=gateway status=ok id={} waiters={}",
                    id,
                    waiters.len()
                );
                Settled {
                    waiters,
                    deferred: Vec::new(),
                    resolved: false,
                }
            }
        }
    }

    /// Holds a remote update until the id's fetch settles.
    pub(crate) fn defer(&mut self, record: FieldRecord) -> Result<(), FieldRecord> {
        match self.entries.get_mut(&record.id) {
            Some(CacheEntry::Waiting { deferred, .. }) => {
                deferred.push(record);
                Ok(())
            }
            _ => Err(record),
        }
    }

    /// Writes the resident state of `id` through to the transport.
    pub(crate) fn push(&mut self, id: FieldId) -> Option<FieldRecord> {
        let record = FieldRecord::from_field(self.field(id)?);
        self.stats.pushes += 1;
        debug!(
            "event=push module=gateway status=ok id={} kind={}",
            id,
            record.kind()
        );
        self.transport.send(Request::Push(record.clone()));
        Some(record)
    }

    pub(crate) fn poll(&mut self) -> Option<Response> {
        self.transport.poll_response()
    }

    pub(crate) fn take_in_flight(&mut self, ticket: Ticket) -> Option<InFlight> {
        self.in_flight.remove(&ticket)
    }

    fn issue(&mut self, purpose: InFlight) -> Ticket {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        self.in_flight.insert(ticket, purpose);
        ticket
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheStatus, Gateway};
    use crate::model::basic::NumberField;
    use crate::model::field::{Field, FieldId, FieldKind, Lookup};
    use crate::model::record::{FieldRecord, RecordValue};
    use crate::transport::MemoryTransport;

    #[test]
    fn second_request_for_waiting_id_is_coalesced() {
        let server = MemoryTransport::new();
        let mut gateway = Gateway::new(server.clone());
        let id = FieldId::generate();

        assert_eq!(gateway.request(id), Lookup::Pending);
        assert_eq!(gateway.request(id), Lookup::Pending);
        assert_eq!(server.fetch_one_count(), 1);
        assert_eq!(gateway.stats().coalesced, 1);
        assert_eq!(gateway.status(id), CacheStatus::Waiting);
    }

    #[test]
    fn missing_answer_clears_entry() {
        let mut gateway = Gateway::new(MemoryTransport::new());
        let id = FieldId::generate();
        gateway.request(id);

        let settled = gateway.settle(id, None);
        assert!(!settled.resolved);
        assert_eq!(gateway.status(id), CacheStatus::Absent);
    }

    #[test]
    fn answered_record_becomes_resident() {
        let mut gateway = Gateway::new(MemoryTransport::new());
        let id = FieldId::generate();
        gateway.request(id);

        gateway.settle(
            id,
            Some(FieldRecord {
                id,
                value: RecordValue::Number { data: 4.0 },
            }),
        );
        assert_eq!(gateway.status(id), CacheStatus::Resolved(FieldKind::Number));
        assert_eq!(gateway.request(id), Lookup::Resolved(id));
    }

    #[test]
    fn partition_splits_by_cache_state() {
        let server = MemoryTransport::new();
        let mut gateway = Gateway::new(server.clone());
        let resident = gateway.insert_local(Field::new(NumberField::new(1.0)));
        let waiting = FieldId::generate();
        gateway.request(waiting);
        let fresh = FieldId::generate();

        let partition = gateway.partition(&[resident, waiting, fresh, fresh]);
        assert_eq!(partition.resolved, vec![resident]);
        assert_eq!(partition.waiting, vec![waiting]);
        assert_eq!(partition.unrequested, vec![fresh]);

        gateway.request_many(&partition.unrequested);
        assert_eq!(server.fetch_many_calls(), 1);
        assert_eq!(gateway.status(fresh), CacheStatus::Waiting);
    }

    #[test]
    fn push_sends_resident_record() {
        let server = MemoryTransport::new();
        let mut gateway = Gateway::new(server.clone());
        let id = gateway.insert_local(Field::new(NumberField::new(3.0)));

        gateway.push(id);
        assert_eq!(
            server.last_push(id).map(|record| record.value),
            Some(RecordValue::Number { data: 3.0 })
        );
        assert!(gateway.push(FieldId::generate()).is_none());
    }
}
