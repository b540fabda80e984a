//! In-process server with controllable response timing.
//!
//! # Responsibility
//! - Answer fetches from an in-memory record store.
//! - Hold fetch answers until released, so callers can interleave local
//!   edits with in-flight requests.
//! - Count traffic for coalescing assertions.
//!
//! # Invariants
//! - Answers are computed at release time from the store as it is then.
//! - Clones share one server.

use crate::model::field::FieldId;
use crate::model::record::FieldRecord;
use crate::transport::{Request, Response, Transport};
use log::debug;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

#[derive(Default)]
struct MemoryServer {
    store: HashMap<FieldId, FieldRecord>,
    auto_release: bool,
    held: VecDeque<Request>,
    outbox: VecDeque<Response>,
    fetch_one_count: usize,
    fetch_many_calls: usize,
    pushed: Vec<FieldRecord>,
}

impl MemoryServer {
    fn answer(&mut self, request: Request) {
        let response = match request {
            Request::FetchOne { ticket, id } => Response::One {
                ticket,
                record: self.store.get(&id).cloned(),
            },
            Request::FetchMany { ticket, ids } => Response::Many {
                ticket,
                records: ids
                    .iter()
                    .filter_map(|id| self.store.get(id).cloned())
                    .collect(),
            },
            Request::Push(_) => return,
        };
        self.outbox.push_back(response);
    }
}

/// Shared handle to an in-process server.
///
/// Keep a clone in the test and hand another to the gateway.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    server: Rc<RefCell<MemoryServer>>,
}

impl MemoryTransport {
    /// Server that holds every fetch until `release_*` is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Server that answers every fetch on the next poll.
    pub fn auto() -> Self {
        let transport = Self::default();
        transport.server.borrow_mut().auto_release = true;
        transport
    }

    pub fn seed(&self, record: FieldRecord) {
        self.server.borrow_mut().store.insert(record.id, record);
    }

    pub fn stored(&self, id: FieldId) -> Option<FieldRecord> {
        self.server.borrow().store.get(&id).cloned()
    }

    pub fn remove(&self, id: FieldId) -> Option<FieldRecord> {
        self.server.borrow_mut().store.remove(&id)
    }

    /// Answers every held fetch. Returns how many were answered.
    pub fn release_all(&self) -> usize {
        let mut server = self.server.borrow_mut();
        let held: Vec<Request> = server.held.drain(..).collect();
        let count = held.len();
        for request in held {
            server.answer(request);
        }
        count
    }

    /// Answers the oldest held fetch.
    pub fn release_next(&self) -> bool {
        let mut server = self.server.borrow_mut();
        match server.held.pop_front() {
            Some(request) => {
                server.answer(request);
                true
            }
            None => false,
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.server.borrow().held.len()
    }

    /// Stores `record` and queues it as a server-initiated update.
    pub fn emit_update(&self, record: FieldRecord) {
        let mut server = self.server.borrow_mut();
        server.store.insert(record.id, record.clone());
        server.outbox.push_back(Response::Update(record));
    }

    pub fn fetch_one_count(&self) -> usize {
        self.server.borrow().fetch_one_count
    }

    pub fn fetch_many_calls(&self) -> usize {
        self.server.borrow().fetch_many_calls
    }

    pub fn push_count(&self) -> usize {
        self.server.borrow().pushed.len()
    }

    /// Every pushed record, oldest first.
    pub fn pushed(&self) -> Vec<FieldRecord> {
        self.server.borrow().pushed.clone()
    }

    /// Most recent push for `id`.
    pub fn last_push(&self, id: FieldId) -> Option<FieldRecord> {
        self.server
            .borrow()
            .pushed
            .iter()
            .rev()
            .find(|record| record.id == id)
            .cloned()
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, request: Request) {
        let mut server = self.server.borrow_mut();
        match request {
            Request::Push(record) => {
                debug!(
                    "event=push module=memory_transport status=ok id={} kind={}",
                    record.id,
                    record.kind()
                );
                server.store.insert(record.id, record.clone());
                server.pushed.push(record);
            }
            fetch => {
                if matches!(fetch, Request::FetchOne { .. }) {
                    server.fetch_one_count += 1;
                } else {
                    server.fetch_many_calls += 1;
                }
                if server.auto_release {
                    server.answer(fetch);
                } else {
                    server.held.push_back(fetch);
                }
            }
        }
    }

    fn poll_response(&mut self) -> Option<Response> {
        self.server.borrow_mut().outbox.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryTransport;
    use crate::model::field::FieldId;
    use crate::model::record::{FieldRecord, RecordValue};
    use crate::transport::{Request, Response, Ticket, Transport};

    fn text_record(data: &str) -> FieldRecord {
        FieldRecord {
            id: FieldId::generate(),
            value: RecordValue::Text {
                data: data.to_string(),
            },
        }
    }

    #[test]
    fn held_fetch_is_answered_on_release() {
        let record = text_record("seeded");
        let server = MemoryTransport::new();
        server.seed(record.clone());
        let mut channel = server.clone();

        channel.send(Request::FetchOne {
            ticket: Ticket(1),
            id: record.id,
        });
        assert_eq!(channel.poll_response(), None);
        assert_eq!(server.pending_requests(), 1);

        assert_eq!(server.release_all(), 1);
        assert_eq!(
            channel.poll_response(),
            Some(Response::One {
                ticket: Ticket(1),
                record: Some(record),
            })
        );
        assert_eq!(server.fetch_one_count(), 1);
    }

    #[test]
    fn batch_answer_omits_missing_ids() {
        let record = text_record("present");
        let mut channel = MemoryTransport::auto();
        channel.seed(record.clone());

        channel.send(Request::FetchMany {
            ticket: Ticket(2),
            ids: vec![record.id, FieldId::generate()],
        });
        assert_eq!(
            channel.poll_response(),
            Some(Response::Many {
                ticket: Ticket(2),
                records: vec![record],
            })
        );
        assert_eq!(channel.fetch_many_calls(), 1);
    }

    #[test]
    fn push_writes_through_to_store() {
        let record = text_record("pushed");
        let mut channel = MemoryTransport::new();
        channel.send(Request::Push(record.clone()));

        assert_eq!(channel.stored(record.id), Some(record.clone()));
        assert_eq!(channel.last_push(record.id), Some(record));
        assert_eq!(channel.poll_response(), None);
    }
}
