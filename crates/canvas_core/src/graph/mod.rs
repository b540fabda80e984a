//! Document/field graph context.
//!
//! # Responsibility
//! - Own the gateway cache, the undo log and field observers.
//! - Expose every document, scalar and list operation as a method.
//! - Drain transport responses and route them to waiters and appliers.
//!
//! # Invariants
//! - Every local mutation records exactly one undo event and one push.
//! - Mutations applied from server state record nothing and push nothing.
//! - Waiters of one id run in registration order, after deferred updates.

use crate::config::CoreConfig;
use crate::error::{GraphError, GraphResult};
use crate::gateway::{CacheStatus, Gateway, InFlight};
use crate::keys::{Key, KeyId};
use crate::model::basic::{BooleanField, NumberField, TextField, UrlField};
use crate::model::document::Document;
use crate::model::field::{Field, FieldBody, FieldId, FieldKind, FieldType, Lookup};
use crate::model::list::ListField;
use crate::model::record::{FieldRecord, RecordValue};
use crate::transport::{Response, Transport};
use crate::undo::{UndoBatch, UndoContext, UndoError, UndoEvent, UndoLog};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use url::Url;

mod document;
mod list;
mod scalar;

/// Observer callback for one field.
pub type Observer = Rc<dyn Fn(&FieldEvent)>;

/// Settled kinds of a `resolve_many` request; `None` marks a missing id.
pub type ResolveMap = HashMap<FieldId, Option<FieldKind>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Change notification delivered to observers of the subject field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldEvent {
    ValueChanged {
        field: FieldId,
    },
    SlotChanged {
        document: FieldId,
        key: Key,
    },
    Spliced {
        list: FieldId,
        index: usize,
        removed: Vec<FieldId>,
        inserted: Vec<FieldId>,
    },
    /// A proxied slot became resident.
    Promoted {
        document: FieldId,
        key: Key,
        field: FieldId,
    },
    RemoteUpdated {
        field: FieldId,
    },
}

impl FieldEvent {
    pub fn subject(&self) -> FieldId {
        match self {
            Self::ValueChanged { field } | Self::RemoteUpdated { field } => *field,
            Self::SlotChanged { document, .. } | Self::Promoted { document, .. } => *document,
            Self::Spliced { list, .. } => *list,
        }
    }
}

struct ManyState {
    remaining: usize,
    map: ResolveMap,
    callback: Option<Box<dyn FnOnce(&mut DocGraph, ResolveMap)>>,
}

/// Graph of documents and fields backed by one transport.
pub struct DocGraph {
    gateway: Gateway,
    history: UndoLog<DocGraph>,
    observers: HashMap<FieldId, Vec<(ObserverId, Observer)>>,
    next_observer: u64,
    next_script: u64,
    promotions: HashSet<(FieldId, KeyId, FieldId)>,
    from_server: bool,
}

impl UndoContext for DocGraph {
    fn undo_log(&mut self) -> &mut UndoLog<Self> {
        &mut self.history
    }
}

impl DocGraph {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::with_history(Box::new(transport), UndoLog::new())
    }

    pub fn with_config(transport: impl Transport + 'static, config: &CoreConfig) -> Self {
        Self::with_history(
            Box::new(transport),
            UndoLog::with_limit(config.undo_limit),
        )
    }

    fn with_history(transport: Box<dyn Transport>, history: UndoLog<DocGraph>) -> Self {
        info!("event=graph_init module=graph status=ok");
        Self {
            gateway: Gateway::from_boxed(transport),
            history,
            observers: HashMap::new(),
            next_observer: 0,
            next_script: 0,
            promotions: HashSet::new(),
            from_server: false,
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn history(&self) -> &UndoLog<DocGraph> {
        &self.history
    }

    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.gateway.field(id)
    }

    /// Typed view of a resident field; `None` when absent or of another kind.
    pub fn field_as<F: FieldType>(&self, id: FieldId) -> Option<&F> {
        self.gateway.field(id)?.downcast::<F>()
    }

    pub fn kind(&self, id: FieldId) -> Option<FieldKind> {
        match self.gateway.status(id) {
            CacheStatus::Resolved(kind) => Some(kind),
            CacheStatus::Absent | CacheStatus::Waiting => None,
        }
    }

    pub fn status(&self, id: FieldId) -> CacheStatus {
        self.gateway.status(id)
    }

    /// Makes `body` resident under a fresh id and pushes it.
    pub fn create(&mut self, body: impl Into<FieldBody>) -> FieldId {
        let id = self.gateway.insert_local(Field::new(body));
        self.push(id);
        id
    }

    /// # Errors
    /// - `NonFiniteNumber` for NaN or an infinity.
    pub fn create_number(&mut self, value: f64) -> GraphResult<FieldId> {
        if !value.is_finite() {
            return Err(GraphError::NonFiniteNumber);
        }
        Ok(self.create(NumberField::new(value)))
    }

    pub fn create_text(&mut self, value: impl Into<String>) -> FieldId {
        self.create(TextField::new(value.into()))
    }

    pub fn create_url(&mut self, value: Url) -> FieldId {
        self.create(UrlField::new(value))
    }

    pub fn create_bool(&mut self, value: bool) -> FieldId {
        self.create(BooleanField::new(value))
    }

    pub fn create_list(&mut self, elements: Vec<FieldId>) -> FieldId {
        self.create(ListField::from_elements(elements))
    }

    /// Fixed-arity list.
    pub fn create_tuple(&mut self, elements: Vec<FieldId>) -> FieldId {
        self.create(ListField::tuple(elements))
    }

    pub fn new_document(&mut self) -> FieldId {
        self.create(Document::new())
    }

    pub fn observe(
        &mut self,
        field: FieldId,
        callback: impl Fn(&FieldEvent) + 'static,
    ) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers
            .entry(field)
            .or_default()
            .push((id, Rc::new(callback)));
        id
    }

    pub fn unobserve(&mut self, observer: ObserverId) -> bool {
        for callbacks in self.observers.values_mut() {
            if let Some(position) = callbacks.iter().position(|(id, _)| *id == observer) {
                callbacks.remove(position);
                return true;
            }
        }
        false
    }

    pub(crate) fn notify(&self, event: FieldEvent) {
        let Some(callbacks) = self.observers.get(&event.subject()) else {
            return;
        };
        let callbacks: Vec<Observer> = callbacks.iter().map(|(_, cb)| Rc::clone(cb)).collect();
        for callback in callbacks {
            callback(&event);
        }
    }

    pub fn undo(&mut self) -> bool {
        crate::undo::undo(self)
    }

    pub fn redo(&mut self) -> bool {
        crate::undo::redo(self)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn open_batches(&self) -> Vec<String> {
        self.history
            .open_batches()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn start_batch(&mut self, label: impl Into<String>) -> UndoBatch {
        self.history.start_batch(label)
    }

    pub fn end_batch(&mut self, batch: UndoBatch) -> Result<(), UndoError> {
        self.history.end_batch(batch)
    }

    pub fn cancel_batch(&mut self, batch: UndoBatch) -> Result<(), UndoError> {
        self.history.cancel_batch(batch)
    }

    /// Runs `f` inside a batch labelled `label`.
    pub fn run_in_batch<R>(&mut self, label: &str, f: impl FnOnce(&mut Self) -> R) -> R {
        let batch = self.start_batch(label);
        let result = f(self);
        if let Err(err) = self.end_batch(batch) {
            warn!("event=batch_end module=graph status=error error={err}");
        }
        result
    }

    pub(crate) fn record(
        &mut self,
        undo: impl FnMut(&mut DocGraph) + 'static,
        redo: impl FnMut(&mut DocGraph) + 'static,
    ) {
        if self.from_server {
            return;
        }
        self.history.add_event(UndoEvent::new(undo, redo));
    }

    pub(crate) fn push(&mut self, id: FieldId) {
        if self.from_server {
            return;
        }
        let Some(record) = self.gateway.push(id) else {
            return;
        };
        if let RecordValue::List { elements, .. } = record.value {
            if let Some(list) = self.list_mut(id) {
                list.set_shadow(elements);
            }
        }
    }

    pub(crate) fn require<F: FieldType>(&self, id: FieldId) -> GraphResult<&F> {
        let field = self.gateway.field(id).ok_or(GraphError::NotResident(id))?;
        field.downcast::<F>().ok_or(GraphError::WrongKind {
            id,
            expected: F::KIND,
            actual: field.kind(),
        })
    }

    pub(crate) fn require_mut<F: FieldType>(&mut self, id: FieldId) -> GraphResult<&mut F> {
        let field = self
            .gateway
            .field_mut(id)
            .ok_or(GraphError::NotResident(id))?;
        let actual = field.kind();
        field.downcast_mut::<F>().ok_or(GraphError::WrongKind {
            id,
            expected: F::KIND,
            actual,
        })
    }

    pub(crate) fn document(&self, id: FieldId) -> Option<&Document> {
        self.field_as::<Document>(id)
    }

    pub(crate) fn document_mut(&mut self, id: FieldId) -> Option<&mut Document> {
        self.gateway.field_mut(id)?.downcast_mut::<Document>()
    }

    pub(crate) fn list_mut(&mut self, id: FieldId) -> Option<&mut ListField> {
        self.gateway.field_mut(id)?.downcast_mut::<ListField>()
    }

    /// Poll-style resolve through the gateway cache.
    pub fn resolve(&mut self, id: FieldId) -> Lookup<FieldId> {
        self.gateway.request(id)
    }

    /// Runs `callback` once `id` settles: immediately when resident, after
    /// the single in-flight fetch otherwise. `None` means the server has no
    /// such field.
    pub fn resolve_with(
        &mut self,
        id: FieldId,
        callback: impl FnOnce(&mut DocGraph, Option<FieldId>) + 'static,
    ) {
        if let Lookup::Resolved(id) = self.gateway.request(id) {
            callback(self, Some(id));
            return;
        }
        if let Err(waiter) = self.gateway.subscribe(id, Box::new(callback)) {
            let resolved = self.gateway.is_resolved(id).then_some(id);
            waiter(self, resolved);
        }
    }

    /// Resolves every id in `ids` with at most one new batched fetch, then
    /// runs `callback` once all of them, including ids already in flight for
    /// other callers, have settled.
    pub fn resolve_many(
        &mut self,
        ids: &[FieldId],
        callback: impl FnOnce(&mut DocGraph, ResolveMap) + 'static,
    ) {
        let partition = self.gateway.partition(ids);
        let mut map = ResolveMap::new();
        for id in &partition.resolved {
            map.insert(*id, self.kind(*id));
        }

        let mut outstanding = partition.waiting.clone();
        outstanding.extend(partition.unrequested.iter().copied());
        if outstanding.is_empty() {
            callback(self, map);
            return;
        }

        self.gateway.request_many(&partition.unrequested);
        let state = Rc::new(RefCell::new(ManyState {
            remaining: outstanding.len(),
            map,
            callback: Some(Box::new(callback)),
        }));

        for id in outstanding {
            let state = Rc::clone(&state);
            let waiter = Box::new(move |graph: &mut DocGraph, resolved: Option<FieldId>| {
                let ready = {
                    let mut state = state.borrow_mut();
                    state
                        .map
                        .insert(id, resolved.and_then(|resolved| graph.kind(resolved)));
                    state.remaining -= 1;
                    if state.remaining == 0 {
                        let map = std::mem::take(&mut state.map);
                        state.callback.take().map(|callback| (callback, map))
                    } else {
                        None
                    }
                };
                if let Some((callback, map)) = ready {
                    callback(graph, map);
                }
            });
            if let Err(waiter) = self.gateway.subscribe(id, waiter) {
                let resolved = self.gateway.is_resolved(id).then_some(id);
                waiter(self, resolved);
            }
        }
    }

    /// Delivers every queued transport response. Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(response) = self.gateway.poll() {
            self.deliver(response);
            handled += 1;
        }
        handled
    }

    fn deliver(&mut self, response: Response) {
        match response {
            Response::One { ticket, record } => match self.gateway.take_in_flight(ticket) {
                Some(InFlight::Fetch(ids)) => {
                    for id in ids {
                        self.settle(id, record.clone());
                    }
                }
                Some(InFlight::Refresh { id, snapshot }) => match record {
                    Some(record) => self.apply_server_state(record, Some(snapshot)),
                    None => info!(
                        "event=fetch_missing module=graph status=ok mode=refresh id={id}"
                    ),
                },
                None => warn!(
                    "event=fetch_response module=graph status=ignored reason=unknown_ticket ticket={}",
                    ticket.0
                ),
            },
            Response::Many { ticket, records } => match self.gateway.take_in_flight(ticket) {
                Some(InFlight::Fetch(ids)) => {
                    let mut by_id: HashMap<FieldId, FieldRecord> =
                        records.into_iter().map(|record| (record.id, record)).collect();
                    for id in ids {
                        let record = by_id.remove(&id);
                        self.settle(id, record);
                    }
                }
                _ => warn!(
                    "event=fetch_response module=graph status=ignored reason=unknown_ticket ticket={}",
                    ticket.0
                ),
            },
            Response::Update(record) => self.apply_remote_update(record),
        }
    }

    fn settle(&mut self, id: FieldId, record: Option<FieldRecord>) {
        let settled = self.gateway.settle(id, record);
        let resolved = settled.resolved.then_some(id);
        for update in settled.deferred {
            self.apply_remote_update(update);
        }
        for waiter in settled.waiters {
            waiter(self, resolved);
        }
    }

    /// Applies a server-initiated change without recording undo or pushing.
    ///
    /// Deferred while the id is still being fetched; ignored for ids never
    /// requested.
    pub fn apply_remote_update(&mut self, record: FieldRecord) {
        let id = record.id;
        match self.gateway.status(id) {
            CacheStatus::Waiting => {
                debug!("event=remote_update module=graph status=deferred id={id}");
                if let Err(record) = self.gateway.defer(record) {
                    self.apply_server_state(record, None);
                }
            }
            CacheStatus::Absent => {
                debug!("event=remote_update module=graph status=ignored reason=not_cached id={id}");
            }
            CacheStatus::Resolved(_) => self.apply_server_state(record, None),
        }
    }

    fn apply_server_state(&mut self, record: FieldRecord, snapshot: Option<Vec<FieldId>>) {
        let id = record.id;
        let Some(kind) = self.kind(id) else {
            return;
        };
        if record.kind() != kind {
            warn!(
                "event=remote_update module=graph status=ignored reason=kind_mismatch id={} local={} remote={}",
                id,
                kind,
                record.kind()
            );
            return;
        }

        let previous = std::mem::replace(&mut self.from_server, true);
        match record.value {
            RecordValue::List { elements, .. } => {
                let snapshot = snapshot.unwrap_or_else(|| {
                    self.field_as::<ListField>(id)
                        .map(|list| list.shadow().to_vec())
                        .unwrap_or_default()
                });
                self.reconcile_list(id, &snapshot, elements);
            }
            RecordValue::Document { fields } => self.replace_slots(id, fields),
            scalar => {
                if let Some(raw) = scalar.scalar_raw() {
                    self.try_coerce_and_set(id, &raw);
                }
            }
        }
        self.from_server = previous;

        info!("event=remote_update module=graph status=ok id={id} kind={kind}");
        self.notify(FieldEvent::RemoteUpdated { field: id });
    }
}

#[cfg(test)]
mod tests {
    use super::{DocGraph, FieldEvent};
    use crate::gateway::CacheStatus;
    use crate::model::field::{FieldId, FieldKind, Lookup};
    use crate::model::record::{FieldRecord, RecordValue};
    use crate::transport::MemoryTransport;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn created_field_is_resident_and_pushed() {
        let server = MemoryTransport::new();
        let mut graph = DocGraph::new(server.clone());

        let id = graph.create_number(2.0).unwrap();
        assert_eq!(graph.status(id), CacheStatus::Resolved(FieldKind::Number));
        assert_eq!(server.push_count(), 1);
        assert!(!graph.can_undo());
    }

    #[test]
    fn resolve_with_waits_for_the_single_fetch() {
        let server = MemoryTransport::new();
        let id = FieldId::generate();
        server.seed(FieldRecord {
            id,
            value: RecordValue::Boolean { data: true },
        });
        let mut graph = DocGraph::new(server.clone());
        let seen = Rc::new(RefCell::new(Vec::new()));

        for _ in 0..3 {
            let seen = Rc::clone(&seen);
            graph.resolve_with(id, move |_, resolved| seen.borrow_mut().push(resolved));
        }
        assert!(seen.borrow().is_empty());
        assert_eq!(server.fetch_one_count(), 1);

        server.release_all();
        graph.pump();
        assert_eq!(*seen.borrow(), vec![Some(id); 3]);
    }

    #[test]
    fn update_for_waiting_id_is_applied_after_fetch() {
        let server = MemoryTransport::new();
        let id = FieldId::generate();
        server.seed(FieldRecord {
            id,
            value: RecordValue::Number { data: 1.0 },
        });
        let mut graph = DocGraph::new(server.clone());

        assert_eq!(graph.resolve(id), Lookup::Pending);
        graph.apply_remote_update(FieldRecord {
            id,
            value: RecordValue::Number { data: 9.0 },
        });
        server.release_all();
        graph.pump();

        assert_eq!(graph.value::<f64>(id), Some(9.0));
        assert!(!graph.can_undo());
    }

    #[test]
    fn observers_see_events_for_their_field_only() {
        let mut graph = DocGraph::new(MemoryTransport::new());
        let watched = graph.create_text("a");
        let other = graph.create_text("b");
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let observer = graph.observe(watched, move |event| sink.borrow_mut().push(event.clone()));

        graph.set_value(watched, "c".to_string()).unwrap();
        graph.set_value(other, "d".to_string()).unwrap();
        assert_eq!(
            *events.borrow(),
            vec![FieldEvent::ValueChanged { field: watched }]
        );

        assert!(graph.unobserve(observer));
        graph.set_value(watched, "e".to_string()).unwrap();
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn run_in_batch_groups_writes() {
        let mut graph = DocGraph::new(MemoryTransport::new());
        let x = graph.create_number(0.0).unwrap();
        let y = graph.create_number(0.0).unwrap();

        graph.run_in_batch("move", |graph| {
            graph.set_value(x, 10.0).unwrap();
            graph.set_value(y, 20.0).unwrap();
        });
        assert!(graph.open_batches().is_empty());

        graph.undo();
        assert_eq!(graph.value::<f64>(x), Some(0.0));
        assert_eq!(graph.value::<f64>(y), Some(0.0));
    }
}
