//! List edits, reaction scripts and server reconciliation.
//!
//! # Invariants
//! - Scripts run once per removed element, then once per inserted element.
//! - A splice records one undo event and one push.
//! - Reconciliation runs scripts for net membership changes only and never
//!   records undo or pushes.

use crate::error::{GraphError, GraphResult};
use crate::graph::{DocGraph, FieldEvent};
use crate::model::field::FieldId;
use crate::model::list::{
    multiset_difference, reconcile, ListChange, ListField, ReactionScript, ReconcileMode, ScriptId,
};
use log::{info, warn};
use std::rc::Rc;

impl DocGraph {
    /// Element ids of a resident list.
    pub fn list_elements(&self, list: FieldId) -> Option<Vec<FieldId>> {
        self.field_as::<ListField>(list)
            .map(|field| field.elements().to_vec())
    }

    /// Removes `delete_count` elements at `index` and inserts `items` there.
    ///
    /// `index` and `delete_count` are clamped to the list bounds. Returns the
    /// removed ids.
    ///
    /// # Errors
    /// - `FixedArity` when a tuple list would change length.
    /// - `NotResident` / `WrongKind` when `list` is not a resident list.
    pub fn splice(
        &mut self,
        list: FieldId,
        index: usize,
        delete_count: usize,
        items: Vec<FieldId>,
    ) -> GraphResult<Vec<FieldId>> {
        let field = self.require::<ListField>(list)?;
        let (start, count) = field.clamp(index, delete_count);
        if let Some(arity) = field.arity() {
            if count != items.len() {
                return Err(GraphError::FixedArity { list, len: arity });
            }
        }
        if count == 0 && items.is_empty() {
            return Ok(Vec::new());
        }

        let removed = self.splice_scripted(list, start, count, &items);
        let undo_removed = removed.clone();
        let undo_count = items.len();
        let redo_items = items.clone();
        self.record(
            move |graph| {
                graph.apply_splice(list, start, undo_count, &undo_removed);
            },
            move |graph| {
                graph.apply_splice(list, start, count, &redo_items);
            },
        );
        self.finish_splice(list, start, removed.clone(), items);
        Ok(removed)
    }

    pub fn push_element(&mut self, list: FieldId, item: FieldId) -> GraphResult<()> {
        let len = self.require::<ListField>(list)?.len();
        self.splice(list, len, 0, vec![item]).map(|_| ())
    }

    /// Index assignment; the only edit a tuple list accepts.
    pub fn set_element(
        &mut self,
        list: FieldId,
        index: usize,
        item: FieldId,
    ) -> GraphResult<FieldId> {
        let len = self.require::<ListField>(list)?.len();
        if index >= len {
            return Err(GraphError::IndexOutOfBounds { index, len });
        }
        let removed = self.splice(list, index, 1, vec![item])?;
        Ok(removed.first().copied().unwrap_or(item))
    }

    /// Removes the first occurrence of `item`. Returns whether it was present.
    pub fn remove_element(&mut self, list: FieldId, item: FieldId) -> GraphResult<bool> {
        let Some(position) = self
            .require::<ListField>(list)?
            .elements()
            .iter()
            .position(|id| *id == item)
        else {
            return Ok(false);
        };
        self.splice(list, position, 1, Vec::new())?;
        Ok(true)
    }

    fn splice_scripted(
        &mut self,
        list: FieldId,
        start: usize,
        count: usize,
        items: &[FieldId],
    ) -> Vec<FieldId> {
        let Some(field) = self.list_mut(list) else {
            return Vec::new();
        };
        let removed = field.splice_raw(start, count, items);
        let scripts = field.scripts();
        self.run_scripts(list, &scripts, &removed, items);
        removed
    }

    fn finish_splice(
        &mut self,
        list: FieldId,
        index: usize,
        removed: Vec<FieldId>,
        inserted: Vec<FieldId>,
    ) {
        self.push(list);
        self.notify(FieldEvent::Spliced {
            list,
            index,
            removed,
            inserted,
        });
    }

    fn apply_splice(&mut self, list: FieldId, start: usize, count: usize, items: &[FieldId]) {
        let removed = self.splice_scripted(list, start, count, items);
        self.finish_splice(list, start, removed, items.to_vec());
    }

    fn run_scripts(
        &mut self,
        list: FieldId,
        scripts: &[ReactionScript],
        removed: &[FieldId],
        added: &[FieldId],
    ) {
        if scripts.is_empty() {
            return;
        }
        let changes = removed
            .iter()
            .map(|element| (element, false))
            .chain(added.iter().map(|element| (element, true)));
        for (element, added) in changes {
            let change = ListChange {
                list,
                element: *element,
                added,
            };
            for script in scripts {
                script(self, &change);
            }
        }
    }

    /// Registers `script` and runs it once per current element with `added = true`.
    pub fn attach_script(
        &mut self,
        list: FieldId,
        script: impl Fn(&mut DocGraph, &ListChange) + 'static,
    ) -> GraphResult<ScriptId> {
        let script: ReactionScript = Rc::new(script);
        let id = ScriptId(self.next_script);
        self.next_script += 1;

        let field = self.require_mut::<ListField>(list)?;
        field.add_script(id, Rc::clone(&script));
        let elements = field.elements().to_vec();
        self.run_scripts(list, &[script], &[], &elements);
        Ok(id)
    }

    /// Unregisters a script and runs it once per current element with `added = false`.
    ///
    /// Returns `false` when the script was not attached to `list`.
    pub fn detach_script(&mut self, list: FieldId, script: ScriptId) -> GraphResult<bool> {
        let field = self.require_mut::<ListField>(list)?;
        let Some(script) = field.remove_script(script) else {
            return Ok(false);
        };
        let elements = field.elements().to_vec();
        self.run_scripts(list, &[script], &elements, &[]);
        Ok(true)
    }

    /// Resolves every non-resident element with one batched request, then
    /// reconciles the list against the ids that turned out to exist.
    ///
    /// `callback` receives the reconciled element order.
    pub fn realize_list(
        &mut self,
        list: FieldId,
        callback: impl FnOnce(&mut DocGraph, Vec<FieldId>) + 'static,
    ) -> GraphResult<()> {
        let snapshot = self.require::<ListField>(list)?.elements().to_vec();
        let unresolved: Vec<FieldId> = snapshot
            .iter()
            .copied()
            .filter(|id| !self.gateway.is_resolved(*id))
            .collect();
        if unresolved.is_empty() {
            callback(self, snapshot);
            return Ok(());
        }

        self.resolve_many(&unresolved, move |graph, settled| {
            let server: Vec<FieldId> = snapshot
                .iter()
                .copied()
                .filter(|id| !matches!(settled.get(id), Some(None)))
                .collect();
            if graph.reconcile_list(list, &snapshot, server).is_some() {
                graph.notify(FieldEvent::RemoteUpdated { field: list });
            }
            let elements = graph.list_elements(list).unwrap_or_default();
            callback(graph, elements);
        });
        Ok(())
    }

    /// Re-fetches a resident field from the server, bypassing the cache. The
    /// answer is applied like a remote update once pumped.
    pub fn refresh(&mut self, id: FieldId) -> bool {
        let snapshot = self.list_elements(id).unwrap_or_default();
        self.gateway.refresh(id, snapshot)
    }

    /// Merges `server` into the list given the local order at request time.
    ///
    /// Returns `None` when `list` is not a resident list.
    pub(crate) fn reconcile_list(
        &mut self,
        list: FieldId,
        snapshot: &[FieldId],
        server: Vec<FieldId>,
    ) -> Option<ReconcileMode> {
        let field = self.list_mut(list)?;
        let current = field.elements().to_vec();
        let merged = reconcile(&current, snapshot, &server);

        let removed = multiset_difference(&current, &merged.elements);
        let added = multiset_difference(&merged.elements, &current);
        field.set_shadow(merged.elements.clone());
        field.replace_elements(merged.elements);
        let scripts = field.scripts();

        if merged.mode == ReconcileMode::Replace {
            warn!(
                "event=list_reconcile module=graph status=ok mode={} id={} local_len={} server_len={}",
                merged.mode.as_str(),
                list,
                current.len(),
                server.len()
            );
        } else {
            info!(
                "event=list_reconcile module=graph status=ok mode={} id={} added={} removed={}",
                merged.mode.as_str(),
                list,
                added.len(),
                removed.len()
            );
        }

        self.run_scripts(list, &scripts, &removed, &added);
        Some(merged.mode)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::GraphError;
    use crate::graph::DocGraph;
    use crate::model::list::ListChange;
    use crate::transport::MemoryTransport;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn splice_clamps_like_array_splice() {
        let mut graph = DocGraph::new(MemoryTransport::new());
        let a = graph.create_text("a");
        let b = graph.create_text("b");
        let list = graph.create_list(vec![a]);

        let removed = graph.splice(list, 10, 5, vec![b]).unwrap();
        assert!(removed.is_empty());
        assert_eq!(graph.list_elements(list), Some(vec![a, b]));
    }

    #[test]
    fn tuple_rejects_length_change_but_allows_assignment() {
        let mut graph = DocGraph::new(MemoryTransport::new());
        let a = graph.create_number(1.0).unwrap();
        let b = graph.create_number(2.0).unwrap();
        let tuple = graph.create_tuple(vec![a, a]);

        assert_eq!(
            graph.push_element(tuple, b),
            Err(GraphError::FixedArity { list: tuple, len: 2 })
        );
        assert_eq!(graph.set_element(tuple, 1, b), Ok(a));
        assert_eq!(graph.list_elements(tuple), Some(vec![a, b]));
        assert_eq!(
            graph.set_element(tuple, 2, b),
            Err(GraphError::IndexOutOfBounds { index: 2, len: 2 })
        );
    }

    #[test]
    fn scripts_see_removals_before_insertions() {
        let mut graph = DocGraph::new(MemoryTransport::new());
        let a = graph.create_text("a");
        let b = graph.create_text("b");
        let list = graph.create_list(vec![a]);
        let log: Rc<RefCell<Vec<ListChange>>> = Rc::default();
        let sink = Rc::clone(&log);
        graph
            .attach_script(list, move |_, change| sink.borrow_mut().push(*change))
            .unwrap();

        graph.splice(list, 0, 1, vec![b]).unwrap();
        let added: Vec<bool> = log.borrow().iter().map(|change| change.added).collect();
        assert_eq!(added, vec![true, false, true]);
        assert_eq!(log.borrow()[1].element, a);
        assert_eq!(log.borrow()[2].element, b);
    }

    #[test]
    fn undo_of_splice_restores_order() {
        let mut graph = DocGraph::new(MemoryTransport::new());
        let ids: Vec<_> = (0..3).map(|n| graph.create_number(n as f64).unwrap()).collect();
        let list = graph.create_list(ids.clone());

        graph.splice(list, 1, 1, Vec::new()).unwrap();
        assert_eq!(graph.list_elements(list), Some(vec![ids[0], ids[2]]));
        graph.undo();
        assert_eq!(graph.list_elements(list), Some(ids.clone()));
        graph.redo();
        assert_eq!(graph.list_elements(list), Some(vec![ids[0], ids[2]]));
    }
}
