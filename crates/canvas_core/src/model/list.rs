//! Ordered collection field and its server reconciliation.
//!
//! # Responsibility
//! - Hold element ids in local order alongside the last server-known order.
//! - Carry attached reaction scripts for the graph to invoke.
//! - Decide how a resolved server view merges with concurrent local edits.
//!
//! # Invariants
//! - A fixed-arity (tuple) list never changes length.
//! - Reconciliation keeps a pure local insertion or pure local removal made
//!   while a fetch was in flight; any other divergence takes the server view.

use crate::graph::DocGraph;
use crate::model::field::FieldId;
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

/// Handle returned by `attach_script`, used to detach it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptId(pub(crate) u64);

/// One net membership change delivered to reaction scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListChange {
    pub list: FieldId,
    pub element: FieldId,
    pub added: bool,
}

/// Callback run once per element added to or removed from a list.
pub type ReactionScript = Rc<dyn Fn(&mut DocGraph, &ListChange)>;

/// Ordered sequence of field references.
#[derive(Default)]
pub struct ListField {
    elements: Vec<FieldId>,
    shadow: Vec<FieldId>,
    arity: Option<usize>,
    scripts: Vec<(ScriptId, ReactionScript)>,
}

impl ListField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_elements(elements: Vec<FieldId>) -> Self {
        Self {
            elements,
            ..Self::default()
        }
    }

    /// Fixed-arity list; only index assignment may change it.
    pub fn tuple(elements: Vec<FieldId>) -> Self {
        let arity = elements.len();
        Self {
            elements,
            arity: Some(arity),
            ..Self::default()
        }
    }

    /// Decoded server state: local and server-known order start equal.
    pub(crate) fn from_server(elements: Vec<FieldId>, arity: Option<usize>) -> Self {
        Self {
            shadow: elements.clone(),
            elements,
            arity,
            scripts: Vec::new(),
        }
    }

    pub fn elements(&self) -> &[FieldId] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn contains(&self, id: FieldId) -> bool {
        self.elements.contains(&id)
    }

    /// Element order last reported by (or pushed to) the server.
    pub fn shadow(&self) -> &[FieldId] {
        &self.shadow
    }

    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    pub fn script_count(&self) -> usize {
        self.scripts.len()
    }

    /// Clamps a splice request the way array splicing does.
    pub(crate) fn clamp(&self, index: usize, delete_count: usize) -> (usize, usize) {
        let start = index.min(self.elements.len());
        let count = delete_count.min(self.elements.len() - start);
        (start, count)
    }

    /// Applies an already clamped splice and returns the removed ids.
    pub(crate) fn splice_raw(
        &mut self,
        start: usize,
        count: usize,
        items: &[FieldId],
    ) -> Vec<FieldId> {
        self.elements
            .splice(start..start + count, items.iter().copied())
            .collect()
    }

    pub(crate) fn replace_elements(&mut self, elements: Vec<FieldId>) -> Vec<FieldId> {
        std::mem::replace(&mut self.elements, elements)
    }

    pub(crate) fn set_shadow(&mut self, shadow: Vec<FieldId>) {
        self.shadow = shadow;
    }

    pub(crate) fn add_script(&mut self, id: ScriptId, script: ReactionScript) {
        self.scripts.push((id, script));
    }

    pub(crate) fn remove_script(&mut self, id: ScriptId) -> Option<ReactionScript> {
        let position = self.scripts.iter().position(|(sid, _)| *sid == id)?;
        Some(self.scripts.remove(position).1)
    }

    /// Scripts in attach order, cloned so callers can run them against the graph.
    pub(crate) fn scripts(&self) -> Vec<ReactionScript> {
        self.scripts
            .iter()
            .map(|(_, script)| Rc::clone(script))
            .collect()
    }

    /// Container copy: same element ids, no scripts.
    pub(crate) fn copy_container(&self) -> Self {
        Self {
            elements: self.elements.clone(),
            shadow: Vec::new(),
            arity: self.arity,
            scripts: Vec::new(),
        }
    }
}

impl Debug for ListField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListField")
            .field("elements", &self.elements)
            .field("shadow", &self.shadow)
            .field("arity", &self.arity)
            .field("scripts", &self.scripts.len())
            .finish()
    }
}

/// How a server view was merged into local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// No local edit since the snapshot; the server view was adopted.
    Unchanged,
    /// Local edits were pure insertions and were kept.
    Insertion,
    /// Local edits were pure removals and were kept.
    Removal,
    /// Local edits were mixed; the server view replaced them.
    Replace,
}

impl ReconcileMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Insertion => "insertion",
            Self::Removal => "removal",
            Self::Replace => "replace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub elements: Vec<FieldId>,
    pub mode: ReconcileMode,
}

/// Merges `server` into `local`, where `snapshot` is the local order at the
/// time the fetch producing `server` was issued.
pub fn reconcile(local: &[FieldId], snapshot: &[FieldId], server: &[FieldId]) -> Reconciled {
    if local == snapshot {
        return Reconciled {
            elements: server.to_vec(),
            mode: ReconcileMode::Unchanged,
        };
    }

    if local.len() > snapshot.len() && is_subsequence(snapshot, local) {
        let mut server_added = counts(&multiset_difference(server, snapshot));
        let mut merged = server.to_vec();
        for position in unmatched_positions(snapshot, local) {
            let id = local[position];
            if take_one(&mut server_added, id) {
                continue;
            }
            // Anchor after the nearest preceding local element the server view kept.
            let at = (0..position)
                .rev()
                .find_map(|prev| {
                    let occurrence = occurrence_of(local, prev);
                    nth_position(&merged, local[prev], occurrence).map(|p| p + 1)
                })
                .unwrap_or(0);
            merged.insert(at, id);
        }
        return Reconciled {
            elements: merged,
            mode: ReconcileMode::Insertion,
        };
    }

    if local.len() < snapshot.len() && is_subsequence(local, snapshot) {
        // A removed copy is matched in the server view by its occurrence number.
        let dropped: HashSet<usize> = unmatched_positions(local, snapshot)
            .into_iter()
            .filter_map(|position| {
                let occurrence = occurrence_of(snapshot, position);
                nth_position(server, snapshot[position], occurrence)
            })
            .collect();
        let elements = server
            .iter()
            .enumerate()
            .filter(|(position, _)| !dropped.contains(position))
            .map(|(_, id)| *id)
            .collect();
        return Reconciled {
            elements,
            mode: ReconcileMode::Removal,
        };
    }

    Reconciled {
        elements: server.to_vec(),
        mode: ReconcileMode::Replace,
    }
}

/// Elements of `from` not matched by an element of `minus`, counting duplicates.
pub fn multiset_difference(from: &[FieldId], minus: &[FieldId]) -> Vec<FieldId> {
    let mut remaining = counts(minus);
    from.iter()
        .copied()
        .filter(|id| !take_one(&mut remaining, *id))
        .collect()
}

fn is_subsequence(needle: &[FieldId], haystack: &[FieldId]) -> bool {
    let mut rest = haystack.iter();
    needle.iter().all(|id| rest.any(|candidate| candidate == id))
}

/// Positions of `haystack` left over when `needle` is matched into it
/// greedily from the left.
fn unmatched_positions(needle: &[FieldId], haystack: &[FieldId]) -> Vec<usize> {
    let mut pending = needle.iter().peekable();
    let mut unmatched = Vec::new();
    for (position, id) in haystack.iter().enumerate() {
        if pending.peek() == Some(&id) {
            pending.next();
        } else {
            unmatched.push(position);
        }
    }
    unmatched
}

/// How many copies of `elements[position]` precede it.
fn occurrence_of(elements: &[FieldId], position: usize) -> usize {
    let id = elements[position];
    elements[..position].iter().filter(|other| **other == id).count()
}

fn nth_position(elements: &[FieldId], id: FieldId, n: usize) -> Option<usize> {
    elements
        .iter()
        .enumerate()
        .filter(|(_, other)| **other == id)
        .nth(n)
        .map(|(position, _)| position)
}

fn counts(elements: &[FieldId]) -> HashMap<FieldId, usize> {
    let mut counts = HashMap::new();
    for id in elements {
        *counts.entry(*id).or_insert(0) += 1;
    }
    counts
}

fn take_one(counts: &mut HashMap<FieldId, usize>, id: FieldId) -> bool {
    match counts.get_mut(&id) {
        Some(count) if *count > 0 => {
            *count -= 1;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{multiset_difference, reconcile, ListField, ReconcileMode};
    use crate::model::field::FieldId;

    fn ids(n: usize) -> Vec<FieldId> {
        (0..n).map(|_| FieldId::generate()).collect()
    }

    #[test]
    fn untouched_local_adopts_server_view() {
        let v = ids(4);
        let snapshot = vec![v[0], v[1], v[2]];
        let server = vec![v[0], v[2], v[3]];

        let result = reconcile(&snapshot, &snapshot, &server);
        assert_eq!(result.mode, ReconcileMode::Unchanged);
        assert_eq!(result.elements, server);
    }

    #[test]
    fn pure_local_insertion_is_spliced_into_server_view() {
        let v = ids(4);
        let (a, b, c, d) = (v[0], v[1], v[2], v[3]);

        let result = reconcile(&[a, d, b, c], &[a, b, c], &[a, b, c]);
        assert_eq!(result.mode, ReconcileMode::Insertion);
        assert_eq!(result.elements, vec![a, d, b, c]);
    }

    #[test]
    fn insertion_merges_with_server_side_additions() {
        let v = ids(5);
        let (a, b, c, d, e) = (v[0], v[1], v[2], v[3], v[4]);

        let result = reconcile(&[d, a, b, c], &[a, b, c], &[a, b, c, e]);
        assert_eq!(result.elements, vec![d, a, b, c, e]);
    }

    #[test]
    fn insertion_does_not_duplicate_ids_already_in_server_view() {
        let v = ids(3);
        let (a, b, d) = (v[0], v[1], v[2]);

        let result = reconcile(&[a, d, b], &[a, b], &[a, d, b]);
        assert_eq!(result.elements, vec![a, d, b]);
    }

    #[test]
    fn pure_local_removal_is_kept() {
        let v = ids(4);
        let (a, b, c, e) = (v[0], v[1], v[2], v[3]);

        let result = reconcile(&[a, c], &[a, b, c], &[a, b, c, e]);
        assert_eq!(result.mode, ReconcileMode::Removal);
        assert_eq!(result.elements, vec![a, c, e]);
    }

    #[test]
    fn removing_one_copy_of_a_duplicate_keeps_the_others() {
        let v = ids(2);
        let (a, c) = (v[0], v[1]);

        let result = reconcile(&[a, c], &[a, c, a], &[a, c, a]);
        assert_eq!(result.mode, ReconcileMode::Removal);
        assert_eq!(result.elements, vec![a, c]);
    }

    #[test]
    fn removed_copy_is_matched_by_occurrence_in_server_view() {
        let v = ids(3);
        let (a, b, e) = (v[0], v[1], v[2]);

        let result = reconcile(&[a, b], &[a, a, b], &[e, a, a, b]);
        assert_eq!(result.elements, vec![e, a, b]);
    }

    #[test]
    fn inserting_another_copy_of_an_existing_element_is_kept() {
        let v = ids(2);
        let (a, b) = (v[0], v[1]);

        let result = reconcile(&[a, b, a], &[a, b], &[a, b]);
        assert_eq!(result.mode, ReconcileMode::Insertion);
        assert_eq!(result.elements, vec![a, b, a]);
    }

    #[test]
    fn inserted_copy_anchors_after_the_matching_occurrence() {
        let v = ids(3);
        let (a, b, d) = (v[0], v[1], v[2]);

        let result = reconcile(&[a, b, a, d], &[a, b, a], &[a, b, a]);
        assert_eq!(result.elements, vec![a, b, a, d]);
    }

    #[test]
    fn duplicate_already_added_by_the_server_is_not_doubled() {
        let v = ids(2);
        let (a, b) = (v[0], v[1]);

        let result = reconcile(&[a, b, a], &[a, b], &[a, b, a]);
        assert_eq!(result.elements, vec![a, b, a]);
    }

    #[test]
    fn mixed_local_edit_is_replaced_by_server_view() {
        let v = ids(4);
        let (a, b, c, d) = (v[0], v[1], v[2], v[3]);

        let result = reconcile(&[a, d, c], &[a, b, c], &[a, b, c]);
        assert_eq!(result.mode, ReconcileMode::Replace);
        assert_eq!(result.elements, vec![a, b, c]);
    }

    #[test]
    fn reorder_counts_as_mixed_edit() {
        let v = ids(2);
        let result = reconcile(&[v[1], v[0]], &[v[0], v[1]], &[v[0], v[1]]);
        assert_eq!(result.mode, ReconcileMode::Replace);
    }

    #[test]
    fn multiset_difference_respects_duplicates() {
        let v = ids(2);
        let diff = multiset_difference(&[v[0], v[0], v[1]], &[v[0]]);
        assert_eq!(diff, vec![v[0], v[1]]);
    }

    #[test]
    fn clamp_follows_array_splice_rules() {
        let list = ListField::from_elements(ids(3));
        assert_eq!(list.clamp(1, 10), (1, 2));
        assert_eq!(list.clamp(7, 1), (3, 0));
    }

    #[test]
    fn tuple_records_its_arity() {
        let list = ListField::tuple(ids(2));
        assert_eq!(list.arity(), Some(2));
        assert_eq!(ListField::new().arity(), None);
    }
}
