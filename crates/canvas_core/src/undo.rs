//! Undo/redo log.
//!
//! # Responsibility
//! - Record invertible `{undo, redo}` event pairs in call order.
//! - Group events raised inside open batches into one atomic entry.
//! - Replay entries against the owning context.
//!
//! # Invariants
//! - Events raised while an entry is being applied are never recorded.
//! - Committing a new entry truncates the redo tail.
//! - Only the outermost batch end commits; nested ends only close handles.
//! - An entry's undo runs its events in reverse order, redo in forward order.

use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type UndoFn<C> = Box<dyn FnMut(&mut C)>;

/// One invertible mutation.
pub struct UndoEvent<C> {
    undo: UndoFn<C>,
    redo: UndoFn<C>,
}

impl<C> UndoEvent<C> {
    pub fn new(undo: impl FnMut(&mut C) + 'static, redo: impl FnMut(&mut C) + 'static) -> Self {
        Self {
            undo: Box::new(undo),
            redo: Box::new(redo),
        }
    }
}

struct UndoEntry<C> {
    label: Option<String>,
    events: Vec<UndoEvent<C>>,
}

struct OpenBatch {
    id: u64,
    label: String,
}

/// Recorder state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoState {
    Idle,
    RecordingBatch,
    Applying,
}

/// Handle for an open batch. Consumed by `end_batch` or `cancel_batch`.
#[derive(Debug)]
pub struct UndoBatch {
    id: u64,
    label: String,
}

impl UndoBatch {
    pub fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoError {
    /// The batch was already closed, directly or by ending an enclosing batch.
    BatchAlreadyEnded(String),
    /// The handle was not issued by this log.
    BatchNotOpen(String),
}

impl Display for UndoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BatchAlreadyEnded(label) => write!(f, "undo batch `{label}` already ended"),
            Self::BatchNotOpen(label) => write!(f, "undo batch `{label}` is not open in this log"),
        }
    }
}

impl Error for UndoError {}

/// Ordered log of undo entries with a cursor.
///
/// Entries before the cursor can be undone, entries at or after it redone.
pub struct UndoLog<C> {
    entries: Vec<UndoEntry<C>>,
    cursor: usize,
    open: Vec<OpenBatch>,
    pending: Vec<UndoEvent<C>>,
    applying: bool,
    limit: usize,
    next_batch: u64,
}

impl<C> Default for UndoLog<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> UndoLog<C> {
    pub fn new() -> Self {
        Self::with_limit(0)
    }

    /// Keeps at most `limit` entries, dropping the oldest. `0` is unbounded.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            open: Vec::new(),
            pending: Vec::new(),
            applying: false,
            limit,
            next_batch: 0,
        }
    }

    pub fn state(&self) -> UndoState {
        if self.applying {
            UndoState::Applying
        } else if self.open.is_empty() {
            UndoState::Idle
        } else {
            UndoState::RecordingBatch
        }
    }

    pub fn is_applying(&self) -> bool {
        self.applying
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.entries.len()
    }

    pub fn undo_depth(&self) -> usize {
        self.cursor
    }

    pub fn redo_depth(&self) -> usize {
        self.entries.len() - self.cursor
    }

    /// Label of the entry the next `undo` would apply.
    pub fn next_undo_label(&self) -> Option<&str> {
        self.cursor
            .checked_sub(1)
            .and_then(|index| self.entries.get(index))
            .and_then(|entry| entry.label.as_deref())
    }

    /// Labels of open batches, outermost first.
    pub fn open_batches(&self) -> Vec<&str> {
        self.open.iter().map(|batch| batch.label.as_str()).collect()
    }

    /// Records `event`. Returns `false` when it was dropped because an entry
    /// is being applied.
    pub fn add_event(&mut self, event: UndoEvent<C>) -> bool {
        if self.applying {
            return false;
        }
        if self.open.is_empty() {
            self.commit(None, vec![event]);
        } else {
            self.pending.push(event);
        }
        true
    }

    pub fn start_batch(&mut self, label: impl Into<String>) -> UndoBatch {
        let id = self.next_batch;
        self.next_batch += 1;
        let label = label.into();
        self.open.push(OpenBatch {
            id,
            label: label.clone(),
        });
        debug!(
            "event=batch_start module=undo status=ok depth={}",
            self.open.len()
        );
        UndoBatch { id, label }
    }

    /// Closes `batch` and every batch opened after it. Commits the collected
    /// events when no batch remains open.
    pub fn end_batch(&mut self, batch: UndoBatch) -> Result<(), UndoError> {
        self.finish(batch, false)
    }

    /// Like `end_batch`, but the collected events are discarded if this closes
    /// the outermost batch.
    pub fn cancel_batch(&mut self, batch: UndoBatch) -> Result<(), UndoError> {
        self.finish(batch, true)
    }

    /// Drops every entry and open batch.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending.clear();
        self.open.clear();
        self.cursor = 0;
    }

    fn finish(&mut self, batch: UndoBatch, cancel: bool) -> Result<(), UndoError> {
        if batch.id >= self.next_batch {
            return Err(UndoError::BatchNotOpen(batch.label));
        }
        let Some(position) = self.open.iter().position(|open| open.id == batch.id) else {
            return Err(UndoError::BatchAlreadyEnded(batch.label));
        };

        let outermost_label = self.open.first().map(|open| open.label.clone());
        self.open.truncate(position);
        if !self.open.is_empty() {
            return Ok(());
        }

        let events = std::mem::take(&mut self.pending);
        let status = if cancel { "cancelled" } else { "ok" };
        info!(
            "event=batch_end module=undo status={} events={}",
            status,
            events.len()
        );
        if events.is_empty() {
            return Ok(());
        }
        if cancel {
            self.entries.truncate(self.cursor);
        } else {
            self.commit(outermost_label, events);
        }
        Ok(())
    }

    fn commit(&mut self, label: Option<String>, events: Vec<UndoEvent<C>>) {
        self.entries.truncate(self.cursor);
        self.entries.push(UndoEntry { label, events });
        if self.limit > 0 && self.entries.len() > self.limit {
            let excess = self.entries.len() - self.limit;
            self.entries.drain(..excess);
        }
        self.cursor = self.entries.len();
    }

    fn checkout(&mut self, direction: Direction) -> Option<(usize, Vec<UndoEvent<C>>)> {
        if self.applying {
            return None;
        }
        if !self.open.is_empty() {
            warn!(
                "event={} module=undo status=skipped reason=batch_open depth={}",
                direction.as_str(),
                self.open.len()
            );
            return None;
        }
        let index = match direction {
            Direction::Undo => self.cursor.checked_sub(1)?,
            Direction::Redo => self.cursor,
        };
        let entry = self.entries.get_mut(index)?;
        let events = std::mem::take(&mut entry.events);
        info!(
            "event={} module=undo status=ok label={} events={}",
            direction.as_str(),
            entry.label.as_deref().unwrap_or("-"),
            events.len()
        );
        self.cursor = match direction {
            Direction::Undo => index,
            Direction::Redo => index + 1,
        };
        self.applying = true;
        Some((index, events))
    }

    fn checkin(&mut self, index: usize, events: Vec<UndoEvent<C>>) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.events = events;
        }
        self.applying = false;
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Undo,
    Redo,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Undo => "undo",
            Self::Redo => "redo",
        }
    }
}

/// Context that owns an undo log recording events against itself.
pub trait UndoContext: Sized {
    fn undo_log(&mut self) -> &mut UndoLog<Self>;
}

/// Reverts the entry before the cursor. Returns `false` when nothing ran.
pub fn undo<C: UndoContext>(ctx: &mut C) -> bool {
    let Some((index, mut events)) = ctx.undo_log().checkout(Direction::Undo) else {
        return false;
    };
    for event in events.iter_mut().rev() {
        (event.undo)(ctx);
    }
    ctx.undo_log().checkin(index, events);
    true
}

/// Reapplies the entry at the cursor. Returns `false` when nothing ran.
pub fn redo<C: UndoContext>(ctx: &mut C) -> bool {
    let Some((index, mut events)) = ctx.undo_log().checkout(Direction::Redo) else {
        return false;
    };
    for event in events.iter_mut() {
        (event.redo)(ctx);
    }
    ctx.undo_log().checkin(index, events);
    true
}
