//! Transcript store.
//!
//! Holds the ordered turns of a conversation and notifies subscribers after every
//! successful mutation. The stream consumer and direct user edits both go through
//! this type; neither touches the turn vector directly.

use std::collections::BTreeMap;

use crate::error::TranscriptError;
use crate::transcript::Turn;

/// Identifier returned by [`TranscriptStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// Callback invoked with the full transcript after each mutation
pub type TranscriptListener = Box<dyn Fn(&[Turn]) + Send + Sync>;

/// Ordered conversation turns with change notification
pub struct TranscriptStore {
    turns: Vec<Turn>,
    revision: u64,
    listeners: BTreeMap<SubscriptionId, TranscriptListener>,
    next_subscription: u64,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::with_turns(Vec::new())
    }

    pub fn with_turns(turns: Vec<Turn>) -> Self {
        Self { turns, revision: 0, listeners: BTreeMap::new(), next_subscription: 0 }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of successful mutations so far
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn subscribe(&mut self, listener: impl Fn(&[Turn]) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId::from_raw(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.insert(id, Box::new(listener));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.emit();
    }

    pub fn replace_last(&mut self, turn: Turn) -> Result<(), TranscriptError> {
        let last = self.turns.last_mut().ok_or(TranscriptError::Empty)?;
        *last = turn;
        self.emit();
        Ok(())
    }

    /// Replace the current last turn with `f(last)`.
    ///
    /// Nothing is emitted when the transcript is empty or `f` fails.
    pub fn update_last<E>(&mut self, f: impl FnOnce(&Turn) -> Result<Turn, E>) -> Result<(), E>
    where
        E: From<TranscriptError>,
    {
        let last = self.turns.last().ok_or(TranscriptError::Empty)?;
        let updated = f(last)?;
        self.replace_last(updated)?;
        Ok(())
    }

    pub fn replace_at(&mut self, index: usize, turn: Turn) -> Result<(), TranscriptError> {
        let len = self.turns.len();
        let slot = self.turns.get_mut(index).ok_or(TranscriptError::out_of_bounds(index, len))?;
        *slot = turn;
        self.emit();
        Ok(())
    }

    pub fn insert_at(&mut self, index: usize, turn: Turn) -> Result<(), TranscriptError> {
        if index > self.turns.len() {
            return Err(TranscriptError::out_of_bounds(index, self.turns.len()));
        }
        self.turns.insert(index, turn);
        self.emit();
        Ok(())
    }

    pub fn remove_at(&mut self, index: usize) -> Result<Turn, TranscriptError> {
        if index >= self.turns.len() {
            return Err(TranscriptError::out_of_bounds(index, self.turns.len()));
        }
        let removed = self.turns.remove(index);
        self.emit();
        Ok(removed)
    }

    fn emit(&mut self) {
        self.revision += 1;
        tracing::trace!(revision = self.revision, turns = self.turns.len(), "transcript changed");
        for listener in self.listeners.values() {
            listener(&self.turns);
        }
    }
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TranscriptStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptStore")
            .field("turns", &self.turns)
            .field("revision", &self.revision)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
