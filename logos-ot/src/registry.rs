//! Per-field document state.
//!
//! ```text
//! ┌──────────────────────── FieldRegistry ────────────────────────┐
//! │  FieldKey ─► DocumentFieldState                                │
//! │               ├── seed ──apply──apply──apply──► current_text   │
//! │               ├── version (one bump per applied operation)     │
//! │               ├── applied operations (audit log)               │
//! │               └── pending (local ops, per-peer acknowledgements)│
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Pending operations are kept rebased onto the current text: every remote
//! merge transforms the entries it was checked against, so the next remote
//! operation from the same peer meets them in its own context.
//!
//! State is created lazily on first touch and dropped with the session.

use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use crate::operation::{FieldKey, Operation, OperationId};
use crate::ot::{apply, transform};

/// Default cap on unacknowledged local operations kept per field.
///
/// An evicted entry is no longer transformed against, so a late remote
/// operation concurrent with it can land at a stale position. The field is
/// then flagged by [`DocumentFieldState::needs_resync`].
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// A local operation not yet known to be reflected at every peer.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub operation: Operation,
    /// Peers (client ids) whose later operations already include this one
    acknowledged_by: HashSet<Uuid>,
}

impl PendingEntry {
    fn new(operation: Operation) -> Self {
        Self {
            operation,
            acknowledged_by: HashSet::new(),
        }
    }

    pub fn is_acknowledged_by(&self, peer: &Uuid) -> bool {
        self.acknowledged_by.contains(peer)
    }
}

/// Text, version and history of one field-instance.
#[derive(Debug, Clone)]
pub struct DocumentFieldState {
    key: FieldKey,
    seed: String,
    current_text: String,
    version: u64,
    applied: Vec<Operation>,
    applied_ids: HashSet<OperationId>,
    pending: VecDeque<PendingEntry>,
    /// Remote operations merged here since our last broadcast on this field
    unsent_acks: Vec<OperationId>,
    /// Pending entries dropped by the bound before every peer had them
    evicted: u64,
}

impl DocumentFieldState {
    pub fn new(key: FieldKey, seed: impl Into<String>) -> Self {
        let seed = seed.into();
        Self {
            key,
            current_text: seed.clone(),
            seed,
            version: 0,
            applied: Vec::new(),
            applied_ids: HashSet::new(),
            pending: VecDeque::new(),
            unsent_acks: Vec::new(),
            evicted: 0,
        }
    }

    pub fn key(&self) -> &FieldKey {
        &self.key
    }

    pub fn text(&self) -> &str {
        &self.current_text
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Every applied operation, in applied order.
    pub fn applied_operations(&self) -> &[Operation] {
        &self.applied
    }

    pub fn contains_operation(&self, id: &OperationId) -> bool {
        self.applied_ids.contains(id)
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingEntry> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether unacknowledged local operations were dropped from this field.
    /// Convergence is no longer guaranteed until its text is reloaded.
    pub fn needs_resync(&self) -> bool {
        self.evicted > 0
    }

    /// Transform `incoming` through the pending entries `include` selects, in
    /// order, rebasing each selected entry over it. Returns the operation
    /// ready to apply on the current text and the number of transforms.
    pub fn rebase_over_pending<F>(&mut self, incoming: Operation, mut include: F) -> (Operation, u64)
    where
        F: FnMut(&PendingEntry) -> bool,
    {
        let mut incoming = incoming;
        let mut transforms = 0;
        for entry in self.pending.iter_mut() {
            if !include(entry) {
                continue;
            }
            let (rebased, next) = transform(&entry.operation, &incoming);
            entry.operation = rebased;
            incoming = next;
            transforms += 1;
        }
        (incoming, transforms)
    }

    /// Fold the log over the seed. Always equals [`text`](Self::text).
    pub fn replay(&self) -> String {
        self.applied
            .iter()
            .fold(self.seed.clone(), |text, op| apply(&text, op))
    }

    fn record(&mut self, op: Operation) {
        self.current_text = apply(&self.current_text, &op);
        self.version += 1;
        self.applied_ids.insert(op.id);
        self.applied.push(op);
    }
}

/// All field states of one collaboration session.
#[derive(Debug)]
pub struct FieldRegistry {
    fields: HashMap<FieldKey, DocumentFieldState>,
    max_pending_per_field: usize,
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

impl FieldRegistry {
    pub fn new(max_pending_per_field: usize) -> Self {
        Self {
            fields: HashMap::new(),
            max_pending_per_field: max_pending_per_field.max(1),
        }
    }

    /// Get the state for `key`, creating it from `seed` on first touch.
    pub fn ensure(&mut self, key: &FieldKey, seed: &str) -> &mut DocumentFieldState {
        self.fields.entry(key.clone()).or_insert_with(|| {
            log::debug!("Field {key} seeded with {} chars", seed.chars().count());
            DocumentFieldState::new(key.clone(), seed)
        })
    }

    pub fn get(&self, key: &FieldKey) -> Option<&DocumentFieldState> {
        self.fields.get(key)
    }

    pub fn get_mut(&mut self, key: &FieldKey) -> Option<&mut DocumentFieldState> {
        self.fields.get_mut(key)
    }

    pub fn text(&self, key: &FieldKey) -> Option<&str> {
        self.fields.get(key).map(|s| s.text())
    }

    pub fn contains_operation(&self, key: &FieldKey, id: &OperationId) -> bool {
        self.fields
            .get(key)
            .is_some_and(|s| s.contains_operation(id))
    }

    /// Apply a locally generated operation and remember it as pending.
    pub fn apply_local(&mut self, op: Operation) -> &DocumentFieldState {
        let max_pending = self.max_pending_per_field;
        let state = self.ensure(&op.target, "");
        state.record(op.clone());
        state.pending.push_back(PendingEntry::new(op));
        if state.pending.len() > max_pending {
            if let Some(evicted) = state.pending.pop_front() {
                state.evicted += 1;
                log::error!(
                    "Pending set for {} full, dropped operation {}; field needs resync",
                    state.key,
                    evicted.operation.id
                );
            }
        }
        state
    }

    /// Apply an already transformed remote operation.
    pub fn apply_remote(&mut self, op: Operation) -> &DocumentFieldState {
        let state = self.ensure(&op.target, "");
        state.unsent_acks.push(op.id);
        state.record(op);
        state
    }

    /// Mark pending operations on `key` as reflected at `peer`.
    pub fn acknowledge(&mut self, key: &FieldKey, ids: &[OperationId], peer: Uuid) -> usize {
        let Some(state) = self.fields.get_mut(key) else {
            return 0;
        };
        let mut marked = 0;
        for entry in state.pending.iter_mut() {
            if ids.contains(&entry.operation.id) && entry.acknowledged_by.insert(peer) {
                marked += 1;
            }
        }
        marked
    }

    /// Remote operation ids merged on `key` since the last call.
    pub fn take_acks(&mut self, key: &FieldKey) -> Vec<OperationId> {
        self.fields
            .get_mut(key)
            .map(|s| std::mem::take(&mut s.unsent_acks))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &FieldKey> {
        self.fields.keys()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }
}
