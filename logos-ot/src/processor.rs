//! Remote operation processor.
//!
//! ```text
//!            enqueue                       queue empty
//!   Idle ───────────────► Draining ─────────────────────► Idle
//!                          │    ▲
//!                          └────┘ pop front, refill from inbox,
//!                                 transform vs pending, apply, notify
//! ```
//!
//! One FIFO for the whole session. The drain runs to completion and pulls
//! newly arrived operations before every step, so nothing that lands during a
//! drain waits for the next one.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::operation::{FieldKey, Operation, OperationError, OperationId};
use crate::protocol::SyncMessage;
use crate::registry::FieldRegistry;

/// UI hook fired after every successful remote merge. Editors re-pull the
/// field text themselves; the engine never pushes text into an active editor.
pub trait TextChangeNotifier: Send + Sync {
    fn notify_text_changed(&self, key: &FieldKey);
}

impl<F> TextChangeNotifier for F
where
    F: Fn(&FieldKey) + Send + Sync,
{
    fn notify_text_changed(&self, key: &FieldKey) {
        self(key)
    }
}

/// An operation received from a peer.
#[derive(Debug, Clone)]
pub struct InboundOperation {
    /// Sending client, `Uuid::nil()` when unknown
    pub sender_id: Uuid,
    pub operation: Operation,
    /// Our operations the sender had already merged
    pub acknowledged: Vec<OperationId>,
}

impl InboundOperation {
    pub fn new(operation: Operation) -> Self {
        Self {
            sender_id: Uuid::nil(),
            operation,
            acknowledged: Vec::new(),
        }
    }
}

impl From<SyncMessage> for InboundOperation {
    fn from(msg: SyncMessage) -> Self {
        Self {
            sender_id: msg.sender_id,
            operation: msg.operation,
            acknowledged: msg.acknowledged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    Draining,
}

/// What happened to one inbound operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied { version: u64 },
    /// Already in the field's log (redelivery or our own echo)
    Duplicate,
    Malformed(OperationError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub applied: u64,
    pub duplicates: u64,
    pub malformed: u64,
    /// Pairwise transforms performed against pending operations
    pub transforms: u64,
}

/// Single-flight FIFO merge of remote operations.
#[derive(Debug)]
pub struct RemoteOperationProcessor {
    queue: VecDeque<InboundOperation>,
    state: ProcessorState,
    stats: ProcessorStats,
}

impl Default for RemoteOperationProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteOperationProcessor {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            state: ProcessorState::Idle,
            stats: ProcessorStats::default(),
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> &ProcessorStats {
        &self.stats
    }

    pub fn enqueue(&mut self, inbound: InboundOperation) {
        self.queue.push_back(inbound);
    }

    /// Drain the queue, pulling from `refill` before each step.
    /// Returns the number of operations applied.
    pub fn drain<R>(
        &mut self,
        registry: &mut FieldRegistry,
        notifier: Option<&dyn TextChangeNotifier>,
        mut refill: R,
    ) -> usize
    where
        R: FnMut() -> Option<InboundOperation>,
    {
        if self.state == ProcessorState::Draining {
            return 0;
        }
        self.state = ProcessorState::Draining;

        let mut applied = 0;
        loop {
            while let Some(next) = refill() {
                self.queue.push_back(next);
            }
            let Some(inbound) = self.queue.pop_front() else {
                break;
            };
            if let MergeOutcome::Applied { .. } = self.process(registry, notifier, inbound) {
                applied += 1;
            }
        }

        self.state = ProcessorState::Idle;
        applied
    }

    /// Merge one operation into the registry.
    pub fn process(
        &mut self,
        registry: &mut FieldRegistry,
        notifier: Option<&dyn TextChangeNotifier>,
        inbound: InboundOperation,
    ) -> MergeOutcome {
        let InboundOperation {
            sender_id,
            operation: op,
            acknowledged,
        } = inbound;

        if let Err(e) = op.validate() {
            self.stats.malformed += 1;
            log::warn!("Dropping malformed remote operation: {e}");
            return MergeOutcome::Malformed(e);
        }

        let key = op.target.clone();
        if registry.contains_operation(&key, &op.id) {
            self.stats.duplicates += 1;
            log::debug!("Skipping already applied operation {} on {key}", op.id);
            return MergeOutcome::Duplicate;
        }

        if !acknowledged.is_empty() {
            registry.acknowledge(&key, &acknowledged, sender_id);
        }

        let origin = op.origin_user_id.clone();
        let (merged, transforms) = match registry.get_mut(&key) {
            // Never rebase over the author's own in-flight edits, or over
            // edits the sender had already seen.
            Some(state) => state.rebase_over_pending(op, |entry| {
                entry.operation.origin_user_id != origin && !entry.is_acknowledged_by(&sender_id)
            }),
            None => {
                log::debug!("Remote operation on untouched field {key}, seeding empty");
                (op, 0)
            }
        };
        self.stats.transforms += transforms;

        log::trace!(
            "Applying remote {} {} from {} after {transforms} transforms",
            merged.kind.name(),
            merged.id,
            merged.origin_user_id
        );
        let version = registry.apply_remote(merged).version();
        self.stats.applied += 1;

        if let Some(notifier) = notifier {
            notifier.notify_text_changed(&key);
        }

        MergeOutcome::Applied { version }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{FieldKind, OpKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn key() -> FieldKey {
        FieldKey::new("slide-1", FieldKind::Title)
    }

    fn seeded(text: &str) -> FieldRegistry {
        let mut reg = FieldRegistry::default();
        reg.ensure(&key(), text);
        reg
    }

    #[test]
    fn test_remote_transformed_against_pending() {
        let mut reg = seeded("Hello");
        reg.apply_local(Operation::insert(0, ">> ", "alice", key()));

        let mut proc = RemoteOperationProcessor::new();
        proc.enqueue(InboundOperation::new(Operation::insert(5, "!", "bob", key())));
        assert_eq!(proc.drain(&mut reg, None, || None), 1);

        assert_eq!(reg.text(&key()), Some(">> Hello!"));
        assert_eq!(proc.stats().transforms, 1);
        assert_eq!(proc.state(), ProcessorState::Idle);
    }

    #[test]
    fn test_skips_pending_from_same_author() {
        // alice typed "X" at 0 on this device; her other device sends "Y" at
        // 0 against the text it already shows. Rebasing over "X" would yield
        // "XYabc"; skipping her own edit keeps "YXabc".
        let mut reg = seeded("abc");
        reg.apply_local(
            Operation::insert(0, "X", "alice", key()).with_id(OperationId::from_u128(1)),
        );

        let mut proc = RemoteOperationProcessor::new();
        let remote = Operation::insert(0, "Y", "alice", key()).with_id(OperationId::from_u128(2));
        proc.enqueue(InboundOperation::new(remote));
        proc.drain(&mut reg, None, || None);

        assert_eq!(reg.text(&key()), Some("YXabc"));
        assert_eq!(proc.stats().transforms, 0);
    }

    #[test]
    fn test_other_author_is_rebased() {
        let mut reg = seeded("abc");
        reg.apply_local(
            Operation::insert(0, "X", "alice", key()).with_id(OperationId::from_u128(1)),
        );

        let mut proc = RemoteOperationProcessor::new();
        let remote = Operation::insert(0, "Y", "bob", key()).with_id(OperationId::from_u128(2));
        proc.enqueue(InboundOperation::new(remote));
        proc.drain(&mut reg, None, || None);

        assert_eq!(reg.text(&key()), Some("XYabc"));
    }

    #[test]
    fn test_acknowledged_pending_not_rebased() {
        let mut reg = seeded("abc");
        let local = Operation::insert(0, "X", "alice", key());
        let local_id = local.id;
        reg.apply_local(local);

        // bob merged "X" (text "Xabc") and then appended at 4.
        let bob_client = Uuid::new_v4();
        let mut proc = RemoteOperationProcessor::new();
        proc.enqueue(InboundOperation {
            sender_id: bob_client,
            operation: Operation::insert(4, "!", "bob", key()),
            acknowledged: vec![local_id],
        });
        proc.drain(&mut reg, None, || None);

        assert_eq!(reg.text(&key()), Some("Xabc!"));
    }

    #[test]
    fn test_unknown_field_seeded_empty() {
        let mut reg = FieldRegistry::default();
        let mut proc = RemoteOperationProcessor::new();
        proc.enqueue(InboundOperation::new(Operation::insert(0, "hi", "bob", key())));
        proc.drain(&mut reg, None, || None);

        let state = reg.get(&key()).unwrap();
        assert_eq!(state.seed(), "");
        assert_eq!(state.text(), "hi");
        assert_eq!(state.version(), 1);
    }

    #[test]
    fn test_malformed_dropped() {
        let mut reg = seeded("abc");
        let mut proc = RemoteOperationProcessor::new();
        let bad = Operation::new(OpKind::Delete { position: 0, length: 0 }, "bob", key());

        let outcome = proc.process(&mut reg, None, InboundOperation::new(bad));
        assert!(matches!(outcome, MergeOutcome::Malformed(_)));
        assert_eq!(reg.get(&key()).unwrap().version(), 0);
        assert_eq!(proc.stats().malformed, 1);
    }

    #[test]
    fn test_duplicate_delivery_applied_once() {
        let mut reg = seeded("abc");
        let mut proc = RemoteOperationProcessor::new();
        let op = Operation::insert(3, "d", "bob", key());

        proc.enqueue(InboundOperation::new(op.clone()));
        proc.enqueue(InboundOperation::new(op));
        assert_eq!(proc.drain(&mut reg, None, || None), 1);

        assert_eq!(reg.text(&key()), Some("abcd"));
        assert_eq!(proc.stats().duplicates, 1);
    }

    #[test]
    fn test_own_echo_is_duplicate() {
        let mut reg = seeded("abc");
        let local = Operation::insert(0, "X", "alice", key());
        reg.apply_local(local.clone());

        let mut proc = RemoteOperationProcessor::new();
        let outcome = proc.process(&mut reg, None, InboundOperation::new(local));
        assert_eq!(outcome, MergeOutcome::Duplicate);
        assert_eq!(reg.text(&key()), Some("Xabc"));
    }

    #[test]
    fn test_arrivals_during_drain_are_consumed() {
        let mut reg = seeded("");
        let mut proc = RemoteOperationProcessor::new();
        proc.enqueue(InboundOperation::new(Operation::insert(0, "a", "bob", key())));

        let mut inbox: VecDeque<InboundOperation> = VecDeque::from(vec![
            InboundOperation::new(Operation::insert(1, "b", "bob", key())),
            InboundOperation::new(Operation::insert(2, "c", "bob", key())),
        ]);
        // Every other pull finds a new arrival, so each lands mid-drain.
        let mut pulls = 0;
        let applied = proc.drain(&mut reg, None, || {
            pulls += 1;
            if pulls % 2 == 0 {
                inbox.pop_front()
            } else {
                None
            }
        });

        assert_eq!(applied, 3);
        assert_eq!(reg.text(&key()), Some("abc"));
        assert_eq!(proc.queue_len(), 0);
    }

    #[test]
    fn test_notifier_called_per_merge() {
        let mut reg = seeded("");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let notifier = move |k: &FieldKey| {
            assert_eq!(k.field, FieldKind::Title);
            counter.fetch_add(1, Ordering::SeqCst);
        };

        let mut proc = RemoteOperationProcessor::new();
        proc.enqueue(InboundOperation::new(Operation::insert(0, "a", "bob", key())));
        proc.enqueue(InboundOperation::new(Operation::insert(1, "b", "bob", key())));
        proc.drain(&mut reg, Some(&notifier), || None);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_multiple_pending_rebased_in_order() {
        let mut reg = seeded("ABCDEFG");
        reg.apply_local(Operation::delete(0, 2, "alice", key()));
        reg.apply_local(Operation::insert(0, "xy", "alice", key()));
        assert_eq!(reg.text(&key()), Some("xyCDEFG"));

        // bob, still on "ABCDEFG", deletes "EF".
        let mut proc = RemoteOperationProcessor::new();
        proc.enqueue(InboundOperation::new(Operation::delete(4, 2, "bob", key())));
        proc.drain(&mut reg, None, || None);

        assert_eq!(reg.text(&key()), Some("xyCDG"));
    }

    #[test]
    fn test_peer_sends_two_before_merging_ours() {
        // alice and bob both start on "abc". alice inserts "X" at 3; bob,
        // before seeing it, inserts "12" at 0 and then "Y" at 5 on "12abc".
        let p1 = Operation::insert(3, "X", "alice", key()).with_id(OperationId::from_u128(9));
        let b1 = Operation::insert(0, "12", "bob", key()).with_id(OperationId::from_u128(5));
        let b2 = Operation::insert(5, "Y", "bob", key()).with_id(OperationId::from_u128(1));

        let mut alice = seeded("abc");
        alice.apply_local(p1.clone());
        let mut bob = seeded("abc");
        bob.apply_local(b1.clone());
        bob.apply_local(b2.clone());
        assert_eq!(bob.text(&key()), Some("12abcY"));

        let mut alice_proc = RemoteOperationProcessor::new();
        alice_proc.enqueue(InboundOperation::new(b1));
        alice_proc.enqueue(InboundOperation::new(b2));
        assert_eq!(alice_proc.drain(&mut alice, None, || None), 2);

        let mut bob_proc = RemoteOperationProcessor::new();
        bob_proc.enqueue(InboundOperation::new(p1));
        assert_eq!(bob_proc.drain(&mut bob, None, || None), 1);

        assert_eq!(alice.text(&key()), Some("12abcYX"));
        assert_eq!(bob.text(&key()), alice.text(&key()));
    }

    #[test]
    fn test_peer_keystrokes_around_our_deletion() {
        // alice deletes "ef"; bob types "1" at the start, then "2" before "e"
        // on "1abcdef". The second keystroke only lands right once alice's
        // pending delete has been shifted past bob's first one.
        let mut alice = seeded("abcdef");
        let cut = Operation::delete(4, 2, "alice", key());
        alice.apply_local(cut.clone());

        let mut bob = seeded("abcdef");
        let k1 = Operation::insert(0, "1", "bob", key());
        let k2 = Operation::insert(5, "2", "bob", key());
        bob.apply_local(k1.clone());
        bob.apply_local(k2.clone());
        assert_eq!(bob.text(&key()), Some("1abcd2ef"));

        let mut alice_proc = RemoteOperationProcessor::new();
        alice_proc.enqueue(InboundOperation::new(k1));
        alice_proc.enqueue(InboundOperation::new(k2));
        alice_proc.drain(&mut alice, None, || None);

        let mut bob_proc = RemoteOperationProcessor::new();
        bob_proc.enqueue(InboundOperation::new(cut));
        bob_proc.drain(&mut bob, None, || None);

        assert_eq!(alice.text(&key()), Some("1abcd2"));
        assert_eq!(bob.text(&key()), Some("1abcd2"));
    }
}
