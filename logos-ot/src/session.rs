//! Collaboration session: the explicit context every entry point runs in.
//!
//! ```text
//!  UI edit ──► on_local_change ──► FieldRegistry ──► publish (detached)
//!                                        │        └─► DebouncedPersister
//!                                        ▲
//!  Subscription ──► RemoteOperationProcessor ──► notify_text_changed
//! ```
//!
//! All field state is owned by the session and mutated through `&mut self`,
//! so local intake and remote drains can never interleave. Only broadcast
//! sends and persist writes leave the session, as detached tasks. A remote
//! merge never starts a write of its own, but it updates the text of a local
//! write still waiting to fire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broadcast::{BroadcastTransport, Subscription, TransportError};
use crate::operation::{FieldKey, OpContext, OperationId};
use crate::ot::generate_operation;
use crate::persister::{DebouncedPersister, DEFAULT_DEBOUNCE};
use crate::processor::{InboundOperation, RemoteOperationProcessor, TextChangeNotifier};
use crate::protocol::SyncMessage;
use crate::registry::{DocumentFieldState, FieldRegistry, DEFAULT_MAX_PENDING};
use crate::store::FieldStore;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Presentation being edited; also the broadcast room
    pub presentation_id: Uuid,
    /// Author stamped on local operations
    pub user_id: String,
    /// This client; one user may have several
    pub client_id: Uuid,
    /// Quiet window before a field write fires
    pub persist_debounce_ms: u64,
    /// Unacknowledged local operations kept per field
    pub max_pending_per_field: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            presentation_id: Uuid::new_v4(),
            user_id: "anonymous".to_string(),
            client_id: Uuid::new_v4(),
            persist_debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            max_pending_per_field: DEFAULT_MAX_PENDING,
        }
    }
}

impl SessionConfig {
    pub fn new(presentation_id: Uuid, user_id: impl Into<String>) -> Self {
        Self {
            presentation_id,
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Config for testing (short debounce window).
    pub fn for_testing(presentation_id: Uuid, user_id: impl Into<String>) -> Self {
        Self {
            persist_debounce_ms: 100,
            max_pending_per_field: 64,
            ..Self::new(presentation_id, user_id)
        }
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }
}

/// Session counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub local_operations: u64,
    pub remote_applied: u64,
    pub remote_duplicates: u64,
    pub remote_malformed: u64,
    pub broadcasts_sent: u64,
    pub broadcast_failures: u64,
    pub persists_scheduled: u64,
    pub persist_writes: u64,
    pub persist_failures: u64,
}

/// Counters written from detached broadcast tasks.
#[derive(Debug, Default)]
struct AtomicBroadcastCounters {
    sent: AtomicU64,
    failed: AtomicU64,
}

/// One user's collaboration context for one presentation.
pub struct CollabSession {
    config: SessionConfig,
    registry: FieldRegistry,
    processor: RemoteOperationProcessor,
    persister: DebouncedPersister,
    /// Sends go through one task so peers see them in generation order
    outbox: Option<mpsc::UnboundedSender<SyncMessage>>,
    outbox_task: Option<JoinHandle<()>>,
    subscription: Option<Subscription>,
    notifier: Option<Arc<dyn TextChangeNotifier>>,
    /// Per-client send counter
    clock: u64,
    local_operations: u64,
    broadcast_counters: Arc<AtomicBroadcastCounters>,
}

impl CollabSession {
    /// Join the presentation room and set up empty field state.
    pub async fn initialize_session(
        config: SessionConfig,
        transport: Arc<dyn BroadcastTransport>,
        store: Arc<dyn FieldStore>,
    ) -> Result<Self, TransportError> {
        let subscription = transport.subscribe(config.presentation_id).await?;
        let persister =
            DebouncedPersister::new(config.presentation_id, config.persist_debounce(), store);
        let broadcast_counters = Arc::new(AtomicBroadcastCounters::default());
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let outbox_task = tokio::spawn(run_outbox(
            transport,
            config.presentation_id,
            outbox_rx,
            broadcast_counters.clone(),
        ));

        log::info!(
            "Session started for user {} (client {}) in presentation {}",
            config.user_id,
            config.client_id,
            config.presentation_id
        );

        Ok(Self {
            registry: FieldRegistry::new(config.max_pending_per_field),
            processor: RemoteOperationProcessor::new(),
            persister,
            outbox: Some(outbox),
            outbox_task: Some(outbox_task),
            subscription: Some(subscription),
            notifier: None,
            clock: 0,
            local_operations: 0,
            broadcast_counters,
            config,
        })
    }

    /// Send queued operations, persist outstanding edits and leave the room.
    pub async fn teardown_session(mut self) -> SessionStats {
        self.outbox = None;
        if let Some(task) = self.outbox_task.take() {
            if let Err(e) = task.await {
                log::error!("Outbox task ended abnormally: {e}");
            }
        }
        let flushed = self.persister.flush().await;
        self.subscription = None;
        let stats = self.stats();
        log::info!(
            "Session ended for user {} in presentation {} ({} fields, {flushed} flushed)",
            self.config.user_id,
            self.config.presentation_id,
            self.registry.len()
        );
        self.registry.clear();
        stats
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register the UI callback fired after each remote merge.
    pub fn set_notifier(&mut self, notifier: impl TextChangeNotifier + 'static) {
        self.notifier = Some(Arc::new(notifier));
    }

    /// Provide initial text for a field before anyone edits it.
    pub fn seed_field(&mut self, key: &FieldKey, text: &str) {
        self.registry.ensure(key, text);
    }

    pub fn text(&self, key: &FieldKey) -> Option<&str> {
        self.registry.text(key)
    }

    pub fn field(&self, key: &FieldKey) -> Option<&DocumentFieldState> {
        self.registry.get(key)
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    /// Intake one UI edit. Returns the id of the generated operation, or
    /// `None` when the texts are equal.
    pub fn on_local_change(
        &mut self,
        key: &FieldKey,
        old_text: &str,
        new_text: &str,
    ) -> Option<OperationId> {
        let ctx = OpContext::new(self.config.user_id.clone(), key.clone());
        let op = generate_operation(old_text, new_text, &ctx)?;

        let state = self.registry.ensure(key, old_text);
        if state.text() != old_text {
            log::debug!("Local edit on {key} based on text that differs from merged state");
        }

        let text = self.registry.apply_local(op.clone()).text().to_string();
        self.local_operations += 1;

        let acknowledged = self.registry.take_acks(key);
        let id = op.id;
        self.clock += 1;
        let msg = SyncMessage::new(self.config.presentation_id, self.config.client_id, self.clock, op)
            .with_acknowledged(acknowledged);
        self.publish(msg);

        self.persister.schedule(key.clone(), text);
        Some(id)
    }

    /// Fire-and-forget send through the outbox task.
    fn publish(&self, msg: SyncMessage) {
        let id = msg.operation.id;
        let queued = self.outbox.as_ref().is_some_and(|outbox| outbox.send(msg).is_ok());
        if !queued {
            self.broadcast_counters.failed.fetch_add(1, Ordering::Relaxed);
            log::warn!("Broadcast of operation {id} dropped: outbox closed");
        }
    }

    /// Merge one operation delivered outside the subscription.
    pub fn receive_remote(&mut self, inbound: InboundOperation) -> usize {
        self.processor.enqueue(inbound);
        self.drain()
    }

    /// Merge everything already buffered on the subscription.
    pub fn pump(&mut self) -> usize {
        self.drain()
    }

    /// Wait for the next message from another client, then drain.
    /// `None` once the room is closed or the session has no subscription.
    pub async fn recv_remote(&mut self) -> Option<usize> {
        let me = self.config.client_id;
        loop {
            let msg = self.subscription.as_mut()?.recv().await?;
            if msg.sender_id == me {
                continue;
            }
            self.processor.enqueue(msg.into());
            return Some(self.drain());
        }
    }

    /// Mark local operations on `key` as reflected at `peer`.
    pub fn acknowledge(&mut self, key: &FieldKey, ids: &[OperationId], peer: Uuid) -> usize {
        self.registry.acknowledge(key, ids, peer)
    }

    pub fn stats(&self) -> SessionStats {
        let merge = self.processor.stats();
        let persist = self.persister.stats();
        SessionStats {
            local_operations: self.local_operations,
            remote_applied: merge.applied,
            remote_duplicates: merge.duplicates,
            remote_malformed: merge.malformed,
            broadcasts_sent: self.broadcast_counters.sent.load(Ordering::Relaxed),
            broadcast_failures: self.broadcast_counters.failed.load(Ordering::Relaxed),
            persists_scheduled: persist.scheduled,
            persist_writes: persist.writes,
            persist_failures: persist.failures,
        }
    }

    /// Run the processor, then carry merged text into any field write still
    /// waiting out its debounce window.
    fn drain(&mut self) -> usize {
        let me = self.config.client_id;
        let mut subscription = self.subscription.as_mut();
        let ui = self.notifier.as_deref();
        let changed = Mutex::new(Vec::new());
        let observer = |key: &FieldKey| {
            if let Some(ui) = ui {
                ui.notify_text_changed(key);
            }
            changed
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(key.clone());
        };

        let applied = self.processor.drain(
            &mut self.registry,
            Some(&observer as &dyn TextChangeNotifier),
            || next_inbound(&mut subscription, me),
        );

        let changed = changed.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        for key in changed {
            if let Some(text) = self.registry.text(&key) {
                self.persister.refresh(&key, text);
            }
        }
        applied
    }
}

/// Publish queued messages one at a time. Failures are logged and counted,
/// never retried: the next edit on the field carries the sender's current
/// view again.
async fn run_outbox(
    transport: Arc<dyn BroadcastTransport>,
    room_id: Uuid,
    mut outbox: mpsc::UnboundedReceiver<SyncMessage>,
    counters: Arc<AtomicBroadcastCounters>,
) {
    while let Some(msg) = outbox.recv().await {
        let id = msg.operation.id;
        match transport.publish(room_id, msg).await {
            Ok(receivers) => {
                counters.sent.fetch_add(1, Ordering::Relaxed);
                log::trace!("Broadcast operation {id} to {receivers} receivers");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("Broadcast of operation {id} failed: {e}");
            }
        }
    }
}

/// Next buffered message from another client.
fn next_inbound(subscription: &mut Option<&mut Subscription>, me: Uuid) -> Option<InboundOperation> {
    let subscription = subscription.as_mut()?;
    loop {
        let msg = subscription.try_recv()?;
        if msg.sender_id != me {
            return Some(msg.into());
        }
    }
}
