//! # logos-ot — Real-time conflict resolution for slide text fields
//!
//! Several users edit the same presentation at once. Each text field
//! (title, content items, speaker notes, visual suggestion) converges to
//! the same text on every client through operational transformation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   SyncMessage    ┌──────────────┐
//! │ CollabSession│ ◄──────────────► │ CollabSession│
//! │  (client A)  │   RoomManager    │  (client B)  │
//! └──────┬───────┘                  └──────┬───────┘
//!        │                                 │
//!        ▼                                 ▼
//! ┌──────────────┐                  ┌──────────────┐
//! │FieldRegistry │                  │FieldRegistry │
//! │ text+pending │                  │ text+pending │
//! └──────┬───────┘                  └──────────────┘
//!        │
//!  ┌─────┴──────────┐
//!  │DebouncedPersist│ ──► FieldStore
//!  └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`operation`] — Field addressing and the operation model
//! - [`ot`] — Apply, pairwise transform, and diff-based generation
//! - [`registry`] — Per-field text, applied log, unacknowledged local ops
//! - [`processor`] — Single-flight FIFO merge of remote operations
//! - [`persister`] — Per-field debounced writes
//! - [`store`] — Durable store interface plus an in-memory store
//! - [`protocol`] — Binary wire format (bincode-encoded SyncMessage)
//! - [`broadcast`] — Room-based fan-out
//! - [`session`] — Explicit session context tying it all together

pub mod operation;
pub mod ot;
pub mod registry;
pub mod processor;
pub mod persister;
pub mod store;
pub mod protocol;
pub mod broadcast;
pub mod session;

// Re-exports for convenience
pub use operation::{
    FieldKey, FieldKind, OpContext, OpKind, Operation, OperationError, OperationId,
};
pub use ot::{apply, generate_operation, transform};
pub use registry::{DocumentFieldState, FieldRegistry, PendingEntry};
pub use processor::{
    InboundOperation, MergeOutcome, ProcessorStats, RemoteOperationProcessor, TextChangeNotifier,
};
pub use persister::{DebouncedPersister, PersistStats};
pub use store::{FieldStore, MemoryFieldStore, PersistedWrite, StoreError};
pub use protocol::{ProtocolError, SyncMessage};
pub use broadcast::{BroadcastGroup, BroadcastStats, BroadcastTransport, RoomManager, Subscription, TransportError};
pub use session::{CollabSession, SessionConfig, SessionStats};
