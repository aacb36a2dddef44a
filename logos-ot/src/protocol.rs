//! Wire envelope for field operations.
//!
//! Wire format (bincode-encoded, standard config):
//! ```text
//! ┌──────────┬───────────┬──────────┬───────────┬──────────────────┐
//! │ room_id  │ sender_id │ clock    │ operation │ acknowledged     │
//! │ 16 bytes │ 16 bytes  │ varint   │ variable  │ Vec<OperationId> │
//! └──────────┴───────────┴──────────┴───────────┴──────────────────┘
//! ```
//!
//! `Option` fields keep their own tag, so an absent content index never
//! decodes as index 0.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::operation::{Operation, OperationId};

/// One operation as broadcast to a presentation room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    /// Presentation the operation belongs to
    pub room_id: Uuid,
    /// Sending client (not user: one user may run several clients)
    pub sender_id: Uuid,
    /// Per-sender send counter
    pub clock: u64,
    pub operation: Operation,
    /// Remote operations on the same field the sender had merged before
    /// generating `operation`
    pub acknowledged: Vec<OperationId>,
}

impl SyncMessage {
    pub fn new(room_id: Uuid, sender_id: Uuid, clock: u64, operation: Operation) -> Self {
        Self {
            room_id,
            sender_id,
            clock,
            operation,
            acknowledged: Vec::new(),
        }
    }

    pub fn with_acknowledged(mut self, acknowledged: Vec<OperationId>) -> Self {
        self.acknowledged = acknowledged;
        self
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}
