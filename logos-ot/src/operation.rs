//! Operation model for field-level text edits.
//!
//! Every edit targets exactly one field-instance:
//! ```text
//! ┌──────────┬──────────────────┬───────────────┐
//! │ slide_id │ field            │ content_index │
//! │ String   │ FieldKind (u8)   │ Option<u32>   │
//! └──────────┴──────────────────┴───────────────┘
//! ```
//!
//! The kind payload is a tagged enum, so an Insert can never be missing its
//! content and a Delete can never be missing its length. Positions and lengths
//! count Unicode scalar values, not bytes.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Editable text fields of a slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum FieldKind {
    /// Slide title
    Title = 1,
    /// Bullet items (addressed by `content_index`)
    Content = 2,
    /// Presenter notes
    SpeakerNotes = 3,
    /// Suggested visual description
    VisualSuggestion = 4,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Title => "title",
            FieldKind::Content => "content",
            FieldKind::SpeakerNotes => "speakerNotes",
            FieldKind::VisualSuggestion => "visualSuggestion",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of one editable text value: (slide, field, optional array index).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey {
    pub slide_id: String,
    pub field: FieldKind,
    /// Index into the slide's content array (`None` for scalar fields)
    pub content_index: Option<u32>,
}

impl FieldKey {
    pub fn new(slide_id: impl Into<String>, field: FieldKind) -> Self {
        Self {
            slide_id: slide_id.into(),
            field,
            content_index: None,
        }
    }

    /// Key for one bullet of the content array.
    pub fn content_item(slide_id: impl Into<String>, index: u32) -> Self {
        Self {
            slide_id: slide_id.into(),
            field: FieldKind::Content,
            content_index: Some(index),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.content_index {
            Some(i) => write!(f, "{}/{}[{i}]", self.slide_id, self.field),
            None => write!(f, "{}/{}", self.slide_id, self.field),
        }
    }
}

/// Unique operation identifier. Its ordering is the deterministic tie-break
/// used by `transform`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_u128(v: u128) -> Self {
        Self(Uuid::from_u128(v))
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Edit payload, one variant per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    Insert { position: usize, content: String },
    Delete { position: usize, length: usize },
    Replace { position: usize, length: usize, content: String },
    /// No-op; the result of a Replace conflict loser
    Retain,
}

impl OpKind {
    /// Build a replace, collapsing to the simplest kind with the same effect.
    pub fn replace(position: usize, length: usize, content: String) -> Self {
        match (length, content.is_empty()) {
            (0, true) => OpKind::Retain,
            (0, false) => OpKind::Insert { position, content },
            (_, true) => OpKind::Delete { position, length },
            _ => OpKind::Replace { position, length, content },
        }
    }

    /// Same effect, simplest kind. Empty inserts and zero-length deletes are
    /// no-ops; a replace without one of its halves is a plain insert/delete.
    pub fn normalized(&self) -> Self {
        match self {
            OpKind::Insert { content, .. } if content.is_empty() => OpKind::Retain,
            OpKind::Delete { length: 0, .. } => OpKind::Retain,
            OpKind::Replace { position, length, content } => {
                OpKind::replace(*position, *length, content.clone())
            }
            other => other.clone(),
        }
    }

    pub fn position(&self) -> Option<usize> {
        match self {
            OpKind::Insert { position, .. }
            | OpKind::Delete { position, .. }
            | OpKind::Replace { position, .. } => Some(*position),
            OpKind::Retain => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Insert { .. } => "insert",
            OpKind::Delete { .. } => "delete",
            OpKind::Replace { .. } => "replace",
            OpKind::Retain => "retain",
        }
    }
}

/// Structural problems with an operation received from a peer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    #[error("operation {0} has no origin user")]
    MissingOrigin(OperationId),

    #[error("operation {0} has no target slide")]
    MissingSlide(OperationId),

    #[error("operation {id}: {kind} carries no edit")]
    EmptyEdit { id: OperationId, kind: &'static str },
}

/// One atomic edit instruction targeting one field-instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OpKind,
    pub origin_user_id: String,
    /// Wall-clock milliseconds. Only used to order conflicting replaces.
    pub timestamp_ms: u64,
    pub target: FieldKey,
}

impl Operation {
    pub fn new(kind: OpKind, origin_user_id: impl Into<String>, target: FieldKey) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            origin_user_id: origin_user_id.into(),
            timestamp_ms: now_ms(),
            target,
        }
    }

    pub fn insert(
        position: usize,
        content: impl Into<String>,
        origin_user_id: impl Into<String>,
        target: FieldKey,
    ) -> Self {
        let content = content.into();
        Self::new(OpKind::Insert { position, content }, origin_user_id, target)
    }

    pub fn delete(
        position: usize,
        length: usize,
        origin_user_id: impl Into<String>,
        target: FieldKey,
    ) -> Self {
        Self::new(OpKind::Delete { position, length }, origin_user_id, target)
    }

    pub fn replace(
        position: usize,
        length: usize,
        content: impl Into<String>,
        origin_user_id: impl Into<String>,
        target: FieldKey,
    ) -> Self {
        let content = content.into();
        Self::new(OpKind::Replace { position, length, content }, origin_user_id, target)
    }

    pub fn retain(origin_user_id: impl Into<String>, target: FieldKey) -> Self {
        Self::new(OpKind::Retain, origin_user_id, target)
    }

    /// Override the id (tests and replay).
    pub fn with_id(mut self, id: OperationId) -> Self {
        self.id = id;
        self
    }

    /// Override the timestamp (tests and replay).
    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Same identity and target, different payload.
    pub fn with_kind(&self, kind: OpKind) -> Self {
        Self {
            id: self.id,
            kind,
            origin_user_id: self.origin_user_id.clone(),
            timestamp_ms: self.timestamp_ms,
            target: self.target.clone(),
        }
    }

    pub fn is_retain(&self) -> bool {
        matches!(self.kind, OpKind::Retain)
    }

    /// Reject operations that carry no usable edit or address.
    pub fn validate(&self) -> Result<(), OperationError> {
        if self.origin_user_id.is_empty() {
            return Err(OperationError::MissingOrigin(self.id));
        }
        if self.target.slide_id.is_empty() {
            return Err(OperationError::MissingSlide(self.id));
        }
        let empty = match &self.kind {
            OpKind::Insert { content, .. } => content.is_empty(),
            OpKind::Delete { length, .. } => *length == 0,
            OpKind::Replace { length, content, .. } => *length == 0 && content.is_empty(),
            OpKind::Retain => false,
        };
        if empty {
            return Err(OperationError::EmptyEdit {
                id: self.id,
                kind: self.kind.name(),
            });
        }
        Ok(())
    }
}

/// Identity stamped onto locally generated operations.
#[derive(Debug, Clone)]
pub struct OpContext {
    pub origin_user_id: String,
    pub target: FieldKey,
}

impl OpContext {
    pub fn new(origin_user_id: impl Into<String>, target: FieldKey) -> Self {
        Self {
            origin_user_id: origin_user_id.into(),
            target,
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
