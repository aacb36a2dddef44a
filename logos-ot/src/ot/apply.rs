//! Operation application.
//!
//! Positions may lag behind the text they land on (a peer's view can be stale
//! by a few keystrokes), so every offset is clamped instead of rejected.

use crate::operation::{OpKind, Operation};

/// Apply one operation to `text`, returning the new text.
pub fn apply(text: &str, op: &Operation) -> String {
    apply_kind(text, &op.kind)
}

/// Apply a bare operation payload.
pub fn apply_kind(text: &str, kind: &OpKind) -> String {
    match kind {
        OpKind::Insert { position, content } => splice(text, *position, 0, content),
        OpKind::Delete { position, length } => splice(text, *position, *length, ""),
        OpKind::Replace { position, length, content } => {
            splice(text, *position, *length, content)
        }
        OpKind::Retain => text.to_string(),
    }
}

/// Number of Unicode scalar values in `text`.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte offset of the `index`-th char, clamped to the end of `text`.
fn byte_offset(text: &str, index: usize) -> usize {
    text.char_indices()
        .nth(index)
        .map_or(text.len(), |(offset, _)| offset)
}

/// Remove `length` chars at `position` and insert `content` there.
fn splice(text: &str, position: usize, length: usize, content: &str) -> String {
    let start = byte_offset(text, position);
    let end = start + byte_offset(&text[start..], length);
    let mut out = String::with_capacity(text.len() - (end - start) + content.len());
    out.push_str(&text[..start]);
    out.push_str(content);
    out.push_str(&text[end..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_middle() {
        let kind = OpKind::Insert { position: 1, content: "X".into() };
        assert_eq!(apply_kind("ABC", &kind), "AXBC");
    }

    #[test]
    fn test_insert_clamps_past_end() {
        let kind = OpKind::Insert { position: 99, content: "!".into() };
        assert_eq!(apply_kind("Hi", &kind), "Hi!");
    }

    #[test]
    fn test_delete_range() {
        let kind = OpKind::Delete { position: 1, length: 4 };
        assert_eq!(apply_kind("ABCDEFG", &kind), "AFG");
    }

    #[test]
    fn test_delete_clamps_end() {
        let kind = OpKind::Delete { position: 2, length: 50 };
        assert_eq!(apply_kind("ABCDE", &kind), "AB");

        let kind = OpKind::Delete { position: 10, length: 3 };
        assert_eq!(apply_kind("ABCDE", &kind), "ABCDE");
    }

    #[test]
    fn test_replace_is_delete_then_insert() {
        let kind = OpKind::Replace { position: 6, length: 5, content: "there".into() };
        assert_eq!(apply_kind("Hello world", &kind), "Hello there");
    }

    #[test]
    fn test_retain_identity() {
        for text in ["", "a", "Hello", "ünïcödé ✓"] {
            assert_eq!(apply_kind(text, &OpKind::Retain), text);
        }
    }

    #[test]
    fn test_positions_count_chars_not_bytes() {
        let kind = OpKind::Insert { position: 2, content: "→".into() };
        assert_eq!(apply_kind("äöü", &kind), "äö→ü");

        let kind = OpKind::Delete { position: 1, length: 1 };
        assert_eq!(apply_kind("✓✗✓", &kind), "✓✓");
    }

    #[test]
    fn test_char_len() {
        assert_eq!(char_len(""), 0);
        assert_eq!(char_len("äöü"), 3);
    }
}
