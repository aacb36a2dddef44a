//! Turn an old/new text pair into a single operation.
//!
//! Linear prefix/suffix scan, not a minimal edit script: a keystroke becomes an
//! Insert or Delete, anything else becomes one Replace over the changed middle.

use crate::operation::{OpContext, OpKind, Operation};

/// Diff `old` against `new`. Returns `None` when nothing changed.
pub fn generate_operation(old: &str, new: &str, ctx: &OpContext) -> Option<Operation> {
    let kind = diff_kind(old, new)?;
    Some(Operation::new(kind, ctx.origin_user_id.clone(), ctx.target.clone()))
}

/// The payload half of [`generate_operation`].
pub fn diff_kind(old: &str, new: &str) -> Option<OpKind> {
    let old: Vec<char> = old.chars().collect();
    let new: Vec<char> = new.chars().collect();

    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();

    match (prefix == old.len(), prefix == new.len()) {
        (true, true) => return None,
        (true, false) => {
            return Some(OpKind::Insert {
                position: prefix,
                content: new[prefix..].iter().collect(),
            });
        }
        (false, true) => {
            return Some(OpKind::Delete {
                position: prefix,
                length: old.len() - prefix,
            });
        }
        (false, false) => {}
    }

    // Suffix may not reach back into the shared prefix.
    let max_suffix = old.len().min(new.len()) - prefix;
    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let removed = old.len() - prefix - suffix;
    let inserted: String = new[prefix..new.len() - suffix].iter().collect();

    Some(OpKind::replace(prefix, removed, inserted))
}
