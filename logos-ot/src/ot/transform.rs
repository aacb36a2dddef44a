//! Pairwise transform of concurrent operations.
//!
//! `transform(a, b)` takes two operations generated against the same text and
//! returns `(a', b')`, where `a'` is `a` rebased to run after `b` and `b'` is
//! `b` rebased to run after `a`. Both execution orders end on the same text:
//!
//! ```text
//!          a            b'
//!   T ─────────► Ta ─────────► T'
//!   │                          ▲
//!   │  b            a'         │
//!   └─────────► Tb ────────────┘
//! ```
//!
//! Insert/Insert ties are broken by operation id. Conflicts involving a
//! Replace are last-writer-wins on `timestamp_ms`, then id.

use std::cmp::Ordering;

use crate::operation::{OpKind, Operation};

use super::apply::char_len;

/// Rebase two concurrent operations against each other.
pub fn transform(a: &Operation, b: &Operation) -> (Operation, Operation) {
    if a.target != b.target {
        // Different field-instances never interact.
        log::trace!("transform across fields {} / {}: no-op", a.target, b.target);
        return (a.clone(), b.clone());
    }

    let ka = a.kind.normalized();
    let kb = b.kind.normalized();

    let (ka2, kb2) = match (&ka, &kb) {
        (OpKind::Retain, _) | (_, OpKind::Retain) => (ka.clone(), kb.clone()),

        (
            OpKind::Insert { position: pa, content: ca },
            OpKind::Insert { position: pb, content: cb },
        ) => {
            if (*pa, a.id) <= (*pb, b.id) {
                let shifted = OpKind::Insert { position: pb + char_len(ca), content: cb.clone() };
                (ka.clone(), shifted)
            } else {
                let shifted = OpKind::Insert { position: pa + char_len(cb), content: ca.clone() };
                (shifted, kb.clone())
            }
        }

        (
            OpKind::Delete { position: pa, length: la },
            OpKind::Delete { position: pb, length: lb },
        ) => delete_delete(*pa, *la, *pb, *lb),

        (OpKind::Insert { position, content }, OpKind::Delete { position: dp, length }) => {
            insert_delete(*position, content, *dp, *length)
        }

        (OpKind::Delete { position: dp, length }, OpKind::Insert { position, content }) => {
            let (ins, del) = insert_delete(*position, content, *dp, *length);
            (del, ins)
        }

        _ => replace_pair(a, &ka, b, &kb),
    };

    (a.with_kind(ka2), b.with_kind(kb2))
}

/// Whether `a` beats `b` in a last-writer-wins conflict.
pub fn wins_over(a: &Operation, b: &Operation) -> bool {
    (a.timestamp_ms, a.id).cmp(&(b.timestamp_ms, b.id)) == Ordering::Greater
}

fn delete_delete(pa: usize, la: usize, pb: usize, lb: usize) -> (OpKind, OpKind) {
    let (ea, eb) = (pa + la, pb + lb);

    if ea <= pb {
        (
            OpKind::Delete { position: pa, length: la },
            OpKind::Delete { position: pb - la, length: lb },
        )
    } else if eb <= pa {
        (
            OpKind::Delete { position: pa - lb, length: la },
            OpKind::Delete { position: pb, length: lb },
        )
    } else {
        // Overlap is removed by whichever runs first; both anchor to the
        // smaller start.
        let overlap = ea.min(eb) - pa.max(pb);
        let start = pa.min(pb);
        (
            OpKind::Delete { position: start, length: la - overlap }.normalized(),
            OpKind::Delete { position: start, length: lb - overlap }.normalized(),
        )
    }
}

/// Returns `(insert', delete')`.
fn insert_delete(p: usize, content: &str, q: usize, l: usize) -> (OpKind, OpKind) {
    let n = char_len(content);
    let end = q + l;

    if p <= q {
        (
            OpKind::Insert { position: p, content: content.to_string() },
            OpKind::Delete { position: q + n, length: l },
        )
    } else if p >= end {
        (
            OpKind::Insert { position: p - l, content: content.to_string() },
            OpKind::Delete { position: q, length: l },
        )
    } else {
        // Insert point swallowed by the deleted span: the insert lands at the
        // span start, and the delete removes its span around it.
        (
            OpKind::Insert { position: q, content: content.to_string() },
            OpKind::replace(q, l + n, content.to_string()),
        )
    }
}

/// Removed range `[start, end)` of the base text plus the content written at
/// `start`.
#[derive(Debug, Clone)]
struct Span {
    start: usize,
    end: usize,
    content: String,
}

impl Span {
    fn of(kind: &OpKind) -> Option<Self> {
        match kind {
            OpKind::Insert { position, content } => Some(Self {
                start: *position,
                end: *position,
                content: content.clone(),
            }),
            OpKind::Delete { position, length } => Some(Self {
                start: *position,
                end: position + length,
                content: String::new(),
            }),
            OpKind::Replace { position, length, content } => Some(Self {
                start: *position,
                end: position + length,
                content: content.clone(),
            }),
            OpKind::Retain => None,
        }
    }

    fn removed(&self) -> usize {
        self.end - self.start
    }

    /// Length change this span causes in the text.
    fn delta(&self) -> isize {
        char_len(&self.content) as isize - self.removed() as isize
    }

    fn shifted(&self, delta: isize) -> OpKind {
        let start = (self.start as isize + delta).max(0) as usize;
        OpKind::replace(start, self.removed(), self.content.clone())
    }

    fn to_kind(&self) -> OpKind {
        OpKind::replace(self.start, self.removed(), self.content.clone())
    }
}

/// At least one side is a Replace.
///
/// Ranges that do not overlap commute and only shift. Overlapping ranges are
/// an atomic conflict: the winner's content replaces the union of both ranges
/// and the loser's content is dropped. A loser inside the winner's range
/// becomes a Retain.
fn replace_pair(a: &Operation, ka: &OpKind, b: &Operation, kb: &OpKind) -> (OpKind, OpKind) {
    let (Some(sa), Some(sb)) = (Span::of(ka), Span::of(kb)) else {
        return (ka.clone(), kb.clone());
    };

    if sa.end <= sb.start {
        return (sa.to_kind(), sb.shifted(sa.delta()));
    }
    if sb.end <= sa.start {
        return (sa.shifted(sb.delta()), sb.to_kind());
    }

    let u0 = sa.start.min(sb.start);
    let u1 = sa.end.max(sb.end);

    let a_wins = wins_over(a, b);
    let (winner, loser) = if a_wins { (&sa, &sb) } else { (&sb, &sa) };

    // Winner after loser: the loser's output sits inside the union.
    let winner_len = (u1 - u0) - loser.removed() + char_len(&loser.content);
    let winner_prime = OpKind::replace(u0, winner_len, winner.content.clone());

    // Loser after winner: clear whatever of the union the winner left behind.
    let loser_prime = if u0 == winner.start && u1 == winner.end {
        OpKind::Retain
    } else {
        let loser_len = (u1 - u0) - winner.removed() + char_len(&winner.content);
        OpKind::replace(u0, loser_len, winner.content.clone())
    };

    log::debug!(
        "replace conflict on {}: {} wins over {}",
        a.target,
        if a_wins { a.id } else { b.id },
        if a_wins { b.id } else { a.id },
    );

    if a_wins {
        (winner_prime, loser_prime)
    } else {
        (loser_prime, winner_prime)
    }
}
