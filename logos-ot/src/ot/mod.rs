//! Operational-transform core. Pure functions, no I/O.
//!
//! - [`apply`] — run an operation against a text
//! - [`transform`] — rebase two concurrent operations
//! - [`generate`] — diff an old/new pair into one operation

pub mod apply;
pub mod generate;
pub mod transform;

pub use apply::{apply, apply_kind, char_len};
pub use generate::{diff_kind, generate_operation};
pub use transform::{transform, wins_over};
