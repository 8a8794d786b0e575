//! Row-level transforms between two linked outputs.
//!
//! [`diff`] compares a target and an updated output table by table and
//! emits a transform output whose rows carry `Add`, `Delete` or `Modify`
//! operations. [`apply_transform`] replays such a transform onto a target,
//! enforcing the error conditions selected by [`TransformFlags`].

mod apply;
mod differ;
mod error;
mod flags;

pub use apply::apply_transform;
pub use differ::{diff, diff_with_payloads, DiffOptions};
pub use error::DiffError;
pub use flags::TransformFlags;
