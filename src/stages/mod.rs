//! Pipeline stages, in driver order.
//!
//! Each stage fully completes or fails with a tagged `StageError`; there is
//! no retry and no partial-success continuation.

pub mod build;
pub mod prereqs;
pub mod reset;
pub mod setup;
