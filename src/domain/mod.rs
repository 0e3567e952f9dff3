//! Domain layer types and invariants.

pub mod entities;
pub mod feed;
