//! Core data types flowing through the pipeline.
//!
//! All wire types derive `rkyv::Archive` for validated deserialization on the
//! consumer side, and `serde` for JSON logging and fixtures.

pub mod batch;
pub mod item;

pub use batch::*;
pub use item::*;
