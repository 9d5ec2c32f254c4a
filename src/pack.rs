//! Binary layout packer
//!
//! Walks a `MergedModel` plus stripified meshes and emits the table set
//! of the target tag format in a fixed deterministic order. The tables
//! themselves are handed to an external tag serializer; the fixed-size
//! vertex records and the strip index streams are produced here in
//! their exact byte layout.

pub mod tables;

pub(crate) mod emit;

// Re-exports
pub use emit::pack_model;
