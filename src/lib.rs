//! Compiler from JMS model sources to a legacy binary model tag
//!
//! Takes one or more parsed JMS documents (skeleton, markers,
//! materials, region/permutation/LOD meshes), validates that they all
//! describe the same skeleton, merges them into a single in-memory
//! model, converts each per-material triangle soup into triangle
//! strips, and packs everything into the fixed table layout the target
//! tag format requires.
//!
//! Parsing the JMS text grammar and writing the final tag bytes are
//! handled by external collaborators; this crate is only the part that
//! decides what structured data to produce and in what order.
//!
//! Typical use is through [`pipeline::compile`] and [`pipeline::pack`],
//! or the [`pipeline::Pipeline`] wrapper when a UI needs the state
//! machine, cancellation and busy flag.

pub mod kb_error;
pub mod merge;
pub mod model;
pub mod pack;
pub mod pipeline;
pub mod source;
pub mod strip;
pub mod types;
pub mod validate;

// Re-exports
pub use {
    kb_error::{CompileReport, KbError, KbWarning, SourceError, SourceWarning},
    pipeline::{compile, pack, CompileOutput, Pipeline, State},
};
