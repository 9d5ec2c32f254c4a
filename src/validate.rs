//! Node hierarchy validator
//!
//! Every source document must describe the same skeleton. The first
//! document's node list is the reference; the others are compared to it
//! index by index. Discrepancies are collected rather than stopping at
//! the first one, so the caller gets a complete report, and documents
//! that disagree are excluded from the merge instead of poisoning it.

use crate::{
    kb_error::{KbError, KbWarning, SourceError, SourceWarning},
    source::{SourceFile, SourceNode},
    types::{MAX_NODES, ROTATION_EPSILON, TRANSLATION_EPSILON},
};
use log::{info, warn};
use nalgebra_glm as glm;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of cross-file skeleton validation. `accepted` holds indices
/// into the input slice; the reference document (index 0) is accepted
/// only if its own structure checks out.
#[derive(Default)]
pub struct Validation {
    pub accepted: Vec<usize>,
    pub errors: Vec<SourceError>,
    pub warnings: Vec<SourceWarning>,
}

/// Checks that all source documents agree on one skeleton. The cancel
/// flag is polled only between files, never mid-file.
#[must_use]
pub fn validate_sources(
    sources: &[SourceFile],
    cancel: Option<&AtomicBool>,
) -> Validation {
    let mut out = Validation::default();
    let Some(reference) = sources.first() else {
        return out;
    };

    // The reference skeleton must be usable before anything can be
    // compared against it.
    let ref_errors = check_reference(reference);
    if !ref_errors.is_empty() {
        out.errors.extend(ref_errors);
        return out;
    }
    out.accepted.push(0);

    let ref_nodes = &reference.model.nodes;
    for (file_index, file) in sources.iter().enumerate().skip(1) {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                out.errors.push(SourceError {
                    file: file.name.clone(),
                    error: KbError::Cancelled,
                });
                return out;
            }
        }
        let nodes = &file.model.nodes;
        if nodes.len() != ref_nodes.len() {
            // Per-node checks would be comparing unrelated skeletons,
            // so skip them for this file.
            out.errors.push(SourceError {
                file: file.name.clone(),
                error: KbError::NodeCountMismatch {
                    expected: ref_nodes.len(),
                    actual: nodes.len(),
                },
            });
            continue;
        }

        let before = out.errors.len();
        for (i, (a, b)) in ref_nodes.iter().zip(nodes.iter()).enumerate() {
            for error in compare_nodes(i, a, b) {
                warn!("{}: {}", file.name, error);
                out.errors.push(SourceError {
                    file: file.name.clone(),
                    error,
                });
            }
        }
        if out.errors.len() > before {
            continue;
        }

        // Nodes match but a differing checksum can still flag a benign
        // re-export worth telling the user about.
        if file.model.checksum != reference.model.checksum {
            out.warnings.push(SourceWarning {
                file: file.name.clone(),
                warning: KbWarning::ChecksumMismatch {
                    expected: reference.model.checksum,
                    actual: file.model.checksum,
                },
            });
        }
        out.accepted.push(file_index);
    }

    info!(
        "Validated {} source files, accepted {}",
        sources.len(),
        out.accepted.len(),
    );
    out
}

/// Structural checks on the reference skeleton itself
fn check_reference(file: &SourceFile) -> Vec<SourceError> {
    let mut errors = Vec::new();
    let nodes = &file.model.nodes;
    if nodes.len() > MAX_NODES {
        errors.push(SourceError {
            file: file.name.clone(),
            error: KbError::TooManyNodes(nodes.len()),
        });
    }
    let count = i32::try_from(nodes.len()).unwrap_or(i32::MAX);
    for (i, node) in nodes.iter().enumerate() {
        let child_ok = node.first_child >= -1 && node.first_child < count;
        let sibling_ok = node.sibling >= -1 && node.sibling < count;
        if !child_ok || !sibling_ok {
            errors.push(SourceError {
                file: file.name.clone(),
                error: KbError::InvalidHierarchy(i),
            });
        }
    }
    errors
}

/// Compares one node against its reference counterpart. Position in the
/// list matters; there is no order-independent matching.
fn compare_nodes(
    index: usize,
    reference: &SourceNode,
    node: &SourceNode,
) -> Vec<KbError> {
    let mut errors = Vec::new();
    if reference.name != node.name {
        errors.push(KbError::NodeNameMismatch(index));
    }
    if reference.first_child != node.first_child
        || reference.sibling != node.sibling
    {
        errors.push(KbError::NodeLinkMismatch(index));
    }
    let c = glm::quat_equal_eps(
        &reference.rotation,
        &node.rotation,
        ROTATION_EPSILON,
    );
    if !(c.x && c.y && c.z && c.w) {
        errors.push(KbError::NodeRotationMismatch(index));
    }
    let c = glm::equal_eps(
        &reference.translation,
        &node.translation,
        TRANSLATION_EPSILON,
    );
    if !(c.x && c.y && c.z) {
        errors.push(KbError::NodeTranslationMismatch(index));
    }
    errors
}
