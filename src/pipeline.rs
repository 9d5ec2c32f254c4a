//! Compilation pipeline
//!
//! Ties the stages together: validate the source skeletons, merge the
//! accepted documents, then stripify and pack into the output tables.
//! `compile` and `pack` are plain functions callable from any
//! surrounding UI or CLI; `Pipeline` wraps them with the observable
//! state machine, a re-entry guard and a cancellation flag that is
//! polled at per-source-file boundaries. Once packing starts the run
//! goes to completion or failure; there is no partial commit.

use crate::{
    kb_error::{CompileReport, KbError, SourceError},
    merge::merge_sources,
    model::MergedModel,
    pack::{emit, pack_model, tables::PackedModel},
    source::{CompileOptions, SourceFile},
    validate::validate_sources,
};
use log::{error, info};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Pipeline progress. Any fatal error moves straight to `Aborted`;
/// `Committed` is the only state in which packed tables exist.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Idle,
    Validating,
    Merging,
    Stripifying,
    Packing,
    Committed,
    Aborted,
}

/// A successful compile. The report may still carry errors for source
/// files that were excluded, plus any warnings; the caller decides
/// whether to proceed to packing with what was accepted.
pub struct CompileOutput {
    pub model: MergedModel,
    pub report: CompileReport,
}

/// Validates and merges a source set into one model
///
/// Files that disagree with the reference skeleton are excluded and
/// reported; the compile proceeds with the rest. It aborts only when
/// no usable source remains or when merging the accepted set fails.
///
/// # Errors
/// Returns the full `CompileReport` on abort.
pub fn compile(
    sources: &[SourceFile],
    options: &CompileOptions,
) -> Result<CompileOutput, CompileReport> {
    compile_with_cancel(sources, options, None)
}

/// Packs a merged model into the output tables
///
/// # Errors
/// May return `KbError`
pub fn pack(model: &MergedModel) -> Result<PackedModel, KbError> {
    pack_model(model)
}

fn compile_with_cancel(
    sources: &[SourceFile],
    options: &CompileOptions,
    cancel: Option<&AtomicBool>,
) -> Result<CompileOutput, CompileReport> {
    let validation = validate_sources(sources, cancel);
    let mut report = CompileReport {
        errors: validation.errors,
        warnings: validation.warnings,
    };
    if validation.accepted.is_empty() {
        report.errors.push(SourceError {
            file: String::new(),
            error: KbError::NoValidSources,
        });
        error!("Compile aborted: no valid source data");
        return Err(report);
    }

    match merge_sources(sources, &validation.accepted, options, cancel) {
        Ok(model) => {
            info!(
                "Compile finished with {} errors, {} warnings",
                report.errors.len(),
                report.warnings.len(),
            );
            Ok(CompileOutput { model, report })
        }
        Err(errors) => {
            report.errors.extend(errors);
            error!("Compile aborted: merge failed");
            Err(report)
        }
    }
}

/// State machine wrapper around `compile` and `pack` for callers that
/// drive the pipeline from a UI
pub struct Pipeline {
    state: State,
    busy: bool,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            busy: false,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// True while a compile or pack call is in progress. Callers must
    /// serialize concurrent invocations on the same target themselves.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.busy
    }

    /// Handle that requests cancellation when set. Honoured between
    /// source files during validation and merging; ignored once packing
    /// has begun.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Runs validation and merge
    ///
    /// # Errors
    /// Returns the full `CompileReport` on abort.
    pub fn compile(
        &mut self,
        sources: &[SourceFile],
        options: &CompileOptions,
    ) -> Result<CompileOutput, CompileReport> {
        if self.busy {
            return Err(CompileReport {
                errors: vec![SourceError {
                    file: String::new(),
                    error: KbError::PipelineBusy,
                }],
                warnings: Vec::new(),
            });
        }
        self.busy = true;
        self.cancel.store(false, Ordering::Relaxed);
        self.state = State::Validating;
        let result =
            compile_with_cancel(sources, options, Some(&self.cancel));
        self.state = match &result {
            Ok(_) => State::Merging,
            Err(_) => State::Aborted,
        };
        self.busy = false;
        result
    }

    /// Runs stripification and packing. On success the pipeline is
    /// `Committed` and the returned tables are ready for the external
    /// tag serializer; the compiled model stays valid so a failed write
    /// can be retried without recompiling.
    ///
    /// # Errors
    /// May return `KbError`
    pub fn pack(
        &mut self,
        model: &MergedModel,
    ) -> Result<PackedModel, KbError> {
        if self.busy {
            return Err(KbError::PipelineBusy);
        }
        self.busy = true;
        let result = self.pack_stages(model);
        self.state = match &result {
            Ok(_) => State::Committed,
            Err(_) => State::Aborted,
        };
        self.busy = false;
        result
    }

    fn pack_stages(
        &mut self,
        model: &MergedModel,
    ) -> Result<PackedModel, KbError> {
        self.state = State::Stripifying;
        let plan = emit::plan_model(model)?;
        let geometries = emit::build_geometries(&plan, model.unit_scale)?;
        self.state = State::Packing;
        emit::assemble(model, plan, geometries)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
