//! Structured observability hooks for update runs.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `UpdateSpan` RAII guard
//! - Emission functions for lifecycle events: start, stage transitions,
//!   duplicate checks, rejection, finish and publication
//!
//! Events are emitted at `info!` level except failures, which use `warn!`.

use tracing::info;

use crate::orchestrator::UpdateStage;

/// RAII guard that enters an update-scoped tracing span.
///
/// ```ignore
/// let _span = UpdateSpan::enter("1718000000_ab12cd34", "1717000000_00ff00ff");
/// // every event below carries version_code and base_model
/// ```
pub struct UpdateSpan {
    _span: tracing::span::EnteredSpan,
}

impl UpdateSpan {
    pub fn enter(version_code: &str, base_model: &str) -> Self {
        Self {
            _span: Self::span(version_code, base_model).entered(),
        }
    }

    /// The span itself, for instrumenting futures.
    pub fn span(version_code: &str, base_model: &str) -> tracing::Span {
        tracing::info_span!(
            "handsign.update",
            version_code = %version_code,
            base_model = %base_model
        )
    }
}

pub fn emit_update_started(version_code: &str, base_model: &str, batch_len: usize) {
    info!(
        event = "update.started",
        version_code = %version_code,
        base_model = %base_model,
        batch_len = batch_len,
    );
}

pub fn emit_update_stage(version_code: &str, stage: UpdateStage) {
    info!(event = "update.stage", version_code = %version_code, stage = %stage);
}

pub fn emit_duplicates_checked(version_code: &str, train_ratio: f64, test_ratio: f64, rejected: bool) {
    info!(
        event = "duplicates.checked",
        version_code = %version_code,
        train_ratio = train_ratio,
        test_ratio = test_ratio,
        rejected = rejected,
    );
}

pub fn emit_update_rejected(version_code: &str, decisive_ratio: f64) {
    info!(
        event = "update.rejected",
        version_code = %version_code,
        decisive_ratio = decisive_ratio,
    );
}

/// Emit event: update finished with duration, class count and success flag.
pub fn emit_update_finished(version_code: &str, duration_ms: u64, num_classes: usize, success: bool) {
    info!(
        event = "update.finished",
        version_code = %version_code,
        duration_ms = duration_ms,
        num_classes = num_classes,
        success = success,
    );
}

pub fn emit_publish_primary(version_code: &str, key: &str, url: &str) {
    info!(event = "publish.primary", version_code = %version_code, key = %key, url = %url);
}

/// Emit event: background upload failed (warning level).
pub fn emit_publish_secondary_failed(version_code: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(
        event = "publish.secondary_failed",
        version_code = %version_code,
        error = %error,
    );
}
