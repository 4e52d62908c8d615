//! Audit logging for filesystem and gadget operations.
//!
//! Every event is emitted via `tracing::info!` with the serialized record in
//! the `audit` field, making the trail queryable by any log aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `fs.read` / `fs.write` / `fs.list` / `fs.copy` | Per sandbox call, after it completes |
//! | `gadget.start` | A gadget subprocess is about to spawn |
//! | `gadget.finish` | A gadget subprocess exited or timed out |

use serde::Serialize;

use crate::redact::redact;

/// Structured audit record.
#[derive(Debug, Serialize)]
pub struct AuditRecord {
    /// Event type string (e.g. `"fs.read"`).
    pub event: &'static str,
    /// Primary path or gadget identifier.
    pub target: String,
    /// Secondary path (copy destination).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    /// Acting user id.
    pub user: String,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Short human detail: byte counts, denial reason, or error class.
    pub detail: String,
}

impl AuditRecord {
    /// Construct a filesystem event.
    #[must_use]
    pub fn fs(
        event: &'static str,
        path: impl Into<String>,
        user: impl Into<String>,
        success: bool,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            event,
            target: path.into(),
            dest: None,
            user: user.into(),
            success,
            detail: detail.into(),
        }
    }

    /// Construct an `fs.copy` event carrying both ends.
    #[must_use]
    pub fn fs_copy(
        src: impl Into<String>,
        dst: impl Into<String>,
        user: impl Into<String>,
        success: bool,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            event: "fs.copy",
            target: src.into(),
            dest: Some(dst.into()),
            user: user.into(),
            success,
            detail: detail.into(),
        }
    }

    /// Construct a gadget lifecycle event.
    #[must_use]
    pub fn gadget(
        event: &'static str,
        exec_id: impl Into<String>,
        user: impl Into<String>,
        success: bool,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            event,
            target: exec_id.into(),
            dest: None,
            user: user.into(),
            success,
            detail: detail.into(),
        }
    }
}

/// Emit an audit record via `tracing::info!`.
///
/// The detail field is redacted before serialization; audit records must
/// never leak credential material even if a caller passes it through.
pub fn emit(record: &AuditRecord) {
    let sanitized = AuditRecord {
        event: record.event,
        target: record.target.clone(),
        dest: record.dest.clone(),
        user: record.user.clone(),
        success: record.success,
        detail: redact(&record.detail),
    };
    match serde_json::to_string(&sanitized) {
        Ok(ref json) => tracing::info!(audit = %json, "audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit record"),
    }
}
