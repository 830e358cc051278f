/// Structured audit events for accounting setup
///
/// Emitted as one JSON line per event through the `quotabox::audit` log
/// target. Setup-time only: nothing here is safe to call from the fault path.
use crate::config::types::{QuotaboxError, UnsupportedKindPolicy};
use chrono::{DateTime, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const AUDIT_TARGET: &str = "quotabox::audit";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Accounting strategy selected and fault handling armed
    AccountingStarted {
        run_id: Uuid,
        strategy: String,
        channels: usize,
        policy: UnsupportedKindPolicy,
        timestamp: DateTime<Utc>,
    },
    /// Setup failed fatally; the process exits without a report
    SetupFailed {
        error: String,
        exit_code: i32,
        timestamp: DateTime<Utc>,
    },
}

impl AuditEvent {
    pub fn accounting_started(
        run_id: Uuid,
        strategy: &str,
        channels: usize,
        policy: UnsupportedKindPolicy,
    ) -> Self {
        AuditEvent::AccountingStarted {
            run_id,
            strategy: strategy.to_string(),
            channels,
            policy,
            timestamp: Utc::now(),
        }
    }

    pub fn setup_failed(err: &QuotaboxError) -> Self {
        AuditEvent::SetupFailed {
            error: err.to_string(),
            exit_code: err.exit_code(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"event":"unserializable","error":"{}"}}"#, e)
        })
    }

    /// Log the event under [`AUDIT_TARGET`]
    pub fn emit(&self) {
        match self {
            AuditEvent::SetupFailed { .. } => error!(target: AUDIT_TARGET, "{}", self.to_json()),
            _ => info!(target: AUDIT_TARGET, "{}", self.to_json()),
        }
    }
}
