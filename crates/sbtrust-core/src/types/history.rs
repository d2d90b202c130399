use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State-changing operation recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    /// Signing identity generated
    GenerateKey,
    /// MOK import requested
    ImportKey,
    /// MOK deletion requested
    DeleteKey,
    /// MOK reset requested
    ResetKeys,
    /// Kernel signing batch
    SignKernel,
    /// Single module signed outside a batch
    SignModule,
    /// History cleared
    ClearHistory,
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::GenerateKey => "generate_key",
            Self::ImportKey => "import_key",
            Self::DeleteKey => "delete_key",
            Self::ResetKeys => "reset_keys",
            Self::SignKernel => "sign_kernel",
            Self::SignModule => "sign_module",
            Self::ClearHistory => "clear_history",
        };
        f.write_str(s)
    }
}

/// One audit-trail record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// What happened
    pub action: HistoryAction,
    /// Free-form structured details
    pub details: serde_json::Value,
    /// Whether it succeeded
    pub success: bool,
}

impl HistoryEntry {
    /// New entry stamped now.
    #[must_use]
    pub fn now(action: HistoryAction, details: serde_json::Value, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            details,
            success,
        }
    }
}
