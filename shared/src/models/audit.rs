//! Audit trail model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::SubjectRef;

/// Append-only record of a governed mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: i64,
    pub actor_id: Option<i64>,
    pub event: String,
    pub subject: Option<SubjectRef>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}
