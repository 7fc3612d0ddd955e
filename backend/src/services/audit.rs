//! Append-only audit trail written inside the caller's transaction

use serde_json::Value;
use shared::{Actor, AuditLog, SubjectRef};
use sqlx::{PgConnection, PgPool};

use crate::error::{AppError, AppResult};
use crate::middleware::RequestMeta;
use crate::models::{convert_rows, AuditLogRow};

/// One audit row to be written
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub event: &'static str,
    pub subject: Option<SubjectRef>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub metadata: Option<Value>,
}

impl AuditEntry {
    pub fn new(event: &'static str, subject: SubjectRef) -> Self {
        Self {
            event,
            subject: Some(subject),
            old_values: None,
            new_values: None,
            metadata: None,
        }
    }

    pub fn old_values(mut self, values: Value) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn new_values(mut self, values: Value) -> Self {
        self.new_values = Some(values);
        self
    }

    pub fn metadata(mut self, values: Value) -> Self {
        self.metadata = Some(values);
        self
    }
}

/// Writes and reads audit rows
pub struct AuditLogger;

impl AuditLogger {
    /// Append an audit row using the given connection, normally the open
    /// transaction of the mutation being audited
    pub async fn log(
        conn: &mut PgConnection,
        actor: &Actor,
        meta: &RequestMeta,
        entry: AuditEntry,
    ) -> AppResult<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO audit_logs (
                actor_id, event, subject_type, subject_id,
                old_values, new_values, metadata, ip_address, user_agent
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(actor.user_id)
        .bind(entry.event)
        .bind(entry.subject.map(|s| s.kind()))
        .bind(entry.subject.map(|s| s.id()))
        .bind(&entry.old_values)
        .bind(&entry.new_values)
        .bind(&entry.metadata)
        .bind(meta.client_ip())
        .bind(meta.bounded_user_agent())
        .fetch_one(&mut *conn)
        .await?;

        tracing::debug!(audit_id = id, event = entry.event, actor = actor.user_id, "audit row written");

        Ok(id)
    }

    /// Audit history of one subject, oldest first
    pub async fn for_subject(db: &PgPool, subject: SubjectRef) -> AppResult<Vec<AuditLog>> {
        let rows = sqlx::query_as::<_, AuditLogRow>(
            r#"
            SELECT id, actor_id, event, subject_type, subject_id,
                   old_values, new_values, metadata, ip_address, user_agent, created_at
            FROM audit_logs
            WHERE subject_type = $1 AND subject_id = $2
            ORDER BY created_at, id
            "#,
        )
        .bind(subject.kind())
        .bind(subject.id())
        .fetch_all(db)
        .await?;

        convert_rows(rows).map_err(AppError::from)
    }
}
