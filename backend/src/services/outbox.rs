//! Transactional outbox of domain events
//!
//! Mutations enqueue an event in the same transaction that changes state, so
//! an event exists if and only if the change committed. A background
//! dispatcher claims undelivered rows with `FOR UPDATE SKIP LOCKED`, leases
//! them by stamping `locked_until`, commits, and only then hands them to an
//! [`EventSink`]. No transaction is open while a sink call is in flight, and
//! a row whose lease expired is claimable again.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use shared::SubjectRef;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::config::OutboxConfig;
use crate::error::AppResult;
use crate::external::EventSink;

/// An event about to be enqueued
#[derive(Debug, Clone)]
pub struct DomainEvent {
    pub event_type: &'static str,
    pub aggregate: SubjectRef,
    pub payload: Value,
}

impl DomainEvent {
    pub fn new(event_type: &'static str, aggregate: SubjectRef, payload: Value) -> Self {
        Self {
            event_type,
            aggregate,
            payload,
        }
    }
}

/// A stored outbox row
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: i64,
    pub payload: Value,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}

/// Enqueue `event` on the caller's transaction
pub async fn enqueue(conn: &mut PgConnection, event: DomainEvent) -> AppResult<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO domain_events (id, event_type, aggregate_type, aggregate_id, payload)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(event.event_type)
    .bind(event.aggregate.kind())
    .bind(event.aggregate.id())
    .bind(&event.payload)
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

/// Delivers queued domain events to a sink
#[derive(Clone)]
pub struct OutboxDispatcher {
    db: PgPool,
    sink: EventSink,
    config: OutboxConfig,
}

impl OutboxDispatcher {
    pub fn new(db: PgPool, config: OutboxConfig) -> AppResult<Self> {
        let sink = EventSink::from_config(
            config.webhook_url.clone(),
            config.webhook_secret.clone(),
            Duration::from_secs(config.webhook_timeout_secs),
        )?;
        Ok(Self { db, sink, config })
    }

    pub fn with_sink(db: PgPool, config: OutboxConfig, sink: EventSink) -> Self {
        Self { db, sink, config }
    }

    /// Poll forever; sleeps only when a poll found nothing to do
    pub async fn run(self) {
        let idle = Duration::from_millis(self.config.poll_interval_ms);
        tracing::info!(batch_size = self.config.batch_size, "outbox dispatcher started");

        loop {
            match self.dispatch_batch().await {
                Ok(0) => tokio::time::sleep(idle).await,
                Ok(sent) => tracing::debug!("Dispatched {} domain events", sent),
                Err(e) => {
                    tracing::error!("Outbox dispatch failed: {}", e);
                    tokio::time::sleep(idle).await;
                }
            }
        }
    }

    /// Claim and deliver one batch. Returns the number of events delivered.
    pub async fn dispatch_batch(&self) -> AppResult<usize> {
        let events = self.claim_batch().await?;

        let mut sent = 0;
        for event in &events {
            match self.sink.deliver(event).await {
                Ok(()) => {
                    sqlx::query(
                        r#"
                        UPDATE domain_events
                        SET dispatched_at = NOW(), attempts = attempts + 1,
                            last_error = NULL, locked_until = NULL
                        WHERE id = $1
                        "#,
                    )
                    .bind(event.id)
                    .execute(&self.db)
                    .await?;
                    sent += 1;
                }
                Err(e) => {
                    // Log error but continue with the rest of the batch
                    tracing::warn!("Failed to deliver event {}: {}", event.id, e);
                    sqlx::query(
                        r#"
                        UPDATE domain_events
                        SET attempts = attempts + 1, last_error = $2, locked_until = NULL
                        WHERE id = $1
                        "#,
                    )
                    .bind(event.id)
                    .bind(e.to_string())
                    .execute(&self.db)
                    .await?;
                }
            }
        }

        Ok(sent)
    }

    /// Lease up to `batch_size` undelivered events to this dispatcher
    pub async fn claim_batch(&self) -> AppResult<Vec<OutboxEvent>> {
        let mut tx = self.db.begin().await?;

        let events = sqlx::query_as::<_, OutboxEvent>(
            r#"
            SELECT id, event_type, aggregate_type, aggregate_id, payload, attempts, created_at
            FROM domain_events
            WHERE dispatched_at IS NULL
              AND attempts < $1
              AND (locked_until IS NULL OR locked_until < NOW())
            ORDER BY created_at
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(self.config.max_attempts)
        .bind(self.config.batch_size)
        .fetch_all(&mut *tx)
        .await?;

        let ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        sqlx::query(
            r#"
            UPDATE domain_events
            SET locked_until = NOW() + make_interval(secs => $2::DOUBLE PRECISION)
            WHERE id = ANY($1)
            "#,
        )
        .bind(&ids)
        .bind(self.config.lease_secs)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(events)
    }
}
