//! Append-only audit trail for tuple writes and deletes
//!
//! Appends are best-effort: the engine logs a failed append and keeps the
//! grant or revoke that triggered it.

use crate::{error::ZanzibarError, models::PermissionTuple};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    TupleCreated,
    TupleDeleted,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TupleCreated => "tuple_created",
            Self::TupleDeleted => "tuple_deleted",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub event_type: AuditEventType,
    pub tuple: PermissionTuple,
    pub actor: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, tuple: PermissionTuple, actor: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            tuple,
            actor: actor.map(str::to_string),
            timestamp: Utc::now(),
        }
    }

    pub fn tuple_created(tuple: PermissionTuple, actor: Option<&str>) -> Self {
        Self::new(AuditEventType::TupleCreated, tuple, actor)
    }

    pub fn tuple_deleted(tuple: PermissionTuple, actor: Option<&str>) -> Self {
        Self::new(AuditEventType::TupleDeleted, tuple, actor)
    }
}

/// Destination for audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<(), ZanzibarError>;
}

/// Keeps events in memory, mostly for tests
#[derive(Default)]
pub struct InMemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditLog {
    async fn append(&self, event: AuditEvent) -> Result<(), ZanzibarError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Emits each event as a structured log line on the `audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn append(&self, event: AuditEvent) -> Result<(), ZanzibarError> {
        info!(
            target: "audit",
            event_id = %event.id,
            event_type = %event.event_type,
            tuple = %event.tuple,
            actor = ?event.actor,
            timestamp = %event.timestamp.to_rfc3339(),
            "Permission tuple audit"
        );
        Ok(())
    }
}
