//! Zanzibar-style authorization engine
//!
//! This crate implements relationship-based access control (ReBAC):
//! - Relationship tuples stored in memory or PostgreSQL
//! - Namespace schemas with union, intersection, exclusion and tuple-to-userset rewrites
//! - Permission checks with cycle detection and a bounded recursion depth
//! - A TTL result cache invalidated per object on every write
//! - Subject expansion into trees for "who has access" queries
//! - Best-effort audit events for tuple writes and deletes
//!
//! # Core Concepts
//!
//! - **Object**: Any resource that can be protected (e.g., document, project, organization)
//! - **Subject**: Any entity that can hold a relation, or a userset such as `group:eng#member`
//! - **Relation**: A named relationship defined by a namespace (e.g., owner, editor, viewer)
//! - **Tuple**: A relationship statement: "subject has relation to object"
//!
//! # Example
//!
//! ```rust
//! use auth_zanzibar::{
//!     AuthorizationEngine, CheckRequest, InMemoryTupleRepository, Object, PermissionTuple,
//!     Subject,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = AuthorizationEngine::new(Arc::new(InMemoryTupleRepository::new())).await?;
//!
//!     let acme = Object::new("organization", "acme");
//!     let tuple = PermissionTuple::new(&acme, "owner", &Subject::user("alice"));
//!     engine.write_tuple(tuple, Some("bootstrap")).await?;
//!
//!     // owner implies admin implies member
//!     let result = engine
//!         .check(CheckRequest::new(&acme, "member", &Subject::user("alice")))
//!         .await;
//!     assert!(result.allowed);
//!
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod cache;
pub mod check;
pub mod config;
pub mod engine;
pub mod error;
pub mod expand;
pub mod models;
pub mod registry;
pub mod repository;
pub mod schema;
pub mod telemetry;

pub use audit::{AuditEvent, AuditEventType, AuditSink, InMemoryAuditLog, TracingAuditSink};
pub use cache::{CheckCache, NoopCache, TtlCache};
pub use check::{CheckOutcome, PermissionChecker};
pub use crate::config::{EngineConfig, LoggingConfig};
pub use engine::*;
pub use error::ZanzibarError;
pub use expand::SubjectExpander;
pub use models::*;
pub use registry::NamespaceRegistry;
pub use repository::{
    InMemoryNamespaceRepository, InMemoryTupleRepository, NamespaceRepository,
    PostgresNamespaceRepository, PostgresTupleRepository, TupleRepository,
};
pub use schema::*;
pub use telemetry::init_tracing;
