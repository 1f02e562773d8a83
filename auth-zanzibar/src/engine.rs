use crate::{
    audit::{AuditEvent, AuditSink, TracingAuditSink},
    cache::{CheckCache, NoopCache, TtlCache},
    check::PermissionChecker,
    config::EngineConfig,
    error::ZanzibarError,
    expand::SubjectExpander,
    models::*,
    registry::NamespaceRegistry,
    repository::{
        postgres::{self, PostgresAuditSink},
        InMemoryNamespaceRepository, InMemoryTupleRepository, NamespaceRepository,
        PostgresNamespaceRepository, PostgresTupleRepository, TupleRepository,
    },
    schema::Namespace,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Core Zanzibar authorization engine
pub struct AuthorizationEngine {
    /// Storage for relationship tuples
    repository: Arc<dyn TupleRepository>,

    /// Built-in and stored namespace definitions
    registry: Arc<NamespaceRegistry>,

    /// Permission checker for authorization queries
    checker: PermissionChecker,

    /// Subject expander for listing subjects
    expander: SubjectExpander,

    /// Cache for permission checks
    cache: Arc<dyn CheckCache>,

    /// Destination for tuple audit events; `None` when auditing is off
    audit: Option<Arc<dyn AuditSink>>,

    config: EngineConfig,
}

/// Assembles an engine around a tuple repository
pub struct EngineBuilder {
    repository: Arc<dyn TupleRepository>,
    namespaces: Option<Arc<dyn NamespaceRepository>>,
    audit: Option<Arc<dyn AuditSink>>,
    cache: Option<Arc<dyn CheckCache>>,
    config: EngineConfig,
}

impl EngineBuilder {
    /// Durable store for user-defined namespaces (in-memory by default)
    pub fn namespaces(mut self, store: Arc<dyn NamespaceRepository>) -> Self {
        self.namespaces = Some(store);
        self
    }

    /// Audit destination (structured logs by default)
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Replace the cache chosen from the config
    pub fn cache(mut self, cache: Arc<dyn CheckCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn build(self) -> Result<AuthorizationEngine, ZanzibarError> {
        let config = self.config;
        config.validate()?;

        let store: Arc<dyn NamespaceRepository> = match self.namespaces {
            Some(store) => store,
            None => Arc::new(InMemoryNamespaceRepository::new()),
        };
        let registry = if config.load_builtin_namespaces {
            NamespaceRegistry::new(store)
        } else {
            NamespaceRegistry::without_builtins(store)
        };
        registry.load().await?;
        let registry = Arc::new(registry);

        let cache: Arc<dyn CheckCache> = match self.cache {
            Some(cache) => cache,
            None if config.cache_enabled => Arc::new(TtlCache::new(config.cache_ttl())),
            None => Arc::new(NoopCache),
        };

        let audit: Option<Arc<dyn AuditSink>> = if config.audit_enabled {
            match self.audit {
                Some(sink) => Some(sink),
                None => Some(Arc::new(TracingAuditSink)),
            }
        } else {
            None
        };

        let checker = PermissionChecker::new(self.repository.clone(), registry.clone())
            .with_max_depth(config.max_check_depth);
        let expander = SubjectExpander::new(self.repository.clone(), registry.clone())
            .with_default_depth(config.expand_max_depth);

        Ok(AuthorizationEngine {
            repository: self.repository,
            registry,
            checker,
            expander,
            cache,
            audit,
            config,
        })
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

impl AuthorizationEngine {
    /// Create a new authorization engine with the given repository and defaults
    pub async fn new(repository: Arc<dyn TupleRepository>) -> Result<Self, ZanzibarError> {
        Self::builder(repository).build().await
    }

    pub fn builder(repository: Arc<dyn TupleRepository>) -> EngineBuilder {
        EngineBuilder {
            repository,
            namespaces: None,
            audit: None,
            cache: None,
            config: EngineConfig::default(),
        }
    }

    /// Build from configuration: PostgreSQL stores when `database_url` is
    /// set, in-memory stores otherwise
    pub async fn connect(config: EngineConfig) -> Result<Self, ZanzibarError> {
        match config.database_url.clone() {
            Some(url) => {
                let pool = postgres::connect(&url, config.database_max_connections).await?;
                postgres::run_migrations(&pool).await?;
                info!("Authorization engine using PostgreSQL storage");

                Self::builder(Arc::new(PostgresTupleRepository::new(pool.clone())))
                    .namespaces(Arc::new(PostgresNamespaceRepository::new(pool.clone())))
                    .audit_sink(Arc::new(PostgresAuditSink::new(pool)))
                    .config(config)
                    .build()
                    .await
            }
            None => {
                info!("Authorization engine using in-memory storage");
                Self::builder(Arc::new(InMemoryTupleRepository::new()))
                    .config(config)
                    .build()
                    .await
            }
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> Arc<dyn CheckCache> {
        self.cache.clone()
    }

    // =============================================================================
    // Core Authorization Operations
    // =============================================================================

    /// Check if a subject holds a relation on an object.
    ///
    /// Never fails: store errors are logged and deny.
    pub async fn check(&self, request: CheckRequest) -> CheckResult {
        let started = Instant::now();
        let key = request.to_string();

        // Check cache first
        if let Some(allowed) = self.cache.get(&key) {
            debug!("Cache hit for permission check: {}", key);
            return CheckResult {
                allowed,
                cached: true,
                path: Vec::new(),
                duration_ms: elapsed_ms(started),
            };
        }

        let generation = self.cache.generation();
        match self.checker.check(&request).await {
            Ok(outcome) => {
                self.cache
                    .put_with_dependencies(
                        &key,
                        outcome.allowed,
                        &outcome.dependencies,
                        generation,
                    );
                debug!("Check {} -> {}", key, outcome.allowed);
                CheckResult {
                    allowed: outcome.allowed,
                    cached: false,
                    path: outcome.path,
                    duration_ms: elapsed_ms(started),
                }
            }
            Err(err) => {
                error!(error = %err, check = %key, "Permission check failed; denying");
                CheckResult::denied(elapsed_ms(started))
            }
        }
    }

    /// Batch check multiple permissions at once
    pub async fn batch_check(&self, requests: Vec<CheckRequest>) -> Vec<CheckResult> {
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            responses.push(self.check(request).await);
        }
        responses
    }

    // =============================================================================
    // Tuple Management
    // =============================================================================

    /// Write a relationship tuple
    pub async fn write_tuple(
        &self,
        tuple: PermissionTuple,
        actor: Option<&str>,
    ) -> Result<StoredTuple, ZanzibarError> {
        tuple.validate().map_err(ZanzibarError::InvalidTuple)?;

        let namespace = self
            .registry
            .get(&tuple.namespace)
            .await?
            .ok_or_else(|| ZanzibarError::UnknownNamespace(tuple.namespace.clone()))?;

        if let Some(definition) = namespace.relation(&tuple.relation) {
            if !definition.allows_subject(&tuple.subject()) {
                return Err(ZanzibarError::InvalidTuple(format!(
                    "Relation '{}#{}' does not accept subject '{}'",
                    tuple.namespace,
                    tuple.relation,
                    tuple.subject()
                )));
            }
        }

        info!("Writing tuple: {}", tuple);
        let stored = self.repository.write(tuple.clone(), actor).await?;

        self.cache.invalidate_prefix(&tuple.namespace, &tuple.object_id);
        self.append_audit(AuditEvent::tuple_created(tuple, actor)).await;

        Ok(stored)
    }

    /// Delete a relationship tuple, returning whether it existed
    pub async fn delete_tuple(
        &self,
        tuple: &PermissionTuple,
        actor: Option<&str>,
    ) -> Result<bool, ZanzibarError> {
        info!("Deleting tuple: {}", tuple);

        let deleted = self.repository.delete(tuple).await?;
        if deleted {
            self.cache.invalidate_prefix(&tuple.namespace, &tuple.object_id);
            self.append_audit(AuditEvent::tuple_deleted(tuple.clone(), actor)).await;
        } else {
            debug!("Tuple {} did not exist", tuple);
        }
        Ok(deleted)
    }

    /// Read tuples on an object
    pub async fn list_tuples(
        &self,
        namespace: &str,
        object_id: &str,
        relation: Option<&str>,
    ) -> Result<Vec<PermissionTuple>, ZanzibarError> {
        self.repository.scan(namespace, object_id, relation).await
    }

    /// Objects a subject is directly related to
    pub async fn list_subject_access(
        &self,
        subject_namespace: &str,
        subject_id: &str,
        relation: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<Vec<SubjectAccess>, ZanzibarError> {
        let tuples = self
            .repository
            .scan_by_subject(subject_namespace, subject_id, relation, namespace)
            .await?;

        let mut seen = HashSet::new();
        Ok(tuples
            .into_iter()
            .map(|t| SubjectAccess {
                namespace: t.namespace,
                object_id: t.object_id,
                relation: t.relation,
            })
            .filter(|access| seen.insert(access.clone()))
            .collect())
    }

    async fn append_audit(&self, event: AuditEvent) {
        let Some(sink) = &self.audit else {
            return;
        };
        let event_id = event.id;
        if let Err(err) = sink.append(event).await {
            warn!(
                error = %err,
                event_id = %event_id,
                "Failed to append audit event; change is kept"
            );
        }
    }

    // =============================================================================
    // Permission Expansion
    // =============================================================================

    /// Expand all subjects that have a relation to an object
    pub async fn expand(
        &self,
        namespace: &str,
        object_id: &str,
        relation: &str,
        max_depth: Option<u32>,
    ) -> Result<SubjectTree, ZanzibarError> {
        self.expander.expand(namespace, object_id, relation, max_depth).await
    }

    /// Distinct concrete subjects holding a relation on an object
    pub async fn list_subjects(
        &self,
        namespace: &str,
        object_id: &str,
        relation: &str,
    ) -> Result<Vec<Subject>, ZanzibarError> {
        self.expander.list_subjects(namespace, object_id, relation).await
    }

    // =============================================================================
    // Schema Management
    // =============================================================================

    pub async fn get_namespace(&self, name: &str) -> Result<Option<Arc<Namespace>>, ZanzibarError> {
        self.registry.get(name).await
    }

    /// Validate and store a namespace. Cached results are dropped since any
    /// relation rule may have changed.
    pub async fn upsert_namespace(&self, namespace: Namespace) -> Result<(), ZanzibarError> {
        self.registry.upsert(namespace).await?;
        self.cache.clear();
        Ok(())
    }

    pub fn list_namespaces(&self) -> Vec<Arc<Namespace>> {
        self.registry.list()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    // =============================================================================
    // Convenience wrappers for user principals
    // =============================================================================

    pub async fn can_view(&self, user_id: &str, namespace: &str, object_id: &str) -> bool {
        self.check_user(user_id, namespace, object_id, "can_view").await
    }

    pub async fn can_edit(&self, user_id: &str, namespace: &str, object_id: &str) -> bool {
        self.check_user(user_id, namespace, object_id, "can_edit").await
    }

    pub async fn can_delete(&self, user_id: &str, namespace: &str, object_id: &str) -> bool {
        self.check_user(user_id, namespace, object_id, "can_delete").await
    }

    async fn check_user(
        &self,
        user_id: &str,
        namespace: &str,
        object_id: &str,
        relation: &str,
    ) -> bool {
        let request = CheckRequest::new(
            &Object::new(namespace, object_id),
            relation,
            &Subject::user(user_id),
        );
        self.check(request).await.allowed
    }

    pub async fn grant_permission(
        &self,
        namespace: &str,
        object_id: &str,
        relation: &str,
        user_id: &str,
        granted_by: Option<&str>,
    ) -> Result<StoredTuple, ZanzibarError> {
        let tuple = PermissionTuple::new(
            &Object::new(namespace, object_id),
            relation,
            &Subject::user(user_id),
        );
        self.write_tuple(tuple, granted_by).await
    }

    pub async fn revoke_permission(
        &self,
        namespace: &str,
        object_id: &str,
        relation: &str,
        user_id: &str,
        revoked_by: Option<&str>,
    ) -> Result<bool, ZanzibarError> {
        let tuple = PermissionTuple::new(
            &Object::new(namespace, object_id),
            relation,
            &Subject::user(user_id),
        );
        self.delete_tuple(&tuple, revoked_by).await
    }
}
