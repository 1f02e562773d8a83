use crate::{error::ZanzibarError, models::*, schema::Namespace};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub mod postgres;

pub use postgres::{PostgresNamespaceRepository, PostgresTupleRepository};

/// Repository interface for storing relationship tuples
#[async_trait]
pub trait TupleRepository: Send + Sync {
    /// Exact six-field match; an absent subject relation only matches absent
    async fn direct_match(&self, tuple: &PermissionTuple) -> Result<bool, ZanzibarError>;

    /// Tuples on an object, optionally narrowed to one relation
    async fn scan(
        &self,
        namespace: &str,
        object_id: &str,
        relation: Option<&str>,
    ) -> Result<Vec<PermissionTuple>, ZanzibarError>;

    /// Tuples whose subject is `subject_namespace:subject_id`, with any subject relation
    async fn scan_by_subject(
        &self,
        subject_namespace: &str,
        subject_id: &str,
        relation: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<Vec<PermissionTuple>, ZanzibarError>;

    /// Store a new tuple. An exact duplicate is rejected, never overwritten.
    async fn write(
        &self,
        tuple: PermissionTuple,
        actor: Option<&str>,
    ) -> Result<StoredTuple, ZanzibarError>;

    /// Remove an exact match, returning whether anything was removed
    async fn delete(&self, tuple: &PermissionTuple) -> Result<bool, ZanzibarError>;
}

/// Repository interface for user-defined namespaces
#[async_trait]
pub trait NamespaceRepository: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Namespace>, ZanzibarError>;

    async fn put(&self, namespace: Namespace) -> Result<(), ZanzibarError>;

    async fn list(&self) -> Result<Vec<Namespace>, ZanzibarError>;
}

/// In-memory tuple repository for testing and development
pub struct InMemoryTupleRepository {
    tuples: Arc<DashMap<PermissionTuple, (u64, StoredTuple)>>,
    sequence: AtomicU64,
}

impl InMemoryTupleRepository {
    pub fn new() -> Self {
        Self {
            tuples: Arc::new(DashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Matching tuples in insertion order
    fn collect<F>(&self, predicate: F) -> Vec<PermissionTuple>
    where
        F: Fn(&PermissionTuple) -> bool,
    {
        let mut matched: Vec<(u64, PermissionTuple)> = self
            .tuples
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| (entry.value().0, entry.key().clone()))
            .collect();
        matched.sort_by_key(|(seq, _)| *seq);
        matched.into_iter().map(|(_, tuple)| tuple).collect()
    }
}

impl Default for InMemoryTupleRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TupleRepository for InMemoryTupleRepository {
    async fn direct_match(&self, tuple: &PermissionTuple) -> Result<bool, ZanzibarError> {
        Ok(self.tuples.contains_key(tuple))
    }

    async fn scan(
        &self,
        namespace: &str,
        object_id: &str,
        relation: Option<&str>,
    ) -> Result<Vec<PermissionTuple>, ZanzibarError> {
        Ok(self.collect(|t| {
            t.namespace == namespace
                && t.object_id == object_id
                && relation.map_or(true, |r| t.relation == r)
        }))
    }

    async fn scan_by_subject(
        &self,
        subject_namespace: &str,
        subject_id: &str,
        relation: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<Vec<PermissionTuple>, ZanzibarError> {
        Ok(self.collect(|t| {
            t.subject_namespace == subject_namespace
                && t.subject_id == subject_id
                && relation.map_or(true, |r| t.relation == r)
                && namespace.map_or(true, |n| t.namespace == n)
        }))
    }

    async fn write(
        &self,
        tuple: PermissionTuple,
        actor: Option<&str>,
    ) -> Result<StoredTuple, ZanzibarError> {
        match self.tuples.entry(tuple.clone()) {
            Entry::Occupied(_) => Err(ZanzibarError::DuplicateTuple(tuple.to_string())),
            Entry::Vacant(slot) => {
                let stored = StoredTuple {
                    tuple,
                    created_at: Utc::now(),
                    created_by: actor.map(str::to_string),
                };
                let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
                slot.insert((seq, stored.clone()));
                Ok(stored)
            }
        }
    }

    async fn delete(&self, tuple: &PermissionTuple) -> Result<bool, ZanzibarError> {
        Ok(self.tuples.remove(tuple).is_some())
    }
}

/// In-memory namespace store for testing and development
#[derive(Default)]
pub struct InMemoryNamespaceRepository {
    namespaces: DashMap<String, Namespace>,
}

impl InMemoryNamespaceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NamespaceRepository for InMemoryNamespaceRepository {
    async fn get(&self, name: &str) -> Result<Option<Namespace>, ZanzibarError> {
        Ok(self.namespaces.get(name).map(|entry| entry.value().clone()))
    }

    async fn put(&self, namespace: Namespace) -> Result<(), ZanzibarError> {
        self.namespaces.insert(namespace.name.clone(), namespace);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Namespace>, ZanzibarError> {
        let mut namespaces: Vec<Namespace> =
            self.namespaces.iter().map(|entry| entry.value().clone()).collect();
        namespaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(namespaces)
    }
}

/// Tuple store that can be switched into failing every call
#[cfg(test)]
pub(crate) struct FailingTupleRepository {
    inner: InMemoryTupleRepository,
    failing: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl FailingTupleRepository {
    pub(crate) fn new(failing: bool) -> Self {
        Self {
            inner: InMemoryTupleRepository::new(),
            failing: std::sync::atomic::AtomicBool::new(failing),
        }
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn guard(&self) -> Result<(), ZanzibarError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ZanzibarError::StorageError("connection refused".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[async_trait]
impl TupleRepository for FailingTupleRepository {
    async fn direct_match(&self, tuple: &PermissionTuple) -> Result<bool, ZanzibarError> {
        self.guard()?;
        self.inner.direct_match(tuple).await
    }

    async fn scan(
        &self,
        namespace: &str,
        object_id: &str,
        relation: Option<&str>,
    ) -> Result<Vec<PermissionTuple>, ZanzibarError> {
        self.guard()?;
        self.inner.scan(namespace, object_id, relation).await
    }

    async fn scan_by_subject(
        &self,
        subject_namespace: &str,
        subject_id: &str,
        relation: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<Vec<PermissionTuple>, ZanzibarError> {
        self.guard()?;
        self.inner
            .scan_by_subject(subject_namespace, subject_id, relation, namespace)
            .await
    }

    async fn write(
        &self,
        tuple: PermissionTuple,
        actor: Option<&str>,
    ) -> Result<StoredTuple, ZanzibarError> {
        self.guard()?;
        self.inner.write(tuple, actor).await
    }

    async fn delete(&self, tuple: &PermissionTuple) -> Result<bool, ZanzibarError> {
        self.guard()?;
        self.inner.delete(tuple).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RelationDefinition;

    fn doc_tuple(relation: &str, subject: Subject) -> PermissionTuple {
        PermissionTuple::new(&Object::new("document", "doc1"), relation, &subject)
    }

    #[tokio::test]
    async fn test_in_memory_repository() {
        let repo = InMemoryTupleRepository::new();
        let tuple = doc_tuple("editor", Subject::user("alice"));

        // Write tuple
        let stored = repo.write(tuple.clone(), Some("admin")).await.unwrap();
        assert_eq!(stored.created_by.as_deref(), Some("admin"));

        // Check it exists
        assert!(repo.direct_match(&tuple).await.unwrap());

        // Read tuples
        let tuples = repo.scan_by_subject("user", "alice", None, None).await.unwrap();
        assert_eq!(tuples, vec![tuple.clone()]);

        // Delete tuple
        assert!(repo.delete(&tuple).await.unwrap());
        assert!(!repo.direct_match(&tuple).await.unwrap());
        assert!(!repo.delete(&tuple).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_write_rejected() {
        let repo = InMemoryTupleRepository::new();
        let tuple = doc_tuple("viewer", Subject::user("alice"));

        repo.write(tuple.clone(), None).await.unwrap();
        let second = repo.write(tuple, Some("someone-else")).await;

        assert!(matches!(second, Err(ZanzibarError::DuplicateTuple(_))));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_null_subject_relation_is_not_a_wildcard() {
        let repo = InMemoryTupleRepository::new();
        repo.write(doc_tuple("viewer", Subject::userset("group", "eng", "member")), None)
            .await
            .unwrap();

        assert!(!repo
            .direct_match(&doc_tuple("viewer", Subject::new("group", "eng")))
            .await
            .unwrap());
        assert!(repo
            .direct_match(&doc_tuple("viewer", Subject::userset("group", "eng", "member")))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_scan_filters_and_order() {
        let repo = InMemoryTupleRepository::new();
        repo.write(doc_tuple("viewer", Subject::user("bob")), None).await.unwrap();
        repo.write(doc_tuple("editor", Subject::user("alice")), None).await.unwrap();
        repo.write(doc_tuple("viewer", Subject::user("alice")), None).await.unwrap();
        repo.write(
            PermissionTuple::new(
                &Object::new("document", "doc2"),
                "viewer",
                &Subject::user("alice"),
            ),
            None,
        )
        .await
        .unwrap();

        let viewers = repo.scan("document", "doc1", Some("viewer")).await.unwrap();
        let ids: Vec<_> = viewers.iter().map(|t| t.subject_id.as_str()).collect();
        assert_eq!(ids, vec!["bob", "alice"]);

        assert_eq!(repo.scan("document", "doc1", None).await.unwrap().len(), 3);
        assert_eq!(
            repo.scan_by_subject("user", "alice", Some("viewer"), Some("document"))
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_namespace_repository() {
        let repo = InMemoryNamespaceRepository::new();
        assert!(repo.get("folder").await.unwrap().is_none());

        repo.put(Namespace::new("folder", vec![RelationDefinition::direct("viewer", &[])]))
            .await
            .unwrap();
        repo.put(Namespace::new("board", vec![])).await.unwrap();

        assert!(repo.get("folder").await.unwrap().is_some());
        let names: Vec<_> = repo.list().await.unwrap().into_iter().map(|n| n.name).collect();
        assert_eq!(names, vec!["board", "folder"]);
    }
}
