use crate::{
    error::ZanzibarError,
    repository::{InMemoryNamespaceRepository, NamespaceRepository},
    schema::{builtin_namespaces, Namespace},
};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Namespace schema lookup.
///
/// Built-in namespaces live in a fixed map and shadow any store-defined
/// namespace with the same name. Store-defined namespaces are kept in an
/// overlay that is filled by `load`, `upsert` and lookup misses.
pub struct NamespaceRegistry {
    builtins: HashMap<String, Arc<Namespace>>,
    overlay: DashMap<String, Arc<Namespace>>,
    store: Arc<dyn NamespaceRepository>,
}

impl NamespaceRegistry {
    /// Registry with the built-in namespaces over the given store
    pub fn new(store: Arc<dyn NamespaceRepository>) -> Self {
        let builtins = builtin_namespaces()
            .into_iter()
            .map(|namespace| (namespace.name.clone(), Arc::new(namespace)))
            .collect();
        Self {
            builtins,
            overlay: DashMap::new(),
            store,
        }
    }

    /// Registry without built-ins
    pub fn without_builtins(store: Arc<dyn NamespaceRepository>) -> Self {
        Self {
            builtins: HashMap::new(),
            overlay: DashMap::new(),
            store,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryNamespaceRepository::new()))
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins.contains_key(name)
    }

    /// Pull every stored namespace into the overlay
    pub async fn load(&self) -> Result<usize, ZanzibarError> {
        let namespaces = self.store.list().await?;
        let count = namespaces.len();
        for namespace in namespaces {
            if self.is_builtin(&namespace.name) {
                warn!("Stored namespace '{}' is shadowed by a built-in", namespace.name);
            }
            self.overlay.insert(namespace.name.clone(), Arc::new(namespace));
        }
        info!("Loaded {} namespaces from store", count);
        Ok(count)
    }

    pub async fn get(&self, name: &str) -> Result<Option<Arc<Namespace>>, ZanzibarError> {
        if let Some(namespace) = self.builtins.get(name) {
            return Ok(Some(namespace.clone()));
        }
        if let Some(namespace) = self.overlay.get(name) {
            return Ok(Some(namespace.value().clone()));
        }

        debug!("Namespace '{}' not in memory, asking store", name);
        match self.store.get(name).await? {
            Some(namespace) => {
                let namespace = Arc::new(namespace);
                self.overlay.insert(name.to_string(), namespace.clone());
                Ok(Some(namespace))
            }
            None => Ok(None),
        }
    }

    /// Validate and persist a namespace definition
    pub async fn upsert(&self, namespace: Namespace) -> Result<(), ZanzibarError> {
        namespace.validate()?;
        if self.is_builtin(&namespace.name) {
            warn!(
                "Namespace '{}' is built in; the stored definition will not take effect",
                namespace.name
            );
        }

        self.store.put(namespace.clone()).await?;
        info!("Upserted namespace '{}' ({} relations)", namespace.name, namespace.relations.len());
        self.overlay.insert(namespace.name.clone(), Arc::new(namespace));
        Ok(())
    }

    /// Every known namespace, built-ins winning on name collision
    pub fn list(&self) -> Vec<Arc<Namespace>> {
        let mut merged: BTreeMap<String, Arc<Namespace>> = self
            .overlay
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (name, namespace) in &self.builtins {
            merged.insert(name.clone(), namespace.clone());
        }
        merged.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RelationDefinition;

    #[tokio::test]
    async fn test_builtins_available_with_empty_store() {
        let registry = NamespaceRegistry::in_memory();
        for name in ["organization", "project", "document"] {
            assert!(registry.get(name).await.unwrap().is_some(), "{} should be built in", name);
        }
        assert!(registry.get("folder").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_builtin_wins_on_collision() {
        let store = Arc::new(InMemoryNamespaceRepository::new());
        store
            .put(Namespace::new("organization", vec![RelationDefinition::direct("only", &[])]))
            .await
            .unwrap();

        let registry = NamespaceRegistry::new(store);
        registry.load().await.unwrap();

        let organization = registry.get("organization").await.unwrap().unwrap();
        assert!(organization.relation("member").is_some());
        assert!(organization.relation("only").is_none());

        let listed: Vec<_> = registry.list().iter().map(|n| n.name.clone()).collect();
        assert_eq!(listed, vec!["document", "organization", "project"]);
    }

    #[tokio::test]
    async fn test_lookup_falls_back_to_store() {
        let store = Arc::new(InMemoryNamespaceRepository::new());
        let registry = NamespaceRegistry::new(store.clone());

        store
            .put(Namespace::new("folder", vec![RelationDefinition::direct("viewer", &[])]))
            .await
            .unwrap();

        let folder = registry.get("folder").await.unwrap().unwrap();
        assert_eq!(folder.name, "folder");
        assert_eq!(registry.list().len(), 4);
    }

    #[tokio::test]
    async fn test_upsert_rejects_invalid_namespace() {
        let registry =
            NamespaceRegistry::without_builtins(Arc::new(InMemoryNamespaceRepository::new()));
        let invalid = Namespace::new(
            "folder",
            vec![RelationDefinition::union("viewer", vec!["missing".into()])],
        );
        assert!(matches!(
            registry.upsert(invalid).await,
            Err(ZanzibarError::InvalidSchema(_))
        ));
        assert!(registry.list().is_empty());
    }
}
