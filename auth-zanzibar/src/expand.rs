use crate::{
    error::ZanzibarError,
    models::*,
    registry::NamespaceRegistry,
    repository::TupleRepository,
    schema::{Rewrite, UsersetRef},
};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const DEFAULT_EXPAND_DEPTH: u32 = 10;

/// Per-call expansion state
#[derive(Debug, Default)]
struct Expansion {
    /// Usersets on the current branch
    path: HashSet<String>,
    /// Usersets expanded without hitting a cycle or the depth limit, with
    /// the depth they were expanded at; reusable at that depth or shallower
    complete: HashMap<String, (u32, Vec<SubjectTree>)>,
    /// Cycle and depth cuts so far
    cuts: usize,
}

/// Subject expander finds all subjects with a given relation to an object
pub struct SubjectExpander {
    repository: Arc<dyn TupleRepository>,
    registry: Arc<NamespaceRegistry>,
    default_depth: u32,
}

impl SubjectExpander {
    pub fn new(repository: Arc<dyn TupleRepository>, registry: Arc<NamespaceRegistry>) -> Self {
        Self {
            repository,
            registry,
            default_depth: DEFAULT_EXPAND_DEPTH,
        }
    }

    pub fn with_default_depth(mut self, depth: u32) -> Self {
        self.default_depth = depth;
        self
    }

    /// Expand all subjects that have the specified relation to an object.
    ///
    /// The root node is the userset `namespace:object_id#relation`. Branches
    /// deeper than `max_depth`, or leading back to a userset on the same
    /// branch, come back with no children. A userset reached twice through
    /// different branches is expanded in both places.
    pub async fn expand(
        &self,
        namespace: &str,
        object_id: &str,
        relation: &str,
        max_depth: Option<u32>,
    ) -> Result<SubjectTree, ZanzibarError> {
        let max_depth = max_depth.unwrap_or(self.default_depth);
        let mut expansion = Expansion::default();

        let children = self
            .expand_children(
                namespace.to_string(),
                object_id.to_string(),
                relation.to_string(),
                &mut expansion,
                0,
                max_depth,
            )
            .await?;

        Ok(SubjectTree::userset(namespace, object_id, relation, children))
    }

    fn expand_children<'a>(
        &'a self,
        namespace: String,
        object_id: String,
        relation: String,
        expansion: &'a mut Expansion,
        depth: u32,
        max_depth: u32,
    ) -> BoxFuture<'a, Result<Vec<SubjectTree>, ZanzibarError>> {
        Box::pin(async move {
            let key = format!("{}:{}#{}", namespace, object_id, relation);
            if let Some((expanded_at, children)) = expansion.complete.get(&key) {
                if depth <= *expanded_at {
                    return Ok(children.clone());
                }
            }
            if depth >= max_depth {
                debug!("Expand depth {} reached at {}", max_depth, key);
                expansion.cuts += 1;
                return Ok(Vec::new());
            }
            if expansion.path.contains(&key) {
                debug!("Expand cycle at {}", key);
                expansion.cuts += 1;
                return Ok(Vec::new());
            }

            debug!("Expanding: {}", key);
            let cuts_before = expansion.cuts;
            expansion.path.insert(key.clone());
            let result = self
                .expand_rewrite(namespace, object_id, relation, expansion, depth, max_depth)
                .await;
            expansion.path.remove(&key);

            let children = result?;
            if expansion.cuts == cuts_before {
                expansion.complete.insert(key, (depth, children.clone()));
            }
            Ok(children)
        })
    }

    /// Stored tuples plus whatever the relation's rewrite contributes
    async fn expand_rewrite(
        &self,
        namespace: String,
        object_id: String,
        relation: String,
        expansion: &mut Expansion,
        depth: u32,
        max_depth: u32,
    ) -> Result<Vec<SubjectTree>, ZanzibarError> {
        let mut children = Vec::new();

        // Stored tuples; userset subjects are expanded in place
        let tuples = self
            .repository
            .scan(&namespace, &object_id, Some(&relation))
            .await?;
        for tuple in tuples {
            let node = match tuple.subject_relation {
                Some(ref userset_relation) => {
                    let grandchildren = self
                        .expand_children(
                            tuple.subject_namespace.clone(),
                            tuple.subject_id.clone(),
                            userset_relation.clone(),
                            expansion,
                            depth + 1,
                            max_depth,
                        )
                        .await?;
                    SubjectTree::userset(
                        &tuple.subject_namespace,
                        &tuple.subject_id,
                        userset_relation,
                        grandchildren,
                    )
                }
                None => SubjectTree::leaf(tuple.subject()),
            };
            merge(&mut children, node);
        }

        let Some(ns) = self.registry.get(&namespace).await? else {
            return Ok(children);
        };
        let Some(definition) = ns.relation(&relation) else {
            return Ok(children);
        };

        match &definition.rewrite {
            Rewrite::Union { children: branches } => {
                for branch in branches {
                    match branch {
                        UsersetRef::This => {}
                        UsersetRef::Computed { relation: computed } => {
                            let merged = self
                                .expand_children(
                                    namespace.clone(),
                                    object_id.clone(),
                                    computed.clone(),
                                    expansion,
                                    depth + 1,
                                    max_depth,
                                )
                                .await?;
                            for node in merged {
                                merge(&mut children, node);
                            }
                        }
                        UsersetRef::TupleToUserset {
                            tupleset,
                            computed_relation,
                        } => {
                            for node in self
                                .expand_tupleset(
                                    &namespace,
                                    &object_id,
                                    tupleset,
                                    computed_relation,
                                    expansion,
                                    depth,
                                    max_depth,
                                )
                                .await?
                            {
                                merge(&mut children, node);
                            }
                        }
                    }
                }
            }
            Rewrite::TupleToUserset {
                tupleset,
                computed_relation,
            } => {
                for node in self
                    .expand_tupleset(
                        &namespace,
                        &object_id,
                        tupleset,
                        computed_relation,
                        expansion,
                        depth,
                        max_depth,
                    )
                    .await?
                {
                    merge(&mut children, node);
                }
            }
            // Intersection and exclusion are not set-expanded; only their
            // stored tuples show up
            Rewrite::Direct { .. } | Rewrite::Intersection { .. } | Rewrite::Exclusion { .. } => {}
        }

        Ok(children)
    }

    /// One userset node per related object, e.g. `organization:acme#member`
    #[allow(clippy::too_many_arguments)]
    async fn expand_tupleset(
        &self,
        namespace: &str,
        object_id: &str,
        tupleset: &str,
        computed_relation: &str,
        expansion: &mut Expansion,
        depth: u32,
        max_depth: u32,
    ) -> Result<Vec<SubjectTree>, ZanzibarError> {
        let parents = self.repository.scan(namespace, object_id, Some(tupleset)).await?;
        let mut nodes = Vec::with_capacity(parents.len());
        for parent in parents {
            let grandchildren = self
                .expand_children(
                    parent.subject_namespace.clone(),
                    parent.subject_id.clone(),
                    computed_relation.to_string(),
                    expansion,
                    depth + 1,
                    max_depth,
                )
                .await?;
            nodes.push(SubjectTree::userset(
                &parent.subject_namespace,
                &parent.subject_id,
                computed_relation,
                grandchildren,
            ));
        }
        Ok(nodes)
    }

    /// List all distinct concrete subjects with the given relation to an object
    pub async fn list_subjects(
        &self,
        namespace: &str,
        object_id: &str,
        relation: &str,
    ) -> Result<Vec<Subject>, ZanzibarError> {
        let tree = self.expand(namespace, object_id, relation, None).await?;
        let mut subjects = Vec::new();
        flatten_tree(&tree, &mut subjects);
        Ok(subjects)
    }
}

/// Add `node` unless an identical subject is already present
fn merge(children: &mut Vec<SubjectTree>, node: SubjectTree) {
    match children.iter_mut().find(|existing| existing.same_subject(&node)) {
        Some(existing) => {
            if let (Some(existing_children), Some(new_children)) =
                (existing.children.as_mut(), node.children)
            {
                for child in new_children {
                    merge(existing_children, child);
                }
            }
        }
        None => children.push(node),
    }
}

fn flatten_tree(tree: &SubjectTree, subjects: &mut Vec<Subject>) {
    match &tree.children {
        None => {
            let subject = tree.subject();
            if !subjects.contains(&subject) {
                subjects.push(subject);
            }
        }
        Some(children) => {
            for child in children {
                flatten_tree(child, subjects);
            }
        }
    }
}
