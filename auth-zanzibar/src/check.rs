use crate::{
    error::ZanzibarError,
    models::*,
    registry::NamespaceRegistry,
    repository::TupleRepository,
    schema::{Rewrite, UsersetRef},
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const DEFAULT_MAX_CHECK_DEPTH: u32 = 32;

/// Per-call traversal state, threaded by `&mut` through every branch
#[derive(Debug, Default)]
struct Traversal {
    /// Keys on the current recursion path
    path: HashSet<String>,
    /// Finished keys whose result does not depend on a cycle cut
    resolved: HashMap<String, bool>,
    cycle_cuts: usize,
    depth: u32,
    /// Keys of granting frames, innermost first
    trail: Vec<String>,
    /// `namespace:object#` prefixes read from the store
    touched: BTreeSet<String>,
}

impl Traversal {
    fn touch(&mut self, namespace: &str, object_id: &str) {
        self.touched.insert(object_prefix(namespace, object_id));
    }
}

/// Outcome of one evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub allowed: bool,
    /// Visitation keys of the granting chain, outermost first
    pub path: Vec<String>,
    /// Object prefixes the evaluation read, for cache invalidation
    pub dependencies: Vec<String>,
}

/// Permission checker performs authorization checks with support for:
/// - Direct tuples
/// - Union, intersection and exclusion of relations
/// - Tuple-to-userset hops to related objects
/// - Userset subjects (e.g., "all members of group:eng are viewers")
pub struct PermissionChecker {
    repository: Arc<dyn TupleRepository>,
    registry: Arc<NamespaceRegistry>,
    max_depth: u32,
}

impl PermissionChecker {
    pub fn new(repository: Arc<dyn TupleRepository>, registry: Arc<NamespaceRegistry>) -> Self {
        Self {
            repository,
            registry,
            max_depth: DEFAULT_MAX_CHECK_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Check if the request's subject holds the relation on the object.
    ///
    /// Store errors are returned; turning them into a denial is up to the caller.
    pub async fn check(&self, request: &CheckRequest) -> Result<CheckOutcome, ZanzibarError> {
        let mut traversal = Traversal::default();
        let allowed = self.evaluate(request.clone(), &mut traversal).await?;

        let path = if allowed {
            traversal.trail.into_iter().rev().collect()
        } else {
            Vec::new()
        };
        Ok(CheckOutcome {
            allowed,
            path,
            dependencies: traversal.touched.into_iter().collect(),
        })
    }

    fn evaluate<'a>(
        &'a self,
        request: CheckRequest,
        traversal: &'a mut Traversal,
    ) -> BoxFuture<'a, Result<bool, ZanzibarError>> {
        Box::pin(async move {
            let key = request.to_string();

            if let Some(&allowed) = traversal.resolved.get(&key) {
                if allowed {
                    traversal.trail.push(key);
                }
                return Ok(allowed);
            }
            if traversal.path.contains(&key) {
                debug!("Cycle at {}", key);
                traversal.cycle_cuts += 1;
                return Ok(false);
            }
            if traversal.depth >= self.max_depth {
                warn!("Check depth limit {} reached at {}", self.max_depth, key);
                traversal.cycle_cuts += 1;
                return Ok(false);
            }

            let cuts_before = traversal.cycle_cuts;
            let trail_len = traversal.trail.len();

            traversal.path.insert(key.clone());
            traversal.depth += 1;
            let result = self.evaluate_uncached(&request, traversal).await;
            traversal.depth -= 1;
            traversal.path.remove(&key);

            let allowed = result?;
            if allowed {
                traversal.trail.push(key.clone());
            } else {
                traversal.trail.truncate(trail_len);
            }
            if allowed || traversal.cycle_cuts == cuts_before {
                traversal.resolved.insert(key, allowed);
            }
            Ok(allowed)
        })
    }

    async fn evaluate_uncached(
        &self,
        request: &CheckRequest,
        traversal: &mut Traversal,
    ) -> Result<bool, ZanzibarError> {
        debug!("Checking: {}", request);
        traversal.touch(&request.namespace, &request.object_id);

        // 1. Direct check: does the tuple exist?
        if self.repository.direct_match(&request.as_tuple()).await? {
            debug!("Direct tuple found for {}", request);
            return Ok(true);
        }

        // 2. Without a definition the stored tuple was the only source of truth
        let Some(namespace) = self.registry.get(&request.namespace).await? else {
            debug!("Unknown namespace '{}'", request.namespace);
            return Ok(false);
        };
        let Some(definition) = namespace.relation(&request.relation) else {
            debug!("No definition for {}#{}", request.namespace, request.relation);
            return Ok(false);
        };

        // 3. Computed relation
        if self.evaluate_rewrite(request, &definition.rewrite, traversal).await? {
            return Ok(true);
        }

        // 4. Userset subjects on this relation, unless the rewrite already looked
        if covers_own_tuples(&definition.rewrite) {
            return Ok(false);
        }
        self.evaluate_usersets(request, traversal).await
    }

    async fn evaluate_rewrite(
        &self,
        request: &CheckRequest,
        rewrite: &Rewrite,
        traversal: &mut Traversal,
    ) -> Result<bool, ZanzibarError> {
        match rewrite {
            Rewrite::Direct { .. } => self.evaluate_usersets(request, traversal).await,
            Rewrite::Union { children } => {
                for child in children {
                    if self.evaluate_ref(request, child, traversal).await? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Rewrite::Intersection { children } => {
                if children.is_empty() {
                    return Ok(false);
                }
                for child in children {
                    if !self.evaluate_ref(request, child, traversal).await? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Rewrite::Exclusion { base, subtract } => {
                if !self.evaluate_ref(request, base, traversal).await? {
                    return Ok(false);
                }
                let subtracted = self.evaluate_ref(request, subtract, traversal).await?;
                Ok(!subtracted)
            }
            Rewrite::TupleToUserset {
                tupleset,
                computed_relation,
            } => {
                self.follow_tupleset(request, tupleset, computed_relation, traversal)
                    .await
            }
        }
    }

    async fn evaluate_ref(
        &self,
        request: &CheckRequest,
        userset: &UsersetRef,
        traversal: &mut Traversal,
    ) -> Result<bool, ZanzibarError> {
        match userset {
            UsersetRef::This => self.evaluate_usersets(request, traversal).await,
            UsersetRef::Computed { relation } => {
                let computed = request.retarget(&request.namespace, &request.object_id, relation);
                self.evaluate(computed, traversal).await
            }
            UsersetRef::TupleToUserset {
                tupleset,
                computed_relation,
            } => {
                self.follow_tupleset(request, tupleset, computed_relation, traversal)
                    .await
            }
        }
    }

    /// Tuples like `document:doc1#viewer@group:eng#member` grant the relation
    /// to everyone holding `member` on `group:eng`
    async fn evaluate_usersets(
        &self,
        request: &CheckRequest,
        traversal: &mut Traversal,
    ) -> Result<bool, ZanzibarError> {
        let tuples = self
            .repository
            .scan(&request.namespace, &request.object_id, Some(&request.relation))
            .await?;

        for tuple in tuples {
            if let Some(ref userset_relation) = tuple.subject_relation {
                let nested = request.retarget(
                    &tuple.subject_namespace,
                    &tuple.subject_id,
                    userset_relation,
                );
                if self.evaluate(nested, traversal).await? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// For each `tupleset` tuple on the object, check `computed_relation` on
    /// the tuple's subject object (e.g. project -> organization member)
    async fn follow_tupleset(
        &self,
        request: &CheckRequest,
        tupleset: &str,
        computed_relation: &str,
        traversal: &mut Traversal,
    ) -> Result<bool, ZanzibarError> {
        let parents = self
            .repository
            .scan(&request.namespace, &request.object_id, Some(tupleset))
            .await?;

        for parent in parents {
            let nested = request.retarget(
                &parent.subject_namespace,
                &parent.subject_id,
                computed_relation,
            );
            if self.evaluate(nested, traversal).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Whether evaluating the rewrite already scans the relation's own tuples
fn covers_own_tuples(rewrite: &Rewrite) -> bool {
    match rewrite {
        Rewrite::Direct { .. } => true,
        Rewrite::Union { children } | Rewrite::Intersection { children } => {
            children.contains(&UsersetRef::This)
        }
        Rewrite::Exclusion { base, subtract } => {
            *base == UsersetRef::This || *subtract == UsersetRef::This
        }
        Rewrite::TupleToUserset { .. } => false,
    }
}
