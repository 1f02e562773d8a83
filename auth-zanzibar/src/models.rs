use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Principal namespace used by the convenience wrappers
pub const USER_NAMESPACE: &str = "user";

/// Represents a subject in the authorization system
///
/// A subject with a relation is a userset: every subject holding
/// `relation` on `namespace:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub namespace: String,
    pub id: String,
    pub relation: Option<String>,
}

impl Subject {
    pub fn new(namespace: &str, id: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            id: id.to_string(),
            relation: None,
        }
    }

    pub fn user(user_id: &str) -> Self {
        Self::new(USER_NAMESPACE, user_id)
    }

    pub fn userset(namespace: &str, id: &str, relation: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            id: id.to_string(),
            relation: Some(relation.to_string()),
        }
    }

    pub fn is_userset(&self) -> bool {
        self.relation.is_some()
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.relation {
            Some(ref relation) => write!(f, "{}:{}#{}", self.namespace, self.id, relation),
            None => write!(f, "{}:{}", self.namespace, self.id),
        }
    }
}

/// Represents an object (resource) in the authorization system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Object {
    pub namespace: String,
    pub id: String,
}

impl Object {
    pub fn new(namespace: &str, id: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

/// A relationship fact: subject has relation to object
///
/// All six fields form the identity of a tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionTuple {
    pub namespace: String,
    pub object_id: String,
    pub relation: String,
    pub subject_namespace: String,
    pub subject_id: String,
    pub subject_relation: Option<String>,
}

impl PermissionTuple {
    pub fn new(object: &Object, relation: &str, subject: &Subject) -> Self {
        Self {
            namespace: object.namespace.clone(),
            object_id: object.id.clone(),
            relation: relation.to_string(),
            subject_namespace: subject.namespace.clone(),
            subject_id: subject.id.clone(),
            subject_relation: subject.relation.clone(),
        }
    }

    pub fn object(&self) -> Object {
        Object::new(&self.namespace, &self.object_id)
    }

    pub fn subject(&self) -> Subject {
        Subject {
            namespace: self.subject_namespace.clone(),
            id: self.subject_id.clone(),
            relation: self.subject_relation.clone(),
        }
    }

    /// Checks that every identifying field is non-empty
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("namespace", self.namespace.as_str()),
            ("object_id", self.object_id.as_str()),
            ("relation", self.relation.as_str()),
            ("subject_namespace", self.subject_namespace.as_str()),
            ("subject_id", self.subject_id.as_str()),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(format!("{} must not be empty", name));
            }
        }
        if matches!(self.subject_relation.as_deref(), Some(r) if r.trim().is_empty()) {
            return Err("subject_relation must be absent or non-empty".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for PermissionTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}@{}", self.namespace, self.object_id, self.relation, self.subject())
    }
}

/// A tuple as persisted, with creation metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTuple {
    #[serde(flatten)]
    pub tuple: PermissionTuple,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

/// Authorization check request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckRequest {
    pub namespace: String,
    pub object_id: String,
    pub relation: String,
    pub subject_namespace: String,
    pub subject_id: String,
    pub subject_relation: Option<String>,
}

impl CheckRequest {
    pub fn new(object: &Object, relation: &str, subject: &Subject) -> Self {
        Self {
            namespace: object.namespace.clone(),
            object_id: object.id.clone(),
            relation: relation.to_string(),
            subject_namespace: subject.namespace.clone(),
            subject_id: subject.id.clone(),
            subject_relation: subject.relation.clone(),
        }
    }

    /// Same subject, different object and relation
    pub fn retarget(&self, namespace: &str, object_id: &str, relation: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            object_id: object_id.to_string(),
            relation: relation.to_string(),
            subject_namespace: self.subject_namespace.clone(),
            subject_id: self.subject_id.clone(),
            subject_relation: self.subject_relation.clone(),
        }
    }

    /// The exact tuple that would grant this request directly
    pub fn as_tuple(&self) -> PermissionTuple {
        PermissionTuple {
            namespace: self.namespace.clone(),
            object_id: self.object_id.clone(),
            relation: self.relation.clone(),
            subject_namespace: self.subject_namespace.clone(),
            subject_id: self.subject_id.clone(),
            subject_relation: self.subject_relation.clone(),
        }
    }

    pub fn subject(&self) -> Subject {
        Subject {
            namespace: self.subject_namespace.clone(),
            id: self.subject_id.clone(),
            relation: self.subject_relation.clone(),
        }
    }

    /// Key prefix shared by every check on this request's object
    pub fn object_prefix(&self) -> String {
        object_prefix(&self.namespace, &self.object_id)
    }
}

/// Visitation and cache key: `namespace:object#relation@subject_ns:subject_id[#subject_relation]`
impl fmt::Display for CheckRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}#{}@{}:{}",
            self.namespace, self.object_id, self.relation, self.subject_namespace, self.subject_id
        )?;
        if let Some(ref relation) = self.subject_relation {
            write!(f, "#{}", relation)?;
        }
        Ok(())
    }
}

/// `namespace:object_id#`, the prefix of every key on that object
pub fn object_prefix(namespace: &str, object_id: &str) -> String {
    format!("{}:{}#", namespace, object_id)
}

/// Authorization check result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub allowed: bool,
    pub cached: bool,
    /// Visitation keys of the chain that granted access, outermost first
    pub path: Vec<String>,
    pub duration_ms: f64,
}

impl CheckResult {
    pub fn denied(duration_ms: f64) -> Self {
        Self {
            allowed: false,
            cached: false,
            path: Vec::new(),
            duration_ms,
        }
    }
}

/// Subject tree node for expand responses
///
/// `children` is `None` for concrete subjects and `Some` for usersets,
/// where an empty list means nothing was found or the branch was cut.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectTree {
    pub subject_namespace: String,
    pub subject_id: String,
    pub subject_relation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<SubjectTree>>,
}

impl SubjectTree {
    pub fn leaf(subject: Subject) -> Self {
        Self {
            subject_namespace: subject.namespace,
            subject_id: subject.id,
            subject_relation: subject.relation,
            children: None,
        }
    }

    pub fn userset(namespace: &str, id: &str, relation: &str, children: Vec<SubjectTree>) -> Self {
        Self {
            subject_namespace: namespace.to_string(),
            subject_id: id.to_string(),
            subject_relation: Some(relation.to_string()),
            children: Some(children),
        }
    }

    pub fn subject(&self) -> Subject {
        Subject {
            namespace: self.subject_namespace.clone(),
            id: self.subject_id.clone(),
            relation: self.subject_relation.clone(),
        }
    }

    /// Same node identity, ignoring children
    pub fn same_subject(&self, other: &SubjectTree) -> bool {
        self.subject_namespace == other.subject_namespace
            && self.subject_id == other.subject_id
            && self.subject_relation == other.subject_relation
    }
}

/// One object a subject holds a relation on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectAccess {
    pub namespace: String,
    pub object_id: String,
    pub relation: String,
}
