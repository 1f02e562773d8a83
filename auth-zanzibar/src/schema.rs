use crate::{error::ZanzibarError, models::*};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Definition of a namespace (object type)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    pub relations: Vec<RelationDefinition>,
}

/// Definition of a relation within a namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub rewrite: Rewrite,
}

/// How a relation is computed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rewrite {
    /// Stored tuples only. The list restricts which subjects may be written.
    Direct {
        #[serde(default)]
        allowed_subject_types: Vec<String>,
    },
    Union {
        children: Vec<UsersetRef>,
    },
    /// An empty list never holds
    Intersection {
        children: Vec<UsersetRef>,
    },
    Exclusion {
        base: UsersetRef,
        subtract: UsersetRef,
    },
    /// Follow `tupleset` tuples to related objects and check `computed_relation` there
    TupleToUserset {
        tupleset: String,
        computed_relation: String,
    },
}

/// Operand of a union, intersection or exclusion
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UsersetRef {
    /// The relation's own stored tuples
    #[serde(rename = "self")]
    This,
    /// Another relation on the same object
    Computed { relation: String },
    TupleToUserset {
        tupleset: String,
        computed_relation: String,
    },
}

impl UsersetRef {
    pub fn this() -> Self {
        Self::This
    }

    pub fn computed(relation: &str) -> Self {
        Self::Computed {
            relation: relation.to_string(),
        }
    }

    pub fn tuple_to_userset(tupleset: &str, computed_relation: &str) -> Self {
        Self::TupleToUserset {
            tupleset: tupleset.to_string(),
            computed_relation: computed_relation.to_string(),
        }
    }
}

impl From<&str> for UsersetRef {
    fn from(name: &str) -> Self {
        if name == "self" {
            Self::This
        } else {
            Self::computed(name)
        }
    }
}

impl RelationDefinition {
    pub fn direct(name: &str, allowed_subject_types: &[&str]) -> Self {
        Self::with_rewrite(
            name,
            Rewrite::Direct {
                allowed_subject_types: allowed_subject_types
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },
        )
    }

    pub fn union(name: &str, children: Vec<UsersetRef>) -> Self {
        Self::with_rewrite(name, Rewrite::Union { children })
    }

    pub fn intersection(name: &str, children: Vec<UsersetRef>) -> Self {
        Self::with_rewrite(name, Rewrite::Intersection { children })
    }

    pub fn exclusion(name: &str, base: UsersetRef, subtract: UsersetRef) -> Self {
        Self::with_rewrite(name, Rewrite::Exclusion { base, subtract })
    }

    pub fn tuple_to_userset(name: &str, tupleset: &str, computed_relation: &str) -> Self {
        Self::with_rewrite(
            name,
            Rewrite::TupleToUserset {
                tupleset: tupleset.to_string(),
                computed_relation: computed_relation.to_string(),
            },
        )
    }

    pub fn with_rewrite(name: &str, rewrite: Rewrite) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            rewrite,
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Whether a tuple with this subject may be written under this relation.
    /// Only direct relations with a non-empty type list restrict anything.
    pub fn allows_subject(&self, subject: &Subject) -> bool {
        match &self.rewrite {
            Rewrite::Direct { allowed_subject_types } if !allowed_subject_types.is_empty() => {
                let qualified = subject
                    .relation
                    .as_ref()
                    .map(|relation| format!("{}#{}", subject.namespace, relation));
                allowed_subject_types.iter().any(|allowed| {
                    allowed == &subject.namespace || Some(allowed) == qualified.as_ref()
                })
            }
            _ => true,
        }
    }

    fn referenced_relations(&self) -> Vec<&str> {
        fn from_ref(userset: &UsersetRef) -> Option<&str> {
            match userset {
                UsersetRef::This => None,
                UsersetRef::Computed { relation } => Some(relation.as_str()),
                UsersetRef::TupleToUserset { tupleset, .. } => Some(tupleset.as_str()),
            }
        }

        match &self.rewrite {
            Rewrite::Direct { .. } => Vec::new(),
            Rewrite::Union { children } | Rewrite::Intersection { children } => {
                children.iter().filter_map(from_ref).collect()
            }
            Rewrite::Exclusion { base, subtract } => {
                [base, subtract].into_iter().filter_map(from_ref).collect()
            }
            Rewrite::TupleToUserset { tupleset, .. } => vec![tupleset.as_str()],
        }
    }
}

impl Namespace {
    pub fn new(name: &str, relations: Vec<RelationDefinition>) -> Self {
        Self {
            name: name.to_string(),
            relations,
        }
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDefinition> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Validate the namespace is well-formed.
    ///
    /// References between relations may form cycles; those are cut at
    /// evaluation time.
    pub fn validate(&self) -> Result<(), ZanzibarError> {
        if self.name.trim().is_empty() {
            return Err(ZanzibarError::InvalidSchema(
                "Namespace name must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for relation in &self.relations {
            if relation.name.trim().is_empty() {
                return Err(ZanzibarError::InvalidSchema(format!(
                    "Namespace '{}' has a relation with an empty name",
                    self.name
                )));
            }
            if !seen.insert(relation.name.as_str()) {
                return Err(ZanzibarError::InvalidSchema(format!(
                    "Relation '{}' is defined twice in namespace '{}'",
                    relation.name, self.name
                )));
            }
        }

        for relation in &self.relations {
            for referenced in relation.referenced_relations() {
                if !seen.contains(referenced) {
                    return Err(ZanzibarError::InvalidSchema(format!(
                        "Relation '{}' in namespace '{}' references unknown relation '{}'",
                        relation.name, self.name, referenced
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Namespaces that are always available, regardless of the schema store
pub fn builtin_namespaces() -> Vec<Namespace> {
    use crate::schema::UsersetRef as U;

    vec![
        Namespace::new(
            "organization",
            vec![
                RelationDefinition::direct("owner", &["user"]).describe("Organization owner"),
                RelationDefinition::union("admin", vec![U::this(), U::computed("owner")])
                    .describe("Organization administrator"),
                RelationDefinition::union("member", vec![U::this(), U::computed("admin")])
                    .describe("Organization member"),
            ],
        ),
        Namespace::new(
            "project",
            vec![
                RelationDefinition::direct("organization", &["organization"]),
                RelationDefinition::direct("owner", &["user"]),
                RelationDefinition::union(
                    "editor",
                    vec![
                        U::this(),
                        U::computed("owner"),
                        U::tuple_to_userset("organization", "admin"),
                    ],
                ),
                RelationDefinition::union(
                    "viewer",
                    vec![
                        U::this(),
                        U::computed("editor"),
                        U::tuple_to_userset("organization", "member"),
                    ],
                ),
                RelationDefinition::union("can_view", vec![U::computed("viewer")]),
                RelationDefinition::union("can_edit", vec![U::computed("editor")]),
                RelationDefinition::union(
                    "can_delete",
                    vec![U::computed("owner"), U::tuple_to_userset("organization", "owner")],
                ),
            ],
        ),
        Namespace::new(
            "document",
            vec![
                RelationDefinition::direct("project", &["project"]),
                RelationDefinition::direct("owner", &["user"]),
                RelationDefinition::union(
                    "editor",
                    vec![
                        U::this(),
                        U::computed("owner"),
                        U::tuple_to_userset("project", "editor"),
                    ],
                ),
                RelationDefinition::union(
                    "viewer",
                    vec![
                        U::this(),
                        U::computed("editor"),
                        U::tuple_to_userset("project", "viewer"),
                    ],
                ),
                RelationDefinition::union("can_view", vec![U::computed("viewer")]),
                RelationDefinition::union("can_edit", vec![U::computed("editor")]),
                RelationDefinition::union(
                    "can_delete",
                    vec![U::computed("owner"), U::tuple_to_userset("project", "owner")],
                ),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_namespaces_are_valid() {
        let namespaces = builtin_namespaces();
        let names: Vec<_> = namespaces.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["organization", "project", "document"]);
        for namespace in &namespaces {
            assert!(namespace.validate().is_ok(), "{} should validate", namespace.name);
        }
    }

    #[test]
    fn test_duplicate_relation_rejected() {
        let namespace = Namespace::new(
            "folder",
            vec![
                RelationDefinition::direct("viewer", &[]),
                RelationDefinition::direct("viewer", &["user"]),
            ],
        );
        assert!(matches!(namespace.validate(), Err(ZanzibarError::InvalidSchema(_))));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let namespace = Namespace::new(
            "folder",
            vec![RelationDefinition::union("viewer", vec!["self".into(), "editor".into()])],
        );
        assert!(namespace.validate().is_err());
    }

    #[test]
    fn test_self_reference_allowed() {
        let namespace = Namespace::new(
            "folder",
            vec![RelationDefinition::union("viewer", vec!["viewer".into()])],
        );
        assert!(namespace.validate().is_ok());
    }

    #[test]
    fn test_allowed_subject_types() {
        let relation = RelationDefinition::direct("viewer", &["user", "group#member"]);
        assert!(relation.allows_subject(&Subject::user("alice")));
        assert!(relation.allows_subject(&Subject::userset("group", "eng", "member")));
        assert!(!relation.allows_subject(&Subject::new("group", "eng")));
        assert!(!relation.allows_subject(&Subject::userset("group", "eng", "admin")));

        let open = RelationDefinition::direct("viewer", &[]);
        assert!(open.allows_subject(&Subject::new("service", "billing")));
    }

    #[test]
    fn test_rewrite_serde_shape() {
        let relation = RelationDefinition::union("member", vec!["self".into(), "owner".into()]);
        let json = serde_json::to_value(&relation).unwrap();
        assert_eq!(json["rewrite"]["type"], "union");
        assert_eq!(json["rewrite"]["children"][0]["type"], "self");
        assert_eq!(json["rewrite"]["children"][1]["relation"], "owner");

        let back: RelationDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back, relation);
    }
}
