mod descriptor;

pub use descriptor::{
    Cardinality, DataType, EntityDescriptor, FieldDescriptor, Ownership, RelationDescriptor,
};

use crate::core::{ReconcileError, Result};
use std::collections::HashMap;

/// Registry of entity descriptors, the reconciler's source of relation
/// metadata (cardinality, target type, ownership, pivot shape).
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: HashMap<String, EntityDescriptor>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, entity: EntityDescriptor) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    pub fn entity(&self, name: &str) -> Result<&EntityDescriptor> {
        self.entities
            .get(name)
            .ok_or_else(|| ReconcileError::configuration(name, "entity type is not registered"))
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.values()
    }

    pub fn relation(&self, entity: &str, name: &str) -> Result<&RelationDescriptor> {
        self.entity(entity)?.find_relation(name).ok_or_else(|| {
            ReconcileError::configuration(entity, format!("relation '{name}' is not declared"))
        })
    }

    /// Fail-fast allow-list check. Reports every offending name at once so
    /// a caller fixes the whole list in one round trip; nothing has been
    /// written when this fires.
    pub fn validate_allow_list(&self, entity: &str, allow_list: &[&str]) -> Result<()> {
        let descriptor = self.entity(entity)?;

        let unknown: Vec<&str> = allow_list
            .iter()
            .copied()
            .filter(|name| descriptor.find_relation(name).is_none())
            .collect();
        if !unknown.is_empty() {
            return Err(ReconcileError::configuration(
                entity,
                format!("nonexistent relations in allow-list: {}", unknown.join(", ")),
            ));
        }

        let not_reconcilable: Vec<&str> = allow_list
            .iter()
            .copied()
            .filter(|name| {
                descriptor
                    .find_relation(name)
                    .is_some_and(|r| !r.is_reconcilable())
            })
            .collect();
        if !not_reconcilable.is_empty() {
            return Err(ReconcileError::configuration(
                entity,
                format!(
                    "relations are associate-only and cannot be reconciled: {}",
                    not_reconcilable.join(", ")
                ),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ReconcileError;

    fn sample() -> SchemaRegistry {
        SchemaRegistry::new()
            .register(
                EntityDescriptor::new("article")
                    .field(FieldDescriptor::new("title", DataType::Text).not_null())
                    .relation(RelationDescriptor::new(
                        "sections",
                        Cardinality::OneToMany,
                        "section",
                    ))
                    .relation(RelationDescriptor::new(
                        "tags",
                        Cardinality::ManyToMany,
                        "tag",
                    ))
                    .relation(RelationDescriptor::new(
                        "author",
                        Cardinality::ManyToOne,
                        "user",
                    )),
            )
            .register(EntityDescriptor::new("section"))
            .register(EntityDescriptor::new("tag"))
            .register(EntityDescriptor::new("user"))
    }

    #[test]
    fn relation_lookup_and_ownership() {
        let schema = sample();
        let sections = schema.relation("article", "sections").unwrap();
        assert_eq!(sections.ownership(), Ownership::Owned);
        assert_eq!(sections.target, "section");

        let tags = schema.relation("article", "tags").unwrap();
        assert_eq!(tags.ownership(), Ownership::Shared);
        assert_eq!(tags.pivot_table(), "article_tags");
    }

    #[test]
    fn allow_list_reports_all_unknown_names() {
        let schema = sample();
        let err = schema
            .validate_allow_list("article", &["sections", "bogus", "missing"])
            .unwrap_err();
        match err {
            ReconcileError::Configuration { detail, .. } => {
                assert!(detail.contains("bogus"));
                assert!(detail.contains("missing"));
            }
            other => panic!("expected Configuration, got {other:?}"),
        }
    }

    #[test]
    fn allow_list_rejects_many_to_one() {
        let schema = sample();
        let err = schema
            .validate_allow_list("article", &["author"])
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Configuration { .. }));
    }

    #[test]
    fn unknown_entity_is_configuration_error() {
        let schema = sample();
        assert!(matches!(
            schema.entity("nope"),
            Err(ReconcileError::Configuration { .. })
        ));
    }
}
