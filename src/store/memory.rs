use super::{Filter, Store, UpsertRow};
use crate::core::{Id, Record, ReconcileError, Result};
use crate::schema::{Ownership, RelationDescriptor, SchemaRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use std::sync::Arc;
use tokio::sync::RwLock;

type Table = im::OrdMap<Id, Record>;
type LinkSet = im::OrdSet<(Id, Id)>;

/// Whole-store state. Persistent maps make a snapshot a structural clone,
/// so opening a transaction is O(1) and rollback is a pointer swap.
#[derive(Clone, Default)]
struct StoreState {
    tables: im::HashMap<String, Table>,
    links: im::HashMap<String, LinkSet>,
}

struct Inner {
    state: StoreState,
    tx_depth: usize,
    snapshot: Option<StoreState>,
}

/// Reference in-memory store.
///
/// Writes are validated against the schema registry before they land, and
/// each call mutates a local copy of the affected table so a mid-batch
/// validation failure leaves nothing behind. Transactions snapshot the
/// whole state at the outermost `begin`; nested `begin`s join the ambient
/// scope.
pub struct MemoryStore {
    schema: Arc<SchemaRegistry>,
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new(schema: Arc<SchemaRegistry>) -> Self {
        Self {
            schema,
            inner: RwLock::new(Inner {
                state: StoreState::default(),
                tx_depth: 0,
                snapshot: None,
            }),
        }
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Total row count for an entity table, soft-deleted rows included.
    pub async fn row_count(&self, entity: &str) -> Result<usize> {
        self.schema.entity(entity)?;
        let inner = self.inner.read().await;
        Ok(inner
            .state
            .tables
            .get(entity)
            .map_or(0, |table| table.len()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_by_ids(
        &self,
        entity: &str,
        ids: &[Id],
        with_deleted: bool,
    ) -> Result<Vec<Record>> {
        self.schema.entity(entity)?;
        let inner = self.inner.read().await;
        let Some(table) = inner.state.tables.get(entity) else {
            return Ok(Vec::new());
        };

        Ok(ids
            .iter()
            .filter_map(|id| table.get(id))
            .filter(|record| with_deleted || !record.is_deleted())
            .cloned()
            .collect())
    }

    async fn related_ids(&self, relation: &RelationDescriptor, parent: &Id) -> Result<Vec<Id>> {
        let inner = self.inner.read().await;
        let Some(set) = inner.state.links.get(&relation.pivot_table()) else {
            return Ok(Vec::new());
        };

        Ok(set
            .iter()
            .filter(|(p, _)| p == parent)
            .map(|(_, child)| child.clone())
            .collect())
    }

    async fn batch_upsert(&self, entity: &str, rows: Vec<UpsertRow>) -> Result<Vec<Record>> {
        let descriptor = self.schema.entity(entity)?;
        let mut inner = self.inner.write().await;
        let mut table = inner.state.tables.get(entity).cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(rows.len());

        for row in rows {
            descriptor.validate_partial(&row.fields)?;

            let record = match row.id {
                Some(id) if table.contains_key(&id) => {
                    // Update in place: unmentioned scalars and the
                    // soft-delete stamp are preserved.
                    let mut record = table.get(&id).cloned().ok_or_else(|| {
                        ReconcileError::persistence("upsert", entity, [&id], "row vanished")
                    })?;
                    for (name, value) in row.fields {
                        record.fields.insert(name, value);
                    }
                    record
                }
                maybe_id => {
                    // Insert; a caller-supplied id is honored as the final
                    // id of the new row.
                    descriptor.validate_required(&row.fields)?;
                    let mut fields = row.fields;
                    for field in descriptor.fields() {
                        if let Some(default) = &field.default {
                            fields.entry(field.name.clone()).or_insert(default.clone());
                        }
                    }
                    Record {
                        id: maybe_id.unwrap_or_else(Id::generate),
                        fields,
                        deleted_at: None,
                    }
                }
            };

            table.insert(record.id.clone(), record.clone());
            out.push(record);
        }

        inner.state.tables.insert(entity.to_string(), table);
        debug!("upserted {} row(s) into '{entity}'", out.len());
        Ok(out)
    }

    async fn find_ids_where(
        &self,
        entity: &str,
        filter: &Filter,
        with_deleted: bool,
    ) -> Result<Vec<Id>> {
        let descriptor = self.schema.entity(entity)?;
        for name in filter.fields.keys() {
            if descriptor.find_field(name).is_none() {
                return Err(ReconcileError::Validation(format!(
                    "unknown field '{name}' in filter on '{entity}'"
                )));
            }
        }

        let inner = self.inner.read().await;
        let Some(table) = inner.state.tables.get(entity) else {
            return Ok(Vec::new());
        };

        Ok(table
            .iter()
            .filter(|(_, record)| {
                (with_deleted || !record.is_deleted()) && filter.matches(record)
            })
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn delete_by_ids(&self, entity: &str, ids: &[Id]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.schema.entity(entity)?;
        let mut inner = self.inner.write().await;

        if let Some(table) = inner.state.tables.get(entity) {
            let mut table = table.clone();
            for id in ids {
                table.remove(id);
            }
            inner.state.tables.insert(entity.to_string(), table);
        }

        // Deleted rows must not leave dangling association edges, on
        // either side of any relation that touches this entity.
        let mut links = inner.state.links.clone();
        for descriptor in self.schema.entities() {
            for relation in descriptor.relations() {
                let touches_parent = relation.source == entity;
                let touches_child = relation.target == entity;
                if !touches_parent && !touches_child {
                    continue;
                }
                let pivot = relation.pivot_table();
                if let Some(set) = links.get(&pivot) {
                    let filtered: LinkSet = set
                        .iter()
                        .filter(|(parent, child)| {
                            !((touches_parent && ids.contains(parent))
                                || (touches_child && ids.contains(child)))
                        })
                        .cloned()
                        .collect();
                    if filtered.len() != set.len() {
                        links.insert(pivot, filtered);
                    }
                }
            }
        }
        inner.state.links = links;

        debug!("deleted {} row(s) from '{entity}'", ids.len());
        Ok(())
    }

    async fn associate(
        &self,
        relation: &RelationDescriptor,
        parent: &Id,
        children: &[Id],
    ) -> Result<()> {
        if children.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.write().await;
        let pivot = relation.pivot_table();
        let mut set = inner.state.links.get(&pivot).cloned().unwrap_or_default();

        if relation.ownership() == Ownership::Owned {
            // An owned child has exactly one parent in this relation;
            // re-associating moves it.
            set = set
                .iter()
                .filter(|(p, child)| p == parent || !children.contains(child))
                .cloned()
                .collect();
        }

        for child in children {
            set.insert((parent.clone(), child.clone()));
        }
        inner.state.links.insert(pivot, set);
        Ok(())
    }

    async fn remove_association(
        &self,
        relation: &RelationDescriptor,
        parent: &Id,
        children: &[Id],
    ) -> Result<()> {
        if children.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.write().await;
        let pivot = relation.pivot_table();
        if let Some(set) = inner.state.links.get(&pivot) {
            let mut set = set.clone();
            for child in children {
                set.remove(&(parent.clone(), child.clone()));
            }
            inner.state.links.insert(pivot, set);
        }
        Ok(())
    }

    async fn set_deleted_at(
        &self,
        entity: &str,
        ids: &[Id],
        stamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.schema.entity(entity)?;
        let mut inner = self.inner.write().await;
        let mut table = inner.state.tables.get(entity).cloned().unwrap_or_default();

        for id in ids {
            let Some(record) = table.get(id) else {
                return Err(ReconcileError::not_found(entity, id));
            };
            let mut record = record.clone();
            record.deleted_at = stamp;
            table.insert(id.clone(), record);
        }

        inner.state.tables.insert(entity.to_string(), table);
        Ok(())
    }

    async fn begin(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.tx_depth == 0 {
            inner.snapshot = Some(inner.state.clone());
        }
        inner.tx_depth += 1;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.tx_depth == 0 {
            return Err(ReconcileError::Lock(
                "commit without an active transaction".to_string(),
            ));
        }
        inner.tx_depth -= 1;
        if inner.tx_depth == 0 {
            inner.snapshot = None;
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.tx_depth == 0 {
            return Err(ReconcileError::Lock(
                "rollback without an active transaction".to_string(),
            ));
        }
        let snapshot = inner.snapshot.take().ok_or_else(|| {
            ReconcileError::Lock("transaction snapshot missing on rollback".to_string())
        })?;
        // Rollback abandons the whole scope, nested or not.
        inner.state = snapshot;
        inner.tx_depth = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{InputRecord, Value};
    use crate::schema::{Cardinality, DataType, EntityDescriptor, FieldDescriptor};

    fn store() -> MemoryStore {
        let schema = SchemaRegistry::new()
            .register(
                EntityDescriptor::new("article")
                    .field(FieldDescriptor::new("title", DataType::Text).not_null())
                    .field(FieldDescriptor::new("views", DataType::Integer).default_value(0i64))
                    .relation(crate::schema::RelationDescriptor::new(
                        "sections",
                        Cardinality::OneToMany,
                        "section",
                    )),
            )
            .register(
                EntityDescriptor::new("section")
                    .field(FieldDescriptor::new("title", DataType::Text)),
            );
        MemoryStore::new(Arc::new(schema))
    }

    fn row(input: InputRecord) -> UpsertRow {
        UpsertRow {
            id: input.id,
            fields: input.fields,
        }
    }

    #[test]
    fn upsert_preserves_unmentioned_scalars_and_applies_defaults() {
        tokio_test::block_on(async {
            let store = store();
            let created = store
                .batch_upsert(
                    "article",
                    vec![row(InputRecord::new().id("a1").field("title", "first"))],
                )
                .await
                .unwrap();
            assert_eq!(created[0].get("views"), Some(&Value::Integer(0)));

            let updated = store
                .batch_upsert(
                    "article",
                    vec![row(InputRecord::new().id("a1").field("views", 7i64))],
                )
                .await
                .unwrap();
            assert_eq!(updated[0].get("title"), Some(&Value::Text("first".into())));
            assert_eq!(updated[0].get("views"), Some(&Value::Integer(7)));
        });
    }

    #[test]
    fn insert_rejects_missing_required_field() {
        tokio_test::block_on(async {
            let store = store();
            let err = store
                .batch_upsert("article", vec![row(InputRecord::new().id("a1"))])
                .await
                .unwrap_err();
            assert!(matches!(err, ReconcileError::Validation(_)));
            assert_eq!(store.row_count("article").await.unwrap(), 0);
        });
    }

    #[test]
    fn nested_transactions_share_one_scope() {
        tokio_test::block_on(async {
            let store = store();
            store.begin().await.unwrap();
            store
                .batch_upsert(
                    "article",
                    vec![row(InputRecord::new().id("a1").field("title", "outer"))],
                )
                .await
                .unwrap();

            // Inner scope joins the ambient transaction.
            store.begin().await.unwrap();
            store
                .batch_upsert(
                    "article",
                    vec![row(InputRecord::new().id("a2").field("title", "inner"))],
                )
                .await
                .unwrap();
            store.commit().await.unwrap();

            // Rolling back the outer scope drops the inner write too.
            store.rollback().await.unwrap();
            assert_eq!(store.row_count("article").await.unwrap(), 0);
        });
    }

    #[test]
    fn commit_outside_transaction_is_an_error() {
        tokio_test::block_on(async {
            let store = store();
            assert!(matches!(
                store.commit().await,
                Err(ReconcileError::Lock(_))
            ));
        });
    }
}
