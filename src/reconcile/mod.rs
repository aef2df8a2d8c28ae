mod cascade;
mod diff;
mod upsert;

pub use cascade::CascadedIds;

use crate::core::{CancelToken, Id, InputRecord, Record, ReconcileError, Result};
use crate::schema::SchemaRegistry;
use crate::store::{Filter, Store, UpsertRow};
use log::warn;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reconciles partial entity graphs against a backing store.
///
/// Bound to one entity type. `upsert` synchronizes allow-listed relations
/// exactly with the supplied nested data; `soft_delete`/`restore` cascade a
/// deletion stamp across exclusively-owned descendants. Every call runs in
/// one transactional scope: all of its writes land or none do.
pub struct GraphReconciler<S: Store> {
    store: Arc<S>,
    schema: Arc<SchemaRegistry>,
    entity: String,
    cancel: Option<CancelToken>,
}

impl<S: Store> GraphReconciler<S> {
    pub fn new(store: Arc<S>, schema: Arc<SchemaRegistry>, entity: impl Into<String>) -> Result<Self> {
        let entity = entity.into();
        schema.entity(&entity)?;
        Ok(Self {
            store,
            schema,
            entity,
            cancel: None,
        })
    }

    /// Attach a cancellation token; it is checked before every store phase.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(ReconcileError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Run `op` inside a transactional scope on the store. Errors roll the
    /// scope back; a rollback failure is logged and the original error wins.
    pub(crate) async fn in_transaction<T>(
        &self,
        op: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        self.store.begin().await?;
        match op.await {
            Ok(value) => {
                self.store.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback().await {
                    warn!("rollback failed after '{err}': {rollback_err}");
                }
                Err(err)
            }
        }
    }

    /// Insert new records (scalars only). Supplied ids must be unused.
    pub async fn create(&self, inputs: Vec<InputRecord>) -> Result<Vec<Record>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let descriptor = self.schema.entity(&self.entity)?;
        let supplied: Vec<Id> = inputs.iter().filter_map(|input| input.id.clone()).collect();
        for input in &inputs {
            descriptor.validate_partial(&input.fields)?;
            descriptor.validate_required(&input.fields)?;
        }

        self.check_cancelled()?;
        let existing = self.store.find_by_ids(&self.entity, &supplied, true).await?;
        if let Some(record) = existing.first() {
            return Err(ReconcileError::Validation(format!(
                "'{}' with id '{}' already exists",
                self.entity, record.id
            )));
        }

        let rows = inputs
            .into_iter()
            .map(|input| UpsertRow {
                id: input.id,
                fields: input.fields,
            })
            .collect();
        self.in_transaction(self.store.batch_upsert(&self.entity, rows))
            .await
    }

    /// Update scalar fields of existing records. Every input must carry an
    /// id that resolves to a persisted row.
    pub async fn update(&self, inputs: Vec<InputRecord>) -> Result<Vec<Record>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let descriptor = self.schema.entity(&self.entity)?;
        let mut ids = Vec::with_capacity(inputs.len());
        for input in &inputs {
            descriptor.validate_partial(&input.fields)?;
            let id = input.id.clone().ok_or_else(|| {
                ReconcileError::Validation(format!("update on '{}' requires an id", self.entity))
            })?;
            ids.push(id);
        }

        self.check_cancelled()?;
        let existing = self.store.find_by_ids(&self.entity, &ids, false).await?;
        if existing.len() != ids.len() {
            let found: Vec<&Id> = existing.iter().map(|record| &record.id).collect();
            return Err(match ids.iter().find(|id| !found.contains(id)) {
                Some(missing) => ReconcileError::not_found(&self.entity, missing),
                None => ReconcileError::not_found(&self.entity, "<unresolved>"),
            });
        }

        let rows = inputs
            .into_iter()
            .map(|input| UpsertRow {
                id: input.id,
                fields: input.fields,
            })
            .collect();
        self.in_transaction(self.store.batch_upsert(&self.entity, rows))
            .await
    }

    /// Hard remove. Irreversible, bypasses soft-delete bookkeeping.
    pub async fn delete(&self, ids: &[Id]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.check_cancelled()?;
        self.in_transaction(self.store.delete_by_ids(&self.entity, ids))
            .await
    }

    /// Hard remove every row matching `filter`; returns the deleted ids.
    pub async fn delete_where(&self, filter: &Filter) -> Result<Vec<Id>> {
        self.check_cancelled()?;
        self.in_transaction(self.store.delete_where(&self.entity, filter))
            .await
    }

    /// Re-fetch records together with the current children of every
    /// reconcilable relation — the explicit population request callers use
    /// after an `upsert` to observe the reconciled shape.
    pub async fn find_with_children(
        &self,
        ids: &[Id],
    ) -> Result<Vec<(Record, BTreeMap<String, Vec<Record>>)>> {
        let descriptor = self.schema.entity(&self.entity)?;
        let records = self.store.find_by_ids(&self.entity, ids, false).await?;

        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let mut children = BTreeMap::new();
            for relation in descriptor.relations() {
                if !relation.is_reconcilable() {
                    continue;
                }
                let child_ids = self.store.related_ids(relation, &record.id).await?;
                let rows = self
                    .store
                    .find_by_ids(&relation.target, &child_ids, false)
                    .await?;
                children.insert(relation.name.clone(), rows);
            }
            out.push((record, children));
        }
        Ok(out)
    }
}
