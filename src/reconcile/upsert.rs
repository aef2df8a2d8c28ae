use super::GraphReconciler;
use super::diff::diff_children;
use crate::core::{Id, InputRecord, Record, Result};
use crate::schema::{Ownership, RelationDescriptor};
use crate::store::{Store, UpsertRow};
use log::debug;

impl<S: Store> GraphReconciler<S> {
    /// Upsert top-level records and reconcile every relation in the
    /// allow-list so its persisted children exactly match the nested input:
    /// children with a known id are updated, children with an unknown or
    /// missing id are created (a caller-supplied id is honored), and
    /// persisted children omitted from the input are deleted (one-to-many)
    /// or disassociated (many-to-many).
    ///
    /// Relations absent from the allow-list are never read or written;
    /// nested data supplied for them is stripped and ignored. An allowed
    /// relation that an input record does not mention is left untouched —
    /// omission of the field is not deletion, an empty list is.
    ///
    /// Returns the upserted top-level records, scalar fields only. Callers
    /// wanting the reconciled shape re-fetch via `find_with_children`.
    pub async fn upsert(
        &self,
        inputs: Vec<InputRecord>,
        allow_list: &[&str],
    ) -> Result<Vec<Record>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        // Fail fast, before any write: bad allow-list entries and malformed
        // scalar payloads must not leave partial side effects.
        self.schema.validate_allow_list(&self.entity, allow_list)?;
        let descriptor = self.schema.entity(&self.entity)?;
        for input in &inputs {
            descriptor.validate_partial(&input.fields)?;
            for name in allow_list {
                let relation = self.schema.relation(&self.entity, name)?;
                let target = self.schema.entity(&relation.target)?;
                if let Some(children) = input.relations.get(*name) {
                    for child in children {
                        target.validate_partial(&child.fields)?;
                    }
                }
            }
        }

        self.check_cancelled()?;
        self.in_transaction(self.upsert_in_scope(&inputs, allow_list))
            .await
    }

    async fn upsert_in_scope(
        &self,
        inputs: &[InputRecord],
        allow_list: &[&str],
    ) -> Result<Vec<Record>> {
        // Top-level pass: scalar portions only, one batched upsert keyed by
        // id. Relation fields outside the allow-list die here.
        let rows: Vec<UpsertRow> = inputs
            .iter()
            .map(|input| UpsertRow {
                id: input.id.clone(),
                fields: input.fields.clone(),
            })
            .collect();
        self.check_cancelled()?;
        let records = self.store.batch_upsert(&self.entity, rows).await?;

        // Per-relation pass. Relations of one record have no ordering
        // dependency between them; each runs to completion as a unit.
        for (input, record) in inputs.iter().zip(&records) {
            for name in allow_list {
                let relation = self.schema.relation(&self.entity, name)?;
                let Some(children) = input.relations.get(*name) else {
                    continue;
                };
                self.reconcile_relation(relation, &record.id, children)
                    .await
                    .map_err(|err| err.with_relation(&relation.name))?;
            }
        }

        Ok(records)
    }

    async fn reconcile_relation(
        &self,
        relation: &RelationDescriptor,
        parent: &Id,
        children: &[InputRecord],
    ) -> Result<()> {
        self.check_cancelled()?;
        let persisted = self.store.related_ids(relation, parent).await?;
        let diff = diff_children(children, &persisted);
        debug!(
            "reconcile '{}'.'{}' for parent {parent}: {} update(s), {} adoption(s), {} create(s), {} stale",
            relation.source,
            relation.name,
            diff.updates,
            diff.adoptions,
            diff.creates,
            diff.stale_ids.len(),
        );

        let upserted = if diff.upserts.is_empty() {
            Vec::new()
        } else {
            self.store
                .batch_upsert(&relation.target, diff.upserts)
                .await?
        };

        let child_ids: Vec<Id> = upserted.into_iter().map(|record| record.id).collect();
        self.store.associate(relation, parent, &child_ids).await?;

        if !diff.stale_ids.is_empty() {
            match relation.ownership() {
                // Ownership implies lifecycle control: omitted owned
                // children lose their rows.
                Ownership::Owned => {
                    self.store
                        .delete_by_ids(&relation.target, &diff.stale_ids)
                        .await?;
                }
                // Shared children only lose the association edge.
                Ownership::Shared => {
                    self.store
                        .remove_association(relation, parent, &diff.stale_ids)
                        .await?;
                }
            }
        }

        Ok(())
    }
}
