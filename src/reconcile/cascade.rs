use super::GraphReconciler;
use crate::core::{Id, Record, ReconcileError, Result};
use crate::schema::Ownership;
use crate::store::{Filter, Store};
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Ids touched by a cascade, grouped by entity type. Callers use this for
/// bookkeeping such as search-index invalidation.
pub type CascadedIds = BTreeMap<String, Vec<Id>>;

impl<S: Store> GraphReconciler<S> {
    /// Soft-delete: stamp one shared "now" on the addressed records and on
    /// every entity reachable through owned (one-to-many) relations,
    /// recursively. Shared (many-to-many) neighbors are never cascaded; an
    /// entity reachable through both an owned and a shared path is stamped,
    /// because its owned path triggers it. Reversible via [`restore`].
    ///
    /// [`restore`]: GraphReconciler::restore
    pub async fn soft_delete(&self, ids: &[Id]) -> Result<(Vec<Record>, CascadedIds)> {
        self.stamp_cascade(ids, Some(Utc::now())).await
    }

    /// Structural inverse of [`soft_delete`]: re-derives the same
    /// owned-descendant closure (no undo log) and clears `deleted_at` on
    /// exactly those records.
    ///
    /// [`soft_delete`]: GraphReconciler::soft_delete
    pub async fn restore(&self, ids: &[Id]) -> Result<(Vec<Record>, CascadedIds)> {
        self.stamp_cascade(ids, None).await
    }

    /// Filter form of [`soft_delete`]: the filter is resolved to the
    /// concrete set of matching live roots first, then the same cascade
    /// runs. A filter matching nothing is a no-op, not an error.
    ///
    /// [`soft_delete`]: GraphReconciler::soft_delete
    pub async fn soft_delete_where(&self, filter: &Filter) -> Result<(Vec<Record>, CascadedIds)> {
        let ids = self
            .store
            .find_ids_where(&self.entity, filter, false)
            .await?;
        self.stamp_cascade(&ids, Some(Utc::now())).await
    }

    /// Filter form of [`restore`]; matches soft-deleted roots too.
    ///
    /// [`restore`]: GraphReconciler::restore
    pub async fn restore_where(&self, filter: &Filter) -> Result<(Vec<Record>, CascadedIds)> {
        let ids = self
            .store
            .find_ids_where(&self.entity, filter, true)
            .await?;
        self.stamp_cascade(&ids, None).await
    }

    async fn stamp_cascade(
        &self,
        ids: &[Id],
        stamp: Option<DateTime<Utc>>,
    ) -> Result<(Vec<Record>, CascadedIds)> {
        if ids.is_empty() {
            return Ok((Vec::new(), CascadedIds::new()));
        }
        self.check_cancelled()?;
        self.in_transaction(self.stamp_in_scope(ids, stamp)).await
    }

    async fn stamp_in_scope(
        &self,
        ids: &[Id],
        stamp: Option<DateTime<Utc>>,
    ) -> Result<(Vec<Record>, CascadedIds)> {
        // Resolve roots first, deleted rows included, so that restore can
        // address what soft_delete touched.
        let mut roots = self.store.find_by_ids(&self.entity, ids, true).await?;
        if roots.len() != ids.len() {
            let missing = ids
                .iter()
                .find(|id| !roots.iter().any(|record| &record.id == *id));
            return Err(match missing {
                Some(id) => ReconcileError::not_found(&self.entity, id),
                None => ReconcileError::not_found(&self.entity, "<unresolved>"),
            });
        }

        // Worklist over owned edges only. The visited set keeps ownership
        // cycles from looping and diamond paths from double-stamping.
        let mut by_type = CascadedIds::new();
        let mut visited: BTreeSet<(String, Id)> = BTreeSet::new();
        let mut queue: VecDeque<(String, Id)> = roots
            .iter()
            .map(|record| (self.entity.clone(), record.id.clone()))
            .collect();

        while let Some((entity, id)) = queue.pop_front() {
            if !visited.insert((entity.clone(), id.clone())) {
                continue;
            }
            let descriptor = self.schema.entity(&entity)?;
            for relation in descriptor.relations() {
                if relation.ownership() != Ownership::Owned {
                    continue;
                }
                for child in self.store.related_ids(relation, &id).await? {
                    queue.push_back((relation.target.clone(), child));
                }
            }
            by_type.entry(entity).or_default().push(id);
        }

        for (entity, entity_ids) in &by_type {
            self.check_cancelled()?;
            self.store.set_deleted_at(entity, entity_ids, stamp).await?;
        }

        // Returned roots carry the state this call produced, not the one
        // it found.
        for record in &mut roots {
            record.deleted_at = stamp;
        }

        debug!(
            "{} cascade from '{}' touched {} record(s) across {} type(s)",
            if stamp.is_some() { "soft-delete" } else { "restore" },
            self.entity,
            by_type.values().map(Vec::len).sum::<usize>(),
            by_type.len(),
        );

        Ok((roots, by_type))
    }
}
