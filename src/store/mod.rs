mod memory;

pub use memory::MemoryStore;

use crate::core::{Id, Record, Result};
use crate::schema::RelationDescriptor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Scalar portion of an upsert: relation data never reaches the store
/// through this type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertRow {
    pub id: Option<Id>,
    pub fields: BTreeMap<String, crate::core::Value>,
}

/// Conjunction of field-equality terms; the filter form callers use to
/// address rows by content instead of by id. An empty filter matches
/// every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub fields: BTreeMap<String, crate::core::Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, name: impl Into<String>, value: impl Into<crate::core::Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.fields
            .iter()
            .all(|(name, value)| record.get(name) == Some(value))
    }
}

/// Backing-store surface the reconciler is written against.
///
/// Transactions nest: an inner `begin` joins the ambient scope, only the
/// outermost `commit` publishes, and any `rollback` abandons the whole
/// scope. Implementations guarantee commit-or-rollback on all exit paths.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch records by id, preserving input order; unknown ids are
    /// skipped. Soft-deleted rows are filtered out unless `with_deleted`.
    async fn find_by_ids(&self, entity: &str, ids: &[Id], with_deleted: bool)
    -> Result<Vec<Record>>;

    /// Ids of the persisted children of one parent under one relation.
    async fn related_ids(&self, relation: &RelationDescriptor, parent: &Id) -> Result<Vec<Id>>;

    /// Insert-if-absent, update-scalars-if-present, keyed by id.
    ///
    /// A caller-supplied id that matches no row is honored as the final id
    /// of a new row. A missing id means the store assigns one. Scalars not
    /// mentioned in a row are preserved. Returns records in input order.
    async fn batch_upsert(&self, entity: &str, rows: Vec<UpsertRow>) -> Result<Vec<Record>>;

    /// Hard delete. Also drops every association edge that references the
    /// deleted rows, on either side. Missing ids are ignored so retries
    /// stay idempotent.
    async fn delete_by_ids(&self, entity: &str, ids: &[Id]) -> Result<()>;

    /// Ids of the rows whose scalars satisfy every term of `filter`. A
    /// filter naming an undeclared field is a `Validation` error.
    /// Soft-deleted rows are skipped unless `with_deleted`.
    async fn find_ids_where(
        &self,
        entity: &str,
        filter: &Filter,
        with_deleted: bool,
    ) -> Result<Vec<Id>>;

    /// Hard delete every row matching `filter` (soft-deleted rows
    /// included); returns the deleted ids. Same edge cleanup as
    /// `delete_by_ids`.
    async fn delete_where(&self, entity: &str, filter: &Filter) -> Result<Vec<Id>> {
        let ids = self.find_ids_where(entity, filter, true).await?;
        self.delete_by_ids(entity, &ids).await?;
        Ok(ids)
    }

    /// Record association edges between a parent and children. For owned
    /// relations a child is re-homed: any edge from a different parent in
    /// the same relation is replaced.
    async fn associate(
        &self,
        relation: &RelationDescriptor,
        parent: &Id,
        children: &[Id],
    ) -> Result<()>;

    /// Remove association edges only; endpoint rows are untouched.
    async fn remove_association(
        &self,
        relation: &RelationDescriptor,
        parent: &Id,
        children: &[Id],
    ) -> Result<()>;

    /// Stamp or clear `deleted_at`. Addressing a missing id is a
    /// `NotFound` error, never silently skipped.
    async fn set_deleted_at(
        &self,
        entity: &str,
        ids: &[Id],
        stamp: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn begin(&self) -> Result<()>;
    async fn commit(&self) -> Result<()>;
    async fn rollback(&self) -> Result<()>;
}
