//! Synchronize partial entity graphs with persisted state.
//!
//! The central piece is [`GraphReconciler::upsert`]: given top-level partial
//! records and an allow-list of relation names, it makes the persisted
//! children of each allowed relation exactly match the nested input —
//! creating, updating, associating, and deleting as needed — while leaving
//! every relation outside the allow-list untouched. All writes of one call
//! share a single transactional scope.
//!
//! [`GraphReconciler::soft_delete`] and [`GraphReconciler::restore`] cascade
//! a `deleted_at` stamp across exclusively-owned (one-to-many) descendants,
//! never across shared (many-to-many) neighbors.
//!
//! Relation metadata comes from a plain-data [`SchemaRegistry`]; persistence
//! goes through the [`Store`] trait, with [`MemoryStore`] as the bundled
//! reference implementation.
//!
//! # Example
//!
//! ```
//! use relsync::{
//!     Cardinality, DataType, EntityDescriptor, FieldDescriptor, GraphReconciler, InputRecord,
//!     MemoryStore, RelationDescriptor, SchemaRegistry,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> relsync::Result<()> {
//! # tokio_test::block_on(async {
//! let schema = Arc::new(
//!     SchemaRegistry::new()
//!         .register(
//!             EntityDescriptor::new("article")
//!                 .field(FieldDescriptor::new("title", DataType::Text).not_null())
//!                 .relation(RelationDescriptor::new(
//!                     "sections",
//!                     Cardinality::OneToMany,
//!                     "section",
//!                 )),
//!         )
//!         .register(
//!             EntityDescriptor::new("section")
//!                 .field(FieldDescriptor::new("title", DataType::Text).not_null()),
//!         ),
//! );
//! let store = Arc::new(MemoryStore::new(schema.clone()));
//! let articles = GraphReconciler::new(store, schema, "article")?;
//!
//! let input = InputRecord::new()
//!     .id("a1")
//!     .field("title", "hello")
//!     .relation(
//!         "sections",
//!         vec![InputRecord::new().field("title", "intro")],
//!     );
//! let upserted = articles.upsert(vec![input], &["sections"]).await?;
//! assert_eq!(upserted.len(), 1);
//!
//! let populated = articles.find_with_children(&["a1".into()]).await?;
//! assert_eq!(populated[0].1["sections"].len(), 1);
//! # Ok(())
//! # })
//! # }
//! ```

pub mod core;
pub mod reconcile;
pub mod schema;
pub mod store;

// Re-export main types for convenience
pub use self::core::{CancelToken, Id, InputRecord, Record, ReconcileError, Result, Value};
pub use self::reconcile::{CascadedIds, GraphReconciler};
pub use self::schema::{
    Cardinality, DataType, EntityDescriptor, FieldDescriptor, Ownership, RelationDescriptor,
    SchemaRegistry,
};
pub use self::store::{Filter, MemoryStore, Store, UpsertRow};
