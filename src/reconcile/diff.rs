use crate::core::{Id, InputRecord};
use crate::store::UpsertRow;
use std::collections::BTreeSet;

/// Outcome of diffing a relation's nested input against the persisted
/// child-id set. Explicit before/after partitioning, no dirty tracking.
#[derive(Debug, Default)]
pub(crate) struct ChildDiff {
    /// Create + update partitions, input order. Children carrying an id the
    /// store has never seen end up as creates with that id.
    pub upserts: Vec<UpsertRow>,
    /// Persisted children omitted from the input: deleted (owned) or
    /// disassociated (shared) by the caller.
    pub stale_ids: Vec<Id>,
    pub updates: usize,
    pub adoptions: usize,
    pub creates: usize,
}

pub(crate) fn diff_children(input: &[InputRecord], persisted: &[Id]) -> ChildDiff {
    let persisted_set: BTreeSet<&Id> = persisted.iter().collect();
    let input_ids: BTreeSet<&Id> = input.iter().filter_map(|child| child.id.as_ref()).collect();

    let mut diff = ChildDiff::default();

    for child in input {
        match &child.id {
            Some(id) if persisted_set.contains(id) => diff.updates += 1,
            Some(_) => diff.adoptions += 1,
            None => diff.creates += 1,
        }
        diff.upserts.push(UpsertRow {
            id: child.id.clone(),
            fields: child.fields.clone(),
        });
    }

    diff.stale_ids = persisted
        .iter()
        .filter(|id| !input_ids.contains(*id))
        .cloned()
        .collect();

    diff
}
