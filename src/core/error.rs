use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The caller referenced an entity or relation the schema does not
    /// declare. Raised before any write occurs; retrying is pointless.
    #[error("Configuration error on '{entity}': {detail}")]
    Configuration { entity: String, detail: String },

    /// An operation addressed an id that has no persisted row.
    #[error("'{entity}' with id '{id}' not found")]
    NotFound { entity: String, id: String },

    /// The backing store failed a read or write. Carries enough context
    /// for the caller to decide on a whole-call retry (the reconciliation
    /// algorithm is idempotent on identical input).
    #[error("Persistence failure during {op} on '{entity}' (ids: {ids:?}): {detail}")]
    Persistence {
        op: String,
        entity: String,
        ids: Vec<String>,
        detail: String,
    },

    /// Malformed input, detected before any store call where feasible.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The call's cancellation token tripped; the transaction was rolled back.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Lock error: {0}")]
    Lock(String),
}

impl ReconcileError {
    pub fn configuration(entity: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Configuration {
            entity: entity.into(),
            detail: detail.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Attach the relation being reconciled to a store failure's context.
    pub fn with_relation(self, relation: &str) -> Self {
        match self {
            Self::Persistence {
                op,
                entity,
                ids,
                detail,
            } => Self::Persistence {
                op,
                entity,
                ids,
                detail: format!("{detail} (relation '{relation}')"),
            },
            other => other,
        }
    }

    pub fn persistence(
        op: impl Into<String>,
        entity: impl Into<String>,
        ids: impl IntoIterator<Item = impl ToString>,
        detail: impl Into<String>,
    ) -> Self {
        Self::Persistence {
            op: op.into(),
            entity: entity.into(),
            ids: ids.into_iter().map(|id| id.to_string()).collect(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
