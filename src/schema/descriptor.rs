use crate::core::{ReconcileError, Result, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
    Json,
}

impl DataType {
    pub fn is_compatible(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Integer, Value::Integer(_))
                | (Self::Float, Value::Float(_) | Value::Integer(_))
                | (Self::Text, Value::Text(_))
                | (Self::Boolean, Value::Boolean(_))
                | (Self::Timestamp, Value::Timestamp(_))
                | (Self::Json, Value::Json(_))
        )
    }
}

/// Declarative field metadata. Replaces the decorator/annotation metadata
/// of ORM-style entity classes with a plain data table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub default: Option<Value>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// A field is required on insert when it is non-nullable and carries
    /// no default.
    pub fn required(&self) -> bool {
        !self.nullable && self.default.is_none()
    }

    pub fn validate(&self, entity: &str, value: &Value) -> Result<()> {
        if value.is_null() {
            if !self.nullable {
                return Err(ReconcileError::Validation(format!(
                    "field '{}' on '{entity}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(ReconcileError::Validation(format!(
                "field '{}' on '{entity}' expects {:?}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    ManyToOne,
    OneToMany,
    ManyToMany,
}

/// Who controls the lifecycle of rows on the far side of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ownership {
    /// The parent owns the children; removing a child from the relation
    /// deletes its row.
    Owned,
    /// Children are shared; removing one only drops the association edge.
    Shared,
}

/// Named edge from one entity type to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub name: String,
    pub cardinality: Cardinality,
    /// Entity type declaring the relation. Filled in on registration.
    pub source: String,
    /// Entity type on the far side.
    pub target: String,
    /// Association-table name; defaults to `"{source}_{name}"`.
    pub pivot: Option<String>,
}

impl RelationDescriptor {
    pub fn new(
        name: impl Into<String>,
        cardinality: Cardinality,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cardinality,
            source: String::new(),
            target: target.into(),
            pivot: None,
        }
    }

    pub fn pivot(mut self, pivot: impl Into<String>) -> Self {
        self.pivot = Some(pivot.into());
        self
    }

    pub fn ownership(&self) -> Ownership {
        match self.cardinality {
            Cardinality::OneToMany => Ownership::Owned,
            Cardinality::ManyToOne | Cardinality::ManyToMany => Ownership::Shared,
        }
    }

    /// Only collection-valued relations are subject to reconciliation.
    /// `ManyToOne` edges are associate-only and rejected on the write path.
    pub fn is_reconcilable(&self) -> bool {
        matches!(
            self.cardinality,
            Cardinality::OneToMany | Cardinality::ManyToMany
        )
    }

    pub fn pivot_table(&self) -> String {
        self.pivot
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.source, self.name))
    }
}

/// Schema of one entity type: scalar fields plus relation edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    fields: Vec<FieldDescriptor>,
    relations: Vec<RelationDescriptor>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relation(mut self, mut relation: RelationDescriptor) -> Self {
        relation.source = self.name.clone();
        self.relations.push(relation);
        self
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn relations(&self) -> &[RelationDescriptor] {
        &self.relations
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn find_relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Validate a partial scalar payload: every supplied field must be
    /// declared and type-compatible. Absent fields are fine here; required
    /// fields are enforced at insert time.
    pub fn validate_partial(
        &self,
        fields: &std::collections::BTreeMap<String, Value>,
    ) -> Result<()> {
        for (name, value) in fields {
            match self.find_field(name) {
                Some(field) => field.validate(&self.name, value)?,
                None => {
                    return Err(ReconcileError::Validation(format!(
                        "unknown field '{name}' on '{}'",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Insert-time check: all required fields present.
    pub fn validate_required(
        &self,
        fields: &std::collections::BTreeMap<String, Value>,
    ) -> Result<()> {
        for field in &self.fields {
            if field.required() && !fields.contains_key(&field.name) {
                return Err(ReconcileError::Validation(format!(
                    "missing required field '{}' on '{}'",
                    field.name, self.name
                )));
            }
        }
        Ok(())
    }
}
