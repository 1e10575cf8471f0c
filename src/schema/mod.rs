pub mod constraint;
pub mod descriptor;
pub mod introspect;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use descriptor::{
    FieldDescriptor, FieldKind, InputDescriptor, InputKind, ResourceDescriptor, ValidatorDirective,
};

/// Closed set of semantic column kinds. Storage type names map into this
/// union exactly once, at registration; everything downstream matches on
/// the enum, never on raw type strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Integer,
    Float,
    Text,
    Boolean,
    Date,
    DateTime,
    Enumerated,
    Json,
    Array(Box<ColumnKind>),
}

impl ColumnKind {
    /// Fixed lookup from storage-engine type names. Returns `None` for
    /// anything unrecognized; registration treats that as fatal.
    pub fn from_storage_type(name: &str) -> Option<ColumnKind> {
        let normalized = name.trim().to_ascii_lowercase();

        // "varchar(255)" and friends carry a length suffix
        let base = match normalized.find('(') {
            Some(idx) => normalized[..idx].trim_end().to_string(),
            None => normalized,
        };

        if let Some(inner) = base.strip_suffix("[]") {
            return ColumnKind::from_storage_type(inner).map(|k| ColumnKind::Array(Box::new(k)));
        }

        match base.as_str() {
            "smallint" | "integer" | "bigint" | "int" | "int2" | "int4" | "int8" | "serial"
            | "smallserial" | "bigserial" => Some(ColumnKind::Integer),
            "real" | "double precision" | "numeric" | "decimal" | "float4" | "float8" => {
                Some(ColumnKind::Float)
            }
            "text" | "varchar" | "character varying" | "character" | "char" | "citext" | "uuid" => {
                Some(ColumnKind::Text)
            }
            "boolean" | "bool" => Some(ColumnKind::Boolean),
            "date" => Some(ColumnKind::Date),
            "timestamp" | "timestamptz" | "timestamp with time zone"
            | "timestamp without time zone" => Some(ColumnKind::DateTime),
            "json" | "jsonb" => Some(ColumnKind::Json),
            _ => None,
        }
    }
}

/// Foreign key target: the referenced resource and its column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyMeta {
    pub resource: String,
    pub column: String,
}

/// Storage-level description of one column, as produced by introspection
/// or built by hand at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub has_default: bool,
    pub has_server_default: bool,
    pub primary_key: bool,
    pub autoincrement: bool,
    pub foreign_key: Option<ForeignKeyMeta>,
    pub enum_values: Vec<String>,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
            has_default: false,
            has_server_default: false,
            primary_key: false,
            autoincrement: false,
            foreign_key: None,
            enum_values: Vec::new(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    pub fn with_server_default(mut self) -> Self {
        self.has_server_default = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn references(mut self, resource: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKeyMeta { resource: resource.into(), column: column.into() });
        self
    }

    pub fn choices<S: Into<String>>(mut self, values: impl IntoIterator<Item = S>) -> Self {
        self.kind = ColumnKind::Enumerated;
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }
}

/// A to-many relationship rendered as a reference-many field: rows of
/// `resource` whose `remote_column` equals this table's `local_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationMeta {
    pub name: String,
    pub resource: String,
    pub local_column: String,
    pub remote_column: String,
    pub display_fields: Vec<String>,
}

/// Everything the introspector needs to derive a resource descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub columns: Vec<ColumnMeta>,
    pub checks: Vec<String>,
    pub relations: Vec<RelationMeta>,
}

impl TableMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), columns: Vec::new(), checks: Vec::new(), relations: Vec::new() }
    }

    pub fn column(mut self, column: ColumnMeta) -> Self {
        self.columns.push(column);
        self
    }

    pub fn check(mut self, clause: impl Into<String>) -> Self {
        self.checks.push(clause.into());
        self
    }

    pub fn relation(mut self, relation: RelationMeta) -> Self {
        self.relations.push(relation);
        self
    }
}

/// Registration-time failures. All of these fire at setup, never while
/// serving requests.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("resource '{0}' has no primary key column")]
    MissingPrimaryKey(String),

    #[error("resource '{resource}' has a composite primary key ({columns:?}); composite keys are unsupported")]
    CompositePrimaryKey { resource: String, columns: Vec<String> },

    #[error("unsupported storage type '{storage_type}' on column '{resource}.{column}'")]
    UnsupportedType { resource: String, column: String, storage_type: String },

    #[error("invalid column name '{column}' on resource '{resource}'")]
    InvalidColumnName { resource: String, column: String },

    #[error("resource '{0}' is already registered")]
    Duplicate(String),

    #[error("introspection query failed: {0}")]
    Introspection(String),
}
