use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::constraint;
use super::{ColumnKind, ColumnMeta, RegistryError, RelationMeta, TableMeta};
use crate::types::is_identifier;

/// Validation rules derived from storage metadata, in the shape the UI
/// renders inline form errors from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ValidatorDirective {
    Required,
    MinValue(i64),
    MaxValue(i64),
    MinLength(u32),
    MaxLength(u32),
    Regex(String),
    Custom(String),
}

/// UI component kinds for display fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    Number,
    Text,
    Boolean,
    Date,
    DateTime,
    Choice,
    Json,
    Reference,
    ReferenceMany,
}

/// UI component kinds for create/edit inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputKind {
    Number,
    Text,
    Boolean,
    Date,
    DateTime,
    Choice,
    Json,
    Reference,
}

impl ColumnKind {
    /// Total mapping from column kind to the UI field/input pair. Arrays
    /// take their element's kinds and flag `multiple` in the props.
    pub fn ui_kinds(&self) -> (FieldKind, InputKind) {
        match self {
            ColumnKind::Integer | ColumnKind::Float => (FieldKind::Number, InputKind::Number),
            ColumnKind::Text => (FieldKind::Text, InputKind::Text),
            ColumnKind::Boolean => (FieldKind::Boolean, InputKind::Boolean),
            ColumnKind::Date => (FieldKind::Date, InputKind::Date),
            ColumnKind::DateTime => (FieldKind::DateTime, InputKind::DateTime),
            ColumnKind::Enumerated => (FieldKind::Choice, InputKind::Choice),
            ColumnKind::Json => (FieldKind::Json, InputKind::Json),
            ColumnKind::Array(inner) => inner.ui_kinds(),
        }
    }
}

/// How one column (or relationship) renders in tables and show views.
/// Derived once per resource at registration; immutable and shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub props: BTreeMap<String, Value>,
    pub nullable: bool,
    pub validators: Vec<ValidatorDirective>,
}

/// How one column renders in the create form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDescriptor {
    pub name: String,
    pub kind: InputKind,
    pub props: BTreeMap<String, Value>,
    pub nullable: bool,
    pub validators: Vec<ValidatorDirective>,
}

/// A registered resource: its storage binding plus the derived UI
/// metadata. Owned by the application context, shared read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    pub table: String,
    pub primary_key: String,
    pub fields: Vec<FieldDescriptor>,
    pub inputs: Vec<InputDescriptor>,
    pub fingerprint: String,
}

impl ResourceDescriptor {
    /// Derive the full descriptor set from storage metadata. Fails fast on
    /// anything the UI cannot represent; identical metadata derives
    /// byte-identical descriptors.
    pub fn derive(meta: &TableMeta) -> Result<Self, RegistryError> {
        if !is_identifier(&meta.name) {
            return Err(RegistryError::InvalidColumnName {
                resource: meta.name.clone(),
                column: meta.name.clone(),
            });
        }
        for column in &meta.columns {
            if !is_identifier(&column.name) {
                return Err(RegistryError::InvalidColumnName {
                    resource: meta.name.clone(),
                    column: column.name.clone(),
                });
            }
        }

        let pk_columns: Vec<&ColumnMeta> =
            meta.columns.iter().filter(|c| c.primary_key).collect();
        let primary_key = match pk_columns.as_slice() {
            [] => return Err(RegistryError::MissingPrimaryKey(meta.name.clone())),
            [single] => single.name.clone(),
            many => {
                return Err(RegistryError::CompositePrimaryKey {
                    resource: meta.name.clone(),
                    columns: many.iter().map(|c| c.name.clone()).collect(),
                })
            }
        };
        if primary_key != "id" {
            tracing::warn!(
                resource = %meta.name,
                primary_key = %primary_key,
                "primary key is not named 'id'; the admin UI assumes that convention"
            );
        }

        let check_directives: Vec<(String, ValidatorDirective)> =
            meta.checks.iter().flat_map(|c| constraint::derive_directives(c)).collect();

        let mut fields = Vec::with_capacity(meta.columns.len() + meta.relations.len());
        let mut inputs = Vec::with_capacity(meta.columns.len());
        for column in &meta.columns {
            let validators = column_validators(column, &check_directives);
            let props = column_props(column);
            let (field_kind, input_kind) = column_ui_kinds(column);
            let nullable_in_create =
                column.nullable || column.has_default || column.has_server_default || column.autoincrement;

            fields.push(FieldDescriptor {
                name: column.name.clone(),
                kind: field_kind,
                props: props.clone(),
                nullable: nullable_in_create,
                validators: validators.clone(),
            });

            // An autoincrementing primary key is generated by the engine,
            // so the create form never asks for it.
            if column.primary_key && column.autoincrement {
                continue;
            }
            inputs.push(InputDescriptor {
                name: column.name.clone(),
                kind: input_kind,
                props,
                nullable: nullable_in_create,
                validators,
            });
        }

        for relation in &meta.relations {
            fields.push(relation_field(relation));
        }

        let fingerprint = fingerprint(&meta.name, &primary_key, &fields, &inputs);

        Ok(Self {
            name: meta.name.clone(),
            table: meta.name.clone(),
            primary_key,
            fields,
            inputs,
            fingerprint,
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn input(&self, name: &str) -> Option<&InputDescriptor> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Column-backed field names (reference-many fields are relationship
    /// projections, not columns).
    pub fn column_names(&self) -> BTreeSet<&str> {
        self.fields
            .iter()
            .filter(|f| f.kind != FieldKind::ReferenceMany)
            .map(|f| f.name.as_str())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name && f.kind != FieldKind::ReferenceMany)
    }
}

fn column_ui_kinds(column: &ColumnMeta) -> (FieldKind, InputKind) {
    if column.foreign_key.is_some() {
        (FieldKind::Reference, InputKind::Reference)
    } else {
        column.kind.ui_kinds()
    }
}

fn column_props(column: &ColumnMeta) -> BTreeMap<String, Value> {
    let mut props = BTreeMap::new();
    if let Some(fk) = &column.foreign_key {
        props.insert("reference".to_string(), json!(fk.resource));
        props.insert("target".to_string(), json!(fk.column));
    }
    if column.kind == ColumnKind::Enumerated {
        props.insert("choices".to_string(), json!(column.enum_values));
    }
    if matches!(column.kind, ColumnKind::Array(_)) {
        props.insert("multiple".to_string(), json!(true));
    }
    props
}

fn column_validators(
    column: &ColumnMeta,
    check_directives: &[(String, ValidatorDirective)],
) -> Vec<ValidatorDirective> {
    let mut validators = Vec::new();
    let required = !column.nullable
        && !column.has_default
        && !column.has_server_default
        && !column.autoincrement;
    if required {
        validators.push(ValidatorDirective::Required);
    }
    for (name, directive) in check_directives {
        if name == &column.name {
            validators.push(directive.clone());
        }
    }
    validators
}

fn relation_field(relation: &RelationMeta) -> FieldDescriptor {
    let mut props = BTreeMap::new();
    props.insert("reference".to_string(), json!(relation.resource));
    props.insert("source".to_string(), json!(relation.local_column));
    props.insert("target".to_string(), json!(relation.remote_column));
    props.insert("label".to_string(), json!(humanize(&relation.name)));
    props.insert("fields".to_string(), json!(relation.display_fields));

    FieldDescriptor {
        name: relation.name.clone(),
        kind: FieldKind::ReferenceMany,
        props,
        nullable: true,
        validators: Vec::new(),
    }
}

/// "comment_threads" -> "Comment threads"
fn humanize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, part) in name.split('_').filter(|p| !p.is_empty()).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        if i == 0 {
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        } else {
            out.push_str(part);
        }
    }
    out
}

fn fingerprint(
    name: &str,
    primary_key: &str,
    fields: &[FieldDescriptor],
    inputs: &[InputDescriptor],
) -> String {
    let payload = json!({
        "name": name,
        "primary_key": primary_key,
        "fields": fields,
        "inputs": inputs,
    });
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}
