//! Entity metadata: the static mapping description of one entity type.
//!
//! Loaders produce an [`EntityConfig`], a plain serializable document.
//! [`Metadata::build`] validates it once and turns it into the immutable
//! descriptor the entity manager works from: table, identifier, field to
//! column mappings, relation mappings and lifecycle callbacks.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};

use keel_core::{
    ConfigErrorKind, Error, OrderDirection, Result, Row, TypeError, Value, Values,
    is_valid_identifier,
};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityClass};
use crate::events::Phase;

// ============================================================================
// Loader output
// ============================================================================

/// Mapping document for one entity type, as produced by a loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    /// Table name. Defaults to the lowercased entity name.
    pub table: Option<String>,
    /// Identifier field. Optional when exactly one field is flagged `id`.
    pub identifier: Option<String>,
    pub event_prefix: Option<String>,
    /// Name of the custom repository type registered for this entity.
    pub repository: Option<String>,
    pub fields: Vec<FieldConfig>,
    pub relations: Vec<RelationConfig>,
    /// Lifecycle phase name (`preSave`, ...) to callback names.
    pub events: BTreeMap<String, Vec<String>>,
}

impl EntityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn event_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.event_prefix = Some(prefix.into());
        self
    }

    pub fn repository(mut self, name: impl Into<String>) -> Self {
        self.repository = Some(name.into());
        self
    }

    pub fn field(mut self, field: FieldConfig) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relation(mut self, relation: RelationConfig) -> Self {
        self.relations.push(relation);
        self
    }

    /// Register a callback for a lifecycle phase.
    pub fn event(mut self, phase: Phase, callback: impl Into<String>) -> Self {
        self.events
            .entry(phase.as_str().to_string())
            .or_default()
            .push(callback.into());
        self
    }
}

/// One mapped field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    pub name: String,
    /// Column name. Defaults to the field name.
    pub column: Option<String>,
    /// Storage type hint (`json`, `boolean`, ...).
    #[serde(rename = "type")]
    pub field_type: Option<String>,
    /// Whether this field is the identifier.
    pub id: bool,
}

impl FieldConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn field_type(mut self, field_type: impl Into<String>) -> Self {
        self.field_type = Some(field_type.into());
        self
    }

    pub fn id(mut self) -> Self {
        self.id = true;
        self
    }
}

/// The four supported relation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    ManyToMany,
}

impl RelationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            RelationKind::BelongsTo => "BelongsTo",
            RelationKind::HasOne => "HasOne",
            RelationKind::HasMany => "HasMany",
            RelationKind::ManyToMany => "ManyToMany",
        }
    }

    /// Whether each parent receives a collection.
    pub const fn is_to_many(self) -> bool {
        matches!(self, RelationKind::HasMany | RelationKind::ManyToMany)
    }
}

/// One mapped relation.
///
/// Key names refer to fields, `table_through` and the `key_through_*`
/// names to the join table and its columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RelationKind,
    /// Entity name of the related type.
    pub target: String,
    #[serde(default)]
    pub key_from: Option<String>,
    #[serde(default)]
    pub key_to: Option<String>,
    #[serde(default)]
    pub table_through: Option<String>,
    #[serde(default)]
    pub key_through_from: Option<String>,
    #[serde(default)]
    pub key_through_to: Option<String>,
    /// `"field [asc|desc], ..."`. Only honoured for to-many relations.
    #[serde(default)]
    pub order_by: Option<String>,
}

impl RelationConfig {
    pub fn new(name: impl Into<String>, kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            key_from: None,
            key_to: None,
            table_through: None,
            key_through_from: None,
            key_through_to: None,
            order_by: None,
        }
    }

    pub fn key_from(mut self, key: impl Into<String>) -> Self {
        self.key_from = Some(key.into());
        self
    }

    pub fn key_to(mut self, key: impl Into<String>) -> Self {
        self.key_to = Some(key.into());
        self
    }

    pub fn through(
        mut self,
        table: impl Into<String>,
        key_from: impl Into<String>,
        key_to: impl Into<String>,
    ) -> Self {
        self.table_through = Some(table.into());
        self.key_through_from = Some(key_from.into());
        self.key_through_to = Some(key_to.into());
        self
    }

    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by = Some(order.into());
        self
    }
}

// ============================================================================
// Validated metadata
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    pub name: String,
    pub column: String,
    pub field_type: Option<String>,
    pub identifier: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationMapping {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    /// Field on the owning entity.
    pub key_from: String,
    /// Field on the target entity. `None` means the target's identifier.
    pub key_to: Option<String>,
    pub table_through: Option<String>,
    pub key_through_from: Option<String>,
    /// `None` means `<target table>_id`.
    pub key_through_to: Option<String>,
    pub order_by: Vec<(String, OrderDirection)>,
}

/// Immutable description of one entity type.
#[derive(Debug, Clone)]
pub struct Metadata {
    name: String,
    type_id: TypeId,
    table: String,
    identifier: usize,
    fields: Vec<FieldMapping>,
    field_index: HashMap<String, usize>,
    relations: Vec<RelationMapping>,
    relation_index: HashMap<String, usize>,
    events: HashMap<Phase, Vec<String>>,
    event_prefix: Option<String>,
    repository: Option<String>,
}

fn parse_order_by(entity: &str, input: &str) -> Result<Vec<(String, OrderDirection)>> {
    let mut order = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let mut words = part.split_whitespace();
        let field = words.next().unwrap_or_default().to_string();
        let direction = match words.next() {
            None => OrderDirection::Asc,
            Some(word) => OrderDirection::parse(word).ok_or_else(|| {
                Error::config_for(
                    ConfigErrorKind::Parse,
                    entity,
                    format!("invalid order direction '{}' in '{}'", word, input),
                )
            })?,
        };
        order.push((field, direction));
    }
    Ok(order)
}

impl Metadata {
    /// Validate a loader document and build the metadata for `class`.
    pub fn build(class: &EntityClass, config: EntityConfig, validate_names: bool) -> Result<Self> {
        let name = class.name();
        let duplicate = |member: &str| {
            Error::config_for(
                ConfigErrorKind::DuplicateMapping,
                name,
                format!("duplicate mapping detected, '{}' already exists", member),
            )
        };
        let check_name = |kind: &str, value: &str| {
            if validate_names && !is_valid_identifier(value) {
                Err(Error::config_for(
                    ConfigErrorKind::InvalidName,
                    name,
                    format!("invalid {} name '{}'", kind, value),
                ))
            } else {
                Ok(())
            }
        };

        let table = config.table.unwrap_or_else(|| name.to_lowercase());
        check_name("table", &table)?;

        let mut fields = Vec::with_capacity(config.fields.len());
        let mut field_index = HashMap::new();
        for field in config.fields {
            if field_index.contains_key(&field.name) {
                return Err(duplicate(&field.name));
            }
            let column = field.column.unwrap_or_else(|| field.name.clone());
            check_name("column", &column)?;
            field_index.insert(field.name.clone(), fields.len());
            fields.push(FieldMapping {
                name: field.name,
                column,
                field_type: field.field_type,
                identifier: field.id,
            });
        }

        let identifier = match &config.identifier {
            Some(id) => {
                let index = *field_index.get(id).ok_or_else(|| {
                    Error::config_for(
                        ConfigErrorKind::Identifier,
                        name,
                        format!("identifier '{}' is not a mapped field", id),
                    )
                })?;
                fields[index].identifier = true;
                index
            }
            None => {
                let flagged: Vec<usize> = (0..fields.len()).filter(|i| fields[*i].identifier).collect();
                match flagged.as_slice() {
                    [index] => *index,
                    [] => {
                        return Err(Error::config_for(
                            ConfigErrorKind::Identifier,
                            name,
                            "no identifier field mapped",
                        ));
                    }
                    _ => {
                        return Err(Error::config_for(
                            ConfigErrorKind::Identifier,
                            name,
                            "more than one identifier field mapped",
                        ));
                    }
                }
            }
        };
        if fields.iter().filter(|f| f.identifier).count() > 1 {
            return Err(Error::config_for(
                ConfigErrorKind::Identifier,
                name,
                "more than one identifier field mapped",
            ));
        }

        let mut relations = Vec::with_capacity(config.relations.len());
        let mut relation_index = HashMap::new();
        for relation in config.relations {
            if field_index.contains_key(&relation.name) || relation_index.contains_key(&relation.name) {
                return Err(duplicate(&relation.name));
            }

            let key_from = relation.key_from.unwrap_or_else(|| match relation.kind {
                RelationKind::BelongsTo => format!("{}_id", relation.name),
                _ => fields[identifier].name.clone(),
            });
            let key_to = relation.key_to.or_else(|| match relation.kind {
                RelationKind::HasOne | RelationKind::HasMany => Some(format!("{}_id", table)),
                _ => None,
            });

            let (table_through, key_through_from) = if relation.kind == RelationKind::ManyToMany {
                let through = relation.table_through.ok_or_else(|| {
                    Error::config_for(
                        ConfigErrorKind::UnknownRelation,
                        name,
                        format!("relation '{}' needs a through table", relation.name),
                    )
                })?;
                check_name("table", &through)?;
                let from = relation
                    .key_through_from
                    .unwrap_or_else(|| format!("{}_id", table));
                check_name("column", &from)?;
                (Some(through), Some(from))
            } else {
                (None, None)
            };
            if let Some(to) = &relation.key_through_to {
                check_name("column", to)?;
            }

            let order_by = match (&relation.order_by, relation.kind.is_to_many()) {
                (Some(order), true) => parse_order_by(name, order)?,
                _ => Vec::new(),
            };

            relation_index.insert(relation.name.clone(), relations.len());
            relations.push(RelationMapping {
                name: relation.name,
                kind: relation.kind,
                target: relation.target,
                key_from,
                key_to,
                table_through,
                key_through_from,
                key_through_to: relation.key_through_to,
                order_by,
            });
        }

        let mut events: HashMap<Phase, Vec<String>> = HashMap::new();
        for (phase_name, callbacks) in config.events {
            let phase = Phase::parse(&phase_name).ok_or_else(|| {
                Error::config_for(
                    ConfigErrorKind::Parse,
                    name,
                    format!("unknown lifecycle phase '{}'", phase_name),
                )
            })?;
            events.entry(phase).or_default().extend(callbacks);
        }

        Ok(Self {
            name: name.to_string(),
            type_id: class.type_id(),
            table,
            identifier,
            fields,
            field_index,
            relations,
            relation_index,
            events,
            event_prefix: config.event_prefix.filter(|p| !p.is_empty()),
            repository: config.repository,
        })
    }

    /// Entity name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this metadata describes `E`.
    pub fn describes<E: Entity>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Identifier field name.
    pub fn identifier(&self) -> &str {
        &self.fields[self.identifier].name
    }

    /// Identifier column name.
    pub fn identifier_column(&self) -> &str {
        &self.fields[self.identifier].column
    }

    pub fn fields(&self) -> &[FieldMapping] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldMapping> {
        self.field_index.get(name).map(|i| &self.fields[*i])
    }

    /// Column mapped to `field`.
    pub fn column(&self, field: &str) -> Option<&str> {
        self.field(field).map(|f| f.column.as_str())
    }

    pub fn relations(&self) -> &[RelationMapping] {
        &self.relations
    }

    /// Look up a relation mapping by name.
    pub fn relation(&self, name: &str) -> Result<&RelationMapping> {
        self.relation_index
            .get(name)
            .map(|i| &self.relations[*i])
            .ok_or_else(|| {
                Error::config_for(
                    ConfigErrorKind::UnknownRelation,
                    self.name.as_str(),
                    format!("no relation named '{}'", name),
                )
            })
    }

    /// Callback names registered for `phase`, in order.
    pub fn events(&self, phase: Phase) -> &[String] {
        self.events.get(&phase).map_or(&[], Vec::as_slice)
    }

    pub fn event_prefix(&self) -> Option<&str> {
        self.event_prefix.as_deref()
    }

    /// Name of the framework event broadcast for `phase`.
    pub fn event_name(&self, phase: Phase) -> String {
        match &self.event_prefix {
            Some(prefix) => format!("{}.{}", prefix, phase.as_str()),
            None => phase.as_str().to_string(),
        }
    }

    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    /// Read a field value. Unmapped names read as NULL.
    pub fn get_value<E: Entity>(&self, entity: &E, field: &str) -> Value {
        entity.get_value(field).unwrap_or(Value::Null)
    }

    /// Current identifier value of `entity`.
    pub fn identifier_value<E: Entity>(&self, entity: &E) -> Value {
        self.get_value(entity, self.identifier())
    }

    pub fn set_value<E: Entity>(&self, entity: &mut E, field: &str, value: Value) -> Result<()> {
        entity.set_value(field, value)
    }

    /// Assign every mapped field present in `data`. Unmapped keys are skipped.
    pub fn set_values<E: Entity>(
        &self,
        entity: &mut E,
        data: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<()> {
        for (field, value) in data {
            if self.field_index.contains_key(&field) {
                entity.set_value(&field, value)?;
            } else {
                tracing::trace!(entity = %self.name, field = %field, "Skipping unmapped field");
            }
        }
        Ok(())
    }

    /// Column → storage value pairs for every mapped field.
    pub fn get_values<E: Entity>(&self, entity: &E) -> Values {
        self.fields
            .iter()
            .map(|f| (f.column.clone(), to_storage(f, self.get_value(entity, &f.name))))
            .collect()
    }

    /// Identifier value carried by a storage row.
    pub fn row_identifier(&self, row: &Row) -> Option<Value> {
        row.get_by_name(self.identifier_column())
            .filter(|v| !v.is_null())
            .cloned()
    }

    /// Build a fresh entity from a storage row. Columns the row lacks keep
    /// their default value; extra columns are ignored.
    pub fn hydrate<E: Entity>(&self, row: &Row) -> Result<E> {
        let mut entity = E::default();
        for field in &self.fields {
            if let Some(value) = row.get_by_name(&field.column) {
                entity.set_value(&field.name, from_storage(field, value.clone())?)?;
            }
        }
        Ok(entity)
    }
}

fn is_json(field: &FieldMapping) -> bool {
    matches!(field.field_type.as_deref(), Some("json" | "json_array"))
}

fn to_storage(field: &FieldMapping, value: Value) -> Value {
    match value {
        Value::Json(json) if is_json(field) => Value::Text(json.to_string()),
        other => other,
    }
}

fn from_storage(field: &FieldMapping, value: Value) -> Result<Value> {
    match (field.field_type.as_deref(), value) {
        (Some("json" | "json_array"), Value::Text(text)) => serde_json::from_str(&text)
            .map(Value::Json)
            .map_err(|e| {
                Error::Type(TypeError {
                    expected: "JSON",
                    actual: e.to_string(),
                    column: Some(field.column.clone()),
                    rust_type: None,
                })
            }),
        (Some("boolean"), value @ (Value::Int(_) | Value::BigInt(_))) => {
            Ok(Value::Bool(value.as_i64().is_some_and(|v| v != 0)))
        }
        (_, value) => Ok(value),
    }
}
