//! Parsing logic for the Entity derive macro.
//!
//! This module extracts struct-level and field-level attributes from the
//! derive input to build the `EntityDef`, `ColumnDef` and `RelationDef`
//! structures used for code generation.

use proc_macro2::Span;
use quote::ToTokens;
use syn::meta::ParseNestedMeta;
use syn::{
    Attribute, Data, DeriveInput, Error, Field, Fields, GenericArgument, Ident, Lit,
    PathArguments, Result, Type,
};

/// Lifecycle phases accepted as struct attribute keys, with their event name.
pub const PHASES: [(&str, &str); 9] = [
    ("pre_save", "preSave"),
    ("post_save", "postSave"),
    ("pre_create", "preCreate"),
    ("post_create", "postCreate"),
    ("pre_update", "preUpdate"),
    ("post_update", "postUpdate"),
    ("pre_delete", "preDelete"),
    ("post_delete", "postDelete"),
    ("post_load", "postLoad"),
];

/// Parsed entity definition from a struct with `#[derive(Entity)]`.
#[derive(Debug)]
pub struct EntityDef {
    /// The struct name (e.g., `User`).
    pub ident: Ident,
    /// Entity name reported by `Entity::entity_name`.
    pub name: String,
    /// Table override. `None` lets metadata derive it from the name.
    pub table: Option<String>,
    pub event_prefix: Option<String>,
    pub repository: Option<String>,
    /// `(event name, method)` pairs in declaration order.
    pub callbacks: Vec<(String, Ident)>,
    pub columns: Vec<ColumnDef>,
    pub relations: Vec<RelationDef>,
}

/// A field mapped with `#[column]`.
#[derive(Debug)]
pub struct ColumnDef {
    pub ident: Ident,
    /// Column override (`name = "..."`).
    pub column: Option<String>,
    /// Storage type hint (`type = "json"`).
    pub field_type: Option<String>,
    pub id: bool,
}

/// The relation attribute a field carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKindAttr {
    BelongsTo,
    HasOne,
    HasMany,
    ManyToMany,
}

impl RelationKindAttr {
    fn from_attr(attr: &Attribute) -> Option<Self> {
        let path = attr.path();
        if path.is_ident("belongs_to") {
            Some(Self::BelongsTo)
        } else if path.is_ident("has_one") {
            Some(Self::HasOne)
        } else if path.is_ident("has_many") {
            Some(Self::HasMany)
        } else if path.is_ident("many_to_many") {
            Some(Self::ManyToMany)
        } else {
            None
        }
    }

    pub fn attr_name(self) -> &'static str {
        match self {
            Self::BelongsTo => "belongs_to",
            Self::HasOne => "has_one",
            Self::HasMany => "has_many",
            Self::ManyToMany => "many_to_many",
        }
    }

    /// Variant name of `keel_orm::RelationKind`.
    pub fn variant(self) -> &'static str {
        match self {
            Self::BelongsTo => "BelongsTo",
            Self::HasOne => "HasOne",
            Self::HasMany => "HasMany",
            Self::ManyToMany => "ManyToMany",
        }
    }

    pub fn is_to_many(self) -> bool {
        matches!(self, Self::HasMany | Self::ManyToMany)
    }
}

/// A field mapped with one of the relation attributes.
#[derive(Debug)]
pub struct RelationDef {
    pub ident: Ident,
    pub kind: RelationKindAttr,
    /// The related entity type `T` of `Option<EntityRef<T>>` / `Vec<EntityRef<T>>`.
    pub target: Type,
    /// Whether the field is a `Vec`.
    pub many: bool,
    pub key_from: Option<String>,
    pub key_to: Option<String>,
    pub through: Option<String>,
    pub key_through_from: Option<String>,
    pub key_through_to: Option<String>,
    pub order_by: Option<String>,
    pub span: Span,
}

/// Parse `#[derive(Entity)]` input into an `EntityDef`.
pub fn parse_entity(input: &DeriveInput) -> Result<EntityDef> {
    if !input.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &input.generics,
            "Entity cannot be derived for generic structs",
        ));
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            Fields::Unnamed(_) => {
                return Err(Error::new_spanned(
                    input,
                    "Entity requires a struct with named fields, not a tuple struct",
                ));
            }
            Fields::Unit => {
                return Err(Error::new_spanned(
                    input,
                    "Entity requires a struct with fields, not a unit struct",
                ));
            }
        },
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Entity can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Entity can only be derived for structs, not unions",
            ));
        }
    };

    let mut def = EntityDef {
        ident: input.ident.clone(),
        name: input.ident.to_string(),
        table: None,
        event_prefix: None,
        repository: None,
        callbacks: Vec::new(),
        columns: Vec::new(),
        relations: Vec::new(),
    };
    parse_struct_attrs(&input.attrs, &mut def)?;

    for field in fields {
        parse_field(field, &mut def)?;
    }

    Ok(def)
}

/// Read the `= "literal"` part of a `key = "literal"` meta item.
fn string_value(meta: &ParseNestedMeta<'_>, what: &str) -> Result<String> {
    let value: Lit = meta.value()?.parse()?;
    match value {
        Lit::Str(lit) => Ok(lit.value()),
        other => Err(Error::new_spanned(
            other,
            format!("expected string literal for {what}"),
        )),
    }
}

fn set_once(slot: &mut Option<String>, meta: &ParseNestedMeta<'_>, key: &str) -> Result<()> {
    if slot.is_some() {
        return Err(meta.error(format!("duplicate entity attribute: {key}")));
    }
    *slot = Some(string_value(meta, key)?);
    Ok(())
}

/// Parse struct-level `#[entity(...)]` attributes.
///
/// Supported keys:
/// - `name = "..."`, `table = "..."`, `event_prefix = "..."`, `repository = "..."`
/// - one key per lifecycle phase (`pre_save = "method"`, ...), repeatable
fn parse_struct_attrs(attrs: &[Attribute], def: &mut EntityDef) -> Result<()> {
    let mut name: Option<String> = None;

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                set_once(&mut name, &meta, "name")
            } else if meta.path.is_ident("table") {
                set_once(&mut def.table, &meta, "table")
            } else if meta.path.is_ident("event_prefix") {
                set_once(&mut def.event_prefix, &meta, "event_prefix")
            } else if meta.path.is_ident("repository") {
                set_once(&mut def.repository, &meta, "repository")
            } else if let Some((_, event)) = PHASES.iter().find(|(key, _)| meta.path.is_ident(key)) {
                let method = string_value(&meta, "callback method")?;
                let ident = syn::parse_str::<Ident>(&method)
                    .map_err(|_| meta.error(format!("invalid callback method name '{method}'")))?;
                def.callbacks.push(((*event).to_string(), ident));
                Ok(())
            } else {
                Err(Error::new_spanned(
                    &meta.path,
                    "unknown entity attribute (supported: name, table, event_prefix, repository, \
                     pre_save, post_save, pre_create, post_create, pre_update, post_update, \
                     pre_delete, post_delete, post_load)",
                ))
            }
        })?;
    }

    if let Some(name) = name {
        def.name = name;
    }
    Ok(())
}

/// Parse a single field and its attributes.
fn parse_field(field: &Field, def: &mut EntityDef) -> Result<()> {
    let ident = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;

    let mut mapped = false;
    for attr in &field.attrs {
        if attr.path().is_ident("column") {
            if mapped {
                return Err(Error::new_spanned(attr, "field is mapped more than once"));
            }
            mapped = true;
            def.columns.push(parse_column(attr, &ident)?);
        } else if let Some(kind) = RelationKindAttr::from_attr(attr) {
            if mapped {
                return Err(Error::new_spanned(attr, "field is mapped more than once"));
            }
            mapped = true;
            def.relations.push(parse_relation(attr, kind, &ident, &field.ty)?);
        }
    }
    Ok(())
}

/// Parse `#[column]`, `#[column(id)]` or `#[column(name = "...", type = "...")]`.
fn parse_column(attr: &Attribute, ident: &Ident) -> Result<ColumnDef> {
    let mut column = ColumnDef {
        ident: ident.clone(),
        column: None,
        field_type: None,
        id: false,
    };

    // Bare `#[column]`.
    if matches!(attr.meta, syn::Meta::Path(_)) {
        return Ok(column);
    }

    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("id") {
            column.id = true;
            Ok(())
        } else if meta.path.is_ident("name") {
            column.column = Some(string_value(&meta, "column name")?);
            Ok(())
        } else if meta.path.is_ident("type") {
            column.field_type = Some(string_value(&meta, "column type")?);
            Ok(())
        } else {
            Err(Error::new_spanned(
                &meta.path,
                "unknown column attribute (supported: id, name, type)",
            ))
        }
    })?;
    Ok(column)
}

fn parse_relation(
    attr: &Attribute,
    kind: RelationKindAttr,
    ident: &Ident,
    ty: &Type,
) -> Result<RelationDef> {
    let (many, target) = relation_target(ty).ok_or_else(|| {
        Error::new_spanned(
            ty,
            "relation fields must be Option<EntityRef<T>> (to-one) or Vec<EntityRef<T>> (to-many)",
        )
    })?;
    if many != kind.is_to_many() {
        let expected = if kind.is_to_many() {
            "Vec<EntityRef<T>>"
        } else {
            "Option<EntityRef<T>>"
        };
        return Err(Error::new_spanned(
            ty,
            format!("#[{}] fields must be {}", kind.attr_name(), expected),
        ));
    }

    let mut relation = RelationDef {
        ident: ident.clone(),
        kind,
        target: target.clone(),
        many,
        key_from: None,
        key_to: None,
        through: None,
        key_through_from: None,
        key_through_to: None,
        order_by: None,
        span: ident.span(),
    };

    if matches!(attr.meta, syn::Meta::Path(_)) {
        return Ok(relation);
    }

    attr.parse_nested_meta(|meta| {
        let key = meta
            .path
            .get_ident()
            .map(ToString::to_string)
            .unwrap_or_default();
        let slot = match key.as_str() {
            "key_from" => &mut relation.key_from,
            "key_to" => &mut relation.key_to,
            "through" if kind == RelationKindAttr::ManyToMany => &mut relation.through,
            "key_through_from" if kind == RelationKindAttr::ManyToMany => &mut relation.key_through_from,
            "key_through_to" if kind == RelationKindAttr::ManyToMany => &mut relation.key_through_to,
            "order_by" if kind.is_to_many() => &mut relation.order_by,
            _ => {
                return Err(Error::new_spanned(
                    &meta.path,
                    format!("unknown {} attribute", kind.attr_name()),
                ));
            }
        };
        *slot = Some(string_value(&meta, &key)?);
        Ok(())
    })?;
    Ok(relation)
}

/// Split `Option<EntityRef<T>>` / `Vec<EntityRef<T>>` into `(is_vec, T)`.
pub fn relation_target(ty: &Type) -> Option<(bool, &Type)> {
    let (outer, inner) = single_generic(ty)?;
    let many = match outer.as_str() {
        "Option" => false,
        "Vec" => true,
        _ => return None,
    };
    let (wrapper, target) = single_generic(inner)?;
    (wrapper == "EntityRef").then_some((many, target))
}

/// The last path segment name of `ty` and its only generic type argument.
fn single_generic(ty: &Type) -> Option<(String, &Type)> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    let mut types = args.args.iter().filter_map(|arg| match arg {
        GenericArgument::Type(ty) => Some(ty),
        _ => None,
    });
    let first = types.next()?;
    if types.next().is_some() {
        return None;
    }
    Some((segment.ident.to_string(), first))
}

/// Render a type for error messages.
pub fn type_to_string(ty: &Type) -> String {
    ty.to_token_stream().to_string().replace(' ', "")
}
