//! Compile-time validation for the Entity derive macro.
//!
//! Mirrors the checks metadata performs at runtime so that a derived mapping
//! fails to compile instead of failing on first use.

use std::collections::HashSet;

use proc_macro2::Span;
use syn::Error;

use crate::parse::{EntityDef, RelationKindAttr};

/// Validate a parsed entity definition.
///
/// Performs all validations and returns combined errors if any issues are found.
pub fn validate_entity(def: &EntityDef) -> Result<(), Error> {
    let mut errors = Vec::new();

    validate_identifier(def, &mut errors);
    if let Some(table) = &def.table {
        validate_name("table", table, def.ident.span(), &mut errors);
    }
    validate_no_duplicate_members(def, &mut errors);
    validate_relations(def, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        let mut combined = errors.remove(0);
        for err in errors {
            combined.combine(err);
        }
        Err(combined)
    }
}

/// Exactly one `#[column(id)]` field.
fn validate_identifier(def: &EntityDef, errors: &mut Vec<Error>) {
    let ids: Vec<_> = def.columns.iter().filter(|c| c.id).collect();
    match ids.as_slice() {
        [_] => {}
        [] => errors.push(Error::new(
            def.ident.span(),
            "entity has no identifier; mark one field with #[column(id)]",
        )),
        [_, rest @ ..] => {
            for column in rest {
                errors.push(Error::new(
                    column.ident.span(),
                    "more than one #[column(id)] field",
                ));
            }
        }
    }
}

/// Table and column names must be plain SQL identifiers.
fn validate_name(kind: &str, name: &str, span: Span, errors: &mut Vec<Error>) {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        errors.push(Error::new(
            span,
            format!(
                "invalid {kind} name '{name}'; names should only contain alphanumeric characters \
                 and underscores and must not start with a digit"
            ),
        ));
    }
}

/// Column names are valid and no two fields share one.
fn validate_no_duplicate_members(def: &EntityDef, errors: &mut Vec<Error>) {
    let mut seen_columns: HashSet<String> = HashSet::new();
    for column in &def.columns {
        let name = column
            .column
            .clone()
            .unwrap_or_else(|| column.ident.to_string());
        validate_name("column", &name, column.ident.span(), errors);
        if !seen_columns.insert(name.clone()) {
            errors.push(Error::new(
                column.ident.span(),
                format!("duplicate column name '{name}'; another field already maps to this column"),
            ));
        }
    }
}

fn validate_relations(def: &EntityDef, errors: &mut Vec<Error>) {
    for relation in &def.relations {
        if relation.kind == RelationKindAttr::ManyToMany {
            match &relation.through {
                Some(table) => validate_name("table", table, relation.span, errors),
                None => errors.push(Error::new(
                    relation.span,
                    "#[many_to_many] requires through = \"<join table>\"",
                )),
            }
        }
        for column in [&relation.key_through_from, &relation.key_through_to]
            .into_iter()
            .flatten()
        {
            validate_name("column", column, relation.span, errors);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_entity;
    use syn::{DeriveInput, parse_quote};

    fn check(input: DeriveInput) -> Result<(), Error> {
        validate_entity(&parse_entity(&input).unwrap())
    }

    #[test]
    fn test_valid_entity() {
        check(parse_quote! {
            #[entity(table = "users")]
            struct User {
                #[column(id)]
                id: Option<i64>,
                #[column]
                name: String,
                #[many_to_many(through = "user_roles")]
                roles: Vec<EntityRef<Role>>,
            }
        })
        .unwrap();
    }

    #[test]
    fn test_identifier_required_and_unique() {
        let err = check(parse_quote! {
            struct User {
                #[column]
                name: String,
            }
        })
        .unwrap_err();
        assert!(err.to_string().contains("no identifier"), "{err}");

        let err = check(parse_quote! {
            struct User {
                #[column(id)]
                id: i64,
                #[column(id)]
                other: i64,
            }
        })
        .unwrap_err();
        assert!(err.to_string().contains("more than one"), "{err}");
    }

    #[test]
    fn test_invalid_table_name() {
        let err = check(parse_quote! {
            #[entity(table = "users; DROP")]
            struct User {
                #[column(id)]
                id: i64,
            }
        })
        .unwrap_err();
        assert!(err.to_string().contains("invalid table name"), "{err}");
    }

    #[test]
    fn test_duplicate_column() {
        let err = check(parse_quote! {
            struct User {
                #[column(id)]
                id: i64,
                #[column(name = "id")]
                legacy_id: i64,
            }
        })
        .unwrap_err();
        assert!(err.to_string().contains("duplicate column name 'id'"), "{err}");
    }

    #[test]
    fn test_many_to_many_needs_through() {
        let err = check(parse_quote! {
            struct User {
                #[column(id)]
                id: i64,
                #[many_to_many]
                roles: Vec<EntityRef<Role>>,
            }
        })
        .unwrap_err();
        assert!(err.to_string().contains("requires through"), "{err}");
    }
}
