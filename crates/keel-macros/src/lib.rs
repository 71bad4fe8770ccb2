//! Procedural macros for Keel.
//!
//! `keel-macros` is the **compile-time mapping layer**. `#[derive(Entity)]`
//! turns a plain struct into an entity: it emits the declared mapping read
//! by `keel_orm::DeclarationLoader`, field accessors keyed by name, the
//! lifecycle callback dispatch and one `Relate<T>` implementation per
//! related type.
//!
//! These macros are used by application crates via the `keel` facade.

use std::collections::BTreeMap;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::ext::IdentExt;

mod parse;
mod validate;

use parse::{EntityDef, RelationDef, parse_entity, type_to_string};

/// Derive macro for the `Entity` trait.
///
/// Only fields carrying a mapping attribute take part in persistence; every
/// other field keeps its `Default` value on hydration.
///
/// # Attributes
///
/// Struct level, `#[entity(...)]`:
/// - `table = "name"` - Override the table name (defaults to the lowercased struct name)
/// - `name = "Name"` - Override the entity name used by relation targets and mapping documents
/// - `event_prefix = "prefix"` - Broadcast lifecycle events as `prefix.preSave`, ...
/// - `repository = "Name"` - Name of the custom repository serving this entity
/// - `pre_save = "method"`, `post_load = "method"`, ... - Lifecycle callbacks, repeatable.
///   Methods have the signature `fn(&mut self, &EntityEvent) -> Result<()>`.
///
/// Field level:
/// - `#[column]` - Map the field to a column of the same name
/// - `#[column(id)]` - Map the identifier field
/// - `#[column(name = "col", type = "json")]` - Override the column name or storage type
/// - `#[belongs_to(key_from = "...", key_to = "...")]` on `Option<EntityRef<T>>`
/// - `#[has_one(...)]` on `Option<EntityRef<T>>`
/// - `#[has_many(key_from = "...", key_to = "...", order_by = "field desc")]` on `Vec<EntityRef<T>>`
/// - `#[many_to_many(through = "table", key_through_from = "...", key_through_to = "...")]`
///   on `Vec<EntityRef<T>>`
///
/// # Example
///
/// ```ignore
/// use keel::prelude::*;
///
/// #[derive(Debug, Default, Entity)]
/// #[entity(table = "users", event_prefix = "user", pre_save = "touch")]
/// struct User {
///     #[column(id)]
///     id: Option<i64>,
///
///     #[column]
///     name: String,
///
///     #[has_many(order_by = "title")]
///     posts: Vec<EntityRef<Post>>,
/// }
///
/// impl User {
///     fn touch(&mut self, _event: &EntityEvent) -> keel::Result<()> {
///         self.name = self.name.trim().to_string();
///         Ok(())
///     }
/// }
/// ```
#[proc_macro_derive(Entity, attributes(entity, column, belongs_to, has_one, has_many, many_to_many))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let def = match parse_entity(&input) {
        Ok(def) => def,
        Err(e) => return e.to_compile_error().into(),
    };

    if let Err(e) = validate::validate_entity(&def) {
        return e.to_compile_error().into();
    }

    let entity_impl = generate_entity_impl(&def);
    let relate_impls = generate_relate_impls(&def);
    quote! {
        #entity_impl
        #relate_impls
    }
    .into()
}

fn opt_string(value: Option<&String>) -> TokenStream2 {
    match value {
        Some(v) => quote! { ::core::option::Option::Some(::std::string::String::from(#v)) },
        None => quote! { ::core::option::Option::None },
    }
}

/// Generate the `Entity` implementation.
fn generate_entity_impl(def: &EntityDef) -> TokenStream2 {
    let ident = &def.ident;
    let name = &def.name;
    let declare_body = generate_declare(def);

    let field_names: Vec<String> = def
        .columns
        .iter()
        .map(|c| c.ident.unraw().to_string())
        .collect();
    let field_idents: Vec<&syn::Ident> = def.columns.iter().map(|c| &c.ident).collect();

    let mut callback_idents: Vec<&syn::Ident> = Vec::new();
    for (_, method) in &def.callbacks {
        if !callback_idents.contains(&method) {
            callback_idents.push(method);
        }
    }
    let callback_names: Vec<String> = callback_idents.iter().map(ToString::to_string).collect();

    quote! {
        impl ::keel_orm::Entity for #ident {
            fn entity_name() -> &'static str {
                #name
            }

            fn declare() -> ::core::option::Option<::keel_orm::EntityConfig> {
                #declare_body
            }

            fn get_value(&self, field: &str) -> ::core::option::Option<::keel_orm::Value> {
                match field {
                    #(
                        #field_names => ::core::option::Option::Some(
                            ::keel_orm::Value::from(::core::clone::Clone::clone(&self.#field_idents)),
                        ),
                    )*
                    _ => ::core::option::Option::None,
                }
            }

            fn set_value(&mut self, field: &str, value: ::keel_orm::Value) -> ::keel_orm::Result<()> {
                match field {
                    #(
                        #field_names => {
                            self.#field_idents = ::keel_orm::field_value(field, &value)?;
                            ::core::result::Result::Ok(())
                        }
                    )*
                    other => ::core::result::Result::Err(::keel_orm::unknown_member(#name, "field", other)),
                }
            }

            fn call_event(
                &mut self,
                callback: &str,
                event: &::keel_orm::EntityEvent,
            ) -> ::keel_orm::Result<()> {
                let _ = event;
                match callback {
                    #( #callback_names => self.#callback_idents(event), )*
                    other => ::core::result::Result::Err(::keel_orm::unknown_member(#name, "callback", other)),
                }
            }
        }
    }
}

/// Generate the body of `Entity::declare`.
fn generate_declare(def: &EntityDef) -> TokenStream2 {
    let table = opt_string(def.table.as_ref());
    let event_prefix = opt_string(def.event_prefix.as_ref());
    let repository = opt_string(def.repository.as_ref());

    let fields = def.columns.iter().map(|column| {
        let field = column.ident.unraw().to_string();
        let column_name = opt_string(column.column.as_ref());
        let field_type = opt_string(column.field_type.as_ref());
        let id = column.id;
        quote! {
            config.fields.push(::keel_orm::FieldConfig {
                name: ::std::string::String::from(#field),
                column: #column_name,
                field_type: #field_type,
                id: #id,
            });
        }
    });

    let relations = def.relations.iter().map(|relation| {
        let name = relation.ident.unraw().to_string();
        let kind = syn::Ident::new(relation.kind.variant(), proc_macro2::Span::call_site());
        let target = &relation.target;
        let key_from = opt_string(relation.key_from.as_ref());
        let key_to = opt_string(relation.key_to.as_ref());
        let through = opt_string(relation.through.as_ref());
        let key_through_from = opt_string(relation.key_through_from.as_ref());
        let key_through_to = opt_string(relation.key_through_to.as_ref());
        let order_by = opt_string(relation.order_by.as_ref());
        quote! {
            config.relations.push(::keel_orm::RelationConfig {
                name: ::std::string::String::from(#name),
                kind: ::keel_orm::RelationKind::#kind,
                target: ::std::string::String::from(<#target as ::keel_orm::Entity>::entity_name()),
                key_from: #key_from,
                key_to: #key_to,
                table_through: #through,
                key_through_from: #key_through_from,
                key_through_to: #key_through_to,
                order_by: #order_by,
            });
        }
    });

    let events = def.callbacks.iter().map(|(event, method)| {
        let method = method.to_string();
        quote! {
            config
                .events
                .entry(::std::string::String::from(#event))
                .or_default()
                .push(::std::string::String::from(#method));
        }
    });

    quote! {
        let mut config = ::keel_orm::EntityConfig::default();
        config.table = #table;
        config.event_prefix = #event_prefix;
        config.repository = #repository;
        #(#fields)*
        #(#relations)*
        #(#events)*
        ::core::option::Option::Some(config)
    }
}

/// Generate one `Relate<T>` implementation per distinct relation target.
fn generate_relate_impls(def: &EntityDef) -> TokenStream2 {
    let ident = &def.ident;
    let name = &def.name;

    let mut by_target: BTreeMap<String, Vec<&RelationDef>> = BTreeMap::new();
    for relation in &def.relations {
        by_target
            .entry(type_to_string(&relation.target))
            .or_default()
            .push(relation);
    }

    let impls = by_target.values().map(|relations| {
        let target = &relations[0].target;
        let arms = relations.iter().map(|relation| {
            let field = &relation.ident;
            let relation_name = relation.ident.unraw().to_string();
            let assign = if relation.many {
                quote! { self.#field = related; }
            } else {
                quote! { self.#field = ::core::iter::IntoIterator::into_iter(related).next(); }
            };
            quote! {
                #relation_name => {
                    #assign
                    ::core::result::Result::Ok(())
                }
            }
        });

        quote! {
            impl ::keel_orm::Relate<#target> for #ident {
                fn relate(
                    &mut self,
                    relation: &str,
                    related: ::std::vec::Vec<::keel_orm::EntityRef<#target>>,
                ) -> ::keel_orm::Result<()> {
                    match relation {
                        #(#arms)*
                        other => ::core::result::Result::Err(::keel_orm::unknown_member(#name, "relation", other)),
                    }
                }
            }
        }
    });

    quote! { #(#impls)* }
}
