use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{parse_macro_input, DeriveInput, Lit, Meta, NestedMeta};

/// Derives `sqlx_with_aggregate::Model`.
///
/// Struct attributes:
///
/// * `#[table_name = "users"]` - table name, defaults to the snake_case struct name
/// * `#[soft_delete]` or `#[soft_delete = "removed_at"]` - soft-delete column, `deleted_at` by default
/// * `#[relation(name = "posts", has_many = "Post", ...)]` - one per relation
///
/// The primary key is the field marked `#[primary_key]`, or the first field.
#[proc_macro_derive(Model, attributes(table_name, soft_delete, relation, primary_key))]
pub fn model_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match Schema::new(&input) {
        Ok(schema) => schema.gen_model_impl(&input).into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Converts a CamelCase string to snake_case, with the same rule as
/// `sqlx_with_aggregate::to_snake_case`: an uppercase letter after an
/// underscore does not add a second one.
///
/// ```ignore
/// to_snake_case("MyTable");  // "my_table"
/// ```
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() * 2);

    for (i, c) in s.char_indices() {
        if i > 0 && c.is_uppercase() && !result.ends_with('_') {
            result.push('_');
        }
        result.extend(c.to_lowercase());
    }

    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelationKind {
    HasOne,
    HasMany,
    BelongsTo,
    BelongsToMany,
}

impl RelationKind {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "has_one" => Some(RelationKind::HasOne),
            "has_many" => Some(RelationKind::HasMany),
            "belongs_to" => Some(RelationKind::BelongsTo),
            "belongs_to_many" => Some(RelationKind::BelongsToMany),
            _ => None,
        }
    }

    fn constructor(&self) -> syn::Ident {
        let name = match self {
            RelationKind::HasOne => "has_one",
            RelationKind::HasMany => "has_many",
            RelationKind::BelongsTo => "belongs_to",
            RelationKind::BelongsToMany => "belongs_to_many",
        };
        syn::Ident::new(name, Span::call_site())
    }
}

/// A parsed `#[relation(...)]` attribute.
struct RelationAttr {
    name: String,
    kind: RelationKind,
    related: syn::Path,
    foreign_key: Option<String>,
    local_key: Option<String>,
    pivot: Option<String>,
    foreign_pivot_key: Option<String>,
    related_pivot_key: Option<String>,
    filters: Vec<String>,
}

impl RelationAttr {
    fn parse(attr: &syn::Attribute) -> syn::Result<Self> {
        let list = match attr.parse_meta()? {
            Meta::List(list) => list,
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "expected #[relation(name = \"..\", has_many = \"Type\", ...)]",
                ))
            }
        };

        let mut name = None;
        let mut kind = None;
        let mut foreign_key = None;
        let mut local_key = None;
        let mut pivot = None;
        let mut foreign_pivot_key = None;
        let mut related_pivot_key = None;
        let mut filters = Vec::new();

        for nested in list.nested.iter() {
            let nv = match nested {
                NestedMeta::Meta(Meta::NameValue(nv)) => nv,
                other => return Err(syn::Error::new_spanned(other, "expected key = \"value\"")),
            };
            let value = match &nv.lit {
                Lit::Str(s) => s,
                other => return Err(syn::Error::new_spanned(other, "expected a string literal")),
            };
            let key = nv
                .path
                .get_ident()
                .map(|ident| ident.to_string())
                .ok_or_else(|| syn::Error::new_spanned(&nv.path, "expected a plain key"))?;

            if let Some(relation_kind) = RelationKind::from_key(&key) {
                if kind.is_some() {
                    return Err(syn::Error::new_spanned(nv, "relation kind given more than once"));
                }
                kind = Some((relation_kind, value.parse::<syn::Path>()?));
                continue;
            }

            match key.as_str() {
                "name" => name = Some(value.value()),
                "foreign_key" => foreign_key = Some(value.value()),
                "local_key" | "owner_key" => local_key = Some(value.value()),
                "pivot" => pivot = Some(value.value()),
                "foreign_pivot_key" => foreign_pivot_key = Some(value.value()),
                "related_pivot_key" => related_pivot_key = Some(value.value()),
                "filter" => filters.push(value.value()),
                _ => return Err(syn::Error::new_spanned(&nv.path, format!("unknown relation key `{}`", key))),
            }
        }

        let (kind, related) = kind.ok_or_else(|| {
            syn::Error::new_spanned(
                attr,
                "relation needs one of has_one, has_many, belongs_to, belongs_to_many",
            )
        })?;
        let name = name.ok_or_else(|| syn::Error::new_spanned(attr, "relation needs a `name`"))?;

        Ok(Self {
            name,
            kind,
            related,
            foreign_key,
            local_key,
            pivot,
            foreign_pivot_key,
            related_pivot_key,
            filters,
        })
    }

    fn gen_definition(&self) -> TokenStream2 {
        let name = &self.name;
        let related = &self.related;
        let constructor = self.kind.constructor();

        let optional = |method: &str, value: &Option<String>| -> TokenStream2 {
            let method = syn::Ident::new(method, Span::call_site());
            match value {
                Some(value) => quote! { .#method(#value) },
                None => quote! {},
            }
        };
        let foreign_key = optional("foreign_key", &self.foreign_key);
        let local_key = optional("local_key", &self.local_key);
        let pivot = optional("pivot", &self.pivot);
        let foreign_pivot_key = optional("foreign_pivot_key", &self.foreign_pivot_key);
        let related_pivot_key = optional("related_pivot_key", &self.related_pivot_key);
        let filters = self.filters.iter();

        quote! {
            ::sqlx_with_aggregate::RelationDefinition::#constructor(
                #name,
                <#related as ::sqlx_with_aggregate::Model>::scheme,
            )
            #foreign_key
            #local_key
            #pivot
            #foreign_pivot_key
            #related_pivot_key
            #(.filter(#filters))*
        }
    }
}

struct Schema {
    table_name: String,
    model_name: String,
    id_field: String,
    soft_delete: Option<String>,
    relations: Vec<RelationAttr>,
}

impl Schema {
    fn new(input: &DeriveInput) -> syn::Result<Self> {
        let model_name = to_snake_case(&input.ident.to_string());

        let fields = match &input.data {
            syn::Data::Struct(data) => &data.fields,
            _ => return Err(syn::Error::new_spanned(&input.ident, "Only structs are supported")),
        };

        let id_field = fields
            .iter()
            .find(|field| field.attrs.iter().any(|attr| attr.path.is_ident("primary_key")))
            .or_else(|| fields.iter().next())
            .and_then(|field| field.ident.as_ref())
            .map(|ident| ident.to_string())
            .ok_or_else(|| syn::Error::new_spanned(&input.ident, "Struct must have at least one named field"))?;

        let mut table_name = None;
        let mut soft_delete = None;
        let mut relations = Vec::new();

        for attr in &input.attrs {
            if attr.path.is_ident("table_name") {
                match attr.parse_meta()? {
                    Meta::NameValue(syn::MetaNameValue { lit: Lit::Str(s), .. }) => table_name = Some(s.value()),
                    other => return Err(syn::Error::new_spanned(other, "expected #[table_name = \"...\"]")),
                }
            } else if attr.path.is_ident("soft_delete") {
                match attr.parse_meta()? {
                    Meta::Path(_) => soft_delete = Some("deleted_at".to_string()),
                    Meta::NameValue(syn::MetaNameValue { lit: Lit::Str(s), .. }) => soft_delete = Some(s.value()),
                    other => return Err(syn::Error::new_spanned(other, "expected #[soft_delete] or #[soft_delete = \"column\"]")),
                }
            } else if attr.path.is_ident("relation") {
                relations.push(RelationAttr::parse(attr)?);
            }
        }

        Ok(Self {
            table_name: table_name.unwrap_or_else(|| model_name.clone()),
            model_name,
            id_field,
            soft_delete,
            relations,
        })
    }

    fn gen_model_impl(&self, input: &DeriveInput) -> TokenStream2 {
        let name = &input.ident;
        let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

        let table_name = &self.table_name;
        let model_name = &self.model_name;
        let id_field = &self.id_field;
        let soft_delete = match &self.soft_delete {
            Some(column) => quote! { .soft_delete(#column) },
            None => quote! {},
        };
        let relations = self.relations.iter().map(RelationAttr::gen_definition);

        quote! {
            impl #impl_generics ::sqlx_with_aggregate::Model for #name #ty_generics #where_clause {
                fn scheme() -> &'static ::sqlx_with_aggregate::Scheme {
                    static SCHEME: ::sqlx_with_aggregate::__private::Lazy<::sqlx_with_aggregate::Scheme> =
                        ::sqlx_with_aggregate::__private::Lazy::new(|| {
                            ::sqlx_with_aggregate::Scheme::new(#table_name, #id_field)
                                .model_name(#model_name)
                                #soft_delete
                                #(.relation(#relations))*
                        });
                    &SCHEME
                }
            }
        }
    }
}
