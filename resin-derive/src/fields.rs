use proc_macro2::TokenStream;
use quote::quote;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Plain,
    Link,
    Skip,
}

pub(crate) struct FieldInfo {
    member: syn::Member,
    key: String,
    kind: FieldKind,
}

#[derive(Default)]
struct FieldAttrs {
    link: bool,
    skip: bool,
    rename: Option<String>,
}

fn parse_field_attrs(attrs: &[syn::Attribute]) -> syn::Result<FieldAttrs> {
    let mut result = FieldAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("persist") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("link") {
                result.link = true;
            } else if meta.path.is_ident("skip") {
                result.skip = true;
            } else if meta.path.is_ident("rename") {
                let value: syn::LitStr = meta.value()?.parse()?;
                result.rename = Some(value.value());
            } else {
                return Err(meta.error("unknown persist attribute; expected `link`, `skip` or `rename`"));
            }
            Ok(())
        })?;
    }

    Ok(result)
}

/// Gathers how each field is persisted, in declaration order.
pub(crate) fn collect(fields: &syn::Fields) -> syn::Result<Vec<FieldInfo>> {
    let mut infos = Vec::new();

    for (i, field) in fields.iter().enumerate() {
        let attrs = parse_field_attrs(&field.attrs)?;
        if attrs.link && attrs.skip {
            return Err(syn::Error::new_spanned(field, "a field cannot be both `link` and `skip`"));
        }

        let (member, default_key) = match &field.ident {
            Some(ident) => {
                let key = ident.to_string();
                let key = key.strip_prefix("r#").map(str::to_string).unwrap_or(key);
                (syn::Member::Named(ident.clone()), key)
            }
            None => (syn::Member::Unnamed(syn::Index::from(i)), i.to_string()),
        };

        let kind = if attrs.skip {
            FieldKind::Skip
        } else if attrs.link {
            FieldKind::Link
        } else {
            FieldKind::Plain
        };

        infos.push(FieldInfo {
            member,
            key: attrs.rename.unwrap_or(default_key),
            kind,
        });
    }

    Ok(infos)
}

/// Body of `write`: one `set`/`set_link` per persisted field.
pub(crate) fn generate_writes(fields: &[FieldInfo]) -> TokenStream {
    let writes = fields.iter().filter_map(|f| {
        let member = &f.member;
        let key = &f.key;
        match f.kind {
            FieldKind::Plain => Some(quote! { handle.set(#key, &self.#member)?; }),
            FieldKind::Link => Some(quote! { handle.set_link(#key, &self.#member)?; }),
            FieldKind::Skip => None,
        }
    });
    quote! { #(#writes)* }
}

fn read_expr(field: &FieldInfo) -> TokenStream {
    let key = &field.key;
    match field.kind {
        FieldKind::Plain => quote! { record.get(#key)? },
        FieldKind::Link => quote! { record.link(#key, archive)? },
        FieldKind::Skip => quote! { ::std::default::Default::default() },
    }
}

/// Expression building `Self` from a record.
pub(crate) fn generate_construction(name: &syn::Ident, fields: &syn::Fields, infos: &[FieldInfo]) -> TokenStream {
    match fields {
        syn::Fields::Named(_) => {
            let inits = infos.iter().map(|f| {
                let member = &f.member;
                let expr = read_expr(f);
                quote! { #member: #expr }
            });
            quote! { #name { #(#inits),* } }
        }
        syn::Fields::Unnamed(_) => {
            let exprs = infos.iter().map(read_expr);
            quote! { #name(#(#exprs),*) }
        }
        syn::Fields::Unit => quote! { #name },
    }
}
