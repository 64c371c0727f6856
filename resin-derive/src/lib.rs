use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, parse_macro_input};

mod fields;

/// Derive macro for the `Persistable` and `Reconstruct` traits.
///
/// Every field is written under its name and read back on reconstruction.
/// Fields holding other objects (`Arc<T>`, `Option<Arc<T>>`,
/// `Arc<dyn Persistable>`, `Vec` of those) must be marked `link` so they are
/// written as object ids and shared on read.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use resin_core::Persistable;
///
/// #[derive(Debug, Persistable)]
/// #[persist(name = "GaussianPsf")]
/// struct GaussianPsf {
///     sigma: f64,
///     #[persist(link)]
///     transform: Arc<AffineTransform>,
/// }
/// ```
///
/// # Attributes
///
/// - `#[persist(name = "...")]` on the type - persistence name (defaults to the type name)
/// - `#[persist(link)]` - field refers to other objects
/// - `#[persist(skip)]` - field is not written (must impl Default)
/// - `#[persist(rename = "...")]` - payload field name
#[proc_macro_derive(Persistable, attributes(persist))]
pub fn derive_persistable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_persistable_impl(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn derive_persistable_impl(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Persistable cannot be derived for generic types",
        ));
    }

    let data = match &input.data {
        syn::Data::Struct(data) => data,
        syn::Data::Enum(_) => {
            return Err(syn::Error::new_spanned(input, "Persistable cannot be derived for enums"));
        }
        syn::Data::Union(_) => {
            return Err(syn::Error::new_spanned(input, "Persistable cannot be derived for unions"));
        }
    };

    let persistence_name = parse_type_attrs(&input.attrs)?.unwrap_or_else(|| name.to_string());
    let fields = fields::collect(&data.fields)?;
    let writes = fields::generate_writes(&fields);
    let construction = fields::generate_construction(name, &data.fields, &fields);

    Ok(quote! {
        impl ::resin_core::Persistable for #name {
            fn persistence_name(&self) -> &str {
                #persistence_name
            }

            fn write(
                &self,
                handle: &mut ::resin_core::OutputArchiveHandle<'_>,
            ) -> ::std::result::Result<(), ::resin_core::ArchiveError> {
                #writes
                ::std::result::Result::Ok(())
            }
        }

        impl ::resin_core::Reconstruct for #name {
            const PERSISTENCE_NAME: &'static str = #persistence_name;

            #[allow(unused_variables)]
            fn reconstruct(
                archive: &::resin_core::InputArchive<'_>,
                record: &::resin_core::Record,
            ) -> ::std::result::Result<Self, ::resin_core::ArchiveError> {
                ::std::result::Result::Ok(#construction)
            }
        }
    })
}

/// Reads `#[persist(name = "...")]` from the type's attributes.
fn parse_type_attrs(attrs: &[syn::Attribute]) -> syn::Result<Option<String>> {
    let mut name = None;

    for attr in attrs {
        if !attr.path().is_ident("persist") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: syn::LitStr = meta.value()?.parse()?;
                if value.value().is_empty() {
                    return Err(meta.error("persistence name must not be empty"));
                }
                name = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unknown persist attribute on type; expected `name`"))
            }
        })?;
    }

    Ok(name)
}
