//! Derive macro for the `Trace` trait.
//!
//! ```ignore
//! use evanesce::{Gc, Trace};
//!
//! #[derive(Trace)]
//! struct Node {
//!     label: String,
//!     next: Option<Gc<Node>>,
//!     #[evanesce(skip)]
//!     file: std::fs::File,
//! }
//! ```

use proc_macro2::TokenStream;
use quote::{format_ident, quote, quote_spanned};
use syn::{
    parse_macro_input, parse_quote, spanned::Spanned, Attribute, Data, DeriveInput, Field, Fields,
    GenericParam, Generics, Ident, Index, Path,
};

#[proc_macro_derive(Trace, attributes(evanesce))]
pub fn derive_trace(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let mut evanesce: Path = parse_quote!(::evanesce);

    for attr in &input.attrs {
        if !attr.path().is_ident("evanesce") {
            continue;
        }

        let result = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate") {
                evanesce = meta.value()?.parse()?;
                Ok(())
            } else {
                Err(meta.error("unsupported attribute"))
            }
        });

        if let Err(err) = result {
            return err.into_compile_error().into();
        }
    }

    let name = &input.ident;
    let generics = add_trait_bounds(&evanesce, input.generics);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    let trace_body = match generate_trace_body(&evanesce, name, &input.data) {
        Ok(body) => body,
        Err(err) => return err.into_compile_error().into(),
    };

    let generated = quote! {
        unsafe impl #impl_generics #evanesce::Trace for #name #ty_generics #where_clause {
            #[inline]
            fn trace(&self, visitor: &mut impl #evanesce::Visitor) {
                #trace_body
            }
        }
    };

    generated.into()
}

fn add_trait_bounds(evanesce: &Path, mut generics: Generics) -> Generics {
    for param in &mut generics.params {
        if let GenericParam::Type(ref mut type_param) = *param {
            let has_trace = type_param.bounds.iter().any(|b| {
                if let syn::TypeParamBound::Trait(t) = b {
                    t.path.segments.last().is_some_and(|s| s.ident == "Trace")
                } else {
                    false
                }
            });
            let has_static = type_param.bounds.iter().any(|b| {
                if let syn::TypeParamBound::Lifetime(l) = b {
                    l.ident == "static"
                } else {
                    false
                }
            });

            if !has_trace {
                type_param.bounds.push(parse_quote!(#evanesce::Trace));
            }
            if !has_static {
                type_param.bounds.push(parse_quote!('static));
            }
        }
    }
    generics
}

/// `#[evanesce(skip)]` on a field leaves it out of the generated `trace`.
///
/// Handles reachable only through a skipped field are never counted as
/// heap-internal, so the collector treats their targets as rooted.
fn is_skipped(attrs: &[Attribute]) -> syn::Result<bool> {
    let mut skip = false;
    for attr in attrs {
        if !attr.path().is_ident("evanesce") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else {
                Err(meta.error("unsupported field attribute"))
            }
        })?;
    }
    Ok(skip)
}

fn traced_fields<'a, I>(fields: I) -> syn::Result<Vec<(usize, &'a Field)>>
where
    I: IntoIterator<Item = &'a Field>,
{
    let mut traced = Vec::new();
    for (i, field) in fields.into_iter().enumerate() {
        if !is_skipped(&field.attrs)? {
            traced.push((i, field));
        }
    }
    Ok(traced)
}

fn generate_trace_body(evanesce: &Path, name: &Ident, data: &Data) -> syn::Result<TokenStream> {
    match data {
        Data::Struct(data) => generate_struct_trace(evanesce, &data.fields),
        Data::Enum(data) => generate_enum_trace(evanesce, name, data),
        Data::Union(u) => Ok(quote_spanned! {
            u.union_token.span => compile_error!("`Trace` must be manually implemented for unions");
        }),
    }
}

fn generate_struct_trace(evanesce: &Path, fields: &Fields) -> syn::Result<TokenStream> {
    match fields {
        Fields::Named(f) => {
            let trace_calls = traced_fields(&f.named)?.into_iter().map(|(_, field)| {
                let name = &field.ident;
                quote_spanned! {field.span() =>
                    #evanesce::Trace::trace(&self.#name, visitor);
                }
            });
            Ok(quote! { #(#trace_calls)* })
        }
        Fields::Unnamed(f) => {
            let trace_calls = traced_fields(&f.unnamed)?.into_iter().map(|(i, field)| {
                let index = Index::from(i);
                quote_spanned! {field.span() =>
                    #evanesce::Trace::trace(&self.#index, visitor);
                }
            });
            Ok(quote! { #(#trace_calls)* })
        }
        Fields::Unit => Ok(quote! {}),
    }
}

fn generate_enum_trace(
    evanesce: &Path,
    name: &Ident,
    data: &syn::DataEnum,
) -> syn::Result<TokenStream> {
    let mut match_arms = Vec::with_capacity(data.variants.len());

    for variant in &data.variants {
        let var_name = &variant.ident;
        let arm = match &variant.fields {
            Fields::Named(f) => {
                let traced = traced_fields(&f.named)?;
                let bindings = traced.iter().map(|(i, field)| {
                    let ident = field.ident.as_ref();
                    let binding = format_ident!("field{}", i);
                    quote! { #ident: #binding }
                });
                let trace_calls = traced.iter().map(|(i, _)| {
                    let binding = format_ident!("field{}", i);
                    quote! { #evanesce::Trace::trace(#binding, visitor); }
                });

                quote! {
                    #name::#var_name { #(#bindings,)* .. } => {
                        #(#trace_calls)*
                    }
                }
            }
            Fields::Unnamed(f) => {
                let traced = traced_fields(&f.unnamed)?;
                let patterns = (0..f.unnamed.len()).map(|i| {
                    if traced.iter().any(|(t, _)| *t == i) {
                        let binding = format_ident!("field{}", i);
                        quote! { #binding }
                    } else {
                        quote! { _ }
                    }
                });
                let trace_calls = traced.iter().map(|(i, _)| {
                    let binding = format_ident!("field{}", i);
                    quote! { #evanesce::Trace::trace(#binding, visitor); }
                });

                quote! {
                    #name::#var_name(#(#patterns),*) => {
                        #(#trace_calls)*
                    }
                }
            }
            Fields::Unit => {
                quote! {
                    #name::#var_name => {}
                }
            }
        };
        match_arms.push(arm);
    }

    if match_arms.is_empty() {
        return Ok(quote! {});
    }

    Ok(quote! {
        match self {
            #(#match_arms)*
        }
    })
}
