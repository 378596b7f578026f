//! Procedural macros for `kit`.
//!
//! - [`Check`] - Derive `kit::check::Check` from field attributes
//!
//! This crate is re-exported through `kit`, so you typically don't need to
//! depend on it directly:
//!
//! ```rust,ignore
//! use kit::Check;
//!
//! #[derive(Check, serde::Deserialize)]
//! struct CreateOrder {
//!     #[check(required, id)]
//!     customer: String,
//!     #[check(length(max = 200))]
//!     note: String,
//!     #[check(nested)]
//!     address: Address,
//! }
//! ```

use darling::ast::Data;
use darling::{FromDeriveInput, FromField, FromMeta};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{DeriveInput, Generics, Ident, parse_macro_input};

#[derive(Debug, Default, FromMeta)]
struct Length {
    #[darling(default)]
    min: Option<usize>,
    #[darling(default)]
    max: Option<usize>,
}

/// Rules parsed from `#[check(...)]` on a single field.
#[derive(Debug, FromField)]
#[darling(attributes(check))]
struct CheckField {
    ident: Option<Ident>,
    #[darling(default)]
    required: bool,
    #[darling(default)]
    id: bool,
    #[darling(default)]
    length: Option<Length>,
    #[darling(default)]
    nested: bool,
    /// Name used in error messages. Defaults to the field name.
    #[darling(default)]
    rename: Option<String>,
}

#[derive(Debug, FromDeriveInput)]
#[darling(supports(struct_named))]
struct CheckArgs {
    ident: Ident,
    generics: Generics,
    data: Data<(), CheckField>,
}

impl CheckField {
    fn rules(&self) -> Vec<TokenStream2> {
        let Some(field) = &self.ident else {
            return Vec::new();
        };
        let name = self.rename.clone().unwrap_or_else(|| field.to_string());
        let mut rules = Vec::new();

        if self.required {
            rules.push(quote! {
                ::kit::check::required(#name, &self.#field)?;
            });
        }
        if self.id {
            rules.push(quote! {
                ::kit::check::validate_id(#name, &self.#field)?;
            });
        }
        if let Some(length) = &self.length {
            let min = length.min.unwrap_or(0);
            let max = match length.max {
                Some(max) => quote! { #max },
                None => quote! { usize::MAX },
            };
            rules.push(quote! {
                ::kit::check::validate_str(#name, &self.#field, #min, #max)?;
            });
        }
        if self.nested {
            rules.push(quote! {
                ::kit::check::Check::check(&self.#field)?;
            });
        }

        rules
    }
}

/// Derives `kit::check::Check` for structs with named fields.
///
/// # Attributes
///
/// - `#[check(required)]` - the field must not be blank
/// - `#[check(id)]` - the field must be a valid id
/// - `#[check(length(min = 1, max = 64))]` - bounds for the number of characters
/// - `#[check(nested)]` - the field is checked via its own `Check` impl
/// - `#[check(rename = "customerID")]` - name used in error messages
///
/// Rules run in field order and the first failure is returned.
#[proc_macro_derive(Check, attributes(check))]
pub fn derive_check(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let args = match CheckArgs::from_derive_input(&input) {
        Ok(val) => val,
        Err(err) => return err.write_errors().into(),
    };

    let ident = &args.ident;
    let (impl_generics, ty_generics, where_clause) = args.generics.split_for_impl();
    let rules: Vec<TokenStream2> = match &args.data {
        Data::Struct(fields) => fields.iter().flat_map(CheckField::rules).collect(),
        Data::Enum(_) => Vec::new(),
    };

    let expanded = quote! {
        impl #impl_generics ::kit::check::Check for #ident #ty_generics #where_clause {
            fn check(&self) -> ::kit::check::CheckResult {
                #(#rules)*
                Ok(())
            }
        }
    };

    TokenStream::from(expanded)
}
