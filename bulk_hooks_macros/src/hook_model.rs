use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{Data, DeriveInput, Fields, LitStr};

pub fn derive_hook_model(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    // Extract #[hook_model(collection = "...")] from struct-level attributes
    let collection = extract_collection(&input);

    // Extract the field marked with #[hook_model(id)] or default to "id"
    let id_field = match extract_id_field(&input) {
        Ok(field) => field,
        Err(err) => return err.to_compile_error().into(),
    };

    // Optional #[hook_model(persisted)] flag field
    let is_persisted = match extract_marked_field(&input, "persisted") {
        Some(field) => quote! {
            fn is_persisted(&self) -> ::std::option::Option<bool> {
                ::std::option::Option::Some(self.#field)
            }
        },
        None => quote! {},
    };

    let expanded = quote! {
        impl bulk_hooks::Model for #name {
            const COLLECTION: &'static str = #collection;

            fn id(&self) -> &str {
                &self.#id_field
            }

            fn set_id(&mut self, id: String) {
                self.#id_field = id;
            }

            #is_persisted
        }
    };

    TokenStream::from(expanded)
}

fn extract_collection(input: &DeriveInput) -> String {
    for attr in &input.attrs {
        if !attr.path().is_ident("hook_model") {
            continue;
        }

        let mut collection = None;
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                let value: LitStr = meta.value()?.parse()?;
                collection = Some(value.value());
            }
            Ok(())
        });

        if let Some(c) = collection {
            return c;
        }
    }

    // Default: snake_case struct name + "s"
    let name = input.ident.to_string();
    format!("{}s", to_snake_case(&name))
}

fn extract_id_field(input: &DeriveInput) -> Result<syn::Ident, syn::Error> {
    if let Some(field) = extract_marked_field(input, "id") {
        return Ok(field);
    }

    if let Data::Struct(data_struct) = &input.data {
        if let Fields::Named(fields) = &data_struct.fields {
            // Default: look for a field named "id"
            for field in &fields.named {
                if let Some(ident) = &field.ident {
                    if ident == "id" {
                        return Ok(ident.clone());
                    }
                }
            }
        }
    }

    Err(syn::Error::new(
        Span::call_site(),
        "HookModel: mark a String field with #[hook_model(id)] or name one `id`",
    ))
}

fn extract_marked_field(input: &DeriveInput, marker: &str) -> Option<syn::Ident> {
    if let Data::Struct(data_struct) = &input.data {
        if let Fields::Named(fields) = &data_struct.fields {
            for field in &fields.named {
                for attr in &field.attrs {
                    if attr.path().is_ident("hook_model") {
                        let mut found = false;
                        let _ = attr.parse_nested_meta(|meta| {
                            if meta.path.is_ident(marker) {
                                found = true;
                            }
                            Ok(())
                        });
                        if found {
                            return field.ident.clone();
                        }
                    }
                }
            }
        }
    }
    None
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(ch.to_lowercase().next().unwrap());
        } else {
            result.push(ch);
        }
    }
    result
}
