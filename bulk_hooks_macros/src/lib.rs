mod hook_model;

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    braced,
    parse::{Parse, ParseStream},
    parse_macro_input, Expr, Ident, Token,
};

// ============================================================================
// hooks! proc-macro
// ============================================================================

/// Generates the `HookSet` impl that wires handler methods to lifecycle
/// events.
///
/// # Usage
///
/// ```ignore
/// bulk_hooks::hooks!(AccountHooks for Account {
///     ValidateCreate => validate_balance,
///     BeforeUpdate(priority = 10, when = Condition::changed("status")) => stamp_status,
///     AfterUpdate => log_changes,
/// });
/// ```
///
/// Each entry registers one method for one event; list a method under
/// several events to handle all of them. Entries accept:
/// - `priority = <int expr>`: lower runs first (default `DEFAULT_PRIORITY`).
/// - `when = <condition expr>`: only records matching the condition are
///   passed to the handler.
///
/// Handler methods have the fixed invocation signature:
/// ```ignore
/// fn stamp_status(
///     &self,
///     new: &mut [Account],
///     old: &[Option<Account>],
///     ctx: &bulk_hooks::HookContext,
/// ) -> Result<(), bulk_hooks::BoxError>
/// ```
///
/// Registration happens through `HookSet::register_all(handler, registry)`,
/// which takes the handler instance explicitly — construct it with whatever
/// dependencies it needs first. Registering the same set twice is a no-op
/// per entry (the registry deduplicates on handler identity).
#[proc_macro]
pub fn hooks(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as HooksInput);

    let handler_name = &input.handler_name;
    let model = &input.model;

    let registrations = input.entries.iter().map(|entry| {
        let event = &entry.event;
        let method = &entry.method;

        let priority = match &entry.priority {
            Some(expr) => quote! { #expr },
            None => quote! { bulk_hooks::DEFAULT_PRIORITY },
        };
        let condition = match &entry.when {
            Some(expr) => quote! { ::std::option::Option::Some(#expr) },
            None => quote! { ::std::option::Option::None },
        };

        quote! {
            {
                let hooked = handler.clone();
                let hook: ::std::sync::Arc<dyn bulk_hooks::Hook<#model>> =
                    ::std::sync::Arc::new(
                        move |new: &mut [#model],
                              old: &[::std::option::Option<#model>],
                              ctx: &bulk_hooks::HookContext|
                              -> ::std::result::Result<(), bulk_hooks::BoxError> {
                            hooked.#method(new, old, ctx)
                        },
                    );
                registry.register(
                    bulk_hooks::Event::#event,
                    concat!(stringify!(#handler_name), "::", stringify!(#method)),
                    hook,
                    #condition,
                    #priority,
                )?;
            }
        }
    });

    let expanded = quote! {
        impl bulk_hooks::HookSet<#model> for #handler_name {
            fn register_all(
                handler: ::std::sync::Arc<Self>,
                registry: &bulk_hooks::HookRegistry<#model>,
            ) -> ::std::result::Result<(), bulk_hooks::HookError> {
                #(#registrations)*
                Ok(())
            }
        }
    };

    TokenStream::from(expanded)
}

struct HooksInput {
    handler_name: Ident,
    model: syn::Path,
    entries: Vec<HookEntry>,
}

struct HookEntry {
    event: Ident,
    priority: Option<Expr>,
    when: Option<Expr>,
    method: Ident,
}

impl Parse for HooksInput {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let handler_name: Ident = input.parse()?;
        input.parse::<Token![for]>()?;
        let model: syn::Path = input.parse()?;

        let content;
        braced!(content in input);

        let mut entries = Vec::new();
        while !content.is_empty() {
            let event: Ident = content.parse()?;

            // Optional (priority = .., when = ..) argument list
            let mut priority = None;
            let mut when = None;
            if content.peek(syn::token::Paren) {
                let args;
                syn::parenthesized!(args in content);
                while !args.is_empty() {
                    let keyword: Ident = args.parse()?;
                    args.parse::<Token![=]>()?;
                    if keyword == "priority" {
                        priority = Some(args.parse()?);
                    } else if keyword == "when" {
                        when = Some(args.parse()?);
                    } else {
                        return Err(syn::Error::new(
                            keyword.span(),
                            "expected `priority` or `when`",
                        ));
                    }
                    if args.peek(Token![,]) {
                        args.parse::<Token![,]>()?;
                    }
                }
            }

            content.parse::<Token![=>]>()?;
            let method: Ident = content.parse()?;

            entries.push(HookEntry {
                event,
                priority,
                when,
                method,
            });

            // Optional trailing comma
            if content.peek(Token![,]) {
                content.parse::<Token![,]>()?;
            }
        }

        Ok(HooksInput {
            handler_name,
            model,
            entries,
        })
    }
}

// ============================================================================
// #[derive(HookModel)] derive macro
// ============================================================================

/// Derive macro for the `Model` trait.
///
/// # Usage
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize, HookModel)]
/// #[hook_model(collection = "accounts")]
/// struct Account {
///     #[hook_model(id)]
///     pub id: String,
///     pub balance: i64,
/// }
/// ```
///
/// - `#[hook_model(collection = "...")]` sets the collection name.
///   If omitted, defaults to snake_case struct name + "s".
/// - `#[hook_model(id)]` marks the `String` field used as the identity.
///   If omitted, defaults to a field named `id`.
/// - `#[hook_model(persisted)]` optionally marks a `bool` field carrying an
///   explicit persistence flag, letting `save` skip its existence probe.
#[proc_macro_derive(HookModel, attributes(hook_model))]
pub fn derive_hook_model(input: TokenStream) -> TokenStream {
    hook_model::derive_hook_model(input)
}
