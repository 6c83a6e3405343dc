//! Procedural macros used by `holistic`.
//!
//! Do not use this crate directly, use `holistic` instead.

use proc_macro::{Span, TokenStream};
use quote::quote;
use syn::{parse::Error, ItemFn};

/// Turns `fn main` into the application entry point.
///
/// The annotated function runs on a background thread after logging has been initialized, while
/// the main thread drives the GUI event loop.
#[proc_macro_attribute]
pub fn main(args: TokenStream, item: TokenStream) -> TokenStream {
    match expand_main(args, item.clone()) {
        Ok(tokens) => tokens,
        Err(err) => {
            // Keep the original item around so that IDEs still see the function body.
            let mut error = item;
            error.extend(TokenStream::from(err.to_compile_error()));
            error
        }
    }
}

fn expand_main(args: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    if !args.is_empty() {
        return Err(Error::new(
            Span::call_site().into(),
            "`#[holistic::main]` does not accept arguments",
        ));
    }

    let item = syn::parse::<ItemFn>(item)?;

    if item.sig.ident != "main" {
        return Err(Error::new(
            item.sig.ident.span(),
            "`#[holistic::main]` must be applied to a function called `main`",
        ));
    }
    if item.sig.asyncness.is_some() {
        return Err(Error::new(
            item.sig.ident.span(),
            "`#[holistic::main]` cannot be applied to an `async fn`",
        ));
    }

    Ok(quote! {
        fn main() {
            #item

            ::holistic::init_logger!();

            ::holistic::run(main);
        }
    }
    .into())
}
