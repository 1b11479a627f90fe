//! `#[timeout]` and `#[tokio_timeout_test]` run a test body on a watchdog
//! thread and fail it once the budget (default 60 seconds) is exhausted.
//!
//! Arguments are a comma separated list of an optional integer number of
//! seconds and, for the async variant, the `paused` flag which starts the
//! Tokio clock paused so timer driven code can be tested deterministically:
//!
//! ```ignore
//! #[test_timeout::tokio_timeout_test(5, paused)]
//! async fn deadline_fires() { /* ... */ }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse::{Parse, ParseStream},
    parse_macro_input,
    punctuated::Punctuated,
    Attribute, Ident, ItemFn, LitInt, Token,
};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

enum WatchdogArg {
    Seconds(LitInt),
    Flag(Ident),
}

impl Parse for WatchdogArg {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if input.peek(LitInt) {
            input.parse().map(WatchdogArg::Seconds)
        } else {
            input.parse().map(WatchdogArg::Flag)
        }
    }
}

struct WatchdogArgs {
    seconds: u64,
    paused: bool,
}

impl Parse for WatchdogArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = WatchdogArgs {
            seconds: DEFAULT_TIMEOUT_SECS,
            paused: false,
        };
        let list = Punctuated::<WatchdogArg, Token![,]>::parse_terminated(input)?;
        for arg in list {
            match arg {
                WatchdogArg::Seconds(lit) => {
                    let seconds: u64 = lit.base10_parse()?;
                    if seconds == 0 {
                        return Err(syn::Error::new_spanned(
                            lit,
                            "timeout must be greater than zero",
                        ));
                    }
                    args.seconds = seconds;
                }
                WatchdogArg::Flag(ident) if ident == "paused" => args.paused = true,
                WatchdogArg::Flag(ident) => {
                    return Err(syn::Error::new_spanned(
                        &ident,
                        format!("unknown test-timeout option `{ident}`"),
                    ));
                }
            }
        }
        Ok(args)
    }
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as WatchdogArgs);
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let attrs = strip_attributes(attrs, &["tokio", "test"]);
    // `start_paused` only exists with tokio's `test-util` feature.
    let clock = if args.paused {
        quote! { .start_paused(true) }
    } else {
        quote! {}
    };
    let body = quote! {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            #clock
            .build()
            .expect("failed to build Tokio runtime");
        runtime.block_on(async {
            tokio::time::timeout(timeout_duration, async move #block)
                .await
                .expect("test timed out");
        });
    };

    with_watchdog(args.seconds, quote! { #[test] #(#attrs)* #vis #sig }, body).into()
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as WatchdogArgs);
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout attribute expects a synchronous test function",
        )
        .to_compile_error()
        .into();
    }
    if args.paused {
        return syn::Error::new_spanned(
            &sig.ident,
            "`paused` only applies to tokio_timeout_test",
        )
        .to_compile_error()
        .into();
    }

    let attrs = strip_attributes(attrs, &["test"]);
    let body = quote! { #block; };

    with_watchdog(args.seconds, quote! { #[test] #(#attrs)* #vis #sig }, body).into()
}

/// Wraps `body` in a worker thread and fails the test if it outlives `seconds`.
fn with_watchdog(seconds: u64, header: TokenStream2, body: TokenStream2) -> TokenStream2 {
    quote! {
        #header {
            let timeout_duration = std::time::Duration::from_secs(#seconds);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    #body
                }));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(timeout_duration) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    }
}

/// Drops `#[test]` / `#[tokio::test]` so the generated `#[test]` is the only one.
fn strip_attributes(attrs: Vec<Attribute>, path: &[&str]) -> Vec<Attribute> {
    attrs
        .into_iter()
        .filter(|attr| {
            let segments: Vec<String> = attr
                .path()
                .segments
                .iter()
                .map(|segment| segment.ident.to_string())
                .collect();
            segments != path
        })
        .collect()
}
