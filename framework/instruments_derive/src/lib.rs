use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ItemFn, LitStr, ReturnType};

/// Time an async method and report its classified result.
///
/// The method must be `async`, take `&self`, have a `reporter` field that derefs to
/// `race_tunnel_instruments::Reporter`, and return a type implementing `ClassifyOutcome`.
///
/// The operation id defaults to the function name. `prefix = "inventory_"` prepends to it and
/// `operation = "..."` replaces it entirely.
///
/// ```ignore
/// #[race_tunnel_instrument(prefix = "inventory_")]
/// pub async fn reserve(&self, sku: &str, quantity: u32) -> Result<(), CallError> { ... }
/// ```
#[proc_macro_attribute]
pub fn race_tunnel_instrument(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut prefix = String::new();
    let mut operation: Option<String> = None;
    let args_parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("prefix") {
            prefix = meta.value()?.parse::<LitStr>()?.value();
            Ok(())
        } else if meta.path.is_ident("operation") {
            operation = Some(meta.value()?.parse::<LitStr>()?.value());
            Ok(())
        } else {
            Err(meta.error("unsupported race_tunnel_instrument argument"))
        }
    });
    parse_macro_input!(args with args_parser);

    let mut input = parse_macro_input!(input as ItemFn);

    if input.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &input.sig.fn_token,
            "race_tunnel_instrument can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }

    let operation_id = format!(
        "{}{}",
        prefix,
        operation.unwrap_or_else(|| input.sig.ident.to_string())
    );

    let return_type = match &input.sig.output {
        ReturnType::Default => quote!(()),
        ReturnType::Type(_, ty) => quote!(#ty),
    };

    let block = &input.block;
    input.block = syn::parse_quote! {
        {
            let __operation_record = race_tunnel_instruments::OperationRecord::new(#operation_id.to_string());
            let __operation_result: #return_type = async move {
                #[allow(unreachable_code)]
                if false {
                    let __operation_fake_return: #return_type = loop {};
                    return __operation_fake_return;
                }
                #block
            }
            .await;
            race_tunnel_instruments::report_operation(&self.reporter, __operation_record, &__operation_result);
            __operation_result
        }
    };

    TokenStream::from(quote!(#input))
}
