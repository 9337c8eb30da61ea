use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, parse_macro_input};

pub fn derive_component(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);

    let struct_name = &ast.ident;
    let (impl_generics, type_generics, where_clause) = ast.generics.split_for_impl();

    // Use ::bucket_ecs::ecs::Component which works both inside and outside the crate.
    // Inside the crate, this works because of `extern crate self as bucket_ecs;` in lib.rs
    // Outside the crate, this naturally resolves to the bucket_ecs dependency.
    TokenStream::from(quote! {
        impl #impl_generics ::bucket_ecs::ecs::Component for #struct_name #type_generics #where_clause {
        }
    })
}
