//! Derive macro for `InnerSerialize`.
use proc_macro2::TokenStream;
use quote::{format_ident, quote, quote_spanned};
use syn::{
    parse_macro_input, parse_quote, spanned::Spanned, Data, DeriveInput, Fields, GenericParam,
    Generics, Index,
};

/// Derive macro that implements the `InnerSerialize` trait for a fixed-layout TCI message.  Using
/// this macro requires that `InnerSerialize`, `Error` and `Vec` are locally in scope.
///
/// Struct fields are laid out back to back in declaration order, with no padding.  Enums with
/// no fields (which must also be `Copy`) are laid out as their `u32` discriminant.
#[proc_macro_derive(TciSerialize)]
pub fn derive_tci_serialize(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    derive_tci_serialize_internal(&input)
}

fn derive_tci_serialize_internal(input: &DeriveInput) -> proc_macro::TokenStream {
    let name = &input.ident;

    // Add a bound `T: InnerSerialize` for every type parameter `T`.
    let generics = add_trait_bounds(&input.generics);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let deserialize = deserialize_struct(&input.data);
    let serialize = serialize_struct(&input.data);

    let expanded = quote! {
        // The generated impl
        impl #impl_generics InnerSerialize for #name #ty_generics #where_clause {
            fn deserialize(data: &[u8]) -> Result<(Self, &[u8]), Error> {
                #deserialize
            }
            #[allow(unused_variables)]
            fn serialize_into(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
                #serialize
            }
        }
    };

    expanded.into()
}

/// Add a bound `T: InnerSerialize` for every type parameter `T`.
fn add_trait_bounds(generics: &Generics) -> Generics {
    let mut generics = generics.clone();
    for param in &mut generics.params {
        if let GenericParam::Type(ref mut type_param) = *param {
            type_param.bounds.push(parse_quote!(InnerSerialize));
        }
    }
    generics
}

/// Generate statements that append each field of a compound type to `buf`.
fn serialize_struct(data: &Data) -> TokenStream {
    match *data {
        Data::Struct(ref data) => {
            match data.fields {
                Fields::Named(ref fields) => {
                    // Expands to statements like
                    //
                    //     InnerSerialize::serialize_into(&self.x, buf)?;
                    //     InnerSerialize::serialize_into(&self.y, buf)?;
                    //     Ok(())
                    let recurse = fields.named.iter().map(|f| {
                        let name = &f.ident;
                        quote_spanned! {f.span()=>
                            InnerSerialize::serialize_into(&self.#name, buf)?;
                        }
                    });
                    quote! {
                        #(#recurse)*
                        Ok(())
                    }
                }
                Fields::Unnamed(ref fields) => {
                    let recurse = fields.unnamed.iter().enumerate().map(|(i, f)| {
                        let index = Index::from(i);
                        quote_spanned! {f.span()=>
                            InnerSerialize::serialize_into(&self.#index, buf)?;
                        }
                    });
                    quote! {
                        #(#recurse)*
                        Ok(())
                    }
                }
                Fields::Unit => quote! { Ok(()) },
            }
        }
        Data::Enum(_) => {
            quote! {
                InnerSerialize::serialize_into(&(*self as u32), buf)
            }
        }
        Data::Union(_) => unimplemented!(),
    }
}

/// Local variable name used to hold a named field while deserializing.
fn named_local(f: &syn::Field) -> syn::Ident {
    match &f.ident {
        Some(ident) => format_ident!("field_{}", ident),
        None => unreachable!("named field without identifier"),
    }
}

/// Generate statements that consume each field of a compound type from the front of `data`.
fn deserialize_struct(data: &Data) -> TokenStream {
    match data {
        Data::Struct(ref data) => {
            match data.fields {
                Fields::Named(ref fields) => {
                    // Expands to statements like
                    //
                    //     let (field_x, data) = <XType>::deserialize(data)?;
                    //     let (field_y, data) = <YType>::deserialize(data)?;
                    //     Ok((Self { x: field_x, y: field_y }, data))
                    //
                    // with prefixed locals, so that a field called `data` does not clash.
                    let recurse1 = fields.named.iter().map(|f| {
                        let typ = &f.ty;
                        let varname = named_local(f);
                        quote_spanned! {f.span()=>
                            let (#varname, data) = <#typ>::deserialize(data)?;
                        }
                    });
                    let recurse2 = fields.named.iter().map(|f| {
                        let name = &f.ident;
                        let varname = named_local(f);
                        quote! { #name: #varname }
                    });
                    quote! {
                        #(#recurse1)*
                        Ok((Self { #(#recurse2, )* }, data))
                    }
                }
                Fields::Unnamed(ref fields) => {
                    // Expands to statements like
                    //
                    //     let (field_0, data) = <Type0>::deserialize(data)?;
                    //     let (field_1, data) = <Type1>::deserialize(data)?;
                    //     Ok((Self(field_0, field_1), data))
                    let recurse1 = fields.unnamed.iter().enumerate().map(|(i, f)| {
                        let typ = &f.ty;
                        let varname = format_ident!("field_{}", i);
                        quote_spanned! {f.span()=>
                            let (#varname, data) = <#typ>::deserialize(data)?;
                        }
                    });
                    let recurse2 = fields.unnamed.iter().enumerate().map(|(i, _f)| {
                        let varname = format_ident!("field_{}", i);
                        quote! { #varname }
                    });
                    quote! {
                        #(#recurse1)*
                        Ok((Self( #(#recurse2, )* ), data))
                    }
                }
                Fields::Unit => quote! { Ok((Self, data)) },
            }
        }
        Data::Enum(enum_data) => {
            // This only copes with variants with no fields.
            // Expands to an expression like:
            //
            //     let (v, data) = <u32>::deserialize(data)?;
            //     match v {
            //         x if x == Self::Variant1 as u32 => Ok((Self::Variant1, data)),
            //         x if x == Self::Variant2 as u32 => Ok((Self::Variant2, data)),
            //         _ => Err(Error::InvalidEnumValue(v)),
            //     }
            let recurse = enum_data.variants.iter().map(|variant| {
                let vname = &variant.ident;
                quote_spanned! {variant.span()=>
                    x if x == Self::#vname as u32 => Ok((Self::#vname, data)),
                }
            });
            quote! {
                let (v, data) = <u32>::deserialize(data)?;
                match v {
                    #(#recurse)*
                    _ => Err(Error::InvalidEnumValue(v)),
                }
            }
        }
        Data::Union(_) => unimplemented!(),
    }
}
