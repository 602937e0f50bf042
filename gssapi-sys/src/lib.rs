//! Raw declarations for the Kerberos GSS-API library, generated from
//! `gssapi.h`, `gssapi_krb5.h` and `gssapi_ext.h`.
#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

include!(concat!(env!("OUT_DIR"), "/bindings.rs"));

// The header defines these with casts, which bindgen can't evaluate.
pub const _GSS_C_INDEFINITE: OM_uint32 = 0xffff_ffff;
pub const _GSS_C_CALLING_ERROR_MASK: OM_uint32 = 0o377;
pub const _GSS_C_ROUTINE_ERROR_MASK: OM_uint32 = 0o377;
pub const _GSS_C_SUPPLEMENTARY_MASK: OM_uint32 = 0o177777;

pub const _GSS_S_CONTINUE_NEEDED: OM_uint32 = 1 << GSS_C_SUPPLEMENTARY_OFFSET;
pub const _GSS_S_BAD_NAME: OM_uint32 = 2 << GSS_C_ROUTINE_ERROR_OFFSET;
pub const _GSS_S_NO_CRED: OM_uint32 = 7 << GSS_C_ROUTINE_ERROR_OFFSET;
pub const _GSS_S_NO_CONTEXT: OM_uint32 = 8 << GSS_C_ROUTINE_ERROR_OFFSET;
pub const _GSS_S_FAILURE: OM_uint32 = 13 << GSS_C_ROUTINE_ERROR_OFFSET;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_fields_do_not_overlap() {
        let calling = _GSS_C_CALLING_ERROR_MASK << GSS_C_CALLING_ERROR_OFFSET;
        let routine = _GSS_C_ROUTINE_ERROR_MASK << GSS_C_ROUTINE_ERROR_OFFSET;
        let supp = _GSS_C_SUPPLEMENTARY_MASK << GSS_C_SUPPLEMENTARY_OFFSET;
        assert_eq!(calling & routine, 0);
        assert_eq!(routine & supp, 0);
        assert_eq!(calling | routine | supp, 0xffff_ffff);
    }
}
