use crate::{
    error::{gss_error, Error},
    oid::{Oid, NO_OID},
    util::{Buf, BufRef},
};
use gssapi_sys::{
    gss_OID, gss_OID_desc, gss_canonicalize_name, gss_display_name, gss_duplicate_name,
    gss_export_name, gss_import_name, gss_name_struct, gss_name_t, gss_release_name, OM_uint32,
    GSS_S_COMPLETE,
};
use std::{fmt, ptr};

/// An internal gssapi name, e.g. an imported `service@host`.
pub struct Name(gss_name_t);

unsafe impl Send for Name {}
unsafe impl Sync for Name {}

impl Drop for Name {
    fn drop(&mut self) {
        if !self.0.is_null() {
            let mut minor = GSS_S_COMPLETE;
            let major = unsafe {
                gss_release_name(&mut minor as *mut OM_uint32, &mut self.0 as *mut gss_name_t)
            };
            if gss_error(major) > 0 {
                tracing::warn!(major, minor, "gss_release_name failed");
            }
        }
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match self.display_name() {
            Ok(buf) => write!(f, "{}", String::from_utf8_lossy(&buf)),
            Err(_) => write!(f, "<name can't be displayed>"),
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        fmt::Debug::fmt(self, f)
    }
}

impl Name {
    pub(crate) unsafe fn to_c(&self) -> gss_name_t {
        self.0
    }

    /// Take ownership of a name the library handed us. The pointer must
    /// not be released by anyone else.
    pub(crate) unsafe fn from_c(ptr: gss_name_t) -> Self {
        Name(ptr)
    }

    /// Parse the specified bytes as a gssapi name, with optional
    /// `kind` e.g. `GSS_NT_HOSTBASED_SERVICE` or
    /// `GSS_NT_KRB5_PRINCIPAL`.
    pub fn new(s: &[u8], kind: Option<&Oid>) -> Result<Self, Error> {
        let mut buf = BufRef::from(s);
        let mut minor = GSS_S_COMPLETE;
        let mut name = ptr::null_mut::<gss_name_struct>();
        let major = unsafe {
            gss_import_name(
                &mut minor as *mut OM_uint32,
                buf.to_c(),
                match kind {
                    None => NO_OID,
                    Some(kind) => kind.to_c(),
                },
                &mut name as *mut gss_name_t,
            )
        };
        if major == GSS_S_COMPLETE {
            Ok(Name(name))
        } else {
            Err(Error { major, minor })
        }
    }

    /// Canonicalize a name for the specified mechanism (or the
    /// default mechanism if not specified). This makes a copy of the
    /// name.
    pub fn canonicalize(&self, mech: Option<&Oid>) -> Result<Self, Error> {
        let mut out = ptr::null_mut::<gss_name_struct>();
        let mut minor = GSS_S_COMPLETE;
        let major = unsafe {
            gss_canonicalize_name(
                &mut minor as *mut OM_uint32,
                self.to_c(),
                match mech {
                    None => NO_OID,
                    Some(id) => id.to_c(),
                },
                &mut out as *mut gss_name_t,
            )
        };
        if major == GSS_S_COMPLETE {
            Ok(Name(out))
        } else {
            Err(Error { major, minor })
        }
    }

    /// Produce a contiguous string representation of a mechanism name
    /// suitable for direct comparison. The name must be canonical.
    pub fn export(&self) -> Result<Buf, Error> {
        let mut out = Buf::empty();
        let mut minor = GSS_S_COMPLETE;
        let major = unsafe { gss_export_name(&mut minor as *mut OM_uint32, self.0, out.to_c()) };
        if major == GSS_S_COMPLETE {
            Ok(out)
        } else {
            Err(Error { major, minor })
        }
    }

    // Unlike the Display impl this reports failure and leaves utf-8
    // decoding to the caller.
    pub fn display_name(&self) -> Result<Buf, Error> {
        let mut out = Buf::empty();
        let mut minor = GSS_S_COMPLETE;
        let mut oid = ptr::null_mut::<gss_OID_desc>();
        let major = unsafe {
            gss_display_name(
                &mut minor as *mut OM_uint32,
                self.to_c(),
                out.to_c(),
                &mut oid as *mut gss_OID,
            )
        };
        if major == GSS_S_COMPLETE {
            Ok(out)
        } else {
            Err(Error { major, minor })
        }
    }

    pub fn duplicate(&self) -> Result<Self, Error> {
        let mut copy = ptr::null_mut::<gss_name_struct>();
        let mut minor = GSS_S_COMPLETE;
        let major = unsafe {
            gss_duplicate_name(
                &mut minor as *mut OM_uint32,
                self.to_c(),
                &mut copy as *mut gss_name_t,
            )
        };
        if major == GSS_S_COMPLETE {
            Ok(Name(copy))
        } else {
            Err(Error { major, minor })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid::GSS_NT_HOSTBASED_SERVICE;

    #[test]
    fn imported_hostbased_name_displays_as_given() {
        let name = Name::new(b"host@example.org", Some(&GSS_NT_HOSTBASED_SERVICE)).unwrap();
        assert_eq!(&*name.display_name().unwrap(), b"host@example.org");
        assert_eq!(name.to_string(), "host@example.org");
    }

    #[test]
    fn duplicate_is_an_independent_copy() {
        let copy = {
            let name = Name::new(b"nfs@example.org", Some(&GSS_NT_HOSTBASED_SERVICE)).unwrap();
            name.duplicate().unwrap()
        };
        assert_eq!(format!("{:?}", copy), "nfs@example.org");
    }
}
