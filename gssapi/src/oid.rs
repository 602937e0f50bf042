//! Object identifiers. Oids are BER encoded and defined in the various
//! RFCs; the ones below are the ones a Kerberos application tends to
//! need.
use crate::error::{gss_error, Error};
use gssapi_sys::{
    gss_OID, gss_OID_desc, gss_OID_set, gss_OID_set_desc, gss_add_oid_set_member,
    gss_create_empty_oid_set, gss_release_oid_set, gss_test_oid_set_member, OM_uint32,
    GSS_S_COMPLETE,
};
use std::{
    cmp::{Eq, Ord, Ordering, PartialEq, PartialOrd},
    fmt,
    hash::{Hash, Hasher},
    ops::Deref,
    os::raw::c_int,
    ptr, slice,
};

pub(crate) const NO_OID: gss_OID = ptr::null_mut();
pub(crate) const NO_OID_SET: gss_OID_set = ptr::null_mut();

pub static GSS_NT_USER_NAME: Oid = Oid::from_slice(b"\x2a\x86\x48\x86\xf7\x12\x01\x02\x01\x01");

pub static GSS_NT_MACHINE_UID_NAME: Oid =
    Oid::from_slice(b"\x2a\x86\x48\x86\xf7\x12\x01\x02\x01\x02");

pub static GSS_NT_STRING_UID_NAME: Oid =
    Oid::from_slice(b"\x2a\x86\x48\x86\xf7\x12\x01\x02\x01\x03");

/// `service@host` style names
pub static GSS_NT_HOSTBASED_SERVICE: Oid =
    Oid::from_slice(b"\x2a\x86\x48\x86\xf7\x12\x01\x02\x01\x04");

pub static GSS_NT_ANONYMOUS: Oid = Oid::from_slice(b"\x2b\x06\x01\x05\x06\x03");

pub static GSS_NT_EXPORT_NAME: Oid = Oid::from_slice(b"\x2b\x06\x01\x05\x06\x04");

pub static GSS_NT_KRB5_PRINCIPAL: Oid =
    Oid::from_slice(b"\x2a\x86\x48\x86\xf7\x12\x01\x02\x02\x01");

pub static GSS_MECH_KRB5: Oid = Oid::from_slice(b"\x2a\x86\x48\x86\xf7\x12\x01\x02\x02");

pub static GSS_MECH_IAKERB: Oid = Oid::from_slice(b"\x2b\x06\x01\x05\x02\x05");

pub static GSS_MECH_SPNEGO: Oid = Oid::from_slice(b"\x2b\x06\x01\x05\x05\x02");

static WELL_KNOWN: [(&Oid, &str); 10] = [
    (&GSS_NT_USER_NAME, "GSS_NT_USER_NAME"),
    (&GSS_NT_MACHINE_UID_NAME, "GSS_NT_MACHINE_UID_NAME"),
    (&GSS_NT_STRING_UID_NAME, "GSS_NT_STRING_UID_NAME"),
    (&GSS_NT_HOSTBASED_SERVICE, "GSS_NT_HOSTBASED_SERVICE"),
    (&GSS_NT_ANONYMOUS, "GSS_NT_ANONYMOUS"),
    (&GSS_NT_EXPORT_NAME, "GSS_NT_EXPORT_NAME"),
    (&GSS_NT_KRB5_PRINCIPAL, "GSS_NT_KRB5_PRINCIPAL"),
    (&GSS_MECH_KRB5, "GSS_MECH_KRB5"),
    (&GSS_MECH_IAKERB, "GSS_MECH_IAKERB"),
    (&GSS_MECH_SPNEGO, "GSS_MECH_SPNEGO"),
];

// Same layout as gss_OID_desc, but with the const pointer the standard
// says it has.
#[repr(C)]
pub struct Oid {
    length: u32,
    elements: *const u8,
}

unsafe impl Sync for Oid {}
unsafe impl Send for Oid {}

impl Deref for Oid {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        if self.elements.is_null() {
            &[]
        } else {
            unsafe { slice::from_raw_parts(self.elements, self.length as usize) }
        }
    }
}

impl PartialEq for Oid {
    fn eq(&self, other: &Oid) -> bool {
        **self == **other
    }
}

impl Eq for Oid {}

impl PartialOrd for Oid {
    fn partial_cmp(&self, other: &Oid) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Oid {
    fn cmp(&self, other: &Oid) -> Ordering {
        (**self).cmp(&**other)
    }
}

impl Hash for Oid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (**self).hash(state)
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match WELL_KNOWN.iter().find(|(oid, _)| *oid == self) {
            Some((_, name)) => f.write_str(name),
            None => fmt::Display::fmt(self, f),
        }
    }
}

/// The same `{ 1 2 840 113554 1 2 2 }` form that `gss_oid_to_str`
/// produces, decoded here rather than round tripping through the
/// library.
impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let arcs = match self.arcs() {
            Some(arcs) => arcs,
            None => return write!(f, "<invalid oid {:02x?}>", &**self),
        };
        f.write_str("{")?;
        for arc in arcs {
            write!(f, " {}", arc)?;
        }
        f.write_str(" }")
    }
}

impl Oid {
    pub(crate) unsafe fn from_c<'a>(ptr: gss_OID) -> Option<&'a Oid> {
        (ptr as *const Oid).as_ref()
    }

    pub(crate) unsafe fn to_c(&self) -> gss_OID {
        self as *const Oid as gss_OID
    }

    pub const fn from_slice(ber: &'static [u8]) -> Oid {
        Oid {
            length: ber.len() as u32,
            elements: ber.as_ptr(),
        }
    }

    /// Decode the arcs of the oid, `None` if the encoding is truncated
    /// or a sub identifier overflows.
    pub fn arcs(&self) -> Option<Vec<u64>> {
        let mut subids = Vec::new();
        let mut cur: u64 = 0;
        let mut in_subid = false;
        for b in self.iter() {
            if cur > (u64::MAX >> 7) {
                return None;
            }
            cur = (cur << 7) | (b & 0x7f) as u64;
            in_subid = b & 0x80 != 0;
            if !in_subid {
                subids.push(cur);
                cur = 0;
            }
        }
        if in_subid || subids.is_empty() {
            return None;
        }
        let first = subids[0];
        let (a, b) = match first {
            0..=39 => (0, first),
            40..=79 => (1, first - 40),
            _ => (2, first - 80),
        };
        let mut arcs = Vec::with_capacity(subids.len() + 1);
        arcs.push(a);
        arcs.push(b);
        arcs.extend_from_slice(&subids[1..]);
        Some(arcs)
    }
}

/// A set of oids allocated by gssapi, usually naming mechanisms
pub struct OidSet(gss_OID_set);

unsafe impl Send for OidSet {}
unsafe impl Sync for OidSet {}

impl Drop for OidSet {
    fn drop(&mut self) {
        if !self.0.is_null() {
            let mut minor = GSS_S_COMPLETE;
            let major = unsafe {
                gss_release_oid_set(&mut minor as *mut OM_uint32, &mut self.0 as *mut gss_OID_set)
            };
            if gss_error(major) > 0 {
                tracing::warn!(major, minor, "gss_release_oid_set failed");
            }
        }
    }
}

impl fmt::Debug for OidSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl OidSet {
    pub(crate) unsafe fn from_c(ptr: gss_OID_set) -> OidSet {
        OidSet(ptr)
    }

    pub(crate) unsafe fn to_c(&self) -> gss_OID_set {
        self.0
    }

    pub fn new() -> Result<OidSet, Error> {
        let mut minor = GSS_S_COMPLETE;
        let mut out = ptr::null_mut::<gss_OID_set_desc>();
        let major = unsafe {
            gss_create_empty_oid_set(&mut minor as *mut OM_uint32, &mut out as *mut gss_OID_set)
        };
        if major == GSS_S_COMPLETE {
            Ok(OidSet(out))
        } else {
            Err(Error { major, minor })
        }
    }

    /// Add a member to the set. gssapi copies the oid.
    pub fn add(&mut self, id: &Oid) -> Result<(), Error> {
        let mut minor = GSS_S_COMPLETE;
        let major = unsafe {
            gss_add_oid_set_member(
                &mut minor as *mut OM_uint32,
                id.to_c(),
                &mut self.0 as *mut gss_OID_set,
            )
        };
        if major == GSS_S_COMPLETE {
            Ok(())
        } else {
            Err(Error { major, minor })
        }
    }

    pub fn contains(&self, id: &Oid) -> Result<bool, Error> {
        let mut minor = GSS_S_COMPLETE;
        let mut present: c_int = 0;
        let major = unsafe {
            gss_test_oid_set_member(
                &mut minor as *mut OM_uint32,
                id.to_c(),
                self.0,
                &mut present as *mut c_int,
            )
        };
        if major == GSS_S_COMPLETE {
            Ok(present != 0)
        } else {
            Err(Error { major, minor })
        }
    }

    pub fn len(&self) -> usize {
        match unsafe { self.0.as_ref() } {
            None => 0,
            Some(set) => set.count as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Oid> + '_ {
        let elements = match unsafe { self.0.as_ref() } {
            None => ptr::null::<gss_OID_desc>(),
            Some(set) => set.elements as *const gss_OID_desc,
        };
        (0..self.len()).map(move |i| unsafe { &*(elements.add(i) as *const Oid) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_like_gss_oid_to_str() {
        assert_eq!(GSS_MECH_KRB5.to_string(), "{ 1 2 840 113554 1 2 2 }");
        assert_eq!(GSS_NT_HOSTBASED_SERVICE.to_string(), "{ 1 2 840 113554 1 2 1 4 }");
        assert_eq!(GSS_MECH_SPNEGO.to_string(), "{ 1 3 6 1 5 5 2 }");
    }

    #[test]
    fn truncated_encoding_is_rejected() {
        static BAD: Oid = Oid::from_slice(b"\x2a\x86");
        assert_eq!(BAD.arcs(), None);
        assert!(BAD.to_string().starts_with("<invalid oid"));
    }

    #[test]
    fn debug_names_well_known_oids() {
        assert_eq!(format!("{:?}", GSS_MECH_KRB5), "GSS_MECH_KRB5");
        static OTHER: Oid = Oid::from_slice(b"\x2b\x06\x01\x04\x01");
        assert_eq!(format!("{:?}", OTHER), "{ 1 3 6 1 4 1 }");
        assert_ne!(GSS_MECH_KRB5, GSS_MECH_IAKERB);
    }

    #[test]
    fn oid_set_membership() {
        let mut s = OidSet::new().unwrap();
        assert!(s.is_empty());
        s.add(&GSS_MECH_KRB5).unwrap();
        assert!(s.contains(&GSS_MECH_KRB5).unwrap());
        assert!(!s.contains(&GSS_MECH_SPNEGO).unwrap());
        assert_eq!(s.len(), 1);
        assert_eq!(s.iter().next(), Some(&GSS_MECH_KRB5));
        assert_eq!(format!("{:?}", s), "[GSS_MECH_KRB5]");
    }
}
