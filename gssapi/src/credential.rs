use crate::{
    error::{gss_error, Error, RoutineError},
    name::Name,
    oid::{OidSet, NO_OID_SET},
    util::BufRef,
};
use gssapi_sys::{
    gss_OID_set, gss_acquire_cred, gss_acquire_cred_with_password, gss_cred_id_struct,
    gss_cred_id_t, gss_cred_usage_t, gss_inquire_cred, gss_name_struct, gss_name_t,
    gss_release_cred, krb5_gss_register_acceptor_identity, OM_uint32, GSS_C_ACCEPT, GSS_C_BOTH,
    GSS_C_INITIATE, GSS_S_COMPLETE, _GSS_C_INDEFINITE,
};
use std::{
    ffi::CString, fmt, os::unix::ffi::OsStrExt, path::Path, ptr, str::FromStr, time::Duration,
};

pub(crate) const NO_CRED: gss_cred_id_t = ptr::null_mut();

#[derive(Debug)]
pub struct CredInfo {
    pub name: Name,
    pub lifetime: Duration,
    pub usage: CredUsage,
    pub mechanisms: OidSet,
}

struct CredInfoC {
    name: Option<gss_name_t>,
    lifetime: Option<u32>,
    usage: Option<gss_cred_usage_t>,
    mechanisms: Option<gss_OID_set>,
}

impl CredInfoC {
    fn empty() -> CredInfoC {
        CredInfoC {
            name: None,
            lifetime: None,
            usage: None,
            mechanisms: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CredUsage {
    #[default]
    Accept,
    Initiate,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("bad credential usage {0:?}, expected \"accept\", \"initiate\" or \"both\"")]
pub struct BadUsage(pub String);

impl FromStr for CredUsage {
    type Err = BadUsage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(CredUsage::Accept),
            "initiate" => Ok(CredUsage::Initiate),
            "both" => Ok(CredUsage::Both),
            s => Err(BadUsage(s.to_owned())),
        }
    }
}

impl CredUsage {
    fn from_c(c: gss_cred_usage_t) -> Result<Self, Error> {
        match c as u32 {
            GSS_C_BOTH => Ok(CredUsage::Both),
            GSS_C_INITIATE => Ok(CredUsage::Initiate),
            GSS_C_ACCEPT => Ok(CredUsage::Accept),
            _ => Err(Error::from(RoutineError::Failure)),
        }
    }

    fn to_c(self) -> gss_cred_usage_t {
        let u = match self {
            CredUsage::Both => GSS_C_BOTH,
            CredUsage::Initiate => GSS_C_INITIATE,
            CredUsage::Accept => GSS_C_ACCEPT,
        };
        u as gss_cred_usage_t
    }

    pub fn can_initiate(self) -> bool {
        matches!(self, CredUsage::Initiate | CredUsage::Both)
    }

    pub fn can_accept(self) -> bool {
        matches!(self, CredUsage::Accept | CredUsage::Both)
    }
}

/// Point the krb5 mechanism at a keytab for accepting contexts instead
/// of the default one (or `KRB5_KTNAME`). This is process wide.
pub fn register_acceptor_identity(keytab: &Path) -> Result<(), Error> {
    let keytab = CString::new(keytab.as_os_str().as_bytes())
        .map_err(|_| Error::from(RoutineError::BadName))?;
    let major = unsafe { krb5_gss_register_acceptor_identity(keytab.as_ptr()) };
    if major == GSS_S_COMPLETE {
        tracing::debug!(keytab = ?keytab, "registered acceptor identity");
        Ok(())
    } else {
        Err(Error { major, minor: 0 })
    }
}

/// The keytab the environment selects. Tests that register a keytab
/// register this one, so acceptors in later tests still find keys.
#[cfg(test)]
pub(crate) fn environment_keytab() -> std::path::PathBuf {
    std::env::var_os("KRB5_KTNAME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("FILE:/etc/krb5.keytab"))
}

/// gssapi credentials.
pub struct Cred(gss_cred_id_t);

impl Drop for Cred {
    fn drop(&mut self) {
        if !self.0.is_null() {
            let mut minor = GSS_S_COMPLETE;
            let major = unsafe {
                gss_release_cred(&mut minor as *mut OM_uint32, &mut self.0 as *mut gss_cred_id_t)
            };
            if gss_error(major) > 0 {
                tracing::warn!(major, minor, "gss_release_cred failed");
            }
        }
    }
}

unsafe impl Send for Cred {}
unsafe impl Sync for Cred {}

impl fmt::Debug for Cred {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match self.info() {
            Err(e) => write!(f, "error getting credential info {}", e),
            Ok(ifo) => write!(f, "{:?}", ifo),
        }
    }
}

fn time_req_to_c(time_req: Option<Duration>) -> OM_uint32 {
    time_req
        .map(|d| d.as_secs().min(_GSS_C_INDEFINITE as u64) as u32)
        .unwrap_or(_GSS_C_INDEFINITE)
}

impl Cred {
    /// Acquire gssapi credentials for `name` or the default name,
    /// lasting for `time_req` or as long as possible, for the purpose
    /// of `usage`, and for use with `desired_mechs` or the default
    /// mechanism.
    pub fn acquire(
        name: Option<&Name>,
        time_req: Option<Duration>,
        usage: CredUsage,
        desired_mechs: Option<&OidSet>,
    ) -> Result<Cred, Error> {
        let mut minor = GSS_S_COMPLETE;
        let mut cred = ptr::null_mut::<gss_cred_id_struct>();
        let major = unsafe {
            gss_acquire_cred(
                &mut minor as *mut OM_uint32,
                match name {
                    None => ptr::null_mut::<gss_name_struct>(),
                    Some(n) => n.to_c(),
                },
                time_req_to_c(time_req),
                match desired_mechs {
                    None => NO_OID_SET,
                    Some(desired_mechs) => desired_mechs.to_c(),
                },
                usage.to_c(),
                &mut cred as *mut gss_cred_id_t,
                ptr::null_mut::<gss_OID_set>(),
                ptr::null_mut::<OM_uint32>(),
            )
        };
        if major == GSS_S_COMPLETE {
            tracing::debug!(?usage, "acquired credentials");
            Ok(Cred(cred))
        } else {
            Err(Error { major, minor })
        }
    }

    /// Acquire gssapi credentials using a password. Otherwise the
    /// same as acquire.
    pub fn acquire_with_password(
        name: Option<&Name>,
        password: &str,
        time_req: Option<Duration>,
        usage: CredUsage,
        desired_mechs: Option<&OidSet>,
    ) -> Result<Cred, Error> {
        let mut minor = GSS_S_COMPLETE;
        let mut password = BufRef::from(password.as_bytes());
        let mut cred = ptr::null_mut::<gss_cred_id_struct>();
        let major = unsafe {
            gss_acquire_cred_with_password(
                &mut minor as *mut OM_uint32,
                match name {
                    None => ptr::null_mut::<gss_name_struct>(),
                    Some(n) => n.to_c(),
                },
                password.to_c(),
                time_req_to_c(time_req),
                match desired_mechs {
                    None => NO_OID_SET,
                    Some(desired_mechs) => desired_mechs.to_c(),
                },
                usage.to_c(),
                &mut cred as *mut gss_cred_id_t,
                ptr::null_mut::<gss_OID_set>(),
                ptr::null_mut::<OM_uint32>(),
            )
        };
        if major == GSS_S_COMPLETE {
            tracing::debug!(?usage, "acquired credentials with a password");
            Ok(Cred(cred))
        } else {
            Err(Error { major, minor })
        }
    }

    pub(crate) unsafe fn from_c(cred: gss_cred_id_t) -> Cred {
        Cred(cred)
    }

    pub(crate) unsafe fn to_c(&self) -> gss_cred_id_t {
        self.0
    }

    unsafe fn info_c(&self, mut ifo: CredInfoC) -> Result<CredInfoC, Error> {
        let mut minor: u32 = 0;
        let major = gss_inquire_cred(
            &mut minor as *mut OM_uint32,
            self.0,
            match ifo.name {
                None => ptr::null_mut::<gss_name_t>(),
                Some(ref mut n) => n as *mut gss_name_t,
            },
            match ifo.lifetime {
                None => ptr::null_mut::<u32>(),
                Some(ref mut l) => l as *mut OM_uint32,
            },
            match ifo.usage {
                None => ptr::null_mut::<gss_cred_usage_t>(),
                Some(ref mut u) => u as *mut gss_cred_usage_t,
            },
            match ifo.mechanisms {
                None => ptr::null_mut::<gss_OID_set>(),
                Some(ref mut s) => s as *mut gss_OID_set,
            },
        );
        if gss_error(major) > 0 {
            // free anything that was successfully built
            if let Some(n) = ifo.name {
                drop(Name::from_c(n));
            }
            if let Some(s) = ifo.mechanisms {
                drop(OidSet::from_c(s));
            }
            Err(Error { major, minor })
        } else {
            Ok(ifo)
        }
    }

    /// Return all the information associated with this credential
    pub fn info(&self) -> Result<CredInfo, Error> {
        let c = unsafe {
            self.info_c(CredInfoC {
                name: Some(ptr::null_mut()),
                lifetime: Some(0),
                usage: Some(0),
                mechanisms: Some(ptr::null_mut()),
            })?
        };
        let name = unsafe { Name::from_c(c.name.unwrap_or(ptr::null_mut())) };
        let mechanisms = unsafe { OidSet::from_c(c.mechanisms.unwrap_or(ptr::null_mut())) };
        Ok(CredInfo {
            name,
            lifetime: Duration::from_secs(c.lifetime.unwrap_or(0) as u64),
            usage: CredUsage::from_c(c.usage.unwrap_or(0))?,
            mechanisms,
        })
    }

    /// Return the name associated with this credential
    pub fn name(&self) -> Result<Name, Error> {
        let c = unsafe {
            self.info_c(CredInfoC {
                name: Some(ptr::null_mut()),
                ..CredInfoC::empty()
            })?
        };
        Ok(unsafe { Name::from_c(c.name.unwrap_or(ptr::null_mut())) })
    }

    /// Return the remaining lifetime of this credential
    pub fn lifetime(&self) -> Result<Duration, Error> {
        let c = unsafe {
            self.info_c(CredInfoC {
                lifetime: Some(0),
                ..CredInfoC::empty()
            })?
        };
        Ok(Duration::from_secs(c.lifetime.unwrap_or(0) as u64))
    }

    /// Return the allowed usage of this credential
    pub fn usage(&self) -> Result<CredUsage, Error> {
        let c = unsafe {
            self.info_c(CredInfoC {
                usage: Some(0),
                ..CredInfoC::empty()
            })?
        };
        CredUsage::from_c(c.usage.unwrap_or(0))
    }

    /// Return the mechanisms this credential may be used with
    pub fn mechanisms(&self) -> Result<OidSet, Error> {
        let c = unsafe {
            self.info_c(CredInfoC {
                mechanisms: Some(ptr::null_mut()),
                ..CredInfoC::empty()
            })?
        };
        Ok(unsafe { OidSet::from_c(c.mechanisms.unwrap_or(ptr::null_mut())) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid::{GSS_MECH_KRB5, GSS_NT_HOSTBASED_SERVICE};
    use serial_test::serial;

    #[test]
    fn usage_parses_the_three_option_strings() {
        assert_eq!("accept".parse::<CredUsage>(), Ok(CredUsage::Accept));
        assert_eq!("initiate".parse::<CredUsage>(), Ok(CredUsage::Initiate));
        assert_eq!("both".parse::<CredUsage>(), Ok(CredUsage::Both));
        let e = "Accept".parse::<CredUsage>().unwrap_err();
        assert_eq!(e, BadUsage("Accept".into()));
        assert!(e.to_string().contains("\"Accept\""));
        assert_eq!(CredUsage::default(), CredUsage::Accept);
    }

    #[test]
    fn usage_maps_to_the_c_constants() {
        assert_eq!(CredUsage::Both.to_c(), 0);
        assert_eq!(CredUsage::Initiate.to_c(), 1);
        assert_eq!(CredUsage::Accept.to_c(), 2);
        assert_eq!(CredUsage::from_c(2), Ok(CredUsage::Accept));
        assert!(CredUsage::from_c(7).is_err());
        assert!(CredUsage::Both.can_accept() && CredUsage::Both.can_initiate());
        assert!(!CredUsage::Accept.can_initiate());
    }

    #[test]
    fn indefinite_lifetime_by_default() {
        assert_eq!(time_req_to_c(None), _GSS_C_INDEFINITE);
        assert_eq!(time_req_to_c(Some(Duration::from_secs(3600))), 3600);
        assert_eq!(time_req_to_c(Some(Duration::from_secs(u64::MAX))), _GSS_C_INDEFINITE);
    }

    #[test]
    #[serial]
    fn keytab_path_with_nul_is_rejected() {
        let e = register_acceptor_identity(Path::new("/tmp/bad\0keytab")).unwrap_err();
        assert_eq!(e.routine_error(), Some(RoutineError::BadName));
        assert_eq!(e.calling_error(), None);
        assert_eq!(e.minor, 0);
    }

    #[test]
    #[serial]
    fn keytab_is_registered() {
        register_acceptor_identity(&environment_keytab()).unwrap();
    }

    #[test]
    #[serial]
    #[ignore = "needs a kerberos environment with a keytab for host@localhost"]
    fn acquire_acceptor_credentials() {
        let name = Name::new(b"host@localhost", Some(&GSS_NT_HOSTBASED_SERVICE)).unwrap();
        let mut mechs = OidSet::new().unwrap();
        mechs.add(&GSS_MECH_KRB5).unwrap();
        let cred = Cred::acquire(Some(&name), None, CredUsage::Accept, Some(&mechs)).unwrap();
        assert_eq!(cred.usage().unwrap(), CredUsage::Accept);
        assert!(cred.mechanisms().unwrap().contains(&GSS_MECH_KRB5).unwrap());
    }
}
