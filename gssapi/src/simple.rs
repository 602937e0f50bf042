//! A one object client/server helper. `Simple` holds the imported
//! service name, whatever credentials were acquired for it, and the one
//! security context it negotiates, either as initiator or as acceptor.
use crate::{
    context::{ClientCtx, CtxFlags, CtxInfo, SecurityContext, ServerCtx},
    credential::{register_acceptor_identity, BadUsage, Cred, CredUsage},
    error::Error,
    name::Name,
    oid::{Oid, OidSet, GSS_NT_HOSTBASED_SERVICE},
    util::Buf,
};
use std::{
    fmt,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Acceptor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Acceptor => f.write_str("acceptor"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SimpleError {
    #[error(transparent)]
    Gss(#[from] Error),
    #[error("no credentials yet acquired, call acquire_credentials first")]
    NoCredentials,
    #[error("the acquired credentials are for {0:?} usage and cannot accept")]
    CannotAccept(CredUsage),
    #[error("no security context, call init_context or accept_context first")]
    NoContext,
    #[error("the security context was already started as the {0}")]
    RoleMismatch(Role),
    #[error("invalid keytab path {0:?}")]
    InvalidKeytab(PathBuf),
    #[error(transparent)]
    BadUsage(#[from] BadUsage),
}

/// The principal a `Simple` authenticates as or to. With no service the
/// `host` service is used, and a service that already names a host is
/// taken as is.
pub fn service_principal(host: &str, service: Option<&str>) -> String {
    match service {
        None => format!("host@{}", host),
        Some(s) if s.contains('@') => s.to_owned(),
        Some(s) => format!("{}@{}", s, host),
    }
}

/// Import `service@host` as a hostbased service name
pub fn import_name(service: &str) -> Result<Name, Error> {
    Name::new(service.as_bytes(), Some(&GSS_NT_HOSTBASED_SERVICE))
}

/// Configuration for a `Simple`. Everything but the host has a default:
/// the `host` service, no keytab beyond what the environment selects,
/// mutual authentication with sequence checking, the default mechanism,
/// and credentials that last as long as the library allows.
#[derive(Debug, Clone)]
pub struct SimpleBuilder {
    host: String,
    service: Option<String>,
    keytab: Option<PathBuf>,
    flags: CtxFlags,
    mech: Option<&'static Oid>,
    lifetime: Option<Duration>,
}

impl SimpleBuilder {
    pub fn new(host: impl Into<String>) -> SimpleBuilder {
        SimpleBuilder {
            host: host.into(),
            service: None,
            keytab: None,
            flags: CtxFlags::GSS_C_MUTUAL_FLAG | CtxFlags::GSS_C_SEQUENCE_FLAG,
            mech: None,
            lifetime: None,
        }
    }

    /// `svc` or `svc@host`
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Accept contexts with the keys in this keytab
    pub fn keytab(mut self, keytab: impl Into<PathBuf>) -> Self {
        self.keytab = Some(keytab.into());
        self
    }

    /// Flags requested when initiating
    pub fn flags(mut self, flags: CtxFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn mechanism(mut self, mech: &'static Oid) -> Self {
        self.mech = Some(mech);
        self
    }

    pub fn credential_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn build(self) -> Result<Simple, SimpleError> {
        let service = service_principal(&self.host, self.service.as_deref());
        let name = import_name(&service)?;
        let simple = Simple {
            host: self.host,
            service,
            name,
            flags: self.flags,
            mech: self.mech,
            lifetime: self.lifetime,
            cred: None,
            negotiation: Negotiation::Idle,
        };
        if let Some(keytab) = self.keytab {
            simple.set_keytab(&keytab)?;
        }
        Ok(simple)
    }
}

enum Negotiation {
    Idle,
    Initiator(ClientCtx),
    Acceptor(ServerCtx),
}

pub struct Simple {
    host: String,
    service: String,
    name: Name,
    flags: CtxFlags,
    mech: Option<&'static Oid>,
    lifetime: Option<Duration>,
    cred: Option<(Cred, CredUsage)>,
    negotiation: Negotiation,
}

impl fmt::Debug for Simple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simple")
            .field("host", &self.host)
            .field("service", &self.service)
            .field("flags", &self.flags)
            .field("credentials", &self.cred.as_ref().map(|(_, usage)| usage))
            .field("role", &self.role())
            .field("established", &self.is_established())
            .finish()
    }
}

impl Simple {
    /// `service` is either `svc@example.org` or just `svc`, in which case
    /// `host_name` is appended. With no service the `host` service is
    /// used. The keytab, if given, is registered for accepting.
    pub fn new(
        host_name: &str,
        service: Option<&str>,
        keytab: Option<&Path>,
    ) -> Result<Simple, SimpleError> {
        let mut builder = SimpleBuilder::new(host_name);
        if let Some(service) = service {
            builder = builder.service(service);
        }
        if let Some(keytab) = keytab {
            builder = builder.keytab(keytab);
        }
        builder.build()
    }

    pub fn builder(host_name: impl Into<String>) -> SimpleBuilder {
        SimpleBuilder::new(host_name)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The full `service@host` principal
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn role(&self) -> Option<Role> {
        match self.negotiation {
            Negotiation::Idle => None,
            Negotiation::Initiator(_) => Some(Role::Initiator),
            Negotiation::Acceptor(_) => Some(Role::Acceptor),
        }
    }

    fn take_initiator_cred(&mut self) -> Option<Cred> {
        match self.cred.take() {
            Some((cred, usage)) if usage.can_initiate() => Some(cred),
            other => {
                self.cred = other;
                None
            }
        }
    }

    fn initiator(&mut self) -> Result<&mut ClientCtx, SimpleError> {
        if let Negotiation::Idle = self.negotiation {
            let target = self.name.duplicate()?;
            let cred = self.take_initiator_cred();
            tracing::debug!(service = %self.service, default_cred = cred.is_none(), "initiating");
            self.negotiation =
                Negotiation::Initiator(ClientCtx::new(cred, target, self.flags, self.mech));
        }
        match &mut self.negotiation {
            Negotiation::Initiator(ctx) => Ok(ctx),
            _ => Err(SimpleError::RoleMismatch(Role::Acceptor)),
        }
    }

    fn acceptor(&mut self) -> Result<&mut ServerCtx, SimpleError> {
        if let Negotiation::Idle = self.negotiation {
            let cred = match self.cred.take() {
                None => return Err(SimpleError::NoCredentials),
                Some((cred, usage)) if usage.can_accept() => cred,
                Some((cred, usage)) => {
                    self.cred = Some((cred, usage));
                    return Err(SimpleError::CannotAccept(usage));
                }
            };
            tracing::debug!(service = %self.service, "accepting");
            self.negotiation = Negotiation::Acceptor(ServerCtx::new(Some(cred)));
        }
        match &mut self.negotiation {
            Negotiation::Acceptor(ctx) => Ok(ctx),
            _ => Err(SimpleError::RoleMismatch(Role::Initiator)),
        }
    }

    fn context(&self) -> Result<&dyn SecurityContext, SimpleError> {
        match &self.negotiation {
            Negotiation::Idle => Err(SimpleError::NoContext),
            Negotiation::Initiator(ctx) => Ok(ctx),
            Negotiation::Acceptor(ctx) => Ok(ctx),
        }
    }

    fn context_mut(&mut self) -> Result<&mut dyn SecurityContext, SimpleError> {
        match &mut self.negotiation {
            Negotiation::Idle => Err(SimpleError::NoContext),
            Negotiation::Initiator(ctx) => Ok(ctx),
            Negotiation::Acceptor(ctx) => Ok(ctx),
        }
    }

    /// Initiate (or continue initiating) the security context. Pass
    /// `None` the first time and the token the remote service sent back
    /// on continuation. Returns the token to send to the remote service;
    /// `None` means the context is established.
    pub fn init_context(&mut self, in_token: Option<&[u8]>) -> Result<Option<Buf>, SimpleError> {
        Ok(self.initiator()?.step(in_token)?)
    }

    /// Accept a security context initiated by a remote peer. Returns the
    /// token to send back, if any. Requires `acquire_credentials` first.
    pub fn accept_context(&mut self, in_token: &[u8]) -> Result<Option<Buf>, SimpleError> {
        Ok(self.acceptor()?.step(in_token)?)
    }

    /// Acquire credentials for the service name from the credential
    /// cache or keytab. This does not log you in. Servers want
    /// `CredUsage::Accept`.
    pub fn acquire_credentials(&mut self, usage: CredUsage) -> Result<(), SimpleError> {
        let mechs = match self.mech {
            None => None,
            Some(mech) => {
                let mut s = OidSet::new()?;
                s.add(mech)?;
                Some(s)
            }
        };
        let cred = Cred::acquire(Some(&self.name), self.lifetime, usage, mechs.as_ref())?;
        tracing::debug!(service = %self.service, ?usage, "acquired service credentials");
        self.cred = Some((cred, usage));
        Ok(())
    }

    /// Register a keytab to accept with. This applies to the whole
    /// process, not just this object.
    pub fn set_keytab(&self, keytab: &Path) -> Result<(), SimpleError> {
        if keytab.as_os_str().as_bytes().contains(&0) {
            return Err(SimpleError::InvalidKeytab(keytab.to_path_buf()));
        }
        Ok(register_acceptor_identity(keytab)?)
    }

    /// Wrap a message for the peer, encrypted if `encrypt` is set
    pub fn wrap_message(&mut self, msg: &[u8], encrypt: bool) -> Result<Buf, SimpleError> {
        Ok(self.context_mut()?.wrap(encrypt, msg)?)
    }

    pub fn unwrap_message(&mut self, msg: &[u8]) -> Result<Buf, SimpleError> {
        Ok(self.context_mut()?.unwrap(msg)?)
    }

    pub fn is_established(&self) -> bool {
        self.context().map(|c| c.is_complete()).unwrap_or(false)
    }

    /// On the accepting side, the authenticated initiator
    pub fn source_name(&self) -> Option<&Name> {
        match &self.negotiation {
            Negotiation::Acceptor(ctx) => ctx.source_name(),
            _ => None,
        }
    }

    pub fn context_info(&self) -> Result<CtxInfo, SimpleError> {
        Ok(self.context()?.info()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::environment_keytab;
    use serial_test::serial;
    use std::ptr;

    // A null credential handle is the library's default credential
    fn default_cred(usage: CredUsage) -> Option<(Cred, CredUsage)> {
        Some((unsafe { Cred::from_c(ptr::null_mut()) }, usage))
    }

    fn held_usage(s: &Simple) -> Option<CredUsage> {
        s.cred.as_ref().map(|(_, usage)| *usage)
    }

    #[test]
    fn service_defaults_to_host() {
        assert_eq!(service_principal("example.org", None), "host@example.org");
        assert_eq!(service_principal("example.org", Some("http")), "http@example.org");
        assert_eq!(service_principal("example.org", Some("nfs@other.org")), "nfs@other.org");
    }

    #[test]
    fn new_imports_the_service_name() {
        let s = Simple::new("example.org", Some("host"), None).unwrap();
        assert_eq!(s.service(), "host@example.org");
        assert_eq!(s.host(), "example.org");
        assert_eq!(s.name().to_string(), "host@example.org");
        assert_eq!(s.role(), None);
        assert!(!s.is_established());
    }

    #[test]
    fn accepting_requires_credentials() {
        let mut s = Simple::new("example.org", None, None).unwrap();
        assert!(matches!(s.accept_context(b"token"), Err(SimpleError::NoCredentials)));
        assert_eq!(s.role(), None);
    }

    #[test]
    fn messages_need_a_context() {
        let mut s = Simple::builder("example.org").service("imap").build().unwrap();
        assert!(matches!(s.wrap_message(b"msg", true), Err(SimpleError::NoContext)));
        assert!(matches!(s.unwrap_message(b"msg"), Err(SimpleError::NoContext)));
        assert!(matches!(s.context_info(), Err(SimpleError::NoContext)));
        assert!(s.source_name().is_none());
    }

    #[test]
    fn an_initiator_cannot_accept() {
        let mut s = Simple::new("example.org", None, None).unwrap();
        // whether this succeeds depends on the local kerberos setup
        let _ = s.init_context(None);
        assert_eq!(s.role(), Some(Role::Initiator));
        assert!(matches!(
            s.accept_context(b"token"),
            Err(SimpleError::RoleMismatch(Role::Initiator))
        ));
    }

    #[test]
    fn initiating_uses_only_initiator_credentials() {
        let mut s = Simple::new("example.org", None, None).unwrap();
        s.cred = default_cred(CredUsage::Accept);
        let _ = s.init_context(None);
        assert_eq!(held_usage(&s), Some(CredUsage::Accept));

        let mut s = Simple::new("example.org", None, None).unwrap();
        s.cred = default_cred(CredUsage::Both);
        let _ = s.init_context(None);
        assert_eq!(held_usage(&s), None);
        assert_eq!(s.role(), Some(Role::Initiator));
    }

    #[test]
    fn an_acceptor_cannot_initiate() {
        let mut s = Simple::new("example.org", None, None).unwrap();
        s.cred = default_cred(CredUsage::Accept);
        assert!(matches!(s.accept_context(b"garbage"), Err(SimpleError::Gss(_))));
        assert_eq!(held_usage(&s), None);
        assert_eq!(s.role(), Some(Role::Acceptor));
        assert!(!s.is_established());
        assert!(matches!(
            s.init_context(None),
            Err(SimpleError::RoleMismatch(Role::Acceptor))
        ));
    }

    #[test]
    fn initiator_credentials_cannot_accept() {
        let mut s = Simple::new("example.org", None, None).unwrap();
        s.cred = default_cred(CredUsage::Initiate);
        assert!(matches!(
            s.accept_context(b"garbage"),
            Err(SimpleError::CannotAccept(CredUsage::Initiate))
        ));
        assert_eq!(held_usage(&s), Some(CredUsage::Initiate));
        assert_eq!(s.role(), None);
    }

    #[test]
    #[serial]
    fn keytab_with_nul_is_invalid() {
        let r = Simple::new("example.org", None, Some(Path::new("/etc/bad\0.keytab")));
        match r {
            Err(SimpleError::InvalidKeytab(p)) => assert_eq!(p, Path::new("/etc/bad\0.keytab")),
            r => panic!("expected InvalidKeytab, got {:?}", r),
        }
    }

    #[test]
    #[serial]
    fn keytab_is_registered_on_build() {
        let s = Simple::builder("example.org").keytab(environment_keytab()).build();
        assert!(s.is_ok());
    }

    #[test]
    fn errors_render_for_humans() {
        assert_eq!(
            SimpleError::RoleMismatch(Role::Acceptor).to_string(),
            "the security context was already started as the acceptor"
        );
        assert_eq!(
            SimpleError::CannotAccept(CredUsage::Initiate).to_string(),
            "the acquired credentials are for Initiate usage and cannot accept"
        );
        let e: SimpleError = "neither".parse::<CredUsage>().unwrap_err().into();
        assert!(e.to_string().starts_with("bad credential usage \"neither\""));
    }

    #[test]
    #[serial]
    #[ignore = "needs a kerberos environment: a TGT and a keytab for host@localhost"]
    fn client_and_server_negotiate() {
        let mut server = Simple::new("localhost", None, None).unwrap();
        server.acquire_credentials(CredUsage::Accept).unwrap();
        let mut client = Simple::builder("localhost")
            .flags(CtxFlags::GSS_C_MUTUAL_FLAG | CtxFlags::GSS_C_CONF_FLAG)
            .build()
            .unwrap();
        let mut tok = client.init_context(None).unwrap();
        while let Some(t) = tok {
            match server.accept_context(&t).unwrap() {
                None => break,
                Some(reply) => tok = client.init_context(Some(&*reply)).unwrap(),
            }
        }
        assert!(client.is_established() && server.is_established());
        assert!(server.source_name().is_some());
        let emsg = client.wrap_message(b"This is a test message", true).unwrap();
        assert_eq!(&*server.unwrap_message(&emsg).unwrap(), b"This is a test message");
    }
}
