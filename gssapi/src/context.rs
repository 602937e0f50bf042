use crate::{
    credential::{Cred, NO_CRED},
    error::{gss_error, Error, RoutineError},
    name::Name,
    oid::{Oid, NO_OID},
    util::{Buf, BufRef},
};
use gssapi_sys::{
    gss_OID, gss_accept_sec_context, gss_buffer_desc, gss_channel_bindings_struct,
    gss_cred_id_struct, gss_cred_id_t, gss_ctx_id_t, gss_delete_sec_context,
    gss_init_sec_context, gss_inquire_context, gss_name_struct, gss_name_t, gss_qop_t,
    gss_unwrap, gss_wrap, OM_uint32, GSS_C_ANON_FLAG, GSS_C_CONF_FLAG, GSS_C_DELEG_FLAG,
    GSS_C_DELEG_POLICY_FLAG, GSS_C_INTEG_FLAG, GSS_C_MUTUAL_FLAG, GSS_C_PROT_READY_FLAG,
    GSS_C_QOP_DEFAULT, GSS_C_REPLAY_FLAG, GSS_C_SEQUENCE_FLAG, GSS_C_TRANS_FLAG,
    GSS_S_COMPLETE, _GSS_C_INDEFINITE, _GSS_S_CONTINUE_NEEDED,
};
use std::{fmt, mem, os::raw::c_int, ptr, time::Duration};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CtxFlags: u32 {
        const GSS_C_DELEG_FLAG = GSS_C_DELEG_FLAG;
        const GSS_C_MUTUAL_FLAG = GSS_C_MUTUAL_FLAG;
        const GSS_C_REPLAY_FLAG = GSS_C_REPLAY_FLAG;
        const GSS_C_SEQUENCE_FLAG = GSS_C_SEQUENCE_FLAG;
        const GSS_C_CONF_FLAG = GSS_C_CONF_FLAG;
        const GSS_C_INTEG_FLAG = GSS_C_INTEG_FLAG;
        const GSS_C_ANON_FLAG = GSS_C_ANON_FLAG;
        const GSS_C_PROT_READY_FLAG = GSS_C_PROT_READY_FLAG;
        const GSS_C_TRANS_FLAG = GSS_C_TRANS_FLAG;
        const GSS_C_DELEG_POLICY_FLAG = GSS_C_DELEG_POLICY_FLAG;
    }
}

/// Owns a security context handle. The context is deleted exactly once,
/// when the handle is dropped.
struct ContextHandle(gss_ctx_id_t);

unsafe impl Send for ContextHandle {}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        if !self.0.is_null() {
            let mut minor = GSS_S_COMPLETE;
            let major = unsafe {
                gss_delete_sec_context(
                    &mut minor as *mut OM_uint32,
                    &mut self.0 as *mut gss_ctx_id_t,
                    ptr::null_mut::<gss_buffer_desc>(),
                )
            };
            if gss_error(major) > 0 {
                tracing::warn!(major, minor, "gss_delete_sec_context failed");
            }
        }
    }
}

impl ContextHandle {
    fn empty() -> ContextHandle {
        ContextHandle(ptr::null_mut())
    }
}

enum CtxState {
    Uninit,
    Partial(ContextHandle),
    Complete(ContextHandle),
    Failed(Error),
}

impl CtxState {
    /// Classify the result of an init/accept call. A failed context is
    /// deleted here.
    fn after_step(
        handle: ContextHandle,
        major: u32,
        minor: u32,
        out_tok: Buf,
        role: &'static str,
    ) -> (CtxState, Result<Option<Buf>, Error>) {
        if gss_error(major) > 0 {
            let e = Error { major, minor };
            tracing::debug!(role, major, minor, "security context failed");
            drop(handle);
            (CtxState::Failed(e), Err(e))
        } else if major & _GSS_S_CONTINUE_NEEDED > 0 {
            tracing::debug!(role, token_len = out_tok.len(), "security context continue needed");
            (CtxState::Partial(handle), Ok(Some(out_tok)))
        } else {
            tracing::debug!(role, token_len = out_tok.len(), "security context complete");
            let tok = if out_tok.is_empty() { None } else { Some(out_tok) };
            (CtxState::Complete(handle), Ok(tok))
        }
    }

    fn raw(&self) -> Result<gss_ctx_id_t, Error> {
        match self {
            CtxState::Uninit => Err(Error::from(RoutineError::NoContext)),
            CtxState::Failed(e) => Err(*e),
            CtxState::Partial(h) | CtxState::Complete(h) => Ok(h.0),
        }
    }

    fn is_complete(&self) -> bool {
        matches!(self, CtxState::Complete(_))
    }
}

impl fmt::Debug for CtxState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CtxState::Uninit => f.write_str("Uninit"),
            CtxState::Partial(_) => f.write_str("Partial"),
            CtxState::Complete(_) => f.write_str("Complete"),
            CtxState::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

/// What gssapi knows about an established (or establishing) context
#[derive(Debug)]
pub struct CtxInfo {
    pub source_name: Option<Name>,
    pub target_name: Option<Name>,
    pub lifetime: Duration,
    pub mechanism: Option<&'static Oid>,
    pub flags: CtxFlags,
    pub local: bool,
    pub open: bool,
}

fn info(ctx: gss_ctx_id_t) -> Result<CtxInfo, Error> {
    let mut minor = GSS_S_COMPLETE;
    let mut source = ptr::null_mut::<gss_name_struct>();
    let mut target = ptr::null_mut::<gss_name_struct>();
    let mut lifetime: OM_uint32 = 0;
    let mut mech: gss_OID = NO_OID;
    let mut flags: OM_uint32 = 0;
    let mut local: c_int = 0;
    let mut open: c_int = 0;
    let major = unsafe {
        gss_inquire_context(
            &mut minor as *mut OM_uint32,
            ctx,
            &mut source as *mut gss_name_t,
            &mut target as *mut gss_name_t,
            &mut lifetime as *mut OM_uint32,
            &mut mech as *mut gss_OID,
            &mut flags as *mut OM_uint32,
            &mut local as *mut c_int,
            &mut open as *mut c_int,
        )
    };
    let source_name = (!source.is_null()).then(|| unsafe { Name::from_c(source) });
    let target_name = (!target.is_null()).then(|| unsafe { Name::from_c(target) });
    if gss_error(major) > 0 {
        Err(Error { major, minor })
    } else {
        Ok(CtxInfo {
            source_name,
            target_name,
            lifetime: Duration::from_secs(lifetime as u64),
            mechanism: unsafe { Oid::from_c(mech) },
            flags: CtxFlags::from_bits_truncate(flags),
            local: local != 0,
            open: open != 0,
        })
    }
}

fn wrap(ctx: gss_ctx_id_t, encrypt: bool, msg: &[u8]) -> Result<Buf, Error> {
    let mut minor = GSS_S_COMPLETE;
    let mut msg = BufRef::from(msg);
    let mut enc_msg = Buf::empty();
    let major = unsafe {
        gss_wrap(
            &mut minor as *mut OM_uint32,
            ctx,
            if encrypt { 1 } else { 0 },
            GSS_C_QOP_DEFAULT as gss_qop_t,
            msg.to_c(),
            ptr::null_mut(),
            enc_msg.to_c(),
        )
    };
    if gss_error(major) > 0 {
        Err(Error { major, minor })
    } else {
        Ok(enc_msg)
    }
}

fn unwrap(ctx: gss_ctx_id_t, msg: &[u8]) -> Result<Buf, Error> {
    let mut minor = GSS_S_COMPLETE;
    let mut msg = BufRef::from(msg);
    let mut out = Buf::empty();
    let major = unsafe {
        gss_unwrap(
            &mut minor as *mut OM_uint32,
            ctx,
            msg.to_c(),
            out.to_c(),
            ptr::null_mut::<c_int>(),
            ptr::null_mut::<gss_qop_t>(),
        )
    };
    if gss_error(major) > 0 {
        Err(Error { major, minor })
    } else {
        Ok(out)
    }
}

/// Operations available once a context exists, whichever side of the
/// negotiation it was created on.
pub trait SecurityContext {
    /// Protect `msg` for the peer, encrypting it if `encrypt` is set,
    /// otherwise only integrity protecting it.
    fn wrap(&mut self, encrypt: bool, msg: &[u8]) -> Result<Buf, Error>;

    /// Check and, if necessary, decrypt a message wrapped by the peer
    fn unwrap(&mut self, msg: &[u8]) -> Result<Buf, Error>;

    fn info(&self) -> Result<CtxInfo, Error>;

    fn is_complete(&self) -> bool;
}

/// The initiating (client) side of a security context
#[derive(Debug)]
pub struct ClientCtx {
    state: CtxState,
    cred: Option<Cred>,
    target: Name,
    flags: CtxFlags,
    mech: Option<&'static Oid>,
    granted: CtxFlags,
}

impl ClientCtx {
    /// Create a context that will authenticate to `target`, with
    /// `cred` or the default credentials, requesting `flags`, using
    /// `mech` or the default mechanism. Nothing is sent until `step`.
    pub fn new(
        cred: Option<Cred>,
        target: Name,
        flags: CtxFlags,
        mech: Option<&'static Oid>,
    ) -> ClientCtx {
        ClientCtx {
            state: CtxState::Uninit,
            cred,
            target,
            flags,
            mech,
            granted: CtxFlags::empty(),
        }
    }

    /// Perform one round of `gss_init_sec_context`. The first call takes
    /// `None`, later calls take the token the server sent back. Returns
    /// the token to send to the server, if any.
    pub fn step(&mut self, tok: Option<&[u8]>) -> Result<Option<Buf>, Error> {
        let mut handle = match mem::replace(&mut self.state, CtxState::Uninit) {
            CtxState::Uninit => ContextHandle::empty(),
            CtxState::Partial(h) => h,
            s @ CtxState::Complete(_) => {
                self.state = s;
                return Ok(None);
            }
            CtxState::Failed(e) => {
                self.state = CtxState::Failed(e);
                return Err(e);
            }
        };
        let mut minor = GSS_S_COMPLETE;
        let mut tok = tok.map(BufRef::from);
        let mut out_tok = Buf::empty();
        let mut flag_bits: OM_uint32 = 0;
        let major = unsafe {
            gss_init_sec_context(
                &mut minor as *mut OM_uint32,
                self.cred.as_ref().map_or(NO_CRED, |c| c.to_c()),
                &mut handle.0 as *mut gss_ctx_id_t,
                self.target.to_c(),
                self.mech.map_or(NO_OID, |m| m.to_c()),
                self.flags.bits(),
                _GSS_C_INDEFINITE,
                ptr::null_mut::<gss_channel_bindings_struct>(),
                match tok {
                    None => ptr::null_mut::<gss_buffer_desc>(),
                    Some(ref mut tok) => tok.to_c(),
                },
                ptr::null_mut::<gss_OID>(),
                out_tok.to_c(),
                &mut flag_bits as *mut OM_uint32,
                ptr::null_mut::<OM_uint32>(),
            )
        };
        self.granted = CtxFlags::from_bits_truncate(flag_bits);
        let (state, res) = CtxState::after_step(handle, major, minor, out_tok, "initiator");
        self.state = state;
        res
    }

    pub fn target(&self) -> &Name {
        &self.target
    }

    /// The flags requested when the context was created
    pub fn requested_flags(&self) -> CtxFlags {
        self.flags
    }

    /// The flags the mechanism reported after the last step
    pub fn flags(&self) -> CtxFlags {
        self.granted
    }
}

impl SecurityContext for ClientCtx {
    fn wrap(&mut self, encrypt: bool, msg: &[u8]) -> Result<Buf, Error> {
        wrap(self.state.raw()?, encrypt, msg)
    }

    fn unwrap(&mut self, msg: &[u8]) -> Result<Buf, Error> {
        unwrap(self.state.raw()?, msg)
    }

    fn info(&self) -> Result<CtxInfo, Error> {
        info(self.state.raw()?)
    }

    fn is_complete(&self) -> bool {
        self.state.is_complete()
    }
}

/// The accepting (server) side of a security context
#[derive(Debug)]
pub struct ServerCtx {
    state: CtxState,
    cred: Option<Cred>,
    source: Option<Name>,
    delegated_cred: Option<Cred>,
    flags: CtxFlags,
}

impl ServerCtx {
    /// Create a context that accepts with `cred`, or with the default
    /// acceptor credentials.
    pub fn new(cred: Option<Cred>) -> ServerCtx {
        ServerCtx {
            state: CtxState::Uninit,
            cred,
            source: None,
            delegated_cred: None,
            flags: CtxFlags::empty(),
        }
    }

    /// Perform one round of `gss_accept_sec_context` with the token the
    /// client sent. Returns the token to send back, if any.
    pub fn step(&mut self, tok: &[u8]) -> Result<Option<Buf>, Error> {
        let mut handle = match mem::replace(&mut self.state, CtxState::Uninit) {
            CtxState::Uninit => ContextHandle::empty(),
            CtxState::Partial(h) => h,
            s @ CtxState::Complete(_) => {
                self.state = s;
                return Ok(None);
            }
            CtxState::Failed(e) => {
                self.state = CtxState::Failed(e);
                return Err(e);
            }
        };
        let mut minor = GSS_S_COMPLETE;
        let mut tok = BufRef::from(tok);
        let mut out_tok = Buf::empty();
        let mut source = ptr::null_mut::<gss_name_struct>();
        let mut delegated_cred = ptr::null_mut::<gss_cred_id_struct>();
        let mut flag_bits: OM_uint32 = 0;
        let major = unsafe {
            gss_accept_sec_context(
                &mut minor as *mut OM_uint32,
                &mut handle.0 as *mut gss_ctx_id_t,
                self.cred.as_ref().map_or(NO_CRED, |c| c.to_c()),
                tok.to_c(),
                ptr::null_mut::<gss_channel_bindings_struct>(),
                &mut source as *mut gss_name_t,
                ptr::null_mut::<gss_OID>(),
                out_tok.to_c(),
                &mut flag_bits as *mut OM_uint32,
                ptr::null_mut::<OM_uint32>(),
                &mut delegated_cred as *mut gss_cred_id_t,
            )
        };
        // the library hands out a new reference for each non null output,
        // unless it is the one we already hold
        if !source.is_null() && self.source.as_ref().map_or(true, |n| source != unsafe { n.to_c() }) {
            self.source = Some(unsafe { Name::from_c(source) });
        }
        if !delegated_cred.is_null()
            && self.delegated_cred.as_ref().map_or(true, |c| delegated_cred != unsafe { c.to_c() })
        {
            self.delegated_cred = Some(unsafe { Cred::from_c(delegated_cred) });
        }
        self.flags.insert(CtxFlags::from_bits_truncate(flag_bits));
        let (state, res) = CtxState::after_step(handle, major, minor, out_tok, "acceptor");
        self.state = state;
        res
    }

    /// The authenticated name of the initiator, once the library
    /// reported it.
    pub fn source_name(&self) -> Option<&Name> {
        self.source.as_ref()
    }

    pub fn delegated_cred(&self) -> Option<&Cred> {
        self.delegated_cred.as_ref()
    }

    /// Take ownership of the credentials the client delegated, if any
    pub fn take_delegated_cred(&mut self) -> Option<Cred> {
        self.delegated_cred.take()
    }

    /// The flags reported so far by the mechanism
    pub fn flags(&self) -> CtxFlags {
        self.flags
    }
}

impl SecurityContext for ServerCtx {
    fn wrap(&mut self, encrypt: bool, msg: &[u8]) -> Result<Buf, Error> {
        wrap(self.state.raw()?, encrypt, msg)
    }

    fn unwrap(&mut self, msg: &[u8]) -> Result<Buf, Error> {
        unwrap(self.state.raw()?, msg)
    }

    fn info(&self) -> Result<CtxInfo, Error> {
        info(self.state.raw()?)
    }

    fn is_complete(&self) -> bool {
        self.state.is_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        credential::CredUsage,
        oid::{GSS_MECH_KRB5, GSS_NT_HOSTBASED_SERVICE},
    };
    use serial_test::serial;

    fn target() -> Name {
        Name::new(b"host@example.org", Some(&GSS_NT_HOSTBASED_SERVICE)).unwrap()
    }

    #[test]
    fn wrapping_before_the_first_step_is_no_context() {
        let mut ctx = ClientCtx::new(None, target(), CtxFlags::GSS_C_MUTUAL_FLAG, None);
        let e = ctx.wrap(true, b"msg").unwrap_err();
        assert_eq!(e.routine_error(), Some(RoutineError::NoContext));
        assert_eq!(ctx.unwrap(b"msg").unwrap_err(), e);
        assert!(ctx.info().is_err());
        assert!(!ctx.is_complete());
        assert_eq!(ctx.target().to_string(), "host@example.org");
    }

    #[test]
    fn server_without_token_exchange_has_no_context() {
        let mut ctx = ServerCtx::new(None);
        assert!(ctx.wrap(false, b"msg").is_err());
        assert!(ctx.source_name().is_none());
        assert!(ctx.take_delegated_cred().is_none());
        assert_eq!(ctx.flags(), CtxFlags::empty());
    }

    #[test]
    fn garbage_token_fails_and_stays_failed() {
        let mut ctx = ServerCtx::new(None);
        let e = ctx.step(b"definitely not a gssapi token").unwrap_err();
        assert_ne!(gss_error(e.major), 0);
        assert_eq!(ctx.step(b"another").unwrap_err(), e);
        assert_eq!(ctx.wrap(true, b"msg").unwrap_err(), e);
    }

    #[test]
    fn after_step_classifies_status() {
        let (s, r) = CtxState::after_step(ContextHandle::empty(), _GSS_S_CONTINUE_NEEDED, 0, Buf::empty(), "t");
        assert!(matches!(s, CtxState::Partial(_)));
        assert!(r.unwrap().is_some());
        let (s, r) = CtxState::after_step(ContextHandle::empty(), GSS_S_COMPLETE, 0, Buf::empty(), "t");
        assert!(s.is_complete());
        assert!(r.unwrap().is_none());
        let failure = RoutineError::DefectiveToken.to_major();
        let (s, r) = CtxState::after_step(ContextHandle::empty(), failure, 5, Buf::empty(), "t");
        assert!(matches!(s, CtxState::Failed(Error { major, minor: 5 }) if major == failure));
        assert!(r.is_err());
    }

    #[test]
    #[serial]
    #[ignore = "needs a kerberos environment: a TGT and a keytab for host@localhost"]
    fn negotiate_and_exchange_messages() {
        let name = Name::new(b"host@localhost", Some(&GSS_NT_HOSTBASED_SERVICE)).unwrap();
        let cname = name.canonicalize(Some(&GSS_MECH_KRB5)).unwrap();
        let server_cred = Cred::acquire(Some(&cname), None, CredUsage::Accept, None).unwrap();
        let mut server = ServerCtx::new(Some(server_cred));
        let flags = CtxFlags::GSS_C_MUTUAL_FLAG | CtxFlags::GSS_C_CONF_FLAG;
        let mut client = ClientCtx::new(None, cname, flags, Some(&GSS_MECH_KRB5));
        let mut server_tok: Option<Buf> = None;
        loop {
            match client.step(server_tok.as_deref()).unwrap() {
                None => break,
                Some(client_tok) => match server.step(&client_tok).unwrap() {
                    None => break,
                    Some(tok) => server_tok = Some(tok),
                },
            }
        }
        assert!(client.is_complete() && server.is_complete());
        assert!(server.source_name().is_some());
        let info = client.info().unwrap();
        assert_eq!(info.mechanism, Some(&GSS_MECH_KRB5));
        assert!(info.local && info.open);
        let secret = client.wrap(true, b"super secret message").unwrap();
        assert_ne!(&*secret, b"super secret message");
        assert_eq!(&*server.unwrap(&secret).unwrap(), b"super secret message");
    }
}
