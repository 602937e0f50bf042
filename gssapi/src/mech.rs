//! Mechanism specific helpers
use crate::{
    context::{ClientCtx, CtxFlags},
    error::Error,
    name::Name,
    oid::{GSS_MECH_KRB5, GSS_NT_HOSTBASED_SERVICE},
    util::Buf,
};

fn host_service(fqdn: &str) -> String {
    format!("host@{}", fqdn)
}

/// A Kerberos 5 initiator for the `host` service on `fqdn`. Construction
/// runs the first step, so the token for the server is ready as soon as
/// `new` returns.
#[derive(Debug)]
pub struct Krb5Client {
    host_name: String,
    ctx: ClientCtx,
    token: Option<Buf>,
}

impl Krb5Client {
    pub fn new(fqdn: &str) -> Result<Krb5Client, Error> {
        let host_name = host_service(fqdn);
        let target = Name::new(host_name.as_bytes(), Some(&GSS_NT_HOSTBASED_SERVICE))?;
        let mut ctx = ClientCtx::new(
            None,
            target,
            CtxFlags::GSS_C_MUTUAL_FLAG | CtxFlags::GSS_C_SEQUENCE_FLAG,
            Some(&GSS_MECH_KRB5),
        );
        let token = ctx.step(None)?;
        tracing::debug!(%host_name, token_len = token.as_ref().map(|t| t.len()), "krb5 client started");
        Ok(Krb5Client { host_name, ctx, token })
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// The most recent token to send to the server
    pub fn token(&self) -> Option<&[u8]> {
        self.token.as_deref()
    }

    pub fn take_token(&mut self) -> Option<Buf> {
        self.token.take()
    }

    /// Feed the server's reply. The next token, if any, is both returned
    /// and kept for `token`.
    pub fn step(&mut self, server_token: &[u8]) -> Result<Option<&[u8]>, Error> {
        self.token = self.ctx.step(Some(server_token))?;
        Ok(self.token.as_deref())
    }

    pub fn context(&self) -> &ClientCtx {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut ClientCtx {
        &mut self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SecurityContext;
    use serial_test::serial;
    use std::env;

    #[test]
    fn targets_the_host_service() {
        assert_eq!(host_service("kdc.example.org"), "host@kdc.example.org");
    }

    #[test]
    #[serial]
    fn first_step_failure_is_returned() {
        let saved = env::var_os("KRB5CCNAME");
        env::set_var("KRB5CCNAME", "FILE:/nonexistent/krb5cc_gssapi_test");
        let r = Krb5Client::new("nonexistent.invalid");
        match saved {
            Some(v) => env::set_var("KRB5CCNAME", v),
            None => env::remove_var("KRB5CCNAME"),
        }
        let e = r.unwrap_err();
        assert!(e.routine_error().is_some(), "{:?}", e);
        assert!(e.to_string().starts_with("gssapi major error"), "{}", e);
    }

    #[test]
    #[serial]
    #[ignore = "needs a kerberos TGT and a host principal for localhost"]
    fn produces_an_initial_token() {
        let client = Krb5Client::new("localhost").unwrap();
        assert_eq!(client.host_name(), "host@localhost");
        assert!(client.token().map_or(false, |t| !t.is_empty()));
        assert!(!client.context().is_complete());
    }
}
