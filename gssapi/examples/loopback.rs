/*
Negotiate a security context between a client and a server in the same
process, then send an encrypted message from one to the other. You
need a working kerberos environment to run this,

* a valid krb5.conf and a KDC for your realm
* a service principal for the server e.g. host/server.example.com@EXAMPLE.COM
* a keytab holding that principal's key, readable by you, either passed
  as the second argument or named by KRB5_KTNAME=FILE:/path/to/keytab
* a TGT from your KDC (run kinit if klist shows nothing)

RUST_LOG=gssapi=debug cargo run --example loopback server.example.com /path/to/krb5.keytab

When MIT Kerberos doesn't say enough, KRB5_TRACE=/dev/stderr will.
*/
use gssapi::{CredUsage, Simple, SimpleError};
use std::{env::args, path::Path};
use tracing_subscriber::EnvFilter;

fn run(host: &str, keytab: Option<&Path>) -> Result<(), SimpleError> {
    let mut server = Simple::new(host, Some("host"), keytab)?;
    server.acquire_credentials(CredUsage::Accept)?;
    println!("acquired server credentials for {}", server.service());
    let mut client = Simple::new(host, Some("host"), None)?;
    let mut tok = client.init_context(None)?;
    while let Some(t) = tok {
        match server.accept_context(&t)? {
            None => break,
            Some(reply) => tok = client.init_context(Some(&*reply))?,
        }
    }
    println!("security context initialized successfully");
    println!("client ctx info: {:#?}", client.context_info()?);
    println!("server ctx info: {:#?}", server.context_info()?);
    if let Some(who) = server.source_name() {
        println!("the client authenticated as {}", who);
    }
    let emsg = client.wrap_message(b"super secret message", true)?;
    let msg = server.unwrap_message(&emsg)?;
    println!("the decrypted message is: '{}'", String::from_utf8_lossy(&msg));
    Ok(())
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = args().collect::<Vec<_>>();
    if args.len() < 2 || args.len() > 3 {
        println!("usage: {} <host> [keytab]", args[0]);
    } else if let Err(e) = run(&args[1], args.get(2).map(Path::new)) {
        println!("{}", e);
    }
}
