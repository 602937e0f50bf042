/*
The server half of the gss_client exchange. It reads base64 tokens from
stdin, one per line, and prints its replies. Once the context is
established the next line is an encrypted message, which it decrypts.
The keytab is optional, but probably required if not running as root.

cargo run --example gss_server example.org host /path/to/krb5.keytab
*/
use base64::{engine::general_purpose::STANDARD, Engine as _};
use gssapi::{CredUsage, Simple};
use std::{env::args, error::Error, io, path::Path};
use tracing_subscriber::EnvFilter;

fn read_token(lines: &mut io::Lines<io::StdinLock<'_>>) -> Result<Vec<u8>, Box<dyn Error>> {
    let line = lines.next().ok_or("unexpected end of input")??;
    Ok(STANDARD.decode(line.trim())?)
}

fn run(host: &str, service: Option<&str>, keytab: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let mut srv = Simple::new(host, service, keytab)?;
    srv.acquire_credentials(CredUsage::Accept)?;
    let mut lines = io::stdin().lines();
    while !srv.is_established() {
        let tok = read_token(&mut lines)?;
        if let Some(otok) = srv.accept_context(&tok)? {
            println!("{}", STANDARD.encode(&*otok));
        }
    }
    match srv.source_name() {
        Some(who) => eprintln!("accepted context from {}", who),
        None => eprintln!("accepted context"),
    }
    let emsg = read_token(&mut lines)?;
    let msg = srv.unwrap_message(&emsg)?;
    println!("{}", String::from_utf8_lossy(&msg));
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();
    let args = args().collect::<Vec<_>>();
    if args.len() < 2 || args.len() > 4 {
        eprintln!("usage: {} <host> [service] [keytab]", args[0]);
    } else {
        let service = args.get(2).map(|s| s.as_str());
        let keytab = args.get(3).map(Path::new);
        if let Err(e) = run(&args[1], service, keytab) {
            eprintln!("{}", e);
        }
    }
}
