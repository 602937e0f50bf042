/*
The client half of a token exchange over stdin/stdout. Tokens are
base64 encoded, one per line. Run it next to gss_server, copying each
line printed by one into the other,

cargo run --example gss_client example.org host

The client prints its initial token, reads the server's reply until the
context is established, then prints an encrypted test message.
*/
use base64::{engine::general_purpose::STANDARD, Engine as _};
use gssapi::Simple;
use std::{env::args, error::Error, io};
use tracing_subscriber::EnvFilter;

fn read_token(lines: &mut io::Lines<io::StdinLock<'_>>) -> Result<Vec<u8>, Box<dyn Error>> {
    let line = lines.next().ok_or("unexpected end of input")??;
    Ok(STANDARD.decode(line.trim())?)
}

fn run(host: &str, service: Option<&str>) -> Result<(), Box<dyn Error>> {
    let mut cli = Simple::new(host, service, None)?;
    let mut lines = io::stdin().lines();
    let mut reply: Option<Vec<u8>> = None;
    loop {
        match cli.init_context(reply.as_deref())? {
            None => break,
            Some(tok) => {
                println!("{}", STANDARD.encode(&*tok));
                if cli.is_established() {
                    break;
                }
                reply = Some(read_token(&mut lines)?);
            }
        }
    }
    eprintln!("established context with {}", cli.service());
    let emsg = cli.wrap_message(b"This is a test message", true)?;
    println!("{}", STANDARD.encode(&*emsg));
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();
    let args = args().collect::<Vec<_>>();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("usage: {} <host> [service]", args[0]);
    } else if let Err(e) = run(&args[1], args.get(2).map(|s| s.as_str())) {
        eprintln!("{}", e);
    }
}
