//! A safe binding to the Kerberos GSS-API library.
//!
//! The low level modules wrap the library's objects (names, credentials,
//! oids, buffers and security contexts) in owning Rust types that
//! release them on drop. `Simple` sits on top for the common case of a
//! single client or server authenticating to a `service@host`.
//!
//! ```no_run
//! use gssapi::{Simple, CredUsage};
//!
//! # fn main() -> Result<(), gssapi::SimpleError> {
//! let mut client = Simple::new("example.org", Some("host"), None)?;
//! let mut server = Simple::new("example.org", Some("host"), None)?;
//! server.acquire_credentials(CredUsage::Accept)?;
//! let mut tok = client.init_context(None)?;
//! while let Some(t) = tok {
//!     match server.accept_context(&t)? {
//!         None => break,
//!         Some(reply) => tok = client.init_context(Some(&*reply))?,
//!     }
//! }
//! let emsg = client.wrap_message(b"This is a test message", true)?;
//! let msg = server.unwrap_message(&emsg)?;
//! assert_eq!(&*msg, b"This is a test message");
//! # Ok(())
//! # }
//! ```
//!
//! Errors carry the raw major and minor status. Their `Display` asks the
//! library to describe both, which is about as helpful as the library
//! is. With MIT Kerberos, `KRB5_TRACE=/dev/stderr` tells you more.
pub mod context;
pub mod credential;
pub mod error;
pub mod mech;
pub mod name;
pub mod oid;
pub mod simple;
pub mod util;

pub use context::{ClientCtx, CtxFlags, SecurityContext, ServerCtx};
pub use credential::{Cred, CredUsage};
pub use error::Error;
pub use name::Name;
pub use simple::{Simple, SimpleBuilder, SimpleError};
