//! Query, normalize and manage identity records in an Active Directory tree.
//!
//! The library connects to one directory server over LDAP or LDAPS and
//! provides four building blocks on top of that connection: a paginated
//! search engine, a pipeline that reshapes raw search entries into canonical
//! [`DirectoryRecord`] values, a reconciler for the secondary POSIX (SFU 3.0)
//! attribute set, and the password encodings the directory requires for
//! credential changes.
//!
//! For a general primer on LDAP, the [introduction] in the `ldap3` crate
//! which is used here for interfacing with the server is an excellent
//! resource.
//!
//! [introduction]: https://github.com/inejge/ldap3/blob/master/LDAP-primer.md
//!
//! # Getting started
//! A minimal example of querying an account might look like so:
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use url::Url;
//! use ad_identity::{account, Config, ConnectionConfig, Directory};
//!
//! // Configuration can also be deserialized with serde. It's hand-constructed
//! // here for demonstration purposes.
//! let config = Config {
//!     url: Url::parse("ldaps://ad.example.com")?,
//!     connection: ConnectionConfig::default(),
//!     base: "ou=People,dc=example,dc=com".to_owned(),
//!     domain: Some("example.com".to_owned()),
//!     charset: "utf-8".to_owned(),
//!     page_size: Some(1000),
//! };
//!
//! let mut directory = Directory::connect(config).await?;
//! directory.bind("admin", "verysecret").await?;
//!
//! let user = directory.user("jdoe").await?;
//! println!("{} locked: {}", user.cn().unwrap_or("?"), account::is_locked(&user));
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//! * UID/GID allocation reads the current maxima and writes without any
//!   locking; concurrent enables can allocate the same uidNumber. Callers
//!   can serialize allocation externally and pass a snapshot into
//!   [`unix::enable`].
//! * The directory password encoding only represents characters that fit a
//!   single byte (see [`password::encode_directory_password`]).
//! * A connection is a single-writer resource; no operation on a
//!   [`Directory`] may run concurrently with another on the same instance.
//! * No automatic retries anywhere; any failed operation is terminal and
//!   retrying is the caller's decision.

pub mod account;
pub mod config;
pub mod error;
pub mod ldap;
pub mod mutate;
pub mod password;
pub mod record;
pub mod search;
pub mod unix;

pub use ldap3::{self, SearchEntry};

pub use crate::{
	config::{Config, ConnectionConfig, TlsConfig},
	error::Error,
	ldap::Directory,
	mutate::{AttributeValues, MutationMode},
	record::{AttrValue, DirectoryRecord, Transcoder, Utf8Passthrough},
	search::SearchFailure,
	unix::{UidAllocationSnapshot, UnixAttributeOverrides},
};
