//! Config for the directory client.
use std::{path::PathBuf, sync::Arc, time::Duration};

use ldap3::LdapConnSettings;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// Format used for parsing and serializing generalized time values, minus the
/// fractional suffix. Configured according to the syntax definition
/// `( 1.3.6.1.4.1.1466.115.121.1.24 DESC 'Generalized Time' )` described in
/// RFC4517 section 3.1.13. Active Directory appends `.0Z` to these values.
pub const TIME_FORMAT: &[time::format_description::FormatItem] =
	time::macros::format_description!("[year][month][day][hour][minute][second]");

/// Attributes requested by the default extended search. Mirrors the canonical
/// record fields: identity, organizational data, membership, POSIX attributes
/// and the lock/timestamp bookkeeping attributes.
pub const DEFAULT_ATTRIBUTES: [&str; 29] = [
	"cn",
	"sn",
	"givenname",
	"displayname",
	"distinguishedname",
	"department",
	"title",
	"description",
	"company",
	"mail",
	"ipphone",
	"mobile",
	"memberof",
	"member",
	"mssfu30name",
	"uidnumber",
	"gidnumber",
	"unixhomedirectory",
	"loginshell",
	"whencreated",
	"whenchanged",
	"lastlogontimestamp",
	"lastlogon",
	"pwdlastset",
	"badpasswordtime",
	"accountexpires",
	"lockouttime",
	"useraccountcontrol",
	"samaccountname",
];

/// Directory configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
	/// The URL to connect to the server with. Supports ldap and ldaps schemes.
	pub url: Url,
	/// Connection settings.
	pub connection: ConnectionConfig,
	/// The search base DN of the managed tree,
	/// e.g. `ou=People,dc=example,dc=com`.
	pub base: String,
	/// The Active Directory domain name. When set, bind DNs take the
	/// `account@domain` form and the domain doubles as the default NIS domain
	/// for POSIX attributes.
	pub domain: Option<String>,
	/// Target charset for returned attribute values. Values are handed to the
	/// configured [`Transcoder`](crate::record::Transcoder) when this differs
	/// from UTF-8.
	#[serde(default = "default_charset")]
	pub charset: String,
	/// If set, enables the [simple paged search control] and sets the page
	/// size to the given value. When unset a single request is issued, capped
	/// at the server's own result limit (conventionally 1000 entries).
	///
	/// [simple paged search control]: https://www.rfc-editor.org/rfc/rfc2696.html
	#[serde(default)]
	pub page_size: Option<i32>,
}

/// The charset directory servers speak on the wire.
fn default_charset() -> String {
	"utf-8".to_owned()
}

impl Config {
	/// The DN used to bind the given account: `account@domain` when a domain
	/// is configured, `cn=account,base` otherwise.
	#[must_use]
	pub fn bind_dn(&self, account: &str) -> String {
		match &self.domain {
			Some(domain) => format!("{account}@{domain}"),
			None => format!("cn={account},{}", self.base),
		}
	}

	/// The attribute list for the default extended search.
	#[must_use]
	pub fn default_attributes() -> Vec<String> {
		DEFAULT_ATTRIBUTES.iter().map(|attr| (*attr).to_owned()).collect()
	}
}

/// Configuration for how to connect to the directory server
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
	/// Timeout to establish a connection in seconds.
	pub timeout: u64,

	/// TLS config
	pub tls: TlsConfig,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		ConnectionConfig { timeout: 5, tls: TlsConfig::default() }
	}
}

/// TLS Configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TlsConfig {
	/// Use StartTLS extended operation for establishing a secure connection,
	/// rather than TLS on a dedicated port.
	pub starttls: bool,

	/// Disable verification of TLS certificates
	pub no_tls_verify: bool,

	/// TLS root certificates path
	pub root_certificates_path: Option<PathBuf>,
}

impl ConnectionConfig {
	/// Create a [`LdapConnSettings`] based on this [`ConnectionConfig`]
	pub(crate) async fn to_settings(&self) -> Result<LdapConnSettings, Error> {
		let mut settings = LdapConnSettings::new();

		settings = settings.set_conn_timeout(Duration::from_secs(self.timeout));
		settings = settings.set_starttls(self.tls.starttls);
		settings = settings.set_no_tls_verify(self.tls.no_tls_verify);

		if let Some(path) = &self.tls.root_certificates_path {
			let pem = tokio::fs::read(path).await?;
			let mut roots = rustls::RootCertStore::empty();
			for der in rustls_pemfile::certs(&mut pem.as_slice())? {
				roots.add(&rustls::Certificate(der)).map_err(|_| {
					Error::Invalid("Could not read root certificate".to_owned())
				})?;
			}
			let config = rustls::ClientConfig::builder()
				.with_safe_defaults()
				.with_root_certificates(roots)
				.with_no_client_auth();
			settings = settings.set_config(Arc::new(config));
		}
		Ok(settings)
	}
}
