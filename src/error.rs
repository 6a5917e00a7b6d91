//! Error types for directory operations

/// Errors that can occur when using this library
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// Establishing the transport or binding to the directory failed.
	#[error("connection failed: {0}")]
	Connection(String),
	/// The server rejected a search request.
	#[error("search failed: {0}")]
	Search(String),
	/// A search completed without protocol errors but matched nothing.
	#[error("`{0}` matched no entries")]
	NotFound(String),
	/// An attribute mutation was invalid or was rejected by the server.
	#[error("mutation failed: {message}{}", .entity.as_deref().map(|e| format!(" ({e})")).unwrap_or_default())]
	Mutation {
		/// The validation or protocol error text.
		message: String,
		/// Identity of the target entry (`cn - dn`), when known.
		entity: Option<String>,
	},
	/// A password could not be encoded into a directory wire format.
	#[error("password encoding failed: {0}")]
	Encoding(String),
	/// Malformed configuration or data.
	#[error("invalid: {0}")]
	Invalid(String),
	/// An I/O error occurred, e.g. while reading TLS certificates.
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// An underlying protocol error or similar occurred, or the LDAP library
	/// was used incorrectly.
	#[error(transparent)]
	Ldap(#[from] ldap3::LdapError),
}

impl Error {
	/// Shorthand for an [`Error::Mutation`] without entry identity.
	pub(crate) fn mutation(message: impl Into<String>) -> Self {
		Error::Mutation { message: message.into(), entity: None }
	}
}
