//! Client for connecting to the directory and running high-level operations.

use ldap3::LdapConnAsync;
use tracing::warn;

use crate::{
	config::Config,
	error::Error,
	mutate::{self, AttributeValues, MutationMode},
	password,
	record::{DirectoryRecord, Transcoder, Utf8Passthrough},
	search::{self, SearchFailure},
	unix::{self, UidAllocationSnapshot, UnixAttributeOverrides},
};

/// Holds data and provides the interface for interactions with a directory
/// server.
///
/// One instance owns one logical connection. All operations are sequential
/// request/response against that connection; concurrent use of a single
/// instance must be serialized by the caller.
pub struct Directory {
	/// The configuration of the directory client.
	config: Config,
	/// The bound protocol handle.
	ldap: ldap3::Ldap,
	/// Codec used for charset fix-ups when the configured charset is not
	/// UTF-8.
	transcoder: Box<dyn Transcoder + Send + Sync>,
}

impl std::fmt::Debug for Directory {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Directory").field("config", &self.config).finish_non_exhaustive()
	}
}

impl Directory {
	/// Create a connection to a directory server based on the settings and
	/// url specified in the configuration. The connection is driven by a
	/// spawned background task.
	pub async fn connect(config: Config) -> Result<Self, Error> {
		let settings = config.connection.to_settings().await?;
		let (conn, ldap) = LdapConnAsync::from_url_with_settings(settings, &config.url)
			.await
			.map_err(|err| Error::Connection(err.to_string()))?;
		tokio::spawn(async move {
			if let Err(err) = conn.drive().await {
				warn!("directory connection error: {err}");
			}
		});
		Ok(Directory { config, ldap, transcoder: Box::new(Utf8Passthrough) })
	}

	/// Replace the charset codec. Only consulted when the configured charset
	/// differs from UTF-8.
	#[must_use]
	pub fn with_transcoder(mut self, transcoder: Box<dyn Transcoder + Send + Sync>) -> Self {
		self.transcoder = transcoder;
		self
	}

	/// Bind as `account` and return the account's own directory record.
	pub async fn bind(&mut self, account: &str, password: &str) -> Result<DirectoryRecord, Error> {
		let bind_dn = self.config.bind_dn(account);
		self.ldap
			.simple_bind(&bind_dn, password)
			.await
			.and_then(ldap3::LdapResult::success)
			.map_err(|err| Error::Connection(err.to_string()))?;
		self.user(account).await
	}

	/// Search below the configured base with the default canonical attribute
	/// set. Partial results from a failed multi-page search are surfaced in
	/// the failure.
	pub async fn search(&mut self, filter: &str) -> Result<Vec<DirectoryRecord>, SearchFailure> {
		self.search_with_attributes(filter, &Config::default_attributes()).await
	}

	/// Search below the configured base, requesting all attributes.
	pub async fn search_full(
		&mut self,
		filter: &str,
	) -> Result<Vec<DirectoryRecord>, SearchFailure> {
		self.search_with_attributes(filter, &["*".to_owned()]).await
	}

	/// Search below the configured base with an explicit attribute list.
	/// The filter is transcoded to UTF-8 before transmission and records are
	/// converted to the configured output charset.
	pub async fn search_with_attributes(
		&mut self,
		filter: &str,
		attrs: &[String],
	) -> Result<Vec<DirectoryRecord>, SearchFailure> {
		let filter = self
			.outbound_filter(filter)
			.map_err(|error| SearchFailure { error, partial: Vec::new() })?;
		let records = search::paged_search(
			&mut self.ldap,
			&self.config.base,
			&filter,
			attrs,
			self.config.page_size,
		)
		.await?;
		fix_charset(records, self.transcoder.as_ref(), &self.config.charset)
	}

	/// The record of a single account, found by `samaccountname` with the
	/// default canonical attribute set.
	pub async fn user(&mut self, account: &str) -> Result<DirectoryRecord, Error> {
		let filter = format!("(samaccountname={account})");
		let records = self
			.search_with_attributes(&filter, &Config::default_attributes())
			.await
			.map_err(Error::from)?;
		search::one_of(records).ok_or(Error::NotFound(filter))
	}

	/// Like [`Directory::user`], but returning all attributes.
	pub async fn user_full(&mut self, account: &str) -> Result<DirectoryRecord, Error> {
		let filter = format!("(samaccountname={account})");
		let records = self.search_full(&filter).await.map_err(Error::from)?;
		search::one_of(records).ok_or(Error::NotFound(filter))
	}

	/// All user account common names below the base, sorted.
	pub async fn userlist(&mut self) -> Result<Vec<String>, Error> {
		self.name_list("(&(objectCategory=person)(objectClass=user))").await
	}

	/// All group common names below the base, sorted.
	pub async fn grouplist(&mut self) -> Result<Vec<String>, Error> {
		self.name_list("(objectCategory=group)").await
	}

	/// Sorted common names of all entries matching `filter`.
	async fn name_list(&mut self, filter: &str) -> Result<Vec<String>, Error> {
		let records = self.search(filter).await.map_err(Error::from)?;
		let mut names: Vec<String> =
			records.iter().filter_map(DirectoryRecord::cn).map(str::to_owned).collect();
		names.sort();
		Ok(names)
	}

	/// The current UID/GID allocation maxima below the base.
	pub async fn max_ids(&mut self) -> Result<UidAllocationSnapshot, Error> {
		unix::max_ids(&mut self.ldap, &self.config.base).await
	}

	/// Change an account's directory password, and, for Unix-enabled
	/// entries, its POSIX password as well. Requires a TLS connection; the
	/// server rejects password mutations in the clear.
	pub async fn change_password(
		&mut self,
		account: &str,
		new_password: &str,
	) -> Result<(), Error> {
		let record = self.user(account).await?;
		self.change_password_for(&record, new_password).await
	}

	/// Like [`Directory::change_password`], for an already fetched record.
	pub async fn change_password_for(
		&mut self,
		record: &DirectoryRecord,
		new_password: &str,
	) -> Result<(), Error> {
		let encoded = password::encode_directory_password(new_password)?;
		let dn = record.dn().ok_or_else(|| Error::Mutation {
			message: "entry has no distinguished name".to_owned(),
			entity: record.cn().map(str::to_owned),
		})?;
		let mut attrs = AttributeValues::new();
		attrs.insert(password::PASSWORD_ATTRIBUTE.to_owned(), vec![encoded]);
		mutate::mutate(&mut self.ldap, dn, attrs, MutationMode::Replace).await?;

		if unix::is_unix_enabled(record) {
			self.change_unix_password_for(record, new_password).await?;
		}
		Ok(())
	}

	/// Enable the POSIX attribute set on an entry. Passing a pre-computed
	/// snapshot skips the allocation scan (see [`crate::unix`] on
	/// serializing allocation).
	pub async fn enable_unix_attributes(
		&mut self,
		record: &DirectoryRecord,
		overrides: &UnixAttributeOverrides,
		snapshot: Option<UidAllocationSnapshot>,
	) -> Result<(), Error> {
		let base = self.config.base.clone();
		let domain = self.nis_domain();
		unix::enable(&mut self.ldap, &base, record, overrides, &domain, snapshot).await
	}

	/// Update POSIX attributes on an entry, enabling them first when absent.
	pub async fn update_unix_attributes(
		&mut self,
		record: &DirectoryRecord,
		overrides: &UnixAttributeOverrides,
	) -> Result<(), Error> {
		let base = self.config.base.clone();
		let domain = self.nis_domain();
		unix::update(&mut self.ldap, &base, record, overrides, &domain).await
	}

	/// Disable the POSIX attribute set on an entry.
	pub async fn disable_unix_attributes(
		&mut self,
		record: &DirectoryRecord,
	) -> Result<(), Error> {
		unix::disable(&mut self.ldap, record).await
	}

	/// Change only the POSIX password of a Unix-enabled entry.
	pub async fn change_unix_password_for(
		&mut self,
		record: &DirectoryRecord,
		new_password: &str,
	) -> Result<(), Error> {
		let base = self.config.base.clone();
		let domain = self.nis_domain();
		unix::change_password(&mut self.ldap, &base, record, new_password, &domain).await
	}

	/// Apply a validated attribute mutation to an arbitrary entry.
	pub async fn mutate(
		&mut self,
		dn: &str,
		attrs: AttributeValues,
		mode: MutationMode,
	) -> Result<(), Error> {
		mutate::mutate(&mut self.ldap, dn, attrs, mode).await
	}

	/// Unbind and drop the connection.
	pub async fn close(mut self) -> Result<(), Error> {
		self.ldap.unbind().await?;
		Ok(())
	}

	/// The NIS domain used for POSIX attributes.
	fn nis_domain(&self) -> String {
		self.config.domain.clone().unwrap_or_default()
	}

	/// Transcode an outbound filter to the wire charset when the configured
	/// charset differs from UTF-8.
	fn outbound_filter(&self, filter: &str) -> Result<String, Error> {
		if self.config.charset.eq_ignore_ascii_case("utf-8") || filter.is_ascii() {
			Ok(filter.to_owned())
		} else {
			self.transcoder.transcode(filter, &self.config.charset, "utf-8")
		}
	}

}

/// Convert records to the target output charset. When the codec fails, the
/// untranscoded records are surfaced as the partial result set rather than
/// discarded.
fn fix_charset(
	records: Vec<DirectoryRecord>,
	transcoder: &dyn Transcoder,
	charset: &str,
) -> Result<Vec<DirectoryRecord>, SearchFailure> {
	if charset.eq_ignore_ascii_case("utf-8") {
		return Ok(records);
	}
	let converted: Result<Vec<_>, Error> =
		records.iter().map(|record| record.transcoded(transcoder, charset)).collect();
	converted.map_err(|error| SearchFailure { error, partial: records })
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]

	use super::fix_charset;
	use crate::{
		error::Error,
		record::{AttrValue, DirectoryRecord, Transcoder, Utf8Passthrough},
	};

	struct Broken;
	impl Transcoder for Broken {
		fn transcode(&self, _: &str, _: &str, _: &str) -> Result<String, Error> {
			Err(Error::Invalid("unsupported charset".to_owned()))
		}
	}

	fn accented() -> Vec<DirectoryRecord> {
		let mut record = DirectoryRecord::new();
		record.insert("cn", AttrValue::Scalar("Jörg".to_owned()));
		vec![record]
	}

	#[test]
	fn utf8_charset_passes_records_through() {
		let records = accented();
		let converted = fix_charset(records.clone(), &Broken, "utf-8").unwrap();
		assert_eq!(converted, records, "no codec involved for UTF-8");
	}

	#[test]
	fn codec_failure_keeps_the_collected_records() {
		let records = accented();
		let failure = fix_charset(records.clone(), &Broken, "cp1251").unwrap_err();
		assert!(matches!(failure.error, Error::Invalid(_)));
		assert_eq!(failure.partial, records, "untranscoded records survive the failure");
	}

	#[test]
	fn identity_codec_converts_cleanly() {
		let converted = fix_charset(accented(), &Utf8Passthrough, "cp1251").unwrap();
		assert_eq!(converted[0].cn(), Some("Jörg"));
	}
}
