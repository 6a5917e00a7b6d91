//! POSIX (SFU 3.0) attribute reconciliation.
//!
//! Directory entries optionally carry a secondary Unix identity: uid, numeric
//! uid/gid, shell, home directory and NIS mapping. This module moves an entry
//! between the `Absent` and `Present` states of that attribute set. The
//! attribute deltas are computed by pure planner functions; thin async
//! executors apply them through the mutation executor.
//!
//! UID/GID allocation scans the directory for the current maxima and is not
//! synchronized: two concurrent enables can allocate the same uidNumber.
//! Callers needing stronger guarantees can serialize allocation externally
//! and pass a pre-computed [`UidAllocationSnapshot`] into [`enable`].

use ldap3::Ldap;
use tracing::debug;

use crate::{
	error::Error,
	mutate::{self, text_values, AttributeValues, MutationMode},
	password,
	record::DirectoryRecord,
	search::{self, DEFAULT_PAGE_SIZE},
};

/// The full POSIX attribute set managed by the reconciler.
pub const UNIX_ATTRIBUTES: [&str; 8] = [
	"uid",
	"uidnumber",
	"gidnumber",
	"loginshell",
	"mssfu30name",
	"mssfu30nisdomain",
	"unixhomedirectory",
	"unixuserpassword",
];

/// Attributes kept when disabling, preserving the historical UID mapping.
const RETAINED_ON_DISABLE: [&str; 3] = ["uid", "unixuserpassword", "mssfu30name"];

/// Attributes an update may touch.
const UPDATABLE_ATTRIBUTES: [&str; 3] = ["unixuserpassword", "loginshell", "unixhomedirectory"];

/// Default login shell assigned on enable.
const DEFAULT_SHELL: &str = "/bin/bash";

/// Home directory prefix assigned on enable.
const HOME_PREFIX: &str = "/home/AD/";

/// Current maxima of `uidNumber`/`gidNumber` across the tree. Computed fresh
/// on each allocation request and never cached; the directory may change
/// between calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UidAllocationSnapshot {
	/// The highest `uidNumber` seen, 0 when no entry carries one.
	pub max_uid: i64,
	/// The highest `gidNumber` seen, 0 when no entry carries one.
	pub max_gid: i64,
}

/// Caller-supplied values overriding the enable/update defaults.
#[derive(Debug, Clone, Default)]
pub struct UnixAttributeOverrides {
	/// Login shell, defaults to `/bin/bash`.
	pub loginshell: Option<String>,
	/// SFU name, defaults to the entry's common name.
	pub mssfu30name: Option<String>,
	/// NIS domain, defaults to the configured domain.
	pub mssfu30nisdomain: Option<String>,
	/// Home directory, defaults to `/home/AD/<common name>`.
	pub unixhomedirectory: Option<String>,
	/// Password; crypt-hashed unless already in crypt form. Defaults to a
	/// fixed placeholder secret on enable.
	pub unixuserpassword: Option<String>,
	/// Numeric group ID, defaults to the directory-wide maximum.
	pub gidnumber: Option<i64>,
}

/// Whether the entry's POSIX attribute set is present. The `uid`,
/// `mssfu30name` and `loginshell` attributes together define "Unix-enabled".
#[must_use]
pub fn is_unix_enabled(record: &DirectoryRecord) -> bool {
	record.has("uid") && record.has("mssfu30name") && record.has("loginshell")
}

/// Scan the tree under `base` for the current UID/GID maxima.
///
/// Entries without numeric attributes are skipped; a tree with no POSIX
/// attributes at all yields a zero snapshot.
pub async fn max_ids(ldap: &mut Ldap, base: &str) -> Result<UidAllocationSnapshot, Error> {
	let attrs: Vec<String> =
		["uid", "uidnumber", "gidnumber"].iter().map(|attr| (*attr).to_owned()).collect();
	let records = match search::paged_search(
		ldap,
		base,
		"(objectclass=*)",
		&attrs,
		Some(DEFAULT_PAGE_SIZE),
	)
	.await
	{
		Ok(records) => records,
		Err(failure) if matches!(failure.error, Error::NotFound(_)) => Vec::new(),
		Err(failure) => return Err(failure.error),
	};

	let mut snapshot = UidAllocationSnapshot::default();
	for record in &records {
		if let Some(uid) = record.get_i64("uidnumber") {
			snapshot.max_uid = snapshot.max_uid.max(uid);
		}
		if let Some(gid) = record.get_i64("gidnumber") {
			snapshot.max_gid = snapshot.max_gid.max(gid);
		}
	}
	debug!(max_uid = snapshot.max_uid, max_gid = snapshot.max_gid, "allocation snapshot");
	Ok(snapshot)
}

/// Compute the attributes an enable must add: the full POSIX set with
/// defaults filled in, minus whatever the entry already carries.
pub fn plan_enable(
	record: &DirectoryRecord,
	overrides: &UnixAttributeOverrides,
	snapshot: UidAllocationSnapshot,
	nis_domain: &str,
) -> Result<AttributeValues, Error> {
	let cn = record
		.cn()
		.ok_or_else(|| Error::mutation("entry has no common name"))?;

	let uidnumber = snapshot.max_uid + 1;
	let gidnumber = overrides.gidnumber.unwrap_or(snapshot.max_gid);
	let password = match &overrides.unixuserpassword {
		Some(password) => password::encode_posix_password(password)?,
		None => password::DEFAULT_UNIX_PASSWORD.to_owned(),
	};

	let values = [
		("uid", cn.to_owned()),
		("uidnumber", uidnumber.to_string()),
		("gidnumber", gidnumber.to_string()),
		("loginshell", overrides.loginshell.clone().unwrap_or_else(|| DEFAULT_SHELL.to_owned())),
		("mssfu30name", overrides.mssfu30name.clone().unwrap_or_else(|| cn.to_owned())),
		(
			"mssfu30nisdomain",
			overrides.mssfu30nisdomain.clone().unwrap_or_else(|| nis_domain.to_owned()),
		),
		(
			"unixhomedirectory",
			overrides
				.unixhomedirectory
				.clone()
				.unwrap_or_else(|| format!("{HOME_PREFIX}{cn}")),
		),
		("unixuserpassword", password),
	];

	let mut attrs = AttributeValues::new();
	for (name, value) in values {
		if !record.has(name) {
			attrs.insert(name.to_owned(), text_values([value]));
		}
	}
	Ok(attrs)
}

/// Compute the per-attribute operations of an update: `replace` where the
/// entry has the attribute, `add` where it lacks it. Only attributes the
/// caller supplied are touched; the password is hashed unless already in
/// crypt form.
pub fn plan_update(
	record: &DirectoryRecord,
	overrides: &UnixAttributeOverrides,
) -> Result<Vec<(String, String, MutationMode)>, Error> {
	let mut steps = Vec::new();
	for attr in UPDATABLE_ATTRIBUTES {
		let value = match attr {
			"unixuserpassword" => match &overrides.unixuserpassword {
				Some(password) => password::encode_posix_password(password)?,
				None => continue,
			},
			"loginshell" => match &overrides.loginshell {
				Some(shell) => shell.clone(),
				None => continue,
			},
			_ => match &overrides.unixhomedirectory {
				Some(home) => home.clone(),
				None => continue,
			},
		};
		let mode = if record.has(attr) { MutationMode::Replace } else { MutationMode::Add };
		steps.push((attr.to_owned(), value, mode));
	}
	Ok(steps)
}

/// Compute the attributes a disable must delete: the POSIX set minus the
/// retained attributes, restricted to what the entry carries, with the
/// entry's current values.
#[must_use]
pub fn plan_disable(record: &DirectoryRecord) -> AttributeValues {
	let mut attrs = AttributeValues::new();
	for attr in UNIX_ATTRIBUTES {
		if RETAINED_ON_DISABLE.contains(&attr) {
			continue;
		}
		if let Some(value) = record.get(attr) {
			attrs.insert(attr.to_owned(), text_values(value.values()));
		}
	}
	attrs
}

/// Enable the POSIX attribute set on an entry. A no-op for entries that are
/// already Unix-enabled. A fresh allocation snapshot is taken unless the
/// caller passes one (the hook for externally serialized allocation).
pub async fn enable(
	ldap: &mut Ldap,
	base: &str,
	record: &DirectoryRecord,
	overrides: &UnixAttributeOverrides,
	nis_domain: &str,
	snapshot: Option<UidAllocationSnapshot>,
) -> Result<(), Error> {
	if is_unix_enabled(record) {
		return Ok(());
	}
	let snapshot = match snapshot {
		Some(snapshot) => snapshot,
		None => max_ids(ldap, base).await?,
	};
	let attrs = plan_enable(record, overrides, snapshot, nis_domain)?;
	if attrs.is_empty() {
		return Ok(());
	}
	apply(ldap, record, attrs, MutationMode::Add).await
}

/// Update POSIX attributes on an entry. Entries that are not yet
/// Unix-enabled are enabled instead, with the overrides as initial values.
/// Each attribute is written in its own mutation; a failure surfaces with
/// enough context to retry just the failed step, and earlier successful
/// writes are not rolled back.
pub async fn update(
	ldap: &mut Ldap,
	base: &str,
	record: &DirectoryRecord,
	overrides: &UnixAttributeOverrides,
	nis_domain: &str,
) -> Result<(), Error> {
	if !is_unix_enabled(record) {
		return enable(ldap, base, record, overrides, nis_domain, None).await;
	}
	for (attr, value, mode) in plan_update(record, overrides)? {
		let mut attrs = AttributeValues::new();
		attrs.insert(attr, text_values([value]));
		apply(ldap, record, attrs, mode).await?;
	}
	Ok(())
}

/// Disable the POSIX attribute set on an entry, retaining `uid`,
/// `unixuserpassword` and `mssfu30name`. A no-op for entries that are not
/// Unix-enabled.
pub async fn disable(ldap: &mut Ldap, record: &DirectoryRecord) -> Result<(), Error> {
	if !is_unix_enabled(record) {
		return Ok(());
	}
	let attrs = plan_disable(record);
	if attrs.is_empty() {
		return Ok(());
	}
	apply(ldap, record, attrs, MutationMode::Delete).await
}

/// Reconcile only the `unixuserpassword` attribute.
pub async fn change_password(
	ldap: &mut Ldap,
	base: &str,
	record: &DirectoryRecord,
	new_password: &str,
	nis_domain: &str,
) -> Result<(), Error> {
	let overrides = UnixAttributeOverrides {
		unixuserpassword: Some(new_password.to_owned()),
		..UnixAttributeOverrides::default()
	};
	update(ldap, base, record, &overrides, nis_domain).await
}

/// Apply one mutation to the record's entry, annotating failures with the
/// entry's identity.
async fn apply(
	ldap: &mut Ldap,
	record: &DirectoryRecord,
	attrs: AttributeValues,
	mode: MutationMode,
) -> Result<(), Error> {
	let dn = record
		.dn()
		.ok_or_else(|| annotate(Error::mutation("entry has no distinguished name"), record))?;
	mutate::mutate(ldap, dn, attrs, mode).await.map_err(|err| annotate(err, record))
}

/// Attach `cn - dn` identity to a mutation error.
fn annotate(err: Error, record: &DirectoryRecord) -> Error {
	match err {
		Error::Mutation { message, .. } => Error::Mutation {
			message,
			entity: Some(format!(
				"{} - {}",
				record.cn().unwrap_or("<unknown>"),
				record.dn().unwrap_or("<unknown>")
			)),
		},
		other => other,
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]

	use super::{
		is_unix_enabled, plan_disable, plan_enable, plan_update, UidAllocationSnapshot,
		UnixAttributeOverrides, RETAINED_ON_DISABLE, UNIX_ATTRIBUTES,
	};
	use crate::{
		mutate::MutationMode,
		record::{AttrValue, DirectoryRecord},
	};

	fn plain_record() -> DirectoryRecord {
		let mut record = DirectoryRecord::new();
		record.insert("cn", AttrValue::Scalar("jdoe".to_owned()));
		record.insert(
			"distinguishedname",
			AttrValue::Scalar("CN=jdoe,OU=People,DC=example,DC=com".to_owned()),
		);
		record
	}

	fn unix_record() -> DirectoryRecord {
		let mut record = plain_record();
		for (attr, value) in [
			("uid", "jdoe"),
			("uidnumber", "10010"),
			("gidnumber", "10000"),
			("loginshell", "/bin/zsh"),
			("mssfu30name", "jdoe"),
			("mssfu30nisdomain", "example"),
			("unixhomedirectory", "/home/AD/jdoe"),
			("unixuserpassword", "$1$abcdefgh$ijklmnopqrstuvwxyz012"),
		] {
			record.insert(attr, AttrValue::Scalar(value.to_owned()));
		}
		record
	}

	#[test]
	fn unix_enabled_needs_all_three_markers() {
		assert!(!is_unix_enabled(&plain_record()));
		assert!(is_unix_enabled(&unix_record()));

		let mut partial = plain_record();
		partial.insert("uid", AttrValue::Scalar("jdoe".to_owned()));
		partial.insert("loginshell", AttrValue::Scalar("/bin/bash".to_owned()));
		assert!(!is_unix_enabled(&partial));
	}

	#[test]
	fn enable_allocates_next_uid_and_fills_defaults() {
		let snapshot = UidAllocationSnapshot { max_uid: 10010, max_gid: 10000 };
		let attrs = plan_enable(
			&plain_record(),
			&UnixAttributeOverrides::default(),
			snapshot,
			"example",
		)
		.unwrap();

		let text = |attr: &str| String::from_utf8(attrs[attr][0].clone()).unwrap();
		assert_eq!(text("uidnumber"), "10011");
		assert_eq!(text("gidnumber"), "10000");
		assert_eq!(text("uid"), "jdoe");
		assert_eq!(text("loginshell"), "/bin/bash");
		assert_eq!(text("mssfu30name"), "jdoe");
		assert_eq!(text("mssfu30nisdomain"), "example");
		assert_eq!(text("unixhomedirectory"), "/home/AD/jdoe");
		assert_eq!(attrs.len(), UNIX_ATTRIBUTES.len());
	}

	#[test]
	fn enable_writes_only_missing_attributes() {
		let mut record = plain_record();
		record.insert("uidnumber", AttrValue::Scalar("555".to_owned()));
		record.insert("loginshell", AttrValue::Scalar("/bin/zsh".to_owned()));

		let attrs = plan_enable(
			&record,
			&UnixAttributeOverrides::default(),
			UidAllocationSnapshot::default(),
			"example",
		)
		.unwrap();

		assert!(!attrs.contains_key("uidnumber"));
		assert!(!attrs.contains_key("loginshell"));
		assert!(attrs.contains_key("uid"));
	}

	#[test]
	fn enable_on_present_entry_plans_nothing() {
		let attrs = plan_enable(
			&unix_record(),
			&UnixAttributeOverrides::default(),
			UidAllocationSnapshot { max_uid: 10010, max_gid: 10000 },
			"example",
		)
		.unwrap();
		assert!(attrs.is_empty());
	}

	#[test]
	fn enable_hashes_supplied_password() {
		let overrides = UnixAttributeOverrides {
			unixuserpassword: Some("Secret1".to_owned()),
			..UnixAttributeOverrides::default()
		};
		let attrs = plan_enable(
			&plain_record(),
			&overrides,
			UidAllocationSnapshot::default(),
			"example",
		)
		.unwrap();
		let hashed = String::from_utf8(attrs["unixuserpassword"][0].clone()).unwrap();
		assert!(hashed.starts_with("$1$"));
	}

	#[test]
	fn update_picks_add_or_replace_per_attribute() {
		// Unix-enabled, but without a home directory attribute.
		let mut record = plain_record();
		for (attr, value) in [("uid", "jdoe"), ("loginshell", "/bin/zsh"), ("mssfu30name", "jdoe")]
		{
			record.insert(attr, AttrValue::Scalar(value.to_owned()));
		}

		let overrides = UnixAttributeOverrides {
			loginshell: Some("/bin/bash".to_owned()),
			unixhomedirectory: Some("/home/AD/jdoe".to_owned()),
			..UnixAttributeOverrides::default()
		};
		let steps = plan_update(&record, &overrides).unwrap();

		assert_eq!(steps.len(), 2);
		let find = |attr: &str| steps.iter().find(|(a, _, _)| a == attr).unwrap();
		assert_eq!(find("loginshell").2, MutationMode::Replace);
		assert_eq!(find("unixhomedirectory").2, MutationMode::Add);
	}

	#[test]
	fn update_passes_crypt_hashes_through() {
		let overrides = UnixAttributeOverrides {
			unixuserpassword: Some("$1$salt$hash".to_owned()),
			..UnixAttributeOverrides::default()
		};
		let steps = plan_update(&unix_record(), &overrides).unwrap();
		assert_eq!(steps[0].1, "$1$salt$hash");
	}

	#[test]
	fn disable_retains_the_historical_mapping() {
		let attrs = plan_disable(&unix_record());

		for attr in RETAINED_ON_DISABLE {
			assert!(!attrs.contains_key(attr), "{attr} must be retained");
		}
		for attr in ["uidnumber", "gidnumber", "loginshell", "mssfu30nisdomain", "unixhomedirectory"]
		{
			assert!(attrs.contains_key(attr), "{attr} must be removed");
		}
	}

	#[test]
	fn disable_on_absent_entry_plans_nothing() {
		assert!(plan_disable(&plain_record()).is_empty());
	}
}
