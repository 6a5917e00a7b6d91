//! Canonical directory records and the entry normalization pipeline.
//!
//! Raw search entries arrive as maps of attribute name to value lists. This
//! module folds them into [`DirectoryRecord`] values: attribute names are
//! lowercased, operational and binary attributes are dropped, single-valued
//! attributes are flattened to scalars, Windows timestamps are converted to
//! Unix epoch seconds and group membership is reduced to short names.
//! Normalization is best-effort; a malformed individual value is kept as-is
//! rather than failing the entry.

use std::collections::BTreeMap;

use ldap3::SearchEntry;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::{config::TIME_FORMAT, error::Error};

/// Seconds between the FILETIME epoch (1601-01-01) and the Unix epoch.
pub const FILETIME_UNIX_OFFSET: i64 = 11_644_473_600;

/// FILETIME ticks (100 ns) per second.
const FILETIME_TICKS_PER_SECOND: i64 = 10_000_000;

/// Attributes carrying 64-bit FILETIME values, converted to epoch seconds.
const FILETIME_ATTRIBUTES: [&str; 5] =
	["badpasswordtime", "lastlogon", "pwdlastset", "accountexpires", "lastlogontimestamp"];

/// Case-insensitive prefixes of operational and binary attributes that are
/// never copied into a record: object metadata, Exchange mailbox GUIDs and
/// security descriptors, certificates, logon-hours bitmaps, replication
/// signatures and MSMQ material.
const IGNORED_ATTRIBUTE_PREFIXES: [&str; 10] = [
	"object",
	"msexchmailboxguid",
	"msexchmailboxsecuritydescriptor",
	"count",
	"usercerti",
	"logonhours",
	"userparameters",
	"replicationsignature",
	"msmqsigncertifi",
	"msmqdigests",
];

/// A normalized attribute value. An attribute with exactly one value is
/// stored as a scalar; multi-valued attributes remain lists in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
	/// A single-valued attribute.
	Scalar(String),
	/// A multi-valued attribute, preserving server order.
	List(Vec<String>),
}

impl AttrValue {
	/// The value of a scalar attribute, or the first value of a list.
	#[must_use]
	pub fn first(&self) -> Option<&str> {
		match self {
			AttrValue::Scalar(value) => Some(value),
			AttrValue::List(values) => values.first().map(String::as_str),
		}
	}

	/// Iterate over all values.
	pub fn values(&self) -> impl Iterator<Item = &str> {
		match self {
			AttrValue::Scalar(value) => std::slice::from_ref(value).iter(),
			AttrValue::List(values) => values.iter(),
		}
		.map(String::as_str)
	}
}

/// One directory entry in canonical form: an ordered mapping from lowercase
/// attribute name to scalar-or-list value, plus derived membership.
///
/// Records are independent, caller-owned snapshots; mutating one has no
/// effect on the directory or on other records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryRecord {
	/// Normalized attributes, keyed by lowercase name.
	attrs: BTreeMap<String, AttrValue>,
	/// Short names derived from `member` (falling back to `memberof`); a
	/// relation list only, no ownership of the referenced entries.
	pub members: Vec<String>,
}

impl DirectoryRecord {
	/// Create an empty record.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Look up an attribute by (case-insensitive) name.
	#[must_use]
	pub fn get(&self, attr: &str) -> Option<&AttrValue> {
		self.attrs.get(&attr.to_ascii_lowercase())
	}

	/// The scalar value or first list value of an attribute.
	#[must_use]
	pub fn get_str(&self, attr: &str) -> Option<&str> {
		self.get(attr).and_then(AttrValue::first)
	}

	/// An attribute value parsed as an integer.
	#[must_use]
	pub fn get_i64(&self, attr: &str) -> Option<i64> {
		self.get_str(attr).and_then(|value| value.parse().ok())
	}

	/// Whether the entry carries the attribute at all.
	#[must_use]
	pub fn has(&self, attr: &str) -> bool {
		self.get(attr).is_some()
	}

	/// The entry's common name.
	#[must_use]
	pub fn cn(&self) -> Option<&str> {
		self.get_str("cn")
	}

	/// The entry's distinguished name.
	#[must_use]
	pub fn dn(&self) -> Option<&str> {
		self.get_str("distinguishedname")
	}

	/// The entry's account name.
	#[must_use]
	pub fn account_name(&self) -> Option<&str> {
		self.get_str("samaccountname")
	}

	/// Insert or replace an attribute. The name is lowercased.
	pub fn insert(&mut self, attr: &str, value: AttrValue) {
		self.attrs.insert(attr.to_ascii_lowercase(), value);
	}

	/// Iterate over all attributes in name order.
	pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
		self.attrs.iter().map(|(name, value)| (name.as_str(), value))
	}

	/// Number of attributes on the record.
	#[must_use]
	pub fn len(&self) -> usize {
		self.attrs.len()
	}

	/// Whether the record has no attributes.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.attrs.is_empty()
	}

	/// Return a copy of this record with every string value transcoded from
	/// UTF-8 to `target`. A pure transform: the receiver is left untouched.
	/// Numeric and pure-ASCII values pass through unchanged, as do the
	/// derived members (short names are already ASCII in practice; non-ASCII
	/// ones are transcoded too).
	pub fn transcoded(
		&self,
		transcoder: &dyn Transcoder,
		target: &str,
	) -> Result<DirectoryRecord, Error> {
		if target.eq_ignore_ascii_case("utf-8") {
			return Ok(self.clone());
		}
		let mut out = DirectoryRecord::new();
		for (name, value) in &self.attrs {
			let converted = match value {
				AttrValue::Scalar(v) => AttrValue::Scalar(transcode_value(transcoder, v, target)?),
				AttrValue::List(vs) => {
					let vs: Result<Vec<_>, Error> =
						vs.iter().map(|v| transcode_value(transcoder, v, target)).collect();
					AttrValue::List(vs?)
				}
			};
			out.attrs.insert(name.clone(), converted);
		}
		out.members = self
			.members
			.iter()
			.map(|m| transcode_value(transcoder, m, target))
			.collect::<Result<Vec<_>, _>>()?;
		Ok(out)
	}
}

/// Converts one string during a charset fix-up walk. ASCII-only values never
/// need conversion and are not handed to the codec.
fn transcode_value(
	transcoder: &dyn Transcoder,
	value: &str,
	target: &str,
) -> Result<String, Error> {
	if value.is_ascii() {
		Ok(value.to_owned())
	} else {
		transcoder.transcode(value, "utf-8", target)
	}
}

/// A generic text codec, supplied by the caller. The engine itself only ever
/// asks for conversions from UTF-8 (the wire charset) to the configured
/// output charset and back.
pub trait Transcoder {
	/// Convert `value` from charset `from` to charset `to`.
	fn transcode(&self, value: &str, from: &str, to: &str) -> Result<String, Error>;
}

/// The identity codec, used when the configured charset is UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Passthrough;

impl Transcoder for Utf8Passthrough {
	fn transcode(&self, value: &str, _from: &str, _to: &str) -> Result<String, Error> {
		Ok(value.to_owned())
	}
}

/// Convert a FILETIME value (100 ns ticks since 1601) to Unix epoch seconds.
#[must_use]
pub fn filetime_to_unix(filetime: i64) -> i64 {
	filetime / FILETIME_TICKS_PER_SECOND - FILETIME_UNIX_OFFSET
}

/// Convert Unix epoch seconds to a FILETIME value.
#[must_use]
pub fn unix_to_filetime(unix: i64) -> i64 {
	(unix + FILETIME_UNIX_OFFSET) * FILETIME_TICKS_PER_SECOND
}

/// Render Unix epoch seconds as a generalized-time string (`YYYYMMDDHHMMSS.0Z`).
#[must_use]
pub fn unix_to_generalized(unix: i64) -> Option<String> {
	let formatted =
		OffsetDateTime::from_unix_timestamp(unix).ok()?.format(&TIME_FORMAT).ok()?;
	Some(format!("{formatted}.0Z"))
}

/// Parse a generalized-time value ending in `0Z` into Unix epoch seconds.
/// Returns `None` for values that merely resemble one.
#[must_use]
pub fn generalized_to_unix(value: &str) -> Option<i64> {
	if !value.ends_with("0Z") {
		return None;
	}
	let digits = value.get(..14)?;
	let parsed = PrimitiveDateTime::parse(digits, &TIME_FORMAT).ok()?;
	Some(parsed.assume_utc().unix_timestamp())
}

/// Whether an attribute name matches the operational/binary ignore set.
fn is_ignored(attr: &str) -> bool {
	IGNORED_ATTRIBUTE_PREFIXES
		.iter()
		.any(|prefix| attr.get(..prefix.len()).is_some_and(|head| head.eq_ignore_ascii_case(prefix)))
}

/// Derive a short name from a member DN by dropping the `CN=` prefix and any
/// trailing RDNs.
fn member_short_name(dn: &str) -> String {
	let head = dn.split(',').next().unwrap_or(dn).trim();
	if head.get(..3).is_some_and(|prefix| prefix.eq_ignore_ascii_case("cn=")) {
		head[3..].to_owned()
	} else {
		head.to_owned()
	}
}

/// Normalize a single raw search entry into a [`DirectoryRecord`].
#[must_use]
pub fn normalize_entry(entry: SearchEntry) -> DirectoryRecord {
	let mut record = DirectoryRecord::new();

	for (name, values) in entry.attrs {
		let name = name.to_ascii_lowercase();
		if is_ignored(&name) {
			continue;
		}
		let value = match <[String; 1]>::try_from(values) {
			Ok([single]) => match generalized_to_unix(&single) {
				Some(unix) => AttrValue::Scalar(unix.to_string()),
				None => AttrValue::Scalar(single),
			},
			Err(values) => AttrValue::List(values),
		};
		record.attrs.insert(name, value);
	}

	// Binary values the server did not deliver as strings; anything useful
	// here is text in a non-UTF-8 charset, kept lossily.
	for (name, values) in entry.bin_attrs {
		let name = name.to_ascii_lowercase();
		if is_ignored(&name) || record.attrs.contains_key(&name) {
			continue;
		}
		let mut values: Vec<String> =
			values.iter().map(|v| String::from_utf8_lossy(v).into_owned()).collect();
		let value = if values.len() == 1 {
			AttrValue::Scalar(values.remove(0))
		} else {
			AttrValue::List(values)
		};
		record.attrs.insert(name, value);
	}

	for attr in FILETIME_ATTRIBUTES {
		if let Some(filetime) = record.get_i64(attr) {
			record.insert(attr, AttrValue::Scalar(filetime_to_unix(filetime).to_string()));
		}
	}

	if record.dn().is_none() && !entry.dn.is_empty() {
		record.insert("distinguishedname", AttrValue::Scalar(entry.dn));
	}

	let membership = record.get("member").or_else(|| record.get("memberof"));
	if let Some(membership) = membership {
		record.members = membership.values().map(member_short_name).collect();
	}

	record
}

/// Normalize a raw result batch, appending records to `out`.
pub fn normalize_batch(entries: Vec<SearchEntry>, out: &mut Vec<DirectoryRecord>) {
	out.extend(entries.into_iter().map(normalize_entry));
}
