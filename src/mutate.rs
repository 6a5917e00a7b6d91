//! Validated attribute mutations against a single entry.

use std::{
	collections::{BTreeMap, HashSet},
	str::FromStr,
};

use ldap3::{Ldap, Mod};
use tracing::debug;

use crate::error::Error;

/// How a set of attributes is applied to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMode {
	/// Add the given values to the attributes.
	Add,
	/// Replace the attributes with the given values.
	Replace,
	/// Delete the given values, or whole attributes when no values are given.
	Delete,
}

impl FromStr for MutationMode {
	type Err = Error;

	/// Parses `add`, `replace` and `del`, case-insensitively. Anything else
	/// is rejected without touching the network.
	fn from_str(mode: &str) -> Result<Self, Error> {
		match mode.to_ascii_lowercase().as_str() {
			"add" => Ok(MutationMode::Add),
			"replace" => Ok(MutationMode::Replace),
			"del" => Ok(MutationMode::Delete),
			other => Err(Error::mutation(format!("invalid mode `{other}`"))),
		}
	}
}

/// Attribute values for one mutation, keyed by attribute name. Values are
/// raw bytes so that binary attributes such as `unicodePwd` can be written;
/// an empty value list deletes the whole attribute in [`MutationMode::Delete`].
pub type AttributeValues = BTreeMap<String, Vec<Vec<u8>>>;

/// Shorthand for a text-valued [`AttributeValues`] entry.
#[must_use]
pub fn text_values<I, S>(values: I) -> Vec<Vec<u8>>
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
{
	values.into_iter().map(|value| value.into().into_bytes()).collect()
}

/// Validate a mutation and turn it into protocol modifications. Rejects
/// empty attribute sets before any network call.
fn build_mods(attrs: AttributeValues, mode: MutationMode) -> Result<Vec<Mod<Vec<u8>>>, Error> {
	if attrs.is_empty() {
		return Err(Error::mutation("empty attribute set"));
	}
	Ok(attrs
		.into_iter()
		.map(|(name, values)| {
			let name = name.into_bytes();
			let values: HashSet<Vec<u8>> = values.into_iter().collect();
			match mode {
				MutationMode::Add => Mod::Add(name, values),
				MutationMode::Replace => Mod::Replace(name, values),
				MutationMode::Delete => Mod::Delete(name, values),
			}
		})
		.collect())
}

/// Apply an add/replace/delete of `attrs` to the entry at `dn`.
///
/// # Errors
/// [`Error::Mutation`] when the attribute set is empty or the server rejects
/// the operation; the error carries the server's diagnostic text and the
/// target DN.
pub async fn mutate(
	ldap: &mut Ldap,
	dn: &str,
	attrs: AttributeValues,
	mode: MutationMode,
) -> Result<(), Error> {
	let mods = build_mods(attrs, mode)?;
	debug!(dn, ?mode, count = mods.len(), "applying mutation");
	ldap.modify(dn, mods)
		.await
		.and_then(ldap3::LdapResult::success)
		.map_err(|err| Error::Mutation {
			message: err.to_string(),
			entity: Some(dn.to_owned()),
		})?;
	Ok(())
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]

	use std::str::FromStr;

	use super::{build_mods, text_values, AttributeValues, MutationMode};
	use crate::error::Error;

	#[test]
	fn modes_parse_case_insensitively() {
		assert_eq!(MutationMode::from_str("ADD").unwrap(), MutationMode::Add);
		assert_eq!(MutationMode::from_str("Replace").unwrap(), MutationMode::Replace);
		assert_eq!(MutationMode::from_str("del").unwrap(), MutationMode::Delete);
	}

	#[test]
	fn unknown_mode_is_rejected() {
		let err = MutationMode::from_str("merge").unwrap_err();
		assert!(matches!(err, Error::Mutation { entity: None, .. }));
		assert!(err.to_string().contains("merge"));
	}

	#[test]
	fn empty_attribute_set_is_rejected() {
		let err = build_mods(AttributeValues::new(), MutationMode::Add).unwrap_err();
		assert!(matches!(err, Error::Mutation { .. }));
	}

	#[test]
	fn values_become_protocol_mods() {
		let mut attrs = AttributeValues::new();
		attrs.insert("loginshell".to_owned(), text_values(["/bin/bash"]));
		attrs.insert("uidnumber".to_owned(), text_values(["10001"]));

		let mods = build_mods(attrs, MutationMode::Replace).unwrap();
		assert_eq!(mods.len(), 2);
		assert!(mods.iter().all(|m| matches!(m, ldap3::Mod::Replace(_, _))));
	}
}
