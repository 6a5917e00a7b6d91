//! Password encodings for directory credential changes.
//!
//! Two wire formats are produced here. The directory's own password
//! attribute takes the plaintext surrounded by double quotes and encoded as
//! UTF-16LE; the POSIX `unixuserpassword` attribute takes a crypt(3) hash.

use crate::error::Error;

/// The attribute carrying the directory password on a change, written with a
/// `replace` mutation over a TLS connection.
pub const PASSWORD_ATTRIBUTE: &str = "unicodePwd";

/// Placeholder secret written when Unix attributes are enabled without a
/// caller-supplied password.
pub(crate) const DEFAULT_UNIX_PASSWORD: &str = "ABCD!efgh12345$67890";

/// Prefix identifying a value that is already a crypt(3) MD5 hash.
const CRYPT_MD5_PREFIX: &str = "$1$";

/// Encode a plaintext password into the directory's password-change format:
/// the password surrounded by double quotes, with each byte of the quoted
/// string followed by a NUL byte.
///
/// This matches the UTF-16LE the server expects only for passwords whose
/// characters fit a single byte; multi-byte code points are not correctly
/// represented and directory-side expectations for them are unconfirmed.
///
/// # Errors
/// Fails with [`Error::Encoding`] for empty or whitespace-only passwords.
pub fn encode_directory_password(plaintext: &str) -> Result<Vec<u8>, Error> {
	if plaintext.trim().is_empty() {
		return Err(Error::Encoding("password must not be empty".to_owned()));
	}
	let quoted = format!("\"{plaintext}\"");
	Ok(quoted.bytes().flat_map(|byte| [byte, 0]).collect())
}

/// Encode a plaintext password for the POSIX `unixuserpassword` attribute.
/// Values already in crypt form (`$1$` prefix) pass through unchanged,
/// anything else is hashed with crypt(3) MD5.
///
/// # Errors
/// Fails with [`Error::Encoding`] for empty or whitespace-only passwords, or
/// when hashing fails.
pub fn encode_posix_password(plaintext: &str) -> Result<String, Error> {
	if plaintext.trim().is_empty() {
		return Err(Error::Encoding("password must not be empty".to_owned()));
	}
	if plaintext.starts_with(CRYPT_MD5_PREFIX) {
		return Ok(plaintext.to_owned());
	}
	pwhash::md5_crypt::hash(plaintext).map_err(|err| Error::Encoding(err.to_string()))
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]

	use super::{encode_directory_password, encode_posix_password};
	use crate::error::Error;

	#[test]
	fn directory_password_is_quoted_and_interleaved() {
		let encoded = encode_directory_password("Secret1").unwrap();
		assert_eq!(
			encoded,
			[
				0x22, 0x00, // "
				0x53, 0x00, // S
				0x65, 0x00, // e
				0x63, 0x00, // c
				0x72, 0x00, // r
				0x65, 0x00, // e
				0x74, 0x00, // t
				0x31, 0x00, // 1
				0x22, 0x00, // "
			]
		);
	}

	#[test]
	fn empty_directory_password_is_rejected() {
		assert!(matches!(encode_directory_password(""), Err(Error::Encoding(_))));
		assert!(matches!(encode_directory_password("   "), Err(Error::Encoding(_))));
	}

	#[test]
	fn posix_password_is_crypt_hashed() {
		let hashed = encode_posix_password("Secret1").unwrap();
		assert!(hashed.starts_with("$1$"));
		assert!(pwhash::md5_crypt::verify("Secret1", &hashed));
	}

	#[test]
	fn crypt_form_passes_through() {
		let already = "$1$deadbeef$0123456789abcdefghijkl";
		assert_eq!(encode_posix_password(already).unwrap(), already);
	}

	#[test]
	fn empty_posix_password_is_rejected() {
		assert!(matches!(encode_posix_password(" "), Err(Error::Encoding(_))));
	}
}
