//! Account lock and enabled state evaluation.

use crate::record::DirectoryRecord;

/// `userAccountControl` for a disabled normal account.
const UAC_DISABLED: i64 = 514;

/// `userAccountControl` for a disabled account with a non-expiring password.
const UAC_DISABLED_DONT_EXPIRE: i64 = 66050;

/// Whether the account behind `record` is locked out or disabled.
///
/// An account counts as locked when `lockouttime` is present and non-zero, or
/// when `userAccountControl` carries one of the disabled bit combinations
/// (514 for a normal account, 66050 with a non-expiring password). The
/// enabled equivalents 512 and 66048, any other control value and missing
/// attributes all evaluate to unlocked.
#[must_use]
pub fn is_locked(record: &DirectoryRecord) -> bool {
	if record.get_i64("lockouttime").is_some_and(|lockout| lockout != 0) {
		return true;
	}
	matches!(
		record.get_i64("useraccountcontrol"),
		Some(UAC_DISABLED | UAC_DISABLED_DONT_EXPIRE)
	)
}
