//! The paged search engine.
//!
//! Searches stream pages from the server through the `ldap3` [`PagedResults`]
//! adapter, which resends the simple paged results control with the cookie
//! returned by the previous page until the server hands back an empty cookie.
//! Each entry is normalized as it arrives, so a failure partway through a
//! multi-page search still leaves the caller with every record collected up
//! to that point.

use std::time::Duration;

use ldap3::{
	adapters::{Adapter, EntriesOnly, PagedResults},
	Ldap, Scope, SearchEntry,
};
use tracing::debug;

use crate::{
	error::Error,
	record::{normalize_entry, DirectoryRecord},
};

/// Timeout applied to each search request. No overall deadline is enforced
/// across a whole paginated search; a search ends when the cookie runs out.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size used for internal scans, matching the conventional server-side
/// result limit.
pub(crate) const DEFAULT_PAGE_SIZE: i32 = 1000;

/// A search that failed after possibly yielding data. Records collected
/// before the failure are surfaced so the caller can decide whether partial
/// data is still useful.
#[derive(Debug)]
pub struct SearchFailure {
	/// Why the search stopped.
	pub error: Error,
	/// Records collected before the failure.
	pub partial: Vec<DirectoryRecord>,
}

impl SearchFailure {
	/// Wrap a protocol failure observed after `partial` records.
	fn search(err: impl ToString, partial: Vec<DirectoryRecord>) -> Self {
		SearchFailure { error: Error::Search(err.to_string()), partial }
	}
}

impl std::fmt::Display for SearchFailure {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.error.fmt(f)
	}
}

impl std::error::Error for SearchFailure {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		Some(&self.error)
	}
}

impl From<SearchFailure> for Error {
	fn from(failure: SearchFailure) -> Self {
		failure.error
	}
}

/// Run a subtree search under `base`, returning normalized records.
///
/// With a page size the simple paged results control is used and the search
/// loops until the continuation cookie is exhausted. Without one a single
/// request is issued, capped at the server's own result limit, and the
/// result is sorted by surname as a deterministic ordering tie-break.
///
/// # Errors
/// A protocol failure yields [`Error::Search`] together with the partial
/// result set; an error-free search matching nothing yields
/// [`Error::NotFound`], distinguishing an empty filter match from a protocol
/// failure.
pub async fn paged_search(
	ldap: &mut Ldap,
	base: &str,
	filter: &str,
	attrs: &[String],
	page_size: Option<i32>,
) -> Result<Vec<DirectoryRecord>, SearchFailure> {
	let mut adapters: Vec<Box<dyn Adapter<_, _>>> = vec![Box::new(EntriesOnly::new())];
	if let Some(page_size) = page_size {
		adapters.push(Box::new(PagedResults::new(page_size)));
	}

	let mut records = Vec::new();
	let mut search = ldap
		.with_timeout(REQUEST_TIMEOUT)
		.streaming_search_with(adapters, base, Scope::Subtree, filter, attrs.to_vec())
		.await
		.map_err(|err| SearchFailure::search(err, Vec::new()))?;

	loop {
		match search.next().await {
			Ok(Some(entry)) => records.push(normalize_entry(SearchEntry::construct(entry))),
			Ok(None) => break,
			Err(err) => return Err(SearchFailure::search(err, records)),
		}
	}
	if let Err(err) = search.finish().await.success() {
		return Err(SearchFailure::search(err, records));
	}
	debug!(filter, count = records.len(), "search finished");

	if records.is_empty() {
		return Err(SearchFailure { error: Error::NotFound(filter.to_owned()), partial: records });
	}
	if page_size.is_none() {
		sort_by_surname(&mut records);
	}
	Ok(records)
}

/// Order records by surname, then common name, for stable single-page output.
fn sort_by_surname(records: &mut [DirectoryRecord]) {
	records.sort_by(|a, b| {
		(a.get_str("sn"), a.cn()).cmp(&(b.get_str("sn"), b.cn()))
	});
}

/// Unwrap a result set that is expected to contain exactly one record.
/// Returns `None` for empty and ambiguous result sets alike.
#[must_use]
pub fn one_of(mut records: Vec<DirectoryRecord>) -> Option<DirectoryRecord> {
	if records.len() == 1 {
		records.pop()
	} else {
		None
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]

	use super::{one_of, sort_by_surname, SearchFailure};
	use crate::{
		error::Error,
		record::{AttrValue, DirectoryRecord},
	};

	fn person(sn: &str, cn: &str) -> DirectoryRecord {
		let mut record = DirectoryRecord::new();
		record.insert("sn", AttrValue::Scalar(sn.to_owned()));
		record.insert("cn", AttrValue::Scalar(cn.to_owned()));
		record
	}

	#[test]
	fn surname_sort_is_stable_and_total() {
		let mut records =
			vec![person("Smith", "Zoe"), person("Jones", "Amy"), person("Smith", "Ann")];
		sort_by_surname(&mut records);

		let names: Vec<_> = records.iter().map(|r| r.cn().unwrap()).collect();
		assert_eq!(names, ["Amy", "Ann", "Zoe"]);
	}

	#[test]
	fn failure_is_a_std_error_and_converts_to_the_inner_error() {
		let failure = SearchFailure {
			error: Error::NotFound("(cn=x)".to_owned()),
			partial: vec![person("Smith", "Zoe")],
		};
		assert_eq!(failure.to_string(), failure.error.to_string());

		let boxed: Box<dyn std::error::Error> = Box::new(failure);
		assert!(boxed.source().is_some());

		let failure = SearchFailure {
			error: Error::NotFound("(cn=x)".to_owned()),
			partial: Vec::new(),
		};
		assert!(matches!(Error::from(failure), Error::NotFound(_)));
	}

	#[test]
	fn one_of_unwraps_exactly_one() {
		assert!(one_of(Vec::new()).is_none());
		assert!(one_of(vec![person("a", "a"), person("b", "b")]).is_none());
		assert_eq!(one_of(vec![person("Smith", "Zoe")]).unwrap().cn(), Some("Zoe"));
	}
}
