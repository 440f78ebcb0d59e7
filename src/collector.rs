//! Deduplicating sink for pending change records.
//!
//! Shared by every watch root in the process; the directory-index
//! collaborator drains it to apply changes to its tree. Producers are only
//! ever blocked for the lock hold time of a single push or drain.

use std::{
	path::Path,
	sync::{Arc, Mutex, PoisonError},
	time::SystemTime,
};

use indexmap::IndexMap;

use crate::event::{ChangeOrigin, PendingChange};

pub struct PendingChanges {
	records: Mutex<IndexMap<Arc<Path>, PendingChange>>,
}

impl Default for PendingChanges {
	fn default() -> Self {
		Self::new()
	}
}

impl PendingChanges {
	#[must_use]
	pub fn new() -> Self {
		Self {
			records: Mutex::new(IndexMap::new()),
		}
	}

	/// Queue a change for `path`, merging with any record already pending:
	/// most recent timestamp wins, the recursive flag accumulates and notify
	/// origin beats stat origin.
	pub fn push(
		&self,
		path: Arc<Path>,
		observed_at: SystemTime,
		recursive: bool,
		origin: ChangeOrigin,
	) {
		let mut records = self.lock();

		if let Some(record) = records.get_mut(&path) {
			if observed_at > record.observed_at {
				record.observed_at = observed_at;
			}
			record.recursive |= recursive;
			record.origin = record.origin.merge(origin);
		} else {
			records.insert(
				Arc::clone(&path),
				PendingChange {
					path,
					observed_at,
					recursive,
					origin,
				},
			);
		}
	}

	/// Atomically take everything queued since the last drain, in first-push
	/// order per path. A second drain with no intervening pushes is empty.
	pub fn drain_all(&self) -> Vec<PendingChange> {
		std::mem::take(&mut *self.lock()).into_values().collect()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.lock().len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.lock().is_empty()
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, IndexMap<Arc<Path>, PendingChange>> {
		self.records.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use std::time::Duration;

	use pretty_assertions::assert_eq;

	use super::*;

	fn arc(path: &str) -> Arc<Path> {
		Arc::from(Path::new(path))
	}

	#[test]
	fn dedupes_by_path_keeping_max_timestamp_and_or_of_recursive() {
		let pending = PendingChanges::new();
		let earlier = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
		let later = SystemTime::UNIX_EPOCH + Duration::from_secs(200);

		pending.push(arc("/r/a"), later, false, ChangeOrigin::Stat);
		pending.push(arc("/r/a"), earlier, true, ChangeOrigin::Notify);

		let records = pending.drain_all();
		assert_eq!(records.len(), 1);

		let record = &records[0];
		assert_eq!(record.path.as_ref(), Path::new("/r/a"));
		assert_eq!(record.observed_at, later);
		assert!(record.recursive);
		assert_eq!(record.origin, ChangeOrigin::Notify);
	}

	#[test]
	fn drain_preserves_first_push_order() {
		let pending = PendingChanges::new();
		let now = SystemTime::now();

		pending.push(arc("/r/b"), now, false, ChangeOrigin::Notify);
		pending.push(arc("/r/a"), now, false, ChangeOrigin::Notify);
		pending.push(arc("/r/b"), now, true, ChangeOrigin::Notify);
		pending.push(arc("/r/c"), now, false, ChangeOrigin::Notify);

		let paths = pending
			.drain_all()
			.into_iter()
			.map(|record| record.path)
			.collect::<Vec<_>>();

		assert_eq!(
			paths,
			vec![arc("/r/b"), arc("/r/a"), arc("/r/c")],
			"order must follow the first push of each path"
		);
	}

	#[test]
	fn drain_is_exhaustive_not_peek() {
		let pending = PendingChanges::new();
		pending.push(arc("/r/a"), SystemTime::now(), true, ChangeOrigin::Notify);

		assert_eq!(pending.drain_all().len(), 1);
		assert!(pending.drain_all().is_empty());
		assert!(pending.is_empty());
	}
}
