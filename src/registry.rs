//! Per-root mapping from canonical watched path to native watch token.
//!
//! The registry holds the sole strong owner of each token; removing an entry
//! hands the token back to the caller so backend resources release through
//! `Drop` after the lock is gone. One registry per watch root, no cross-root
//! sharing. The lock serializes the poll/drain loop against concurrent arming
//! from directory enumeration and must never be held across a native call.

use std::{
	collections::HashMap,
	path::Path,
	sync::{Arc, Mutex, PoisonError},
};

pub struct PathRegistry<T> {
	entries: Mutex<HashMap<Arc<Path>, T>>,
}

impl<T> PathRegistry<T> {
	#[must_use]
	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			entries: Mutex::new(HashMap::with_capacity(capacity)),
		}
	}

	/// Insert a fresh token for `path` if none exists.
	///
	/// Returns `true` if a new entry was created. `false` means the path was
	/// already armed, which is a no-op success for callers, and `make` is
	/// never invoked in that case.
	pub fn arm_with(&self, path: Arc<Path>, make: impl FnOnce() -> T) -> bool {
		let mut entries = self.lock();
		if entries.contains_key(&path) {
			return false;
		}

		entries.insert(path, make());
		true
	}

	/// Remove the entry for `path`, returning its token so the caller can
	/// release native resources outside the lock.
	pub fn disarm(&self, path: &Path) -> Option<T> {
		self.lock().remove(path)
	}

	#[must_use]
	pub fn contains(&self, path: &Path) -> bool {
		self.lock().contains_key(path)
	}

	/// Shared handle for the canonical path backing `path`, if armed.
	#[must_use]
	pub fn canonical(&self, path: &Path) -> Option<Arc<Path>> {
		self.lock().get_key_value(path).map(|(k, _)| Arc::clone(k))
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.lock().len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.lock().is_empty()
	}

	/// Drop every entry, returning the tokens for out-of-lock release.
	pub fn clear(&self) -> Vec<T> {
		self.lock().drain().map(|(_, token)| token).collect()
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Arc<Path>, T>> {
		self.entries.lock().unwrap_or_else(PoisonError::into_inner)
	}
}
