//! Process-level supervisor for multiple watch roots.
//!
//! Owns the shared pending-change collector, spawns one loop task per root
//! and surfaces loop exits (cancellation, root loss, backend failure) to the
//! tree-lifecycle collaborator through a notice channel so it can schedule a
//! recrawl or teardown.

use std::{
	collections::HashMap,
	path::Path,
	sync::{Arc, PoisonError, RwLock},
};

use async_channel as chan;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::{
	collector::PendingChanges,
	config::WatcherConfig,
	error::WatcherError,
	event::PendingChange,
	root::{LoopExit, WatchRoot},
};

/// Outbound notice that one watch root's loop has ended.
#[derive(Debug)]
pub struct RootNotice {
	pub root_path: Arc<Path>,
	pub exit: LoopExit,
}

struct RootHandle {
	root: Arc<WatchRoot>,
	task: JoinHandle<()>,
}

pub struct WatchService {
	config: WatcherConfig,
	pending: Arc<PendingChanges>,
	roots: RwLock<HashMap<Arc<Path>, RootHandle>>,
	notice_tx: chan::Sender<RootNotice>,
	notice_rx: chan::Receiver<RootNotice>,
}

impl Default for WatchService {
	fn default() -> Self {
		Self::new(WatcherConfig::default())
	}
}

impl WatchService {
	#[must_use]
	pub fn new(config: WatcherConfig) -> Self {
		let (notice_tx, notice_rx) = chan::unbounded();

		Self {
			config,
			pending: Arc::new(PendingChanges::new()),
			roots: RwLock::new(HashMap::new()),
			notice_tx,
			notice_rx,
		}
	}

	/// Start watching a directory tree, spawning its dedicated loop task.
	///
	/// The returned root is the handle the directory-enumeration collaborator
	/// uses to arm every discovered path.
	///
	/// # Errors
	///
	/// Fails when the tree is already being watched or the native event
	/// source cannot be created.
	#[instrument(skip(self, root_path), fields(root = %root_path.as_ref().display()))]
	pub fn watch(&self, root_path: impl AsRef<Path>) -> Result<Arc<WatchRoot>, WatcherError> {
		let path: Arc<Path> = Arc::from(root_path.as_ref());

		let mut roots = self.write_roots();
		if roots.contains_key(&path) {
			return Err(WatcherError::AlreadyWatching(path.to_path_buf()));
		}

		let root = Arc::new(WatchRoot::init(
			&path,
			Arc::clone(&self.pending),
			&self.config,
		)?);

		let task = tokio::spawn({
			let root = Arc::clone(&root);
			let notice_tx = self.notice_tx.clone();

			async move {
				let exit = root.run().await;

				if let LoopExit::Failed(e) = &exit {
					error!(?e, root = %root.root_path().display(), "Watch root loop failed;");
				}

				if notice_tx
					.send(RootNotice {
						root_path: Arc::clone(root.root_path()),
						exit,
					})
					.await
					.is_err()
				{
					debug!("Root notice receiver dropped;");
				}
			}
		});

		info!("Now watching root;");

		roots.insert(
			path,
			RootHandle {
				root: Arc::clone(&root),
				task,
			},
		);

		Ok(root)
	}

	/// Cancel one root and wait for its loop task to finish.
	///
	/// Returns `false` if the tree was not being watched.
	pub async fn unwatch(&self, root_path: impl AsRef<Path>) -> bool {
		let Some(handle) = self.write_roots().remove(root_path.as_ref()) else {
			return false;
		};

		handle.root.cancel();
		if let Err(e) = handle.task.await {
			error!(?e, "Failed to join watch root task;");
		}

		true
	}

	/// Cancel every root and wait for all loop tasks.
	pub async fn shutdown(&self) {
		let handles = self
			.write_roots()
			.drain()
			.map(|(_, handle)| handle)
			.collect::<Vec<_>>();

		for handle in handles {
			handle.root.cancel();
			if let Err(e) = handle.task.await {
				error!(?e, "Failed to join watch root task on shutdown;");
			}
		}

		info!("Watch service shutdown");
	}

	/// Drain every pending change accumulated across all roots, in
	/// first-push order.
	#[must_use]
	pub fn drain(&self) -> Vec<PendingChange> {
		self.pending.drain_all()
	}

	#[must_use]
	pub fn pending(&self) -> &Arc<PendingChanges> {
		&self.pending
	}

	/// Receiver for loop-exit notices. Cloneable; every consumer competes
	/// for notices.
	#[must_use]
	pub fn notices(&self) -> chan::Receiver<RootNotice> {
		self.notice_rx.clone()
	}

	#[must_use]
	pub fn is_watching(&self, root_path: impl AsRef<Path>) -> bool {
		self.read_roots().contains_key(root_path.as_ref())
	}

	fn read_roots(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Arc<Path>, RootHandle>> {
		self.roots.read().unwrap_or_else(PoisonError::into_inner)
	}

	fn write_roots(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Arc<Path>, RootHandle>> {
		self.roots.write().unwrap_or_else(PoisonError::into_inner)
	}
}

impl Drop for WatchService {
	fn drop(&mut self) {
		let roots = self.roots.get_mut().unwrap_or_else(PoisonError::into_inner);

		for handle in roots.values() {
			handle.root.cancel();
			handle.task.abort();
		}
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn watching_the_same_root_twice_fails() {
		let dir = tempfile::tempdir().unwrap();
		let service = WatchService::new(WatcherConfig::default());

		let root = service.watch(dir.path()).unwrap();
		assert!(service.is_watching(dir.path()));
		assert!(!root.is_cancelled());

		assert!(matches!(
			service.watch(dir.path()),
			Err(WatcherError::AlreadyWatching(_))
		));

		service.shutdown().await;
		assert!(root.is_cancelled());
		assert!(!service.is_watching(dir.path()));
	}

	#[tokio::test]
	async fn unwatch_unknown_root_is_false() {
		let service = WatchService::new(WatcherConfig::default());
		assert!(!service.unwatch(std::path::Path::new("/nowhere")).await);
	}
}
