//! Watch root controller.
//!
//! One controller per watched tree owns the backend adapter, drives the
//! poll/drain loop and holds the terminal cancellation state. Active to
//! cancelled is one-way; re-watching a tree means constructing a new root.

use std::{
	fs::Metadata,
	path::Path,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

use tracing::{debug, error, instrument, trace, warn};

use crate::{
	backend::{create_backend, DrainOutcome, WatchBackend},
	collector::PendingChanges,
	config::WatcherConfig,
	error::WatcherError,
};

/// Why a watch root's loop stopped.
///
/// Loop termination always ends up here or in a logged error, never in a
/// silently stalled watch: the owner reacts by scheduling a recrawl or
/// tearing the tree down.
#[derive(Debug)]
pub enum LoopExit {
	/// External cancel request.
	Stopped,
	/// The root path itself was deleted, renamed away, unmounted or covered
	/// by a mount.
	RootLost,
	/// Unrecoverable native failure; treated downstream like a lost root but
	/// logged as an error rather than a clean cancel.
	Failed(WatcherError),
}

pub struct WatchRoot {
	root_path: Arc<Path>,
	backend: Box<dyn WatchBackend>,
	pending: Arc<PendingChanges>,
	cancelled: AtomicBool,
	poll_timeout: Duration,
}

impl WatchRoot {
	/// Set up watching for one directory tree.
	///
	/// # Errors
	///
	/// Fails only when the native event source cannot be created; the watch
	/// does not start and the OS error is surfaced to the caller.
	pub fn init(
		root_path: impl AsRef<Path>,
		pending: Arc<PendingChanges>,
		config: &WatcherConfig,
	) -> Result<Self, WatcherError> {
		let root_path: Arc<Path> = Arc::from(root_path.as_ref());
		let backend = create_backend(&root_path, config)?;

		debug!(root = %root_path.display(), backend = backend.kind(), "Watch root initialized;");

		Ok(Self::with_backend(root_path, backend, pending, config))
	}

	/// Assemble a root over an already-built backend. Used by backend
	/// selection at startup and by tests injecting stub backends.
	#[must_use]
	pub fn with_backend(
		root_path: Arc<Path>,
		backend: Box<dyn WatchBackend>,
		pending: Arc<PendingChanges>,
		config: &WatcherConfig,
	) -> Self {
		Self {
			root_path,
			backend,
			pending,
			cancelled: AtomicBool::new(false),
			poll_timeout: config.poll_timeout(),
		}
	}

	#[must_use]
	pub fn root_path(&self) -> &Arc<Path> {
		&self.root_path
	}

	#[must_use]
	pub fn pending(&self) -> &Arc<PendingChanges> {
		&self.pending
	}

	#[must_use]
	pub fn backend(&self) -> &dyn WatchBackend {
		self.backend.as_ref()
	}

	/// Arm a directory or file discovered during crawl or recrawl.
	///
	/// Returns `false` without touching the native facility once the root is
	/// cancelled, and on per-path association failure, which is non-fatal:
	/// the enumeration caller logs and continues with siblings.
	pub fn arm_path(&self, path: impl AsRef<Path>, metadata: &Metadata) -> bool {
		if self.is_cancelled() {
			trace!(
				root = %self.root_path.display(),
				path = %path.as_ref().display(),
				"Ignoring arm request for cancelled root;"
			);
			return false;
		}

		self.backend.arm(path.as_ref(), metadata)
	}

	/// One-way transition to the terminal cancelled state.
	pub fn cancel(&self) {
		if !self.cancelled.swap(true, Ordering::AcqRel) {
			debug!(root = %self.root_path.display(), "Watch root cancelled;");
		}
	}

	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::Acquire)
	}

	/// Drive the poll/drain loop until the root is cancelled, lost or the
	/// backend fails. Runs on this root's dedicated task.
	#[instrument(name = "watch_root", skip(self), fields(root = %self.root_path.display()))]
	pub async fn run(&self) -> LoopExit {
		while !self.is_cancelled() {
			if !self.backend.poll_ready(self.poll_timeout).await {
				continue;
			}

			if self.is_cancelled() {
				break;
			}

			match self.backend.drain_batch(&self.root_path, &self.pending).await {
				Ok(DrainOutcome::Drained(n)) => {
					trace!(records = n, "Drained native events;");
				}
				Ok(DrainOutcome::NoEvents) => {
					// Transient interruption or somebody else drained first;
					// retry the cycle
				}
				Ok(DrainOutcome::RootLost) => {
					warn!("Watch root lost, scheduling teardown;");
					self.cancel();
					return LoopExit::RootLost;
				}
				Err(e) => {
					error!(?e, "Unrecoverable watch backend failure;");
					self.cancel();
					return LoopExit::Failed(e);
				}
			}
		}

		debug!("Watch root loop stopped;");
		LoopExit::Stopped
	}
}
