//! Backend adapters over native change-notification facilities.
//!
//! Each native facility (edge-triggered one-shot, level-triggered,
//! per-inode recursive) lives behind the same [`WatchBackend`] capability
//! trait, keeping flag tables and one-shot re-arm quirks out of the shared
//! controller logic. Backends are created per watch root through
//! [`create_backend`]; there is no process-wide singleton instance.

use std::{fs::Metadata, path::Path, time::Duration};

use async_trait::async_trait;

use crate::{collector::PendingChanges, config::WatcherConfig, error::WatcherError};

mod notify_backend;

pub use notify_backend::NotifyBackend;

/// Result of one bounded drain call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
	/// This many pending change records were queued.
	Drained(usize),
	/// Nothing was available, or the wait was transiently interrupted.
	/// The caller retries the poll/drain cycle.
	NoEvents,
	/// The root path itself was deleted, renamed away, unmounted or covered
	/// by a mount. The remainder of the batch was discarded and the root
	/// must transition to cancelled.
	RootLost,
}

/// Capability interface every native notification facility is wrapped in.
///
/// One instance per watch root, owning the native event-source handle and the
/// path registry for that root. `arm` and `disarm` may be called concurrently
/// with the poll/drain loop; implementations serialize through their registry
/// lock and never hold it across a blocking native call.
#[async_trait]
pub trait WatchBackend: Send + Sync {
	/// Short backend name for diagnostics.
	fn kind(&self) -> &'static str;

	/// Associate `path` with the native facility, recording a fresh watch
	/// token built from the entry's stat data.
	///
	/// Arming an already-armed path is a no-op success. On native association
	/// failure the registry entry is rolled back and `false` is returned;
	/// that is non-fatal and the caller continues with sibling paths.
	fn arm(&self, path: &Path, metadata: &Metadata) -> bool;

	/// Drop the association for `path`, releasing any native resources tied
	/// to its token. Returns `false` if the path was not armed.
	fn disarm(&self, path: &Path) -> bool;

	fn is_armed(&self, path: &Path) -> bool;

	/// Number of currently armed paths.
	fn armed_len(&self) -> usize;

	/// Block up to `timeout` for at least one native event to become
	/// available. `false` means timeout; a transient interruption also
	/// reports `false` so the caller retries.
	async fn poll_ready(&self, timeout: Duration) -> bool;

	/// Retrieve and normalize up to one batch of native events.
	///
	/// Surviving events are pushed into `pending` with `recursive = true`
	/// and notify origin, and their registry entries are unconditionally
	/// removed so a later access re-arms from scratch. Root loss aborts the
	/// batch, keeping records already queued for other paths.
	///
	/// # Errors
	///
	/// Any native retrieval failure other than a transient interruption is
	/// unrecoverable for this watch root and terminates its loop.
	async fn drain_batch(
		&self,
		root: &Path,
		pending: &PendingChanges,
	) -> Result<DrainOutcome, WatcherError>;
}

/// Build an owned backend instance for one watch root.
///
/// Selection is a startup decision; the reference adapter wraps the
/// platform's recommended notification facility.
///
/// # Errors
///
/// Native event-source creation failure (resource exhaustion, permission) is
/// fatal to watch setup and is surfaced with the OS error, not retried.
pub fn create_backend(
	root: &Path,
	config: &WatcherConfig,
) -> Result<Box<dyn WatchBackend>, WatcherError> {
	NotifyBackend::new(root, config).map(|backend| Box::new(backend) as Box<dyn WatchBackend>)
}
