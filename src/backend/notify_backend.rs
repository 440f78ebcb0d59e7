//! Reference backend adapter over the `notify` crate.
//!
//! The platform's recommended facility (inotify, FSEvents, ReadDirectoryChanges,
//! kqueue) plays the role of the native event source. Events flow from notify's
//! callback thread into an unbounded channel; the drain side buffers at most one
//! batch worth per call.
//!
//! Re-arm policy: some native facilities permanently disarm an association once
//! it delivers an event. We treat that as universal, so every delivered event
//! drops its registry entry and the directory-enumeration pass re-arms the path
//! on its next visit. That keeps the policy backend-agnostic even though notify
//! itself keeps watches alive.

use std::{
	collections::VecDeque,
	fs::Metadata,
	path::Path,
	sync::{Arc, Mutex, PoisonError, Weak},
	time::{Duration, SystemTime},
};

use async_channel as chan;
use async_trait::async_trait;
use notify::{
	event::{ModifyKind, RenameMode},
	Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tracing::{error, trace, warn};

use crate::{
	collector::PendingChanges,
	config::WatcherConfig,
	error::WatcherError,
	event::{ChangeOrigin, EventFlags},
	registry::PathRegistry,
};

use super::{DrainOutcome, WatchBackend};

/// Translate a native notify event kind into the canonical flag vocabulary.
///
/// Total: kinds with no canonical meaning map to the empty set and are
/// ignored by the drain, never propagated.
///
/// | native                         | canonical                 |
/// |--------------------------------|---------------------------|
/// | `Create(_)`                    | `MODIFIED`                |
/// | `Modify(Data/Any/Other)`       | `MODIFIED`                |
/// | `Modify(Metadata(_))`          | `ATTRIB_CHANGED`          |
/// | `Modify(Name(From))`           | `RENAMED_FROM`            |
/// | `Modify(Name(To))`             | `RENAMED_TO`              |
/// | `Modify(Name(Both/Any/Other))` | `RENAMED_FROM|RENAMED_TO` |
/// | `Remove(_)`                    | `DELETED`                 |
/// | `Access(_)`                    | `ACCESSED_ONLY`           |
/// | `Any` / `Other`                | empty                     |
pub(crate) fn translate(kind: &EventKind) -> EventFlags {
	match kind {
		EventKind::Create(_) => EventFlags::MODIFIED,
		EventKind::Modify(modify_kind) => match modify_kind {
			ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Other => EventFlags::MODIFIED,
			ModifyKind::Metadata(_) => EventFlags::ATTRIB_CHANGED,
			ModifyKind::Name(rename_mode) => match rename_mode {
				RenameMode::From => EventFlags::RENAMED_FROM,
				RenameMode::To => EventFlags::RENAMED_TO,
				// Direction unknown, classify as both so root loss errs on
				// the safe side
				RenameMode::Both | RenameMode::Any | RenameMode::Other => {
					EventFlags::RENAMED_FROM | EventFlags::RENAMED_TO
				}
			},
		},
		EventKind::Remove(_) => EventFlags::DELETED,
		EventKind::Access(_) => EventFlags::ACCESSED_ONLY,
		EventKind::Any | EventKind::Other => EventFlags::empty(),
	}
}

/// Stat snapshot captured when a path is armed, mirroring the metadata record
/// the native association is built from.
#[derive(Debug, Clone, Copy)]
pub struct TokenStamp {
	pub len: u64,
	pub modified: Option<SystemTime>,
	pub accessed: Option<SystemTime>,
}

impl From<&Metadata> for TokenStamp {
	fn from(metadata: &Metadata) -> Self {
		Self {
			len: metadata.len(),
			modified: metadata.modified().ok(),
			accessed: metadata.accessed().ok(),
		}
	}
}

/// Watch token binding one canonical path to its active notify association.
///
/// Owned exclusively by the registry entry for that path. Dropping the token
/// releases the native association, on every exit path.
pub struct NotifyToken {
	path: Arc<Path>,
	stamp: TokenStamp,
	watcher: Weak<Mutex<RecommendedWatcher>>,
}

impl NotifyToken {
	fn new(path: Arc<Path>, metadata: &Metadata, watcher: Weak<Mutex<RecommendedWatcher>>) -> Self {
		Self {
			path,
			stamp: TokenStamp::from(metadata),
			watcher,
		}
	}

	fn shared_path(&self) -> Arc<Path> {
		Arc::clone(&self.path)
	}

	fn stamp(&self) -> TokenStamp {
		self.stamp
	}

	/// Detach from the native handle so dropping does not unwatch. Used when
	/// rolling back a registry entry whose association never went through.
	fn defuse(&mut self) {
		self.watcher = Weak::new();
	}
}

impl Drop for NotifyToken {
	fn drop(&mut self) {
		if let Some(watcher) = self.watcher.upgrade() {
			let mut watcher = watcher.lock().unwrap_or_else(PoisonError::into_inner);
			if let Err(e) = watcher.unwatch(&self.path) {
				// Expected when the native facility already dropped the
				// association, e.g. the path was deleted
				trace!(?e, path = %self.path.display(), "Unwatch on token release failed;");
			}
		}
	}
}

struct EventQueue {
	rx: chan::Receiver<notify::Result<Event>>,
	buffered: VecDeque<notify::Result<Event>>,
	closed: bool,
}

pub struct NotifyBackend {
	watcher: Arc<Mutex<RecommendedWatcher>>,
	registry: PathRegistry<NotifyToken>,
	queue: tokio::sync::Mutex<EventQueue>,
	batch_limit: usize,
}

impl NotifyBackend {
	/// Create the native event source for one watch root.
	///
	/// # Errors
	///
	/// Creation failure is fatal to watch setup and surfaces the OS error.
	pub fn new(root: &Path, config: &WatcherConfig) -> Result<Self, WatcherError> {
		let (events_tx, events_rx) = chan::unbounded();

		let watcher = RecommendedWatcher::new(
			move |result| {
				if !events_tx.is_closed() && events_tx.send_blocking(result).is_err() {
					error!("Unable to forward native watcher event, channel closed;");
				}
			},
			NotifyConfig::default(),
		)
		.map_err(|source| WatcherError::Init {
			root: root.to_path_buf(),
			source,
		})?;

		Ok(Self {
			watcher: Arc::new(Mutex::new(watcher)),
			registry: PathRegistry::with_capacity(config.entry_count_hint),
			queue: tokio::sync::Mutex::new(EventQueue {
				rx: events_rx,
				buffered: VecDeque::new(),
				closed: false,
			}),
			batch_limit: config.batch_limit,
		})
	}

	fn lock_watcher(&self) -> std::sync::MutexGuard<'_, RecommendedWatcher> {
		self.watcher.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

#[async_trait]
impl WatchBackend for NotifyBackend {
	fn kind(&self) -> &'static str {
		"notify"
	}

	fn arm(&self, path: &Path, metadata: &Metadata) -> bool {
		let path: Arc<Path> = Arc::from(path);

		if !self.registry.arm_with(Arc::clone(&path), || {
			NotifyToken::new(Arc::clone(&path), metadata, Arc::downgrade(&self.watcher))
		}) {
			// Already watching it
			return true;
		}

		trace!(path = %path.display(), size = metadata.len(), "Watching path;");

		// Content and attribute changes on the exact entry; no recursion, the
		// enumeration pass arms children itself
		if let Err(e) = self
			.lock_watcher()
			.watch(&path, RecursiveMode::NonRecursive)
		{
			warn!(?e, path = %path.display(), "Unable to watch path, leaving it unwatched;");
			if let Some(mut token) = self.registry.disarm(&path) {
				token.defuse();
			}
			return false;
		}

		true
	}

	fn disarm(&self, path: &Path) -> bool {
		// Token drop releases the native association outside the lock
		self.registry.disarm(path).is_some()
	}

	fn is_armed(&self, path: &Path) -> bool {
		self.registry.contains(path)
	}

	fn armed_len(&self) -> usize {
		self.registry.len()
	}

	async fn poll_ready(&self, timeout: Duration) -> bool {
		let mut queue = self.queue.lock().await;

		if !queue.buffered.is_empty() || queue.closed {
			return true;
		}

		let received = tokio::time::timeout(timeout, queue.rx.recv()).await;

		match received {
			Ok(Ok(item)) => {
				queue.buffered.push_back(item);
				true
			}
			// Closed channel is reported by the next drain call
			Ok(Err(_)) => {
				queue.closed = true;
				true
			}
			Err(_) => false,
		}
	}

	async fn drain_batch(
		&self,
		root: &Path,
		pending: &PendingChanges,
	) -> Result<DrainOutcome, WatcherError> {
		let batch = {
			let mut queue = self.queue.lock().await;
			let mut batch = Vec::new();

			while batch.len() < self.batch_limit {
				if let Some(item) = queue.buffered.pop_front() {
					batch.push(item);
					continue;
				}

				match queue.rx.try_recv() {
					Ok(item) => batch.push(item),
					Err(chan::TryRecvError::Empty) => break,
					Err(chan::TryRecvError::Closed) => {
						queue.closed = true;
						break;
					}
				}
			}

			if batch.is_empty() && queue.closed {
				return Err(WatcherError::ChannelClosed {
					root: root.to_path_buf(),
				});
			}

			batch
		};

		if batch.is_empty() {
			return Ok(DrainOutcome::NoEvents);
		}

		let mut queued = 0;

		for item in batch {
			let event = match item {
				Ok(event) => event,
				Err(e) => {
					error!(?e, root = %root.display(), "Native event retrieval failed;");
					return Err(WatcherError::EventStream {
						root: root.to_path_buf(),
						source: e,
					});
				}
			};

			let flags = translate(&event.kind);
			trace!(%flags, paths = ?event.paths, "Native event;");

			if flags.is_empty() || flags == EventFlags::ACCESSED_ONLY {
				continue;
			}

			let observed_at = SystemTime::now();

			for path in &event.paths {
				if flags.implies_root_loss() && path.as_path() == root {
					warn!(
						root = %root.display(),
						%flags,
						"Watch root has been removed, renamed or unmounted, cancelling watch;"
					);
					return Ok(DrainOutcome::RootLost);
				}

				// The association is treated as consumed either way; the
				// enumeration pass re-arms on its next visit
				let canonical = match self.registry.disarm(path) {
					Some(token) => {
						trace!(
							path = %path.display(),
							stamp = ?token.stamp(),
							"Disarmed consumed watch;"
						);
						token.shared_path()
					}
					None => Arc::from(path.as_path()),
				};

				pending.push(canonical, observed_at, true, ChangeOrigin::Notify);
				queued += 1;
			}
		}

		Ok(if queued == 0 {
			DrainOutcome::NoEvents
		} else {
			DrainOutcome::Drained(queued)
		})
	}
}

impl Drop for NotifyBackend {
	fn drop(&mut self) {
		// Tokens must not fight over unwatch while the watcher handle goes
		// away with us
		for mut token in self.registry.clear() {
			token.defuse();
		}
	}
}
