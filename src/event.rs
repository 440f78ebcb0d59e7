//! Canonical event vocabulary shared by every backend.
//!
//! Native facilities each speak their own flag dialect; the translator in each
//! backend maps it into [`EventFlags`], the only vocabulary visible outside the
//! backend boundary. Flags are used for diagnostics and for the root-loss
//! decision during a drain, they are never stored in a [`PendingChange`].

use std::{fmt, path::Path, sync::Arc, time::SystemTime};

use bitflags::bitflags;

bitflags! {
	/// Backend-agnostic classification of what kind of change occurred.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct EventFlags: u32 {
		const MODIFIED = 1 << 0;
		const ATTRIB_CHANGED = 1 << 1;
		const DELETED = 1 << 2;
		const RENAMED_FROM = 1 << 3;
		const RENAMED_TO = 1 << 4;
		const UNMOUNTED = 1 << 5;
		const MOUNT_COVERED = 1 << 6;
		const ACCESSED_ONLY = 1 << 7;
	}
}

impl EventFlags {
	/// Flags that mean a watched path itself is gone from its old identity.
	///
	/// When one of these fires for a watch root's own path, the root can no
	/// longer be trusted and must be cancelled.
	#[must_use]
	pub const fn root_loss() -> Self {
		Self::DELETED
			.union(Self::RENAMED_FROM)
			.union(Self::UNMOUNTED)
			.union(Self::MOUNT_COVERED)
	}

	#[must_use]
	pub fn implies_root_loss(self) -> bool {
		self.intersects(Self::root_loss())
	}
}

impl fmt::Display for EventFlags {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_empty() {
			return f.write_str("<none>");
		}

		let mut first = true;
		for (name, _) in self.iter_names() {
			if !first {
				f.write_str("|")?;
			}
			f.write_str(name)?;
			first = false;
		}

		Ok(())
	}
}

/// How a pending change was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
	/// Reported by the native notification facility.
	Notify,
	/// Discovered by comparing stat data during a crawl.
	Stat,
}

impl ChangeOrigin {
	/// Notify wins over stat when the same path is reported through both.
	#[must_use]
	pub fn merge(self, other: Self) -> Self {
		if self == Self::Notify || other == Self::Notify {
			Self::Notify
		} else {
			Self::Stat
		}
	}
}

/// A normalized, deduplicated notice that a path changed, awaiting
/// consumption by the directory-index collaborator.
///
/// The path is shared with the registry entry that produced it; registry
/// removal does not invalidate records already queued.
#[derive(Debug, Clone)]
pub struct PendingChange {
	pub path: Arc<Path>,
	pub observed_at: SystemTime,
	pub recursive: bool,
	pub origin: ChangeOrigin,
}
