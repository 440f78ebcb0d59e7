use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatcherError {
	#[error("Unable to create native event source for '{}': {}", .root.display(), .source)]
	Init {
		root: PathBuf,
		#[source]
		source: notify::Error,
	},

	#[error("Event retrieval for '{}' failed: {}", .root.display(), .source)]
	EventStream {
		root: PathBuf,
		#[source]
		source: notify::Error,
	},

	#[error("Event channel for '{}' closed while the root was still active", .root.display())]
	ChannelClosed { root: PathBuf },

	#[error("Already watching root '{}'", .0.display())]
	AlreadyWatching(PathBuf),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}
