use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default capacity hint for the per-root path registry.
pub const DEFAULT_ENTRY_COUNT_HINT: usize = 4096;

/// Hard ceiling on native events retrieved per drain call, bounding per-call
/// latency and memory.
pub const DEFAULT_BATCH_LIMIT: usize = 16 * 1024;

/// Default bounded wait for event readiness, in milliseconds.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;

/// Read-only sizing knobs for the watch backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
	/// Expected number of watched entries per root, used to pre-size the
	/// path registry.
	pub entry_count_hint: usize,
	/// Maximum native events drained per call.
	pub batch_limit: usize,
	/// How long the poll loop blocks waiting for readiness before retrying.
	pub poll_timeout_ms: u64,
}

impl Default for WatcherConfig {
	fn default() -> Self {
		Self {
			entry_count_hint: DEFAULT_ENTRY_COUNT_HINT,
			batch_limit: DEFAULT_BATCH_LIMIT,
			poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
		}
	}
}

impl WatcherConfig {
	#[must_use]
	pub const fn poll_timeout(&self) -> Duration {
		Duration::from_millis(self.poll_timeout_ms)
	}
}
