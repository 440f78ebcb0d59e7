//! # treewatch
//!
//! Watch-backend abstraction for a long-running file-change notification
//! service. It wraps a native OS change-notification facility behind one
//! capability trait, keeps the per-path association state needed to keep that
//! facility armed, translates heterogeneous native event flags into one
//! canonical vocabulary and feeds a deduplicated stream of pending-change
//! records to downstream consumers.
//!
//! Native facilities disagree on almost everything (edge vs level triggered,
//! per-inode vs per-directory, one-shot vs auto-rearming, batch-limited vs
//! unbounded); the contract here stays the same regardless: arm a path, poll
//! for readiness, drain a bounded batch of normalized events, and re-arm
//! lazily after an association is consumed.
//!
//! ## Basic usage
//!
//! ```no_run
//! use treewatch::{WatchService, WatcherConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), treewatch::WatcherError> {
//!     let service = WatchService::new(WatcherConfig::default());
//!
//!     let root = service.watch("/some/tree")?;
//!
//!     // The directory-enumeration collaborator arms every discovered entry
//!     let metadata = std::fs::metadata("/some/tree")?;
//!     root.arm_path("/some/tree", &metadata);
//!
//!     // The directory-index collaborator periodically drains
//!     for change in service.drain() {
//!         println!("{} changed", change.path.display());
//!     }
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(
	clippy::all,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::dbg_macro
)]

pub mod backend;
mod collector;
mod config;
mod error;
mod event;
mod registry;
mod root;
mod service;

pub use backend::{create_backend, DrainOutcome, NotifyBackend, WatchBackend};
pub use collector::PendingChanges;
pub use config::{
	WatcherConfig, DEFAULT_BATCH_LIMIT, DEFAULT_ENTRY_COUNT_HINT, DEFAULT_POLL_TIMEOUT_MS,
};
pub use error::WatcherError;
pub use event::{ChangeOrigin, EventFlags, PendingChange};
pub use registry::PathRegistry;
pub use root::{LoopExit, WatchRoot};
pub use service::{RootNotice, WatchService};
