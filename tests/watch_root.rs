//! Watch root state machine tests over a scripted stub backend.
//!
//! The stub records call counts so cancellation can be verified to stop all
//! native interaction, and delivers pre-scripted event batches in place of a
//! real notification facility.

#![allow(clippy::unwrap_used)]

use std::{
	collections::VecDeque,
	fs::Metadata,
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::{Duration, SystemTime},
};

use async_trait::async_trait;
use treewatch::{
	ChangeOrigin, DrainOutcome, EventFlags, LoopExit, PathRegistry, PendingChanges, WatchBackend,
	WatchRoot, WatcherConfig, WatcherError,
};

enum Step {
	/// Native events, each attributed to one path with translated flags.
	Deliver(Vec<(PathBuf, EventFlags)>),
	/// Transient wait interruption: not an error, the caller retries.
	Interrupted,
	/// Unrecoverable native retrieval failure.
	Fail,
}

#[derive(Default)]
struct Counters {
	arm: AtomicUsize,
	fresh_arm: AtomicUsize,
	poll: AtomicUsize,
	drain: AtomicUsize,
}

struct StubBackend {
	registry: Arc<PathRegistry<()>>,
	counters: Arc<Counters>,
	script: Mutex<VecDeque<Step>>,
}

impl StubBackend {
	fn new(script: Vec<Step>) -> (Self, Arc<PathRegistry<()>>, Arc<Counters>) {
		let registry = Arc::new(PathRegistry::with_capacity(16));
		let counters = Arc::new(Counters::default());

		(
			Self {
				registry: Arc::clone(&registry),
				counters: Arc::clone(&counters),
				script: Mutex::new(script.into()),
			},
			registry,
			counters,
		)
	}
}

#[async_trait]
impl WatchBackend for StubBackend {
	fn kind(&self) -> &'static str {
		"stub"
	}

	fn arm(&self, path: &Path, _metadata: &Metadata) -> bool {
		self.counters.arm.fetch_add(1, Ordering::SeqCst);

		if self.registry.arm_with(Arc::from(path), || ()) {
			self.counters.fresh_arm.fetch_add(1, Ordering::SeqCst);
		}

		true
	}

	fn disarm(&self, path: &Path) -> bool {
		self.registry.disarm(path).is_some()
	}

	fn is_armed(&self, path: &Path) -> bool {
		self.registry.contains(path)
	}

	fn armed_len(&self) -> usize {
		self.registry.len()
	}

	async fn poll_ready(&self, timeout: Duration) -> bool {
		self.counters.poll.fetch_add(1, Ordering::SeqCst);

		let has_events = !self
			.script
			.lock()
			.unwrap()
			.is_empty();

		if !has_events {
			tokio::time::sleep(timeout).await;
		}

		has_events
	}

	async fn drain_batch(
		&self,
		root: &Path,
		pending: &PendingChanges,
	) -> Result<DrainOutcome, WatcherError> {
		self.counters.drain.fetch_add(1, Ordering::SeqCst);

		let step = self.script.lock().unwrap().pop_front();

		match step {
			None | Some(Step::Interrupted) => Ok(DrainOutcome::NoEvents),
			Some(Step::Fail) => Err(WatcherError::EventStream {
				root: root.to_path_buf(),
				source: notify::Error::generic("simulated retrieval failure"),
			}),
			Some(Step::Deliver(events)) => {
				let mut queued = 0;

				for (path, flags) in events {
					if flags.implies_root_loss() && path == root {
						return Ok(DrainOutcome::RootLost);
					}

					self.registry.disarm(&path);
					pending.push(
						Arc::from(path.as_path()),
						SystemTime::now(),
						true,
						ChangeOrigin::Notify,
					);
					queued += 1;
				}

				Ok(DrainOutcome::Drained(queued))
			}
		}
	}
}

fn fast_config() -> WatcherConfig {
	WatcherConfig {
		poll_timeout_ms: 10,
		..Default::default()
	}
}

fn some_metadata() -> Metadata {
	std::fs::metadata(std::env::temp_dir()).unwrap()
}

fn build_root(
	root_path: &Path,
	script: Vec<Step>,
) -> (
	Arc<WatchRoot>,
	Arc<PathRegistry<()>>,
	Arc<Counters>,
	Arc<PendingChanges>,
) {
	let (stub, registry, counters) = StubBackend::new(script);
	let pending = Arc::new(PendingChanges::new());

	let root = Arc::new(WatchRoot::with_backend(
		Arc::from(root_path),
		Box::new(stub),
		Arc::clone(&pending),
		&fast_config(),
	));

	(root, registry, counters, pending)
}

#[tokio::test]
async fn root_loss_cancels_and_stops_native_calls() {
	let root_path = Path::new("/watched-root");
	let (root, _registry, counters, pending) = build_root(
		root_path,
		vec![Step::Deliver(vec![(
			root_path.to_path_buf(),
			EventFlags::DELETED,
		)])],
	);

	assert!(matches!(root.run().await, LoopExit::RootLost));
	assert!(root.is_cancelled());

	// The record for the lost root itself is discarded
	assert!(pending.drain_all().is_empty());

	// No native call survives cancellation
	let arm_calls = counters.arm.load(Ordering::SeqCst);
	assert!(!root.arm_path("/watched-root/child", &some_metadata()));
	assert_eq!(counters.arm.load(Ordering::SeqCst), arm_calls);
}

#[tokio::test]
async fn root_loss_keeps_records_already_queued_for_other_paths() {
	let root_path = Path::new("/watched-root");
	let (root, _registry, _counters, pending) = build_root(
		root_path,
		vec![Step::Deliver(vec![
			(PathBuf::from("/watched-root/a"), EventFlags::MODIFIED),
			(root_path.to_path_buf(), EventFlags::RENAMED_FROM),
			(PathBuf::from("/watched-root/b"), EventFlags::MODIFIED),
		])],
	);

	assert!(matches!(root.run().await, LoopExit::RootLost));

	let records = pending.drain_all();
	assert_eq!(records.len(), 1);
	assert_eq!(records[0].path.as_ref(), Path::new("/watched-root/a"));
}

#[tokio::test]
async fn non_root_loss_disarms_entry_without_cancelling() {
	let root_path = Path::new("/watched-root");
	let child = root_path.join("gone");
	let (root, registry, counters, pending) = build_root(
		root_path,
		vec![Step::Deliver(vec![(child.clone(), EventFlags::DELETED)])],
	);

	assert!(root.arm_path(&child, &some_metadata()));
	assert!(registry.contains(&child));

	let handle = tokio::spawn({
		let root = Arc::clone(&root);
		async move { root.run().await }
	});

	tokio::time::sleep(Duration::from_millis(100)).await;

	assert!(!root.is_cancelled());
	assert!(!registry.contains(&child));

	let records = pending.drain_all();
	assert_eq!(records.len(), 1);
	assert_eq!(records[0].path.as_ref(), child.as_path());

	// A later arm is a fresh arm, not a no-op
	let fresh_before = counters.fresh_arm.load(Ordering::SeqCst);
	assert!(root.arm_path(&child, &some_metadata()));
	assert_eq!(counters.fresh_arm.load(Ordering::SeqCst), fresh_before + 1);

	root.cancel();
	assert!(matches!(handle.await.unwrap(), LoopExit::Stopped));
}

#[tokio::test]
async fn modified_event_scenario_for_two_armed_paths() {
	let root_path = Path::new("/watched-root");
	let path_a = root_path.join("a");
	let path_b = root_path.join("b");

	let (root, registry, _counters, pending) = build_root(
		root_path,
		vec![Step::Deliver(vec![(path_a.clone(), EventFlags::MODIFIED)])],
	);

	let metadata = some_metadata();
	assert!(root.arm_path(&path_a, &metadata));
	assert!(root.arm_path(&path_b, &metadata));
	// Idempotent second arm
	assert!(root.arm_path(&path_a, &metadata));
	assert_eq!(registry.len(), 2);

	let handle = tokio::spawn({
		let root = Arc::clone(&root);
		async move { root.run().await }
	});

	tokio::time::sleep(Duration::from_millis(100)).await;

	let records = pending.drain_all();
	assert_eq!(records.len(), 1);
	assert_eq!(records[0].path.as_ref(), path_a.as_path());
	assert!(records[0].recursive);
	assert_eq!(records[0].origin, ChangeOrigin::Notify);

	assert!(!registry.contains(&path_a));
	assert!(registry.contains(&path_b));

	root.cancel();
	assert!(matches!(handle.await.unwrap(), LoopExit::Stopped));
}

#[tokio::test]
async fn transient_interruption_is_not_an_error() {
	let root_path = Path::new("/watched-root");
	let child = root_path.join("a");
	let (root, registry, counters, pending) =
		build_root(root_path, vec![Step::Interrupted]);

	assert!(root.arm_path(&child, &some_metadata()));

	let handle = tokio::spawn({
		let root = Arc::clone(&root);
		async move { root.run().await }
	});

	tokio::time::sleep(Duration::from_millis(100)).await;

	assert!(!root.is_cancelled());
	assert!(pending.is_empty());
	assert!(registry.contains(&child));
	assert!(counters.drain.load(Ordering::SeqCst) >= 1);

	root.cancel();
	assert!(matches!(handle.await.unwrap(), LoopExit::Stopped));
}

#[tokio::test]
async fn unrecoverable_failure_terminates_loop() {
	let root_path = Path::new("/watched-root");
	let (root, _registry, counters, pending) = build_root(root_path, vec![Step::Fail]);

	assert!(matches!(
		root.run().await,
		LoopExit::Failed(WatcherError::EventStream { .. })
	));
	assert!(root.is_cancelled());
	assert!(pending.is_empty());

	// No further arm or drain attempts after the failure
	let drain_calls = counters.drain.load(Ordering::SeqCst);
	let arm_calls = counters.arm.load(Ordering::SeqCst);

	assert!(!root.arm_path("/watched-root/a", &some_metadata()));
	tokio::time::sleep(Duration::from_millis(50)).await;

	assert_eq!(counters.drain.load(Ordering::SeqCst), drain_calls);
	assert_eq!(counters.arm.load(Ordering::SeqCst), arm_calls);
}
