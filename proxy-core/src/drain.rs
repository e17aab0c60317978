//! Connection/request draining: a `DrainWatcher` is cloned into every
//! in-flight request; a drain will not complete until every clone has been
//! dropped, or a deadline elapses.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

pub use internal::{DrainTrigger, DrainWatcher, ReleaseShutdown as DrainGuard};

/// Build a drain trigger/watcher pair. `DrainTrigger::start_drain_and_wait`
/// starts the drain; `DrainWatcher` should be cloned by anything that wants
/// to delay shutdown while it is active.
pub fn new() -> (DrainTrigger, DrainWatcher) {
	internal::channel()
}

/// Runs `component`'s drain-aware future, bounding the graceful period to
/// `deadline`. Grounded on the teacher's `run_with_drain` shutdown wrapper,
/// simplified to a single (non-nested) drain scope since the proxy has no
/// sub-component listeners of its own.
pub async fn run_with_drain(component: &str, drain: DrainWatcher, deadline: Duration) {
	let _release = drain.wait_for_drain().await;
	info!(component, "drain started, waiting up to {deadline:?} for in-flight requests");
	let (sub_trigger, sub_watch) = new();
	drop(sub_watch);
	if tokio::time::timeout(deadline, sub_trigger.start_drain_and_wait())
		.await
		.is_err()
	{
		warn!(component, "drain deadline exceeded with requests still in flight");
	}
	info!(component, "drain complete");
}

mod internal {
	use super::*;

	enum Never {}

	pub struct DrainTrigger {
		drained_rx: mpsc::Receiver<Never>,
		signal_tx: watch::Sender<bool>,
	}

	#[derive(Clone)]
	pub struct DrainWatcher {
		drained_tx: mpsc::Sender<Never>,
		signal_rx: watch::Receiver<bool>,
	}

	pub struct ReleaseShutdown(#[allow(dead_code)] mpsc::Sender<Never>);

	pub(super) fn channel() -> (DrainTrigger, DrainWatcher) {
		let (signal_tx, signal_rx) = watch::channel(false);
		let (drained_tx, drained_rx) = mpsc::channel(1);
		(
			DrainTrigger {
				drained_rx,
				signal_tx,
			},
			DrainWatcher {
				drained_tx,
				signal_rx,
			},
		)
	}

	impl DrainTrigger {
		/// Signal all watchers and wait until every clone of the paired
		/// `DrainWatcher` has been dropped.
		pub async fn start_drain_and_wait(mut self) {
			let _ = self.signal_tx.send(true);
			drop(self.signal_tx);
			// All `DrainWatcher::drained_tx` senders must be dropped for this to
			// resolve; `recv` returns `None` only then, since `Never` cannot be
			// constructed.
			let _: Option<Never> = self.drained_rx.recv().await;
		}
	}

	impl DrainWatcher {
		/// Resolves once a drain has been signaled. Holding `self` (or a
		/// clone) alive for the duration of a request blocks the matching
		/// `DrainTrigger::start_drain_and_wait` from completing; drop it once
		/// the request is done.
		pub async fn wait_for_drain(mut self) -> ReleaseShutdown {
			while !*self.signal_rx.borrow() {
				if self.signal_rx.changed().await.is_err() {
					break;
				}
			}
			ReleaseShutdown(self.drained_tx)
		}

		/// Resolves when a drain is signaled, without consuming the watcher
		/// or releasing its hold on the drain. Used by long-lived loops (the
		/// dispatcher, the usage aggregator) that want to notice a shutdown
		/// between batches.
		pub async fn signaled(&self) {
			let mut rx = self.signal_rx.clone();
			while !*rx.borrow() {
				if rx.changed().await.is_err() {
					break;
				}
			}
		}

		pub fn is_draining(&self) -> bool {
			*self.signal_rx.borrow()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn drain_waits_for_watchers() {
		let (trigger, watcher) = new();
		let w2 = watcher.clone();
		drop(watcher);
		let done = tokio::spawn(trigger.start_drain_and_wait());
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(!done.is_finished());
		drop(w2);
		done.await.unwrap();
	}
}
