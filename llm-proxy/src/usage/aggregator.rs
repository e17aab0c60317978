//! C4: non-blocking batching of per-token counters into the token store.
//!
//! `record` never blocks the request path: it's a bounded-channel
//! `try_send` that drops silently (bumping a debug counter) when the
//! buffer is full. A single background task owns the accumulator and is
//! the only thing that ever talks to the store, so producers stay
//! lock-free on the hot path.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};

use crate::store::{StoreError, TokenStore};

#[async_trait]
trait UsageSink: Send + Sync {
	async fn flush(&self, deltas: Vec<(String, u64)>) -> Result<(), StoreError>;
}

struct RequestCountSink(Arc<dyn TokenStore>);

#[async_trait]
impl UsageSink for RequestCountSink {
	async fn flush(&self, deltas: Vec<(String, u64)>) -> Result<(), StoreError> {
		self.0.increment_usage_batch(&deltas, Utc::now()).await
	}
}

struct CacheHitSink(Arc<dyn TokenStore>);

#[async_trait]
impl UsageSink for CacheHitSink {
	async fn flush(&self, deltas: Vec<(String, u64)>) -> Result<(), StoreError> {
		self.0.increment_cache_hit_batch(&deltas).await
	}
}

pub struct UsageAggregator {
	tx: mpsc::Sender<String>,
	shutdown_tx: watch::Sender<bool>,
	dropped: Arc<AtomicU64>,
	done_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl UsageAggregator {
	pub fn requests(store: Arc<dyn TokenStore>, buffer: usize, batch_size: usize, flush_interval: Duration) -> Self {
		Self::spawn(Arc::new(RequestCountSink(store)), buffer, batch_size, flush_interval)
	}

	pub fn cache_hits(store: Arc<dyn TokenStore>, buffer: usize, batch_size: usize, flush_interval: Duration) -> Self {
		Self::spawn(Arc::new(CacheHitSink(store)), buffer, batch_size, flush_interval)
	}

	/// An aggregator with no real store behind it; used where a collaborator
	/// needs a `UsageAggregator` but the test doesn't care about flushing.
	pub fn new_detached() -> Self {
		Self::requests(
			Arc::new(crate::store::embedded::EmbeddedStore::in_memory()),
			1024,
			100,
			Duration::from_secs(5),
		)
	}

	fn spawn(sink: Arc<dyn UsageSink>, buffer: usize, batch_size: usize, flush_interval: Duration) -> Self {
		let (tx, rx) = mpsc::channel(buffer);
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let (done_tx, done_rx) = oneshot::channel();
		let dropped = Arc::new(AtomicU64::new(0));

		tokio::spawn(run(rx, shutdown_rx, sink, batch_size, flush_interval, done_tx));

		UsageAggregator {
			tx,
			shutdown_tx,
			dropped,
			done_rx: Mutex::new(Some(done_rx)),
		}
	}

	/// Enqueues one usage event for `token`. Never blocks; silently dropped
	/// if the buffer is saturated.
	pub fn record(&self, token: String) {
		if self.tx.try_send(token).is_err() {
			self.dropped.fetch_add(1, Ordering::Relaxed);
			tracing::debug!("usage aggregator buffer full, dropping event");
		}
	}

	pub fn dropped_count(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}

	/// Signals the background task to drain whatever is already queued,
	/// flush once, and stop; waits up to `timeout` for it to finish.
	pub async fn shutdown(&self, timeout: Duration) {
		let _ = self.shutdown_tx.send(true);
		let done_rx = self.done_rx.lock().take();
		if let Some(done_rx) = done_rx {
			let _ = tokio::time::timeout(timeout, done_rx).await;
		}
	}
}

async fn run(
	mut rx: mpsc::Receiver<String>,
	mut shutdown_rx: watch::Receiver<bool>,
	sink: Arc<dyn UsageSink>,
	batch_size: usize,
	flush_interval: Duration,
	done_tx: oneshot::Sender<()>,
) {
	let mut acc: HashMap<String, u64> = HashMap::new();
	let mut ticker = tokio::time::interval(flush_interval);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			maybe_token = rx.recv() => {
				match maybe_token {
					Some(token) => {
						*acc.entry(token).or_insert(0) += 1;
						if acc.len() >= batch_size {
							flush(&sink, &mut acc).await;
						}
					}
					None => break,
				}
			}
			_ = ticker.tick() => {
				if !acc.is_empty() {
					flush(&sink, &mut acc).await;
				}
			}
			_ = shutdown_rx.changed() => {
				if *shutdown_rx.borrow() {
					while let Ok(token) = rx.try_recv() {
						*acc.entry(token).or_insert(0) += 1;
					}
					flush(&sink, &mut acc).await;
					break;
				}
			}
		}
	}
	let _ = done_tx.send(());
}

async fn flush(sink: &Arc<dyn UsageSink>, acc: &mut HashMap<String, u64>) {
	let deltas: Vec<(String, u64)> = acc.drain().collect();
	if let Err(e) = sink.flush(deltas).await {
		tracing::warn!(error = %e, "usage aggregator flush failed, batch discarded");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::embedded::EmbeddedStore;
	use crate::store::model::Token;
	use crate::store::{Project, ProjectStore};

	#[tokio::test(start_paused = true)]
	async fn flushes_on_timer() {
		let store = Arc::new(EmbeddedStore::in_memory());
		let project = Project::new("acme".into(), "key".into());
		ProjectStore::create(store.as_ref(), project.clone()).await.unwrap();
		let token = Token::new(project.id, None, None);
		TokenStore::create(store.as_ref(), token.clone()).await.unwrap();

		let agg = UsageAggregator::requests(store.clone(), 16, 100, Duration::from_millis(50));
		agg.record(token.token.clone());
		agg.record(token.token.clone());

		tokio::time::advance(Duration::from_millis(100)).await;
		tokio::task::yield_now().await;
		tokio::time::advance(Duration::from_millis(100)).await;
		tokio::task::yield_now().await;

		let fetched = store.get_by_token(&token.token).await.unwrap();
		assert_eq!(fetched.request_count, 2);
	}

	#[tokio::test]
	async fn shutdown_flushes_remaining_events() {
		let store = Arc::new(EmbeddedStore::in_memory());
		let project = Project::new("acme".into(), "key".into());
		ProjectStore::create(store.as_ref(), project.clone()).await.unwrap();
		let token = Token::new(project.id, None, None);
		TokenStore::create(store.as_ref(), token.clone()).await.unwrap();

		let agg = UsageAggregator::requests(store.clone(), 16, 100, Duration::from_secs(60));
		agg.record(token.token.clone());
		agg.shutdown(Duration::from_secs(1)).await;

		let fetched = store.get_by_token(&token.token).await.unwrap();
		assert_eq!(fetched.request_count, 1);
	}
}
