//! C8: subscribes to the event bus, batches, transforms, and ships
//! records to a configured egress plugin with retry and at-least-once
//! delivery within a process.

pub mod plugin;
pub mod plugins;
pub mod transform;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::bus::{EntryId, EventBus};
use plugin::{DispatcherPlugin, PluginError};
use proxy_core::drain::DrainWatcher;
use transform::Transformer;

pub struct Dispatcher {
	bus: Arc<dyn EventBus>,
	group: String,
	consumer: String,
	plugin: Arc<dyn DispatcherPlugin>,
	transformer: Arc<dyn Transformer>,
	batch_size: usize,
	flush_interval: Duration,
	/// How long an entry may sit unacked before `claim_stalled` reassigns
	/// it to this consumer, and how often that reclaim is polled.
	claim_time: Duration,
	max_attempts: u32,
	/// Ids already shipped this process lifetime, so a `claim_stalled`
	/// re-delivery of an entry whose ack raced a crash doesn't get sent
	/// twice within the same session. Unbounded growth is acceptable: the
	/// set only needs to outlive one dispatcher process.
	sent_ids: Mutex<HashSet<EntryId>>,
	dropped_permanent: std::sync::atomic::AtomicU64,
}

impl Dispatcher {
	pub fn new(
		bus: Arc<dyn EventBus>,
		group: String,
		consumer: String,
		plugin: Arc<dyn DispatcherPlugin>,
		transformer: Arc<dyn Transformer>,
		batch_size: usize,
		flush_interval: Duration,
		claim_time: Duration,
		max_attempts: u32,
	) -> Self {
		Dispatcher {
			bus,
			group,
			consumer,
			plugin,
			transformer,
			batch_size,
			flush_interval,
			claim_time,
			max_attempts,
			sent_ids: Mutex::new(HashSet::new()),
			dropped_permanent: std::sync::atomic::AtomicU64::new(0),
		}
	}

	pub fn dropped_permanent_count(&self) -> u64 {
		self.dropped_permanent.load(std::sync::atomic::Ordering::Relaxed)
	}

	/// Runs until `drain` signals shutdown, then flushes whatever is
	/// currently buffered once more before returning.
	pub async fn run(self: Arc<Self>, drain: DrainWatcher) {
		if let Err(e) = self.plugin.init().await {
			tracing::error!(error = %e, "dispatcher plugin init failed");
			return;
		}
		let mut ticker = tokio::time::interval(self.flush_interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		let mut claim_ticker = tokio::time::interval(self.claim_time);
		claim_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = ticker.tick() => {
					self.drain_one_batch(&drain).await;
				}
				_ = claim_ticker.tick() => {
					self.claim_stalled_batch().await;
				}
				_ = drain.signaled() => {
					self.drain_one_batch(&drain).await;
					break;
				}
			}
		}
		let _ = self.plugin.close().await;
	}

	/// Reassigns any entry idle longer than `claim_time` to this consumer
	/// and ships it, recovering work left behind by a consumer that died
	/// mid-batch.
	async fn claim_stalled_batch(&self) {
		let claimed = match self.bus.claim_stalled(&self.group, &self.consumer, self.claim_time).await {
			Ok(c) => c,
			Err(e) => {
				tracing::warn!(error = %e, "dispatcher claim_stalled failed");
				return;
			}
		};
		if claimed.is_empty() {
			return;
		}
		tracing::info!(count = claimed.len(), "reclaimed stalled entries");
		self.ship_batch(claimed).await;
	}

	async fn drain_one_batch(&self, drain: &DrainWatcher) {
		let batch = match self.bus.subscribe(&self.group, &self.consumer, self.batch_size).await {
			Ok(b) => b,
			Err(e) => {
				tracing::warn!(error = %e, "dispatcher subscribe failed");
				return;
			}
		};
		if batch.is_empty() {
			return;
		}
		self.ship_batch_with_drain(batch, Some(drain)).await;
	}

	async fn ship_batch(&self, batch: Vec<(EntryId, crate::bus::Event)>) {
		self.ship_batch_with_drain(batch, None).await;
	}

	async fn ship_batch_with_drain(&self, batch: Vec<(EntryId, crate::bus::Event)>, drain: Option<&DrainWatcher>) {
		let fresh: Vec<_> = {
			let mut sent = self.sent_ids.lock();
			batch.into_iter().filter(|(id, _)| sent.insert(*id)).collect()
		};
		if fresh.is_empty() {
			return;
		}

		let ids: Vec<EntryId> = fresh.iter().map(|(id, _)| *id).collect();
		let events: Vec<_> = fresh.into_iter().map(|(_, e)| e).collect();
		let records = self.transformer.transform(&events);

		match self.send_with_retry(&records, drain).await {
			SendOutcome::Acked => {
				for id in ids {
					let _ = self.bus.ack(&self.group, id).await;
				}
			}
			SendOutcome::PermanentlyDropped => {
				self.dropped_permanent.fetch_add(ids.len() as u64, std::sync::atomic::Ordering::Relaxed);
				for id in ids {
					let _ = self.bus.ack(&self.group, id).await;
				}
			}
			SendOutcome::CanceledDuringRetry => {
				// Leave unacked; a future `claim_stalled` call picks these
				// back up once the idle threshold passes.
			}
		}
	}

	async fn send_with_retry(&self, records: &[serde_json::Value], drain: Option<&DrainWatcher>) -> SendOutcome {
		let mut attempt = 0u32;
		loop {
			attempt += 1;
			let drain_signal = async {
				match drain {
					Some(d) => d.signaled().await,
					// `claim_stalled`'s own reclaim batches aren't part of
					// the shutdown drain path; they just retry to exhaustion.
					None => std::future::pending::<()>().await,
				}
			};
			tokio::select! {
				result = self.plugin.send(records) => {
					match result {
						Ok(()) => return SendOutcome::Acked,
						Err(PluginError::Permanent(msg)) => {
							tracing::warn!(error = %msg, "dispatcher plugin permanently rejected batch, dropping");
							return SendOutcome::PermanentlyDropped;
						}
						Err(PluginError::Transient(msg)) => {
							if attempt >= self.max_attempts {
								tracing::warn!(error = %msg, attempts = attempt, "dispatcher exhausted retries, leaving batch unacked");
								return SendOutcome::CanceledDuringRetry;
							}
							let backoff = Duration::from_millis(100 * 2u64.saturating_pow(attempt.min(10)));
							tokio::time::sleep(backoff).await;
						}
					}
				}
				_ = drain_signal => {
					return SendOutcome::CanceledDuringRetry;
				}
			}
		}
	}
}

enum SendOutcome {
	Acked,
	PermanentlyDropped,
	CanceledDuringRetry,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bus::memory::MemoryBus;
	use crate::bus::Event;
	use crate::dispatcher::plugin::DispatcherPlugin;
	use crate::dispatcher::transform::IdentityTransformer;
	use async_trait::async_trait;
	use chrono::Utc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct CountingPlugin {
		calls: Arc<AtomicUsize>,
		fail_times: usize,
	}

	#[async_trait]
	impl DispatcherPlugin for CountingPlugin {
		async fn send(&self, _records: &[serde_json::Value]) -> Result<(), PluginError> {
			let n = self.calls.fetch_add(1, Ordering::SeqCst);
			if n < self.fail_times {
				Err(PluginError::Transient("not yet".into()))
			} else {
				Ok(())
			}
		}
	}

	fn event() -> Event {
		Event {
			request_id: "r1".into(),
			correlation_id: None,
			project_id: None,
			token_id: None,
			method: "GET".into(),
			path: "/v1/models".into(),
			status: 200,
			received_at: Utc::now(),
			first_response_at: None,
			final_response_at: None,
			duration_ms: 1,
			request_headers: vec![],
			response_headers: vec![],
			request_body: vec![],
			response_body: vec![],
			content_encoding_hint: None,
		}
	}

	#[tokio::test]
	async fn retries_transient_failures_then_acks() {
		let bus = Arc::new(MemoryBus::new(16));
		bus.subscribe("dispatchers", "c1", 0).await.unwrap();
		bus.publish(event()).await.unwrap();

		let calls = Arc::new(AtomicUsize::new(0));
		let plugin = Arc::new(CountingPlugin { calls: calls.clone(), fail_times: 2 });
		let dispatcher = Dispatcher::new(
			bus.clone(),
			"dispatchers".into(),
			"c1".into(),
			plugin,
			Arc::new(IdentityTransformer),
			100,
			Duration::from_secs(5),
			Duration::from_secs(30),
			5,
		);

		let (_trigger, watcher) = proxy_core::drain::new();
		dispatcher.drain_one_batch(&watcher).await;
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn claim_stalled_batch_redelivers_and_ships_abandoned_entries() {
		use crate::bus::stream::StreamBus;

		let bus = Arc::new(StreamBus::new(1000));
		bus.publish(event()).await.unwrap();
		// A consumer that received the entry but crashed before acking.
		bus.subscribe("dispatchers", "dead-consumer", 10).await.unwrap();

		let calls = Arc::new(AtomicUsize::new(0));
		let plugin = Arc::new(CountingPlugin { calls: calls.clone(), fail_times: 0 });
		let dispatcher = Dispatcher::new(
			bus.clone(),
			"dispatchers".into(),
			"c1".into(),
			plugin,
			Arc::new(IdentityTransformer),
			100,
			Duration::from_secs(5),
			Duration::from_secs(0),
			5,
		);

		dispatcher.claim_stalled_batch().await;
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}
}
