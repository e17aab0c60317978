//! Durable, consumer-group bus: events are appended to a shared log with
//! an approximate server-side length cap; each consumer group tracks its
//! own delivery cursor and a pending-entries list so `claim_stalled` can
//! reassign work whose consumer went quiet.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{EntryId, Event, EventBus};

struct PendingEntry {
	consumer: String,
	delivered_at: Instant,
}

#[derive(Default)]
struct GroupState {
	cursor: EntryId,
	pending: HashMap<EntryId, PendingEntry>,
}

pub struct StreamBus {
	log: Mutex<VecDeque<(EntryId, Event)>>,
	groups: Mutex<HashMap<String, GroupState>>,
	next_id: AtomicU64,
	max_length: usize,
}

impl StreamBus {
	pub fn new(max_length: usize) -> Self {
		StreamBus {
			log: Mutex::new(VecDeque::new()),
			groups: Mutex::new(HashMap::new()),
			next_id: AtomicU64::new(1),
			max_length,
		}
	}
}

#[async_trait]
impl EventBus for StreamBus {
	async fn publish(&self, event: Event) -> anyhow::Result<()> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let mut log = self.log.lock();
		log.push_back((id, event));
		while log.len() > self.max_length {
			log.pop_front();
		}
		Ok(())
	}

	async fn subscribe(&self, group: &str, consumer: &str, max: usize) -> anyhow::Result<Vec<(EntryId, Event)>> {
		let log = self.log.lock();
		let mut groups = self.groups.lock();
		let state = groups.entry(group.to_string()).or_default();

		let mut out = Vec::new();
		for (id, event) in log.iter() {
			if out.len() >= max {
				break;
			}
			if *id > state.cursor {
				state.cursor = *id;
				state.pending.insert(
					*id,
					PendingEntry {
						consumer: consumer.to_string(),
						delivered_at: Instant::now(),
					},
				);
				out.push((*id, event.clone()));
			}
		}
		Ok(out)
	}

	async fn ack(&self, group: &str, id: EntryId) -> anyhow::Result<()> {
		if let Some(state) = self.groups.lock().get_mut(group) {
			state.pending.remove(&id);
		}
		Ok(())
	}

	async fn claim_stalled(&self, group: &str, consumer: &str, min_idle: Duration) -> anyhow::Result<Vec<(EntryId, Event)>> {
		let log = self.log.lock();
		let mut groups = self.groups.lock();
		let Some(state) = groups.get_mut(group) else {
			return Ok(Vec::new());
		};

		let now = Instant::now();
		let stalled: Vec<EntryId> = state
			.pending
			.iter()
			.filter(|(_, p)| now.duration_since(p.delivered_at) >= min_idle)
			.map(|(id, _)| *id)
			.collect();

		let mut out = Vec::new();
		for id in stalled {
			match log.iter().find(|(entry_id, _)| *entry_id == id) {
				Some((_, event)) => {
					state.pending.insert(
						id,
						PendingEntry {
							consumer: consumer.to_string(),
							delivered_at: now,
						},
					);
					out.push((id, event.clone()));
				}
				// The entry aged out of the log under the length cap
				// before anyone claimed it; nothing left to reassign.
				None => {
					state.pending.remove(&id);
				}
			}
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;

	fn event(id: &str) -> Event {
		Event {
			request_id: id.to_string(),
			correlation_id: None,
			project_id: None,
			token_id: None,
			method: "GET".into(),
			path: "/v1/models".into(),
			status: 200,
			received_at: Utc::now(),
			first_response_at: None,
			final_response_at: None,
			duration_ms: 5,
			request_headers: vec![],
			response_headers: vec![],
			request_body: vec![],
			response_body: vec![],
			content_encoding_hint: None,
		}
	}

	#[tokio::test]
	async fn unacked_entries_are_claimable_after_idle_threshold() {
		let bus = StreamBus::new(1000);
		bus.publish(event("r1")).await.unwrap();
		let delivered = bus.subscribe("dispatchers", "worker-1", 10).await.unwrap();
		assert_eq!(delivered.len(), 1);

		let claimed = bus.claim_stalled("dispatchers", "worker-2", Duration::from_secs(0)).await.unwrap();
		assert_eq!(claimed.len(), 1);
		assert_eq!(claimed[0].1.request_id, "r1");
	}

	#[tokio::test]
	async fn ack_removes_from_pending_so_it_is_never_claimed() {
		let bus = StreamBus::new(1000);
		bus.publish(event("r1")).await.unwrap();
		let delivered = bus.subscribe("dispatchers", "worker-1", 10).await.unwrap();
		bus.ack("dispatchers", delivered[0].0).await.unwrap();

		let claimed = bus.claim_stalled("dispatchers", "worker-2", Duration::from_secs(0)).await.unwrap();
		assert!(claimed.is_empty());
	}

	#[tokio::test]
	async fn length_cap_trims_oldest_entries() {
		let bus = StreamBus::new(2);
		bus.publish(event("r1")).await.unwrap();
		bus.publish(event("r2")).await.unwrap();
		bus.publish(event("r3")).await.unwrap();
		let delivered = bus.subscribe("g", "c1", 10).await.unwrap();
		assert_eq!(delivered.len(), 2);
		assert_eq!(delivered[0].1.request_id, "r2");
	}
}
