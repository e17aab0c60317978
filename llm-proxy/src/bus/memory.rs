//! Single-process, non-durable bus. Each group name added via `subscribe`
//! starts receiving every event published from that point on; an
//! at-capacity group's queue drops its oldest entry to admit the newest
//! (bounded memory, no backpressure on publishers).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{EntryId, Event, EventBus};

pub struct MemoryBus {
	buffer_size: usize,
	groups: Mutex<HashMap<String, VecDeque<(EntryId, Event)>>>,
	next_id: AtomicU64,
	dropped: AtomicU64,
}

impl MemoryBus {
	pub fn new(buffer_size: usize) -> Self {
		MemoryBus {
			buffer_size,
			groups: Mutex::new(HashMap::new()),
			next_id: AtomicU64::new(1),
			dropped: AtomicU64::new(0),
		}
	}

	pub fn dropped_count(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}
}

#[async_trait]
impl EventBus for MemoryBus {
	async fn publish(&self, event: Event) -> anyhow::Result<()> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let mut groups = self.groups.lock();
		for queue in groups.values_mut() {
			if queue.len() >= self.buffer_size {
				queue.pop_front();
				self.dropped.fetch_add(1, Ordering::Relaxed);
			}
			queue.push_back((id, event.clone()));
		}
		Ok(())
	}

	async fn subscribe(&self, group: &str, _consumer: &str, max: usize) -> anyhow::Result<Vec<(EntryId, Event)>> {
		let mut groups = self.groups.lock();
		let queue = groups.entry(group.to_string()).or_default();
		let mut out = Vec::with_capacity(max.min(queue.len()));
		for _ in 0..max {
			match queue.pop_front() {
				Some(item) => out.push(item),
				None => break,
			}
		}
		Ok(out)
	}

	async fn ack(&self, _group: &str, _id: EntryId) -> anyhow::Result<()> {
		// Entries leave the queue as soon as they're delivered; there is
		// nothing left to acknowledge in the non-durable variant.
		Ok(())
	}

	async fn claim_stalled(&self, _group: &str, _consumer: &str, _min_idle: Duration) -> anyhow::Result<Vec<(EntryId, Event)>> {
		Ok(Vec::new())
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
	async fn distinct_groups_each_see_every_event() {
		let bus = MemoryBus::new(16);
		bus.subscribe("g1", "c1", 0).await.unwrap();
		bus.subscribe("g2", "c1", 0).await.unwrap();
		bus.publish(event("r1")).await.unwrap();

		let g1 = bus.subscribe("g1", "c1", 10).await.unwrap();
		let g2 = bus.subscribe("g2", "c1", 10).await.unwrap();
		assert_eq!(g1.len(), 1);
		assert_eq!(g2.len(), 1);
	}

	#[tokio::test]
	async fn shared_group_load_balances_across_subscribe_calls() {
		let bus = MemoryBus::new(16);
		bus.subscribe("g", "c1", 0).await.unwrap();
		bus.publish(event("r1")).await.unwrap();
		bus.publish(event("r2")).await.unwrap();

		let first = bus.subscribe("g", "c1", 1).await.unwrap();
		let second = bus.subscribe("g", "c2", 1).await.unwrap();
		assert_eq!(first.len(), 1);
		assert_eq!(second.len(), 1);
		assert_ne!(first[0].1.request_id, second[0].1.request_id);
	}

	#[tokio::test]
	async fn overflow_drops_oldest() {
		let bus = MemoryBus::new(1);
		bus.subscribe("g", "c1", 0).await.unwrap();
		bus.publish(event("r1")).await.unwrap();
		bus.publish(event("r2")).await.unwrap();
		let got = bus.subscribe("g", "c1", 10).await.unwrap();
		assert_eq!(got.len(), 1);
		assert_eq!(got[0].1.request_id, "r2");
		assert_eq!(bus.dropped_count(), 1);
	}
}
