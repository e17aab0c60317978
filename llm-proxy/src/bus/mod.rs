//! C7: event bus with an in-memory (single-process) and a durable,
//! stream-backed (consumer-group, at-least-once) implementation behind
//! one contract.

pub mod memory;
pub mod model;
pub mod stream;

use std::time::Duration;

use async_trait::async_trait;

pub use model::Event;

pub type EntryId = u64;

#[async_trait]
pub trait EventBus: Send + Sync {
	/// Non-blocking: may drop on overflow (in-memory) or return a
	/// transient error (stream backend under write pressure).
	async fn publish(&self, event: Event) -> anyhow::Result<()>;

	/// Reads up to `max` pending entries for `(group, consumer)`. A given
	/// group name sees every published event (fan-out); multiple distinct
	/// consumer names sharing one group split the events between them
	/// (load-balancing).
	async fn subscribe(&self, group: &str, consumer: &str, max: usize) -> anyhow::Result<Vec<(EntryId, Event)>>;

	async fn ack(&self, group: &str, id: EntryId) -> anyhow::Result<()>;

	/// Reassigns entries delivered to `group` more than `min_idle` ago and
	/// never acknowledged, to `consumer`.
	async fn claim_stalled(&self, group: &str, consumer: &str, min_idle: Duration) -> anyhow::Result<Vec<(EntryId, Event)>>;
}
