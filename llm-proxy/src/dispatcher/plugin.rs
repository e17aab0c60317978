use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
	/// Worth retrying with backoff.
	#[error("transient backend error: {0}")]
	Transient(String),
	/// The plugin itself judged this batch unsendable (e.g. a 4xx from the
	/// egress endpoint). Retrying would never succeed; the dispatcher drops
	/// and acks the batch instead of looping forever.
	#[error("permanent backend error: {0}")]
	Permanent(String),
}

#[async_trait]
pub trait DispatcherPlugin: Send + Sync {
	async fn init(&self) -> anyhow::Result<()> {
		Ok(())
	}

	async fn send(&self, records: &[Value]) -> Result<(), PluginError>;

	async fn close(&self) -> anyhow::Result<()> {
		Ok(())
	}
}
