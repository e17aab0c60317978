use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::dispatcher::plugin::{DispatcherPlugin, PluginError};

/// Appends each record as one JSON line to a file. Used for local
/// development and for deployments that ship logs out via a sidecar
/// rather than an HTTP egress.
pub struct FilePlugin {
	path: PathBuf,
	lock: Mutex<()>,
}

impl FilePlugin {
	pub fn new(path: PathBuf) -> Self {
		FilePlugin { path, lock: Mutex::new(()) }
	}
}

#[async_trait]
impl DispatcherPlugin for FilePlugin {
	async fn send(&self, records: &[Value]) -> Result<(), PluginError> {
		let _guard = self.lock.lock().await;
		let mut file = tokio::fs::OpenOptions::new()
			.create(true)
			.append(true)
			.open(&self.path)
			.await
			.map_err(|e| PluginError::Transient(e.to_string()))?;
		for record in records {
			let mut line = serde_json::to_vec(record).map_err(|e| PluginError::Permanent(e.to_string()))?;
			line.push(b'\n');
			file.write_all(&line).await.map_err(|e| PluginError::Transient(e.to_string()))?;
		}
		file.flush().await.map_err(|e| PluginError::Transient(e.to_string()))?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn appends_one_line_per_record() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("events.jsonl");
		let plugin = FilePlugin::new(path.clone());
		plugin.send(&[serde_json::json!({"a": 1}), serde_json::json!({"a": 2})]).await.unwrap();
		let contents = tokio::fs::read_to_string(&path).await.unwrap();
		assert_eq!(contents.lines().count(), 2);
	}
}
