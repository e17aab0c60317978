use async_trait::async_trait;
use serde_json::Value;

use crate::dispatcher::plugin::{DispatcherPlugin, PluginError};

/// POSTs a batch of run-ingest-schema records (token-usage fields) to a
/// configured HTTP egress endpoint.
pub struct RunIngestPlugin {
	client: reqwest::Client,
	endpoint: String,
	api_key: Option<String>,
}

impl RunIngestPlugin {
	pub fn new(client: reqwest::Client, endpoint: String, api_key: Option<String>) -> Self {
		RunIngestPlugin { client, endpoint, api_key }
	}
}

#[async_trait]
impl DispatcherPlugin for RunIngestPlugin {
	async fn send(&self, records: &[Value]) -> Result<(), PluginError> {
		let mut req = self.client.post(&self.endpoint).json(&serde_json::json!({ "records": records }));
		if let Some(key) = &self.api_key {
			req = req.bearer_auth(key);
		}
		let resp = req.send().await.map_err(|e| PluginError::Transient(e.to_string()))?;
		let status = resp.status();
		if status.is_success() {
			Ok(())
		} else if status.is_client_error() {
			Err(PluginError::Permanent(format!("run-ingest endpoint rejected batch: {status}")))
		} else {
			Err(PluginError::Transient(format!("run-ingest endpoint error: {status}")))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	#[tokio::test]
	async fn success_response_is_ok() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/ingest"))
			.respond_with(ResponseTemplate::new(200))
			.mount(&server)
			.await;

		let plugin = RunIngestPlugin::new(reqwest::Client::new(), format!("{}/ingest", server.uri()), None);
		plugin.send(&[serde_json::json!({"requestId": "r1"})]).await.unwrap();
	}

	#[tokio::test]
	async fn client_error_is_permanent() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/ingest"))
			.respond_with(ResponseTemplate::new(400))
			.mount(&server)
			.await;

		let plugin = RunIngestPlugin::new(reqwest::Client::new(), format!("{}/ingest", server.uri()), None);
		let err = plugin.send(&[serde_json::json!({"requestId": "r1"})]).await.unwrap_err();
		assert!(matches!(err, PluginError::Permanent(_)));
	}

	#[tokio::test]
	async fn server_error_is_transient() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/ingest"))
			.respond_with(ResponseTemplate::new(500))
			.mount(&server)
			.await;

		let plugin = RunIngestPlugin::new(reqwest::Client::new(), format!("{}/ingest", server.uri()), None);
		let err = plugin.send(&[serde_json::json!({"requestId": "r1"})]).await.unwrap_err();
		assert!(matches!(err, PluginError::Transient(_)));
	}
}
