use async_trait::async_trait;
use serde_json::Value;

use crate::dispatcher::plugin::{DispatcherPlugin, PluginError};

/// POSTs a batch of manual-log-schema records (`providerRequest` /
/// `providerResponse` / `timing`) to a configured HTTP egress endpoint.
pub struct ManualLogPlugin {
	client: reqwest::Client,
	endpoint: String,
	api_key: Option<String>,
}

impl ManualLogPlugin {
	pub fn new(client: reqwest::Client, endpoint: String, api_key: Option<String>) -> Self {
		ManualLogPlugin { client, endpoint, api_key }
	}
}

#[async_trait]
impl DispatcherPlugin for ManualLogPlugin {
	async fn send(&self, records: &[Value]) -> Result<(), PluginError> {
		let mut req = self.client.post(&self.endpoint).json(&serde_json::json!({ "logs": records }));
		if let Some(key) = &self.api_key {
			req = req.bearer_auth(key);
		}
		let resp = req.send().await.map_err(|e| PluginError::Transient(e.to_string()))?;
		let status = resp.status();
		if status.is_success() {
			Ok(())
		} else if status.is_client_error() {
			Err(PluginError::Permanent(format!("manual-log endpoint rejected batch: {status}")))
		} else {
			Err(PluginError::Transient(format!("manual-log endpoint error: {status}")))
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
			.and(path("/manual-log"))
			.respond_with(ResponseTemplate::new(202))
			.mount(&server)
			.await;

		let plugin = ManualLogPlugin::new(reqwest::Client::new(), format!("{}/manual-log", server.uri()), Some("key".into()));
		plugin.send(&[serde_json::json!({"requestId": "r1"})]).await.unwrap();
	}
}
