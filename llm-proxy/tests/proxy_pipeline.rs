//! End-to-end coverage of the proxy pipeline against a mocked upstream:
//! cache hit/miss, conditional revalidation, and the streaming capture cap.
//! Each test builds its own `AppState` against its own `wiremock` server so
//! they can run concurrently without sharing cache/store state.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use llm_proxy::app::{self, AppState};
use llm_proxy::config::parse_config;
use llm_proxy::store::{Project, ProjectStore, Token, TokenStore};
use proxy_core::readiness::Ready;

const PEER: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 51000);

async fn test_state(target_base_url: &str, extra_yaml: &str) -> Arc<AppState> {
	let yaml = format!("target_base_url: \"{target_base_url}\"\naudit_enabled: false\n{extra_yaml}");
	let config = Arc::new(parse_config(&yaml).unwrap());
	app::build_state(config, Ready::new()).await.unwrap()
}

async fn authorized_token(state: &AppState) -> String {
	let project = state.project_store.create(Project::new("acme".into(), "sk-upstream-key".into())).await.unwrap();
	let token = state.token_store.create(Token::new(project.id, None, None)).await.unwrap();
	token.token
}

fn get(uri: &str, token: &str, request_cache_control: Option<&str>) -> Request<Body> {
	let mut builder = Request::builder().method("GET").uri(uri).header("authorization", format!("Bearer {token}"));
	if let Some(cc) = request_cache_control {
		builder = builder.header("cache-control", cc);
	}
	let mut req = builder.body(Body::empty()).unwrap();
	req.extensions_mut().insert(ConnectInfo(PEER));
	req
}

#[tokio::test]
async fn second_request_is_served_from_cache_without_a_second_upstream_call() {
	let upstream = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/v1/models"))
		.respond_with(ResponseTemplate::new(200).insert_header("cache-control", "public, max-age=60").set_body_json(serde_json::json!({ "data": [] })))
		.expect(1)
		.mount(&upstream)
		.await;

	let state = test_state(&upstream.uri(), "").await;
	let token = authorized_token(&state).await;
	let router = app::router(state);

	let first = router.clone().oneshot(get("/v1/models", &token, None)).await.unwrap();
	assert_eq!(first.status(), StatusCode::OK);
	assert_eq!(first.headers().get("cache-status").unwrap(), "stored");

	let second = router.oneshot(get("/v1/models", &token, None)).await.unwrap();
	assert_eq!(second.status(), StatusCode::OK);
	assert_eq!(second.headers().get("cache-status").unwrap(), "hit");
}

#[tokio::test]
async fn no_store_response_is_never_cached() {
	let upstream = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/v1/models"))
		.respond_with(ResponseTemplate::new(200).insert_header("cache-control", "no-store").set_body_json(serde_json::json!({ "data": [] })))
		.expect(2)
		.mount(&upstream)
		.await;

	let state = test_state(&upstream.uri(), "").await;
	let token = authorized_token(&state).await;
	let router = app::router(state);

	let first = router.clone().oneshot(get("/v1/models", &token, None)).await.unwrap();
	assert_eq!(first.headers().get("cache-status").unwrap(), "bypass");

	let second = router.oneshot(get("/v1/models", &token, None)).await.unwrap();
	assert_eq!(second.headers().get("cache-status").unwrap(), "bypass");
}

#[tokio::test]
async fn client_no_cache_triggers_conditional_revalidation_against_upstream() {
	let upstream = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/v1/models"))
		.respond_with(
			ResponseTemplate::new(200)
				.insert_header("cache-control", "public, max-age=60")
				.insert_header("etag", "\"v1\"")
				.set_body_json(serde_json::json!({ "data": [] })),
		)
		.expect(1)
		.mount(&upstream)
		.await;
	Mock::given(method("GET"))
		.and(path("/v1/models"))
		.and(header("if-none-match", "\"v1\""))
		.respond_with(ResponseTemplate::new(304).insert_header("cache-control", "public, max-age=60"))
		.with_priority(1)
		.expect(1)
		.mount(&upstream)
		.await;

	let state = test_state(&upstream.uri(), "").await;
	let token = authorized_token(&state).await;
	let router = app::router(state);

	let first = router.clone().oneshot(get("/v1/models", &token, None)).await.unwrap();
	assert_eq!(first.headers().get("cache-status").unwrap(), "stored");

	let revalidated = router.oneshot(get("/v1/models", &token, Some("no-cache"))).await.unwrap();
	assert_eq!(revalidated.status(), StatusCode::OK);
	assert_eq!(revalidated.headers().get("cache-status").unwrap(), "conditional-hit");
}

#[tokio::test]
async fn streaming_response_forwards_unmodified_and_skips_the_cache_when_over_the_capture_cap() {
	let upstream = MockServer::start().await;
	let body = "data: ".to_string() + &"x".repeat(64) + "\n\n";
	Mock::given(method("GET"))
		.and(path("/v1/chat/stream"))
		.respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/event-stream").set_body_raw(body.clone(), "text/event-stream"))
		.expect(2)
		.mount(&upstream)
		.await;

	// A capture cap far smaller than the body forces the cache store to be
	// skipped without affecting what reaches the client.
	let state = test_state(&upstream.uri(), "cache_max_object_bytes: 16\n").await;
	let token = authorized_token(&state).await;
	let router = app::router(state);

	let first = router.clone().oneshot(get("/v1/chat/stream", &token, None)).await.unwrap();
	assert_eq!(first.status(), StatusCode::OK);
	assert_eq!(first.headers().get("cache-status").unwrap(), "miss");
	let received = first.into_body().collect().await.unwrap().to_bytes();
	assert_eq!(received, body.as_bytes());

	// The overflowed capture never produced a cache entry, so the second
	// request is still a miss instead of a hit.
	let second = router.oneshot(get("/v1/chat/stream", &token, None)).await.unwrap();
	assert_eq!(second.headers().get("cache-status").unwrap(), "miss");
}
