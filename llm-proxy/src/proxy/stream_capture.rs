//! Tees a streaming upstream response body to the client while capturing
//! a size-capped copy for the HTTP cache (C5) and observability (C10).
//! Bytes reach the client unmodified and at full speed; the capture
//! buffers are only consulted once the body has fully streamed (or
//! errored out), in a spawned task, so cache/event I/O never delays a
//! byte already queued for the client. A client disconnect that drops
//! the stream before end-of-stream simply never finalizes, discarding
//! whatever was captured so far.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::Stream;

use crate::app::AppState;
use crate::httpcache::CacheEntry;
use crate::httpcache::capture::CaptureBuffer;
use crate::httpcache::key::cache_key_with_vary;
use crate::httpcache::policy::{StoreDecision, decide_store};
use crate::observability::{RequestCapture, ResponseCapture, build_event};

/// Everything needed, once the body is fully known, to decide whether to
/// store a cache entry and to emit the observability event.
pub struct StreamFinalizer {
	pub state: Arc<AppState>,
	pub cache_enabled_for_store: bool,
	pub base_key: String,
	pub vary_header: String,
	pub request_cache_control: Option<String>,
	pub response_cache_control: Option<String>,
	pub response_header_pairs: Vec<(String, String)>,
	pub status: u16,
	pub request_header_pairs: Vec<(String, String)>,
	pub observability_enabled: bool,
	pub request_capture: RequestCapture,
	pub request_body_capture: CaptureBuffer,
	pub first_response_at: DateTime<Utc>,
	pub content_encoding_hint: Option<String>,
}

impl StreamFinalizer {
	async fn finish(self, cache_capture: CaptureBuffer, observability_capture: CaptureBuffer) {
		let final_response_at = Utc::now();

		if self.cache_enabled_for_store {
			if let Some(body) = cache_capture.into_bytes() {
				match decide_store(
					self.status,
					self.response_cache_control.as_deref(),
					self.request_cache_control.as_deref(),
					body.len(),
					self.state.config.cache.max_object_bytes,
				) {
					StoreDecision::Store { ttl, .. } => {
						let key_to_store = cache_key_with_vary(&self.base_key, &self.vary_header, &self.request_header_pairs);
						let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
						let entry = CacheEntry {
							key: key_to_store.clone(),
							status: self.status,
							headers: self.response_header_pairs.clone(),
							body,
							expires_at,
							vary: self.vary_header.clone(),
						};
						if self.state.http_cache.set(entry).await.is_ok() {
							if key_to_store != self.base_key {
								// Vary index marker, same convention as the
								// non-streaming store path.
								let marker = CacheEntry {
									key: self.base_key.clone(),
									status: 0,
									headers: Vec::new(),
									body: Vec::new(),
									expires_at,
									vary: self.vary_header.clone(),
								};
								let _ = self.state.http_cache.set(marker).await;
							}
							self.state.metrics.cache_stores_total.inc();
						}
					}
					StoreDecision::DoNotStore => {
						self.state.metrics.cache_bypass_total.inc();
					}
				}
			}
			// Capture overflowed the cache cap: never store (spec's
			// streaming-capture-cap scenario).
		}

		if self.observability_enabled {
			let event = build_event(
				self.request_capture,
				ResponseCapture {
					status: self.status,
					first_response_at: Some(self.first_response_at),
					final_response_at,
					response_headers: self.response_header_pairs,
					content_encoding_hint: self.content_encoding_hint,
				},
				self.request_body_capture,
				observability_capture,
			);
			let _ = self.state.bus.publish(event).await;
		}
	}
}

/// Forwards `inner`'s chunks to the client unchanged while mirroring them
/// into two independent size-capped [`CaptureBuffer`]s (cache store,
/// observability). Runs `finalize` exactly once, in a spawned task, the
/// moment the inner stream yields its terminal item.
pub struct TeeStream {
	inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
	cache_capture: CaptureBuffer,
	observability_capture: CaptureBuffer,
	finalize: Option<StreamFinalizer>,
}

impl TeeStream {
	pub fn new(
		inner: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
		cache_cap: usize,
		observability_cap: usize,
		finalize: StreamFinalizer,
	) -> Self {
		TeeStream {
			inner: Box::pin(inner),
			cache_capture: CaptureBuffer::new(cache_cap),
			observability_capture: CaptureBuffer::new(observability_cap),
			finalize: Some(finalize),
		}
	}
}

impl Stream for TeeStream {
	type Item = Result<Bytes, reqwest::Error>;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let this = self.get_mut();
		let polled = this.inner.as_mut().poll_next(cx);
		if let Poll::Ready(Some(Ok(chunk))) = &polled {
			this.cache_capture.push(chunk);
			this.observability_capture.push(chunk);
		} else if let Poll::Ready(_) = &polled {
			if let Some(finalizer) = this.finalize.take() {
				let cache_capture = std::mem::replace(&mut this.cache_capture, CaptureBuffer::new(0));
				let observability_capture = std::mem::replace(&mut this.observability_capture, CaptureBuffer::new(0));
				tokio::spawn(finalizer.finish(cache_capture, observability_capture));
			}
		}
		polled
	}
}
