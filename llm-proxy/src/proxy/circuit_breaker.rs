//! Wraps the upstream call path: opens after a run of consecutive
//! upstream failures and rejects immediately for a cool-down period.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::time::{Duration, Instant};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	Closed = 0,
	Open = 1,
}

pub struct CircuitBreaker {
	threshold: u32,
	cooldown: Duration,
	consecutive_failures: AtomicU32,
	state: AtomicU8,
	opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
	pub fn new(threshold: u32, cooldown: Duration) -> Self {
		CircuitBreaker {
			threshold,
			cooldown,
			consecutive_failures: AtomicU32::new(0),
			state: AtomicU8::new(State::Closed as u8),
			opened_at: Mutex::new(None),
		}
	}

	/// Returns `true` if the breaker is open and the caller should reject
	/// the request with a 503 without attempting the upstream call.
	pub fn is_open(&self) -> bool {
		if self.state.load(Ordering::Acquire) != State::Open as u8 {
			return false;
		}
		let mut opened_at = self.opened_at.lock().unwrap();
		match *opened_at {
			Some(at) if at.elapsed() >= self.cooldown => {
				*opened_at = None;
				self.state.store(State::Closed as u8, Ordering::Release);
				self.consecutive_failures.store(0, Ordering::Release);
				false
			}
			Some(_) => true,
			None => false,
		}
	}

	pub fn record_success(&self) {
		self.consecutive_failures.store(0, Ordering::Release);
	}

	pub fn record_failure(&self) {
		let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
		if failures >= self.threshold {
			self.state.store(State::Open as u8, Ordering::Release);
			*self.opened_at.lock().unwrap() = Some(Instant::now());
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn opens_after_threshold_consecutive_failures() {
		let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
		breaker.record_failure();
		breaker.record_failure();
		assert!(!breaker.is_open());
		breaker.record_failure();
		assert!(breaker.is_open());
	}

	#[test]
	fn success_resets_the_failure_streak() {
		let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
		breaker.record_failure();
		breaker.record_failure();
		breaker.record_success();
		breaker.record_failure();
		assert!(!breaker.is_open());
	}

	#[test]
	fn closes_again_after_cooldown_elapses() {
		let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
		breaker.record_failure();
		assert!(breaker.is_open());
		std::thread::sleep(Duration::from_millis(20));
		assert!(!breaker.is_open());
	}
}
