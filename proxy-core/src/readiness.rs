//! Process readiness tracking: components register a pending task on
//! startup and drop the guard once initialized, so `/ready` can report the
//! exact set of things still starting up.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::info;

static APPLICATION_START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

fn start_time() -> Instant {
	*APPLICATION_START_TIME.get_or_init(Instant::now)
}

#[derive(Clone, Debug, Default)]
pub struct Ready(Arc<Mutex<HashSet<String>>>);

impl Ready {
	pub fn new() -> Ready {
		start_time();
		Ready::default()
	}

	pub fn register_task(&self, name: &str) -> BlockReady {
		self.0.lock().unwrap().insert(name.to_string());
		BlockReady {
			parent: self.clone(),
			name: name.to_string(),
		}
	}

	pub fn pending(&self) -> HashSet<String> {
		self.0.lock().unwrap().clone()
	}

	pub fn is_ready(&self) -> bool {
		self.pending().is_empty()
	}
}

pub struct BlockReady {
	parent: Ready,
	name: String,
}

impl BlockReady {
	pub fn subtask(&self, name: &str) -> BlockReady {
		self.parent.register_task(name)
	}
}

impl Drop for BlockReady {
	fn drop(&mut self) {
		let mut pending = self.parent.0.lock().unwrap();
		pending.remove(&self.name);
		let left = pending.len();
		let dur = start_time().elapsed();
		if left == 0 {
			info!("task '{}' complete ({dur:?}), now ready", self.name);
		} else {
			info!(
				"task '{}' complete ({dur:?}), still awaiting {left} tasks",
				self.name
			);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ready_when_all_guards_dropped() {
		let r = Ready::new();
		let a = r.register_task("store");
		let b = r.register_task("bus");
		assert!(!r.is_ready());
		drop(a);
		assert!(!r.is_ready());
		drop(b);
		assert!(r.is_ready());
	}
}
