//! A size-capped buffer used to mirror a streaming response body for
//! caching (C5) and observability (C10) without blocking the bytes
//! actually flowing to the client.

pub struct CaptureBuffer {
	buf: Vec<u8>,
	cap: usize,
	overflowed: bool,
}

impl CaptureBuffer {
	pub fn new(cap: usize) -> Self {
		CaptureBuffer {
			buf: Vec::new(),
			cap,
			overflowed: false,
		}
	}

	/// Appends `chunk` if doing so would not exceed the cap. Once the cap
	/// is exceeded the buffer is permanently marked overflowed and further
	/// pushes are no-ops; the caller should stop trying to store/capture
	/// once `is_overflowed()` is true, while still streaming bytes through
	/// to the client unmodified.
	pub fn push(&mut self, chunk: &[u8]) {
		if self.overflowed {
			return;
		}
		if self.buf.len() + chunk.len() > self.cap {
			self.overflowed = true;
			self.buf.clear();
			return;
		}
		self.buf.extend_from_slice(chunk);
	}

	pub fn is_overflowed(&self) -> bool {
		self.overflowed
	}

	pub fn into_bytes(self) -> Option<Vec<u8>> {
		if self.overflowed { None } else { Some(self.buf) }
	}

	pub fn len(&self) -> usize {
		self.buf.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buf.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn accumulates_under_cap() {
		let mut buf = CaptureBuffer::new(16);
		buf.push(b"hello");
		buf.push(b"world");
		assert!(!buf.is_overflowed());
		assert_eq!(buf.into_bytes().unwrap(), b"helloworld");
	}

	#[test]
	fn exceeding_cap_discards_and_marks_overflowed() {
		let mut buf = CaptureBuffer::new(8);
		buf.push(b"0123456789");
		assert!(buf.is_overflowed());
		assert!(buf.into_bytes().is_none());
	}
}
