//! In-memory buffers and chain splicing
//!
//! `MemoryBuffer` serves bytes already held in memory (replayed logs,
//! read-ahead that must be pushed back under a new filter) or collects
//! output. `SplicedBuffer` reads one buffer to its end and then continues
//! with another.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::error::{BufferError, BufferResult};
use super::{BoxBuffer, Buffer, ReadStatus};

/// Shared handle on the bytes collected by an output `MemoryBuffer`
pub type SharedBytes = Arc<Mutex<Vec<u8>>>;

pub struct MemoryBuffer {
	data: Vec<u8>,
	pos: usize,
	sink: Option<SharedBytes>,
	blocking: bool,
	shut: bool,
}

impl MemoryBuffer {
	/// Input buffer that yields `data` and then end-of-stream
	pub fn input(data: Vec<u8>) -> Self {
		MemoryBuffer { data, pos: 0, sink: None, blocking: true, shut: false }
	}

	/// Output buffer appending to a shared vector
	pub fn output() -> (Self, SharedBytes) {
		let sink: SharedBytes = Arc::new(Mutex::new(Vec::new()));
		let buf = MemoryBuffer {
			data: Vec::new(),
			pos: 0,
			sink: Some(sink.clone()),
			blocking: true,
			shut: false,
		};
		(buf, sink)
	}

	pub fn remaining(&self) -> usize {
		self.data.len() - self.pos
	}
}

#[async_trait]
impl Buffer for MemoryBuffer {
	fn name(&self) -> &'static str {
		"memory"
	}

	async fn read(&mut self, dst: &mut [u8], _need: usize) -> BufferResult<ReadStatus> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		let n = self.remaining().min(dst.len());
		dst[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
		self.pos += n;
		if self.remaining() == 0 {
			Ok(ReadStatus::eof(n))
		} else {
			Ok(ReadStatus::data(n))
		}
	}

	async fn write(&mut self, data: &[u8]) -> BufferResult<usize> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		match &self.sink {
			Some(sink) => {
				let mut guard =
					sink.lock().map_err(|_| BufferError::Other("memory sink poisoned".to_string()))?;
				guard.extend_from_slice(data);
				Ok(data.len())
			}
			None => Err(BufferError::Other("write to an input memory buffer".to_string())),
		}
	}

	async fn flush(&mut self, _block: bool) -> BufferResult<()> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		Ok(())
	}

	async fn shutdown(&mut self) -> BufferResult<()> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		self.shut = true;
		self.data.clear();
		self.pos = 0;
		Ok(())
	}

	fn set_blocking(&mut self, blocking: bool) {
		self.blocking = blocking;
	}

	fn is_blocking(&self) -> bool {
		self.blocking
	}

	fn is_shut_down(&self) -> bool {
		self.shut
	}
}

/// Input buffer that drains `head` completely before reading `tail`
pub struct SplicedBuffer {
	head: Option<BoxBuffer>,
	tail: BoxBuffer,
	shut: bool,
}

impl SplicedBuffer {
	pub fn new(head: BoxBuffer, tail: BoxBuffer) -> Self {
		SplicedBuffer { head: Some(head), tail, shut: false }
	}

	/// Push already-read bytes back in front of `tail`
	pub fn unread(bytes: Vec<u8>, tail: BoxBuffer) -> BoxBuffer {
		if bytes.is_empty() {
			tail
		} else {
			Box::new(SplicedBuffer::new(Box::new(MemoryBuffer::input(bytes)), tail))
		}
	}
}

#[async_trait]
impl Buffer for SplicedBuffer {
	fn name(&self) -> &'static str {
		"spliced"
	}

	async fn read(&mut self, dst: &mut [u8], need: usize) -> BufferResult<ReadStatus> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		let mut got = 0;
		if let Some(head) = self.head.as_mut() {
			let status = head.read(dst, need).await?;
			got = status.count;
			if status.eof {
				if let Some(mut head) = self.head.take() {
					head.shutdown().await?;
				}
			}
			if got >= need.max(1) || got == dst.len() || self.head.is_some() {
				return Ok(ReadStatus::data(got));
			}
		}
		let rest = need.saturating_sub(got);
		let status = self.tail.read(&mut dst[got..], rest).await?;
		Ok(ReadStatus { count: got + status.count, eof: status.eof })
	}

	async fn write(&mut self, _data: &[u8]) -> BufferResult<usize> {
		Err(BufferError::Other("write to a spliced input buffer".to_string()))
	}

	async fn flush(&mut self, _block: bool) -> BufferResult<()> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		Ok(())
	}

	async fn shutdown(&mut self) -> BufferResult<()> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		self.shut = true;
		if let Some(mut head) = self.head.take() {
			head.shutdown().await?;
		}
		self.tail.shutdown().await
	}

	fn set_blocking(&mut self, blocking: bool) {
		if let Some(head) = self.head.as_mut() {
			head.set_blocking(blocking);
		}
		self.tail.set_blocking(blocking);
	}

	fn is_blocking(&self) -> bool {
		self.tail.is_blocking()
	}

	fn is_shut_down(&self) -> bool {
		self.shut
	}
}


// vim: ts=4
