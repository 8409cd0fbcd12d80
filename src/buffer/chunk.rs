//! Pending output queue made of fixed-capacity chunks
//!
//! Data is appended at the tail and consumed strictly from the head. The
//! queue never moves bytes between chunks, so consuming a prefix is O(1)
//! per chunk.

use std::collections::VecDeque;

use super::error::{BufferError, BufferResult};

/// Capacity of a single chunk
pub const CHUNK_SIZE: usize = 4096;

struct Chunk {
	data: Vec<u8>,
	start: usize,
}

impl Chunk {
	fn allocate() -> BufferResult<Self> {
		let mut data = Vec::new();
		data.try_reserve_exact(CHUNK_SIZE).map_err(|_| BufferError::OutOfMemory)?;
		Ok(Chunk { data, start: 0 })
	}

	fn remaining(&self) -> &[u8] {
		&self.data[self.start..]
	}

	fn room(&self) -> usize {
		CHUNK_SIZE - self.data.len()
	}
}

/// FIFO queue of bytes awaiting transmission
#[derive(Default)]
pub struct ChunkQueue {
	chunks: VecDeque<Chunk>,
	len: usize,
	limit: Option<usize>,
}

impl ChunkQueue {
	pub fn new() -> Self {
		Self::default()
	}

	/// Queue that reports memory exhaustion once `limit` bytes are queued
	pub fn with_limit(limit: usize) -> Self {
		ChunkQueue { chunks: VecDeque::new(), len: 0, limit: Some(limit) }
	}

	/// Total queued bytes
	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	pub fn chunk_count(&self) -> usize {
		self.chunks.len()
	}

	/// Append bytes at the tail
	pub fn push(&mut self, mut bytes: &[u8]) -> BufferResult<()> {
		if let Some(limit) = self.limit {
			if self.len + bytes.len() > limit {
				return Err(BufferError::OutOfMemory);
			}
		}
		while !bytes.is_empty() {
			let need_chunk = match self.chunks.back() {
				Some(chunk) => chunk.room() == 0,
				None => true,
			};
			if need_chunk {
				self.chunks.push_back(Chunk::allocate()?);
			}
			if let Some(tail) = self.chunks.back_mut() {
				let n = tail.room().min(bytes.len());
				tail.data.extend_from_slice(&bytes[..n]);
				self.len += n;
				bytes = &bytes[n..];
			}
		}
		Ok(())
	}

	/// Bytes of the head chunk
	pub fn front(&self) -> Option<&[u8]> {
		self.chunks.front().map(|c| c.remaining())
	}

	/// Drop `n` bytes from the head
	pub fn consume(&mut self, mut n: usize) {
		while n > 0 {
			let Some(head) = self.chunks.front_mut() else {
				break;
			};
			let avail = head.data.len() - head.start;
			if n >= avail {
				self.len -= avail;
				n -= avail;
				self.chunks.pop_front();
			} else {
				head.start += n;
				self.len -= n;
				n = 0;
			}
		}
	}

	/// Remove everything, returning the bytes in order
	pub fn take_all(&mut self) -> Vec<u8> {
		let mut out = Vec::with_capacity(self.len);
		for chunk in self.chunks.drain(..) {
			out.extend_from_slice(chunk.remaining());
		}
		self.len = 0;
		out
	}

	pub fn clear(&mut self) {
		self.chunks.clear();
		self.len = 0;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_push_spans_chunks() {
		let mut q = ChunkQueue::new();
		let data = vec![7u8; CHUNK_SIZE * 2 + 10];
		q.push(&data).unwrap();
		assert_eq!(q.len(), data.len());
		assert_eq!(q.chunk_count(), 3);
		assert_eq!(q.front().unwrap().len(), CHUNK_SIZE);
	}

	#[test]
	fn test_consume_is_fifo() {
		let mut q = ChunkQueue::new();
		q.push(b"hello ").unwrap();
		q.push(b"world").unwrap();
		q.consume(3);
		assert_eq!(q.front().unwrap(), b"lo world");
		q.consume(8);
		assert!(q.is_empty());
		assert!(q.front().is_none());
	}

	#[test]
	fn test_len_matches_sum_of_chunks() {
		let mut q = ChunkQueue::new();
		for i in 0..1000u32 {
			q.push(i.to_string().as_bytes()).unwrap();
		}
		let total = q.len();
		assert_eq!(q.take_all().len(), total);
		assert_eq!(q.len(), 0);
	}

	#[test]
	fn test_limit_reports_out_of_memory() {
		let mut q = ChunkQueue::with_limit(8);
		q.push(b"12345678").unwrap();
		assert!(matches!(q.push(b"9"), Err(BufferError::OutOfMemory)));
		assert_eq!(q.len(), 8);
	}
}

// vim: ts=4
