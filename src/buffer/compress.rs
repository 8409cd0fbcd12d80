//! zlib compression filter
//!
//! The output side deflates everything written to it and sync-flushes the
//! stream whenever the chain is flushed, so the peer can decode every byte
//! that was flushed. Deflated output the transport has not taken yet is
//! bounded by [`FILTER_BACKLOG`](super::FILTER_BACKLOG). Level 0 still produces a zlib stream (stored blocks),
//! which keeps both peers agreeing on framing when compression is declined.

use async_trait::async_trait;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use super::error::{BufferError, BufferResult};
use super::{drain_into, make_room, BoxBuffer, Buffer, ReadStatus, MAX_PACKET_SIZE};
use crate::logging::*;

const SCRATCH_SIZE: usize = 4096;

/// Highest zlib level
pub const MAX_LEVEL: u32 = 9;

enum Stream {
	Inflate {
		z: Decompress,
		raw: Vec<u8>,
		plain: Vec<u8>,
		plain_pos: usize,
		inner_eof: bool,
		finished: bool,
	},
	Deflate {
		z: Compress,
		out: Vec<u8>,
		dirty: bool,
	},
}

/// Compression filter wrapping one direction of a connection
pub struct CompressBuffer {
	inner: BoxBuffer,
	stream: Stream,
	level: u32,
	shut: bool,
}

impl CompressBuffer {
	/// Decompressing input filter
	pub fn input(inner: BoxBuffer) -> Self {
		CompressBuffer {
			inner,
			stream: Stream::Inflate {
				z: Decompress::new(true),
				raw: Vec::new(),
				plain: Vec::new(),
				plain_pos: 0,
				inner_eof: false,
				finished: false,
			},
			level: 0,
			shut: false,
		}
	}

	/// Compressing output filter at `level` (0..=9)
	pub fn output(inner: BoxBuffer, level: u32) -> Self {
		let level = level.min(MAX_LEVEL);
		CompressBuffer {
			inner,
			stream: Stream::Deflate {
				z: Compress::new(Compression::new(level), true),
				out: Vec::new(),
				dirty: false,
			},
			level,
			shut: false,
		}
	}

	pub fn level(&self) -> u32 {
		self.level
	}

	fn reserve(vec: &mut Vec<u8>, additional: usize) -> BufferResult<()> {
		vec.try_reserve(additional).map_err(|_| BufferError::OutOfMemory)
	}

	/// Run the deflater with `flush` until it has nothing more to emit
	fn deflate_flush(z: &mut Compress, out: &mut Vec<u8>, flush: FlushCompress) -> BufferResult<()> {
		loop {
			Self::reserve(out, SCRATCH_SIZE)?;
			let status = z.compress_vec(&[], out, flush)?;
			if status == Status::StreamEnd {
				return Ok(());
			}
			if out.len() < out.capacity() && !matches!(flush, FlushCompress::Finish) {
				return Ok(());
			}
		}
	}
}

#[async_trait]
impl Buffer for CompressBuffer {
	fn name(&self) -> &'static str {
		"compress"
	}

	async fn read(&mut self, dst: &mut [u8], need: usize) -> BufferResult<ReadStatus> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		let blocking = self.inner.is_blocking();
		let (z, raw, plain, plain_pos, inner_eof, finished) = match &mut self.stream {
			Stream::Inflate { z, raw, plain, plain_pos, inner_eof, finished } => {
				(z, raw, plain, plain_pos, inner_eof, finished)
			}
			Stream::Deflate { .. } => {
				return Err(BufferError::Other("read from an output compression buffer".to_string()))
			}
		};
		let need = need.max(1).min(dst.len());
		let mut got = 0;

		loop {
			if *plain_pos < plain.len() {
				let n = (plain.len() - *plain_pos).min(dst.len() - got);
				dst[got..got + n].copy_from_slice(&plain[*plain_pos..*plain_pos + n]);
				*plain_pos += n;
				got += n;
				if *plain_pos == plain.len() {
					plain.clear();
					*plain_pos = 0;
				}
				if got >= need || got == dst.len() {
					return Ok(ReadStatus::data(got));
				}
			}

			if !raw.is_empty() && !*finished {
				Self::reserve(plain, SCRATCH_SIZE.max(raw.len() * 2))?;
				let before_in = z.total_in();
				let before_out = z.total_out();
				let status = z.decompress_vec(raw, plain, FlushDecompress::None)?;
				let consumed = (z.total_in() - before_in) as usize;
				let produced = (z.total_out() - before_out) as usize;
				raw.drain(..consumed);
				if status == Status::StreamEnd {
					*finished = true;
				}
				if produced > 0 || consumed > 0 {
					continue;
				}
			}

			if *finished || (*inner_eof && raw.is_empty()) {
				return Ok(ReadStatus::eof(got));
			}
			if *inner_eof {
				return Err(BufferError::Compression("truncated compressed stream".to_string()));
			}
			if !blocking && got > 0 {
				return Ok(ReadStatus::data(got));
			}

			let mut scratch = [0u8; SCRATCH_SIZE];
			let status = self.inner.read(&mut scratch, if blocking { 1 } else { 0 }).await?;
			if status.count == 0 && !status.eof {
				return Ok(ReadStatus::data(got));
			}
			Self::reserve(raw, status.count)?;
			raw.extend_from_slice(&scratch[..status.count]);
			if status.eof {
				*inner_eof = true;
			}
		}
	}

	async fn write(&mut self, data: &[u8]) -> BufferResult<usize> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		let (z, out, dirty) = match &mut self.stream {
			Stream::Deflate { z, out, dirty } => (z, out, dirty),
			Stream::Inflate { .. } => {
				return Err(BufferError::Other("write to an input compression buffer".to_string()))
			}
		};
		make_room(&mut *self.inner, out).await?;
		let data = &data[..data.len().min(MAX_PACKET_SIZE)];
		let mut input = data;
		while !input.is_empty() {
			Self::reserve(out, input.len() / 2 + 64)?;
			let before = z.total_in();
			z.compress_vec(input, out, FlushCompress::None)?;
			let consumed = (z.total_in() - before) as usize;
			input = &input[consumed..];
		}
		*dirty = true;
		drain_into(&mut *self.inner, out, false).await?;
		Ok(data.len())
	}

	async fn flush(&mut self, block: bool) -> BufferResult<()> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		if let Stream::Deflate { z, out, dirty } = &mut self.stream {
			if *dirty {
				Self::deflate_flush(z, out, FlushCompress::Sync)?;
				*dirty = false;
			}
			drain_into(&mut *self.inner, out, block).await?;
		}
		self.inner.flush(block).await
	}

	async fn shutdown(&mut self) -> BufferResult<()> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		self.shut = true;
		match &mut self.stream {
			Stream::Deflate { z, out, .. } => {
				Self::deflate_flush(z, out, FlushCompress::Finish)?;
				drain_into(&mut *self.inner, out, true).await?;
				self.inner.flush(true).await?;
			}
			Stream::Inflate { plain, plain_pos, .. } => {
				let unread = plain.len() - *plain_pos;
				if unread > 0 {
					debug!("[compress] {} decompressed bytes unread at shutdown", unread);
				}
			}
		}
		self.inner.shutdown().await
	}

	fn set_blocking(&mut self, blocking: bool) {
		self.inner.set_blocking(blocking);
	}

	fn is_blocking(&self) -> bool {
		self.inner.is_blocking()
	}

	fn is_shut_down(&self) -> bool {
		self.shut
	}

	fn backlog(&self) -> usize {
		let own = match &self.stream {
			Stream::Deflate { out, .. } => out.len(),
			Stream::Inflate { .. } => 0,
		};
		own + self.inner.backlog()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::buffer::{write_all, MemoryBuffer, TransportBuffer, FILTER_BACKLOG};
	use crate::protocol::LineWriter;

	async fn compress(data: &[u8], level: u32) -> Vec<u8> {
		let (sink, bytes) = MemoryBuffer::output();
		let mut out = CompressBuffer::output(Box::new(sink), level);
		write_all(&mut out, data).await.unwrap();
		out.flush(true).await.unwrap();
		let result = bytes.lock().unwrap().clone();
		result
	}

	async fn decompress(data: Vec<u8>) -> Vec<u8> {
		let mut input = CompressBuffer::input(Box::new(MemoryBuffer::input(data)));
		let mut result = Vec::new();
		loop {
			let mut dst = [0u8; 100];
			let status = input.read(&mut dst, 1).await.unwrap();
			result.extend_from_slice(&dst[..status.count]);
			if status.eof {
				break;
			}
		}
		result
	}

	#[tokio::test]
	async fn test_round_trip_default_level() {
		let data = b"line one\nline two\nline two\nline two\n".repeat(50);
		let packed = compress(&data, 6).await;
		assert!(packed.len() < data.len());
		assert_eq!(decompress(packed).await, data);
	}

	#[tokio::test]
	async fn test_level_zero_still_frames() {
		let data = b"ok\n".to_vec();
		let packed = compress(&data, 0).await;
		assert_ne!(packed, data);
		assert_eq!(packed[0], 0x78);
		assert_eq!(decompress(packed).await, data);
	}

	#[tokio::test]
	async fn test_corrupt_stream_is_fatal() {
		let mut input = CompressBuffer::input(Box::new(MemoryBuffer::input(vec![0x12, 0x34, 0x56, 0x78])));
		let mut dst = [0u8; 16];
		let err = input.read(&mut dst, 1).await.unwrap_err();
		assert!(matches!(err, BufferError::Compression(_)));
	}

	#[tokio::test]
	async fn test_flushed_prefix_is_decodable() {
		let (sink, bytes) = MemoryBuffer::output();
		let mut out = CompressBuffer::output(Box::new(sink), 9);
		out.write(b"Valid-requests Root\n").await.unwrap();
		out.flush(true).await.unwrap();
		out.write(b"ok\n").await.unwrap();
		let first = bytes.lock().unwrap().clone();
		let mut input = CompressBuffer::input(Box::new(MemoryBuffer::input(first)));
		let mut dst = [0u8; 64];
		let status = input.read(&mut dst, 20).await.unwrap();
		assert_eq!(&dst[..status.count], b"Valid-requests Root\n");
	}

	/// Bytes that do not compress
	fn noise(len: usize) -> Vec<u8> {
		let mut x: u32 = 0x9e37_79b9;
		(0..len)
			.map(|_| {
				x ^= x << 13;
				x ^= x >> 17;
				x ^= x << 5;
				x as u8
			})
			.collect()
	}

	#[tokio::test]
	async fn test_stalled_peer_leaves_backlog_with_the_writer() {
		let (near, _far) = tokio::io::duplex(64);
		let chain = CompressBuffer::output(Box::new(TransportBuffer::writer(near)), 6);
		let mut writer = LineWriter::new(Box::new(chain));
		writer.set_blocking(false).unwrap();

		let data = noise(1 << 20);
		writer.queue(&data).unwrap();
		writer.send(false).await.unwrap();

		let taken = data.len() - writer.queued();
		assert!(writer.queued() > 0);
		assert!(taken <= FILTER_BACKLOG + 2 * MAX_PACKET_SIZE, "filter took {} bytes", taken);
	}

	#[tokio::test]
	async fn test_blocking_write_waits_for_room() {
		let (near, mut far) = tokio::io::duplex(64);
		let mut out = CompressBuffer::output(Box::new(TransportBuffer::writer(near)), 0);
		let data = noise(4 * FILTER_BACKLOG);

		let reader = async {
			let mut received = Vec::new();
			tokio::io::AsyncReadExt::read_to_end(&mut far, &mut received).await.unwrap();
			received
		};
		let writer = async {
			write_all(&mut out, &data).await.unwrap();
			out.shutdown().await.unwrap();
		};
		let (received, ()) = tokio::join!(reader, writer);
		assert_eq!(decompress(received).await, data);
	}
}

// vim: ts=4
