//! Packetizing filter
//!
//! Splits the byte stream into discrete packets so a frame transform (see
//! [`FrameCodec`]) can operate on whole frames. Each packet on the wire is a
//! two-byte big-endian length followed by that many bytes of wrapped frame.

use async_trait::async_trait;

use super::error::{BufferError, BufferResult};
use super::{drain_into, make_room, BoxBuffer, Buffer, ReadStatus};

/// Largest plaintext payload carried by one packet
pub const MAX_PACKET_SIZE: usize = 8192;

const HEADER_SIZE: usize = 2;

/// Transform applied to each packet payload
pub trait FrameCodec: Send {
	fn name(&self) -> &'static str;

	/// Turn a plaintext payload into its wire frame
	fn wrap(&mut self, plain: &[u8]) -> BufferResult<Vec<u8>>;

	/// Recover the plaintext of a frame; integrity failures are errors
	fn unwrap(&mut self, frame: &[u8]) -> BufferResult<Vec<u8>>;
}

/// Frames carry the plaintext unchanged
pub struct IdentityCodec;

impl FrameCodec for IdentityCodec {
	fn name(&self) -> &'static str {
		"identity"
	}

	fn wrap(&mut self, plain: &[u8]) -> BufferResult<Vec<u8>> {
		Ok(plain.to_vec())
	}

	fn unwrap(&mut self, frame: &[u8]) -> BufferResult<Vec<u8>> {
		Ok(frame.to_vec())
	}
}

/// Filter that moves data in length-prefixed packets
pub struct PacketBuffer {
	inner: BoxBuffer,
	codec: Box<dyn FrameCodec>,
	input: bool,
	// output side
	holding: Vec<u8>,
	wire: Vec<u8>,
	// input side
	raw: Vec<u8>,
	plain: Vec<u8>,
	plain_pos: usize,
	inner_eof: bool,
	shut: bool,
}

impl PacketBuffer {
	fn new(inner: BoxBuffer, codec: Box<dyn FrameCodec>, input: bool) -> Self {
		PacketBuffer {
			inner,
			codec,
			input,
			holding: Vec::new(),
			wire: Vec::new(),
			raw: Vec::new(),
			plain: Vec::new(),
			plain_pos: 0,
			inner_eof: false,
			shut: false,
		}
	}

	pub fn input(inner: BoxBuffer, codec: Box<dyn FrameCodec>) -> Self {
		Self::new(inner, codec, true)
	}

	pub fn output(inner: BoxBuffer, codec: Box<dyn FrameCodec>) -> Self {
		Self::new(inner, codec, false)
	}

	fn emit_packet(&mut self, len: usize) -> BufferResult<()> {
		let frame = self.codec.wrap(&self.holding[..len])?;
		if frame.len() > u16::MAX as usize {
			return Err(BufferError::Packet(format!("wrapped frame of {} bytes too large", frame.len())));
		}
		self.wire.try_reserve(frame.len() + HEADER_SIZE).map_err(|_| BufferError::OutOfMemory)?;
		self.wire.extend_from_slice(&(frame.len() as u16).to_be_bytes());
		self.wire.extend_from_slice(&frame);
		self.holding.drain(..len);
		Ok(())
	}

	/// Unwrap one complete packet from `raw`, if present
	fn take_packet(&mut self) -> BufferResult<bool> {
		if self.raw.len() < HEADER_SIZE {
			return Ok(false);
		}
		let len = u16::from_be_bytes([self.raw[0], self.raw[1]]) as usize;
		if self.raw.len() < HEADER_SIZE + len {
			return Ok(false);
		}
		let plain = self.codec.unwrap(&self.raw[HEADER_SIZE..HEADER_SIZE + len])?;
		self.raw.drain(..HEADER_SIZE + len);
		self.plain.extend_from_slice(&plain);
		Ok(true)
	}
}

#[async_trait]
impl Buffer for PacketBuffer {
	fn name(&self) -> &'static str {
		"packet"
	}

	async fn read(&mut self, dst: &mut [u8], need: usize) -> BufferResult<ReadStatus> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		if !self.input {
			return Err(BufferError::Other("read from an output packet buffer".to_string()));
		}
		let blocking = self.inner.is_blocking();
		let need = need.max(1).min(dst.len());
		let mut got = 0;

		loop {
			if self.plain_pos < self.plain.len() {
				let n = (self.plain.len() - self.plain_pos).min(dst.len() - got);
				dst[got..got + n].copy_from_slice(&self.plain[self.plain_pos..self.plain_pos + n]);
				self.plain_pos += n;
				got += n;
				if self.plain_pos == self.plain.len() {
					self.plain.clear();
					self.plain_pos = 0;
				}
				if got >= need || got == dst.len() {
					return Ok(ReadStatus::data(got));
				}
			}
			if self.take_packet()? {
				continue;
			}
			if self.inner_eof {
				if self.raw.is_empty() {
					return Ok(ReadStatus::eof(got));
				}
				return Err(BufferError::Packet(format!(
					"end of stream inside a packet ({} bytes pending)",
					self.raw.len()
				)));
			}
			if !blocking && got > 0 {
				return Ok(ReadStatus::data(got));
			}
			let mut scratch = [0u8; 4096];
			let status = self.inner.read(&mut scratch, if blocking { 1 } else { 0 }).await?;
			if status.count == 0 && !status.eof {
				return Ok(ReadStatus::data(got));
			}
			self.raw.extend_from_slice(&scratch[..status.count]);
			self.inner_eof = status.eof;
		}
	}

	async fn write(&mut self, data: &[u8]) -> BufferResult<usize> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		if self.input {
			return Err(BufferError::Other("write to an input packet buffer".to_string()));
		}
		make_room(&mut *self.inner, &mut self.wire).await?;
		let data = &data[..data.len().min(MAX_PACKET_SIZE)];
		self.holding.try_reserve(data.len()).map_err(|_| BufferError::OutOfMemory)?;
		self.holding.extend_from_slice(data);
		while self.holding.len() >= MAX_PACKET_SIZE {
			self.emit_packet(MAX_PACKET_SIZE)?;
		}
		drain_into(&mut *self.inner, &mut self.wire, false).await?;
		Ok(data.len())
	}

	async fn flush(&mut self, block: bool) -> BufferResult<()> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		if !self.holding.is_empty() {
			let len = self.holding.len();
			self.emit_packet(len)?;
		}
		drain_into(&mut *self.inner, &mut self.wire, block).await?;
		self.inner.flush(block).await
	}

	async fn shutdown(&mut self) -> BufferResult<()> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		if !self.input {
			self.flush(true).await?;
		}
		self.shut = true;
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
		self.holding.len() + self.wire.len() + self.inner.backlog()
	}
}


// vim: ts=4
