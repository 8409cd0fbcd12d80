//! Counted block codec
//!
//! Structured responses produced by a running command travel to the
//! connection owner through a pipe as self-delimiting packets. A data block
//! is copied to the network as one unit, so responses from one block never
//! interleave with text from another channel. Two control packets ask the
//! owner to drain the stdout or stderr channel at that point.
//!
//! Wire form: one tag byte, then for blocks a 4-byte big-endian length and
//! the block bytes.
//!
//! ```text
//! 'B' len:u32 bytes...   data block
//! 'O'                    flush stdout-equivalent
//! 'E'                    flush stderr-equivalent
//! ```

use super::error::{ProtocolError, ProtocolResult};

const TAG_BLOCK: u8 = b'B';
const TAG_FLUSH_STDOUT: u8 = b'O';
const TAG_FLUSH_STDERR: u8 = b'E';
const HEADER_SIZE: usize = 5;

/// Largest block accepted by the decoder
pub const MAX_BLOCK_SIZE: usize = 1 << 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
	/// Bytes to copy to the network atomically
	Block(Vec<u8>),
	/// Drain stdout-equivalent output before continuing
	FlushStdout,
	/// Drain stderr-equivalent output before continuing
	FlushStderr,
}

impl Packet {
	/// Block made of newline-terminated lines
	pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> Self {
		let mut data = Vec::new();
		for line in lines {
			data.extend_from_slice(line.as_ref().as_bytes());
			data.push(b'\n');
		}
		Packet::Block(data)
	}

	/// Lines of a data block (without terminators)
	pub fn lines(&self) -> Vec<String> {
		match self {
			Packet::Block(data) => String::from_utf8_lossy(data)
				.split_terminator('\n')
				.map(|s| s.to_string())
				.collect(),
			_ => Vec::new(),
		}
	}

	/// Append the wire form of this packet to `out`
	pub fn encode(&self, out: &mut Vec<u8>) {
		match self {
			Packet::Block(data) => {
				out.push(TAG_BLOCK);
				out.extend_from_slice(&(data.len() as u32).to_be_bytes());
				out.extend_from_slice(data);
			}
			Packet::FlushStdout => out.push(TAG_FLUSH_STDOUT),
			Packet::FlushStderr => out.push(TAG_FLUSH_STDERR),
		}
	}

	pub fn to_bytes(&self) -> Vec<u8> {
		let mut out = Vec::new();
		self.encode(&mut out);
		out
	}
}

/// Incremental decoder; yields only complete packets
#[derive(Default)]
pub struct CountedDecoder {
	buf: Vec<u8>,
}

impl CountedDecoder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn feed(&mut self, bytes: &[u8]) {
		self.buf.extend_from_slice(bytes);
	}

	/// Bytes received but not yet part of a complete packet
	pub fn pending(&self) -> usize {
		self.buf.len()
	}

	/// Next complete packet, or `None` when more bytes are needed
	pub fn next_packet(&mut self) -> ProtocolResult<Option<Packet>> {
		let Some(&tag) = self.buf.first() else {
			return Ok(None);
		};
		match tag {
			TAG_FLUSH_STDOUT => {
				self.buf.remove(0);
				Ok(Some(Packet::FlushStdout))
			}
			TAG_FLUSH_STDERR => {
				self.buf.remove(0);
				Ok(Some(Packet::FlushStderr))
			}
			TAG_BLOCK => {
				if self.buf.len() < HEADER_SIZE {
					return Ok(None);
				}
				let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
				if len > MAX_BLOCK_SIZE {
					return Err(ProtocolError::ProtocolViolation(format!(
						"counted block of {} bytes exceeds limit",
						len
					)));
				}
				if self.buf.len() < HEADER_SIZE + len {
					return Ok(None);
				}
				let data = self.buf[HEADER_SIZE..HEADER_SIZE + len].to_vec();
				self.buf.drain(..HEADER_SIZE + len);
				Ok(Some(Packet::Block(data)))
			}
			other => Err(ProtocolError::ProtocolViolation(format!(
				"bad counted packet tag 0x{:02x}",
				other
			))),
		}
	}

	/// Declare the stream finished; leftover bytes are an incomplete packet
	pub fn finish(&mut self) -> ProtocolResult<()> {
		if self.buf.is_empty() {
			Ok(())
		} else {
			let n = self.buf.len();
			self.buf.clear();
			Err(ProtocolError::ProtocolViolation(format!("uncounted data discarded ({} bytes)", n)))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_block_lines_survive_round_trip() {
		let lines = ["Checksum 0123", "Updated ./", "/repo/foo.c", "/foo.c/1.2///"];
		let packet = Packet::from_lines(&lines);
		let mut decoder = CountedDecoder::new();
		decoder.feed(&packet.to_bytes());
		let decoded = decoder.next_packet().unwrap().unwrap();
		assert_eq!(decoded.lines(), lines);
		assert!(decoder.next_packet().unwrap().is_none());
	}

	#[test]
	fn test_truncated_block_not_returned() {
		let bytes = Packet::from_lines(&["M hello"]).to_bytes();
		let mut decoder = CountedDecoder::new();
		decoder.feed(&bytes[..bytes.len() - 1]);
		assert!(decoder.next_packet().unwrap().is_none());
		assert!(decoder.finish().is_err());
	}

	#[test]
	fn test_partial_header_waits() {
		let bytes = Packet::from_lines(&["ok"]).to_bytes();
		let mut decoder = CountedDecoder::new();
		decoder.feed(&bytes[..3]);
		assert!(decoder.next_packet().unwrap().is_none());
		decoder.feed(&bytes[3..]);
		assert_eq!(decoder.next_packet().unwrap(), Some(Packet::from_lines(&["ok"])));
	}

	#[test]
	fn test_signals_keep_their_position() {
		let mut bytes = Vec::new();
		Packet::from_lines(&["M one"]).encode(&mut bytes);
		Packet::FlushStdout.encode(&mut bytes);
		Packet::FlushStderr.encode(&mut bytes);
		Packet::from_lines(&["M two"]).encode(&mut bytes);

		let mut decoder = CountedDecoder::new();
		decoder.feed(&bytes);
		let mut seen = Vec::new();
		while let Some(p) = decoder.next_packet().unwrap() {
			seen.push(p);
		}
		assert_eq!(
			seen,
			vec![
				Packet::from_lines(&["M one"]),
				Packet::FlushStdout,
				Packet::FlushStderr,
				Packet::from_lines(&["M two"]),
			]
		);
		assert!(decoder.finish().is_ok());
	}

	#[test]
	fn test_unknown_tag_is_violation() {
		let mut decoder = CountedDecoder::new();
		decoder.feed(b"Xjunk");
		assert!(decoder.next_packet().is_err());
	}
}

// vim: ts=4
