//! Protocol error types
//!
//! Covers failures of the line/counted codec and of request or response
//! dispatch, with automatic conversions from the buffer layer.

use std::fmt;
use std::io;

use crate::buffer::BufferError;

/// Protocol error type
#[derive(Debug)]
pub enum ProtocolError {
	/// I/O error outside the buffer chain
	Io(io::Error),
	/// Failure of a buffer in the chain (transport or filter)
	Buffer(BufferError),
	/// Stream ended where more data was required
	UnexpectedEof(String),
	/// Line exceeded the configured bound
	LineTooLong(usize),
	/// Protocol violation (unexpected format or state)
	ProtocolViolation(String),
	/// Peer lacks a capability this side requires
	NotSupported(String),
	/// Generic error message
	Other(String),
}

impl ProtocolError {
	/// Errors after which the stream cannot be trusted to resynchronize
	pub fn is_fatal(&self) -> bool {
		match self {
			ProtocolError::Buffer(e) => e.is_fatal(),
			ProtocolError::ProtocolViolation(_) | ProtocolError::Other(_) => false,
			_ => true,
		}
	}

	pub fn is_out_of_memory(&self) -> bool {
		matches!(self, ProtocolError::Buffer(BufferError::OutOfMemory))
	}
}

impl fmt::Display for ProtocolError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ProtocolError::Io(e) => write!(f, "I/O error: {}", e),
			ProtocolError::Buffer(e) => write!(f, "{}", e),
			ProtocolError::UnexpectedEof(msg) => write!(f, "{}", msg),
			ProtocolError::LineTooLong(limit) => {
				write!(f, "line longer than {} bytes", limit)
			}
			ProtocolError::ProtocolViolation(msg) => write!(f, "Protocol error: {}", msg),
			ProtocolError::NotSupported(msg) => write!(f, "{}", msg),
			ProtocolError::Other(msg) => write!(f, "{}", msg),
		}
	}
}

impl std::error::Error for ProtocolError {}

// From implementations for automatic conversion
impl From<io::Error> for ProtocolError {
	fn from(e: io::Error) -> Self {
		ProtocolError::Io(e)
	}
}

impl From<BufferError> for ProtocolError {
	fn from(e: BufferError) -> Self {
		ProtocolError::Buffer(e)
	}
}

impl From<String> for ProtocolError {
	fn from(e: String) -> Self {
		ProtocolError::Other(e)
	}
}

impl From<&str> for ProtocolError {
	fn from(e: &str) -> Self {
		ProtocolError::Other(e.to_string())
	}
}

impl From<std::num::ParseIntError> for ProtocolError {
	fn from(e: std::num::ParseIntError) -> Self {
		ProtocolError::ProtocolViolation(e.to_string())
	}
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

// vim: ts=4
