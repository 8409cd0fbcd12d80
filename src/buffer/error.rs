//! Buffer error types

use std::fmt;
use std::io;

/// Error raised by any buffer in a chain
#[derive(Debug)]
pub enum BufferError {
	/// I/O error from the underlying transport
	Io(io::Error),
	/// The transport cannot accept or deliver data without blocking
	WouldBlock,
	/// Operation attempted after `shutdown`
	Shutdown,
	/// Corrupt compressed stream or compressor failure
	Compression(String),
	/// Frame failed integrity or decryption check
	Authentication(String),
	/// Malformed packet framing
	Packet(String),
	/// Space for queued data could not be reserved
	OutOfMemory,
	/// Generic error message
	Other(String),
}

impl BufferError {
	/// True for the "try again later" condition of non-blocking transports
	pub fn is_would_block(&self) -> bool {
		matches!(self, BufferError::WouldBlock)
	}

	/// Transform failures that must tear the connection down
	pub fn is_fatal(&self) -> bool {
		!matches!(self, BufferError::WouldBlock)
	}
}

impl fmt::Display for BufferError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BufferError::Io(e) => write!(f, "I/O error: {}", e),
			BufferError::WouldBlock => write!(f, "operation would block"),
			BufferError::Shutdown => write!(f, "buffer already shut down"),
			BufferError::Compression(msg) => write!(f, "compression error: {}", msg),
			BufferError::Authentication(msg) => write!(f, "authentication error: {}", msg),
			BufferError::Packet(msg) => write!(f, "packet error: {}", msg),
			BufferError::OutOfMemory => write!(f, "virtual memory exhausted"),
			BufferError::Other(msg) => write!(f, "{}", msg),
		}
	}
}

impl std::error::Error for BufferError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			BufferError::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for BufferError {
	fn from(e: io::Error) -> Self {
		if e.kind() == io::ErrorKind::WouldBlock {
			BufferError::WouldBlock
		} else {
			BufferError::Io(e)
		}
	}
}

impl From<flate2::CompressError> for BufferError {
	fn from(e: flate2::CompressError) -> Self {
		BufferError::Compression(e.to_string())
	}
}

impl From<flate2::DecompressError> for BufferError {
	fn from(e: flate2::DecompressError) -> Self {
		BufferError::Compression(e.to_string())
	}
}

impl From<String> for BufferError {
	fn from(e: String) -> Self {
		BufferError::Other(e)
	}
}

impl From<&str> for BufferError {
	fn from(e: &str) -> Self {
		BufferError::Other(e.to_string())
	}
}

pub type BufferResult<T> = Result<T, BufferError>;

// vim: ts=4
