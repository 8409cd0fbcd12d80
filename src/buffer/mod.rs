//! Composable byte-stream buffers
//!
//! A connection uses two independent chains, one for each direction. Every
//! chain ends in a [`TransportBuffer`] and may be wrapped by any number of
//! filters (compression, packetizing, integrity, logging). Each buffer owns
//! the next one down the chain exclusively.
//!
//! ```text
//! LineWriter -> LoggingBuffer -> CompressBuffer -> TransportBuffer -> socket
//! ```

pub mod chunk;
pub mod compress;
pub mod error;
pub mod log;
pub mod memory;
pub mod packet;
pub mod transport;
pub mod wrap;

use async_trait::async_trait;
use std::sync::Mutex;

pub use chunk::ChunkQueue;
pub use compress::CompressBuffer;
pub use error::{BufferError, BufferResult};
pub use log::{LogSink, LoggingBuffer};
pub use memory::{MemoryBuffer, SplicedBuffer};
pub use packet::{FrameCodec, IdentityCodec, PacketBuffer, MAX_PACKET_SIZE};
pub use transport::TransportBuffer;
pub use wrap::IntegrityCodec;

/// Outcome of a read call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadStatus {
	/// Bytes stored in the destination slice
	pub count: usize,
	/// The peer closed the stream; `count` may still be non-zero
	pub eof: bool,
}

impl ReadStatus {
	pub fn data(count: usize) -> Self {
		ReadStatus { count, eof: false }
	}

	pub fn eof(count: usize) -> Self {
		ReadStatus { count, eof: true }
	}
}

/// One link of a buffer chain
///
/// In blocking mode `read` waits until at least `need` bytes (and at least
/// one) are available or the stream ends; in non-blocking mode it returns
/// whatever is ready, possibly nothing. `write` in non-blocking mode
/// returns [`BufferError::WouldBlock`] when nothing could be accepted.
/// After `shutdown` every operation fails with [`BufferError::Shutdown`].
#[async_trait]
pub trait Buffer: Send {
	/// Short name used in traces
	fn name(&self) -> &'static str;

	async fn read(&mut self, dst: &mut [u8], need: usize) -> BufferResult<ReadStatus>;

	async fn write(&mut self, data: &[u8]) -> BufferResult<usize>;

	/// Push transformed or queued output toward the transport
	async fn flush(&mut self, block: bool) -> BufferResult<()>;

	/// Close this link and every link below it
	async fn shutdown(&mut self) -> BufferResult<()>;

	fn set_blocking(&mut self, blocking: bool);

	fn is_blocking(&self) -> bool;

	fn is_shut_down(&self) -> bool;

	/// Output held by this link and the links below it that the transport
	/// has not taken yet
	fn backlog(&self) -> usize {
		0
	}
}

/// Boxed buffer chain
pub type BoxBuffer = Box<dyn Buffer>;

/// Write all of `data` into `inner`, waiting when the inner link would block
pub async fn write_all(inner: &mut dyn Buffer, mut data: &[u8]) -> BufferResult<()> {
	while !data.is_empty() {
		match inner.write(data).await {
			Ok(0) => return Err(BufferError::Other("buffer accepted no data".to_string())),
			Ok(n) => data = &data[n..],
			Err(BufferError::WouldBlock) => inner.flush(true).await?,
			Err(e) => return Err(e),
		}
	}
	Ok(())
}

/// Move bytes from `pending` into `inner`, consuming what was accepted
///
/// State is updated only after each inner write completes, so dropping the
/// future between writes loses nothing.
pub async fn drain_into(
	inner: &mut dyn Buffer,
	pending: &mut Vec<u8>,
	block: bool,
) -> BufferResult<()> {
	while !pending.is_empty() {
		match inner.write(pending).await {
			Ok(0) => return Err(BufferError::Other("buffer accepted no data".to_string())),
			Ok(n) => {
				pending.drain(..n);
			}
			Err(BufferError::WouldBlock) if !block => return Ok(()),
			Err(BufferError::WouldBlock) => inner.flush(true).await?,
			Err(e) => return Err(e),
		}
	}
	Ok(())
}

/// Transformed output a filter may hold before it refuses more input
pub const FILTER_BACKLOG: usize = 2 * MAX_PACKET_SIZE;

/// Drain a filter's backlog below [`FILTER_BACKLOG`] before it takes more
///
/// Waits in blocking mode. In non-blocking mode, fails with
/// [`BufferError::WouldBlock`] while the backlog stays at or above the
/// bound, so unsent data stays with the writer instead of piling up inside
/// the filter.
pub async fn make_room(inner: &mut dyn Buffer, pending: &mut Vec<u8>) -> BufferResult<()> {
	if pending.len() < FILTER_BACKLOG {
		return Ok(());
	}
	let block = inner.is_blocking();
	drain_into(inner, pending, block).await?;
	if pending.len() >= FILTER_BACKLOG {
		return Err(BufferError::WouldBlock);
	}
	Ok(())
}

// ============================================================================
// MEMORY EXHAUSTION
// ============================================================================

static MEMORY_ERROR_HANDLER: Mutex<Option<fn()>> = Mutex::new(None);

/// Install the process-wide memory exhaustion callback
///
/// The handler must not allocate. It runs once, right before the process
/// exits.
pub fn set_memory_error_handler(handler: fn()) {
	if let Ok(mut slot) = MEMORY_ERROR_HANDLER.lock() {
		*slot = Some(handler);
	}
}

/// Report memory exhaustion and terminate
pub fn memory_exhausted() -> ! {
	let handler = MEMORY_ERROR_HANDLER.lock().ok().and_then(|slot| *slot);
	if let Some(handler) = handler {
		handler();
	}
	std::process::exit(1)
}

// vim: ts=4
