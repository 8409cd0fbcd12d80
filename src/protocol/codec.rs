//! Line codec over buffer chains
//!
//! `LineReader` pulls newline-terminated lines and counted byte runs from
//! an input chain; `LineWriter` queues protocol output in a [`ChunkQueue`]
//! and pushes it into an output chain on flush.
//!
//! Both sides can insert a filter into their chain mid-stream (compression
//! or encryption negotiated by a request). Read-ahead bytes that were
//! already pulled from the old chain are pushed back underneath the new
//! filter so nothing is lost.

use crate::buffer::{BoxBuffer, BufferError, ChunkQueue, SplicedBuffer};
use crate::logging::*;

use super::error::{ProtocolError, ProtocolResult};

const READ_SIZE: usize = 4096;

// ============================================================================
// READER
// ============================================================================

pub struct LineReader {
	input: Option<BoxBuffer>,
	ahead: Vec<u8>,
	eof: bool,
}

impl LineReader {
	pub fn new(input: BoxBuffer) -> Self {
		LineReader { input: Some(input), ahead: Vec::new(), eof: false }
	}

	fn chain(&mut self) -> ProtocolResult<&mut BoxBuffer> {
		self.input.as_mut().ok_or(ProtocolError::Buffer(BufferError::Shutdown))
	}

	/// Pull more bytes into the read-ahead; returns the count (0 at EOF)
	async fn fill(&mut self) -> ProtocolResult<usize> {
		if self.eof {
			return Ok(0);
		}
		let mut scratch = [0u8; READ_SIZE];
		let status = self.chain()?.read(&mut scratch, 1).await?;
		self.ahead.try_reserve(status.count).map_err(|_| BufferError::OutOfMemory)?;
		self.ahead.extend_from_slice(&scratch[..status.count]);
		if status.eof {
			self.eof = true;
		}
		Ok(status.count)
	}

	fn take_line(&mut self, end: usize) -> String {
		let line: Vec<u8> = self.ahead.drain(..=end).collect();
		String::from_utf8_lossy(&line[..end]).into_owned()
	}

	/// Read one line without its terminator; `None` at a clean end of stream
	pub async fn read_line(&mut self) -> ProtocolResult<Option<String>> {
		let mut scanned = 0;
		loop {
			if let Some(pos) = self.ahead[scanned..].iter().position(|&b| b == b'\n') {
				return Ok(Some(self.take_line(scanned + pos)));
			}
			scanned = self.ahead.len();
			if self.fill().await? == 0 && self.eof {
				if self.ahead.is_empty() {
					return Ok(None);
				}
				return Err(ProtocolError::UnexpectedEof(format!(
					"end of file in the middle of a line ({} bytes pending)",
					self.ahead.len()
				)));
			}
		}
	}

	/// Like `read_line`, but refuses lines longer than `max` bytes
	pub async fn read_line_bounded(&mut self, max: usize) -> ProtocolResult<Option<String>> {
		let mut scanned = 0;
		loop {
			let window = self.ahead.len().min(max + 1);
			if let Some(pos) = self.ahead[scanned.min(window)..window].iter().position(|&b| b == b'\n') {
				return Ok(Some(self.take_line(scanned.min(window) + pos)));
			}
			if self.ahead.len() > max {
				return Err(ProtocolError::LineTooLong(max));
			}
			scanned = self.ahead.len();
			if self.fill().await? == 0 && self.eof {
				if self.ahead.is_empty() {
					return Ok(None);
				}
				return Err(ProtocolError::UnexpectedEof(format!(
					"end of file in the middle of a line ({} bytes pending)",
					self.ahead.len()
				)));
			}
		}
	}

	/// Read a line that must be present
	pub async fn expect_line(&mut self, what: &str) -> ProtocolResult<String> {
		self.read_line()
			.await?
			.ok_or_else(|| ProtocolError::UnexpectedEof(format!("end of file reading {}", what)))
	}

	/// Read exactly `n` bytes
	pub async fn read_exact(&mut self, n: usize) -> ProtocolResult<Vec<u8>> {
		while self.ahead.len() < n {
			if self.fill().await? == 0 && self.eof {
				return Err(ProtocolError::UnexpectedEof(format!(
					"end of file after {} of {} bytes",
					self.ahead.len(),
					n
				)));
			}
		}
		Ok(self.ahead.drain(..n).collect())
	}

	/// Skip exactly `n` bytes
	pub async fn discard(&mut self, mut n: usize) -> ProtocolResult<()> {
		loop {
			let take = n.min(self.ahead.len());
			self.ahead.drain(..take);
			n -= take;
			if n == 0 {
				return Ok(());
			}
			if self.fill().await? == 0 && self.eof {
				return Err(ProtocolError::UnexpectedEof(format!("end of file, {} bytes short", n)));
			}
		}
	}

	/// Bytes already read from the chain but not yet consumed
	pub fn buffered(&self) -> usize {
		self.ahead.len()
	}

	pub fn at_eof(&self) -> bool {
		self.eof && self.ahead.is_empty()
	}

	/// Insert a filter on top of the input chain
	pub fn wrap<F>(&mut self, filter: F) -> ProtocolResult<()>
	where
		F: FnOnce(BoxBuffer) -> BoxBuffer,
	{
		let input = self.input.take().ok_or(ProtocolError::Buffer(BufferError::Shutdown))?;
		let ahead = std::mem::take(&mut self.ahead);
		if !ahead.is_empty() {
			debug!("[codec] pushing {} read-ahead bytes under new input filter", ahead.len());
		}
		self.input = Some(filter(SplicedBuffer::unread(ahead, input)));
		self.eof = false;
		Ok(())
	}

	pub fn set_blocking(&mut self, blocking: bool) -> ProtocolResult<()> {
		self.chain()?.set_blocking(blocking);
		Ok(())
	}

	/// Close the input chain; returns the number of unread bytes discarded
	pub async fn shutdown(&mut self) -> ProtocolResult<usize> {
		let leftover = self.ahead.len();
		self.ahead.clear();
		match self.input.as_mut() {
			Some(input) => {
				input.shutdown().await?;
				Ok(leftover)
			}
			None => Err(ProtocolError::Buffer(BufferError::Shutdown)),
		}
	}
}

// ============================================================================
// WRITER
// ============================================================================

pub struct LineWriter {
	output: Option<BoxBuffer>,
	queue: ChunkQueue,
}

impl LineWriter {
	pub fn new(output: BoxBuffer) -> Self {
		LineWriter { output: Some(output), queue: ChunkQueue::new() }
	}

	/// Writer whose queue reports memory exhaustion beyond `limit` bytes
	pub fn with_limit(output: BoxBuffer, limit: usize) -> Self {
		LineWriter { output: Some(output), queue: ChunkQueue::with_limit(limit) }
	}

	fn chain(&mut self) -> ProtocolResult<&mut BoxBuffer> {
		self.output.as_mut().ok_or(ProtocolError::Buffer(BufferError::Shutdown))
	}

	/// Queue raw bytes
	pub fn queue(&mut self, bytes: &[u8]) -> ProtocolResult<()> {
		if self.output.as_ref().map_or(true, |o| o.is_shut_down()) {
			return Err(ProtocolError::Buffer(BufferError::Shutdown));
		}
		self.queue.push(bytes)?;
		Ok(())
	}

	/// Queue one line, appending the terminator
	pub fn line(&mut self, line: &str) -> ProtocolResult<()> {
		self.queue(line.as_bytes())?;
		self.queue(b"\n")
	}

	/// Queue `Argument`/`Argumentx` lines carrying `arg`
	pub fn argument(&mut self, arg: &str) -> ProtocolResult<()> {
		for line in argument_lines(arg) {
			self.line(&line)?;
		}
		Ok(())
	}

	/// Bytes not yet on the transport: queued here or held by a filter
	pub fn queued(&self) -> usize {
		self.queue.len() + self.output.as_ref().map_or(0, |o| o.backlog())
	}

	/// Push queued bytes; without `block`, stop as soon as the chain would block
	pub async fn send(&mut self, block: bool) -> ProtocolResult<()> {
		loop {
			let n = {
				let chunk = match self.queue.front() {
					Some(chunk) => chunk.to_vec(),
					None => break,
				};
				let output = self.output.as_mut().ok_or(ProtocolError::Buffer(BufferError::Shutdown))?;
				match output.write(&chunk).await {
					Ok(n) => n,
					Err(BufferError::WouldBlock) if !block => return Ok(()),
					Err(BufferError::WouldBlock) => {
						output.flush(true).await?;
						0
					}
					Err(e) => return Err(e.into()),
				}
			};
			self.queue.consume(n);
		}
		self.chain()?.flush(block).await?;
		Ok(())
	}

	/// Push everything and wait until the chain has accepted it
	pub async fn flush(&mut self) -> ProtocolResult<()> {
		self.send(true).await
	}

	/// Insert a filter on top of the output chain, flushing first
	pub async fn wrap<F>(&mut self, filter: F) -> ProtocolResult<()>
	where
		F: FnOnce(BoxBuffer) -> BoxBuffer,
	{
		self.flush().await?;
		let output = self.output.take().ok_or(ProtocolError::Buffer(BufferError::Shutdown))?;
		self.output = Some(filter(output));
		Ok(())
	}

	pub fn set_blocking(&mut self, blocking: bool) -> ProtocolResult<()> {
		self.chain()?.set_blocking(blocking);
		Ok(())
	}

	/// Flush fully, then close the output chain
	pub async fn shutdown(&mut self) -> ProtocolResult<()> {
		self.flush().await?;
		self.chain()?.shutdown().await?;
		Ok(())
	}
}

/// Split an argument at newlines into `Argument` + `Argumentx` lines
pub fn argument_lines(arg: &str) -> Vec<String> {
	let mut lines = Vec::new();
	for (i, part) in arg.split('\n').enumerate() {
		if i == 0 {
			lines.push(format!("Argument {}", part));
		} else {
			lines.push(format!("Argumentx {}", part));
		}
	}
	lines
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::buffer::{MemoryBuffer, TransportBuffer};

	fn reader(data: &[u8]) -> LineReader {
		LineReader::new(Box::new(MemoryBuffer::input(data.to_vec())))
	}

	// ─── Reader Tests ───

	#[tokio::test]
	async fn test_reads_one_line_per_call() {
		let mut r = reader(b"Root /cvs\nvalid-requests\n");
		assert_eq!(r.read_line().await.unwrap().unwrap(), "Root /cvs");
		assert_eq!(r.read_line().await.unwrap().unwrap(), "valid-requests");
		assert!(r.read_line().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_missing_terminator_is_protocol_error() {
		let mut r = reader(b"Root /cvs");
		assert!(matches!(r.read_line().await, Err(ProtocolError::UnexpectedEof(_))));
	}

	#[tokio::test]
	async fn test_bounded_line_at_limit_succeeds() {
		let mut r = reader(b"abcde\n");
		assert_eq!(r.read_line_bounded(5).await.unwrap().unwrap(), "abcde");
	}

	#[tokio::test]
	async fn test_bounded_line_over_limit_rejected() {
		let mut r = reader(b"abcdef\n");
		assert!(matches!(r.read_line_bounded(5).await, Err(ProtocolError::LineTooLong(5))));
	}

	#[tokio::test]
	async fn test_bounded_line_without_newline_stops_growing() {
		let (mut tx, rx) = tokio::io::duplex(1 << 16);
		let mut r = LineReader::new(Box::new(TransportBuffer::reader(rx)));
		tokio::spawn(async move {
			use tokio::io::AsyncWriteExt;
			let junk = vec![b'x'; 50_000];
			let _ = tx.write_all(&junk).await;
			// keep the stream open; the reader must give up on its own
			tokio::time::sleep(std::time::Duration::from_secs(5)).await;
		});
		assert!(matches!(r.read_line_bounded(100).await, Err(ProtocolError::LineTooLong(100))));
		assert!(r.buffered() <= 100 + READ_SIZE);
	}

	#[tokio::test]
	async fn test_counted_bytes_follow_line() {
		let mut r = reader(b"5\nhello\nok\n");
		let size: usize = r.read_line().await.unwrap().unwrap().parse().unwrap();
		assert_eq!(r.read_exact(size).await.unwrap(), b"hello");
		assert_eq!(r.read_line().await.unwrap().unwrap(), "");
		assert_eq!(r.read_line().await.unwrap().unwrap(), "ok");
	}

	#[tokio::test]
	async fn test_short_counted_read_fails() {
		let mut r = reader(b"abc");
		assert!(matches!(r.read_exact(4).await, Err(ProtocolError::UnexpectedEof(_))));
	}

	// ─── Writer Tests ───

	#[tokio::test]
	async fn test_writer_queues_until_flush() {
		let (sink, bytes) = MemoryBuffer::output();
		let mut w = LineWriter::new(Box::new(sink));
		w.line("ok").unwrap();
		assert_eq!(w.queued(), 3);
		assert!(bytes.lock().unwrap().is_empty());
		w.flush().await.unwrap();
		assert_eq!(w.queued(), 0);
		assert_eq!(&*bytes.lock().unwrap(), b"ok\n");
	}

	#[tokio::test]
	async fn test_write_after_shutdown_rejected() {
		let (sink, _bytes) = MemoryBuffer::output();
		let mut w = LineWriter::new(Box::new(sink));
		w.shutdown().await.unwrap();
		assert!(w.line("ok").is_err());
	}

	#[test]
	fn test_argument_continuation_lines() {
		assert_eq!(argument_lines("-m"), vec!["Argument -m"]);
		assert_eq!(
			argument_lines("first\nsecond\n"),
			vec!["Argument first", "Argumentx second", "Argumentx "]
		);
	}
}

// vim: ts=4
