//! Command execution and output multiplexing
//!
//! A command runs in its own tokio task and talks to the connection owner
//! through three pipes:
//!
//! ```text
//! protocol  counted packets: response blocks and flush requests
//! stdout    text, sent to the client as `M` lines
//! stderr    text, sent to the client as `E` lines
//! ```
//!
//! The owner waits on all three at once and copies whatever is ready to
//! the network. Response blocks are copied whole. While the outbound
//! queue is above the high water mark the owner stops reading the pipes,
//! so the task blocks on full pipes until the queue drops below the low
//! water mark. Output already queued keeps moving while the command is
//! quiet: the owner retries the network every [`DRAIN_RETRY`] until the
//! queue is empty. Between stdout and stderr no order is kept beyond
//! "whichever was ready first".

use futures::FutureExt;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::config::FlowControlConfig;
use crate::logging::*;
use crate::protocol::{CountedDecoder, LineWriter, Packet, ProtocolResult};

const READ_SIZE: usize = 8192;

/// How long queued output may wait for a pipe event before the owner
/// offers it to the network again
pub const DRAIN_RETRY: Duration = Duration::from_millis(10);

// ============================================================================
// COMMAND SIDE
// ============================================================================

/// Write ends handed to a running command
pub struct CommandIo {
	protocol: DuplexStream,
	stdout: DuplexStream,
	stderr: DuplexStream,
}

impl CommandIo {
	/// Send one response block; the client sees it as a unit
	pub async fn block(&mut self, data: Vec<u8>) -> io::Result<()> {
		self.protocol.write_all(&Packet::Block(data).to_bytes()).await
	}

	/// Send a response made of lines
	pub async fn response<S: AsRef<str>>(&mut self, lines: &[S]) -> io::Result<()> {
		self.protocol.write_all(&Packet::from_lines(lines).to_bytes()).await
	}

	pub async fn out(&mut self, text: &str) -> io::Result<()> {
		self.stdout.write_all(text.as_bytes()).await
	}

	pub async fn err(&mut self, text: &str) -> io::Result<()> {
		self.stderr.write_all(text.as_bytes()).await
	}

	/// Make everything written to stdout so far reach the client before
	/// later response blocks
	pub async fn flush_stdout(&mut self) -> io::Result<()> {
		self.stdout.flush().await?;
		self.protocol.write_all(&Packet::FlushStdout.to_bytes()).await
	}

	pub async fn flush_stderr(&mut self) -> io::Result<()> {
		self.stderr.flush().await?;
		self.protocol.write_all(&Packet::FlushStderr.to_bytes()).await
	}
}

struct Pipes {
	protocol: DuplexStream,
	stdout: DuplexStream,
	stderr: DuplexStream,
}

fn pipes(capacity: usize) -> (CommandIo, Pipes) {
	let (protocol_tx, protocol_rx) = duplex(capacity);
	let (stdout_tx, stdout_rx) = duplex(capacity);
	let (stderr_tx, stderr_rx) = duplex(capacity);
	(
		CommandIo { protocol: protocol_tx, stdout: stdout_tx, stderr: stderr_tx },
		Pipes { protocol: protocol_rx, stdout: stdout_rx, stderr: stderr_rx },
	)
}

// ============================================================================
// OWNER SIDE
// ============================================================================

/// Turns a byte stream into complete `<tag> <line>` protocol lines
struct LineSplitter {
	tag: &'static str,
	partial: Vec<u8>,
}

impl LineSplitter {
	fn new(tag: &'static str) -> Self {
		LineSplitter { tag, partial: Vec::new() }
	}

	fn feed(&mut self, bytes: &[u8], writer: &mut LineWriter) -> ProtocolResult<()> {
		self.partial.extend_from_slice(bytes);
		while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
			let line: Vec<u8> = self.partial.drain(..=pos).collect();
			writer.queue(self.tag.as_bytes())?;
			writer.queue(b" ")?;
			writer.queue(&line)?;
		}
		Ok(())
	}

	/// Send a final line that lacked its terminator
	fn finish(&mut self, writer: &mut LineWriter) -> ProtocolResult<()> {
		if self.partial.is_empty() {
			return Ok(());
		}
		self.feed(b"\n", writer)
	}
}

/// Copy whatever `pipe` holds right now; returns false at end of stream
fn drain_ready(
	pipe: &mut DuplexStream,
	splitter: &mut LineSplitter,
	writer: &mut LineWriter,
) -> ProtocolResult<bool> {
	let mut buf = [0u8; READ_SIZE];
	loop {
		match pipe.read(&mut buf).now_or_never() {
			None => return Ok(true),
			Some(Ok(0)) => return Ok(false),
			Some(Ok(n)) => splitter.feed(&buf[..n], writer)?,
			Some(Err(e)) => return Err(e.into()),
		}
	}
}

/// How a command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
	Ok,
	Error,
}

/// Run `body` as a command and multiplex its output onto `writer`
///
/// Returns once every pipe reached end of stream and the task finished.
/// The caller writes the final `ok` or `error` line.
pub async fn execute<F, Fut>(
	writer: &mut LineWriter,
	flow: &FlowControlConfig,
	client_supports_f: bool,
	body: F,
) -> ProtocolResult<Completion>
where
	F: FnOnce(CommandIo) -> Fut,
	Fut: Future<Output = io::Result<u32>> + Send + 'static,
{
	let (io, mut pipes) = pipes(flow.pipe_capacity.max(1));
	let task = tokio::spawn(body(io));

	writer.set_blocking(false)?;
	let result = multiplex(writer, flow, client_supports_f, &mut pipes).await;
	writer.set_blocking(true)?;
	let mut failed = match result {
		Ok(failed) => failed,
		Err(e) => {
			task.abort();
			return Err(e);
		}
	};

	match task.await {
		Ok(Ok(0)) => {}
		Ok(Ok(errors)) => {
			debug!("[command] finished with {} errors", errors);
			failed = true;
		}
		Ok(Err(e)) => {
			writer.line(&format!("E {}", e))?;
			failed = true;
		}
		Err(e) => {
			error!("[command] task failed: {}", e);
			writer.line("E Terminated with fatal signal")?;
			failed = true;
		}
	}
	Ok(if failed { Completion::Error } else { Completion::Ok })
}

async fn multiplex(
	writer: &mut LineWriter,
	flow: &FlowControlConfig,
	client_supports_f: bool,
	pipes: &mut Pipes,
) -> ProtocolResult<bool> {
	let mut decoder = CountedDecoder::new();
	let mut stdout = LineSplitter::new("M");
	let mut stderr = LineSplitter::new("E");
	let (mut protocol_open, mut stdout_open, mut stderr_open) = (true, true, true);
	let mut throttled = false;
	let mut failed = false;
	let mut pbuf = vec![0u8; READ_SIZE];
	let mut obuf = vec![0u8; READ_SIZE];
	let mut ebuf = vec![0u8; READ_SIZE];

	while protocol_open || stdout_open || stderr_open {
		if writer.queued() > flow.high_water && !throttled {
			debug!("[command] {} bytes queued, pausing command output", writer.queued());
			throttled = true;
		}
		if throttled {
			writer.send(true).await?;
			if writer.queued() <= flow.low_water {
				debug!("[command] resuming command output");
				throttled = false;
			}
			continue;
		}

		let pending = writer.queued() > 0;
		tokio::select! {
			r = pipes.protocol.read(&mut pbuf), if protocol_open => {
				let n = r?;
				if n == 0 {
					protocol_open = false;
				} else {
					decoder.feed(&pbuf[..n]);
				}
			}
			r = pipes.stdout.read(&mut obuf), if stdout_open => {
				let n = r?;
				if n == 0 {
					stdout_open = false;
				} else {
					stdout.feed(&obuf[..n], writer)?;
				}
			}
			r = pipes.stderr.read(&mut ebuf), if stderr_open => {
				let n = r?;
				if n == 0 {
					stderr_open = false;
				} else {
					stderr.feed(&ebuf[..n], writer)?;
				}
			}
			// the send below runs outside the select and is never cancelled
			_ = tokio::time::sleep(DRAIN_RETRY), if pending => {}
		}

		loop {
			match decoder.next_packet() {
				Ok(Some(Packet::Block(data))) => writer.queue(&data)?,
				Ok(Some(Packet::FlushStdout)) => {
					if stdout_open {
						stdout_open = drain_ready(&mut pipes.stdout, &mut stdout, writer)?;
					}
				}
				Ok(Some(Packet::FlushStderr)) => {
					if client_supports_f {
						writer.line("F")?;
					}
					if stderr_open {
						stderr_open = drain_ready(&mut pipes.stderr, &mut stderr, writer)?;
					}
				}
				Ok(None) => break,
				Err(e) => {
					writer.line(&format!("E {}", e))?;
					failed = true;
					protocol_open = false;
					decoder = CountedDecoder::new();
					break;
				}
			}
		}
		writer.send(false).await?;
	}

	stdout.finish(writer)?;
	stderr.finish(writer)?;
	if decoder.finish().is_err() {
		writer.line("E Protocol error: uncounted data discarded")?;
		failed = true;
	}
	Ok(failed)
}


// vim: ts=4
