//! Logging (tee) buffer
//!
//! Copies every byte that passes through the wrapped buffer to a side sink
//! without changing what the caller observes. Sink failures are reported
//! once and logging stops; the primary stream is never affected.
//!
//! A logging buffer on an input chain can be rewound: the log is closed
//! for writing, reopened for reading and spliced in front of the live
//! inner buffer, so the logged bytes are delivered again.

use async_trait::async_trait;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::error::{BufferError, BufferResult};
use super::memory::{MemoryBuffer, SplicedBuffer};
use super::transport::TransportBuffer;
use super::{BoxBuffer, Buffer, ReadStatus};
use crate::logging::*;

/// Destination of logged bytes
pub enum LogSink {
	/// Append to a file opened in binary mode
	File { file: fs::File, path: PathBuf },
	/// Keep bytes in memory until `threshold`, then spill to `spill_path`
	Memory { data: Vec<u8>, threshold: usize, spill_path: PathBuf, spilled: Option<fs::File> },
}

impl LogSink {
	/// Truncate or create `path` and log into it
	pub fn file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
		let path = path.as_ref().to_path_buf();
		let file = fs::OpenOptions::new().create(true).write(true).truncate(true).open(&path)?;
		Ok(LogSink::File { file, path })
	}

	/// In-memory log that moves to `spill_path` once it exceeds `threshold`
	pub fn memory<P: AsRef<Path>>(threshold: usize, spill_path: P) -> Self {
		LogSink::Memory {
			data: Vec::new(),
			threshold,
			spill_path: spill_path.as_ref().to_path_buf(),
			spilled: None,
		}
	}

	pub fn is_spilled(&self) -> bool {
		matches!(self, LogSink::File { .. } | LogSink::Memory { spilled: Some(_), .. })
	}

	fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
		match self {
			LogSink::File { file, .. } => file.write_all(bytes),
			LogSink::Memory { data, threshold, spill_path, spilled } => {
				if let Some(file) = spilled {
					return file.write_all(bytes);
				}
				if data.len() + bytes.len() <= *threshold {
					data.extend_from_slice(bytes);
					return Ok(());
				}
				let mut file = fs::OpenOptions::new()
					.create(true)
					.write(true)
					.truncate(true)
					.open(spill_path.as_path())?;
				file.write_all(data)?;
				file.write_all(bytes)?;
				data.clear();
				*spilled = Some(file);
				Ok(())
			}
		}
	}

	/// Close for writing and return a buffer replaying the logged bytes
	async fn into_replay(self) -> io::Result<BoxBuffer> {
		let path = match self {
			LogSink::Memory { data, spilled: None, .. } => {
				return Ok(Box::new(MemoryBuffer::input(data)));
			}
			LogSink::Memory { mut spilled, spill_path, .. } => {
				if let Some(file) = spilled.as_mut() {
					file.flush()?;
				}
				spill_path
			}
			LogSink::File { mut file, path } => {
				file.flush()?;
				path
			}
		};
		let reader = tokio::fs::File::open(&path).await?;
		Ok(Box::new(TransportBuffer::reader(reader)))
	}
}

/// Transparent tee around another buffer
pub struct LoggingBuffer {
	inner: BoxBuffer,
	sink: Option<LogSink>,
	shut: bool,
}

impl LoggingBuffer {
	pub fn new(inner: BoxBuffer, sink: LogSink) -> Self {
		LoggingBuffer { inner, sink: Some(sink), shut: false }
	}

	fn record(&mut self, bytes: &[u8]) {
		if bytes.is_empty() {
			return;
		}
		if let Some(sink) = self.sink.as_mut() {
			if let Err(e) = sink.append(bytes) {
				warn!("[log] cannot write protocol log, logging disabled: {}", e);
				self.sink = None;
			}
		}
	}

	/// True while bytes are still being logged
	pub fn is_logging(&self) -> bool {
		self.sink.is_some()
	}

	/// Replay the logged input, then continue with the live inner buffer
	pub async fn rewind(mut self) -> BufferResult<BoxBuffer> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		let sink = self
			.sink
			.take()
			.ok_or_else(|| BufferError::Other("protocol log unavailable for rewind".to_string()))?;
		let replay = sink.into_replay().await?;
		Ok(Box::new(SplicedBuffer::new(replay, self.inner)))
	}
}

#[async_trait]
impl Buffer for LoggingBuffer {
	fn name(&self) -> &'static str {
		"log"
	}

	async fn read(&mut self, dst: &mut [u8], need: usize) -> BufferResult<ReadStatus> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		let status = self.inner.read(dst, need).await?;
		self.record(&dst[..status.count]);
		Ok(status)
	}

	async fn write(&mut self, data: &[u8]) -> BufferResult<usize> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		let n = self.inner.write(data).await?;
		self.record(&data[..n]);
		Ok(n)
	}

	async fn flush(&mut self, block: bool) -> BufferResult<()> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		if let Some(LogSink::File { file, path }) = self.sink.as_mut() {
			if let Err(e) = file.flush() {
				warn!("[log] cannot flush {}, logging disabled: {}", path.display(), e);
				self.sink = None;
			}
		}
		self.inner.flush(block).await
	}

	async fn shutdown(&mut self) -> BufferResult<()> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		self.shut = true;
		self.sink = None;
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
		self.inner.backlog()
	}
}

/// Tee an input chain into `<prefix>.in` and an output chain into `<prefix>.out`
///
/// A log that cannot be opened is reported and skipped.
pub fn trace_chains(prefix: &Path, input: BoxBuffer, output: BoxBuffer) -> (BoxBuffer, BoxBuffer) {
	let path = |suffix: &str| PathBuf::from(format!("{}.{}", prefix.display(), suffix));
	let input: BoxBuffer = match LogSink::file(path("in")) {
		Ok(sink) => Box::new(LoggingBuffer::new(input, sink)),
		Err(e) => {
			warn!("[log] cannot open {}: {}", path("in").display(), e);
			input
		}
	};
	let output: BoxBuffer = match LogSink::file(path("out")) {
		Ok(sink) => Box::new(LoggingBuffer::new(output, sink)),
		Err(e) => {
			warn!("[log] cannot open {}: {}", path("out").display(), e);
			output
		}
	};
	(input, output)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	async fn read_all(buf: &mut dyn Buffer) -> Vec<u8> {
		let mut result = Vec::new();
		loop {
			let mut dst = [0u8; 7];
			let status = buf.read(&mut dst, 1).await.unwrap();
			result.extend_from_slice(&dst[..status.count]);
			if status.eof {
				return result;
			}
		}
	}

	#[tokio::test]
	async fn test_output_is_teed_to_file() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("trace.out");
		let (sink, bytes) = MemoryBuffer::output();
		let mut buf = LoggingBuffer::new(Box::new(sink), LogSink::file(&path).unwrap());
		buf.write(b"Valid-requests Root\n").await.unwrap();
		buf.flush(true).await.unwrap();
		assert_eq!(&*bytes.lock().unwrap(), b"Valid-requests Root\n");
		assert_eq!(fs::read(&path).unwrap(), b"Valid-requests Root\n");
	}

	#[tokio::test]
	async fn test_memory_sink_spills_past_threshold() {
		let dir = TempDir::new().unwrap();
		let spill = dir.path().join("spill");
		let mut sink = LogSink::memory(4, &spill);
		sink.append(b"abc").unwrap();
		assert!(!sink.is_spilled());
		sink.append(b"defg").unwrap();
		assert!(sink.is_spilled());
		drop(sink);
		assert_eq!(fs::read(&spill).unwrap(), b"abcdefg");
	}

	#[tokio::test]
	async fn test_rewind_replays_then_continues() {
		let dir = TempDir::new().unwrap();
		let spill = dir.path().join("spill");
		let live = MemoryBuffer::input(b"Root /cvs\nnoop\n".to_vec());
		let mut buf = LoggingBuffer::new(Box::new(live), LogSink::memory(1 << 20, &spill));
		let mut dst = [0u8; 10];
		let status = buf.read(&mut dst, 10).await.unwrap();
		assert_eq!(&dst[..status.count], b"Root /cvs\n");

		let mut replay = buf.rewind().await.unwrap();
		assert_eq!(read_all(replay.as_mut()).await, b"Root /cvs\nnoop\n");
	}

	#[tokio::test]
	async fn test_rewind_from_spilled_file() {
		let dir = TempDir::new().unwrap();
		let spill = dir.path().join("spill");
		let live = MemoryBuffer::input(b"0123456789tail".to_vec());
		let mut buf = LoggingBuffer::new(Box::new(live), LogSink::memory(3, &spill));
		let mut dst = [0u8; 10];
		buf.read(&mut dst, 10).await.unwrap();
		let mut replay = buf.rewind().await.unwrap();
		assert_eq!(read_all(replay.as_mut()).await, b"0123456789tail");
	}

	#[tokio::test]
	async fn test_sink_failure_does_not_fail_stream() {
		let dir = TempDir::new().unwrap();
		let spill = dir.path().join("missing").join("spill");
		let live = MemoryBuffer::input(b"abcdef".to_vec());
		let mut buf = LoggingBuffer::new(Box::new(live), LogSink::memory(2, &spill));
		let mut dst = [0u8; 6];
		let status = buf.read(&mut dst, 6).await.unwrap();
		assert_eq!(status.count, 6);
		assert!(!buf.is_logging());
	}

	#[tokio::test]
	async fn test_full_log_device_does_not_fail_writes() {
		if !Path::new("/dev/full").exists() {
			return;
		}
		let (sink, bytes) = MemoryBuffer::output();
		let mut buf = LoggingBuffer::new(Box::new(sink), LogSink::file("/dev/full").unwrap());
		assert_eq!(buf.write(b"ok\n").await.unwrap(), 3);
		buf.flush(true).await.unwrap();
		assert!(!buf.is_logging());
		assert_eq!(&*bytes.lock().unwrap(), b"ok\n");
	}
}

// vim: ts=4
