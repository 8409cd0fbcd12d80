//! Transport buffer over an async byte stream endpoint
//!
//! The endpoint is either the read half or the write half of a socket, a
//! pipe or a file. Blocking mode awaits the endpoint; non-blocking mode
//! polls it exactly once.

use async_trait::async_trait;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{BufferError, BufferResult};
use super::{Buffer, ReadStatus};
use crate::logging::*;

enum Endpoint {
	Reader(Box<dyn AsyncRead + Send + Unpin>),
	Writer(Box<dyn AsyncWrite + Send + Unpin>),
	Closed,
}

/// Innermost link of every chain
pub struct TransportBuffer {
	endpoint: Endpoint,
	blocking: bool,
	shut: bool,
}

impl TransportBuffer {
	/// Input chain endpoint
	pub fn reader<R>(reader: R) -> Self
	where
		R: AsyncRead + Send + Unpin + 'static,
	{
		TransportBuffer { endpoint: Endpoint::Reader(Box::new(reader)), blocking: true, shut: false }
	}

	/// Output chain endpoint
	pub fn writer<W>(writer: W) -> Self
	where
		W: AsyncWrite + Send + Unpin + 'static,
	{
		TransportBuffer { endpoint: Endpoint::Writer(Box::new(writer)), blocking: true, shut: false }
	}

	pub fn is_input(&self) -> bool {
		matches!(self.endpoint, Endpoint::Reader(_))
	}
}

#[async_trait]
impl Buffer for TransportBuffer {
	fn name(&self) -> &'static str {
		"transport"
	}

	async fn read(&mut self, dst: &mut [u8], need: usize) -> BufferResult<ReadStatus> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		let blocking = self.blocking;
		let reader = match &mut self.endpoint {
			Endpoint::Reader(r) => r,
			_ => return Err(BufferError::Other("read from an output transport".to_string())),
		};
		if dst.is_empty() {
			return Ok(ReadStatus::data(0));
		}

		if !blocking {
			return match reader.read(dst).now_or_never() {
				None => Ok(ReadStatus::data(0)),
				Some(Ok(0)) => Ok(ReadStatus::eof(0)),
				Some(Ok(n)) => Ok(ReadStatus::data(n)),
				Some(Err(e)) => match BufferError::from(e) {
					BufferError::WouldBlock => Ok(ReadStatus::data(0)),
					other => Err(other),
				},
			};
		}

		let need = need.max(1).min(dst.len());
		let mut got = 0;
		while got < need {
			let n = reader.read(&mut dst[got..]).await?;
			if n == 0 {
				return Ok(ReadStatus::eof(got));
			}
			got += n;
		}
		Ok(ReadStatus::data(got))
	}

	async fn write(&mut self, data: &[u8]) -> BufferResult<usize> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		let blocking = self.blocking;
		let writer = match &mut self.endpoint {
			Endpoint::Writer(w) => w,
			_ => return Err(BufferError::Other("write to an input transport".to_string())),
		};
		if data.is_empty() {
			return Ok(0);
		}

		if blocking {
			writer.write_all(data).await?;
			return Ok(data.len());
		}
		match writer.write(data).now_or_never() {
			None => Err(BufferError::WouldBlock),
			Some(Ok(0)) => Err(BufferError::Io(std::io::ErrorKind::WriteZero.into())),
			Some(Ok(n)) => Ok(n),
			Some(Err(e)) => Err(e.into()),
		}
	}

	async fn flush(&mut self, block: bool) -> BufferResult<()> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		if let Endpoint::Writer(w) = &mut self.endpoint {
			if block {
				w.flush().await?;
			} else if let Some(result) = w.flush().now_or_never() {
				match result {
					Ok(()) => {}
					Err(e) => match BufferError::from(e) {
						BufferError::WouldBlock => {}
						other => return Err(other),
					},
				}
			}
		}
		Ok(())
	}

	async fn shutdown(&mut self) -> BufferResult<()> {
		if self.shut {
			return Err(BufferError::Shutdown);
		}
		self.shut = true;
		let endpoint = std::mem::replace(&mut self.endpoint, Endpoint::Closed);
		match endpoint {
			Endpoint::Reader(mut r) => {
				let mut scratch = [0u8; 4096];
				let mut discarded = 0usize;
				while let Some(Ok(n)) = r.read(&mut scratch).now_or_never() {
					if n == 0 {
						break;
					}
					discarded += n;
				}
				if discarded > 0 {
					debug!("[transport] discarded {} trailing bytes at shutdown", discarded);
				}
			}
			Endpoint::Writer(mut w) => {
				w.flush().await?;
				w.shutdown().await?;
			}
			Endpoint::Closed => {}
		}
		Ok(())
	}

	fn set_blocking(&mut self, blocking: bool) {
		self.blocking = blocking;
	}

	fn is_blocking(&self) -> bool {
		self.blocking
	}

	fn is_shut_down(&self) -> bool {
		self.shut
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_blocking_read_waits_for_need() {
		let (mut tx, rx) = tokio::io::duplex(64);
		let mut buf = TransportBuffer::reader(rx);
		tokio::spawn(async move {
			tx.write_all(b"ab").await.unwrap();
			tokio::task::yield_now().await;
			tx.write_all(b"cd").await.unwrap();
		});
		let mut dst = [0u8; 8];
		let status = buf.read(&mut dst, 4).await.unwrap();
		assert_eq!(status, ReadStatus::data(4));
		assert_eq!(&dst[..4], b"abcd");
	}

	#[tokio::test]
	async fn test_eof_is_not_an_error() {
		let (mut tx, rx) = tokio::io::duplex(64);
		tx.write_all(b"xy").await.unwrap();
		drop(tx);
		let mut buf = TransportBuffer::reader(rx);
		let mut dst = [0u8; 8];
		let status = buf.read(&mut dst, 8).await.unwrap();
		assert_eq!(status, ReadStatus::eof(2));
	}

	#[tokio::test]
	async fn test_nonblocking_read_returns_immediately() {
		let (_tx, rx) = tokio::io::duplex(64);
		let mut buf = TransportBuffer::reader(rx);
		buf.set_blocking(false);
		let mut dst = [0u8; 8];
		let status = buf.read(&mut dst, 8).await.unwrap();
		assert_eq!(status, ReadStatus::data(0));
	}

	#[tokio::test]
	async fn test_nonblocking_write_reports_would_block() {
		let (tx, _rx) = tokio::io::duplex(4);
		let mut buf = TransportBuffer::writer(tx);
		buf.set_blocking(false);
		assert_eq!(buf.write(b"abcdefgh").await.unwrap(), 4);
		assert!(buf.write(b"ijkl").await.unwrap_err().is_would_block());
	}

	#[tokio::test]
	async fn test_use_after_shutdown_rejected() {
		let (tx, _rx) = tokio::io::duplex(64);
		let mut buf = TransportBuffer::writer(tx);
		buf.shutdown().await.unwrap();
		assert!(matches!(buf.write(b"x").await, Err(BufferError::Shutdown)));
		assert!(matches!(buf.flush(true).await, Err(BufferError::Shutdown)));
		assert!(matches!(buf.shutdown().await, Err(BufferError::Shutdown)));
	}
}

// vim: ts=4
