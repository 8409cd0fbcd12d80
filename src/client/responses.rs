//! Response handlers
//!
//! Responses are read until `ok` or `error`. File responses carry their
//! own framing (path line, repository line, entry, mode, size, contents);
//! everything else is a single line.

use flate2::read::GzDecoder;
use std::io::Read;

use super::Client;
use crate::error::{ClientError, ClientResult, SyncError};
use crate::logging::*;
use crate::protocol::negotiation::accept_valid_requests;
use crate::protocol::{requests, responses, ProtocolError, Response};
use crate::sync::entries::{DUMMY_FROM_NEW_ENTRY, MERGE_TIMESTAMP};
use crate::sync::{Contents, Existence, Location, Notice, Outcome, Payload};

const EOF_FROM_SERVER: &str = "end of file from server (consult above messages if any)";

/// What the response loop does after one response
enum Flow {
	Continue,
	Ok,
	Error(String),
	Redirect(String),
}

impl Client {
	/// Handle responses until the server ends the request
	pub(super) async fn read_responses(&mut self) -> ClientResult<()> {
		loop {
			let line = match self.conn.reader.read_line().await {
				Ok(Some(line)) => line,
				Ok(None) | Err(ProtocolError::UnexpectedEof(_)) => {
					return Err(ProtocolError::UnexpectedEof(EOF_FROM_SERVER.to_string()).into());
				}
				Err(e) => return Err(e.into()),
			};
			match self.handle_response(&line).await? {
				Flow::Continue => {}
				Flow::Ok => return Ok(()),
				Flow::Error(text) => return Err(ClientError::ServerError(text)),
				Flow::Redirect(root) => return Err(ClientError::Redirect(root)),
			}
		}
	}

	async fn next_line(&mut self, what: &str) -> ClientResult<String> {
		match self.conn.reader.read_line().await {
			Ok(Some(line)) => Ok(line),
			Ok(None) | Err(ProtocolError::UnexpectedEof(_)) => {
				debug!("[client] end of file reading {}", what);
				Err(ProtocolError::UnexpectedEof(EOF_FROM_SERVER.to_string()).into())
			}
			Err(e) => Err(e.into()),
		}
	}

	/// Repository line following a path argument, resolved to a location
	async fn location(&mut self, pathname: &str) -> ClientResult<Location> {
		let repository = self.next_line("repository").await?;
		let loc = self.sync.locate(pathname, &repository)?;
		Ok(loc)
	}

	async fn handle_response(&mut self, line: &str) -> ClientResult<Flow> {
		let table = responses();
		let (index, arg) = match table.lookup(line) {
			Some(found) => found,
			None => {
				warn!("[client] unrecognized response {:?}", line);
				let text = format!("{} client: warning: unrecognized response `{}' from cvs server", self.program(), line);
				self.emit(Notice::Err(text));
				return Ok(Flow::Continue);
			}
		};
		let kind = table.get(index).kind;
		if !matches!(kind, Response::M | Response::E) {
			debug!("[client] {}", line);
		}

		match kind {
			Response::Ok => return Ok(Flow::Ok),
			Response::Error => {
				// `error <errno> <text>`; both parts may be empty
				let text = arg.splitn(2, ' ').nth(1).unwrap_or("").trim().to_string();
				return Ok(Flow::Error(text));
			}
			Response::Redirect => return Ok(Flow::Redirect(arg.to_string())),
			Response::ValidRequests => accept_valid_requests(requests(), &mut self.server_requests, arg)?,
			Response::ForceGzip => self.force_gzip = true,
			Response::Referrer => self.referrer = Some(arg.to_string()),
			Response::Checksum => self.sync.set_checksum(arg)?,
			Response::Mode => self.sync.set_mode(arg)?,
			Response::ModTime => self.sync.set_modtime(arg),

			Response::CheckedIn
			| Response::NewEntry
			| Response::Updated
			| Response::Created
			| Response::UpdateExisting
			| Response::Merged
			| Response::Patched
			| Response::RcsDiff => self.transfer(kind, arg).await?,

			Response::CopyFile => {
				let loc = self.location(arg).await?;
				let new_name = self.next_line("new name").await?;
				self.sync.copy_file(&loc, &new_name)?;
			}
			Response::Removed => {
				let loc = self.location(arg).await?;
				self.sync.remove_file(&loc)?;
			}
			Response::RemoveEntry => {
				let loc = self.location(arg).await?;
				self.sync.remove_entry(&loc)?;
			}
			Response::SetStaticDirectory | Response::ClearStaticDirectory => {
				let loc = self.location(arg).await?;
				self.sync.set_static(&loc, kind == Response::SetStaticDirectory)?;
			}
			Response::SetSticky => {
				let loc = self.location(arg).await?;
				let tag = self.next_line("tag").await?;
				self.sync.set_sticky(&loc, Some(&tag))?;
			}
			Response::ClearSticky => {
				let loc = self.location(arg).await?;
				self.sync.set_sticky(&loc, None)?;
			}
			Response::Template => {
				let loc = self.location(arg).await?;
				let size = self.next_line("template size").await?;
				let data = self.read_counted(&size, false).await?;
				self.sync.set_template(&loc, Some(&data))?;
			}
			Response::ClearTemplate => {
				let loc = self.location(arg).await?;
				self.sync.set_template(&loc, None)?;
			}
			Response::EditFile => {
				let loc = self.location(arg).await?;
				self.sync.edit_file(&loc)?;
			}
			Response::Notified => {
				let loc = self.location(arg).await?;
				self.sync.notified(&loc)?;
			}
			Response::ModuleExpansion => self.modules.push(arg.to_string()),
			Response::WrapperRcsOption => self.wrappers.push(arg.to_string()),

			Response::M => self.emit(Notice::Out(arg.to_string())),
			Response::E => self.emit(Notice::Err(arg.to_string())),
			Response::F => {}
			Response::Mbinary => {
				let size = self.next_line("Mbinary size").await?;
				let data = self.read_counted(&size, false).await?;
				self.emit(Notice::Out(String::from_utf8_lossy(&data).trim_end_matches('\n').to_string()));
			}
			Response::MT => self.tagged_text(arg),
		}
		self.drain_notices();
		Ok(Flow::Continue)
	}

	/// `MT` pieces are joined until `MT newline`; `+tag`/`-tag` only group them
	fn tagged_text(&mut self, arg: &str) {
		let (tag, text) = match arg.split_once(' ') {
			Some((tag, text)) => (tag, text),
			None => (arg, ""),
		};
		match tag {
			"newline" => {
				let line = std::mem::take(&mut self.tagged_line);
				self.emit(Notice::Out(line));
			}
			t if t.starts_with('+') || t.starts_with('-') => {}
			_ => self.tagged_line.push_str(text),
		}
	}

	/// Size line (`z` prefix: gzipped) and the bytes it announces
	async fn read_counted(&mut self, size_line: &str, rcs_diff: bool) -> ClientResult<Vec<u8>> {
		let bad = || ProtocolError::ProtocolViolation(format!("bad size line `{}' from server", size_line));
		let (gzipped, digits) = match size_line.strip_prefix('z') {
			Some(rest) => (true, rest),
			None => (false, size_line),
		};
		let size: usize = digits.parse().map_err(|_| bad())?;
		if gzipped && rcs_diff {
			return Err(ProtocolError::ProtocolViolation("gzipped Rcs-diff is not supported".to_string()).into());
		}
		let data = self.conn.reader.read_exact(size).await?;
		if !gzipped {
			return Ok(data);
		}
		let mut plain = Vec::new();
		GzDecoder::new(&data[..])
			.read_to_end(&mut plain)
			.map_err(|e| SyncError::Other { message: format!("cannot decompress file contents: {}", e) })?;
		Ok(plain)
	}

	/// Entry-carrying responses: everything from `Checked-in` to `Rcs-diff`
	async fn transfer(&mut self, kind: Response, pathname: &str) -> ClientResult<()> {
		let loc = self.location(pathname).await?;
		let entry_line = self.next_line("entries line").await?;

		let (contents, existence, timestamp) = match kind {
			Response::CheckedIn => (Contents::Checkin, Existence::Either, None),
			Response::NewEntry => (Contents::Checkin, Existence::Either, Some(DUMMY_FROM_NEW_ENTRY)),
			Response::Created => (Contents::Update, Existence::New, None),
			Response::UpdateExisting => (Contents::Update, Existence::Existing, None),
			Response::Merged => (Contents::Update, Existence::Either, Some(MERGE_TIMESTAMP)),
			Response::Patched => (Contents::Patch, Existence::Existing, None),
			Response::RcsDiff => (Contents::RcsDiff, Existence::Existing, None),
			_ => (Contents::Update, Existence::Either, None),
		};

		let payload = if contents.has_payload() {
			let mode = self.next_line("mode").await?;
			let size = self.next_line("size").await?;
			let data = self.read_counted(&size, kind == Response::RcsDiff).await?;
			Some(Payload { mode, data })
		} else {
			None
		};

		let outcome = self.sync.update_entries(&loc, &entry_line, contents, existence, payload, timestamp)?;
		debug!("[client] {}: {:?}", loc.short_pathname, outcome);
		if outcome == Outcome::PatchFailed {
			debug!("[client] {} will be fetched again", loc.short_pathname);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::buffer::MemoryBuffer;
	use crate::client::{Connection, CvsRoot};
	use crate::config::Config;
	use std::sync::Arc;
	use tempfile::TempDir;

	fn client(top: &TempDir, server_output: &[u8]) -> Client {
		let config = Config::default();
		let conn = Connection::from_buffers(
			&config,
			Box::new(MemoryBuffer::input(server_output.to_vec())),
			Box::new(MemoryBuffer::output().0),
		);
		let mut client = Client::new(Arc::new(config), CvsRoot::parse("/repo").unwrap(), conn, top.path());
		client.capture_output();
		client
	}

	#[tokio::test]
	async fn test_messages_and_ok() {
		let top = TempDir::new().unwrap();
		let mut c = client(&top, b"M hello\nE careful\nMT +updated\nMT text U \nMT fname foo.c\nMT newline\nMT -updated\nok\n");
		c.read_responses().await.unwrap();
		assert_eq!(
			c.messages(),
			&[
				Notice::Out("hello".to_string()),
				Notice::Err("careful".to_string()),
				Notice::Out("U foo.c".to_string())
			]
		);
	}

	#[tokio::test]
	async fn test_error_carries_text() {
		let top = TempDir::new().unwrap();
		let mut c = client(&top, b"error ENOMEM Virtual memory exhausted.\n");
		match c.read_responses().await {
			Err(ClientError::ServerError(text)) => assert_eq!(text, "Virtual memory exhausted."),
			other => panic!("unexpected {:?}", other.err()),
		}
	}

	#[tokio::test]
	async fn test_eof_reports_server_end() {
		let top = TempDir::new().unwrap();
		let mut c = client(&top, b"M partial\n");
		let err = c.read_responses().await.unwrap_err();
		assert_eq!(err.to_string(), EOF_FROM_SERVER);
	}

	#[tokio::test]
	async fn test_gzipped_rcs_diff_refused() {
		let top = TempDir::new().unwrap();
		let mut c = client(&top, b"Rcs-diff ./\n/repo/foo.c\n/foo.c/1.2///\nu=rw\nz10\n0123456789ok\n");
		assert!(c.read_responses().await.is_err());
	}

	#[tokio::test]
	async fn test_redirect_stops_the_loop() {
		let top = TempDir::new().unwrap();
		let mut c = client(&top, b"Redirect :fork:/other\n");
		match c.read_responses().await {
			Err(ClientError::Redirect(root)) => assert_eq!(root, ":fork:/other"),
			other => panic!("unexpected {:?}", other.err()),
		}
	}
}

// vim: ts=4
