//! Protocol server
//!
//! One [`Server`] owns one connection: the input and output buffer chains,
//! the per-connection state built by requests, and the repository the
//! `Root` request selected. It reads request lines until the client goes
//! away, runs commands through [`command::execute`] and removes its
//! temporary workspace when done, however the connection ended.
//!
//! # Example Usage
//!
//! ```ignore
//! use cvsproto::server;
//!
//! // cvs server over stdin/stdout
//! server::serve_stdio(config).await?;
//!
//! // password server on a TCP port
//! server::serve_pserver(config, "0.0.0.0:2401").await?;
//! ```

pub mod command;
pub mod commands;
pub mod repository;
mod requests;
pub mod response;
pub mod state;
pub mod workspace;

use globset::GlobSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

use crate::buffer::log::trace_chains;
use crate::buffer::{self, BoxBuffer, TransportBuffer};
use crate::config::Config;
use crate::logging::*;
use crate::protocol::auth::{self, AuthKind};
use crate::protocol::{LineReader, LineWriter, ProtocolError, ProtocolResult};
use repository::{Repository, CVSROOT};
use state::{ConnectionState, Phase};

/// Sent on stdout when memory runs out; must not allocate
const FATAL_MEMORY: &[u8] = b"E Fatal server error, aborting.\nerror ENOMEM Virtual memory exhausted.\n";

fn memory_handler() {
	// straight to the descriptor, past any buffering
	if rustix::io::write(std::io::stdout(), FATAL_MEMORY).is_err() {
		eprintln!("[server] cannot report memory exhaustion to the client");
	}
}

/// Make allocation failures in the buffer layer end the process with a protocol error
pub fn install_memory_handler() {
	buffer::set_memory_error_handler(memory_handler);
}

pub struct Server {
	config: Arc<Config>,
	reader: LineReader,
	writer: LineWriter,
	state: ConnectionState,
	/// Repository selected by `Root`
	repository: Option<Arc<dyn Repository>>,
	/// Patterns `Questionable` files are checked against, built on first use
	ignore: Option<GlobSet>,
	cleaned: AtomicBool,
}

impl Server {
	/// Server over raw buffer chains, with protocol logs if configured
	pub fn new(config: Arc<Config>, input: BoxBuffer, output: BoxBuffer) -> Self {
		let (input, output) = match &config.trace.log_prefix {
			Some(prefix) => trace_chains(prefix, input, output),
			None => (input, output),
		};
		Server::from_codec(config, LineReader::new(input), LineWriter::new(output))
	}

	/// Server over an already established codec, as after the pserver preamble
	pub fn from_codec(config: Arc<Config>, reader: LineReader, writer: LineWriter) -> Self {
		let state = ConnectionState::new(config.server.max_arguments);
		Server { config, reader, writer, state, repository: None, ignore: None, cleaned: AtomicBool::new(false) }
	}

	/// Restrict the connection to the repository the client authenticated for
	pub fn set_pserver(&mut self, root: &str, user: &str) {
		self.state.pserver_root = Some(root.to_string());
		self.state.caller = Some(user.to_string());
	}

	/// Serve requests until the client disconnects, then clean up
	pub async fn run(&mut self) -> ProtocolResult<()> {
		let result = self.serve_requests().await;
		if let Err(e) = &result {
			if e.is_out_of_memory() {
				memory_handler();
			}
		}
		self.cleanup().await;
		result
	}

	async fn serve_requests(&mut self) -> ProtocolResult<()> {
		while self.state.phase != Phase::Terminated {
			let line = match self.reader.read_line().await {
				Ok(Some(line)) => line,
				Ok(None) => {
					debug!("[server] client closed the connection");
					return Ok(());
				}
				Err(ProtocolError::UnexpectedEof(_)) => {
					error!("[server] Dying gasps received from client.");
					return Ok(());
				}
				Err(e) => return Err(e),
			};
			match self.dispatch(&line).await {
				Ok(()) => {}
				Err(e) if e.is_fatal() => {
					self.state.phase = Phase::Terminated;
					return Err(e);
				}
				Err(e) => {
					warn!("[server] {}", e);
					if !self.state.pending.has_error() {
						self.state.pending.set_error(format!("E {}", e));
					}
				}
			}
		}
		Ok(())
	}

	/// Release everything the connection holds; safe to call more than once
	pub async fn cleanup(&mut self) {
		if self.cleaned.swap(true, Ordering::SeqCst) {
			return;
		}
		self.state.phase = Phase::Terminated;

		if let Err(e) = self.writer.shutdown().await {
			debug!("[server] output shutdown: {}", e);
		}
		match self.reader.shutdown().await {
			Ok(0) => {}
			Ok(left) => debug!("[server] {} unread bytes discarded", left),
			Err(e) => debug!("[server] input shutdown: {}", e),
		}
		if let Some(workspace) = self.state.workspace.take() {
			if self.config.server.keep_workspace {
				info!("[server] keeping workspace {}", workspace.root().display());
			} else if let Err(e) = workspace.remove() {
				warn!("[server] cannot remove {}: {}", workspace.root().display(), e);
			}
		}
	}
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// `cvs server`: the protocol on stdin and stdout
pub async fn serve_stdio(config: Arc<Config>) -> ProtocolResult<()> {
	install_memory_handler();
	let input = Box::new(TransportBuffer::reader(tokio::io::stdin()));
	let output = Box::new(TransportBuffer::writer(tokio::io::stdout()));
	Server::new(config, input, output).run().await
}

/// `cvs pserver`: accept password-authenticated connections on `addr`
pub async fn serve_pserver(config: Arc<Config>, addr: &str) -> ProtocolResult<()> {
	let listener = TcpListener::bind(addr).await.map_err(ProtocolError::Io)?;
	info!("[pserver] listening on {}", addr);
	loop {
		let (stream, peer) = listener.accept().await.map_err(ProtocolError::Io)?;
		debug!("[pserver] connection from {}", peer);
		let config = config.clone();
		tokio::spawn(async move {
			if let Err(e) = handle_pserver(config, stream).await {
				warn!("[pserver] {}: {}", peer, e);
			}
		});
	}
}

/// Run the password preamble on `stream`, then the protocol if accepted
pub async fn handle_pserver(config: Arc<Config>, stream: TcpStream) -> ProtocolResult<()> {
	let (read_half, write_half) = stream.into_split();
	let mut reader = LineReader::new(Box::new(TransportBuffer::reader(read_half)));
	let mut writer = LineWriter::new(Box::new(TransportBuffer::writer(write_half)));

	let request = auth::read_request(&mut reader, config.server.max_line_length).await?;
	let passwd_path = match &config.auth.passwd_file {
		Some(path) => path.clone(),
		None => PathBuf::from(&request.repository).join(CVSROOT).join("passwd"),
	};
	let accepted = request.repository.starts_with('/')
		&& match tokio::fs::read_to_string(&passwd_path).await {
			Ok(passwd) => auth::check_password(&passwd, &request.user, &request.password),
			Err(e) => {
				warn!("[pserver] cannot read {}: {}", passwd_path.display(), e);
				false
			}
		};

	if !accepted {
		info!("[pserver] rejected {} for {}", request.user, request.repository);
		writer.line(auth::REJECTED)?;
		writer.flush().await?;
		return writer.shutdown().await;
	}
	info!("[pserver] accepted {} for {}", request.user, request.repository);
	writer.line(auth::ACCEPTED)?;
	writer.flush().await?;
	if request.kind == AuthKind::Verify {
		return writer.shutdown().await;
	}

	let mut server = Server::from_codec(config, reader, writer);
	server.set_pserver(request.repository.trim_end_matches('/'), &request.user);
	server.run().await
}

// vim: ts=4
