//! Connections to a server
//!
//! Local and `:ext:` roots start a server process and talk to it over its
//! stdin/stdout; `:pserver:` roots open TCP and run the password preamble
//! first. Either way the result is a pair of buffer chains wrapped in the
//! line codec.

use std::path::Path;
use std::process::Stdio;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

use super::root::{CvsRoot, Method, PSERVER_PORT};
use crate::buffer::log::trace_chains;
use crate::buffer::{BoxBuffer, TransportBuffer};
use crate::config::Config;
use crate::error::ConnectionError;
use crate::logging::*;
use crate::protocol::auth::{self, AuthKind, AuthRequest};
use crate::protocol::{LineReader, LineWriter};

/// An open connection: the codec plus the server process, if one was started
pub struct Connection {
	pub reader: LineReader,
	pub writer: LineWriter,
	child: Option<Child>,
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection").field("child", &self.child.as_ref().and_then(|c| c.id())).finish()
	}
}

impl Connection {
	/// Connection over existing buffer chains, with protocol logs if configured
	pub fn from_buffers(config: &Config, input: BoxBuffer, output: BoxBuffer) -> Self {
		let (input, output) = match &config.trace.log_prefix {
			Some(prefix) => trace_chains(prefix, input, output),
			None => (input, output),
		};
		Connection { reader: LineReader::new(input), writer: LineWriter::new(output), child: None }
	}

	/// Connect to the server `root` names
	pub async fn open(config: &Config, root: &CvsRoot) -> Result<Self, ConnectionError> {
		match root.method {
			Method::Local | Method::Fork => {
				let program = std::env::var("CVS_SERVER")
					.ok()
					.or_else(|| std::env::current_exe().ok().map(|p| p.display().to_string()))
					.unwrap_or_else(|| "cvsproto".to_string());
				let mut command = Command::new(&program);
				command.arg("server");
				Connection::spawn(config, command, &format!("{} server", program)).await
			}
			Method::Ext => {
				let rsh = std::env::var("CVS_RSH").unwrap_or_else(|_| "ssh".to_string());
				let server = std::env::var("CVS_SERVER").unwrap_or_else(|_| "cvs".to_string());
				let host = root.host().unwrap_or("localhost");
				let mut command = Command::new(&rsh);
				if let Some(user) = &root.user {
					command.arg("-l").arg(user);
				}
				command.arg(host).arg(&server).arg("server");
				Connection::spawn(config, command, &format!("{} {} {} server", rsh, host, server)).await
			}
			Method::Pserver => Connection::pserver(config, root).await,
		}
	}

	async fn spawn(config: &Config, mut command: Command, cmdline: &str) -> Result<Self, ConnectionError> {
		debug!("[client] starting {}", cmdline);
		let mut child = command
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| ConnectionError::SpawnFailed { cmd: cmdline.to_string(), source: e })?;

		let stdin = child.stdin.take().ok_or(ConnectionError::StdioUnavailable { what: "stdin".to_string() })?;
		let stdout = child.stdout.take().ok_or(ConnectionError::StdioUnavailable { what: "stdout".to_string() })?;

		let mut conn =
			Connection::from_buffers(config, Box::new(TransportBuffer::reader(stdout)), Box::new(TransportBuffer::writer(stdin)));
		conn.child = Some(child);
		Ok(conn)
	}

	async fn pserver(config: &Config, root: &CvsRoot) -> Result<Self, ConnectionError> {
		let host = root.host().unwrap_or("localhost").to_string();
		let port = root.port.unwrap_or(PSERVER_PORT);
		debug!("[client] connecting to {}:{}", host, port);
		let stream = TcpStream::connect((host.as_str(), port))
			.await
			.map_err(|e| ConnectionError::ConnectFailed { host: format!("{}:{}", host, port), source: e })?;
		let (read_half, write_half) = stream.into_split();
		let mut conn = Connection::from_buffers(
			config,
			Box::new(TransportBuffer::reader(read_half)),
			Box::new(TransportBuffer::writer(write_half)),
		);

		let user = root.user.clone().unwrap_or_else(default_user);
		let password = match &root.password {
			Some(password) => password.clone(),
			None => stored_password(&root.for_auth()).unwrap_or_default(),
		};
		let request =
			AuthRequest { kind: AuthKind::Auth, repository: root.directory().to_string(), user: user.clone(), password };
		auth::write_request(&mut conn.writer, &request)?;
		conn.writer.flush().await?;
		if !auth::read_verdict(&mut conn.reader, config.server.max_line_length).await? {
			return Err(ConnectionError::AuthRejected { user, root: root.to_string() });
		}
		info!("[client] authenticated as {}", user);
		Ok(conn)
	}

	/// Close both directions and wait for the server process
	pub async fn close(mut self) {
		if let Err(e) = self.writer.shutdown().await {
			debug!("[client] output shutdown: {}", e);
		}
		if let Err(e) = self.reader.shutdown().await {
			debug!("[client] input shutdown: {}", e);
		}
		if let Some(mut child) = self.child.take() {
			match child.wait().await {
				Ok(status) if !status.success() => warn!("[client] server exited with {}", status),
				Ok(_) => {}
				Err(e) => warn!("[client] cannot wait for server: {}", e),
			}
		}
	}
}

fn default_user() -> String {
	std::env::var("USER").or_else(|_| std::env::var("LOGNAME")).unwrap_or_else(|_| "anonymous".to_string())
}

/// Scrambled password for `root` from `$CVS_PASSFILE` or `~/.cvspass`, descrambled
fn stored_password(root: &str) -> Option<String> {
	let path = match std::env::var_os("CVS_PASSFILE") {
		Some(path) => path.into(),
		None => Path::new(&std::env::var_os("HOME")?).join(".cvspass"),
	};
	let text = std::fs::read_to_string(path).ok()?;
	lookup_password(&text, root)
}

/// Find `root` in `.cvspass` text; lines are `/1 <root> <scrambled>` or `<root> <scrambled>`
fn lookup_password(text: &str, root: &str) -> Option<String> {
	for line in text.lines() {
		let line = line.strip_prefix("/1 ").unwrap_or(line);
		if let Some((name, scrambled)) = line.split_once(' ') {
			if name == root {
				return auth::descramble(scrambled).ok();
			}
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_lookup_password() {
		let text = format!(
			"/1 :pserver:joe@host:2401/repo {}\n:pserver:ann@host:2401/other {}\n",
			auth::scramble("s3cret"),
			auth::scramble("x")
		);
		assert_eq!(lookup_password(&text, ":pserver:joe@host:2401/repo").as_deref(), Some("s3cret"));
		assert_eq!(lookup_password(&text, ":pserver:ann@host:2401/other").as_deref(), Some("x"));
		assert_eq!(lookup_password(&text, ":pserver:bob@host:2401/repo"), None);
	}

	#[tokio::test]
	async fn test_spawn_failure_names_the_command() {
		let command = Command::new("/nonexistent/cvsproto-server");
		let err = Connection::spawn(&Config::default(), command, "/nonexistent/cvsproto-server server").await.unwrap_err();
		match err {
			ConnectionError::SpawnFailed { cmd, .. } => assert_eq!(cmd, "/nonexistent/cvsproto-server server"),
			other => panic!("unexpected error: {}", other),
		}
	}
}

// vim: ts=4
