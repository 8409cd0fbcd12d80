//! Protocol client
//!
//! A [`Client`] drives one connection: it opens the session (`Root`,
//! capability exchange, optional compression), describes the working copy
//! with `Directory`/`Entry`/`Unchanged`/`Modified` requests, sends a
//! command and applies the responses through the [`Synchronizer`].
//!
//! # Example Usage
//!
//! ```ignore
//! use cvsproto::client::{Client, CvsRoot};
//!
//! let root = CvsRoot::parse(":fork:/var/cvs")?;
//! let mut client = Client::connect(config, root, "/home/me/work").await?;
//! client.update(&[], UpdateOptions::default()).await?;
//! client.close().await;
//! ```

pub mod connection;
pub mod operations;
mod responses;
pub mod root;

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::buffer::CompressBuffer;
use crate::config::Config;
use crate::error::{ClientError, ClientResult, ConnectionError};
use crate::logging::*;
use crate::protocol::negotiation::{enableme_requests, valid_responses_line};
use crate::protocol::{requests, responses, Support};
use crate::sync::{admin, mode, EntriesFile, Notice, Synchronizer};
use crate::util;

pub use connection::Connection;
pub use operations::UpdateOptions;
pub use root::{CvsRoot, Method};

/// Level used when the server insists on compression and none was configured
const FORCED_GZIP_LEVEL: u32 = 6;

/// Contents at or below this size are sent uncompressed
const GZIP_THRESHOLD: usize = 100;

/// Where server messages end up
#[derive(Debug)]
pub enum Output {
	/// `M` on stdout, `E` on stderr
	Console,
	/// Kept in order for the caller
	Capture(Vec<Notice>),
}

/// Part of the working copy a command is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
	/// No directory at all
	Nothing,
	/// The repository root as `.`, for commands creating a working copy
	Root,
	/// The whole working copy, recursively
	Tree,
	/// Only the named files or directories
	Files(Vec<String>),
}

pub struct Client {
	config: Arc<Config>,
	root: CvsRoot,
	conn: Connection,
	/// Requests the server listed in `Valid-requests`
	server_requests: Support,
	sync: Synchronizer,
	output: Output,
	/// Roots already connected to, for `Redirect` loop detection
	visited: Vec<String>,
	/// Level for file contents sent with `Modified`
	gzip_level: u32,
	force_gzip: bool,
	referrer: Option<String>,
	/// Text assembled from `MT` responses
	tagged_line: String,
	/// Results of the last `expand-modules`
	modules: Vec<String>,
	wrappers: Vec<String>,
}

impl Client {
	/// Connect to `root` and start a session for the working copy at `top`
	pub async fn connect<P: AsRef<Path>>(config: Arc<Config>, root: CvsRoot, top: P) -> ClientResult<Self> {
		let conn = Connection::open(&config, &root).await?;
		let mut client = Client::new(config, root, conn, top);
		client.start().await?;
		Ok(client)
	}

	/// Client over an established connection; call [`Client::start`] next
	pub fn new<P: AsRef<Path>>(config: Arc<Config>, root: CvsRoot, conn: Connection, top: P) -> Self {
		let top = top.as_ref().to_path_buf();
		let toplevel = toplevel_repository(&top, &root).unwrap_or_else(|| root.directory().to_string());
		Client {
			visited: vec![root.to_string()],
			sync: Synchronizer::new(&top, &toplevel),
			config,
			root,
			conn,
			server_requests: requests().support(),
			output: Output::Console,
			gzip_level: 0,
			force_gzip: false,
			referrer: None,
			tagged_line: String::new(),
			modules: Vec::new(),
			wrappers: Vec::new(),
		}
	}

	/// Keep server messages instead of printing them
	pub fn capture_output(&mut self) {
		self.output = Output::Capture(Vec::new());
	}

	/// Messages kept since [`Client::capture_output`]
	pub fn messages(&self) -> &[Notice] {
		match &self.output {
			Output::Capture(notices) => notices,
			Output::Console => &[],
		}
	}

	pub fn root(&self) -> &CvsRoot {
		&self.root
	}

	pub fn top(&self) -> &Path {
		self.sync.top()
	}

	/// Modules named by the last `expand-modules`
	pub fn modules(&self) -> &[String] {
		&self.modules
	}

	/// `Wrapper-rcsOption` lines received
	pub fn wrappers(&self) -> &[String] {
		&self.wrappers
	}

	/// Files the last command refused because something local was in the way
	pub fn conflicts(&self) -> usize {
		self.sync.conflicts()
	}

	/// Whether the server listed `name` in `Valid-requests`
	pub fn supports_request(&self, name: &str) -> bool {
		requests().position(name).map_or(false, |i| self.server_requests.is_supported(i))
	}

	fn program(&self) -> &str {
		&self.config.server.program_name
	}

	pub(crate) fn emit(&mut self, notice: Notice) {
		match &mut self.output {
			Output::Capture(notices) => notices.push(notice),
			Output::Console => match notice {
				Notice::Out(text) => println!("{}", text),
				Notice::Err(text) => eprintln!("{}", text),
			},
		}
	}

	/// Pass on what the synchronizer wants the user to see
	fn drain_notices(&mut self) {
		let program = self.program().to_string();
		for notice in self.sync.take_notices() {
			match notice {
				Notice::Err(text) => self.emit(Notice::Err(format!("{} client: {}", program, text))),
				out => self.emit(out),
			}
		}
	}

	// ========================================================================
	// SESSION
	// ========================================================================

	/// `Root`, capability exchange, enable-me requests and compression
	pub async fn start(&mut self) -> ClientResult<()> {
		let root_line = format!("Root {}", self.root.directory());
		self.conn.writer.line(&root_line)?;
		self.conn.writer.line(&valid_responses_line(responses()))?;
		self.conn.writer.line("valid-requests")?;
		self.conn.writer.flush().await?;
		self.read_responses().await?;

		for name in enableme_requests(requests(), &self.server_requests) {
			debug!("[client] enabling {}", name);
			self.conn.writer.line(name)?;
		}

		let mut level = self.config.compression.client_level;
		if level == 0 && self.force_gzip {
			level = FORCED_GZIP_LEVEL;
		}
		if level > 0 {
			if self.supports_request("Gzip-stream") {
				debug!("[client] compressing stream at level {}", level);
				self.conn.writer.line(&format!("Gzip-stream {}", level))?;
				self.conn.writer.wrap(move |inner| Box::new(CompressBuffer::output(inner, level))).await?;
				self.conn.reader.wrap(|inner| Box::new(CompressBuffer::input(inner)))?;
			} else if self.supports_request("gzip-file-contents") {
				self.conn.writer.line(&format!("gzip-file-contents {}", level))?;
				self.gzip_level = level;
			}
		}
		self.conn.writer.flush().await?;
		info!("[client] connected to {}", self.root);
		Ok(())
	}

	/// Follow a `Redirect` to `target`, refusing roots already visited
	async fn redirect(&mut self, target: &str) -> ClientResult<()> {
		let root = check_redirect(&self.visited, target)?;
		info!("[client] redirected to {}", root);
		self.visited.push(root.to_string());
		let conn = Connection::open(&self.config, &root).await?;
		let old = std::mem::replace(&mut self.conn, conn);
		old.close().await;
		self.root = root;
		self.server_requests = requests().support();
		self.start().await
	}

	pub async fn close(self) {
		self.conn.close().await;
	}

	// ========================================================================
	// COMMANDS
	// ========================================================================

	/// Send `Command-prep`, following redirects, when the server knows it
	async fn prepare(&mut self, command: &str) -> ClientResult<()> {
		while self.supports_request("Command-prep") {
			self.conn.writer.line(&format!("Command-prep {}", command))?;
			self.conn.writer.flush().await?;
			match self.read_responses().await {
				Ok(()) => break,
				Err(ClientError::Redirect(target)) => self.redirect(&target).await?,
				Err(e) => return Err(e),
			}
		}
		if let Some(referrer) = self.referrer.take() {
			if self.supports_request("Referrer") {
				self.conn.writer.line(&format!("Referrer {}", referrer))?;
			}
		}
		Ok(())
	}

	/// Describe `scope`, send `args` and run `command` to completion
	pub async fn run_command(&mut self, command: &str, args: &[String], scope: &Scope) -> ClientResult<()> {
		debug!("[client] {} {:?}", command, args);
		self.prepare(command).await?;
		self.send_scope(scope)?;
		for arg in args {
			self.conn.writer.argument(arg)?;
		}
		self.conn.writer.line(command)?;
		self.conn.writer.flush().await?;
		let result = self.read_responses().await;
		self.drain_notices();
		result
	}

	fn send_scope(&mut self, scope: &Scope) -> ClientResult<()> {
		let top = self.top().to_path_buf();
		match scope {
			Scope::Nothing => Ok(()),
			Scope::Root => {
				let repository = self.root.directory().to_string();
				self.conn.writer.line("Directory .")?;
				self.conn.writer.line(&repository)?;
				Ok(())
			}
			Scope::Tree => self.send_tree(".", &top),
			Scope::Files(paths) => {
				let mut groups: Vec<(String, Vec<String>)> = Vec::new();
				for path in paths {
					let path = path.trim_start_matches("./").trim_end_matches('/');
					if !util::is_valid_client_path(path) {
						return Err(crate::error::SyncError::InvalidPath { path: path.to_string() }.into());
					}
					if top.join(path).is_dir() && admin::has_admin(&top.join(path)) {
						self.send_tree(path, &top.join(path))?;
						continue;
					}
					let (dir, name) = match path.rfind('/') {
						Some(pos) => (&path[..pos], &path[pos + 1..]),
						None => (".", path),
					};
					match groups.iter_mut().find(|(d, _)| d == dir) {
						Some((_, names)) => names.push(name.to_string()),
						None => groups.push((dir.to_string(), vec![name.to_string()])),
					}
				}
				for (dir, names) in groups {
					let path = if dir == "." { top.clone() } else { top.join(&dir) };
					self.send_directory(&dir, &path, Some(&names))?;
				}
				Ok(())
			}
		}
	}

	/// Send `dir` and every subdirectory its Entries lists
	fn send_tree(&mut self, update_dir: &str, dir: &Path) -> ClientResult<()> {
		self.send_directory(update_dir, dir, None)?;
		let entries = EntriesFile::load(dir)?;
		for sub in entries.directories() {
			let child = dir.join(&sub.name);
			if admin::has_admin(&child) {
				let child_dir = if update_dir == "." { sub.name.clone() } else { format!("{}/{}", update_dir, sub.name) };
				self.send_tree(&child_dir, &child)?;
			}
		}
		Ok(())
	}

	/// `Directory` plus the state of the files in it; `names` limits the files
	fn send_directory(&mut self, update_dir: &str, dir: &Path, names: Option<&[String]>) -> ClientResult<()> {
		let repository = self.repository_of(dir)?;
		self.conn.writer.line(&format!("Directory {}", update_dir))?;
		self.conn.writer.line(&repository)?;
		if admin::is_static(dir) && self.supports_request("Static-directory") {
			self.conn.writer.line("Static-directory")?;
		}
		if let Some(tag) = admin::read_sticky(dir) {
			if self.supports_request("Sticky") {
				self.conn.writer.line(&format!("Sticky {}", tag))?;
			}
		}

		let entries = EntriesFile::load(dir)?;
		let wanted = |name: &str| names.map_or(true, |names| names.iter().any(|n| n == name));
		for entry in entries.files().filter(|e| wanted(&e.name)) {
			self.conn.writer.line(&format!("Entry {}", entry.to_line()))?;
			let path = dir.join(&entry.name);
			let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
				Ok(time) => time,
				// missing: say nothing, the server treats it as lost
				Err(_) => continue,
			};
			if entry.is_removed() {
				continue;
			}
			if entry.timestamp == util::entries_timestamp(modified) {
				self.conn.writer.line(&format!("Unchanged {}", entry.name))?;
			} else {
				self.send_modified(&entry.name, &path)?;
			}
		}

		match names {
			Some(names) => {
				for name in names.iter().filter(|n| entries.get(n).is_none()) {
					let path = dir.join(name);
					if path.is_file() {
						self.send_modified(name, &path)?;
					}
				}
			}
			None if self.supports_request("Questionable") => {
				for name in unknown_files(dir, &entries) {
					self.conn.writer.line(&format!("Questionable {}", name))?;
				}
			}
			None => {}
		}
		Ok(())
	}

	/// `Modified <name>`, mode, size and contents
	fn send_modified(&mut self, name: &str, path: &Path) -> ClientResult<()> {
		let data = fs::read(path)?;
		let file_mode = mode::mode_of(path)?;
		self.conn.writer.line(&format!("Modified {}", name))?;
		self.conn.writer.line(&file_mode)?;
		if self.gzip_level > 0 && data.len() > GZIP_THRESHOLD {
			let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.gzip_level.min(9)));
			encoder.write_all(&data)?;
			let packed = encoder.finish()?;
			self.conn.writer.line(&format!("z{}", packed.len()))?;
			self.conn.writer.queue(&packed)?;
		} else {
			self.conn.writer.line(&data.len().to_string())?;
			self.conn.writer.queue(&data)?;
		}
		Ok(())
	}

	/// Absolute repository of a working directory
	fn repository_of(&self, dir: &Path) -> ClientResult<String> {
		let text = admin::read_repository(dir).map_err(|_| {
			ClientError::ServerError(format!("there is no version here; do '{} checkout' first", self.program()))
		})?;
		Ok(absolute_repository(&text, &self.root))
	}
}

/// Repository of the top of the working copy, if it has one
fn toplevel_repository(top: &Path, root: &CvsRoot) -> Option<String> {
	admin::read_repository(top).ok().map(|text| absolute_repository(&text, root))
}

/// Resolve a `CVS/Repository` line against the root and drop a trailing `/.`
fn absolute_repository(text: &str, root: &CvsRoot) -> String {
	let text = text.strip_suffix("/.").unwrap_or(text);
	if text.starts_with('/') {
		text.to_string()
	} else if text.is_empty() || text == "." {
		root.directory().to_string()
	} else {
		format!("{}/{}", root.directory(), text)
	}
}

/// Files present in `dir` but not in its Entries
fn unknown_files(dir: &Path, entries: &EntriesFile) -> Vec<String> {
	let mut names: Vec<String> = match fs::read_dir(dir) {
		Ok(rd) => rd
			.filter_map(|e| e.ok())
			.map(|e| e.file_name().to_string_lossy().into_owned())
			.filter(|name| name != admin::CVSADM && entries.get(name).is_none())
			.collect(),
		Err(_) => Vec::new(),
	};
	names.sort();
	names
}

/// Parse a redirect target, refusing one already visited
fn check_redirect(visited: &[String], target: &str) -> Result<CvsRoot, ConnectionError> {
	let root = CvsRoot::parse(target)?;
	if visited.iter().any(|v| *v == root.to_string()) {
		return Err(ConnectionError::RedirectLoop);
	}
	Ok(root)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_redirect_loop_detected() {
		let visited = vec![":fork:/a".to_string()];
		assert!(check_redirect(&visited, ":fork:/b").is_ok());
		let err = check_redirect(&visited, ":fork:/a/").unwrap_err();
		assert!(matches!(err, ConnectionError::RedirectLoop));
		assert_eq!(err.to_string(), "`Redirect' loop detected.  Server misconfiguration?");
	}

	#[test]
	fn test_absolute_repository() {
		let root = CvsRoot::parse("/repo").unwrap();
		assert_eq!(absolute_repository("/repo/mod/.", &root), "/repo/mod");
		assert_eq!(absolute_repository("mod/sub", &root), "/repo/mod/sub");
		assert_eq!(absolute_repository(".", &root), "/repo");
	}
}

// vim: ts=4
