//! Per-connection server state
//!
//! Everything a request handler may read or change lives in one
//! [`ConnectionState`], owned by the dispatch loop and lent to each
//! handler in turn.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use super::workspace::Workspace;
use crate::buffer::memory_exhausted;
use crate::protocol::{responses, LineWriter, ProtocolResult, Support};
use crate::sync::Entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	/// Only rootless requests run
	PreRoot,
	/// A root has been selected
	Active,
	/// End of stream or fatal error; nothing more is processed
	Terminated,
}

// ============================================================================
// PENDING ERROR / WARNING
// ============================================================================

/// Error and warning text held until output is safe
///
/// Each text is one or more `E ...` lines. At most one error and one
/// warning exist at a time: a second warning is dropped, a second error is
/// refused (callers check [`Pending::has_error`] first).
#[derive(Debug, Default)]
pub struct Pending {
	error: Option<String>,
	status: Option<String>,
	warning: Option<String>,
}

impl Pending {
	pub fn has_error(&self) -> bool {
		self.error.is_some() || self.status.is_some()
	}

	pub fn has_warning(&self) -> bool {
		self.warning.is_some()
	}

	/// Record an error; returns false if one was already pending
	pub fn set_error<S: Into<String>>(&mut self, text: S) -> bool {
		if self.has_error() {
			return false;
		}
		self.error = Some(text.into());
		true
	}

	/// Record an error caused by a system call
	pub fn set_os_error<S: Into<String>>(&mut self, text: S, err: &io::Error) -> bool {
		if self.has_error() {
			return false;
		}
		self.error = Some(text.into());
		self.status = Some(os_message(err));
		true
	}

	pub fn set_warning<S: Into<String>>(&mut self, text: S) {
		if self.warning.is_none() {
			self.warning = Some(text.into());
		}
	}

	/// Queue pending text; returns true if an error was sent
	///
	/// Warnings go out as they are. An error is followed by `error` and
	/// the system error message, if any.
	pub fn flush(&mut self, writer: &mut LineWriter) -> ProtocolResult<bool> {
		if let Some(warning) = self.warning.take() {
			writer.line(&warning)?;
		}
		if !self.has_error() {
			return Ok(false);
		}
		if let Some(text) = self.error.take() {
			writer.line(&text)?;
		}
		match self.status.take() {
			Some(status) => writer.line(&format!("error  {}", status))?,
			None => writer.line("error  ")?,
		}
		Ok(true)
	}

	pub fn clear(&mut self) {
		*self = Pending::default();
	}
}

/// `strerror`-style text of an I/O error
pub fn os_message(err: &io::Error) -> String {
	let text = err.to_string();
	match text.find(" (os error") {
		Some(pos) => text[..pos].to_string(),
		None => text,
	}
}

// ============================================================================
// ARGUMENTS
// ============================================================================

/// Arguments accumulated for the next command
#[derive(Debug, Default)]
pub struct Arguments {
	args: Vec<String>,
	limit: usize,
}

impl Arguments {
	pub fn new(limit: usize) -> Self {
		Arguments { args: Vec::new(), limit }
	}

	/// `Argument`: start a new argument
	pub fn push(&mut self, arg: &str) -> Result<(), &'static str> {
		if self.args.len() >= self.limit {
			return Err("E Protocol error: too many arguments");
		}
		if self.args.try_reserve(1).is_err() {
			memory_exhausted();
		}
		self.args.push(arg.to_string());
		Ok(())
	}

	/// `Argumentx`: continue the last argument on a new line
	pub fn append(&mut self, more: &str) -> Result<(), &'static str> {
		match self.args.last_mut() {
			Some(last) => {
				last.push('\n');
				last.push_str(more);
				Ok(())
			}
			None => Err("E Protocol error: called argumentx without prior call to argument"),
		}
	}

	pub fn take(&mut self) -> Vec<String> {
		std::mem::take(&mut self.args)
	}

	pub fn clear(&mut self) {
		self.args.clear();
	}

	pub fn len(&self) -> usize {
		self.args.len()
	}

	pub fn is_empty(&self) -> bool {
		self.args.is_empty()
	}

	pub fn as_slice(&self) -> &[String] {
		&self.args
	}
}

// ============================================================================
// DIRECTORIES AND NOTIFICATIONS
// ============================================================================

/// A working directory the client described with `Directory`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDir {
	/// Path as the client knows it, `.` for the top
	pub update_dir: String,
	/// Mirror of the directory inside the workspace
	pub path: PathBuf,
	/// Absolute repository directory
	pub repository: String,
}

/// One pending `Notify` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
	/// `E`dit, `U`nedit or `C`ommit
	pub kind: char,
	/// Time, host and working directory, `+`-separated as the watch files keep them
	pub value: String,
	pub watches: String,
	pub update_dir: String,
	pub repository: String,
	pub file: String,
}

impl Notification {
	/// Parse `<type>\t<time>\t<host>\t<dir>\t<watches>[\t...]`
	pub fn parse(data: &str, file: &str, dir: &ClientDir) -> Option<Self> {
		if data.is_empty() || data.contains('+') {
			return None;
		}
		let mut fields = data.split('\t');
		let kind = fields.next()?;
		if kind.chars().count() != 1 {
			return None;
		}
		let time = fields.next()?;
		let host = fields.next()?;
		let local_dir = fields.next()?;
		let watches = fields.next()?;
		Some(Notification {
			kind: kind.chars().next()?,
			value: format!("{}+{}+{}", time, host, local_dir),
			watches: watches.to_string(),
			update_dir: dir.update_dir.clone(),
			repository: dir.repository.clone(),
			file: file.to_string(),
		})
	}
}

// ============================================================================
// CONNECTION STATE
// ============================================================================

/// Global options the client set with `Global_option`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalOptions {
	pub noexec: bool,
	pub nolock: bool,
	pub quiet: bool,
	pub really_quiet: bool,
	pub read_only: bool,
	pub trace: u32,
}

pub struct ConnectionState {
	pub phase: Phase,
	pub root: Option<PathBuf>,
	pub pending: Pending,
	pub arguments: Arguments,
	/// Entries received for the current directory, not yet written
	pub entries: Vec<Entry>,
	pub kopt: Option<String>,
	pub checkin_time: Option<SystemTime>,
	pub notifications: Vec<Notification>,
	/// Directory the next file requests refer to
	pub current: Option<ClientDir>,
	/// Every directory seen, in request order
	pub directories: Vec<ClientDir>,
	pub max_dotdot: usize,
	/// Responses the client supports
	pub responses: Support,
	pub options: GlobalOptions,
	/// Stream compression level, 0 when off
	pub gzip_level: u32,
	/// Level for compressing file contents
	pub file_gzip_level: u32,
	pub variables: BTreeMap<String, String>,
	pub hostname: Option<String>,
	pub local_dir: Option<String>,
	pub referrer: Option<String>,
	pub workspace: Option<Workspace>,
	/// Authenticated repository, when the connection came through pserver
	pub pserver_root: Option<String>,
	/// The client sent `UseUnchanged`
	pub use_unchanged: bool,
	/// User the connection authenticated as, when known
	pub caller: Option<String>,
}

impl ConnectionState {
	pub fn new(max_arguments: usize) -> Self {
		ConnectionState {
			phase: Phase::PreRoot,
			root: None,
			pending: Pending::default(),
			arguments: Arguments::new(max_arguments),
			entries: Vec::new(),
			kopt: None,
			checkin_time: None,
			notifications: Vec::new(),
			current: None,
			directories: Vec::new(),
			max_dotdot: 0,
			responses: responses().support(),
			options: GlobalOptions::default(),
			gzip_level: 0,
			file_gzip_level: 0,
			variables: BTreeMap::new(),
			hostname: None,
			local_dir: None,
			referrer: None,
			workspace: None,
			pserver_root: None,
			use_unchanged: false,
			caller: None,
		}
	}

	/// Whether the client listed `name` in `Valid-responses`
	pub fn supports(&self, name: &str) -> bool {
		responses().position(name).map_or(false, |i| self.responses.is_supported(i))
	}

	pub fn root_str(&self) -> String {
		self.root.as_ref().map(|r| r.display().to_string()).unwrap_or_default()
	}

	/// Remember a directory, replacing an earlier record of the same path
	pub fn enter_directory(&mut self, dir: ClientDir) {
		match self.directories.iter_mut().find(|d| d.update_dir == dir.update_dir) {
			Some(existing) => *existing = dir.clone(),
			None => self.directories.push(dir.clone()),
		}
		self.current = Some(dir);
	}

	/// Per-command state is dropped whether the command succeeded or not
	pub fn end_command(&mut self) {
		self.arguments.clear();
		self.kopt = None;
		self.checkin_time = None;
		self.entries.clear();
		self.current = None;
		self.directories.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::buffer::MemoryBuffer;

	// ─── Pending Tests ───

	#[tokio::test]
	async fn test_pending_error_flush() {
		let (sink, bytes) = MemoryBuffer::output();
		let mut writer = LineWriter::new(Box::new(sink));
		let mut pending = Pending::default();
		pending.set_warning("E cvs server: first warning");
		pending.set_warning("E cvs server: dropped");
		assert!(pending.set_error("E Protocol error: Root request missing"));
		assert!(!pending.set_error("E second"));
		assert!(pending.flush(&mut writer).unwrap());
		assert!(!pending.has_error());
		writer.flush().await.unwrap();
		assert_eq!(
			String::from_utf8_lossy(&bytes.lock().unwrap()),
			"E cvs server: first warning\nE Protocol error: Root request missing\nerror  \n"
		);
	}

	#[tokio::test]
	async fn test_pending_os_error_has_status() {
		let (sink, bytes) = MemoryBuffer::output();
		let mut writer = LineWriter::new(Box::new(sink));
		let mut pending = Pending::default();
		let err = io::Error::from(rustix::io::Errno::NOENT);
		pending.set_os_error("E Cannot access /repo/CVSROOT", &err);
		pending.flush(&mut writer).unwrap();
		writer.flush().await.unwrap();
		assert_eq!(
			String::from_utf8_lossy(&bytes.lock().unwrap()),
			"E Cannot access /repo/CVSROOT\nerror  No such file or directory\n"
		);
	}

	// ─── Argument Tests ───

	#[test]
	fn test_argument_limit_and_continuation() {
		let mut args = Arguments::new(2);
		assert_eq!(
			args.append("x"),
			Err("E Protocol error: called argumentx without prior call to argument")
		);
		args.push("-m").unwrap();
		args.push("first").unwrap();
		args.append("second").unwrap();
		assert_eq!(args.push("third"), Err("E Protocol error: too many arguments"));
		assert_eq!(args.take(), vec!["-m".to_string(), "first\nsecond".to_string()]);
		assert!(args.is_empty());
	}

	// ─── Notification Tests ───

	#[test]
	fn test_notification_parse() {
		let dir = ClientDir {
			update_dir: "sub".to_string(),
			path: PathBuf::from("/tmp/ws/sub"),
			repository: "/repo/mod/sub".to_string(),
		};
		let n = Notification::parse("E\tSun Sep 16 05:03:52 1973 GMT\thost\t/home/u/wd\tEUC", "foo.c", &dir)
			.unwrap();
		assert_eq!(n.kind, 'E');
		assert_eq!(n.value, "Sun Sep 16 05:03:52 1973 GMT+host+/home/u/wd");
		assert_eq!(n.watches, "EUC");
		assert!(Notification::parse("E\tonly\ttwo", "foo.c", &dir).is_none());
		assert!(Notification::parse("E+\ta\tb\tc\td", "foo.c", &dir).is_none());
	}
}

// vim: ts=4
