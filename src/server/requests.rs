//! Request handlers
//!
//! Every request line is matched against [`requests()`] and handled here.
//! Handlers never answer errors directly: they record them in the pending
//! slot of [`ConnectionState`], and the next request that produces output
//! (a command, `noop`, `valid-requests`, ...) sends them followed by
//! `error`. Until then, requests that would change state are skipped.

use flate2::read::GzDecoder;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs as afs;

use super::command::{execute, Completion};
use super::commands::{self, Invocation};
use super::repository::{FileStore, Repository, CVSROOT};
use super::response::display_path;
use super::state::{ClientDir, Notification, Phase};
use super::Server;
use crate::buffer::{CompressBuffer, IntegrityCodec, PacketBuffer};
use crate::client::CvsRoot;
use crate::logging::*;
use crate::protocol::negotiation::{accept_valid_responses, valid_requests_line};
use crate::protocol::{requests, responses, Access, ProtocolResult, Request};
use crate::sync::{admin, mode, EntriesFile, Entry};
use crate::util;

/// Names never reported by `Questionable`
const DEFAULT_IGNORE: &[&str] = &[
	"RCS", "SCCS", "CVS", "CVS.adm", "RCSLOG", "cvslog.*", "tags", "TAGS", ".make.state", ".nse_depinfo", "*~",
	"#*", ".#*", ",*", "_$*", "*$", "*.old", "*.bak", "*.BAK", "*.orig", "*.rej", ".del-*", "*.a", "*.olb", "*.o",
	"*.obj", "*.so", "*.exe", "*.Z", "*.elc", "*.ln", "core",
];

/// Longest `Kopt` argument accepted
const MAX_KOPT: usize = 10;

/// Highest `Max-dotdot` honoured
const MAX_DOTDOT: i64 = 10000;

/// Leading integer of `text`, like C's `atoi`
fn atoi(text: &str) -> i64 {
	let text = text.trim_start();
	let (sign, digits) = match text.strip_prefix('-') {
		Some(rest) => (-1, rest),
		None => (1, text.strip_prefix('+').unwrap_or(text)),
	};
	let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
	sign * digits[..end].parse::<i64>().unwrap_or(0)
}

impl Server {
	fn program(&self) -> &str {
		&self.config.server.program_name
	}

	/// Handle one request line
	pub(super) async fn dispatch(&mut self, line: &str) -> ProtocolResult<()> {
		let table = requests();
		let (index, arg) = match table.lookup(line) {
			Some(found) => found,
			None => {
				debug!("[server] unrecognized request {:?}", line);
				if !self.state.pending.flush(&mut self.writer)? {
					self.writer.line(&format!("error  unrecognized request `{}'", line))?;
				}
				return self.writer.flush().await;
			}
		};
		let entry = table.get(index);
		debug!("[server] {} {}", entry.name, arg);

		if !entry.is_rootless() && self.state.phase == Phase::PreRoot {
			self.state.pending.set_error("E Protocol error: Root request missing");
			// The contents of a file request must still be consumed
			if entry.kind == Request::Modified {
				self.modified(arg).await?;
			}
			return Ok(());
		}
		if self.config.compression.min_level > 0 && self.state.gzip_level == 0 && !entry.is_rootless() {
			let text = format!("E {} [server aborted]: Compression must be used with this server.", self.program());
			self.state.pending.set_error(text);
		}

		match entry.kind {
			Request::Root => self.root(arg),
			Request::ValidResponses => self.valid_responses(arg)?,
			Request::ValidRequests => self.valid_requests()?,
			Request::CommandPrep => self.command_prep(arg)?,
			Request::Referrer => self.referrer(arg),
			Request::Repository => {
				self.state.pending.set_error("E Repository request is obsolete; aborted");
			}
			Request::Directory => self.directory(arg).await?,
			Request::MaxDotdot => self.max_dotdot(arg),
			Request::StaticDirectory => self.static_directory(),
			Request::Sticky => self.sticky(arg),
			Request::Ignored => {}
			Request::Entry => self.entry(arg),
			Request::Kopt => self.kopt(arg),
			Request::CheckinTime => self.checkin_time(arg),
			Request::Modified => self.modified(arg).await?,
			Request::IsModified => self.is_modified(arg),
			Request::UseUnchanged => self.state.use_unchanged = true,
			Request::Unchanged => self.unchanged(arg),
			Request::Notify => self.notify(arg).await?,
			Request::Hostname => self.state.hostname = Some(arg.to_string()),
			Request::LocalDir => self.state.local_dir = Some(arg.to_string()),
			Request::Questionable => self.questionable(arg).await?,
			Request::Argument => {
				if let Err(text) = self.state.arguments.push(arg) {
					self.state.pending.set_error(text);
				}
			}
			Request::Argumentx => {
				if let Err(text) = self.state.arguments.append(arg) {
					self.state.pending.set_error(text);
				}
			}
			Request::GlobalOption => self.global_option(arg),
			Request::GzipStream => self.gzip_stream(arg).await?,
			Request::GzipFileContents => self.gzip_file_contents(arg),
			Request::WrapperSendmeRcsOptions => self.wrapper_rcs_options().await?,
			Request::Set => self.set_variable(arg),
			Request::KerberosEncrypt | Request::GssapiEncrypt => self.integrity(true).await?,
			Request::GssapiAuthenticate => self.integrity(false).await?,
			Request::ExpandModules => self.expand_modules().await?,
			Request::Noop => self.noop().await?,
			Request::Version => self.version().await?,
			Request::Init => self.init(arg).await?,
			Request::Command(access) => self.command(entry.name, access).await?,
		}

		if self.writer.queued() > 0 {
			self.writer.flush().await?;
		}
		Ok(())
	}

	// ========================================================================
	// SESSION SETUP
	// ========================================================================

	fn root(&mut self, arg: &str) {
		if self.state.pending.has_error() {
			return;
		}
		if !arg.starts_with('/') {
			self.state.pending.set_error(format!("E Root {} must be an absolute pathname", arg));
			return;
		}
		if self.state.root.is_some() {
			self.state.pending.set_error(format!("E Protocol error: Duplicate Root request, for {}", arg));
			return;
		}
		let root = if arg.len() > 1 { arg.trim_end_matches('/') } else { arg };
		if let Some(authorized) = &self.state.pserver_root {
			if authorized != root {
				let text = format!("E Protocol error: Root says \"{}\" but pserver says \"{}\"", root, authorized);
				self.state.pending.set_error(text);
				return;
			}
		}

		match super::workspace::Workspace::create(&self.config.server.tmp_dir) {
			Ok(workspace) => self.state.workspace = Some(workspace),
			Err(e) => {
				let text = format!(
					"E can't create temporary directory {}/cvs-serv{}",
					self.config.server.tmp_dir.display(),
					std::process::id()
				);
				self.state.pending.set_os_error(text, &e);
				return;
			}
		}

		// Compression requested before the root is known is checked now
		self.state.phase = Phase::Active;
		if self.state.gzip_level > 0 {
			self.state.gzip_level = self.force_level(self.state.gzip_level);
		}

		let cvsroot = Path::new(root).join(CVSROOT);
		if let Err(e) = std::fs::metadata(&cvsroot) {
			self.state.pending.set_os_error(format!("E Cannot access {}", cvsroot.display()), &e);
		}

		info!("[server] root {}", root);
		self.state.root = Some(PathBuf::from(root));
		self.repository = Some(Arc::new(FileStore::new(root)));
	}

	fn valid_responses(&mut self, arg: &str) -> ProtocolResult<()> {
		if let Err(e) = accept_valid_responses(responses(), &mut self.state.responses, arg) {
			warn!("[server] {}", e);
			// Nothing else can be understood by this client
			self.state.phase = Phase::Terminated;
			self.writer.line(&format!("E {}", e))?;
			self.writer.line("error  ")?;
		}
		Ok(())
	}

	fn valid_requests(&mut self) -> ProtocolResult<()> {
		if self.state.pending.flush(&mut self.writer)? {
			return Ok(());
		}
		self.writer.line(&valid_requests_line(requests()))?;
		if self.config.compression.min_level > 0 && self.state.supports("Force-gzip") {
			self.writer.line("Force-gzip")?;
		}
		self.writer.line("ok")
	}

	fn command_prep(&mut self, arg: &str) -> ProtocolResult<()> {
		if self.state.pending.flush(&mut self.writer)? {
			return Ok(());
		}
		let modifies = requests()
			.lookup(arg)
			.map_or(false, |(i, _)| requests().get(i).kind == Request::Command(Access::Write));
		match self.primary_root() {
			Some(primary) if modifies && self.state.supports("Redirect") => {
				if self.state.supports("Referrer") {
					let referrer = format!(
						":ext:{}@{}{}",
						self.caller(),
						util::host_name(),
						self.state.root_str()
					);
					self.writer.line(&format!("Referrer {}", referrer))?;
				}
				info!("[server] redirecting {} to {}", arg, primary);
				self.writer.line(&format!("Redirect {}", primary))
			}
			_ => self.writer.line("ok"),
		}
	}

	/// Primary root write commands belong to, when it is not this one
	fn primary_root(&self) -> Option<String> {
		let primary = self.config.server.primary_root.as_ref()?;
		let same = match CvsRoot::parse(primary) {
			Ok(parsed) => {
				parsed.directory() == self.state.root_str()
					&& (parsed.is_local() || parsed.host() == Some(util::host_name().as_str()))
			}
			Err(_) => false,
		};
		if same {
			None
		} else {
			Some(primary.clone())
		}
	}

	fn caller(&self) -> String {
		self.state
			.caller
			.clone()
			.or_else(|| std::env::var("USER").ok())
			.or_else(|| std::env::var("LOGNAME").ok())
			.unwrap_or_else(|| "cvs".to_string())
	}

	fn referrer(&mut self, arg: &str) {
		if self.state.pending.has_error() {
			return;
		}
		match CvsRoot::parse(arg) {
			Ok(_) => self.state.referrer = Some(arg.to_string()),
			Err(_) => {
				self.state.pending.set_error(format!("E Protocol error: Invalid Referrer: `{}'", arg));
			}
		}
	}

	fn global_option(&mut self, arg: &str) {
		let mut chars = arg.chars();
		let flag = match (chars.next(), chars.next(), chars.next()) {
			(Some('-'), Some(flag), None) => flag,
			_ => '?',
		};
		let options = &mut self.state.options;
		match flag {
			'l' => {
				let text = format!("E {} server: WARNING: global `-l' option ignored.", self.config.server.program_name);
				self.state.pending.set_warning(text);
			}
			'n' => options.noexec = true,
			'u' => options.nolock = true,
			'q' => options.quiet = true,
			'r' => options.read_only = true,
			'Q' => options.really_quiet = true,
			't' => options.trace += 1,
			_ => {
				self.state.pending.set_error(format!("E Protocol error: bad global option {}", arg));
			}
		}
	}

	fn set_variable(&mut self, arg: &str) {
		match arg.split_once('=') {
			Some((name, value)) if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') => {
				self.state.variables.insert(name.to_string(), value.to_string());
			}
			_ => {
				self.state.pending.set_error(format!("E invalid variable setting format: {}", arg));
			}
		}
	}

	// ========================================================================
	// STREAM FILTERS
	// ========================================================================

	/// Clamp `level` to the configured range, warning when it changes
	///
	/// Bounds apply once a root is known; earlier levels are checked by `Root`.
	fn force_level(&mut self, level: u32) -> u32 {
		if self.state.phase == Phase::PreRoot {
			return level;
		}
		let compression = &self.config.compression;
		let forced = compression.clamp(level);
		if forced != level && !self.state.options.quiet {
			let text = format!(
				"E {} server: Forcing compression level {} (allowed: {} <= z <= {}).",
				self.config.server.program_name, forced, compression.min_level, compression.max_level
			);
			self.state.pending.set_warning(text);
		}
		forced
	}

	async fn gzip_stream(&mut self, arg: &str) -> ProtocolResult<()> {
		let level = self.force_level(atoi(arg).max(0) as u32);
		self.state.gzip_level = level;
		debug!("[server] compressing stream at level {}", level);
		// Level 0 still switches both directions to zlib framing
		self.reader.wrap(|inner| Box::new(CompressBuffer::input(inner)))?;
		self.writer.wrap(|inner| Box::new(CompressBuffer::output(inner, level))).await
	}

	fn gzip_file_contents(&mut self, arg: &str) {
		let mut level = atoi(arg).max(0) as u32;
		if level == 0 {
			level = self.config.compression.file_contents_level;
		}
		let level = self.force_level(level);
		self.state.gzip_level = level;
		self.state.file_gzip_level = level;
	}

	/// Wrap both directions in integrity-checked packets
	async fn integrity(&mut self, encrypt: bool) -> ProtocolResult<()> {
		let secret = match self.config.auth.integrity_secret() {
			Some(secret) => secret,
			None => {
				self.state.pending.set_error("E Encryption is not configured on this server");
				return Ok(());
			}
		};
		debug!("[server] enabling packet protection (encrypt: {})", encrypt);
		let input_codec = IntegrityCodec::new(&secret, encrypt);
		let output_codec = IntegrityCodec::new(&secret, encrypt);
		self.reader.wrap(move |inner| Box::new(PacketBuffer::input(inner, Box::new(input_codec))))?;
		self.writer.wrap(move |inner| Box::new(PacketBuffer::output(inner, Box::new(output_codec)))).await
	}

	// ========================================================================
	// DIRECTORIES
	// ========================================================================

	async fn directory(&mut self, arg: &str) -> ProtocolResult<()> {
		let repos = match self.reader.read_line().await? {
			Some(line) => line,
			None => {
				self.state.pending.set_error(format!("E end of file reading repository for {}", arg));
				return Ok(());
			}
		};
		let root = self.state.root_str();
		let repos = if repos.starts_with('/') { repos } else { format!("{}/{}", root, repos) };
		if !self.outside_root(&repos, &root) {
			self.dirswitch(arg, &repos);
		}
		Ok(())
	}

	/// Record an error and return true when `repos` is not inside `root`
	fn outside_root(&mut self, repos: &str, root: &str) -> bool {
		if !repos.starts_with('/') {
			self.state.pending.set_error(format!("E protocol error: {} is not absolute", repos));
			return true;
		}
		let within = match repos.strip_prefix(root) {
			Some("") => true,
			Some(rest) => rest.starts_with('/') && util::pathname_levels(&rest[1..]) == 0,
			None => false,
		};
		if !within {
			let text = format!("E protocol error: directory '{}' not within root '{}'", repos, root);
			self.state.pending.set_error(text);
			return true;
		}
		false
	}

	fn dirswitch(&mut self, dir: &str, repos: &str) {
		self.write_entries();
		if self.state.pending.has_error() {
			return;
		}
		if dir.starts_with('/') {
			let text = format!("E absolute pathnames invalid for server (specified `{}')", dir);
			self.state.pending.set_error(text);
			return;
		}
		if util::pathname_levels(dir) > self.state.max_dotdot {
			self.state.pending.set_error(format!("E protocol error: `{}' has too many ..", dir));
			return;
		}
		if dir.ends_with('/') {
			self.state.pending.set_error(format!("E protocol error: invalid directory syntax in {}", dir));
			return;
		}

		// A module spanning the whole repository is recorded as `<root>/.`
		let recorded = if dir == "." && repos == self.state.root_str() { format!("{}/.", repos) } else { repos.to_string() };
		let mirrored = match &self.state.workspace {
			Some(workspace) => workspace.mirror(dir, &recorded).map_err(|e| (workspace.dir(dir), e)),
			None => {
				self.state.pending.set_error("E Protocol error: Root request missing");
				return;
			}
		};
		match mirrored {
			Ok(path) => {
				self.state.enter_directory(ClientDir {
					update_dir: dir.to_string(),
					path,
					repository: repos.to_string(),
				});
			}
			Err((path, e)) => {
				self.state.pending.set_os_error(format!("E cannot mkdir {}", path.display()), &e);
			}
		}
	}

	fn max_dotdot(&mut self, arg: &str) {
		let levels = atoi(arg);
		if !(0..=MAX_DOTDOT).contains(&levels) {
			return;
		}
		let levels = levels as usize;
		if let Some(workspace) = self.state.workspace.as_mut() {
			if let Err(e) = workspace.set_max_dotdot(levels) {
				let text = format!("E cannot create {}", workspace.base().display());
				self.state.pending.set_os_error(text, &e);
				return;
			}
		}
		self.state.max_dotdot = levels;
	}

	/// Workspace path of the current directory, recording an error if there is none
	fn current_path(&mut self) -> Option<PathBuf> {
		match &self.state.current {
			Some(dir) => Some(dir.path.clone()),
			None => {
				self.state.pending.set_error("E Protocol error: `Directory' missing");
				None
			}
		}
	}

	fn static_directory(&mut self) {
		if self.state.pending.has_error() {
			return;
		}
		if let Some(path) = self.current_path() {
			if let Err(e) = admin::set_static(&path, true) {
				let text = format!("E cannot open {}", admin::admin_path(&path, admin::ENTRIES_STATIC).display());
				self.state.pending.set_os_error(text, &e);
			}
		}
	}

	fn sticky(&mut self, arg: &str) {
		if self.state.pending.has_error() {
			return;
		}
		if let Some(path) = self.current_path() {
			if let Err(e) = admin::set_sticky(&path, Some(arg)) {
				let text = format!("E cannot open {}", admin::admin_path(&path, admin::TAG).display());
				self.state.pending.set_os_error(text, &e);
			}
		}
	}

	// ========================================================================
	// ENTRIES AND FILES
	// ========================================================================

	/// Record an error and return true when `name` has a directory part
	fn outside_dir(&mut self, name: &str) -> bool {
		if name.contains('/') {
			let text = format!("E protocol error: directory '{}' not within current directory", name);
			self.state.pending.set_error(text);
			return true;
		}
		false
	}

	fn entry(&mut self, arg: &str) {
		if self.state.pending.has_error() {
			return;
		}
		match Entry::parse(arg) {
			Ok(entry) => {
				self.state.entries.retain(|e| e.name != entry.name || e.directory != entry.directory);
				self.state.entries.push(entry);
			}
			Err(_) => {
				self.state.pending.set_error("E protocol error: Malformed Entry");
			}
		}
	}

	/// Append the entries received since the last directory switch
	pub(super) fn write_entries(&mut self) {
		if self.state.entries.is_empty() {
			return;
		}
		let entries = std::mem::take(&mut self.state.entries);
		if self.state.pending.has_error() {
			return;
		}
		let dir = match &self.state.current {
			Some(dir) => dir.path.clone(),
			None => {
				debug!("[server] {} entries without a directory dropped", entries.len());
				return;
			}
		};
		let result = EntriesFile::load(&dir).and_then(|mut file| {
			for entry in entries {
				file.register(entry);
			}
			file.save(&dir)
		});
		if let Err(e) = result {
			let text = format!("E cannot write to {}", admin::admin_path(&dir, admin::ENTRIES).display());
			self.state.pending.set_os_error(text, &e);
		}
	}

	fn kopt(&mut self, arg: &str) {
		if self.state.pending.has_error() {
			return;
		}
		if self.state.kopt.is_some() {
			self.state.pending.set_error(format!("E protocol error: duplicate Kopt request: {}", arg));
			return;
		}
		if arg.len() > MAX_KOPT {
			self.state.pending.set_error(format!("E protocol error: invalid Kopt request: {}", arg));
			return;
		}
		self.state.kopt = Some(arg.to_string());
	}

	fn checkin_time(&mut self, arg: &str) {
		if self.state.pending.has_error() {
			return;
		}
		if self.state.checkin_time.is_some() {
			let text = format!("E protocol error: duplicate Checkin-time request: {}", arg);
			self.state.pending.set_error(text);
			return;
		}
		match util::parse_date(arg) {
			Some(time) => self.state.checkin_time = Some(time),
			None => {
				self.state.pending.set_error(format!("E cannot parse date {}", arg));
			}
		}
	}

	async fn modified(&mut self, arg: &str) -> ProtocolResult<()> {
		// The contents are read even when an error is pending, so they
		// are never mistaken for requests.
		let mode_text = match self.reader.read_line().await? {
			Some(line) => line,
			None => {
				self.state.pending.set_error(format!("E end of file reading mode for {}", arg));
				return Ok(());
			}
		};
		let size_text = match self.reader.read_line().await? {
			Some(line) => line,
			None => {
				self.state.pending.set_error(format!("E end of file reading size for {}", arg));
				return Ok(());
			}
		};
		let (gzipped, size) = match size_text.strip_prefix('z') {
			Some(rest) => (true, atoi(rest)),
			None => (false, atoi(&size_text)),
		};
		if size < 0 {
			self.state.pending.set_error("E client sent invalid (negative) file size");
			return Ok(());
		}
		let size = size as usize;

		if self.state.pending.has_error() || self.outside_dir(arg) {
			return self.reader.discard(size).await;
		}
		let dir = match self.current_path() {
			Some(dir) => dir,
			None => return self.reader.discard(size).await,
		};

		let data = self.reader.read_exact(size).await?;
		let data = if gzipped {
			let mut plain = Vec::new();
			if let Err(e) = GzDecoder::new(&data[..]).read_to_end(&mut plain) {
				self.state.pending.set_os_error(format!("E cannot decompress {}", arg), &e);
				return Ok(());
			}
			plain
		} else {
			data
		};

		let path = dir.join(arg);
		let temp = dir.join(format!(".#{}.upload", arg));
		let written = async {
			afs::write(&temp, &data).await?;
			afs::rename(&temp, &path).await
		};
		if let Err(e) = written.await {
			self.state.pending.set_os_error(format!("E cannot write {}", arg), &e);
			return Ok(());
		}

		if let Some(time) = self.state.checkin_time.take() {
			let stamp = filetime::FileTime::from_system_time(time);
			if let Err(e) = filetime::set_file_times(&path, stamp, stamp) {
				self.state.pending.set_os_error(format!("E cannot utime {}", arg), &e);
				return Ok(());
			}
		}
		if let Err(e) = mode::change_mode(&path, &mode_text) {
			debug!("[server] mode {:?} for {}: {}", mode_text, arg, e);
			self.state.pending.set_error(format!("E cannot change mode for {}", arg));
			return Ok(());
		}
		debug!("[server] received {} ({} bytes)", arg, data.len());

		if self.state.kopt.is_some() {
			self.is_modified(arg);
		}
		Ok(())
	}

	fn is_modified(&mut self, arg: &str) {
		if self.state.pending.has_error() || self.outside_dir(arg) {
			return;
		}
		let found = self.state.entries.iter_mut().rev().find(|e| !e.directory && e.name == arg);
		match found {
			Some(entry) => {
				entry.mark_modified();
				if self.state.kopt.take().is_some() {
					self.state.pending.set_error(format!("E protocol error: both Kopt and Entry for {}", arg));
				}
			}
			None => {
				// Modified file the client has no entry for
				let kopt = self.state.kopt.take().unwrap_or_default();
				self.state.entries.push(Entry::file(arg, "", "M", &kopt, ""));
			}
		}
	}

	fn unchanged(&mut self, arg: &str) {
		if self.state.pending.has_error() || self.outside_dir(arg) {
			return;
		}
		if let Some(entry) = self.state.entries.iter_mut().rev().find(|e| !e.directory && e.name == arg) {
			entry.mark_unchanged();
		}
	}

	async fn questionable(&mut self, arg: &str) -> ProtocolResult<()> {
		if self.state.pending.has_error() {
			return Ok(());
		}
		let update_dir = match &self.state.current {
			Some(dir) => dir.update_dir.clone(),
			None => {
				self.state.pending.set_error("E Protocol error: `Directory' missing");
				return Ok(());
			}
		};
		if self.outside_dir(arg) {
			return Ok(());
		}
		if !self.is_ignored(arg).await {
			self.writer.line(&format!("M ? {}", display_path(&update_dir, arg)))?;
		}
		Ok(())
	}

	/// Match against the default ignore list plus the repository's own patterns
	async fn is_ignored(&mut self, name: &str) -> bool {
		if self.ignore.is_none() {
			let mut patterns: Vec<String> = DEFAULT_IGNORE.iter().map(|p| p.to_string()).collect();
			if let Some(repository) = &self.repository {
				patterns.extend(repository.ignore_patterns().await);
			}
			let mut builder = GlobSetBuilder::new();
			for pattern in &patterns {
				match Glob::new(pattern) {
					Ok(glob) => {
						builder.add(glob);
					}
					Err(e) => debug!("[server] ignore pattern {:?}: {}", pattern, e),
				}
			}
			self.ignore = Some(builder.build().unwrap_or_else(|_| GlobSet::empty()));
		}
		self.ignore.as_ref().map_or(false, |set| set.is_match(name))
	}

	// ========================================================================
	// NOTIFICATIONS
	// ========================================================================

	async fn notify(&mut self, arg: &str) -> ProtocolResult<()> {
		let data = match self.reader.read_line().await? {
			Some(line) => line,
			None => {
				self.state.pending.set_error(format!("E end of file reading notification for {}", arg));
				return Ok(());
			}
		};
		if self.state.pending.has_error() || self.outside_dir(arg) {
			return Ok(());
		}
		let dir = match &self.state.current {
			Some(dir) => dir.clone(),
			None => {
				self.state.pending.set_error("E Protocol error: `Directory' missing");
				return Ok(());
			}
		};
		match Notification::parse(&data, arg, &dir) {
			Some(note) => self.state.notifications.push(note),
			None => {
				self.state.pending.set_error("E Protocol error; misformed Notify request");
			}
		}
		Ok(())
	}

	/// Record queued notifications and acknowledge each with `Notified`
	async fn send_notifications(&mut self) -> ProtocolResult<()> {
		let notes = std::mem::take(&mut self.state.notifications);
		let repository = match &self.repository {
			Some(repository) => repository.clone(),
			None => return Ok(()),
		};
		for note in notes {
			let line = format!("{}\t{}\t{}", note.kind, note.value, note.watches);
			if let Err(e) = repository.record_notification(Path::new(&note.repository), &note.file, &line).await {
				warn!("[server] notification for {}: {}", note.file, e);
				self.writer.line(&format!("E {} server: cannot record notification: {}", self.program(), e))?;
				continue;
			}
			if self.state.supports("Notified") {
				let dir = if note.update_dir.is_empty() { "." } else { note.update_dir.as_str() };
				self.writer.line(&format!("Notified {}/", dir))?;
				self.writer.line(&format!("{}/{}", note.repository, note.file))?;
			}
		}
		Ok(())
	}

	// ========================================================================
	// IMMEDIATE ANSWERS
	// ========================================================================

	async fn noop(&mut self) -> ProtocolResult<()> {
		let failed = self.state.pending.flush(&mut self.writer)?;
		self.write_entries();
		if !failed {
			self.send_notifications().await?;
			self.writer.line("ok")?;
		}
		Ok(())
	}

	async fn expand_modules(&mut self) -> ProtocolResult<()> {
		let modules = self.state.arguments.take();
		let root = self.state.root.clone().unwrap_or_default();
		let mut errors = 0;
		for module in &modules {
			let known = match &self.repository {
				Some(repository) if util::is_valid_client_path(module) => repository.is_directory(&root.join(module)).await,
				_ => false,
			};
			if known {
				self.writer.line(&format!("Module-expansion {}", module))?;
			} else {
				self.writer.line(&format!("E {} server: cannot find module `{}' - ignored", self.program(), module))?;
				errors += 1;
			}
		}
		self.writer.line(if errors > 0 { "error  " } else { "ok" })
	}

	async fn wrapper_rcs_options(&mut self) -> ProtocolResult<()> {
		if let Some(repository) = &self.repository {
			for line in repository.wrappers().await.iter().filter(|l| l.contains("-k")) {
				self.writer.line(&format!("Wrapper-rcsOption {}", line))?;
			}
		}
		self.writer.line("ok")
	}

	// ========================================================================
	// COMMANDS
	// ========================================================================

	/// Send `ok` or `error` for a finished command and drop its state
	async fn finish_command(&mut self, completion: Completion) -> ProtocolResult<()> {
		self.writer.line(match completion {
			Completion::Ok => "ok",
			Completion::Error => "error  ",
		})?;
		self.end_command();
		self.writer.flush().await
	}

	fn end_command(&mut self) {
		self.state.end_command();
		if let Some(workspace) = &self.state.workspace {
			if let Err(e) = workspace.reset() {
				warn!("[server] cannot reset workspace {}: {}", workspace.root().display(), e);
			}
		}
	}

	/// Refuse a command with a message and `error`
	async fn refuse(&mut self, text: &str) -> ProtocolResult<()> {
		self.writer.line(text)?;
		self.finish_command(Completion::Error).await
	}

	async fn version(&mut self) -> ProtocolResult<()> {
		if self.state.pending.flush(&mut self.writer)? {
			self.end_command();
			return Ok(());
		}
		let supports_f = self.state.supports("F");
		let completion = execute(&mut self.writer, &self.config.flow_control, supports_f, commands::version).await?;
		self.finish_command(completion).await
	}

	async fn init(&mut self, arg: &str) -> ProtocolResult<()> {
		if !arg.starts_with('/') {
			self.state.pending.set_error(format!("E init {} must be an absolute pathname", arg));
		} else if let Some(authorized) = &self.state.pserver_root {
			if authorized != arg {
				let text = format!("E Protocol error: init says \"{}\" but pserver says \"{}\"", arg, authorized);
				self.state.pending.set_error(text);
			}
		}
		if self.state.pending.flush(&mut self.writer)? {
			self.end_command();
			return Ok(());
		}
		let repository: Arc<dyn Repository> = Arc::new(FileStore::new(arg));
		let supports_f = self.state.supports("F");
		let completion = execute(&mut self.writer, &self.config.flow_control, supports_f, move |io| {
			commands::init(repository, io)
		})
		.await?;
		self.finish_command(completion).await
	}

	async fn command(&mut self, name: &str, access: Access) -> ProtocolResult<()> {
		self.write_entries();
		if self.state.pending.flush(&mut self.writer)? {
			self.end_command();
			return Ok(());
		}
		if access == Access::Write {
			if self.config.server.read_only {
				let text =
					format!("E {} [server aborted]: \"{}\" requires write access to the repository", self.program(), name);
				return self.refuse(&text).await;
			}
			if self.primary_root().is_some() {
				let text = "E You need a CVS client that supports the `Redirect' response for write requests to this server.";
				return self.refuse(text).await;
			}
		}

		self.send_notifications().await?;

		if !commands::is_builtin(name) {
			let text = format!("E {} [server aborted]: \"{}\" is not supported by this repository", self.program(), name);
			return self.refuse(&text).await;
		}
		let (repository, root) = match (&self.repository, &self.state.root) {
			(Some(repository), Some(root)) => (repository.clone(), root.clone()),
			_ => return self.refuse("E Protocol error: Root request missing").await,
		};

		let invocation = Invocation {
			command: name.to_string(),
			args: self.state.arguments.take(),
			root,
			program: self.config.server.program_name.clone(),
			directories: self.state.directories.clone(),
			repository,
			responses: self.state.responses.clone(),
			file_gzip_level: self.state.file_gzip_level,
			quiet: self.state.options.quiet || self.state.options.really_quiet,
			use_unchanged: self.state.use_unchanged,
		};
		let supports_f = self.state.supports("F");
		let completion = execute(&mut self.writer, &self.config.flow_control, supports_f, move |io| {
			commands::run(invocation, io)
		})
		.await?;
		debug!("[server] {} finished: {:?}", name, completion);
		self.finish_command(completion).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_atoi() {
		assert_eq!(atoi("42"), 42);
		assert_eq!(atoi("  -3x"), -3);
		assert_eq!(atoi("z"), 0);
		assert_eq!(atoi("+7"), 7);
		assert_eq!(atoi(""), 0);
	}

	#[test]
	fn test_default_ignore_list_compiles() {
		let mut builder = GlobSetBuilder::new();
		for pattern in DEFAULT_IGNORE {
			builder.add(Glob::new(pattern).unwrap());
		}
		let set = builder.build().unwrap();
		assert!(set.is_match("foo.o"));
		assert!(set.is_match("core"));
		assert!(set.is_match(".#foo.c.1.2"));
		assert!(!set.is_match("foo.c"));
	}
}

// vim: ts=4
