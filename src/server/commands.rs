//! Built-in commands
//!
//! Each command runs inside the task started by [`super::command::execute`]
//! and reports through [`CommandIo`]: user text on stdout/stderr, working
//! copy changes as response blocks. The client's view of its files comes
//! from the workspace mirror the requests built: `CVS/Entries` of every
//! directory plus the contents of files sent with `Modified`.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs as afs;

use super::command::CommandIo;
use super::repository::{Repository, Revision};
use super::response::{directory_lines, display_path, path_lines, FileResponse};
use super::state::ClientDir;
use crate::logging::*;
use crate::protocol::{responses, Support};
use crate::sync::{admin, mode, patch, Checksum, EntriesFile, Entry, TimestampState};
use crate::util;

/// Commands this server implements; everything else in the table is refused
pub const BUILTIN: &[&str] = &["update", "co", "export", "ci", "add", "remove", "status"];

pub fn is_builtin(name: &str) -> bool {
	BUILTIN.contains(&name)
}

/// Everything a command needs, detached from the connection
pub struct Invocation {
	pub command: String,
	pub args: Vec<String>,
	pub root: PathBuf,
	pub program: String,
	pub directories: Vec<ClientDir>,
	pub repository: Arc<dyn Repository>,
	pub responses: Support,
	pub file_gzip_level: u32,
	pub quiet: bool,
	/// The client reports unchanged files explicitly; unmentioned ones are lost
	pub use_unchanged: bool,
}

impl Invocation {
	fn supports(&self, name: &str) -> bool {
		responses().position(name).map_or(false, |i| self.responses.is_supported(i))
	}

	fn message(&self, text: &str) -> String {
		format!("{} server: {}\n", self.program, text)
	}

	fn aborted(&self, text: &str) -> String {
		format!("{} [server aborted]: {}\n", self.program, text)
	}
}

pub async fn run(inv: Invocation, mut io: CommandIo) -> io::Result<u32> {
	debug!("[command] {} {:?}", inv.command, inv.args);
	match inv.command.as_str() {
		"update" => update(&inv, &mut io).await,
		"co" => checkout(&inv, &mut io).await,
		"export" => checkout(&inv, &mut io).await,
		"ci" => commit(&inv, &mut io).await,
		"add" => add(&inv, &mut io).await,
		"remove" => remove(&inv, &mut io).await,
		"status" => status(&inv, &mut io).await,
		other => {
			io.err(&inv.aborted(&format!("\"{}\" is not supported by this repository", other))).await?;
			Ok(1)
		}
	}
}

pub async fn version(mut io: CommandIo) -> io::Result<u32> {
	io.out(&format!("cvsproto {} (client/server)\n", env!("CARGO_PKG_VERSION"))).await?;
	Ok(0)
}

pub async fn init(repository: Arc<dyn Repository>, _io: CommandIo) -> io::Result<u32> {
	repository.init().await?;
	Ok(0)
}

// ============================================================================
// OPTIONS
// ============================================================================

/// Split leading options from operands; `with_value` lists options taking an argument
fn getopt(args: &[String], with_value: &str) -> Result<(Vec<(char, Option<String>)>, Vec<String>), String> {
	let mut opts = Vec::new();
	let mut i = 0;
	while i < args.len() {
		let arg = &args[i];
		if arg == "--" {
			i += 1;
			break;
		}
		if !arg.starts_with('-') || arg == "-" {
			break;
		}
		let flags: Vec<char> = arg[1..].chars().collect();
		let mut j = 0;
		while j < flags.len() {
			let c = flags[j];
			if with_value.contains(c) {
				let rest: String = flags[j + 1..].iter().collect();
				let value = if !rest.is_empty() {
					rest
				} else {
					i += 1;
					args.get(i).cloned().ok_or_else(|| format!("option requires an argument -- {}", c))?
				};
				opts.push((c, Some(value)));
				break;
			}
			opts.push((c, None));
			j += 1;
		}
		i += 1;
	}
	Ok((opts, args[i.min(args.len())..].to_vec()))
}

fn has(opts: &[(char, Option<String>)], flag: char) -> bool {
	opts.iter().any(|(c, _)| *c == flag)
}

fn value(opts: &[(char, Option<String>)], flag: char) -> Option<String> {
	opts.iter().rev().find(|(c, _)| *c == flag).and_then(|(_, v)| v.clone())
}

/// Refuse revision selection this server cannot honour
async fn reject_unsupported(inv: &Invocation, io: &mut CommandIo, opts: &[(char, Option<String>)]) -> io::Result<bool> {
	for flag in &['r', 'D', 'j'] {
		if has(opts, *flag) {
			io.err(&inv.aborted(&format!("option -{} is not supported by this repository", flag))).await?;
			return Ok(true);
		}
	}
	Ok(false)
}

// ============================================================================
// LOCAL STATE
// ============================================================================

/// What the client told us about one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Local {
	/// No entry and no contents
	Absent,
	Unchanged,
	/// Contents sent, or flagged with `Is-modified`
	Modified,
	/// Has an entry but the client did not mention the file
	Lost,
}

struct FileState {
	dir: ClientDir,
	name: String,
	entry: Option<Entry>,
	local: Local,
	/// Contents were uploaded with `Modified`
	uploaded: bool,
	head: Option<Revision>,
	explicit: bool,
}

impl FileState {
	fn path(&self) -> String {
		display_path(&self.dir.update_dir, &self.name)
	}

	fn upload_path(&self) -> PathBuf {
		self.dir.path.join(&self.name)
	}

	fn live_head(&self) -> Option<&Revision> {
		self.head.as_ref().filter(|r| !r.dead)
	}

	fn repos_dir(&self) -> &Path {
		Path::new(&self.dir.repository)
	}

	fn options(&self) -> &str {
		self.entry.as_ref().map(|e| e.options.as_str()).unwrap_or("")
	}
}

fn classify(entry: Option<&Entry>, uploaded: bool, use_unchanged: bool) -> Local {
	if uploaded {
		return Local::Modified;
	}
	match entry {
		None => Local::Absent,
		Some(e) => match e.timestamp_state() {
			TimestampState::Unmodified => Local::Unchanged,
			TimestampState::Modified => Local::Modified,
			_ if use_unchanged => Local::Lost,
			_ => Local::Unchanged,
		},
	}
}

/// Files uploaded into a workspace directory
async fn uploaded_files(dir: &Path) -> BTreeSet<String> {
	let mut names = BTreeSet::new();
	if let Ok(mut rd) = afs::read_dir(dir).await {
		while let Ok(Some(entry)) = rd.next_entry().await {
			let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
			let name = entry.file_name().to_string_lossy().into_owned();
			if is_file && name != admin::CVSADM {
				names.insert(name);
			}
		}
	}
	names
}

/// One client directory and the files of it a command looks at
struct Target {
	dir: ClientDir,
	/// `None` for every file of the directory
	names: Option<Vec<String>>,
}

/// Map command operands onto the directories the client sent
fn targets(inv: &Invocation, operands: &[String], recursive: bool) -> (Vec<Target>, Vec<String>) {
	let mut out: Vec<Target> = Vec::new();
	let mut unknown = Vec::new();
	if operands.is_empty() {
		for dir in &inv.directories {
			out.push(Target { dir: dir.clone(), names: None });
		}
		return (out, unknown);
	}

	fn add_name(out: &mut Vec<Target>, dir: &ClientDir, name: Option<String>) {
		match out.iter_mut().find(|t| t.dir.update_dir == dir.update_dir) {
			Some(t) => match (&mut t.names, name) {
				(Some(names), Some(name)) => {
					if !names.contains(&name) {
						names.push(name)
					}
				}
				(names, None) => *names = None,
				(None, Some(_)) => {}
			},
			None => out.push(Target { dir: dir.clone(), names: name.map(|n| vec![n]) }),
		}
	}

	for operand in operands {
		let operand = operand.trim_end_matches('/');
		let as_dir = if operand.is_empty() { "." } else { operand };
		if let Some(dir) = inv.directories.iter().find(|d| d.update_dir == as_dir) {
			add_name(&mut out, dir, None);
			if recursive {
				let prefix = format!("{}/", as_dir);
				for sub in inv.directories.iter().filter(|d| as_dir == "." || d.update_dir.starts_with(&prefix)) {
					add_name(&mut out, sub, None);
				}
			}
			continue;
		}
		let (parent, name) = match operand.rfind('/') {
			Some(pos) => (&operand[..pos], &operand[pos + 1..]),
			None => (".", operand),
		};
		match inv.directories.iter().find(|d| d.update_dir == parent) {
			Some(dir) => add_name(&mut out, dir, Some(name.to_string())),
			None => unknown.push(operand.to_string()),
		}
	}
	(out, unknown)
}

/// Collect the state of every file a target covers
async fn file_states(inv: &Invocation, target: &Target) -> io::Result<Vec<FileState>> {
	let entries = EntriesFile::load(&target.dir.path)?;
	let uploads = uploaded_files(&target.dir.path).await;
	let repos = PathBuf::from(&target.dir.repository);

	let (names, explicit): (Vec<String>, bool) = match &target.names {
		Some(names) => (names.clone(), true),
		None => {
			let mut all: BTreeSet<String> = entries.files().map(|e| e.name.clone()).collect();
			all.extend(uploads.iter().cloned());
			if inv.repository.is_directory(&repos).await {
				all.extend(inv.repository.files(&repos).await?);
			}
			(all.into_iter().collect(), false)
		}
	};

	let mut states = Vec::with_capacity(names.len());
	for name in names {
		let entry = entries.get(&name).cloned();
		let uploaded = uploads.contains(&name);
		let head = if inv.repository.is_directory(&repos).await {
			inv.repository.head(&repos, &name).await?
		} else {
			None
		};
		states.push(FileState {
			dir: target.dir.clone(),
			local: classify(entry.as_ref(), uploaded, inv.use_unchanged),
			name,
			entry,
			uploaded,
			head,
			explicit,
		});
	}
	Ok(states)
}

async fn report_unknown(inv: &Invocation, io: &mut CommandIo, unknown: &[String]) -> io::Result<u32> {
	for path in unknown {
		io.err(&inv.message(&format!("nothing known about `{}'", path))).await?;
	}
	Ok(unknown.len() as u32)
}

// ============================================================================
// TRANSFERS
// ============================================================================

/// Send a file with its metadata responses in one block
async fn send_file(
	inv: &Invocation,
	io: &mut CommandIo,
	update_dir: &str,
	repository: &str,
	name: &str,
	response: &str,
	rev: &Revision,
	options: &str,
	full: &[u8],
	delta: Option<&[u8]>,
) -> io::Result<()> {
	let mut prefix = Vec::new();
	if inv.supports("Mod-time") {
		prefix.push(format!("Mod-time {}", util::rfc822_timestamp(rev.modified)));
	}
	if inv.supports("Checksum") {
		prefix.push(format!("Checksum {}", Checksum::of(full)));
	}
	let transfer = FileResponse {
		response,
		update_dir,
		repository,
		name,
		entry: Entry::file(name, &rev.number, "", options, "").to_line(),
		mode: &rev.mode,
		data: delta.unwrap_or(full),
	};
	// change text must not be compressed
	let level = if delta.is_some() { 0 } else { inv.file_gzip_level };
	io.block(transfer.encode(level, &prefix)).await
}

async fn announce(io: &mut CommandIo, letter: char, path: &str) -> io::Result<()> {
	io.out(&format!("{} {}\n", letter, path)).await?;
	io.flush_stdout().await
}

// ============================================================================
// UPDATE
// ============================================================================

async fn update(inv: &Invocation, io: &mut CommandIo) -> io::Result<u32> {
	let (opts, operands) = match getopt(&inv.args, "kIWrDj") {
		Ok(parsed) => parsed,
		Err(e) => {
			io.err(&inv.aborted(&e)).await?;
			return Ok(1);
		}
	};
	if reject_unsupported(inv, io, &opts).await? {
		return Ok(1);
	}
	let patches = has(&opts, 'u');
	let build_dirs = has(&opts, 'd');
	let prune = has(&opts, 'P');
	let recursive = !has(&opts, 'l');

	let (targets, unknown) = targets(inv, &operands, recursive);
	let mut errors = report_unknown(inv, io, &unknown).await?;
	for target in &targets {
		for state in file_states(inv, target).await? {
			errors += update_file(inv, io, &state, patches).await?;
		}
		if build_dirs && recursive && target.names.is_none() {
			errors += new_directories(inv, io, &target.dir, prune).await?;
		}
	}
	Ok(errors)
}

async fn update_file(inv: &Invocation, io: &mut CommandIo, f: &FileState, patches: bool) -> io::Result<u32> {
	let path = f.path();
	let entry = match &f.entry {
		Some(entry) => entry,
		None => {
			if let Some(head) = f.live_head() {
				let data = inv.repository.contents(f.repos_dir(), &f.name, &head.number).await?;
				let response = if inv.supports("Created") { "Created" } else { "Updated" };
				announce(io, 'U', &path).await?;
				send_file(inv, io, &f.dir.update_dir, &f.dir.repository, &f.name, response, head, "", &data, None)
					.await?;
			} else if f.uploaded && f.explicit {
				io.out(&format!("? {}\n", path)).await?;
			}
			return Ok(0);
		}
	};

	if entry.is_removed() {
		io.out(&format!("R {}\n", path)).await?;
		return Ok(0);
	}
	if entry.is_new() {
		if f.live_head().is_some() {
			io.err(&inv.message(&format!("conflict: {} created independently by second party", path))).await?;
			io.out(&format!("C {}\n", path)).await?;
			return Ok(1);
		}
		io.out(&format!("A {}\n", path)).await?;
		return Ok(0);
	}

	let head = match f.live_head() {
		Some(head) => head,
		None => {
			if f.local == Local::Modified {
				io.err(&inv.message(&format!("conflict: {} is modified but no longer in the repository", path)))
					.await?;
				io.out(&format!("C {}\n", path)).await?;
				return Ok(1);
			}
			io.err(&inv.message(&format!("`{}' is no longer in the repository", path))).await?;
			if inv.supports("Removed") {
				io.flush_stderr().await?;
				io.block(path_lines("Removed", &f.dir.update_dir, &f.dir.repository, &f.name).into_bytes())
					.await?;
			}
			return Ok(0);
		}
	};

	if head.number == entry.revision {
		match f.local {
			Local::Modified => io.out(&format!("M {}\n", path)).await?,
			Local::Lost => {
				io.err(&inv.message(&format!("warning: {} was lost", path))).await?;
				let data = inv.repository.contents(f.repos_dir(), &f.name, &head.number).await?;
				announce(io, 'U', &path).await?;
				send_file(inv, io, &f.dir.update_dir, &f.dir.repository, &f.name, "Updated", head, f.options(), &data, None)
					.await?;
			}
			_ => {}
		}
		return Ok(0);
	}

	match f.local {
		Local::Modified => {
			io.err(&inv.message(&format!(
				"{} has been modified locally and changed to revision {} in the repository; merging is not supported",
				path, head.number
			)))
			.await?;
			io.out(&format!("C {}\n", path)).await?;
			Ok(1)
		}
		Local::Lost => {
			let data = inv.repository.contents(f.repos_dir(), &f.name, &head.number).await?;
			announce(io, 'U', &path).await?;
			send_file(inv, io, &f.dir.update_dir, &f.dir.repository, &f.name, "Updated", head, f.options(), &data, None)
				.await?;
			Ok(0)
		}
		_ => {
			let data = inv.repository.contents(f.repos_dir(), &f.name, &head.number).await?;
			let delta = if patches && inv.supports("Rcs-diff") {
				match inv.repository.contents(f.repos_dir(), &f.name, &entry.revision).await {
					Ok(old) => patch::rcs_diff(&old, &data),
					Err(_) => None,
				}
			} else {
				None
			};
			match delta {
				Some(delta) => {
					announce(io, 'P', &path).await?;
					send_file(
						inv,
						io,
						&f.dir.update_dir,
						&f.dir.repository,
						&f.name,
						"Rcs-diff",
						head,
						f.options(),
						&data,
						Some(&delta),
					)
					.await?;
				}
				None => {
					let response = if inv.supports("Update-existing") { "Update-existing" } else { "Updated" };
					announce(io, 'U', &path).await?;
					send_file(inv, io, &f.dir.update_dir, &f.dir.repository, &f.name, response, head, f.options(), &data, None)
						.await?;
				}
			}
			Ok(0)
		}
	}
}

/// `update -d`: bring in repository directories the client does not have
async fn new_directories(inv: &Invocation, io: &mut CommandIo, dir: &ClientDir, prune: bool) -> io::Result<u32> {
	let repos = PathBuf::from(&dir.repository);
	if !inv.repository.is_directory(&repos).await {
		return Ok(0);
	}
	let mut errors = 0;
	for sub in inv.repository.subdirectories(&repos).await? {
		let update_dir = display_path(&dir.update_dir, &sub);
		if inv.directories.iter().any(|d| d.update_dir == update_dir) {
			continue;
		}
		errors += send_tree(inv, io, &update_dir, &repos.join(&sub), true, prune, "").await?;
	}
	Ok(errors)
}

// ============================================================================
// CHECKOUT / EXPORT
// ============================================================================

async fn checkout(inv: &Invocation, io: &mut CommandIo) -> io::Result<u32> {
	let (opts, modules) = match getopt(&inv.args, "dkrDjm") {
		Ok(parsed) => parsed,
		Err(e) => {
			io.err(&inv.aborted(&e)).await?;
			return Ok(1);
		}
	};
	if reject_unsupported(inv, io, &opts).await? {
		return Ok(1);
	}
	if has(&opts, 'c') || has(&opts, 's') {
		io.err(&inv.aborted("listing the modules file is not supported by this repository")).await?;
		return Ok(1);
	}
	if modules.is_empty() {
		io.err(&inv.aborted("must specify at least one module or directory")).await?;
		return Ok(1);
	}
	let recursive = !has(&opts, 'l');
	let prune = has(&opts, 'P');
	let local_name = value(&opts, 'd');
	let options = value(&opts, 'k').map(|k| format!("-k{}", k)).unwrap_or_default();

	let mut errors = 0;
	for module in &modules {
		let module = module.trim_matches('/');
		let repos = if module.is_empty() || module == "." { inv.root.clone() } else { inv.root.join(module) };
		if module.split('/').any(|part| part == "..") || !inv.repository.is_directory(&repos).await {
			io.err(&inv.message(&format!("cannot find module `{}' - ignored", module))).await?;
			errors += 1;
			continue;
		}
		let update_dir = local_name.clone().unwrap_or_else(|| module.to_string());
		errors += send_tree(inv, io, &update_dir, &repos, recursive, prune, &options).await?;
	}
	Ok(errors)
}

/// Whether `repos` or anything below it holds a live file
fn has_live_files<'a>(
	inv: &'a Invocation,
	repos: &'a Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = io::Result<bool>> + Send + 'a>> {
	Box::pin(async move {
		for name in inv.repository.files(repos).await? {
			if inv.repository.head(repos, &name).await?.map_or(false, |r| !r.dead) {
				return Ok(true);
			}
		}
		for sub in inv.repository.subdirectories(repos).await? {
			if has_live_files(inv, &repos.join(sub)).await? {
				return Ok(true);
			}
		}
		Ok(false)
	})
}

/// Send every live file of `repos` (and below, if `recursive`) as new
fn send_tree<'a>(
	inv: &'a Invocation,
	io: &'a mut CommandIo,
	update_dir: &'a str,
	repos: &'a Path,
	recursive: bool,
	prune: bool,
	options: &'a str,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = io::Result<u32>> + Send + 'a>> {
	Box::pin(async move {
		if prune && !has_live_files(inv, repos).await? {
			return Ok(0);
		}
		let repository = repos.display().to_string();
		if !inv.quiet {
			io.err(&inv.message(&format!("Updating {}", update_dir))).await?;
			io.flush_stderr().await?;
		}
		let mut prologue = String::new();
		if inv.supports("Clear-sticky") {
			prologue.push_str(&directory_lines("Clear-sticky", update_dir, &repository));
		}
		if inv.supports("Clear-static-directory") {
			prologue.push_str(&directory_lines("Clear-static-directory", update_dir, &repository));
		}
		if !prologue.is_empty() {
			io.block(prologue.into_bytes()).await?;
		}

		for name in inv.repository.files(repos).await? {
			let head = match inv.repository.head(repos, &name).await? {
				Some(head) if !head.dead => head,
				_ => continue,
			};
			let data = inv.repository.contents(repos, &name, &head.number).await?;
			announce(io, 'U', &display_path(update_dir, &name)).await?;
			send_file(inv, io, update_dir, &repository, &name, "Updated", &head, options, &data, None).await?;
		}

		let mut errors = 0;
		if recursive {
			for sub in inv.repository.subdirectories(repos).await? {
				let child = display_path(update_dir, &sub);
				errors += send_tree(inv, io, &child, &repos.join(&sub), recursive, prune, options).await?;
			}
		}
		Ok(errors)
	})
}

// ============================================================================
// COMMIT
// ============================================================================

enum Change {
	Modify,
	Add,
	Remove(String),
}

async fn commit(inv: &Invocation, io: &mut CommandIo) -> io::Result<u32> {
	let (opts, operands) = match getopt(&inv.args, "mFr") {
		Ok(parsed) => parsed,
		Err(e) => {
			io.err(&inv.aborted(&e)).await?;
			return Ok(1);
		}
	};
	if reject_unsupported(inv, io, &opts).await? {
		return Ok(1);
	}
	let message = value(&opts, 'm').unwrap_or_default();
	let (targets, unknown) = targets(inv, &operands, !has(&opts, 'l'));
	let mut errors = report_unknown(inv, io, &unknown).await?;

	// every file is checked before anything is written
	let mut changes = Vec::new();
	for target in &targets {
		for f in file_states(inv, target).await? {
			let path = f.path();
			let entry = match &f.entry {
				Some(entry) => entry.clone(),
				None => {
					if f.explicit {
						io.err(&inv.message(&format!("nothing known about `{}'", path))).await?;
						errors += 1;
					}
					continue;
				}
			};
			let head_number = f.live_head().map(|h| h.number.clone());
			if entry.is_removed() {
				let base = entry.revision[1..].to_string();
				if head_number.as_deref() != Some(base.as_str()) {
					io.err(&inv.message(&format!("Up-to-date check failed for `{}'", path))).await?;
					errors += 1;
					continue;
				}
				changes.push((f, Change::Remove(base)));
			} else if entry.is_new() {
				if !f.uploaded {
					io.err(&inv.message(&format!("`{}' should exist but does not", path))).await?;
					errors += 1;
					continue;
				}
				if head_number.is_some() {
					io.err(&inv.message(&format!("Up-to-date check failed for `{}'", path))).await?;
					errors += 1;
					continue;
				}
				changes.push((f, Change::Add));
			} else if f.local == Local::Modified {
				if head_number.as_deref() != Some(entry.revision.as_str()) {
					io.err(&inv.message(&format!("Up-to-date check failed for `{}'", path))).await?;
					errors += 1;
					continue;
				}
				if !f.uploaded {
					io.err(&inv.message(&format!("no contents received for `{}'", path))).await?;
					errors += 1;
					continue;
				}
				changes.push((f, Change::Modify));
			}
		}
	}
	if errors > 0 {
		io.err(&inv.aborted("correct above errors first!")).await?;
		return Ok(errors);
	}

	for (f, change) in changes {
		let path = f.path();
		let rcs_path = format!("{}/{},v", f.dir.repository, f.name);
		match change {
			Change::Remove(base) => {
				inv.repository.remove(f.repos_dir(), &f.name, &message).await?;
				io.out(&format!("Removing {};\n{}  <--  {}\nnew revision: delete; previous revision: {}\ndone\n", path, rcs_path, path, base))
					.await?;
				io.flush_stdout().await?;
				let response = if inv.supports("Remove-entry") { Some("Remove-entry") } else if inv.supports("Removed") { Some("Removed") } else { None };
				if let Some(response) = response {
					io.block(path_lines(response, &f.dir.update_dir, &f.dir.repository, &f.name).into_bytes()).await?;
				}
			}
			Change::Add | Change::Modify => {
				let upload = f.upload_path();
				let data = afs::read(&upload).await?;
				let file_mode = mode::mode_of(&upload).unwrap_or_else(|_| "u=rw,g=r,o=r".to_string());
				let previous = f.entry.as_ref().map(|e| e.revision.clone()).unwrap_or_default();
				let rev = inv.repository.commit(f.repos_dir(), &f.name, &data, &file_mode, &message).await?;
				let detail = match change {
					Change::Add => format!("initial revision: {}", rev.number),
					_ => format!("new revision: {}; previous revision: {}", rev.number, previous),
				};
				io.out(&format!("{}  <--  {}\n{}\n", rcs_path, path, detail)).await?;
				io.flush_stdout().await?;
				if inv.supports("Checked-in") {
					let mut block = path_lines("Checked-in", &f.dir.update_dir, &f.dir.repository, &f.name);
					block.push_str(&Entry::file(&f.name, &rev.number, "", f.options(), "").to_line());
					block.push('\n');
					io.block(block.into_bytes()).await?;
				} else {
					send_file(inv, io, &f.dir.update_dir, &f.dir.repository, &f.name, "Updated", &rev, f.options(), &data, None)
						.await?;
				}
			}
		}
	}
	Ok(0)
}

// ============================================================================
// ADD / REMOVE
// ============================================================================

async fn add(inv: &Invocation, io: &mut CommandIo) -> io::Result<u32> {
	let (opts, operands) = match getopt(&inv.args, "mk") {
		Ok(parsed) => parsed,
		Err(e) => {
			io.err(&inv.aborted(&e)).await?;
			return Ok(1);
		}
	};
	if operands.is_empty() {
		io.err(&inv.aborted("add requires at least one argument")).await?;
		return Ok(1);
	}
	let options = value(&opts, 'k').map(|k| format!("-k{}", k)).unwrap_or_default();
	let mut errors = 0;
	let mut scheduled = 0;

	for operand in &operands {
		let operand = operand.trim_end_matches('/');
		if let Some(dir) = inv.directories.iter().find(|d| d.update_dir == operand) {
			let repos = PathBuf::from(&dir.repository);
			if inv.repository.is_directory(&repos).await {
				io.err(&inv.message(&format!("`{}' already exists", operand))).await?;
				errors += 1;
			} else {
				inv.repository.create_directory(&repos).await?;
				io.out(&format!("Directory {} added to the repository\n", dir.repository)).await?;
			}
			continue;
		}

		let (targets, unknown) = targets(inv, std::slice::from_ref(&operand.to_string()), false);
		errors += report_unknown(inv, io, &unknown).await?;
		for target in &targets {
			for f in file_states(inv, target).await? {
				let path = f.path();
				match &f.entry {
					Some(entry) if entry.is_removed() => {
						let rev_number = entry.revision[1..].to_string();
						let rev = match f.live_head() {
							Some(head) if head.number == rev_number => head.clone(),
							_ => {
								io.err(&inv.message(&format!("cannot resurrect `{}'", path))).await?;
								errors += 1;
								continue;
							}
						};
						let data = inv.repository.contents(f.repos_dir(), &f.name, &rev.number).await?;
						send_file(inv, io, &f.dir.update_dir, &f.dir.repository, &f.name, "Updated", &rev, &entry.options, &data, None)
							.await?;
						io.err(&format!("U {}\n", path)).await?;
						io.err(&inv.message(&format!("{}, version {}, resurrected", path, rev.number))).await?;
					}
					Some(entry) => {
						let text = if entry.is_new() {
							format!("`{}' has already been entered", path)
						} else {
							format!("`{}' already exists, with version number {}", path, entry.revision)
						};
						io.err(&inv.message(&text)).await?;
						errors += 1;
					}
					None if !f.uploaded => {
						io.err(&inv.message(&format!("nothing known about `{}'", path))).await?;
						errors += 1;
					}
					None if f.live_head().is_some() => {
						io.err(&inv.message(&format!("`{}' added independently by second party", path))).await?;
						errors += 1;
					}
					None => {
						if !inv.supports("Checked-in") {
							io.err(&inv.aborted("client does not support Checked-in")).await?;
							return Ok(errors + 1);
						}
						if let Some(dead) = f.head.as_ref().filter(|h| h.dead) {
							io.err(&inv.message(&format!(
								"re-adding file `{}' after dead revision {}",
								path, dead.number
							)))
							.await?;
						}
						let mut block = path_lines("Checked-in", &f.dir.update_dir, &f.dir.repository, &f.name);
						block.push_str(&Entry::file(&f.name, "0", &format!("Initial {}", f.name), &options, "").to_line());
						block.push('\n');
						io.err(&inv.message(&format!("scheduling file `{}' for addition", path))).await?;
						io.flush_stderr().await?;
						io.block(block.into_bytes()).await?;
						scheduled += 1;
					}
				}
			}
		}
	}
	if scheduled > 0 {
		let which = if scheduled == 1 { "this file" } else { "these files" };
		io.err(&inv.message(&format!("use '{} commit' to add {} permanently", inv.program, which))).await?;
	}
	Ok(errors)
}

async fn remove(inv: &Invocation, io: &mut CommandIo) -> io::Result<u32> {
	let (opts, operands) = match getopt(&inv.args, "") {
		Ok(parsed) => parsed,
		Err(e) => {
			io.err(&inv.aborted(&e)).await?;
			return Ok(1);
		}
	};
	let (targets, unknown) = targets(inv, &operands, !has(&opts, 'l'));
	let mut errors = report_unknown(inv, io, &unknown).await?;
	let mut scheduled = 0;

	for target in &targets {
		for f in file_states(inv, target).await? {
			let path = f.path();
			let entry = match &f.entry {
				Some(entry) => entry,
				None => {
					if f.explicit {
						io.err(&inv.message(&format!("nothing known about `{}'", path))).await?;
						errors += 1;
					}
					continue;
				}
			};
			if entry.is_removed() {
				if f.explicit {
					io.err(&inv.message(&format!("file `{}' already scheduled for removal", path))).await?;
				}
				continue;
			}
			if f.local != Local::Lost && f.local != Local::Absent {
				if f.explicit {
					io.err(&inv.message(&format!("file `{}' still in working directory", path))).await?;
					errors += 1;
				}
				continue;
			}
			if entry.is_new() {
				let response = if inv.supports("Remove-entry") { "Remove-entry" } else { "Removed" };
				io.block(path_lines(response, &f.dir.update_dir, &f.dir.repository, &f.name).into_bytes()).await?;
				io.err(&inv.message(&format!("removed `{}'", path))).await?;
				continue;
			}
			if !inv.supports("Checked-in") {
				io.err(&inv.aborted("client does not support Checked-in")).await?;
				return Ok(errors + 1);
			}
			let mut block = path_lines("Checked-in", &f.dir.update_dir, &f.dir.repository, &f.name);
			block.push_str(
				&Entry::file(&f.name, &format!("-{}", entry.revision), "", &entry.options, &entry.tag_or_date)
					.to_line(),
			);
			block.push('\n');
			io.err(&inv.message(&format!("scheduling `{}' for removal", path))).await?;
			io.flush_stderr().await?;
			io.block(block.into_bytes()).await?;
			scheduled += 1;
		}
	}
	if scheduled > 0 {
		let which = if scheduled == 1 { "this file" } else { "these files" };
		io.err(&inv.message(&format!("use '{} commit' to remove {} permanently", inv.program, which))).await?;
	}
	Ok(errors)
}

// ============================================================================
// STATUS
// ============================================================================

fn status_text(f: &FileState) -> &'static str {
	let entry = match &f.entry {
		None if f.uploaded => return "Unknown",
		None => return "Needs Checkout",
		Some(entry) => entry,
	};
	if entry.is_new() {
		return "Locally Added";
	}
	if entry.is_removed() {
		return "Locally Removed";
	}
	let head = match f.live_head() {
		Some(head) => head,
		None => return "Entry Invalid",
	};
	match (head.number == entry.revision, f.local) {
		(_, Local::Lost) => "Needs Checkout",
		(true, Local::Modified) => "Locally Modified",
		(true, _) => "Up-to-date",
		(false, Local::Modified) => "Needs Merge",
		(false, _) => "Needs Patch",
	}
}

async fn status(inv: &Invocation, io: &mut CommandIo) -> io::Result<u32> {
	let (opts, operands) = match getopt(&inv.args, "") {
		Ok(parsed) => parsed,
		Err(e) => {
			io.err(&inv.aborted(&e)).await?;
			return Ok(1);
		}
	};
	let (targets, unknown) = targets(inv, &operands, !has(&opts, 'l'));
	let errors = report_unknown(inv, io, &unknown).await?;

	for target in &targets {
		if !inv.quiet {
			io.err(&inv.message(&format!("Examining {}", target.dir.update_dir))).await?;
			io.flush_stderr().await?;
		}
		for f in file_states(inv, target).await? {
			let shown = if f.local == Local::Lost || (f.entry.is_none() && !f.uploaded) {
				format!("no file {}", f.name)
			} else {
				f.name.clone()
			};
			let working = match &f.entry {
				Some(entry) if entry.is_new() => "New file!".to_string(),
				Some(entry) => entry.revision.clone(),
				None => format!("No entry for {}", f.name),
			};
			let repository = match &f.head {
				Some(head) => format!("{}\t{}/{},v", head.number, f.dir.repository, f.name),
				None => "No revision control file".to_string(),
			};
			let sticky_options = f.entry.as_ref().map(|e| e.options.clone()).filter(|o| !o.is_empty());
			let mut text = String::new();
			text.push_str("===================================================================\n");
			text.push_str(&format!("File: {:<17}\tStatus: {}\n\n", shown, status_text(&f)));
			text.push_str(&format!("   Working revision:\t{}\n", working));
			text.push_str(&format!("   Repository revision:\t{}\n", repository));
			text.push_str("   Sticky Tag:\t\t(none)\n");
			text.push_str("   Sticky Date:\t\t(none)\n");
			text.push_str(&format!("   Sticky Options:\t{}\n\n", sticky_options.as_deref().unwrap_or("(none)")));
			io.out(&text).await?;
		}
	}
	Ok(errors)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn strings(args: &[&str]) -> Vec<String> {
		args.iter().map(|s| s.to_string()).collect()
	}

	// ─── Option Tests ───

	#[test]
	fn test_getopt_values_and_operands() {
		let (opts, rest) = getopt(&strings(&["-Pd", "-m", "log message", "-kb", "foo.c", "-x"]), "mk").unwrap();
		assert!(has(&opts, 'P'));
		assert!(has(&opts, 'd'));
		assert_eq!(value(&opts, 'm').as_deref(), Some("log message"));
		assert_eq!(value(&opts, 'k').as_deref(), Some("b"));
		assert_eq!(rest, strings(&["foo.c", "-x"]));
	}

	#[test]
	fn test_getopt_missing_value() {
		assert!(getopt(&strings(&["-m"]), "m").is_err());
		let (_, rest) = getopt(&strings(&["--", "-f"]), "").unwrap();
		assert_eq!(rest, strings(&["-f"]));
	}

	// ─── Classification Tests ───

	#[test]
	fn test_classify() {
		let mut entry = Entry::parse("/foo.c/1.1///").unwrap();
		assert_eq!(classify(Some(&entry), false, true), Local::Lost);
		assert_eq!(classify(Some(&entry), false, false), Local::Unchanged);
		assert_eq!(classify(Some(&entry), true, true), Local::Modified);
		entry.mark_unchanged();
		assert_eq!(classify(Some(&entry), false, true), Local::Unchanged);
		entry.mark_modified();
		assert_eq!(classify(Some(&entry), false, true), Local::Modified);
		assert_eq!(classify(None, false, true), Local::Absent);
	}

	#[test]
	fn test_builtin_names() {
		assert!(is_builtin("update"));
		assert!(is_builtin("ci"));
		assert!(!is_builtin("annotate"));
	}
}

// vim: ts=4
