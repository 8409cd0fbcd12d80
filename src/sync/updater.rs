//! Working-copy synchronizer
//!
//! Applies one transfer at a time: locate (and create) the directory,
//! check the existence expectation, rebuild the content from a full body,
//! a unified diff or an RCS change script, verify the declared checksum,
//! write through a temporary file, then apply mode and modification time
//! and register the Entries line.
//!
//! `Checksum`, `Mode` and `Mod-time` responses arrive before the transfer
//! they belong to and are held here until it is applied.

use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::admin;
use super::checksum::Checksum;
use super::directory::{materialize, Location};
use super::entries::{EntriesFile, Entry, DUMMY_TIMESTAMP};
use super::mode::change_mode;
use super::patch::{apply_rcs_diff, apply_unified_diff};
use super::Notice;
use crate::error::{SyncError, SyncResult};
use crate::logging::*;
use crate::util::{entries_timestamp, parse_date};

/// How the transfer carries the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contents {
	/// Entry only, the file on disk is already right
	Checkin,
	/// Full body
	Update,
	/// Unified diff against the local file
	Patch,
	/// RCS change script against the local file
	RcsDiff,
}

impl Contents {
	pub fn has_payload(self) -> bool {
		self != Contents::Checkin
	}
}

/// What the server expects to find locally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
	Either,
	New,
	Existing,
}

/// Body of a transfer, already decompressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
	pub mode: String,
	pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	/// File written and entry registered
	Updated,
	/// Entry registered, file untouched
	Registered,
	/// A local file is in the way of a new one; nothing changed
	InTheWay,
	/// Delta could not be applied or verified; queued for refetch
	PatchFailed,
}

pub struct Synchronizer {
	top: PathBuf,
	toplevel_repos: String,
	export: bool,
	checksum: Option<Checksum>,
	mode: Option<String>,
	modtime: Option<SystemTime>,
	failed_patches: Vec<String>,
	conflicts: usize,
	notices: Vec<Notice>,
}

impl Synchronizer {
	pub fn new<P: AsRef<Path>>(top: P, toplevel_repos: &str) -> Self {
		Synchronizer {
			top: top.as_ref().to_path_buf(),
			toplevel_repos: toplevel_repos.to_string(),
			export: false,
			checksum: None,
			mode: None,
			modtime: None,
			failed_patches: Vec::new(),
			conflicts: 0,
			notices: Vec::new(),
		}
	}

	pub fn top(&self) -> &Path {
		&self.top
	}

	pub fn set_toplevel_repos(&mut self, repos: &str) {
		self.toplevel_repos = repos.to_string();
	}

	/// Export mode: files only, no administrative files
	pub fn set_export(&mut self, export: bool) {
		self.export = export;
	}

	pub fn take_notices(&mut self) -> Vec<Notice> {
		std::mem::take(&mut self.notices)
	}

	pub fn take_failed_patches(&mut self) -> Vec<String> {
		std::mem::take(&mut self.failed_patches)
	}

	pub fn failed_patches(&self) -> &[String] {
		&self.failed_patches
	}

	/// Files refused because something was in the way
	pub fn conflicts(&self) -> usize {
		self.conflicts
	}

	// ─── Pending metadata ───

	pub fn set_checksum(&mut self, text: &str) -> SyncResult<()> {
		if self.checksum.is_some() {
			return Err(SyncError::Other {
				message: "Checksum received before last one was used".to_string(),
			});
		}
		self.checksum = Some(Checksum::parse(text)?);
		Ok(())
	}

	pub fn set_mode(&mut self, text: &str) -> SyncResult<()> {
		if self.mode.is_some() {
			return Err(SyncError::Other { message: "protocol error: duplicate Mode".to_string() });
		}
		self.mode = Some(text.to_string());
		Ok(())
	}

	pub fn set_modtime(&mut self, text: &str) {
		if self.modtime.is_some() {
			self.notices.push(Notice::Err("protocol error: duplicate Mod-time".to_string()));
			return;
		}
		match parse_date(text) {
			Some(time) => self.modtime = Some(time),
			None => self.notices.push(Notice::Err(format!("protocol error: cannot parse date {}", text))),
		}
	}

	fn reset_pending(&mut self) {
		self.checksum = None;
		self.mode = None;
		self.modtime = None;
	}

	// ─── Transfers ───

	/// Resolve `pathname` + repository line to a local location
	pub fn locate(&mut self, pathname: &str, reposname: &str) -> SyncResult<Location> {
		materialize(&self.top, &self.toplevel_repos, pathname, reposname, self.export, &mut self.notices)
	}

	/// Apply one transfer and register its entry
	///
	/// `timestamp` overrides the registered timestamp (`New-entry`,
	/// `Merged`). Patch and checksum failures do not fail the call; the
	/// file is recorded for refetch instead.
	pub fn update_entries(
		&mut self,
		loc: &Location,
		entry_line: &str,
		contents: Contents,
		existence: Existence,
		payload: Option<Payload>,
		timestamp: Option<&str>,
	) -> SyncResult<Outcome> {
		let entry = Entry::parse(entry_line)?;
		let path = loc.path();

		let mut outcome = Outcome::Registered;
		if contents.has_payload() {
			let payload = payload.ok_or_else(|| SyncError::Other {
				message: format!("missing contents for {}", loc.short_pathname),
			})?;

			if existence == Existence::Existing && !path.is_file() {
				self.notices.push(Notice::Err(format!("warning: {} unexpectedly disappeared", loc.short_pathname)));
			}
			if existence == Existence::New && path.is_file() {
				self.notices.push(Notice::Err(format!("move away `{}'; it is in the way", loc.short_pathname)));
				self.notices.push(Notice::Out(format!("C {}", loc.short_pathname)));
				self.conflicts += 1;
				self.reset_pending();
				return Ok(Outcome::InTheWay);
			}

			let data = match self.rebuild(loc, contents, payload.data)? {
				Some(data) => data,
				None => {
					debug!("[sync] queueing {} for refetch", loc.short_pathname);
					self.failed_patches.push(loc.short_pathname.clone());
					self.reset_pending();
					return Ok(Outcome::PatchFailed);
				}
			};

			let temp = loc.dir.join(format!(".new.{}", loc.file));
			fs::write(&temp, &data)?;
			fs::rename(&temp, &path)?;
			if let Err(e) = change_mode(&path, &payload.mode) {
				self.notices.push(Notice::Err(format!("cannot change mode of {}: {}", loc.short_pathname, e)));
			}
			outcome = Outcome::Updated;
		}

		if let Some(mode) = self.mode.take() {
			change_mode(&path, &mode)?;
		}
		if let Some(time) = self.modtime.take() {
			if let Err(e) = filetime::set_file_mtime(&path, FileTime::from_system_time(time)) {
				self.notices.push(Notice::Err(format!("cannot set time on {}: {}", path.display(), e)));
			}
		}
		self.checksum = None;

		if !self.export {
			self.register(loc, entry, timestamp)?;
		}
		Ok(outcome)
	}

	/// New content for a transfer; `None` means the delta must be refetched
	fn rebuild(&mut self, loc: &Location, contents: Contents, body: Vec<u8>) -> SyncResult<Option<Vec<u8>>> {
		let data = match contents {
			Contents::Checkin | Contents::Update => body,
			Contents::Patch | Contents::RcsDiff => {
				let original = match fs::read(loc.path()) {
					Ok(data) => data,
					Err(e) => {
						self.notices.push(Notice::Err(format!(
							"patch original file {} does not exist ({})",
							loc.short_pathname, e
						)));
						return Ok(None);
					}
				};
				let applied = if contents == Contents::Patch {
					apply_unified_diff(&original, &body)
				} else {
					apply_rcs_diff(&original, &body)
				};
				match applied {
					Ok(data) => data,
					Err(message) => {
						self.notices.push(Notice::Err(format!("could not patch {}: {}; will refetch", loc.short_pathname, message)));
						return Ok(None);
					}
				}
			}
		};

		if let Some(sum) = self.checksum.take() {
			if !sum.matches(&data) {
				if contents == Contents::Update {
					return Err(SyncError::Checksum { path: loc.short_pathname.clone() });
				}
				self.notices.push(Notice::Err(format!(
					"checksum failure after patch to {}; will refetch",
					loc.short_pathname
				)));
				return Ok(None);
			}
		}
		Ok(Some(data))
	}

	fn register(&mut self, loc: &Location, mut entry: Entry, timestamp: Option<&str>) -> SyncResult<()> {
		let path = loc.path();
		let conflict = entry.timestamp.starts_with('+');
		let file_timestamp = if timestamp.is_none() || conflict {
			fs::metadata(&path).and_then(|m| m.modified()).ok().map(entries_timestamp)
		} else {
			None
		};

		let mut local = if entry.is_new() || entry.is_removed() {
			DUMMY_TIMESTAMP.to_string()
		} else {
			match timestamp {
				Some(ts) => ts.to_string(),
				None => file_timestamp.clone().unwrap_or_else(|| DUMMY_TIMESTAMP.to_string()),
			}
		};
		if conflict {
			local = format!("{}+{}", local, file_timestamp.unwrap_or_default());
		}
		entry.timestamp = local;
		entry.name = loc.file.clone();

		let mut entries = EntriesFile::load(&loc.dir)?;
		entries.register(entry);
		entries.save(&loc.dir)?;
		Ok(())
	}

	// ─── Other working-copy responses ───

	/// `Removed`: delete the file and its entry
	pub fn remove_file(&mut self, loc: &Location) -> SyncResult<()> {
		match fs::remove_file(loc.path()) {
			Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
			_ => {}
		}
		self.remove_entry(loc)
	}

	/// `Remove-entry`: forget the entry, keep the file
	pub fn remove_entry(&mut self, loc: &Location) -> SyncResult<()> {
		if self.export {
			return Ok(());
		}
		let mut entries = EntriesFile::load(&loc.dir)?;
		if entries.remove(&loc.file).is_some() {
			entries.save(&loc.dir)?;
		}
		Ok(())
	}

	/// `Copy-file`: keep a copy of the local file under `new_name`
	pub fn copy_file(&mut self, loc: &Location, new_name: &str) -> SyncResult<()> {
		if new_name.contains('/') {
			return Err(SyncError::InvalidPath { path: new_name.to_string() });
		}
		fs::copy(loc.path(), loc.dir.join(new_name))?;
		Ok(())
	}

	pub fn set_sticky(&mut self, loc: &Location, tag: Option<&str>) -> SyncResult<()> {
		admin::set_sticky(&loc.dir, tag)?;
		Ok(())
	}

	pub fn set_static(&mut self, loc: &Location, on: bool) -> SyncResult<()> {
		admin::set_static(&loc.dir, on)?;
		Ok(())
	}

	pub fn set_template(&mut self, loc: &Location, contents: Option<&[u8]>) -> SyncResult<()> {
		admin::set_template(&loc.dir, contents)?;
		Ok(())
	}

	/// `Edit-file`: keep a base copy for a later unedit
	pub fn edit_file(&mut self, loc: &Location) -> SyncResult<()> {
		admin::save_base_copy(&loc.dir, &loc.file)?;
		Ok(())
	}

	/// `Notified`: the server processed the notification for this file
	pub fn notified(&mut self, loc: &Location) -> SyncResult<()> {
		admin::clear_notification(&loc.dir, &loc.file)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn sync(top: &Path) -> Synchronizer {
		Synchronizer::new(top, "/repo")
	}

	fn payload(data: &[u8]) -> Option<Payload> {
		Some(Payload { mode: "u=rw,g=r,o=r".to_string(), data: data.to_vec() })
	}

	// ─── Full Transfer Tests ───

	#[test]
	fn test_updated_writes_file_and_entry() {
		let top = TempDir::new().unwrap();
		let mut s = sync(top.path());
		let loc = s.locate("./", "/repo/foo.c").unwrap();
		let outcome = s
			.update_entries(&loc, "/foo.c/1.2///", Contents::Update, Existence::Either, payload(b"int x;\n"), None)
			.unwrap();
		assert_eq!(outcome, Outcome::Updated);
		assert_eq!(fs::read(top.path().join("foo.c")).unwrap(), b"int x;\n");
		assert!(!top.path().join(".new.foo.c").exists());
		let entries = EntriesFile::load(top.path()).unwrap();
		let entry = entries.get("foo.c").unwrap();
		assert_eq!(entry.revision, "1.2");
		let mtime = fs::metadata(top.path().join("foo.c")).unwrap().modified().unwrap();
		assert_eq!(entry.timestamp, entries_timestamp(mtime));
	}

	#[test]
	fn test_new_file_in_the_way() {
		let top = TempDir::new().unwrap();
		fs::write(top.path().join("foo.c"), b"mine").unwrap();
		let mut s = sync(top.path());
		let loc = s.locate("./", "/repo/foo.c").unwrap();
		let outcome =
			s.update_entries(&loc, "/foo.c/1.1///", Contents::Update, Existence::New, payload(b"theirs"), None).unwrap();
		assert_eq!(outcome, Outcome::InTheWay);
		assert_eq!(fs::read(top.path().join("foo.c")).unwrap(), b"mine");
		assert_eq!(
			s.take_notices(),
			vec![Notice::Err("move away `./foo.c'; it is in the way".to_string()), Notice::Out("C ./foo.c".to_string())]
		);
		assert_eq!(s.conflicts(), 1);
	}

	#[test]
	fn test_missing_existing_file_only_warns() {
		let top = TempDir::new().unwrap();
		let mut s = sync(top.path());
		let loc = s.locate("./", "/repo/foo.c").unwrap();
		let outcome =
			s.update_entries(&loc, "/foo.c/1.1///", Contents::Update, Existence::Existing, payload(b"x"), None).unwrap();
		assert_eq!(outcome, Outcome::Updated);
		assert_eq!(s.take_notices(), vec![Notice::Err("warning: ./foo.c unexpectedly disappeared".to_string())]);
	}

	#[test]
	fn test_full_transfer_checksum_mismatch_is_fatal() {
		let top = TempDir::new().unwrap();
		let mut s = sync(top.path());
		s.set_checksum(&Checksum::of(b"other").to_string()).unwrap();
		let loc = s.locate("./", "/repo/foo.c").unwrap();
		let err = s
			.update_entries(&loc, "/foo.c/1.1///", Contents::Update, Existence::Either, payload(b"x"), None)
			.unwrap_err();
		assert_eq!(err.to_string(), "checksum failure on ./foo.c");
		assert!(!top.path().join("foo.c").exists());
	}

	// ─── Delta Tests ───

	#[test]
	fn test_patch_with_bad_checksum_is_queued() {
		let top = TempDir::new().unwrap();
		fs::write(top.path().join("foo.c"), b"a\nb\n").unwrap();
		let mut s = sync(top.path());
		s.set_checksum("00000000000000000000000000000000").unwrap();
		let loc = s.locate("./", "/repo/foo.c").unwrap();
		let patch = b"@@ -1,2 +1,2 @@\n a\n-b\n+c\n";
		let outcome =
			s.update_entries(&loc, "/foo.c/1.3///", Contents::Patch, Existence::Either, payload(patch), None).unwrap();
		assert_eq!(outcome, Outcome::PatchFailed);
		assert_eq!(fs::read(top.path().join("foo.c")).unwrap(), b"a\nb\n");
		assert_eq!(s.failed_patches(), ["./foo.c".to_string()]);
		assert!(EntriesFile::load(top.path()).unwrap().get("foo.c").is_none());
		// the checksum was consumed by the failed transfer
		s.set_checksum("00000000000000000000000000000000").unwrap();
	}

	#[test]
	fn test_rcs_diff_applied_and_verified() {
		let top = TempDir::new().unwrap();
		fs::write(top.path().join("foo.c"), b"one\ntwo\n").unwrap();
		let mut s = sync(top.path());
		s.set_checksum(&Checksum::of(b"one\n2\n").to_string()).unwrap();
		let loc = s.locate("./", "/repo/foo.c").unwrap();
		let outcome = s
			.update_entries(&loc, "/foo.c/1.4///", Contents::RcsDiff, Existence::Either, payload(b"d2 1\na2 1\n2\n"), None)
			.unwrap();
		assert_eq!(outcome, Outcome::Updated);
		assert_eq!(fs::read(top.path().join("foo.c")).unwrap(), b"one\n2\n");
	}

	#[test]
	fn test_rcs_diff_without_original_is_queued() {
		let top = TempDir::new().unwrap();
		let mut s = sync(top.path());
		let loc = s.locate("./", "/repo/gone.c").unwrap();
		let outcome = s
			.update_entries(&loc, "/gone.c/1.2///", Contents::RcsDiff, Existence::Either, payload(b"d1 1\n"), None)
			.unwrap();
		assert_eq!(outcome, Outcome::PatchFailed);
	}

	// ─── Metadata Tests ───

	#[test]
	fn test_stored_mode_and_modtime_applied_after_content() {
		let top = TempDir::new().unwrap();
		let mut s = sync(top.path());
		s.set_modtime("1 Jan 2001 00:00:00 -0000");
		s.set_mode("u=r,g=r,o=r").unwrap();
		assert!(s.set_mode("u=rw").is_err());
		let loc = s.locate("./", "/repo/foo.c").unwrap();
		s.update_entries(&loc, "/foo.c/1.1///", Contents::Update, Existence::Either, payload(b"x"), None).unwrap();
		let meta = fs::metadata(top.path().join("foo.c")).unwrap();
		assert_eq!(FileTime::from_last_modification_time(&meta).unix_seconds(), 978_307_200);
		assert!(meta.permissions().readonly());
		let entry = EntriesFile::load(top.path()).unwrap().get("foo.c").cloned().unwrap();
		assert_eq!(entry.timestamp, "Mon Jan  1 00:00:00 2001");
	}

	#[test]
	fn test_second_checksum_before_use() {
		let top = TempDir::new().unwrap();
		let mut s = sync(top.path());
		s.set_checksum("d41d8cd98f00b204e9800998ecf8427e").unwrap();
		let err = s.set_checksum("d41d8cd98f00b204e9800998ecf8427e").unwrap_err();
		assert_eq!(err.to_string(), "Checksum received before last one was used");
	}

	#[test]
	fn test_checkin_registers_entry_only() {
		let top = TempDir::new().unwrap();
		fs::write(top.path().join("new.c"), b"local").unwrap();
		let mut s = sync(top.path());
		let loc = s.locate("./", "/repo/new.c").unwrap();
		let outcome = s
			.update_entries(&loc, "/new.c/0///", Contents::Checkin, Existence::Either, None, None)
			.unwrap();
		assert_eq!(outcome, Outcome::Registered);
		let entry = EntriesFile::load(top.path()).unwrap().get("new.c").cloned().unwrap();
		assert_eq!(entry.timestamp, DUMMY_TIMESTAMP);
		assert_eq!(fs::read(top.path().join("new.c")).unwrap(), b"local");
	}

	#[test]
	fn test_conflict_timestamp_and_removal() {
		let top = TempDir::new().unwrap();
		let mut s = sync(top.path());
		let loc = s.locate("./", "/repo/m.c").unwrap();
		s.update_entries(&loc, "/m.c/1.5/+//", Contents::Update, Existence::Either, payload(b"<<<<<<<\n"), Some("Result of merge"))
			.unwrap();
		let entry = EntriesFile::load(top.path()).unwrap().get("m.c").cloned().unwrap();
		assert!(entry.timestamp.starts_with("Result of merge+"));

		s.remove_file(&loc).unwrap();
		assert!(!top.path().join("m.c").exists());
		assert!(EntriesFile::load(top.path()).unwrap().get("m.c").is_none());
	}
}

// vim: ts=4
