//! Entries records and the per-directory Entries file
//!
//! One line per tracked file, `/name/revision/timestamp/options/tagdate`,
//! and one line per known subdirectory, `D/name////`. Lines are kept
//! verbatim enough that writing a parsed file back reproduces it.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::admin::{admin_path, ENTRIES, ENTRIES_BACKUP};
use crate::error::{SyncError, SyncResult};

/// Timestamp given to entries whose revision is not yet in the repository
pub const DUMMY_TIMESTAMP: &str = "dummy timestamp";
pub const DUMMY_FROM_NEW_ENTRY: &str = "dummy timestamp from new-entry";
pub const MERGE_TIMESTAMP: &str = "Result of merge";

/// Meaning of an entry's timestamp field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampState {
	/// Nothing recorded
	Empty,
	/// Client reported the file unmodified (`=`)
	Unmodified,
	/// Client reported the file modified (`M`)
	Modified,
	/// Conflict marker (`+...`)
	Conflict,
	/// Placeholder for a file the repository does not have yet
	Dummy,
	/// Modification time of the file when it was last synchronized
	Recorded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
	pub name: String,
	pub revision: String,
	pub timestamp: String,
	pub options: String,
	/// `T<tag>`, `D<date>` or empty
	pub tag_or_date: String,
	pub directory: bool,
}

impl Entry {
	pub fn file(name: &str, revision: &str, timestamp: &str, options: &str, tag_or_date: &str) -> Self {
		Entry {
			name: name.to_string(),
			revision: revision.to_string(),
			timestamp: timestamp.to_string(),
			options: options.to_string(),
			tag_or_date: tag_or_date.to_string(),
			directory: false,
		}
	}

	pub fn directory(name: &str) -> Self {
		Entry {
			name: name.to_string(),
			revision: String::new(),
			timestamp: String::new(),
			options: String::new(),
			tag_or_date: String::new(),
			directory: true,
		}
	}

	/// Parse one Entries line
	///
	/// Five slashes are required; anything after a sixth slash is ignored.
	pub fn parse(line: &str) -> SyncResult<Self> {
		let bad = || SyncError::BadEntry { line: line.to_string() };
		let (directory, body) = match line.strip_prefix('D') {
			Some(rest) => (true, rest),
			None => (false, line),
		};
		let body = body.strip_prefix('/').ok_or_else(bad)?;
		let fields: Vec<&str> = body.splitn(6, '/').collect();
		if fields.len() < 5 {
			return Err(bad());
		}
		Ok(Entry {
			name: fields[0].to_string(),
			revision: fields[1].to_string(),
			timestamp: fields[2].to_string(),
			options: fields[3].to_string(),
			tag_or_date: fields[4].to_string(),
			directory,
		})
	}

	pub fn to_line(&self) -> String {
		format!(
			"{}/{}/{}/{}/{}/{}",
			if self.directory { "D" } else { "" },
			self.name,
			self.revision,
			self.timestamp,
			self.options,
			self.tag_or_date
		)
	}

	pub fn tag(&self) -> Option<&str> {
		self.tag_or_date.strip_prefix('T')
	}

	pub fn date(&self) -> Option<&str> {
		self.tag_or_date.strip_prefix('D')
	}

	/// The revision names a file the repository has not committed yet
	pub fn is_new(&self) -> bool {
		self.revision.is_empty() || self.revision == "0"
	}

	/// The file is scheduled for removal
	pub fn is_removed(&self) -> bool {
		self.revision.starts_with('-')
	}

	pub fn timestamp_state(&self) -> TimestampState {
		match self.timestamp.as_str() {
			"" => TimestampState::Empty,
			"=" => TimestampState::Unmodified,
			"M" => TimestampState::Modified,
			t if t.starts_with('+') => TimestampState::Conflict,
			t if t.starts_with(DUMMY_TIMESTAMP) => TimestampState::Dummy,
			_ => TimestampState::Recorded,
		}
	}

	/// Apply `Unchanged`: the client has the revision on disk unmodified
	pub fn mark_unchanged(&mut self) {
		if !self.timestamp.starts_with('+') {
			self.timestamp = "=".to_string();
		}
	}

	/// Apply `Is-modified`: the client's copy differs from the revision
	pub fn mark_modified(&mut self) {
		if !self.timestamp.starts_with('+') {
			self.timestamp = "M".to_string();
		}
	}
}

/// Ordered entries of one directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntriesFile {
	entries: Vec<Entry>,
}

impl EntriesFile {
	pub fn new() -> Self {
		Self::default()
	}

	/// Parse file contents; lines that fail to parse are skipped
	pub fn parse(text: &str) -> Self {
		let entries = text
			.lines()
			.filter(|l| !l.is_empty() && *l != "D")
			.filter_map(|l| Entry::parse(l).ok())
			.collect();
		EntriesFile { entries }
	}

	/// Load `<dir>/CVS/Entries`; a missing file is an empty set
	pub fn load(dir: &Path) -> io::Result<Self> {
		match fs::read_to_string(admin_path(dir, ENTRIES)) {
			Ok(text) => Ok(Self::parse(&text)),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::new()),
			Err(e) => Err(e),
		}
	}

	pub fn to_text(&self) -> String {
		let mut text = String::new();
		for entry in &self.entries {
			text.push_str(&entry.to_line());
			text.push('\n');
		}
		text
	}

	/// Write `<dir>/CVS/Entries` through a backup file and rename
	pub fn save(&self, dir: &Path) -> io::Result<()> {
		let backup: PathBuf = admin_path(dir, ENTRIES_BACKUP);
		{
			let mut file = fs::File::create(&backup)?;
			file.write_all(self.to_text().as_bytes())?;
			file.sync_all()?;
		}
		fs::rename(&backup, admin_path(dir, ENTRIES))
	}

	pub fn get(&self, name: &str) -> Option<&Entry> {
		self.entries.iter().find(|e| e.name == name && !e.directory)
	}

	pub fn get_mut(&mut self, name: &str) -> Option<&mut Entry> {
		self.entries.iter_mut().find(|e| e.name == name && !e.directory)
	}

	/// Insert or replace the entry with the same name and kind
	pub fn register(&mut self, entry: Entry) {
		match self.entries.iter_mut().find(|e| e.name == entry.name && e.directory == entry.directory) {
			Some(slot) => *slot = entry,
			None => self.entries.push(entry),
		}
	}

	/// Drop a file entry; returns it when present
	pub fn remove(&mut self, name: &str) -> Option<Entry> {
		let pos = self.entries.iter().position(|e| e.name == name && !e.directory)?;
		Some(self.entries.remove(pos))
	}

	pub fn files(&self) -> impl Iterator<Item = &Entry> {
		self.entries.iter().filter(|e| !e.directory)
	}

	pub fn directories(&self) -> impl Iterator<Item = &Entry> {
		self.entries.iter().filter(|e| e.directory)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_file_entry() {
		let e = Entry::parse("/foo.c/1.2/Sun Sep 16 05:03:52 1973/-kb/Trel-1").unwrap();
		assert_eq!(e.name, "foo.c");
		assert_eq!(e.revision, "1.2");
		assert_eq!(e.options, "-kb");
		assert_eq!(e.tag(), Some("rel-1"));
		assert_eq!(e.timestamp_state(), TimestampState::Recorded);
		assert_eq!(e.to_line(), "/foo.c/1.2/Sun Sep 16 05:03:52 1973/-kb/Trel-1");
	}

	#[test]
	fn test_trailing_fields_ignored() {
		let e = Entry::parse("/foo.c/1.1///D2001.01.01.00.00.00/extra").unwrap();
		assert_eq!(e.date(), Some("2001.01.01.00.00.00"));
	}

	#[test]
	fn test_malformed_lines() {
		assert!(Entry::parse("foo.c/1.1///").is_err());
		assert!(Entry::parse("/foo.c/1.1//").is_err());
		let err = Entry::parse("/x").unwrap_err();
		assert_eq!(err.to_string(), "bad entries line `/x' from server");
	}

	#[test]
	fn test_directory_entry() {
		let e = Entry::parse("D/sub////").unwrap();
		assert!(e.directory);
		assert_eq!(e.to_line(), "D/sub////");
	}

	#[test]
	fn test_unchanged_is_idempotent() {
		let mut e = Entry::parse("/foo.c/1.1/=//").unwrap();
		let before = e.clone();
		e.mark_unchanged();
		assert_eq!(e, before);
	}

	#[test]
	fn test_conflict_marker_survives() {
		let mut e = Entry::parse("/foo.c/1.1/+=//").unwrap();
		e.mark_modified();
		assert_eq!(e.timestamp, "+=");
		assert_eq!(e.timestamp_state(), TimestampState::Conflict);
		e.timestamp = String::new();
		e.mark_modified();
		assert_eq!(e.timestamp_state(), TimestampState::Modified);
	}

	#[test]
	fn test_entries_file_round_trip_on_disk() {
		let dir = tempfile::TempDir::new().unwrap();
		fs::create_dir(dir.path().join("CVS")).unwrap();
		let text = "/a.c/1.1/dummy timestamp//\nD/sub////\n/b.c/1.3/=//Tbranch\n";
		EntriesFile::parse(text).save(dir.path()).unwrap();
		let loaded = EntriesFile::load(dir.path()).unwrap();
		assert_eq!(loaded.to_text(), text);
		assert_eq!(loaded.files().count(), 2);
		assert_eq!(loaded.directories().count(), 1);
		assert!(!dir.path().join("CVS/Entries.Backup").exists());
	}

	#[test]
	fn test_register_replaces_same_name() {
		let mut entries = EntriesFile::new();
		entries.register(Entry::file("a.c", "1.1", "", "", ""));
		entries.register(Entry::directory("a.c"));
		entries.register(Entry::file("a.c", "1.2", "", "", ""));
		assert_eq!(entries.len(), 2);
		assert_eq!(entries.get("a.c").unwrap().revision, "1.2");
		assert!(entries.remove("a.c").is_some());
		assert!(entries.get("a.c").is_none());
	}
}

// vim: ts=4
