//! Administrative files of a working directory
//!
//! Every working directory carries a `CVS` subdirectory holding its
//! repository location, its Entries file and a few optional markers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::entries::{EntriesFile, Entry};

pub const CVSADM: &str = "CVS";
pub const REPOSITORY: &str = "Repository";
pub const ROOT: &str = "Root";
pub const ENTRIES: &str = "Entries";
pub const ENTRIES_BACKUP: &str = "Entries.Backup";
/// Presence means the directory is not to be searched for new files
pub const ENTRIES_STATIC: &str = "Entries.Static";
pub const TAG: &str = "Tag";
pub const TEMPLATE: &str = "Template";
pub const NOTIFY: &str = "Notify";
pub const BASE: &str = "Base";

pub fn admin_dir(dir: &Path) -> PathBuf {
	dir.join(CVSADM)
}

pub fn admin_path(dir: &Path, file: &str) -> PathBuf {
	dir.join(CVSADM).join(file)
}

pub fn has_admin(dir: &Path) -> bool {
	admin_dir(dir).is_dir()
}

/// Create `<dir>/CVS` with a repository marker and an empty Entries file
///
/// Existing Entries are left alone; the repository marker is rewritten.
pub fn create_admin(dir: &Path, repository: &str, root: Option<&str>) -> io::Result<()> {
	fs::create_dir_all(admin_dir(dir))?;
	write_repository(dir, repository)?;
	if let Some(root) = root {
		fs::write(admin_path(dir, ROOT), format!("{}\n", root))?;
	}
	let entries = admin_path(dir, ENTRIES);
	if !entries.exists() {
		fs::write(entries, "")?;
	}
	Ok(())
}

pub fn write_repository(dir: &Path, repository: &str) -> io::Result<()> {
	fs::write(admin_path(dir, REPOSITORY), format!("{}\n", repository))
}

pub fn read_repository(dir: &Path) -> io::Result<String> {
	Ok(fs::read_to_string(admin_path(dir, REPOSITORY))?.trim_end_matches('\n').to_string())
}

pub fn read_root(dir: &Path) -> Option<String> {
	fs::read_to_string(admin_path(dir, ROOT)).ok().map(|s| s.trim_end().to_string())
}

/// Record `name` as a subdirectory in the Entries file of `parent`
pub fn register_subdir(parent: &Path, name: &str) -> io::Result<()> {
	if !has_admin(parent) {
		return Ok(());
	}
	let mut entries = EntriesFile::load(parent)?;
	entries.register(Entry::directory(name));
	entries.save(parent)
}

pub fn set_static(dir: &Path, on: bool) -> io::Result<()> {
	let path = admin_path(dir, ENTRIES_STATIC);
	if on {
		fs::write(path, "")
	} else {
		remove_if_present(&path)
	}
}

pub fn is_static(dir: &Path) -> bool {
	admin_path(dir, ENTRIES_STATIC).exists()
}

/// Sticky tag or date of the directory (`T<tag>` or `D<date>`)
pub fn set_sticky(dir: &Path, tag: Option<&str>) -> io::Result<()> {
	let path = admin_path(dir, TAG);
	match tag {
		Some(tag) => fs::write(path, format!("{}\n", tag)),
		None => remove_if_present(&path),
	}
}

pub fn read_sticky(dir: &Path) -> Option<String> {
	fs::read_to_string(admin_path(dir, TAG)).ok().map(|s| s.trim_end().to_string())
}

pub fn set_template(dir: &Path, contents: Option<&[u8]>) -> io::Result<()> {
	let path = admin_path(dir, TEMPLATE);
	match contents {
		Some(data) => fs::write(path, data),
		None => remove_if_present(&path),
	}
}

/// Keep a pristine copy of `file` for a later unedit
pub fn save_base_copy(dir: &Path, file: &str) -> io::Result<()> {
	let base = admin_path(dir, BASE);
	fs::create_dir_all(&base)?;
	fs::copy(dir.join(file), base.join(file)).map(|_| ())
}

/// Pending notification lines (`<file>\t...`) not yet acknowledged by the server
pub fn read_notifications(dir: &Path) -> Vec<String> {
	fs::read_to_string(admin_path(dir, NOTIFY))
		.map(|s| s.lines().map(|l| l.to_string()).collect())
		.unwrap_or_default()
}

pub fn append_notification(dir: &Path, line: &str) -> io::Result<()> {
	let mut lines = read_notifications(dir);
	lines.push(line.to_string());
	fs::write(admin_path(dir, NOTIFY), lines.join("\n") + "\n")
}

/// Drop the pending notification for `file`
pub fn clear_notification(dir: &Path, file: &str) -> io::Result<()> {
	let remaining: Vec<String> =
		read_notifications(dir).into_iter().filter(|l| l.split('\t').next() != Some(file)).collect();
	let path = admin_path(dir, NOTIFY);
	if remaining.is_empty() {
		remove_if_present(&path)
	} else {
		fs::write(path, remaining.join("\n") + "\n")
	}
}

fn remove_if_present(path: &Path) -> io::Result<()> {
	match fs::remove_file(path) {
		Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
		_ => Ok(()),
	}
}


// vim: ts=4
