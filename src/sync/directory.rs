//! Working directory materialization
//!
//! A transfer names its target twice: the working directory as the client
//! knows it (`sub/dir/`) and the full repository path of the file
//! (`/repo/module/sub/dir/foo.c`). Missing directories are created one
//! level at a time, each with its own `CVS/Repository`, because modules can
//! map a repository subtree to any local name and only the level being
//! created tells which repository directory it corresponds to.

use std::fs;
use std::path::{Path, PathBuf};

use super::admin;
use super::Notice;
use crate::error::{SyncError, SyncResult};
use crate::logging::*;
use crate::util::is_valid_client_path;

/// Where a transferred file lives locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
	/// Absolute path of the working directory holding the file
	pub dir: PathBuf,
	/// Working directory relative to the top, `.` for the top itself
	pub dir_name: String,
	/// File name
	pub file: String,
	/// `pathname` + `file`, as shown to the user
	pub short_pathname: String,
	/// Repository path the server gave for the file
	pub repository: String,
}

impl Location {
	pub fn path(&self) -> PathBuf {
		self.dir.join(&self.file)
	}
}

/// Resolve a transfer target and create any missing directories
///
/// `pathname` is the working directory with a trailing slash, `reposname`
/// the repository path of the file. With `export` set no administrative
/// files are written.
pub fn materialize(
	top: &Path,
	toplevel_repos: &str,
	pathname: &str,
	reposname: &str,
	export: bool,
	notices: &mut Vec<Notice>,
) -> SyncResult<Location> {
	let prefix = format!("{}/", toplevel_repos.trim_end_matches('/'));
	let (short_repos, absolute) = match reposname.strip_prefix(&prefix) {
		Some(rest) if !toplevel_repos.is_empty() => (rest, false),
		_ => (reposname, true),
	};
	let file = short_repos.rsplit('/').next().unwrap_or(short_repos).to_string();
	let short_pathname = format!("{}{}", pathname, file);
	if !is_valid_client_path(&short_pathname) {
		return Err(SyncError::InvalidPath { path: short_pathname });
	}

	let reposdirname = match short_repos.rfind('/') {
		Some(pos) => &short_repos[..pos],
		None => ".",
	};
	let dir_name = match pathname.rfind('/') {
		Some(pos) => &pathname[..pos],
		None => ".",
	};
	let components: Vec<&str> = dir_name.split('/').filter(|c| !c.is_empty() && *c != ".").collect();
	let dir_name = if components.is_empty() { ".".to_string() } else { components.join("/") };
	let repo_path = |relative: &str| {
		if absolute {
			relative.to_string()
		} else {
			format!("{}{}", prefix, relative)
		}
	};

	if !absolute && dir_name == "." && !export && !admin::has_admin(top) {
		let repo = if toplevel_repos.ends_with("/.") {
			toplevel_repos.to_string()
		} else {
			format!("{}/.", toplevel_repos)
		};
		admin::create_admin(top, &repo, None)?;
	}

	let dir = if dir_name == "." { top.to_path_buf() } else { top.join(&dir_name) };
	if !dir.is_dir() {
		let repo_parts: Vec<&str> = reposdirname.split('/').collect();
		// number of leading repository components matched so far; None once exhausted
		let mut repo_level = Some(0usize);
		let mut current = top.to_path_buf();
		for (level, name) in components.iter().enumerate() {
			let last = level + 1 == components.len();
			repo_level = match repo_level {
				Some(n) if !last && n + 1 < repo_parts.len() => Some(n + 1),
				_ => None,
			};
			if *name == admin::CVSADM {
				notices.push(Notice::Err(format!(
					"because CVS uses \"{}\" for its own uses",
					admin::CVSADM
				)));
				return Err(SyncError::ReservedName { name: (*name).to_string() });
			}
			let parent = current.clone();
			current.push(name);
			if current.is_dir() {
				continue;
			}
			fs::create_dir(&current)?;
			debug!("[sync] created directory {}", current.display());
			if export {
				continue;
			}
			let repo = match repo_level {
				Some(n) => {
					notices.push(Notice::Err(
						"warning: server is not creating directories one at a time".to_string(),
					));
					repo_path(&repo_parts[..n].join("/"))
				}
				None => repo_path(reposdirname),
			};
			admin::create_admin(&current, &repo, None)?;
			admin::register_subdir(&parent, name)?;
		}
	} else if !export && !admin::has_admin(&dir) {
		admin::create_admin(&dir, &repo_path(reposdirname), None)?;
	}

	Ok(Location {
		dir,
		dir_name,
		file,
		short_pathname,
		repository: reposname.to_string(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sync::entries::EntriesFile;
	use tempfile::TempDir;

	#[test]
	fn test_top_level_file() {
		let top = TempDir::new().unwrap();
		let mut notices = Vec::new();
		let loc = materialize(top.path(), "/repo/mod", "./", "/repo/mod/foo.c", false, &mut notices).unwrap();
		assert_eq!(loc.file, "foo.c");
		assert_eq!(loc.short_pathname, "./foo.c");
		assert_eq!(loc.dir_name, ".");
		assert_eq!(admin::read_repository(top.path()).unwrap(), "/repo/mod/.");
		assert!(notices.is_empty());
	}

	#[test]
	fn test_nested_directories_one_level_each() {
		let top = TempDir::new().unwrap();
		let mut notices = Vec::new();
		materialize(top.path(), "/repo", "./", "/repo/top.c", false, &mut notices).unwrap();
		let loc = materialize(top.path(), "/repo", "a/b/", "/repo/x/y/foo.c", false, &mut notices).unwrap();
		assert_eq!(loc.dir, top.path().join("a/b"));
		assert_eq!(admin::read_repository(&top.path().join("a")).unwrap(), "/repo/x");
		assert_eq!(admin::read_repository(&top.path().join("a/b")).unwrap(), "/repo/x/y");
		assert_eq!(notices, vec![Notice::Err("warning: server is not creating directories one at a time".to_string())]);

		let top_entries = EntriesFile::load(top.path()).unwrap();
		assert_eq!(top_entries.directories().next().unwrap().name, "a");
		let a_entries = EntriesFile::load(&top.path().join("a")).unwrap();
		assert_eq!(a_entries.directories().next().unwrap().name, "b");
	}

	#[test]
	fn test_module_alias_uses_full_repository() {
		let top = TempDir::new().unwrap();
		let mut notices = Vec::new();
		let loc = materialize(top.path(), "/repo", "alias/", "/repo/deep/tree/f.c", false, &mut notices).unwrap();
		assert_eq!(admin::read_repository(&loc.dir).unwrap(), "/repo/deep/tree");
		assert!(notices.is_empty());
	}

	#[test]
	fn test_invalid_paths_rejected() {
		let top = TempDir::new().unwrap();
		let mut notices = Vec::new();
		let err = materialize(top.path(), "/repo", "../", "/repo/f.c", false, &mut notices).unwrap_err();
		assert_eq!(err.to_string(), "Server attempted to update a file via an invalid pathname: `../f.c'.");
		assert!(materialize(top.path(), "/repo", "/etc/", "/repo/passwd", false, &mut notices).is_err());
	}

	#[test]
	fn test_admin_name_refused() {
		let top = TempDir::new().unwrap();
		let mut notices = Vec::new();
		let err = materialize(top.path(), "/repo", "CVS/", "/repo/CVS/f", false, &mut notices).unwrap_err();
		assert_eq!(err.to_string(), "cannot create a directory named CVS");
		assert!(!top.path().join("CVS/f").exists());
	}

	#[test]
	fn test_export_writes_no_admin_files() {
		let top = TempDir::new().unwrap();
		let mut notices = Vec::new();
		let loc = materialize(top.path(), "/repo", "sub/", "/repo/sub/f.c", true, &mut notices).unwrap();
		assert!(loc.dir.is_dir());
		assert!(!admin::has_admin(&loc.dir));
		assert!(!admin::has_admin(top.path()));
	}
}

// vim: ts=4
