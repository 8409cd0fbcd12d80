//! Revision store behind the built-in commands
//!
//! The protocol engine never looks inside a repository itself; commands go
//! through the [`Repository`] trait. [`FileStore`] is the bundled backend:
//! every tracked file is a directory of whole revisions.
//!
//! ```text
//! <root>/CVSROOT/               administrative files (cvsignore, cvswrappers)
//! <root>/<dir>/<name>,v/1.1     revision contents, mode and mtime preserved
//! <root>/<dir>/<name>,v/1.2
//! <root>/<dir>/<name>,v/dead    number of the revision that removed the file
//! <root>/<dir>/<name>,v/log     one line per revision
//! <root>/<dir>/<name>,v/notify  edit/unedit notifications
//! ```

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::fs as afs;
use tokio::io::AsyncWriteExt;

use crate::error::{RepositoryError, RepositoryResult};
use crate::logging::*;
use crate::sync::mode;
use crate::util;

pub const CVSROOT: &str = "CVSROOT";
const RCS_SUFFIX: &str = ",v";
const DEAD: &str = "dead";
const LOG: &str = "log";
const NOTIFY: &str = "notify";
const ATTIC: &str = "Attic";

/// One revision of a tracked file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
	/// `1.N`
	pub number: String,
	/// The revision records a removal
	pub dead: bool,
	/// Symbolic mode, `u=rw,g=r,o=r`
	pub mode: String,
	pub modified: SystemTime,
}

impl Revision {
	/// Revision that would follow this one
	pub fn next_number(&self) -> String {
		next_number(Some(&self.number))
	}
}

fn next_number(current: Option<&str>) -> String {
	let minor = current.and_then(|n| n.strip_prefix("1.")).and_then(|m| m.parse::<u32>().ok()).unwrap_or(0);
	format!("1.{}", minor + 1)
}

/// Storage used by the server's commands
///
/// Directories are absolute repository paths as the client names them in
/// `Directory` requests; implementations refuse paths outside their root.
#[async_trait]
pub trait Repository: Send + Sync {
	fn root(&self) -> &Path;

	/// Whether the administrative directory exists
	async fn exists(&self) -> bool;

	/// Create the root and its administrative directory
	async fn init(&self) -> RepositoryResult<()>;

	async fn is_directory(&self, dir: &Path) -> bool;

	async fn create_directory(&self, dir: &Path) -> RepositoryResult<()>;

	/// Names of the files tracked in `dir`, sorted
	async fn files(&self, dir: &Path) -> RepositoryResult<Vec<String>>;

	/// Names of the subdirectories of `dir`, sorted
	async fn subdirectories(&self, dir: &Path) -> RepositoryResult<Vec<String>>;

	/// Latest revision of `name`, `None` if the file was never committed
	async fn head(&self, dir: &Path, name: &str) -> RepositoryResult<Option<Revision>>;

	async fn contents(&self, dir: &Path, name: &str, revision: &str) -> RepositoryResult<Vec<u8>>;

	/// Store `data` as the next revision
	async fn commit(
		&self,
		dir: &Path,
		name: &str,
		data: &[u8],
		mode: &str,
		message: &str,
	) -> RepositoryResult<Revision>;

	/// Record a removal as the next revision
	async fn remove(&self, dir: &Path, name: &str, message: &str) -> RepositoryResult<Revision>;

	async fn record_notification(&self, dir: &Path, name: &str, line: &str) -> RepositoryResult<()>;

	/// Ignore patterns from the administrative files
	async fn ignore_patterns(&self) -> Vec<String>;

	/// Wrapper lines from the administrative files
	async fn wrappers(&self) -> Vec<String>;
}

// ============================================================================
// FILE STORE
// ============================================================================

pub struct FileStore {
	root: PathBuf,
}

impl FileStore {
	pub fn new<P: Into<PathBuf>>(root: P) -> Self {
		FileStore { root: root.into() }
	}

	/// Resolve `dir` and make sure it stays under the root
	fn resolve(&self, dir: &Path) -> RepositoryResult<PathBuf> {
		let rel = dir
			.strip_prefix(&self.root)
			.map_err(|_| RepositoryError::OutsideRoot { path: dir.display().to_string() })?;
		for component in rel.components() {
			match component {
				Component::Normal(_) | Component::CurDir => {}
				_ => return Err(RepositoryError::OutsideRoot { path: dir.display().to_string() }),
			}
		}
		Ok(self.root.join(rel))
	}

	fn file_dir(&self, dir: &Path, name: &str) -> RepositoryResult<PathBuf> {
		if name.is_empty() || name.contains('/') || name == "." || name == ".." {
			return Err(RepositoryError::NotFound { what: format!("file `{}'", name) });
		}
		Ok(self.resolve(dir)?.join(format!("{}{}", name, RCS_SUFFIX)))
	}

	async fn revision_numbers(path: &Path) -> RepositoryResult<Vec<u32>> {
		let mut numbers = Vec::new();
		let mut rd = afs::read_dir(path).await?;
		while let Some(entry) = rd.next_entry().await? {
			let name = entry.file_name().to_string_lossy().into_owned();
			if let Some(minor) = name.strip_prefix("1.").and_then(|m| m.parse::<u32>().ok()) {
				numbers.push(minor);
			}
		}
		numbers.sort_unstable();
		Ok(numbers)
	}

	async fn write_revision(
		&self,
		path: &Path,
		current: Option<&str>,
		data: &[u8],
		mode_text: &str,
	) -> RepositoryResult<String> {
		let number = next_number(current);
		let target = path.join(&number);
		let tmp = path.join(format!(".#{}", number));
		let mut file = match afs::OpenOptions::new().write(true).create_new(true).open(&tmp).await {
			Ok(file) => file,
			Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
				return Err(RepositoryError::Conflict { what: target.display().to_string() })
			}
			Err(e) => return Err(e.into()),
		};
		file.write_all(data).await?;
		file.flush().await?;
		drop(file);
		if afs::metadata(&target).await.is_ok() {
			if let Err(e) = afs::remove_file(&tmp).await {
				warn!("[repository] cannot remove {}: {}", tmp.display(), e);
			}
			return Err(RepositoryError::Conflict { what: target.display().to_string() });
		}
		afs::rename(&tmp, &target).await?;
		if let Ok(bits) = mode::parse_mode(mode_text) {
			use std::os::unix::fs::PermissionsExt;
			afs::set_permissions(&target, std::fs::Permissions::from_mode(bits)).await?;
		}
		Ok(number)
	}

	async fn append_line(path: &Path, line: &str) -> RepositoryResult<()> {
		let mut file = afs::OpenOptions::new().create(true).append(true).open(path).await?;
		file.write_all(format!("{}\n", line).as_bytes()).await?;
		file.flush().await?;
		Ok(())
	}

	async fn admin_lines(&self, file: &str) -> Vec<String> {
		match afs::read_to_string(self.root.join(CVSROOT).join(file)).await {
			Ok(text) => text
				.lines()
				.map(str::trim)
				.filter(|l| !l.is_empty() && !l.starts_with('#'))
				.map(str::to_string)
				.collect(),
			Err(_) => Vec::new(),
		}
	}

	async fn list(&self, dir: &Path, tracked: bool) -> RepositoryResult<Vec<String>> {
		let path = self.resolve(dir)?;
		let mut names = Vec::new();
		let mut rd = afs::read_dir(&path).await?;
		while let Some(entry) = rd.next_entry().await? {
			if !entry.file_type().await?.is_dir() {
				continue;
			}
			let name = entry.file_name().to_string_lossy().into_owned();
			match name.strip_suffix(RCS_SUFFIX) {
				Some(file) if tracked => names.push(file.to_string()),
				None if !tracked => {
					if name != ATTIC && !(path == self.root && name == CVSROOT) {
						names.push(name);
					}
				}
				_ => {}
			}
		}
		names.sort();
		Ok(names)
	}
}

#[async_trait]
impl Repository for FileStore {
	fn root(&self) -> &Path {
		&self.root
	}

	async fn exists(&self) -> bool {
		afs::metadata(self.root.join(CVSROOT)).await.map(|m| m.is_dir()).unwrap_or(false)
	}

	async fn init(&self) -> RepositoryResult<()> {
		let admin = self.root.join(CVSROOT);
		afs::create_dir_all(&admin).await?;
		for file in &["cvsignore", "cvswrappers"] {
			let path = admin.join(file);
			if afs::metadata(&path).await.is_err() {
				afs::write(&path, b"").await?;
			}
		}
		debug!("[repository] initialized {}", self.root.display());
		Ok(())
	}

	async fn is_directory(&self, dir: &Path) -> bool {
		match self.resolve(dir) {
			Ok(path) => afs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false),
			Err(_) => false,
		}
	}

	async fn create_directory(&self, dir: &Path) -> RepositoryResult<()> {
		afs::create_dir_all(self.resolve(dir)?).await?;
		Ok(())
	}

	async fn files(&self, dir: &Path) -> RepositoryResult<Vec<String>> {
		self.list(dir, true).await
	}

	async fn subdirectories(&self, dir: &Path) -> RepositoryResult<Vec<String>> {
		self.list(dir, false).await
	}

	async fn head(&self, dir: &Path, name: &str) -> RepositoryResult<Option<Revision>> {
		let path = self.file_dir(dir, name)?;
		if afs::metadata(&path).await.is_err() {
			return Ok(None);
		}
		let minor = match Self::revision_numbers(&path).await?.last() {
			Some(minor) => *minor,
			None => return Ok(None),
		};
		let number = format!("1.{}", minor);
		let dead = afs::read_to_string(path.join(DEAD)).await.map(|d| d.trim() == number).unwrap_or(false);
		let revision_path = path.join(&number);
		let modified = afs::metadata(&revision_path).await?.modified()?;
		let mode = mode::mode_of(&revision_path).map_err(|e| match e {
			crate::error::SyncError::Io(e) => RepositoryError::Io(e),
			other => RepositoryError::NotFound { what: other.to_string() },
		})?;
		Ok(Some(Revision { number, dead, mode, modified }))
	}

	async fn contents(&self, dir: &Path, name: &str, revision: &str) -> RepositoryResult<Vec<u8>> {
		let path = self.file_dir(dir, name)?.join(revision);
		match afs::read(&path).await {
			Ok(data) => Ok(data),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				Err(RepositoryError::NotFound { what: format!("revision {} of {}", revision, name) })
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn commit(
		&self,
		dir: &Path,
		name: &str,
		data: &[u8],
		mode: &str,
		message: &str,
	) -> RepositoryResult<Revision> {
		let path = self.file_dir(dir, name)?;
		afs::create_dir_all(&path).await?;
		let current = self.head(dir, name).await?;
		let number = self.write_revision(&path, current.as_ref().map(|r| r.number.as_str()), data, mode).await?;
		let stamp = util::rfc822_timestamp(SystemTime::now());
		Self::append_line(&path.join(LOG), &format!("{}\t{}\t{}", number, stamp, message.replace('\n', " ")))
			.await?;
		debug!("[repository] {}/{} -> {}", dir.display(), name, number);
		self.head(dir, name)
			.await?
			.ok_or_else(|| RepositoryError::NotFound { what: format!("file `{}'", name) })
	}

	async fn remove(&self, dir: &Path, name: &str, message: &str) -> RepositoryResult<Revision> {
		let path = self.file_dir(dir, name)?;
		let current = match self.head(dir, name).await? {
			Some(rev) if !rev.dead => rev,
			_ => return Err(RepositoryError::NotFound { what: format!("file `{}'", name) }),
		};
		let number = self.write_revision(&path, Some(&current.number), b"", &current.mode).await?;
		afs::write(path.join(DEAD), format!("{}\n", number)).await?;
		let stamp = util::rfc822_timestamp(SystemTime::now());
		Self::append_line(&path.join(LOG), &format!("{}\t{}\tremoved: {}", number, stamp, message.replace('\n', " ")))
			.await?;
		self.head(dir, name)
			.await?
			.ok_or_else(|| RepositoryError::NotFound { what: format!("file `{}'", name) })
	}

	async fn record_notification(&self, dir: &Path, name: &str, line: &str) -> RepositoryResult<()> {
		let path = self.file_dir(dir, name)?;
		afs::create_dir_all(&path).await?;
		Self::append_line(&path.join(NOTIFY), line).await
	}

	async fn ignore_patterns(&self) -> Vec<String> {
		self.admin_lines("cvsignore")
			.await
			.into_iter()
			.flat_map(|l| l.split_whitespace().map(str::to_string).collect::<Vec<_>>())
			.collect()
	}

	async fn wrappers(&self) -> Vec<String> {
		self.admin_lines("cvswrappers").await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	async fn store() -> (TempDir, FileStore) {
		let tmp = TempDir::new().unwrap();
		let store = FileStore::new(tmp.path().join("repo"));
		store.init().await.unwrap();
		(tmp, store)
	}

	// ─── Revision Tests ───

	#[tokio::test]
	async fn test_commit_numbers_revisions() {
		let (_tmp, store) = store().await;
		let dir = store.root().join("mod");
		store.create_directory(&dir).await.unwrap();
		assert!(store.head(&dir, "foo.c").await.unwrap().is_none());

		let r1 = store.commit(&dir, "foo.c", b"one\n", "u=rw,g=r,o=r", "first").await.unwrap();
		assert_eq!(r1.number, "1.1");
		assert_eq!(r1.mode, "u=rw,g=r,o=r");
		let r2 = store.commit(&dir, "foo.c", b"two\n", "u=rw,g=r,o=r", "second").await.unwrap();
		assert_eq!(r2.number, "1.2");
		assert_eq!(store.contents(&dir, "foo.c", "1.1").await.unwrap(), b"one\n");
		assert_eq!(store.contents(&dir, "foo.c", "1.2").await.unwrap(), b"two\n");
		assert_eq!(store.files(&dir).await.unwrap(), vec!["foo.c".to_string()]);
	}

	#[tokio::test]
	async fn test_remove_marks_head_dead() {
		let (_tmp, store) = store().await;
		let dir = store.root().to_path_buf();
		store.commit(&dir, "a", b"x", "u=rw,g=r,o=r", "add").await.unwrap();
		let removed = store.remove(&dir, "a", "gone").await.unwrap();
		assert!(removed.dead);
		assert_eq!(removed.number, "1.2");
		assert!(store.remove(&dir, "a", "again").await.is_err());
		let back = store.commit(&dir, "a", b"y", "u=rw,g=r,o=r", "resurrect").await.unwrap();
		assert!(!back.dead);
		assert_eq!(back.number, "1.3");
	}

	#[tokio::test]
	async fn test_paths_outside_root_rejected() {
		let (tmp, store) = store().await;
		assert!(matches!(
			store.files(&tmp.path().join("elsewhere")).await,
			Err(RepositoryError::OutsideRoot { .. })
		));
		assert!(store.files(&store.root().join("../repo")).await.is_err());
		assert!(store.head(store.root(), "../x").await.is_err());
	}

	#[tokio::test]
	async fn test_listing_skips_admin_dirs() {
		let (_tmp, store) = store().await;
		let root = store.root().to_path_buf();
		store.create_directory(&root.join("sub")).await.unwrap();
		store.create_directory(&root.join("Attic")).await.unwrap();
		store.commit(&root, "f", b"", "u=rw,g=r,o=r", "").await.unwrap();
		assert_eq!(store.subdirectories(&root).await.unwrap(), vec!["sub".to_string()]);
		assert_eq!(store.files(&root).await.unwrap(), vec!["f".to_string()]);
	}

	#[tokio::test]
	async fn test_admin_files() {
		let (_tmp, store) = store().await;
		assert!(store.exists().await);
		afs::write(store.root().join("CVSROOT/cvsignore"), "*.o *.a\n# comment\ncore\n").await.unwrap();
		afs::write(store.root().join("CVSROOT/cvswrappers"), "*.gif -k 'b'\n").await.unwrap();
		assert_eq!(store.ignore_patterns().await, vec!["*.o", "*.a", "core"]);
		assert_eq!(store.wrappers().await, vec!["*.gif -k 'b'"]);
	}
}

// vim: ts=4
