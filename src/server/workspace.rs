//! Per-connection temporary workspace
//!
//! The server mirrors the client's working directories under
//! `<tmp>/cvs-serv<pid>`, so files sent with `Modified` and the `Entries`
//! built from `Entry` requests sit where commands expect them. A client
//! announcing `Max-dotdot N` gets N extra `d` levels, so paths climbing
//! with `..` stay inside the workspace.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::logging::*;
use crate::sync::admin;

const SUFFIXES: &str = "abcdefghijklmnopqrstuvwxyz";

#[derive(Debug)]
pub struct Workspace {
	root: PathBuf,
	base: PathBuf,
}

impl Workspace {
	/// Create `<tmp_dir>/cvs-serv<pid>`, trying suffixes `a`-`z` if taken
	pub fn create(tmp_dir: &Path) -> io::Result<Self> {
		if !tmp_dir.is_absolute() {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("Value of {} for TMPDIR is not absolute", tmp_dir.display()),
			));
		}
		let stem = format!("cvs-serv{}", std::process::id());
		let mut candidates = std::iter::once(stem.clone()).chain(SUFFIXES.chars().map(|c| format!("{}{}", stem, c)));
		let root = loop {
			let name = match candidates.next() {
				Some(name) => name,
				None => {
					return Err(io::Error::new(
						io::ErrorKind::AlreadyExists,
						format!("can't create temporary directory {}", tmp_dir.join(&stem).display()),
					))
				}
			};
			let path = tmp_dir.join(name);
			match fs::create_dir_all(tmp_dir).and_then(|_| fs::create_dir(&path)) {
				Ok(()) => break path,
				Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
				Err(e) => return Err(e),
			}
		};
		fs::set_permissions(&root, fs::Permissions::from_mode(0o700))?;
		debug!("[server] workspace {}", root.display());
		Ok(Workspace { base: root.clone(), root })
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Directory the client's top level maps to
	pub fn base(&self) -> &Path {
		&self.base
	}

	/// Push the top level down by `levels` directories
	pub fn set_max_dotdot(&mut self, levels: usize) -> io::Result<()> {
		let mut base = self.root.clone();
		for _ in 0..levels {
			base.push("d");
		}
		fs::create_dir_all(&base)?;
		self.base = base;
		Ok(())
	}

	/// Workspace path of the client directory `update_dir`
	pub fn dir(&self, update_dir: &str) -> PathBuf {
		if update_dir.is_empty() || update_dir == "." {
			self.base.clone()
		} else {
			self.base.join(update_dir)
		}
	}

	/// Create the mirror of `update_dir` with its administrative files
	///
	/// Every level gets a `CVS` directory; only the last one gets the real
	/// repository.
	pub fn mirror(&self, update_dir: &str, repository: &str) -> io::Result<PathBuf> {
		let dir = self.dir(update_dir);
		fs::create_dir_all(&dir)?;
		let mut level = self.base.clone();
		for part in Path::new(update_dir).components() {
			if let std::path::Component::Normal(name) = part {
				level.push(name);
				if !admin::has_admin(&level) {
					admin::create_admin(&level, repository, None)?;
				}
			}
		}
		fs::create_dir_all(admin::admin_dir(&dir))?;
		admin::write_repository(&dir, repository)?;
		let entries = admin::admin_path(&dir, admin::ENTRIES);
		if !entries.exists() {
			fs::write(entries, b"")?;
		}
		Ok(dir)
	}

	/// Empty the workspace between commands, keeping the `Max-dotdot` levels
	pub fn reset(&self) -> io::Result<()> {
		for entry in fs::read_dir(&self.root)? {
			let path = entry?.path();
			if path.is_dir() {
				fs::remove_dir_all(&path)?;
			} else {
				fs::remove_file(&path)?;
			}
		}
		fs::create_dir_all(&self.base)
	}

	/// Delete the workspace and everything in it
	pub fn remove(&self) -> io::Result<()> {
		match fs::remove_dir_all(&self.root) {
			Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
			_ => Ok(()),
		}
	}
}


// vim: ts=4
