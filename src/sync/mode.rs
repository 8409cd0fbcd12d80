//! Symbolic file modes as they travel on the wire (`u=rw,g=r,o=r`)

use rustix::fs::Mode;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{SyncError, SyncResult};

/// Permission bits of a symbolic mode string
pub fn parse_mode(text: &str) -> SyncResult<u32> {
	let mut mode = 0;
	for clause in text.split(',').filter(|c| !c.is_empty()) {
		let (who, perms) = clause
			.split_once('=')
			.ok_or_else(|| SyncError::Other { message: format!("bad mode `{}'", text) })?;
		let mut bits = 0;
		for p in perms.chars() {
			bits |= match p {
				'r' => 4,
				'w' => 2,
				'x' => 1,
				_ => return Err(SyncError::Other { message: format!("bad mode `{}'", text) }),
			};
		}
		for w in who.chars() {
			mode |= match w {
				'u' => bits << 6,
				'g' => bits << 3,
				'o' => bits,
				'a' => bits << 6 | bits << 3 | bits,
				_ => return Err(SyncError::Other { message: format!("bad mode `{}'", text) }),
			};
		}
	}
	Ok(mode)
}

/// Symbolic form of the permission bits of `mode`
pub fn format_mode(mode: u32) -> String {
	let class = |bits: u32| {
		let mut s = String::new();
		if bits & 4 != 0 {
			s.push('r');
		}
		if bits & 2 != 0 {
			s.push('w');
		}
		if bits & 1 != 0 {
			s.push('x');
		}
		s
	};
	format!("u={},g={},o={}", class(mode >> 6 & 7), class(mode >> 3 & 7), class(mode & 7))
}

/// Apply a symbolic mode to `path`, honoring the process umask
pub fn change_mode(path: &Path, text: &str) -> SyncResult<()> {
	use std::os::unix::fs::PermissionsExt;

	let mode = parse_mode(text)? & !current_umask();
	std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
	Ok(())
}

/// Symbolic mode of an existing file
pub fn mode_of(path: &Path) -> SyncResult<String> {
	use std::os::unix::fs::PermissionsExt;

	Ok(format_mode(std::fs::metadata(path)?.permissions().mode()))
}

static UMASK: OnceLock<u32> = OnceLock::new();

/// Read the process umask once
///
/// The umask can only be read by setting it, which briefly changes it for
/// every thread. Call this before any other thread starts; later calls
/// return the recorded value.
pub fn init_umask() -> u32 {
	*UMASK.get_or_init(|| {
		let old = rustix::process::umask(Mode::from_raw_mode(0o022));
		rustix::process::umask(old);
		old.as_raw_mode() as u32
	})
}

fn current_umask() -> u32 {
	init_umask()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_mode() {
		assert_eq!(parse_mode("u=rw,g=r,o=r").unwrap(), 0o644);
		assert_eq!(parse_mode("u=rwx,g=rx,o=").unwrap(), 0o750);
		assert_eq!(parse_mode("a=r").unwrap(), 0o444);
		assert!(parse_mode("u=rq").is_err());
		assert!(parse_mode("rw").is_err());
	}

	#[test]
	fn test_format_mode() {
		assert_eq!(format_mode(0o100644), "u=rw,g=r,o=r");
		assert_eq!(format_mode(0o700), "u=rwx,g=,o=");
	}

	#[test]
	fn test_umask_read_once() {
		let first = init_umask();
		assert_eq!(init_umask(), first);
		assert_eq!(first & !0o777, 0);
	}

	#[test]
	fn test_change_mode() {
		let dir = tempfile::TempDir::new().unwrap();
		let path = dir.path().join("f");
		std::fs::write(&path, "x").unwrap();
		change_mode(&path, "u=r,g=,o=").unwrap();
		assert_eq!(mode_of(&path).unwrap(), "u=r,g=,o=");
		change_mode(&path, "u=rw,g=rw,o=rw").unwrap();
		assert_eq!(parse_mode(&mode_of(&path).unwrap()).unwrap(), 0o666 & !init_umask());
	}
}

// vim: ts=4
