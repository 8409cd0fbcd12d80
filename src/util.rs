//! Shared helpers: timestamps and path checks

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::path::{Component, Path};
use std::time::SystemTime;

/// Timestamp as stored in the Entries file (`Sun Sep 16 01:03:52 1973`, UTC)
pub fn entries_timestamp(time: SystemTime) -> String {
	let time: DateTime<Utc> = time.into();
	time.format("%a %b %e %H:%M:%S %Y").to_string()
}

/// Timestamp as carried by `Mod-time` and `Checkin-time` (`16 Sep 1973 01:03:52 -0000`)
pub fn rfc822_timestamp(time: SystemTime) -> String {
	let time: DateTime<Utc> = time.into();
	time.format("%-d %b %Y %H:%M:%S -0000").to_string()
}

/// Parse a `Mod-time`/`Checkin-time` date
///
/// Accepts RFC 2822 with or without weekday, and the bare
/// `day month year hh:mm:ss` form, taken as UTC.
pub fn parse_date(text: &str) -> Option<SystemTime> {
	let text = text.trim();
	if let Ok(t) = DateTime::parse_from_rfc2822(text) {
		return Some(t.with_timezone(&Utc).into());
	}
	let fields: Vec<&str> = text.split_whitespace().collect();
	if fields.len() < 4 {
		return None;
	}
	let bare = fields[..4].join(" ");
	let naive = NaiveDateTime::parse_from_str(&bare, "%d %b %Y %H:%M:%S").ok()?;
	Some(Utc.from_utc_datetime(&naive).into())
}

/// Number of levels `path` climbs above its starting point, at worst
pub fn pathname_levels(path: &str) -> usize {
	let mut depth: isize = 0;
	let mut worst: isize = 0;
	for part in path.split('/') {
		match part {
			"" | "." => {}
			".." => {
				depth -= 1;
				worst = worst.min(depth);
			}
			_ => depth += 1,
		}
	}
	(-worst) as usize
}

/// Relative path that stays inside the working copy
pub fn is_valid_client_path(path: &str) -> bool {
	!path.starts_with('/') && pathname_levels(path) == 0
}

/// Directory path a server may mirror: relative, no `..` past `max_dotdot`
pub fn is_valid_directory(path: &Path, max_dotdot: usize) -> bool {
	let mut depth: isize = 0;
	for component in path.components() {
		match component {
			Component::RootDir | Component::Prefix(_) => return false,
			Component::ParentDir => {
				depth -= 1;
				if -depth > max_dotdot as isize {
					return false;
				}
			}
			Component::CurDir => {}
			Component::Normal(_) => depth += 1,
		}
	}
	true
}

/// `dir/` with a trailing slash, `./` for the top directory
pub fn update_dir_prefix(dir: &str) -> String {
	let dir = dir.trim_end_matches('/');
	if dir.is_empty() || dir == "." {
		"./".to_string()
	} else {
		format!("{}/", dir)
	}
}

/// Name of this host, `localhost` if it cannot be determined
pub fn host_name() -> String {
	let name = rustix::system::uname().nodename().to_string_lossy().into_owned();
	if name.is_empty() {
		"localhost".to_string()
	} else {
		name
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::{Duration, UNIX_EPOCH};

	#[test]
	fn test_entries_timestamp_format() {
		let t = UNIX_EPOCH + Duration::from_secs(117_003_832);
		assert_eq!(entries_timestamp(t), "Sun Sep 16 05:03:52 1973");
		let t = UNIX_EPOCH + Duration::from_secs(86400 * 3);
		assert_eq!(entries_timestamp(t), "Sun Jan  4 00:00:00 1970");
	}

	#[test]
	fn test_rfc822_round_trip() {
		let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
		let text = rfc822_timestamp(t);
		assert_eq!(text, "14 Nov 2023 22:13:20 -0000");
		assert_eq!(parse_date(&text), Some(t));
		assert_eq!(parse_date("Tue, 14 Nov 2023 22:13:20 +0000"), Some(t));
		assert_eq!(parse_date("1 Jan 1970 00:00:10 GMT"), Some(UNIX_EPOCH + Duration::from_secs(10)));
		assert_eq!(parse_date("yesterday"), None);
	}

	#[test]
	fn test_client_paths() {
		assert!(is_valid_client_path("./foo.c"));
		assert!(is_valid_client_path("a/../b/foo.c"));
		assert!(!is_valid_client_path("/etc/passwd"));
		assert!(!is_valid_client_path("../foo.c"));
		assert!(!is_valid_client_path("a/../../foo.c"));
	}

	#[test]
	fn test_directory_dotdot_limit() {
		assert!(is_valid_directory(Path::new("sub/dir"), 0));
		assert!(!is_valid_directory(Path::new("../sub"), 0));
		assert!(is_valid_directory(Path::new("../sub"), 1));
		assert!(!is_valid_directory(Path::new("/abs"), 5));
	}
}

// vim: ts=4
