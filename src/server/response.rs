//! Response blocks sent by commands
//!
//! File responses share one layout:
//!
//! ```text
//! <Response> <update_dir>/
//! <repository>/<name>
//! <entry line>
//! <mode>
//! <size>            or z<compressed size>
//! <contents>
//! ```

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

/// Contents at or below this size are never compressed
const GZIP_THRESHOLD: usize = 100;

/// `<Response> <update_dir>/` and `<repository>/<name>`, the prefix of most responses
pub fn path_lines(response: &str, update_dir: &str, repository: &str, name: &str) -> String {
	format!("{} {}/\n{}/{}\n", response, dir_or_dot(update_dir), repository, name)
}

/// Directory-level responses: `<Response> <update_dir>/` and `<repository>/`
pub fn directory_lines(response: &str, update_dir: &str, repository: &str) -> String {
	format!("{} {}/\n{}/\n", response, dir_or_dot(update_dir), repository)
}

fn dir_or_dot(update_dir: &str) -> &str {
	if update_dir.is_empty() {
		"."
	} else {
		update_dir
	}
}

/// Path of a file as the user sees it
pub fn display_path(update_dir: &str, name: &str) -> String {
	if update_dir.is_empty() || update_dir == "." {
		name.to_string()
	} else {
		format!("{}/{}", update_dir, name)
	}
}

/// A file transfer response under construction
pub struct FileResponse<'a> {
	pub response: &'a str,
	pub update_dir: &'a str,
	pub repository: &'a str,
	pub name: &'a str,
	pub entry: String,
	pub mode: &'a str,
	pub data: &'a [u8],
}

impl<'a> FileResponse<'a> {
	/// Encode the response, compressing the contents at `gzip_level` if worthwhile
	pub fn encode(&self, gzip_level: u32, prefix: &[String]) -> Vec<u8> {
		let mut out = Vec::with_capacity(self.data.len() + 256);
		for line in prefix {
			out.extend_from_slice(line.as_bytes());
			out.push(b'\n');
		}
		out.extend_from_slice(path_lines(self.response, self.update_dir, self.repository, self.name).as_bytes());
		out.extend_from_slice(self.entry.as_bytes());
		out.push(b'\n');
		out.extend_from_slice(self.mode.as_bytes());
		out.push(b'\n');

		if gzip_level > 0 && self.data.len() > GZIP_THRESHOLD {
			if let Some(packed) = gzip(self.data, gzip_level) {
				out.extend_from_slice(format!("z{}\n", packed.len()).as_bytes());
				out.extend_from_slice(&packed);
				return out;
			}
		}
		out.extend_from_slice(format!("{}\n", self.data.len()).as_bytes());
		out.extend_from_slice(self.data);
		out
	}
}

fn gzip(data: &[u8], level: u32) -> Option<Vec<u8>> {
	let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.min(9)));
	encoder.write_all(data).ok()?;
	encoder.finish().ok()
}

#[cfg(test)]
mod tests {
	use super::*;
	use flate2::read::GzDecoder;
	use std::io::Read;

	fn response(data: &[u8]) -> FileResponse<'_> {
		FileResponse {
			response: "Updated",
			update_dir: ".",
			repository: "/repo/mod",
			name: "foo.c",
			entry: "/foo.c/1.2///".to_string(),
			mode: "u=rw,g=r,o=r",
			data,
		}
	}

	#[test]
	fn test_plain_layout() {
		let out = response(b"hello\n").encode(0, &[]);
		assert_eq!(out, b"Updated ./\n/repo/mod/foo.c\n/foo.c/1.2///\nu=rw,g=r,o=r\n6\nhello\n".to_vec());
	}

	#[test]
	fn test_prefix_lines_come_first() {
		let out = response(b"x").encode(0, &["Checksum 9dd4e461268c8034f5c8564e155c67a6".to_string()]);
		assert!(out.starts_with(b"Checksum 9dd4e461268c8034f5c8564e155c67a6\nUpdated ./\n"));
	}

	#[test]
	fn test_large_contents_are_gzipped() {
		let data = vec![b'a'; 4000];
		let out = response(&data).encode(6, &[]);
		let text = String::from_utf8_lossy(&out);
		let size_line = text.lines().nth(4).unwrap();
		assert!(size_line.starts_with('z'));
		let size: usize = size_line[1..].parse().unwrap();
		let body = &out[out.len() - size..];
		let mut plain = Vec::new();
		GzDecoder::new(body).read_to_end(&mut plain).unwrap();
		assert_eq!(plain, data);
	}

	#[test]
	fn test_small_contents_stay_plain() {
		let out = response(b"short").encode(9, &[]);
		assert!(String::from_utf8_lossy(&out).contains("\n5\nshort"));
	}

	#[test]
	fn test_paths() {
		assert_eq!(path_lines("Removed", "sub", "/repo/sub", "x"), "Removed sub/\n/repo/sub/x\n");
		assert_eq!(directory_lines("Clear-sticky", "", "/repo"), "Clear-sticky ./\n/repo/\n");
		assert_eq!(display_path(".", "a"), "a");
		assert_eq!(display_path("d/e", "a"), "d/e/a");
	}
}

// vim: ts=4
