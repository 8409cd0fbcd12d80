//! Password authentication preamble
//!
//! Sent once, before the main protocol, when a client connects over TCP:
//!
//! ```text
//! BEGIN AUTH REQUEST
//! /path/to/repository
//! user
//! A<scrambled password>
//! END AUTH REQUEST
//! ```
//!
//! The server answers `I LOVE YOU` and continues with the main protocol,
//! or `I HATE YOU` and closes the connection. `VERIFICATION` in place of
//! `AUTH` only checks the credentials and ends the connection either way.

use super::codec::{LineReader, LineWriter};
use super::error::{ProtocolError, ProtocolResult};

pub const ACCEPTED: &str = "I LOVE YOU";
pub const REJECTED: &str = "I HATE YOU";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
	/// Authenticate, then run the protocol
	Auth,
	/// Authenticate only
	Verify,
}

impl AuthKind {
	fn word(self) -> &'static str {
		match self {
			AuthKind::Auth => "AUTH",
			AuthKind::Verify => "VERIFICATION",
		}
	}

	pub fn begin_line(self) -> String {
		format!("BEGIN {} REQUEST", self.word())
	}

	pub fn end_line(self) -> String {
		format!("END {} REQUEST", self.word())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
	pub kind: AuthKind,
	pub repository: String,
	pub user: String,
	/// Clear-text password
	pub password: String,
}

/// Read the preamble; every line is bounded by `max_line`
pub async fn read_request(reader: &mut LineReader, max_line: usize) -> ProtocolResult<AuthRequest> {
	let first = reader
		.read_line_bounded(max_line)
		.await?
		.ok_or_else(|| ProtocolError::UnexpectedEof("end of file before auth request".to_string()))?;
	let kind = if first == AuthKind::Auth.begin_line() {
		AuthKind::Auth
	} else if first == AuthKind::Verify.begin_line() {
		AuthKind::Verify
	} else {
		return Err(ProtocolError::Other(format!("bad auth protocol start: {}", first)));
	};

	let mut fields = Vec::with_capacity(4);
	for what in ["repository", "user name", "password", "end of auth request"] {
		let line = reader
			.read_line_bounded(max_line)
			.await?
			.ok_or_else(|| ProtocolError::UnexpectedEof(format!("end of file reading {}", what)))?;
		fields.push(line);
	}
	if fields[3] != kind.end_line() {
		return Err(ProtocolError::Other(format!("bad auth protocol end: {}", fields[3])));
	}
	let password = descramble(&fields[2])?;
	let mut fields = fields.into_iter();
	Ok(AuthRequest {
		kind,
		repository: fields.next().unwrap_or_default(),
		user: fields.next().unwrap_or_default(),
		password,
	})
}

/// Queue the preamble for `request`
pub fn write_request(writer: &mut LineWriter, request: &AuthRequest) -> ProtocolResult<()> {
	writer.line(&request.kind.begin_line())?;
	writer.line(&request.repository)?;
	writer.line(&request.user)?;
	writer.line(&scramble(&request.password))?;
	writer.line(&request.kind.end_line())
}

/// Read the server's verdict
pub async fn read_verdict(reader: &mut LineReader, max_line: usize) -> ProtocolResult<bool> {
	loop {
		let line = reader
			.read_line_bounded(max_line)
			.await?
			.ok_or_else(|| ProtocolError::UnexpectedEof("end of file from server".to_string()))?;
		match line.as_str() {
			ACCEPTED => return Ok(true),
			REJECTED => return Ok(false),
			// servers may explain a rejection first
			l if l.starts_with("E ") || l.starts_with("error ") => continue,
			other => {
				return Err(ProtocolError::ProtocolViolation(format!(
					"unrecognized auth response from server: {}",
					other
				)))
			}
		}
	}
}

// ============================================================================
// PASSWORD SCRAMBLING
// ============================================================================

#[rustfmt::skip]
static SHIFTS: [u8; 256] = [
	  0,   1,   2,   3,   4,   5,   6,   7,   8,   9,  10,  11,  12,  13,  14,  15,
	 16,  17,  18,  19,  20,  21,  22,  23,  24,  25,  26,  27,  28,  29,  30,  31,
	114, 120,  53,  79,  96, 109,  72, 108,  70,  64,  76,  67, 116,  74,  68,  87,
	111,  52,  75, 119,  49,  34,  82,  81,  95,  65, 112,  86, 118, 110, 122, 105,
	 41,  57,  83,  43,  46, 102,  40,  89,  38, 103,  45,  50,  42, 123,  91,  35,
	125,  55,  54,  66, 124, 126,  59,  47,  92,  71, 115,  78,  88, 107, 106,  56,
	 36, 121, 117, 104, 101, 100,  69,  73,  99,  63,  94,  93,  39,  37,  61,  48,
	 58, 113,  32,  90,  44,  98,  60,  51,  33,  97,  62,  77,  84,  80,  85, 223,
	225, 216, 187, 166, 229, 189, 222, 188, 141, 249, 148, 200, 184, 136, 248, 190,
	199, 170, 181, 204, 138, 232, 218, 183, 255, 234, 220, 247, 213, 203, 226, 193,
	174, 172, 228, 252, 217, 201, 131, 230, 197, 211, 145, 238, 161, 179, 160, 212,
	207, 221, 254, 173, 202, 146, 224, 151, 140, 196, 205, 130, 135, 133, 143, 246,
	192, 159, 244, 239, 185, 168, 215, 144, 139, 165, 180, 157, 147, 186, 214, 176,
	227, 231, 219, 169, 175, 156, 206, 198, 129, 164, 150, 210, 154, 177, 134, 127,
	182, 128, 158, 208, 162, 132, 167, 209, 149, 241, 153, 251, 237, 236, 171, 195,
	243, 233, 253, 240, 194, 250, 191, 155, 142, 137, 245, 235, 163, 242, 178, 152,
];

/// Scramble a password for the wire; the result starts with `A`
pub fn scramble(password: &str) -> String {
	let mut out = Vec::with_capacity(password.len() + 1);
	out.push(b'A');
	out.extend(password.bytes().map(|b| SHIFTS[b as usize]));
	String::from_utf8_lossy(&out).into_owned()
}

/// Undo [`scramble`]
pub fn descramble(scrambled: &str) -> ProtocolResult<String> {
	let bytes = scrambled.as_bytes();
	match bytes.first() {
		Some(b'A') => {
			let plain: Vec<u8> = bytes[1..].iter().map(|&b| SHIFTS[b as usize]).collect();
			Ok(String::from_utf8_lossy(&plain).into_owned())
		}
		_ => Err(ProtocolError::Other(format!(
			"descramble: unknown scrambling method `{}'",
			scrambled.chars().next().unwrap_or(' ')
		))),
	}
}

/// Check `user`/`password` against `user:password[:alias]` lines
///
/// A stored password starting with `A` is compared scrambled; an empty
/// stored password accepts anything.
pub fn check_password(passwd: &str, user: &str, password: &str) -> bool {
	for line in passwd.lines() {
		let mut parts = line.splitn(3, ':');
		let (Some(name), Some(stored)) = (parts.next(), parts.next()) else {
			continue;
		};
		if name != user {
			continue;
		}
		if stored.is_empty() {
			return true;
		}
		return if stored.starts_with('A') { stored == scramble(password) } else { stored == password };
	}
	false
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::buffer::MemoryBuffer;

	fn reader(data: &str) -> LineReader {
		LineReader::new(Box::new(MemoryBuffer::input(data.as_bytes().to_vec())))
	}

	#[test]
	fn test_scramble_is_involution() {
		for b in 32u8..127 {
			assert_eq!(SHIFTS[SHIFTS[b as usize] as usize], b);
		}
		assert_eq!(scramble("A"), "A9");
		assert_eq!(descramble(&scramble("s3cret!")).unwrap(), "s3cret!");
		assert!(descramble("Zabc").is_err());
	}

	#[tokio::test]
	async fn test_reads_auth_request() {
		let text = format!("BEGIN AUTH REQUEST\n/cvsroot\nanon\n{}\nEND AUTH REQUEST\n", scramble("pw"));
		let request = read_request(&mut reader(&text), 4096).await.unwrap();
		assert_eq!(request.kind, AuthKind::Auth);
		assert_eq!(request.repository, "/cvsroot");
		assert_eq!(request.user, "anon");
		assert_eq!(request.password, "pw");
	}

	#[tokio::test]
	async fn test_bad_start_line() {
		let err = read_request(&mut reader("HELLO\n"), 4096).await.unwrap_err();
		assert_eq!(err.to_string(), "bad auth protocol start: HELLO");
	}

	#[tokio::test]
	async fn test_mismatched_end_line() {
		let text = "BEGIN VERIFICATION REQUEST\n/r\nu\nA\nEND AUTH REQUEST\n";
		let err = read_request(&mut reader(text), 4096).await.unwrap_err();
		assert_eq!(err.to_string(), "bad auth protocol end: END AUTH REQUEST");
	}

	#[tokio::test]
	async fn test_oversized_preamble_line() {
		let text = format!("BEGIN AUTH REQUEST\n{}\n", "x".repeat(100));
		assert!(matches!(read_request(&mut reader(&text), 64).await, Err(ProtocolError::LineTooLong(64))));
	}

	#[tokio::test]
	async fn test_verdict() {
		assert!(read_verdict(&mut reader("I LOVE YOU\n"), 64).await.unwrap());
		assert!(!read_verdict(&mut reader("E no such user\nI HATE YOU\n"), 64).await.unwrap());
	}

	#[test]
	fn test_password_file() {
		let passwd = format!("anon:\nbob:{}\ncarol:plain:cvs\n", scramble("hunter2"));
		assert!(check_password(&passwd, "anon", "whatever"));
		assert!(check_password(&passwd, "bob", "hunter2"));
		assert!(!check_password(&passwd, "bob", "hunter3"));
		assert!(check_password(&passwd, "carol", "plain"));
		assert!(!check_password(&passwd, "dave", ""));
	}
}

// vim: ts=4
