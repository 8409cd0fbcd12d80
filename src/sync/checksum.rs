//! MD5 content checksums carried by the `Checksum` response

use md5::{Digest, Md5};
use std::fmt;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksum([u8; 16]);

impl Checksum {
	pub fn of(data: &[u8]) -> Self {
		let mut hasher = Md5::new();
		hasher.update(data);
		Checksum(hasher.finalize().into())
	}

	/// Parse the 32 hex digits of a `Checksum` line
	pub fn parse(text: &str) -> SyncResult<Self> {
		let invalid = || SyncError::Other { message: format!("Invalid Checksum response: `{}'", text) };
		if text.len() != 32 {
			return Err(invalid());
		}
		let bytes = hex::decode(text).map_err(|_| invalid())?;
		let mut sum = [0u8; 16];
		sum.copy_from_slice(&bytes);
		Ok(Checksum(sum))
	}

	pub fn matches(&self, data: &[u8]) -> bool {
		Checksum::of(data) == *self
	}
}

impl fmt::Display for Checksum {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", hex::encode(self.0))
	}
}


// vim: ts=4
