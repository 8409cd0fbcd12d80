//! Working-copy synchronization
//!
//! Everything the client does to the local tree in response to the server:
//! Entries bookkeeping, administrative files, directory creation, deltas,
//! checksums and the [`Synchronizer`] tying them together.

pub mod admin;
pub mod checksum;
pub mod directory;
pub mod entries;
pub mod mode;
pub mod patch;
pub mod updater;

pub use checksum::Checksum;
pub use directory::Location;
pub use entries::{EntriesFile, Entry, TimestampState};
pub use updater::{Contents, Existence, Outcome, Payload, Synchronizer};

/// Text the synchronizer wants shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
	/// Standard output (status letters such as `C foo.c`)
	Out(String),
	/// Standard error (warnings)
	Err(String),
}

// vim: ts=4
