//! Error types for working-copy, connection and client operations
//!
//! Buffer and protocol failures have their own types in
//! [`crate::buffer::error`] and [`crate::protocol::error`]; the types here
//! cover the layers built on top of them.

use std::error::Error;
use std::fmt;
use std::io;

use crate::buffer::BufferError;
use crate::protocol::ProtocolError;

/// Working-copy synchronization errors
#[derive(Debug)]
pub enum SyncError {
	/// I/O error on a working file or admin file
	Io(io::Error),

	/// Entries line that cannot be parsed
	BadEntry { line: String },

	/// Path that is absolute or escapes the working copy
	InvalidPath { path: String },

	/// Content does not match the declared checksum
	Checksum { path: String },

	/// A patch or change script could not be applied
	Patch { path: String, message: String },

	/// Refusal to create an administrative directory name
	ReservedName { name: String },

	/// Generic error message
	Other { message: String },
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::BadEntry { line } => write!(f, "bad entries line `{}' from server", line),
			SyncError::InvalidPath { path } => {
				write!(f, "Server attempted to update a file via an invalid pathname: `{}'.", path)
			}
			SyncError::Checksum { path } => write!(f, "checksum failure on {}", path),
			SyncError::Patch { path, message } => {
				write!(f, "could not patch {}: {}", path, message)
			}
			SyncError::ReservedName { name } => {
				write!(f, "cannot create a directory named {}", name)
			}
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			SyncError::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Revision store errors
#[derive(Debug)]
pub enum RepositoryError {
	Io(io::Error),

	/// File or revision that does not exist
	NotFound { what: String },

	/// Another writer created the same revision first
	Conflict { what: String },

	/// Directory outside the repository root
	OutsideRoot { path: String },
}

impl fmt::Display for RepositoryError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RepositoryError::Io(e) => write!(f, "{}", e),
			RepositoryError::NotFound { what } => write!(f, "cannot find {}", what),
			RepositoryError::Conflict { what } => write!(f, "{} was changed by another writer", what),
			RepositoryError::OutsideRoot { path } => {
				write!(f, "directory '{}' not within repository", path)
			}
		}
	}
}

impl Error for RepositoryError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			RepositoryError::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for RepositoryError {
	fn from(e: io::Error) -> Self {
		RepositoryError::Io(e)
	}
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

impl From<RepositoryError> for io::Error {
	fn from(e: RepositoryError) -> Self {
		match e {
			RepositoryError::Io(e) => e,
			RepositoryError::NotFound { .. } => io::Error::new(io::ErrorKind::NotFound, e.to_string()),
			other => io::Error::new(io::ErrorKind::Other, other.to_string()),
		}
	}
}

/// Connection setup errors
#[derive(Debug)]
pub enum ConnectionError {
	/// Root string that names no known access method
	BadRoot { root: String },

	/// Subprocess spawn failed
	SpawnFailed { cmd: String, source: io::Error },

	/// TCP connect failed
	ConnectFailed { host: String, source: io::Error },

	/// Password authentication refused
	AuthRejected { user: String, root: String },

	/// Stdio unavailable
	StdioUnavailable { what: String },

	/// The server kept redirecting to roots already tried
	RedirectLoop,

	/// Preamble exchange failed
	Protocol(ProtocolError),
}

impl fmt::Display for ConnectionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConnectionError::BadRoot { root } => write!(f, "bad CVSROOT: `{}'", root),
			ConnectionError::SpawnFailed { cmd, source } => {
				write!(f, "Failed to spawn '{}': {}", cmd, source)
			}
			ConnectionError::ConnectFailed { host, source } => {
				write!(f, "connect to {} failed: {}", host, source)
			}
			ConnectionError::AuthRejected { user, root } => {
				write!(f, "authorization failed: server {} rejected access for {}", root, user)
			}
			ConnectionError::StdioUnavailable { what } => {
				write!(f, "Stdio unavailable: {}", what)
			}
			ConnectionError::RedirectLoop => write!(f, "`Redirect' loop detected.  Server misconfiguration?"),
			ConnectionError::Protocol(e) => write!(f, "{}", e),
		}
	}
}

impl Error for ConnectionError {}

impl From<ProtocolError> for ConnectionError {
	fn from(e: ProtocolError) -> Self {
		ConnectionError::Protocol(e)
	}
}

/// Client session errors
#[derive(Debug)]
pub enum ClientError {
	Protocol(ProtocolError),
	Sync(SyncError),
	Connection(ConnectionError),
	/// The server ended the command with `error`
	ServerError(String),
	/// The server redirected to another root
	Redirect(String),
}

impl fmt::Display for ClientError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ClientError::Protocol(e) => write!(f, "{}", e),
			ClientError::Sync(e) => write!(f, "{}", e),
			ClientError::Connection(e) => write!(f, "{}", e),
			ClientError::ServerError(msg) if msg.is_empty() => write!(f, "server reported an error"),
			ClientError::ServerError(msg) => write!(f, "{}", msg),
			ClientError::Redirect(root) => write!(f, "redirected to {}", root),
		}
	}
}

impl Error for ClientError {}

impl From<ProtocolError> for ClientError {
	fn from(e: ProtocolError) -> Self {
		ClientError::Protocol(e)
	}
}

impl From<BufferError> for ClientError {
	fn from(e: BufferError) -> Self {
		ClientError::Protocol(ProtocolError::Buffer(e))
	}
}

impl From<SyncError> for ClientError {
	fn from(e: SyncError) -> Self {
		ClientError::Sync(e)
	}
}

impl From<ConnectionError> for ClientError {
	fn from(e: ConnectionError) -> Self {
		ClientError::Connection(e)
	}
}

impl From<io::Error> for ClientError {
	fn from(e: io::Error) -> Self {
		ClientError::Sync(SyncError::Io(e))
	}
}

pub type ClientResult<T> = Result<T, ClientError>;

// vim: ts=4
