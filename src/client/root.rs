//! Repository root strings
//!
//! ```text
//! /path/to/repo                          local
//! :local:/path/to/repo
//! :fork:/path/to/repo                    local, through a forked server
//! :ext:[user@]host:/path/to/repo         remote shell
//! [user@]host:/path/to/repo              same as :ext:
//! :pserver:[user[:password]@]host[:port]/path/to/repo
//! ```

use std::fmt;

use crate::error::ConnectionError;

/// Port of the password server when the root names none
pub const PSERVER_PORT: u16 = 2401;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
	Local,
	Fork,
	Ext,
	Pserver,
}

impl Method {
	fn name(self) -> &'static str {
		match self {
			Method::Local => "local",
			Method::Fork => "fork",
			Method::Ext => "ext",
			Method::Pserver => "pserver",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvsRoot {
	pub method: Method,
	pub user: Option<String>,
	pub password: Option<String>,
	pub host: Option<String>,
	pub port: Option<u16>,
	directory: String,
}

impl CvsRoot {
	pub fn parse(text: &str) -> Result<Self, ConnectionError> {
		let bad = || ConnectionError::BadRoot { root: text.to_string() };

		let (method, rest) = match text.strip_prefix(':') {
			Some(tail) => {
				let (name, rest) = tail.split_once(':').ok_or_else(bad)?;
				let method = match name {
					"local" => Method::Local,
					"fork" => Method::Fork,
					"ext" => Method::Ext,
					"pserver" => Method::Pserver,
					_ => return Err(bad()),
				};
				(method, rest)
			}
			None if text.starts_with('/') => (Method::Local, text),
			None if text.contains(':') => (Method::Ext, text),
			None => return Err(bad()),
		};

		let mut root = CvsRoot { method, user: None, password: None, host: None, port: None, directory: String::new() };
		let directory = match method {
			Method::Local | Method::Fork => rest,
			Method::Ext | Method::Pserver => {
				let slash = rest.find('/').ok_or_else(bad)?;
				let (server, directory) = rest.split_at(slash);
				let host_port = match server.rsplit_once('@') {
					Some((credentials, host)) => {
						match credentials.split_once(':') {
							Some((user, password)) if method == Method::Pserver => {
								root.user = Some(user.to_string());
								root.password = Some(password.to_string());
							}
							Some(_) => return Err(bad()),
							None => root.user = Some(credentials.to_string()),
						}
						host
					}
					None => server,
				};
				let host_port = host_port.strip_suffix(':').unwrap_or(host_port);
				let host = match host_port.split_once(':') {
					Some((host, port)) => {
						root.port = Some(port.parse().map_err(|_| bad())?);
						host
					}
					None => host_port,
				};
				if host.is_empty() || root.user.as_deref() == Some("") {
					return Err(bad());
				}
				root.host = Some(host.to_string());
				directory
			}
		};

		if !directory.starts_with('/') {
			return Err(bad());
		}
		root.directory = if directory.len() > 1 { directory.trim_end_matches('/') } else { directory }.to_string();
		Ok(root)
	}

	/// Repository directory on the server
	pub fn directory(&self) -> &str {
		&self.directory
	}

	pub fn host(&self) -> Option<&str> {
		self.host.as_deref()
	}

	/// The server runs on this machine
	pub fn is_local(&self) -> bool {
		matches!(self.method, Method::Local | Method::Fork)
	}

	/// Root as the pserver preamble and the password file name it
	pub fn for_auth(&self) -> String {
		format!(
			":pserver:{}@{}:{}{}",
			self.user.as_deref().unwrap_or(""),
			self.host.as_deref().unwrap_or(""),
			self.port.unwrap_or(PSERVER_PORT),
			self.directory
		)
	}
}

impl fmt::Display for CvsRoot {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, ":{}:", self.method.name())?;
		if let Some(user) = &self.user {
			write!(f, "{}@", user)?;
		}
		if let Some(host) = &self.host {
			write!(f, "{}:", host)?;
			if let Some(port) = self.port {
				write!(f, "{}", port)?;
			}
		}
		write!(f, "{}", self.directory)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_local_forms() {
		let root = CvsRoot::parse("/var/cvs/").unwrap();
		assert_eq!(root.method, Method::Local);
		assert_eq!(root.directory(), "/var/cvs");
		assert!(root.is_local());

		let root = CvsRoot::parse(":fork:/var/cvs").unwrap();
		assert_eq!(root.method, Method::Fork);
		assert_eq!(root.to_string(), ":fork:/var/cvs");
	}

	#[test]
	fn test_ext_forms() {
		let root = CvsRoot::parse("anon@cvs.example.org:/cvsroot").unwrap();
		assert_eq!(root.method, Method::Ext);
		assert_eq!(root.user.as_deref(), Some("anon"));
		assert_eq!(root.host(), Some("cvs.example.org"));
		assert_eq!(root.directory(), "/cvsroot");

		let root = CvsRoot::parse(":ext:host:/r").unwrap();
		assert_eq!(root.user, None);
		assert_eq!(root.to_string(), ":ext:host:/r");
	}

	#[test]
	fn test_pserver_with_port_and_password() {
		let root = CvsRoot::parse(":pserver:joe:secret@host:2402/repo").unwrap();
		assert_eq!(root.method, Method::Pserver);
		assert_eq!(root.password.as_deref(), Some("secret"));
		assert_eq!(root.port, Some(2402));
		assert_eq!(root.for_auth(), ":pserver:joe@host:2402/repo");

		let root = CvsRoot::parse(":pserver:joe@host:/repo").unwrap();
		assert_eq!(root.port, None);
		assert_eq!(root.for_auth(), ":pserver:joe@host:2401/repo");
	}

	#[test]
	fn test_rejects_bad_roots() {
		for text in &["relative/path", ":nope:/r", ":ext:host", ":pserver:@host:/r", ":local:rel", ":pserver:u@h:x/r"] {
			assert!(CvsRoot::parse(text).is_err(), "{} should be rejected", text);
		}
	}
}

// vim: ts=4
