//! Request and response tables
//!
//! Both peers describe their vocabulary as an ordered table of
//! `(keyword, kind, flags)` entries. Tables are built once and shared
//! read-only between connections; which entries the peer supports is kept
//! per connection in a [`Support`] side table indexed like the table.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Capability flags of a table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
	pub const OPTIONAL: Flags = Flags(0);
	/// Both peers must support the entry
	pub const ESSENTIAL: Flags = Flags(1);
	/// The client sends this request back to enable it
	pub const ENABLEME: Flags = Flags(2);
	/// Allowed before a root has been selected
	pub const ROOTLESS: Flags = Flags(4);

	pub const fn union(self, other: Flags) -> Flags {
		Flags(self.0 | other.0)
	}

	pub fn contains(self, other: Flags) -> bool {
		self.0 & other.0 == other.0 && other.0 != 0
	}
}

impl std::ops::BitOr for Flags {
	type Output = Flags;

	fn bitor(self, rhs: Flags) -> Flags {
		self.union(rhs)
	}
}

#[derive(Debug, Clone, Copy)]
pub struct TableEntry<K> {
	pub name: &'static str,
	pub kind: K,
	pub flags: Flags,
}

impl<K> TableEntry<K> {
	pub fn is_essential(&self) -> bool {
		self.flags.contains(Flags::ESSENTIAL)
	}

	pub fn is_rootless(&self) -> bool {
		self.flags.contains(Flags::ROOTLESS)
	}

	pub fn is_enableme(&self) -> bool {
		self.flags.contains(Flags::ENABLEME)
	}
}

/// Immutable keyword table with exact token lookup
pub struct Table<K: 'static> {
	entries: &'static [TableEntry<K>],
	index: HashMap<&'static str, usize>,
}

impl<K: Copy + 'static> Table<K> {
	pub fn new(entries: &'static [TableEntry<K>]) -> Self {
		let index = entries.iter().enumerate().map(|(i, e)| (e.name, i)).collect();
		Table { entries, index }
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn entries(&self) -> &'static [TableEntry<K>] {
		self.entries
	}

	pub fn get(&self, index: usize) -> &TableEntry<K> {
		&self.entries[index]
	}

	pub fn position(&self, name: &str) -> Option<usize> {
		self.index.get(name).copied()
	}

	/// Match a protocol line against the table
	///
	/// A keyword matches only when the line is the keyword alone or the
	/// keyword followed by a single space, so `co` never matches a line
	/// starting with `cooperate`. Returns the entry index and the argument.
	pub fn lookup<'a>(&self, line: &'a str) -> Option<(usize, &'a str)> {
		let (token, rest) = match line.find(' ') {
			Some(pos) => (&line[..pos], &line[pos + 1..]),
			None => (line, ""),
		};
		self.position(token).map(|i| (i, rest))
	}

	/// Space-separated list of every keyword, in table order
	pub fn names(&self) -> String {
		self.entries.iter().map(|e| e.name).collect::<Vec<_>>().join(" ")
	}

	/// Fresh side table with every entry marked unsupported
	pub fn support(&self) -> Support {
		Support { bits: vec![false; self.entries.len()] }
	}
}

/// Per-connection record of which entries the peer advertised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Support {
	bits: Vec<bool>,
}

impl Support {
	pub fn mark(&mut self, index: usize) {
		if let Some(bit) = self.bits.get_mut(index) {
			*bit = true;
		}
	}

	pub fn is_supported(&self, index: usize) -> bool {
		self.bits.get(index).copied().unwrap_or(false)
	}

	pub fn count(&self) -> usize {
		self.bits.iter().filter(|b| **b).count()
	}
}

// ============================================================================
// SERVER REQUESTS
// ============================================================================

/// Whether a command modifies the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
	Read,
	Write,
}

/// Handler bound to a request keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
	Root,
	ValidResponses,
	ValidRequests,
	CommandPrep,
	Referrer,
	Repository,
	Directory,
	MaxDotdot,
	StaticDirectory,
	Sticky,
	Ignored,
	Entry,
	Kopt,
	CheckinTime,
	Modified,
	IsModified,
	UseUnchanged,
	Unchanged,
	Notify,
	Hostname,
	LocalDir,
	Questionable,
	Argument,
	Argumentx,
	GlobalOption,
	GzipStream,
	WrapperSendmeRcsOptions,
	Set,
	KerberosEncrypt,
	GssapiEncrypt,
	GssapiAuthenticate,
	ExpandModules,
	GzipFileContents,
	Noop,
	Version,
	Init,
	/// Runs a command; the keyword is the command name
	Command(Access),
}

macro_rules! req {
	($name:expr, $kind:expr) => {
		TableEntry { name: $name, kind: $kind, flags: Flags::OPTIONAL }
	};
	($name:expr, $kind:expr, $flags:expr) => {
		TableEntry { name: $name, kind: $kind, flags: $flags }
	};
}

const ESS: Flags = Flags::ESSENTIAL;
const ROOTLESS: Flags = Flags::ROOTLESS;
const ESS_ROOTLESS: Flags = Flags::ESSENTIAL.union(Flags::ROOTLESS);
const READ: Request = Request::Command(Access::Read);
const WRITE: Request = Request::Command(Access::Write);

static REQUESTS: &[TableEntry<Request>] = &[
	req!("Root", Request::Root, ESS_ROOTLESS),
	req!("Valid-responses", Request::ValidResponses, ESS_ROOTLESS),
	req!("valid-requests", Request::ValidRequests, ESS_ROOTLESS),
	req!("Command-prep", Request::CommandPrep),
	req!("Referrer", Request::Referrer),
	req!("Repository", Request::Repository),
	req!("Directory", Request::Directory, ESS),
	req!("Relative-directory", Request::Directory),
	req!("Max-dotdot", Request::MaxDotdot),
	req!("Static-directory", Request::StaticDirectory),
	req!("Sticky", Request::Sticky),
	req!("Checkin-prog", Request::Ignored),
	req!("Update-prog", Request::Ignored),
	req!("Entry", Request::Entry, ESS),
	req!("Kopt", Request::Kopt),
	req!("Checkin-time", Request::CheckinTime),
	req!("Modified", Request::Modified, ESS),
	req!("Is-modified", Request::IsModified),
	req!("UseUnchanged", Request::UseUnchanged, Flags::ENABLEME.union(Flags::ROOTLESS)),
	req!("Unchanged", Request::Unchanged, ESS),
	req!("Notify", Request::Notify),
	req!("Hostname", Request::Hostname),
	req!("LocalDir", Request::LocalDir),
	req!("Questionable", Request::Questionable),
	req!("Argument", Request::Argument, ESS),
	req!("Argumentx", Request::Argumentx, ESS),
	req!("Global_option", Request::GlobalOption, ROOTLESS),
	req!("Gzip-stream", Request::GzipStream, ROOTLESS),
	req!("wrapper-sendme-rcsOptions", Request::WrapperSendmeRcsOptions),
	req!("Set", Request::Set, ROOTLESS),
	req!("Kerberos-encrypt", Request::KerberosEncrypt, ROOTLESS),
	req!("Gssapi-encrypt", Request::GssapiEncrypt, ROOTLESS),
	req!("Gssapi-authenticate", Request::GssapiAuthenticate, ROOTLESS),
	req!("expand-modules", Request::ExpandModules),
	req!("ci", WRITE, ESS),
	req!("co", READ, ESS),
	req!("update", READ, ESS),
	req!("diff", READ),
	req!("log", READ),
	req!("rlog", READ),
	req!("list", READ),
	req!("rlist", READ),
	req!("global-list-quiet", Request::Noop, ROOTLESS),
	req!("ls", READ),
	req!("add", WRITE),
	req!("remove", WRITE),
	req!("update-patches", Request::Ignored),
	req!("gzip-file-contents", Request::GzipFileContents, ROOTLESS),
	req!("status", READ),
	req!("rdiff", READ),
	req!("tag", WRITE),
	req!("rtag", WRITE),
	req!("import", WRITE),
	req!("admin", WRITE),
	req!("export", READ),
	req!("history", READ),
	req!("release", READ),
	req!("watch-on", WRITE),
	req!("watch-off", WRITE),
	req!("watch-add", WRITE),
	req!("watch-remove", WRITE),
	req!("watchers", READ),
	req!("editors", READ),
	req!("edit", WRITE),
	req!("init", Request::Init, ROOTLESS),
	req!("annotate", READ),
	req!("rannotate", READ),
	req!("noop", Request::Noop, ROOTLESS),
	req!("version", Request::Version, ROOTLESS),
];

/// The server's request table
pub fn requests() -> &'static Table<Request> {
	static TABLE: OnceLock<Table<Request>> = OnceLock::new();
	TABLE.get_or_init(|| Table::new(REQUESTS))
}

// ============================================================================
// CLIENT RESPONSES
// ============================================================================

/// Handler bound to a response keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
	Ok,
	Error,
	ValidRequests,
	ForceGzip,
	Referrer,
	Redirect,
	CheckedIn,
	NewEntry,
	Checksum,
	CopyFile,
	Updated,
	Created,
	UpdateExisting,
	Merged,
	Patched,
	RcsDiff,
	Mode,
	ModTime,
	Removed,
	RemoveEntry,
	SetStaticDirectory,
	ClearStaticDirectory,
	SetSticky,
	ClearSticky,
	EditFile,
	Template,
	ClearTemplate,
	Notified,
	ModuleExpansion,
	WrapperRcsOption,
	M,
	Mbinary,
	E,
	F,
	MT,
}

static RESPONSES: &[TableEntry<Response>] = &[
	req!("ok", Response::Ok, ESS),
	req!("error", Response::Error, ESS),
	req!("Valid-requests", Response::ValidRequests),
	req!("Force-gzip", Response::ForceGzip),
	req!("Referrer", Response::Referrer),
	req!("Redirect", Response::Redirect),
	req!("Checked-in", Response::CheckedIn),
	req!("New-entry", Response::NewEntry),
	req!("Checksum", Response::Checksum),
	req!("Copy-file", Response::CopyFile),
	req!("Updated", Response::Updated, ESS),
	req!("Created", Response::Created),
	req!("Update-existing", Response::UpdateExisting),
	req!("Merged", Response::Merged),
	req!("Patched", Response::Patched),
	req!("Rcs-diff", Response::RcsDiff),
	req!("Mode", Response::Mode),
	req!("Mod-time", Response::ModTime),
	req!("Removed", Response::Removed),
	req!("Remove-entry", Response::RemoveEntry),
	req!("Set-static-directory", Response::SetStaticDirectory),
	req!("Clear-static-directory", Response::ClearStaticDirectory),
	req!("Set-sticky", Response::SetSticky),
	req!("Clear-sticky", Response::ClearSticky),
	req!("Edit-file", Response::EditFile),
	req!("Template", Response::Template),
	req!("Clear-template", Response::ClearTemplate),
	req!("Notified", Response::Notified),
	req!("Module-expansion", Response::ModuleExpansion),
	req!("Wrapper-rcsOption", Response::WrapperRcsOption),
	req!("M", Response::M, ESS),
	req!("Mbinary", Response::Mbinary),
	req!("E", Response::E, ESS),
	req!("F", Response::F),
	req!("MT", Response::MT),
];

/// The client's response table
pub fn responses() -> &'static Table<Response> {
	static TABLE: OnceLock<Table<Response>> = OnceLock::new();
	TABLE.get_or_init(|| Table::new(RESPONSES))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_keyword_needs_boundary() {
		let t = requests();
		let (i, arg) = t.lookup("co").unwrap();
		assert_eq!(t.get(i).name, "co");
		assert_eq!(arg, "");
		assert!(t.lookup("cooperate").is_none());
		assert!(t.lookup("cooperate now").is_none());
	}

	#[test]
	fn test_argument_after_single_space() {
		let (i, arg) = requests().lookup("Argument -m  two spaces").unwrap();
		assert_eq!(requests().get(i).kind, Request::Argument);
		assert_eq!(arg, "-m  two spaces");
	}

	#[test]
	fn test_directory_aliases_share_handler() {
		let t = requests();
		let (a, _) = t.lookup("Directory foo").unwrap();
		let (b, _) = t.lookup("Relative-directory foo").unwrap();
		assert_eq!(t.get(a).kind, t.get(b).kind);
		assert!(t.get(a).is_essential());
		assert!(!t.get(b).is_essential());
	}

	#[test]
	fn test_flags() {
		let t = requests();
		let root = t.get(t.position("Root").unwrap());
		assert!(root.is_essential() && root.is_rootless());
		let unchanged = t.get(t.position("UseUnchanged").unwrap());
		assert!(unchanged.is_enableme() && !unchanged.is_essential());
		assert_eq!(t.get(t.position("ci").unwrap()).kind, Request::Command(Access::Write));
	}

	#[test]
	fn test_support_side_table() {
		let t = responses();
		let mut support = t.support();
		let m = t.position("M").unwrap();
		assert!(!support.is_supported(m));
		support.mark(m);
		assert!(support.is_supported(m));
		assert_eq!(support.count(), 1);
		assert!(!support.is_supported(t.len() + 5));
	}

	#[test]
	fn test_names_in_table_order() {
		let names = responses().names();
		assert!(names.starts_with("ok error Valid-requests"));
		assert!(names.ends_with("E F MT"));
	}
}

// vim: ts=4
