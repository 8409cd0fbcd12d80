//! Client response handling against scripted server output
//!
//! The server side of each test is a fixed byte stream; the tests check
//! what the client leaves in the working copy.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

use cvsproto::buffer::MemoryBuffer;
use cvsproto::client::{Client, Connection, CvsRoot, Scope, UpdateOptions};
use cvsproto::config::Config;
use cvsproto::sync::{admin, patch, EntriesFile, Entry, Notice};
use cvsproto::util;

// ============================================================================
// Helper Functions
// ============================================================================

fn client(top: &Path, server_output: Vec<u8>) -> Client {
	let config = Config::default();
	let conn = Connection::from_buffers(
		&config,
		Box::new(MemoryBuffer::input(server_output)),
		Box::new(MemoryBuffer::output().0),
	);
	let mut client = Client::new(Arc::new(config), CvsRoot::parse("/repo").unwrap(), conn, top);
	client.capture_output();
	client
}

/// Working copy of `/repo` holding `foo.c` at revision 1.1
fn working_copy(top: &Path, contents: &[u8]) {
	admin::create_admin(top, "/repo/.", Some("/repo")).unwrap();
	fs::write(top.join("foo.c"), contents).unwrap();
	let mtime = fs::metadata(top.join("foo.c")).unwrap().modified().unwrap();
	let mut entries = EntriesFile::load(top).unwrap();
	entries.register(Entry::file("foo.c", "1.1", &util::entries_timestamp(mtime), "", ""));
	entries.save(top).unwrap();
}

fn entry(dir: &Path, name: &str) -> Entry {
	EntriesFile::load(dir).unwrap().get(name).cloned().expect("no entry")
}

// ============================================================================
// Transfer Tests
// ============================================================================

#[tokio::test]
async fn test_updated_creates_directory_file_and_entry() {
	let top = TempDir::new().unwrap();
	let mut script = Vec::new();
	script.extend_from_slice(b"Mod-time 10 Jan 2020 12:00:00 -0000\n");
	script.extend_from_slice(b"Updated mod/\n/repo/mod/foo.c\n/foo.c/1.1///\nu=rw,g=r,o=r\n6\nhello\n");
	script.extend_from_slice(b"ok\n");
	let mut c = client(top.path(), script);

	c.run_command("co", &["mod".to_string()], &Scope::Root).await.unwrap();

	let dir = top.path().join("mod");
	assert_eq!(fs::read(dir.join("foo.c")).unwrap(), b"hello\n");
	assert_eq!(admin::read_repository(&dir).unwrap(), "/repo/mod");
	// a fresh checkout leaves the top directory alone
	assert!(!admin::has_admin(top.path()));

	let mtime = fs::metadata(dir.join("foo.c")).unwrap().modified().unwrap();
	let expected = SystemTime::UNIX_EPOCH + Duration::from_secs(1_578_657_600);
	assert_eq!(mtime, expected);
	let e = entry(&dir, "foo.c");
	assert_eq!(e.revision, "1.1");
	assert_eq!(e.timestamp, util::entries_timestamp(expected));
}

#[tokio::test]
async fn test_new_directory_registered_in_working_parent() {
	let top = TempDir::new().unwrap();
	admin::create_admin(top.path(), "/repo/.", Some("/repo")).unwrap();
	let script = b"Updated mod/\n/repo/mod/foo.c\n/foo.c/1.1///\nu=rw,g=r,o=r\n6\nhello\nok\n".to_vec();
	let mut c = client(top.path(), script);

	c.run_command("update", &["-d".to_string()], &Scope::Nothing).await.unwrap();

	assert_eq!(fs::read(top.path().join("mod").join("foo.c")).unwrap(), b"hello\n");
	assert!(EntriesFile::load(top.path()).unwrap().directories().any(|d| d.name == "mod"));
}

#[tokio::test]
async fn test_created_refuses_file_in_the_way() {
	let top = TempDir::new().unwrap();
	admin::create_admin(top.path(), "/repo/.", None).unwrap();
	fs::write(top.path().join("foo.c"), b"local\n").unwrap();
	let script = b"Created ./\n/repo/foo.c\n/foo.c/1.1///\nu=rw,g=r,o=r\n7\nremote\nok\n".to_vec();
	let mut c = client(top.path(), script);

	c.run_command("update", &[], &Scope::Nothing).await.unwrap();

	assert_eq!(fs::read(top.path().join("foo.c")).unwrap(), b"local\n");
	assert_eq!(c.conflicts(), 1);
	assert!(c.messages().contains(&Notice::Out("C ./foo.c".to_string())) || c.messages().contains(&Notice::Out("C foo.c".to_string())));
}

#[tokio::test]
async fn test_checked_in_registers_without_contents() {
	let top = TempDir::new().unwrap();
	working_copy(top.path(), b"one\n");
	let script = b"Checked-in ./\n/repo/foo.c\n/foo.c/1.2///\nok\n".to_vec();
	let mut c = client(top.path(), script);

	c.run_command("ci", &[], &Scope::Nothing).await.unwrap();

	assert_eq!(entry(top.path(), "foo.c").revision, "1.2");
	assert_eq!(fs::read(top.path().join("foo.c")).unwrap(), b"one\n");
}

#[tokio::test]
async fn test_removed_deletes_file_and_entry() {
	let top = TempDir::new().unwrap();
	working_copy(top.path(), b"one\n");
	let mut c = client(top.path(), b"Removed ./\n/repo/foo.c\nok\n".to_vec());

	c.run_command("update", &[], &Scope::Nothing).await.unwrap();

	assert!(!top.path().join("foo.c").exists());
	assert!(EntriesFile::load(top.path()).unwrap().get("foo.c").is_none());
}

#[tokio::test]
async fn test_rcs_diff_applied() {
	let top = TempDir::new().unwrap();
	working_copy(top.path(), b"one\n");
	let diff = patch::rcs_diff(b"one\n", b"one\ntwo\n").unwrap();
	let mut script = format!("Rcs-diff ./\n/repo/foo.c\n/foo.c/1.2///\nu=rw,g=r,o=r\n{}\n", diff.len()).into_bytes();
	script.extend_from_slice(&diff);
	script.extend_from_slice(b"ok\n");
	let mut c = client(top.path(), script);

	c.run_command("update", &[], &Scope::Nothing).await.unwrap();

	assert_eq!(fs::read(top.path().join("foo.c")).unwrap(), b"one\ntwo\n");
	assert_eq!(entry(top.path(), "foo.c").revision, "1.2");
}

// ============================================================================
// Refetch Tests
// ============================================================================

#[tokio::test]
async fn test_bad_checksum_after_patch_triggers_refetch() {
	let top = TempDir::new().unwrap();
	working_copy(top.path(), b"one\n");
	let diff = patch::rcs_diff(b"one\n", b"one\ntwo\n").unwrap();

	let mut script = Vec::new();
	// session start
	script.extend_from_slice(b"Valid-requests Root Valid-responses valid-requests Directory Entry Unchanged Modified Argument Argumentx ci co update update-patches\nok\n");
	// first pass: the delta applies but the checksum is wrong
	script.extend_from_slice(b"Checksum 00000000000000000000000000000000\n");
	script.extend_from_slice(format!("Rcs-diff ./\n/repo/foo.c\n/foo.c/1.2///\nu=rw,g=r,o=r\n{}\n", diff.len()).as_bytes());
	script.extend_from_slice(&diff);
	script.extend_from_slice(b"ok\n");
	// second pass: the whole file
	script.extend_from_slice(b"Updated ./\n/repo/foo.c\n/foo.c/1.2///\nu=rw,g=r,o=r\n8\none\ntwo\nok\n");
	let mut c = client(top.path(), script);

	c.start().await.unwrap();
	c.update(&[], UpdateOptions::default()).await.unwrap();

	assert_eq!(fs::read(top.path().join("foo.c")).unwrap(), b"one\ntwo\n");
	assert_eq!(entry(top.path(), "foo.c").revision, "1.2");
	assert!(c.messages().contains(&Notice::Err("cvs client: refetching unpatchable files".to_string())));
}

#[tokio::test]
async fn test_update_without_failures_runs_once() {
	let top = TempDir::new().unwrap();
	working_copy(top.path(), b"one\n");
	// anything after the first `ok` would be a second pass
	let mut c = client(top.path(), b"M nothing to do\nok\nM second pass\nok\n".to_vec());

	c.update(&[], UpdateOptions::default()).await.unwrap();

	assert_eq!(c.messages(), &[Notice::Out("nothing to do".to_string())]);
}

// vim: ts=4
