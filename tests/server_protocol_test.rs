//! Server request dispatch tests
//!
//! Each test feeds a scripted request stream to a [`Server`] and checks
//! the exact response lines it produces.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use cvsproto::buffer::MemoryBuffer;
use cvsproto::config::Config;
use cvsproto::protocol::negotiation::valid_responses_line;
use cvsproto::protocol::responses;
use cvsproto::server::repository::{FileStore, Repository};
use cvsproto::server::Server;

// ============================================================================
// Helper Functions
// ============================================================================

struct Fixture {
	_tmp: TempDir,
	root: PathBuf,
	config: Config,
}

async fn fixture() -> Fixture {
	let tmp = TempDir::new().unwrap();
	let root = tmp.path().join("repo");
	let store = FileStore::new(&root);
	store.init().await.unwrap();
	store.commit(&root, "foo.c", b"hello\n", "u=rw,g=r,o=r", "initial").await.unwrap();

	let work = tmp.path().join("tmp");
	fs::create_dir(&work).unwrap();
	let mut config = Config::default();
	config.server.tmp_dir = work;
	Fixture { _tmp: tmp, root, config }
}

fn session_start(root: &Path) -> String {
	format!("Root {}\n{}\nvalid-requests\n", root.display(), valid_responses_line(responses()))
}

async fn serve(config: &Config, script: String) -> Vec<String> {
	let (output, bytes) = MemoryBuffer::output();
	let input = MemoryBuffer::input(script.into_bytes());
	let mut server = Server::new(Arc::new(config.clone()), Box::new(input), Box::new(output));
	server.run().await.unwrap();
	let data = bytes.lock().unwrap().clone();
	String::from_utf8(data).unwrap().lines().map(str::to_string).collect()
}

// ============================================================================
// Dispatch Tests
// ============================================================================

#[tokio::test]
async fn test_negotiation_lists_requests() {
	let fx = fixture().await;
	let lines = serve(&fx.config, session_start(&fx.root)).await;
	assert_eq!(lines.len(), 2);
	assert!(lines[0].starts_with("Valid-requests Root Valid-responses valid-requests"));
	assert!(lines[0].split(' ').any(|name| name == "update"));
	assert_eq!(lines[1], "ok");
}

#[tokio::test]
async fn test_unknown_request() {
	let fx = fixture().await;
	let script = format!("Root {}\nfrobnicate now\n", fx.root.display());
	let lines = serve(&fx.config, script).await;
	assert_eq!(lines, vec!["error  unrecognized request `frobnicate now'".to_string()]);
}

#[tokio::test]
async fn test_request_before_root_is_held_as_pending_error() {
	let fx = fixture().await;
	let lines = serve(&fx.config, "Argument foo\nvalid-requests\n".to_string()).await;
	assert_eq!(lines, vec!["E Protocol error: Root request missing".to_string(), "error  ".to_string()]);
}

#[tokio::test]
async fn test_relative_root_rejected() {
	let fx = fixture().await;
	let lines = serve(&fx.config, "Root relative/path\nvalid-requests\n".to_string()).await;
	assert_eq!(lines, vec!["E Root relative/path must be an absolute pathname".to_string(), "error  ".to_string()]);
}

#[tokio::test]
async fn test_missing_essential_response_ends_connection() {
	let fx = fixture().await;
	let script = format!("Root {}\nValid-responses ok M E\nvalid-requests\n", fx.root.display());
	let lines = serve(&fx.config, script).await;
	assert_eq!(lines.len(), 2);
	assert!(lines[0].starts_with("E response `"), "{}", lines[0]);
	assert!(lines[0].ends_with("' not supported by client"), "{}", lines[0]);
	assert_eq!(lines[1], "error  ");
}

// ============================================================================
// Command Tests
// ============================================================================

#[tokio::test]
async fn test_unchanged_file_needs_no_transfer() {
	let fx = fixture().await;
	let root = fx.root.display().to_string();
	let script = format!(
		"Root {}\nValid-responses ok error Updated M E\nvalid-requests\nDirectory .\n{}\nEntry /foo.c/1.1///\nUnchanged foo.c\nArgument foo.c\nupdate\n",
		root, root
	);
	let lines = serve(&fx.config, script).await;
	assert!(lines[0].starts_with("Valid-requests "));
	assert_eq!(&lines[1..], &["ok".to_string(), "ok".to_string()]);
}

#[tokio::test]
async fn test_lost_file_is_sent_again() {
	let fx = fixture().await;
	let root = fx.root.display().to_string();
	let script = format!(
		"{}UseUnchanged\nDirectory .\n{}\nEntry /foo.c/1.1///\nupdate\n",
		session_start(&fx.root),
		root
	);
	let lines = serve(&fx.config, script).await;
	assert!(lines.contains(&"U foo.c".to_string()) || lines.contains(&"M U foo.c".to_string()));
	let updated = lines.iter().position(|l| l == "Updated ./").expect("no Updated response");
	assert_eq!(lines[updated + 1], format!("{}/foo.c", root));
	assert_eq!(lines[updated + 2], "/foo.c/1.1///");
	assert_eq!(lines[updated + 3], "u=rw,g=r,o=r");
	assert_eq!(lines[updated + 4], "6");
	assert_eq!(lines[updated + 5], "hello");
	assert_eq!(lines.last().map(String::as_str), Some("ok"));
}

#[tokio::test]
async fn test_read_only_server_refuses_commit() {
	let mut fx = fixture().await;
	fx.config.server.read_only = true;
	let script = format!("{}Argument -m\nArgument message\nci\n", session_start(&fx.root));
	let lines = serve(&fx.config, script).await;
	assert_eq!(
		&lines[2..],
		&["E cvs [server aborted]: \"ci\" requires write access to the repository".to_string(), "error  ".to_string()]
	);
}

#[tokio::test]
async fn test_write_command_redirected_to_primary() {
	let mut fx = fixture().await;
	fx.config.server.primary_root = Some(":ext:primary.example.org:/primary".to_string());
	let script = format!("{}Command-prep ci\n", session_start(&fx.root));
	let lines = serve(&fx.config, script).await;
	assert_eq!(lines.last().map(String::as_str), Some("Redirect :ext:primary.example.org:/primary"));
	assert!(lines.iter().any(|l| l.starts_with("Referrer :ext:")));
}

#[tokio::test]
async fn test_read_command_not_redirected() {
	let mut fx = fixture().await;
	fx.config.server.primary_root = Some(":ext:primary.example.org:/primary".to_string());
	let script = format!("{}Command-prep update\n", session_start(&fx.root));
	let lines = serve(&fx.config, script).await;
	assert_eq!(lines.last().map(String::as_str), Some("ok"));
}

#[tokio::test]
async fn test_version() {
	let fx = fixture().await;
	let script = format!("{}version\n", session_start(&fx.root));
	let lines = serve(&fx.config, script).await;
	assert_eq!(lines[2], format!("M cvsproto {} (client/server)", env!("CARGO_PKG_VERSION")));
	assert_eq!(lines[3], "ok");
}

// vim: ts=4
