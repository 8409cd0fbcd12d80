//! Client against server over an in-process pipe
//!
//! Both ends run in the same task, joined: the server serves until the
//! client closes its side of the connection.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

use cvsproto::buffer::TransportBuffer;
use cvsproto::client::{Client, Connection, CvsRoot, UpdateOptions};
use cvsproto::config::Config;
use cvsproto::server::repository::{FileStore, Repository};
use cvsproto::server::Server;
use cvsproto::sync::{EntriesFile, Notice};

// ============================================================================
// Helper Functions
// ============================================================================

struct Setup {
	tmp: TempDir,
	store: FileStore,
	config: Arc<Config>,
}

async fn setup(client_level: u32) -> Setup {
	let tmp = TempDir::new().unwrap();
	let root = tmp.path().join("repo");
	let store = FileStore::new(&root);
	store.init().await.unwrap();
	let module = root.join("mod");
	store.create_directory(&module).await.unwrap();
	store.commit(&module, "foo.c", b"hello\n", "u=rw,g=r,o=r", "initial").await.unwrap();
	store.commit(&module, "bar.c", b"int bar;\n", "u=rw,g=r,o=r", "initial").await.unwrap();

	fs::create_dir(tmp.path().join("tmp")).unwrap();
	fs::create_dir(tmp.path().join("work")).unwrap();
	let mut config = Config::default();
	config.server.tmp_dir = tmp.path().join("tmp");
	config.compression.client_level = client_level;
	Setup { tmp, store, config: Arc::new(config) }
}

/// Server and client ends joined by an in-memory pipe
fn connect(setup: &Setup) -> (Server, Client) {
	let (client_end, server_end) = tokio::io::duplex(1 << 16);
	let (server_rx, server_tx) = tokio::io::split(server_end);
	let server = Server::new(
		setup.config.clone(),
		Box::new(TransportBuffer::reader(server_rx)),
		Box::new(TransportBuffer::writer(server_tx)),
	);
	let (client_rx, client_tx) = tokio::io::split(client_end);
	let conn = Connection::from_buffers(
		&setup.config,
		Box::new(TransportBuffer::reader(client_rx)),
		Box::new(TransportBuffer::writer(client_tx)),
	);
	let root = CvsRoot::parse(&setup.tmp.path().join("repo").display().to_string()).unwrap();
	let mut client = Client::new(setup.config.clone(), root, conn, setup.tmp.path().join("work"));
	client.capture_output();
	(server, client)
}

fn age(path: &Path) {
	let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000);
	filetime::set_file_mtime(path, filetime::FileTime::from_system_time(old)).unwrap();
}

// ============================================================================
// Session Tests
// ============================================================================

#[tokio::test]
async fn test_checkout_update_commit() {
	let setup = setup(0).await;
	let module = setup.tmp.path().join("repo").join("mod");
	let work = setup.tmp.path().join("work").join("mod");
	let (mut server, mut client) = connect(&setup);

	let client_side = async {
		client.start().await.unwrap();
		assert!(client.supports_request("update-patches"));

		client.checkout(&["mod".to_string()], false).await.unwrap();
		assert_eq!(fs::read(work.join("foo.c")).unwrap(), b"hello\n");
		assert_eq!(fs::read(work.join("bar.c")).unwrap(), b"int bar;\n");
		let entries = EntriesFile::load(&work).unwrap();
		assert_eq!(entries.get("foo.c").map(|e| e.revision.as_str()), Some("1.1"));

		// someone else commits; update brings the change in as a delta
		setup.store.commit(&module, "foo.c", b"hello\nworld\n", "u=rw,g=r,o=r", "second").await.unwrap();
		client.update(&["mod".to_string()], UpdateOptions::default()).await.unwrap();
		assert_eq!(fs::read(work.join("foo.c")).unwrap(), b"hello\nworld\n");
		assert_eq!(EntriesFile::load(&work).unwrap().get("foo.c").map(|e| e.revision.clone()), Some("1.2".to_string()));

		// local change committed back
		fs::write(work.join("bar.c"), b"int bar = 1;\n").unwrap();
		age(&work.join("bar.c"));
		client.commit(&["mod/bar.c".to_string()], "set bar").await.unwrap();
		assert_eq!(EntriesFile::load(&work).unwrap().get("bar.c").map(|e| e.revision.clone()), Some("1.2".to_string()));

		client.close().await;
	};
	let (result, ()) = tokio::join!(server.run(), client_side);
	result.unwrap();

	let head = setup.store.head(&module, "bar.c").await.unwrap().unwrap();
	assert_eq!(head.number, "1.2");
	assert_eq!(setup.store.contents(&module, "bar.c", "1.2").await.unwrap(), b"int bar = 1;\n");
}

#[tokio::test]
async fn test_compressed_session() {
	let setup = setup(6).await;
	let work = setup.tmp.path().join("work").join("mod");
	let (mut server, mut client) = connect(&setup);

	let client_side = async {
		client.start().await.unwrap();
		client.checkout(&["mod".to_string()], false).await.unwrap();
		client.close().await;
	};
	let (result, ()) = tokio::join!(server.run(), client_side);
	result.unwrap();

	assert_eq!(fs::read(work.join("foo.c")).unwrap(), b"hello\n");
	assert_eq!(fs::read(work.join("bar.c")).unwrap(), b"int bar;\n");
}

#[tokio::test]
async fn test_add_and_remove() {
	let setup = setup(0).await;
	let module = setup.tmp.path().join("repo").join("mod");
	let work = setup.tmp.path().join("work").join("mod");
	let (mut server, mut client) = connect(&setup);

	let client_side = async {
		client.start().await.unwrap();
		client.checkout(&["mod".to_string()], false).await.unwrap();

		fs::write(work.join("new.c"), b"fresh\n").unwrap();
		client.add(&["mod/new.c".to_string()]).await.unwrap();
		let entries = EntriesFile::load(&work).unwrap();
		assert_eq!(entries.get("new.c").map(|e| e.revision.as_str()), Some("0"));

		client.remove(&["mod/bar.c".to_string()]).await.unwrap();
		assert!(!work.join("bar.c").exists());

		client.commit(&["mod".to_string()], "add and remove").await.unwrap();
		client.close().await;
	};
	let (result, ()) = tokio::join!(server.run(), client_side);
	result.unwrap();

	assert!(setup.store.head(&module, "new.c").await.unwrap().map_or(false, |r| !r.dead));
	assert!(setup.store.head(&module, "bar.c").await.unwrap().map_or(false, |r| r.dead));
}

#[tokio::test]
async fn test_version_reports_both_ends() {
	let setup = setup(0).await;
	let (mut server, mut client) = connect(&setup);

	let client_side = async {
		client.start().await.unwrap();
		client.version().await.unwrap();
		let messages = client.messages().to_vec();
		client.close().await;
		messages
	};
	let (result, messages) = tokio::join!(server.run(), client_side);
	result.unwrap();

	let version = env!("CARGO_PKG_VERSION");
	assert_eq!(messages[0], Notice::Out(format!("Client: cvsproto {} (client/server)", version)));
	assert!(messages.contains(&Notice::Out(format!("cvsproto {} (client/server)", version))));
}

// vim: ts=4
