//! Capability negotiation
//!
//! Each side advertises its table as one space-separated line. The receiver
//! marks the advertised entries of its own table as supported and checks
//! that every essential entry made it.
//!
//! Client side: `Valid-responses <names>` then `valid-requests`, answered by
//! `Valid-requests <names>` and `ok`.

use super::error::{ProtocolError, ProtocolResult};
use super::table::{Support, Table};

/// `Valid-requests <names>` as the server announces it
pub fn valid_requests_line<K: Copy>(table: &Table<K>) -> String {
	format!("Valid-requests {}", table.names())
}

/// `Valid-responses <names>` as the client announces it
pub fn valid_responses_line<K: Copy>(table: &Table<K>) -> String {
	format!("Valid-responses {}", table.names())
}

/// Mark every name of `advertised` that the table knows; unknown names are skipped
pub fn mark_advertised<K: Copy>(table: &Table<K>, support: &mut Support, advertised: &str) -> usize {
	let mut known = 0;
	for name in advertised.split_whitespace() {
		if let Some(i) = table.position(name) {
			support.mark(i);
			known += 1;
		}
	}
	known
}

/// First essential entry the peer did not advertise
pub fn missing_essential<K: Copy>(table: &Table<K>, support: &Support) -> Option<&'static str> {
	table
		.entries()
		.iter()
		.enumerate()
		.find(|(i, e)| e.is_essential() && !support.is_supported(*i))
		.map(|(_, e)| e.name)
}

/// Entries the peer offers to enable when the client sends them back
pub fn enableme_requests<K: Copy>(table: &Table<K>, support: &Support) -> Vec<&'static str> {
	table
		.entries()
		.iter()
		.enumerate()
		.filter(|(i, e)| e.is_enableme() && support.is_supported(*i))
		.map(|(_, e)| e.name)
		.collect()
}

/// Server: record the client's `Valid-responses` list
///
/// Fails with the message the server reports when an essential response is
/// missing.
pub fn accept_valid_responses<K: Copy>(
	table: &Table<K>,
	support: &mut Support,
	advertised: &str,
) -> ProtocolResult<()> {
	mark_advertised(table, support, advertised);
	match missing_essential(table, support) {
		Some(name) => {
			Err(ProtocolError::NotSupported(format!("response `{}' not supported by client", name)))
		}
		None => Ok(()),
	}
}

/// Client: record the server's `Valid-requests` list
pub fn accept_valid_requests<K: Copy>(
	table: &Table<K>,
	support: &mut Support,
	advertised: &str,
) -> ProtocolResult<()> {
	mark_advertised(table, support, advertised);
	match missing_essential(table, support) {
		Some(name) => {
			Err(ProtocolError::NotSupported(format!("request `{}' not supported by server", name)))
		}
		None => Ok(()),
	}
}


// vim: ts=4
