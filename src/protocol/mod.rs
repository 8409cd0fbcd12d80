//! Wire protocol layer
//!
//! Line and counted codecs on top of buffer chains, the request/response
//! keyword tables, capability negotiation and the password preamble.
//!
//! # Example Usage
//!
//! ```ignore
//! use cvsproto::protocol::{requests, LineReader};
//!
//! let line = reader.expect_line("request").await?;
//! if let Some((index, arg)) = requests().lookup(&line) {
//!     // dispatch requests().get(index).kind with `arg`
//! }
//! ```

pub mod auth;
pub mod codec;
pub mod counted;
pub mod error;
pub mod negotiation;
pub mod table;

pub use codec::{argument_lines, LineReader, LineWriter};
pub use counted::{CountedDecoder, Packet};
pub use error::{ProtocolError, ProtocolResult};
pub use table::{requests, responses, Access, Flags, Request, Response, Support, Table};

// vim: ts=4
