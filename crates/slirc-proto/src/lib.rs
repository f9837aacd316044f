//! # slirc-proto
//!
//! Wire protocol for linking IRC servers into a spanning tree.
//!
//! - [`LineCodec`]: CRLF line framing with a length limit
//! - [`Message`]: optional source plus a typed [`Command`]
//! - [`ServerId`]: SID parsing and UID ownership
//! - [`casemap`]: RFC 1459 folding for names
//!
//! ```rust
//! use slirc_proto::{Command, Message};
//!
//! let msg: Message = ":00A SQUIT 00B :link lost".parse().expect("valid line");
//! assert!(matches!(msg.command, Command::SQUIT(..)));
//! assert_eq!(msg.to_string(), ":00A SQUIT 00B :link lost");
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod casemap;
pub mod command;
pub mod error;
#[cfg(feature = "tokio")]
pub mod line;
pub mod message;
pub mod sid;

pub use self::casemap::{irc_eq, irc_to_lower, mask_match};
pub use self::command::{Command, Member};
pub use self::error::{MessageParseError, ProtocolError};
#[cfg(feature = "tokio")]
pub use self::line::LineCodec;
pub use self::message::{Message, MAX_PARAMS};
pub use self::sid::{is_valid_sid, is_valid_uid, ServerId};

/// Protocol version exchanged in `CAPAB`. Both ends must match exactly.
pub const PROTOCOL_VERSION: u32 = 1200;

/// Capabilities a peer must offer for the link to be accepted.
pub const MANDATORY_CAPABS: &[&str] = &["BURST", "ENDBURST", "SJOIN", "ADDLINE"];

/// Capabilities this implementation offers.
pub const SUPPORTED_CAPABS: &[&str] = &["BURST", "ENDBURST", "SJOIN", "ADDLINE", "ENCAP", "TMODE"];
